//! Core data model: operators, operator sets and the ceremony identifier.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Globally unique identifier for an operator within a deployment.
pub type OperatorId = u64;

/// Supported operator-set sizes and their Byzantine-quorum threshold:
/// t = floor(2N/3) + 1.
pub const SUPPORTED_SET_SIZES: [usize; 4] = [4, 7, 10, 13];

/// Immutable record for one operator: identity, RSA public key (DER
/// SubjectPublicKeyInfo bytes, parsed on demand), and network endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperatorRecord {
    pub id: OperatorId,
    /// DER-encoded SubjectPublicKeyInfo for the operator's RSA public key.
    pub rsa_pub_der: Vec<u8>,
    pub endpoint: String,
}

/// Ordered set of operators bound to one ceremony. `|set|` must be one of
/// [`SUPPORTED_SET_SIZES`]; every message after Init is bound to this set's
/// hash so an operator can detect a mismatched or tampered membership.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperatorSet {
    operators: Vec<OperatorRecord>,
}

impl OperatorSet {
    /// Build an operator set, rejecting unsupported sizes and duplicate ids.
    pub fn new(operators: Vec<OperatorRecord>) -> Result<Self> {
        if !SUPPORTED_SET_SIZES.contains(&operators.len()) {
            return Err(Error::InvalidConfig(format!(
                "unsupported operator-set size {}, expected one of {:?}",
                operators.len(),
                SUPPORTED_SET_SIZES
            )));
        }
        let mut ids: Vec<OperatorId> = operators.iter().map(|o| o.id).collect();
        ids.sort_unstable();
        if ids.windows(2).any(|w| w[0] == w[1]) {
            return Err(Error::InvalidConfig("duplicate operator id in set".into()));
        }
        Ok(Self { operators })
    }

    pub fn operators(&self) -> &[OperatorRecord] {
        &self.operators
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Byzantine-quorum threshold: floor(2N/3) + 1.
    pub fn threshold(&self) -> usize {
        (2 * self.operators.len()) / 3 + 1
    }

    pub fn get(&self, id: OperatorId) -> Option<&OperatorRecord> {
        self.operators.iter().find(|o| o.id == id)
    }

    pub fn contains(&self, id: OperatorId) -> bool {
        self.get(id).is_some()
    }

    /// The deterministic polynomial evaluation point for `id`: the set's
    /// index of `id` plus one, so evaluation points are `{1..N}`.
    pub fn evaluation_point(&self, id: OperatorId) -> Option<u64> {
        self.operators
            .iter()
            .position(|o| o.id == id)
            .map(|idx| idx as u64 + 1)
    }

    pub fn ids(&self) -> Vec<OperatorId> {
        self.operators.iter().map(|o| o.id).collect()
    }

    /// SHA-256 over the canonical encoding of (id, rsa_pub_der, endpoint)
    /// for every member in order. Every message after Init binds to this.
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update((self.operators.len() as u32).to_be_bytes());
        for op in &self.operators {
            hasher.update(op.id.to_be_bytes());
            hasher.update((op.rsa_pub_der.len() as u32).to_be_bytes());
            hasher.update(&op.rsa_pub_der);
            hasher.update((op.endpoint.len() as u32).to_be_bytes());
            hasher.update(op.endpoint.as_bytes());
        }
        hasher.finalize().into()
    }
}

/// 24-byte opaque ceremony routing key: 8-byte unix-milli timestamp || 16
/// random bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CeremonyId(pub [u8; 24]);

impl CeremonyId {
    pub fn generate(unix_millis: u64, random: [u8; 16]) -> Self {
        let mut bytes = [0u8; 24];
        bytes[..8].copy_from_slice(&unix_millis.to_be_bytes());
        bytes[8..].copy_from_slice(&random);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 24]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 24] {
        &self.0
    }
}

impl fmt::Display for CeremonyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Parameters for a fresh DKG ceremony: a new validator key is generated
/// from scratch and shared across `operators`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CeremonyInput {
    pub owner_address: [u8; 20],
    pub withdrawal_credentials: [u8; 32],
    pub fork_version: [u8; 4],
    pub nonce: u64,
    pub operators: OperatorSet,
}

/// Parameters for a reshare: `old_operators` redistribute the existing
/// validator key to `new_operators` without changing the group public key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReshareInput {
    pub old_operators: OperatorSet,
    pub new_operators: OperatorSet,
    /// Feldman commitments published by the old operator set, needed by new
    /// recipients to verify the dealers' resharing polynomials.
    pub old_commitments: Vec<[u8; 48]>,
    /// Signed proofs issued by the old operator set at the end of the
    /// ceremony that produced the key currently being reshared.
    pub old_proofs: Vec<SignedProofInput>,
    pub old_group_public_key: [u8; 48],
}

/// One operator's signed proof from a prior ceremony, as carried in a
/// reshare request and in the on-disk proofs file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedProofInput {
    /// Old operator that dealt and signed this share.
    pub dealer: OperatorId,
    pub validator_pubkey: [u8; 48],
    pub encrypted_share: Vec<u8>,
    pub share_public_key: [u8; 48],
    pub owner_address: [u8; 20],
    pub signature: Vec<u8>,
}

/// Parameters for re-signing a voluntary exit under an existing group key,
/// without rerunning DKG. One instance of this is built per recipient
/// operator: `encrypted_key_share` is that operator's own ciphertext, never
/// another operator's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResignInput {
    pub operators: OperatorSet,
    pub group_public_key: [u8; 48],
    pub validator_pubkey: [u8; 48],
    pub validator_index: u64,
    /// Fork under which the voluntary exit's signing domain is computed.
    pub target_fork_epoch: u64,
    /// The validator's current active epoch, looked up from the
    /// (out-of-scope) beacon-node client and stamped into the exit message
    /// itself, per the beacon-chain voluntary-exit convention.
    pub epoch: u64,
    /// This operator's own previously-issued key share ciphertext, taken
    /// verbatim from the keyshares file. Resign trusts the keyshares file
    /// rather than re-verifying `old_proofs`.
    pub encrypted_key_share: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(id: OperatorId) -> OperatorRecord {
        OperatorRecord {
            id,
            rsa_pub_der: vec![id as u8; 4],
            endpoint: format!("https://op{id}.example/"),
        }
    }

    #[test]
    fn rejects_unsupported_size() {
        assert!(OperatorSet::new(vec![op(1), op(2), op(3)]).is_err());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let ops: Vec<_> = (0..4).map(|_| op(1)).collect();
        assert!(OperatorSet::new(ops).is_err());
    }

    #[test]
    fn threshold_matches_byzantine_quorum_formula() {
        for (n, t) in [(4, 3), (7, 5), (10, 7), (13, 9)] {
            let ops: Vec<_> = (0..n as u64).map(op).collect();
            let set = OperatorSet::new(ops).unwrap();
            assert_eq!(set.threshold(), t);
        }
    }

    #[test]
    fn evaluation_points_are_one_indexed() {
        let ops: Vec<_> = (10..14).map(op).collect();
        let set = OperatorSet::new(ops).unwrap();
        assert_eq!(set.evaluation_point(10), Some(1));
        assert_eq!(set.evaluation_point(13), Some(4));
        assert_eq!(set.evaluation_point(99), None);
    }

    #[test]
    fn hash_is_stable_and_sensitive_to_membership() {
        let a = OperatorSet::new((0..4).map(op).collect()).unwrap();
        let b = OperatorSet::new((0..4).map(op).collect()).unwrap();
        assert_eq!(a.hash(), b.hash());

        let mut modified = (0..4).map(op).collect::<Vec<_>>();
        modified[0].endpoint.push_str("tampered");
        let c = OperatorSet::new(modified).unwrap();
        assert_ne!(a.hash(), c.hash());
    }
}
