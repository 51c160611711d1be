//! Per-ceremony operator-side state machine.
//!
//! One [`Instance`] is created per ceremony id on an operator's [`crate::switch::Switch`]
//! and lives for exactly one DKG or reshare run. Operators never talk to each
//! other directly: the initiator relays every round, so an instance only
//! ever reacts to messages arriving from the initiator and returns the next
//! message to send back in the same HTTP response.

use crate::config::CeremonyTimeouts;
use crate::crypto::bls::{
    lagrange_coefficients, partial_sign, scalar_from_bytes, scalar_to_bytes,
    verify_share_commitment, Polynomial, ThresholdPublicKey,
};
use crate::crypto::rsa_primitives::{decrypt_share, encrypt_share};
use crate::crypto::RsaKeyPair;
use crate::directory::OperatorDirectory;
use crate::types::{CeremonyInput, OperatorId, OperatorSet, ReshareInput};
use crate::wire::{ExchangeMessage, Message, OutputMessage, PeerShare, ResultMessage};
use crate::{Error, Result};
use bls12_381::{G1Affine, Scalar};
use ff::Field;
use group::{Curve, Group};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use zeroize::Zeroize;

/// Ceremony instance lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    Created,
    AwaitingExchange,
    AwaitingShares,
    Verified,
    Signed,
    Terminated,
    Aborted(String),
}

/// Whether this instance is growing a brand new group secret or
/// redistributing an existing one under Lagrange-weighted dealers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Dkg,
    Reshare,
}

pub struct Instance {
    ceremony_id: crate::types::CeremonyId,
    self_id: OperatorId,
    kind: Kind,
    dealer_ids: Vec<OperatorId>,
    recipient_ids: Vec<OperatorId>,
    threshold: usize,
    directory: OperatorDirectory,
    keypair: Arc<RsaKeyPair>,
    state: State,
    own_polynomial: Option<Polynomial>,
    final_share: Option<Scalar>,
    group_public_key: Option<ThresholdPublicKey>,
    expected_old_group_key: Option<ThresholdPublicKey>,
    deposit_message: Vec<u8>,
    owner_nonce_message: Vec<u8>,
    /// Owner address this ceremony's deposit is bound to; `[0u8; 20]` for a
    /// reshare, which carries no owner address of its own.
    owner_address: [u8; 20],
    /// This operator's own final share, RSA-OAEP-encrypted to itself, and
    /// its public share point — cached from [`Self::handle_exchange_set`]
    /// so [`Self::handle_result`] can hand them back to the switch for
    /// persistence without re-deriving them.
    persisted_encrypted_share: Option<Vec<u8>>,
    persisted_public_share: Option<[u8; 48]>,
    deadline: Instant,
    timeouts: CeremonyTimeouts,
}

impl Drop for Instance {
    fn drop(&mut self) {
        if let Some(share) = self.final_share.as_mut() {
            *share = Scalar::ZERO;
        }
    }
}

impl Instance {
    /// Start a fresh-DKG instance. Every member of `operators` is both a
    /// dealer and a recipient.
    pub fn new_dkg(
        ceremony_id: crate::types::CeremonyId,
        self_id: OperatorId,
        operators: &OperatorSet,
        directory: OperatorDirectory,
        keypair: Arc<RsaKeyPair>,
        deposit_message: Vec<u8>,
        owner_nonce_message: Vec<u8>,
        owner_address: [u8; 20],
        timeouts: CeremonyTimeouts,
    ) -> Self {
        let ids = operators.ids();
        Self {
            ceremony_id,
            self_id,
            kind: Kind::Dkg,
            dealer_ids: ids.clone(),
            recipient_ids: ids,
            threshold: operators.threshold(),
            directory,
            keypair,
            state: State::Created,
            own_polynomial: None,
            final_share: None,
            group_public_key: None,
            expected_old_group_key: None,
            deposit_message,
            owner_nonce_message,
            owner_address,
            persisted_encrypted_share: None,
            persisted_public_share: None,
            deadline: Instant::now() + timeouts.round,
            timeouts,
        }
    }

    /// Start a reshare instance: `old_operators` deal Lagrange-weighted
    /// shares of the existing secret, `new_operators` receive them.
    pub fn new_reshare(
        ceremony_id: crate::types::CeremonyId,
        self_id: OperatorId,
        old_operators: &OperatorSet,
        new_operators: &OperatorSet,
        old_group_public_key: ThresholdPublicKey,
        directory: OperatorDirectory,
        keypair: Arc<RsaKeyPair>,
        deposit_message: Vec<u8>,
        owner_nonce_message: Vec<u8>,
        timeouts: CeremonyTimeouts,
    ) -> Self {
        Self {
            ceremony_id,
            self_id,
            kind: Kind::Reshare,
            dealer_ids: old_operators.ids(),
            recipient_ids: new_operators.ids(),
            threshold: new_operators.threshold(),
            directory,
            keypair,
            state: State::Created,
            own_polynomial: None,
            final_share: None,
            group_public_key: None,
            expected_old_group_key: Some(old_group_public_key),
            deposit_message,
            owner_nonce_message,
            owner_address: [0u8; 20],
            persisted_encrypted_share: None,
            persisted_public_share: None,
            deadline: Instant::now() + timeouts.round,
            timeouts,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, State::Terminated | State::Aborted(_))
    }

    fn abort(&mut self, reason: impl Into<String>) -> Error {
        let reason = reason.into();
        warn!(ceremony = %self.ceremony_id, reason = %reason, "aborting instance");
        self.state = State::Aborted(reason.clone());
        if let Some(share) = self.final_share.as_mut() {
            share.zeroize();
        }
        Error::CryptoFail(reason)
    }

    fn check_deadline(&mut self) -> Result<()> {
        if Instant::now() > self.deadline {
            let err = self.abort("round deadline exceeded");
            return Err(err);
        }
        Ok(())
    }

    /// Handle the `Init` (fresh DKG) round: sample this operator's own
    /// polynomial (if it is a dealer), commit to it, encrypt one share per
    /// recipient, and reply with this operator's own [`ExchangeMessage`].
    #[instrument(skip(self, _input), fields(ceremony = %self.ceremony_id))]
    pub fn handle_init(&mut self, _input: &CeremonyInput) -> Result<ExchangeMessage> {
        if self.state != State::Created {
            return Err(self.abort("init received outside CREATED state"));
        }
        self.check_deadline()?;
        let exchange = self.deal_own_polynomial(None)?;
        self.state = State::AwaitingExchange;
        self.deadline = Instant::now() + self.timeouts.crypto_round;
        info!("dealt own polynomial, awaiting exchange set");
        Ok(exchange)
    }

    /// Handle the `Reshare` round. Only dealers (old operators) sample and
    /// deal a polynomial; pure recipients (brand new operators) still reply
    /// so the initiator can keep a uniform fan-out, but their
    /// [`ExchangeMessage`] carries no commitments or shares.
    #[instrument(skip(self, input), fields(ceremony = %self.ceremony_id))]
    pub fn handle_reshare_init(&mut self, input: &ReshareInput) -> Result<ExchangeMessage> {
        if self.state != State::Created {
            return Err(self.abort("reshare init received outside CREATED state"));
        }
        self.check_deadline()?;

        let is_dealer = self.dealer_ids.contains(&self.self_id);
        let exchange = if is_dealer {
            let ciphertext = input
                .old_proofs
                .iter()
                .find(|p| p.dealer == self.self_id)
                .map(|p| p.encrypted_share.as_slice())
                .ok_or_else(|| self.abort("missing own old share ciphertext in old_proofs"))?;
            let old_share_bytes = decrypt_share(&self.keypair, ciphertext)
                .map_err(|e| self.abort(format!("old share decryption failed: {e}")))?;
            let old_share_bytes: [u8; 32] = old_share_bytes
                .try_into()
                .map_err(|_| self.abort("old share has wrong length"))?;
            let old_share =
                scalar_from_bytes(&old_share_bytes).map_err(|e| self.abort(e.to_string()))?;

            let old_xs = input.old_operators.ids();
            let my_index = old_xs
                .iter()
                .position(|id| *id == self.self_id)
                .ok_or_else(|| self.abort("self not present in old operator set"))?;
            let lambda = lagrange_coefficients(
                &old_xs
                    .iter()
                    .enumerate()
                    .map(|(i, _)| i as u64 + 1)
                    .collect::<Vec<_>>(),
            )[my_index];
            let fixed_constant = old_share * lambda;
            self.deal_own_polynomial(Some(fixed_constant))?
        } else {
            ExchangeMessage {
                dealer: self.self_id,
                commitments: Vec::new(),
                shares: Vec::new(),
            }
        };

        self.state = State::AwaitingExchange;
        self.deadline = Instant::now() + self.timeouts.crypto_round;
        info!(is_dealer, "processed reshare init, awaiting exchange set");
        Ok(exchange)
    }

    fn deal_own_polynomial(&mut self, fixed_constant: Option<Scalar>) -> Result<ExchangeMessage> {
        let poly = Polynomial::sample(self.threshold, fixed_constant);
        let commitments: Vec<[u8; 48]> = poly.commit().iter().map(G1Affine::to_compressed).collect();

        let mut shares = Vec::with_capacity(self.recipient_ids.len());
        for &recipient in &self.recipient_ids {
            let record = self.directory.require(recipient)?;
            let x = recipient_evaluation_point(&self.recipient_ids, recipient)?;
            let share = poly.evaluate(x);
            let ciphertext = encrypt_share(&record.rsa_pub_der, &scalar_to_bytes(&share))?;
            shares.push(PeerShare {
                recipient,
                ciphertext,
            });
        }

        self.own_polynomial = Some(poly);
        Ok(ExchangeMessage {
            dealer: self.self_id,
            commitments,
            shares,
        })
    }

    /// Handle the relayed `ExchangeSet`: verify every dealer's commitment
    /// to the share addressed to this operator, sum them into this
    /// operator's final share, derive the (possibly reshared) group public
    /// key, and produce partial signatures over the deposit and
    /// owner/nonce-binding messages.
    #[instrument(skip(self, bundle), fields(ceremony = %self.ceremony_id))]
    pub fn handle_exchange_set(&mut self, bundle: &[ExchangeMessage]) -> Result<OutputMessage> {
        if self.state != State::AwaitingExchange {
            return Err(self.abort("exchange set received outside AWAITING_EXCHANGE state"));
        }
        self.check_deadline()?;

        if !self.recipient_ids.contains(&self.self_id) {
            return Err(self.abort("this operator is not a recipient in this ceremony"));
        }
        let my_x = recipient_evaluation_point(&self.recipient_ids, self.self_id)?;

        let mut final_share = Scalar::ZERO;
        let mut group_point = bls12_381::G1Projective::identity_checked();
        for dealer_id in &self.dealer_ids {
            let entry = bundle
                .iter()
                .find(|e| e.dealer == *dealer_id)
                .ok_or_else(|| self.abort(format!("missing exchange entry from dealer {dealer_id}")))?;
            if entry.commitments.is_empty() {
                return Err(self.abort(format!("dealer {dealer_id} sent no commitments")));
            }
            let peer_share = entry
                .shares
                .iter()
                .find(|s| s.recipient == self.self_id)
                .ok_or_else(|| self.abort(format!("dealer {dealer_id} sent no share for us")))?;

            let plaintext = decrypt_share(&self.keypair, &peer_share.ciphertext)
                .map_err(|e| self.abort(format!("share decryption failed: {e}")))?;
            let bytes: [u8; 32] = plaintext
                .try_into()
                .map_err(|_| self.abort("decrypted share has wrong length"))?;
            let share = scalar_from_bytes(&bytes).map_err(|e| self.abort(e.to_string()))?;

            let commitments: Vec<G1Affine> = entry
                .commitments
                .iter()
                .map(G1Affine::from_compressed_checked)
                .collect::<Result<_>>()?;
            if !verify_share_commitment(share, my_x, &commitments) {
                return Err(self.abort(format!("share from dealer {dealer_id} failed commitment check")));
            }

            final_share += share;
            group_point += bls12_381::G1Projective::from(commitments[0]);
        }

        let computed_group_key = ThresholdPublicKey(group_point.to_affine_checked());
        if let Some(expected) = self.expected_old_group_key {
            if computed_group_key != expected {
                return Err(self.abort("reshared group public key does not match prior group key"));
            }
        }

        let partial_deposit_sig = partial_sign(final_share, &self.deposit_message);
        let partial_owner_nonce_sig = partial_sign(final_share, &self.owner_nonce_message);
        let encrypted_final_share = encrypt_share(
            &self.keypair.public_der().to_vec(),
            &scalar_to_bytes(&final_share),
        )?;

        let public_share = (bls12_381::G1Projective::generator() * final_share)
            .to_affine_checked()
            .to_compressed();

        self.final_share = Some(final_share);
        self.group_public_key = Some(computed_group_key);
        self.persisted_encrypted_share = Some(encrypted_final_share.clone());
        self.persisted_public_share = Some(public_share);
        self.state = State::AwaitingShares;
        self.deadline = Instant::now() + self.timeouts.round;
        info!("combined final share, produced output");

        Ok(OutputMessage {
            signer: self.self_id,
            partial_deposit_sig: partial_deposit_sig.to_compressed(),
            partial_owner_nonce_sig: partial_owner_nonce_sig.to_compressed(),
            encrypted_final_share,
            public_share,
            group_public_key: computed_group_key.to_compressed(),
        })
    }

    /// Handle the final `Result` broadcast: verify the aggregated deposit
    /// signature against the group public key we derived ourselves, then
    /// settle into TERMINATED (or ABORTED on mismatch). Returns the record
    /// the owning [`crate::switch::Switch`] should persist to the blob
    /// store.
    #[instrument(skip(self, result), fields(ceremony = %self.ceremony_id))]
    pub fn handle_result(&mut self, result: &ResultMessage) -> Result<TerminationRecord> {
        if self.state != State::AwaitingShares {
            return Err(self.abort("result received outside AWAITING_SHARES state"));
        }
        self.check_deadline()?;

        let group_key = self
            .group_public_key
            .ok_or_else(|| self.abort("no group public key derived locally"))?;
        if group_key.to_compressed() != result.group_public_key {
            return Err(self.abort("result group public key does not match locally derived key"));
        }
        let sig = bls12_381::G2Affine::from_compressed(&result.deposit_signature);
        let sig = Option::<bls12_381::G2Affine>::from(sig)
            .ok_or_else(|| self.abort("malformed aggregated deposit signature"))?;
        if !group_key.verify(&self.deposit_message, sig) {
            return Err(self.abort("aggregated deposit signature failed verification"));
        }

        let record = TerminationRecord {
            encrypted_final_share: self
                .persisted_encrypted_share
                .clone()
                .ok_or_else(|| self.abort("no encrypted final share cached"))?,
            public_share: self
                .persisted_public_share
                .ok_or_else(|| self.abort("no public share cached"))?,
            group_public_key: group_key.to_compressed(),
            deposit_data_root: result.deposit_data_root,
            owner_address: self.owner_address,
        };

        self.state = State::Verified;
        self.state = State::Signed;
        self.state = State::Terminated;
        info!("ceremony result verified and terminated");
        Ok(record)
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn self_id(&self) -> OperatorId {
        self.self_id
    }
}

/// Everything a terminated instance hands back to its [`crate::switch::Switch`]
/// for persistence to the proofs and keyshares files.
#[derive(Debug, Clone)]
pub struct TerminationRecord {
    pub encrypted_final_share: Vec<u8>,
    pub public_share: [u8; 48],
    pub group_public_key: [u8; 48],
    pub deposit_data_root: [u8; 32],
    pub owner_address: [u8; 20],
}

fn recipient_evaluation_point(recipients: &[OperatorId], id: OperatorId) -> Result<u64> {
    recipients
        .iter()
        .position(|r| *r == id)
        .map(|idx| idx as u64 + 1)
        .ok_or(Error::UnknownOperator(id))
}

/// Small helpers bridging `bls12_381`'s `subtle::CtOption`-returning APIs to
/// this crate's [`Result`].
trait G1AffineExt {
    fn from_compressed_checked(bytes: &[u8; 48]) -> Result<G1Affine>;
}

impl G1AffineExt for G1Affine {
    fn from_compressed_checked(bytes: &[u8; 48]) -> Result<G1Affine> {
        Option::<G1Affine>::from(G1Affine::from_compressed(bytes))
            .ok_or_else(|| Error::CryptoFail("invalid compressed G1 point".into()))
    }
}

trait G1ProjectiveExt {
    fn identity_checked() -> bls12_381::G1Projective;
    fn to_affine_checked(&self) -> G1Affine;
}

impl G1ProjectiveExt for bls12_381::G1Projective {
    fn identity_checked() -> bls12_381::G1Projective {
        bls12_381::G1Projective::identity()
    }

    fn to_affine_checked(&self) -> G1Affine {
        self.to_affine()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CeremonyId, OperatorRecord};
    use rsa::pkcs8::EncodePrivateKey;
    use rsa::RsaPrivateKey;
    use std::collections::HashMap;

    fn keypair() -> RsaKeyPair {
        let mut rng = rand::rngs::OsRng;
        let private = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let der = private.to_pkcs8_der().unwrap();
        RsaKeyPair::from_pkcs8_der(der.as_bytes()).unwrap()
    }

    #[test]
    fn dkg_happy_path_four_operators() {
        let ids: Vec<OperatorId> = vec![1, 2, 3, 4];
        let keypairs: HashMap<OperatorId, Arc<RsaKeyPair>> =
            ids.iter().map(|id| (*id, Arc::new(keypair()))).collect();
        let records: Vec<OperatorRecord> = ids
            .iter()
            .map(|id| OperatorRecord {
                id: *id,
                rsa_pub_der: keypairs[id].public_der().to_vec(),
                endpoint: format!("https://op{id}.example/"),
            })
            .collect();
        let operators = OperatorSet::new(records).unwrap();
        let directory = OperatorDirectory::new(operators.operators().to_vec());

        let ceremony_id = CeremonyId::generate(1, [1u8; 16]);
        let deposit_message = b"deposit root".to_vec();
        let owner_nonce_message = b"owner+nonce".to_vec();

        let mut instances: HashMap<OperatorId, Instance> = ids
            .iter()
            .map(|id| {
                (
                    *id,
                    Instance::new_dkg(
                        ceremony_id,
                        *id,
                        &operators,
                        directory.clone(),
                        keypairs[id].clone(),
                        deposit_message.clone(),
                        owner_nonce_message.clone(),
                        [0u8; 20],
                        CeremonyTimeouts::default(),
                    ),
                )
            })
            .collect();

        let dummy_input = CeremonyInput {
            owner_address: [0u8; 20],
            withdrawal_credentials: [0u8; 32],
            fork_version: [0u8; 4],
            nonce: 0,
            operators: operators.clone(),
        };

        let mut exchanges = Vec::new();
        for id in &ids {
            let ex = instances.get_mut(id).unwrap().handle_init(&dummy_input).unwrap();
            exchanges.push(ex);
        }

        let mut outputs = Vec::new();
        for id in &ids {
            let out = instances
                .get_mut(id)
                .unwrap()
                .handle_exchange_set(&exchanges)
                .unwrap();
            outputs.push(out);
        }

        assert_eq!(outputs.len(), 4);
        let first_key = instances[&ids[0]].group_public_key.unwrap();
        for id in &ids {
            assert_eq!(instances[id].group_public_key.unwrap(), first_key);
            assert_eq!(instances[id].state, State::AwaitingShares);
        }
    }
}
