//! Pure-data output shapes written out by the (out-of-scope) initiator CLI
//! file writers. This module owns only the data model, not file I/O.

use crate::types::OperatorId;
use serde::{Deserialize, Serialize};

/// Deposit data for the beacon deposit contract, derived from a completed
/// DKG ceremony.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositData {
    pub pubkey: String,
    pub withdrawal_credentials: String,
    pub amount: u64,
    pub signature: String,
    pub deposit_message_root: String,
    pub deposit_data_root: String,
    pub fork_version: String,
    pub network_name: String,
}

/// One operator's share entry inside the keyshares file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyShareEntry {
    pub id: OperatorId,
    pub public_key: String,
}

/// Per-validator payload of the keyshares file: which operators hold
/// shares, and this holder's own encrypted share and public share point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeySharesPayload {
    pub pubkey: String,
    /// Operator this entry's `encrypted_key` belongs to.
    pub id: OperatorId,
    pub operators: Vec<KeyShareEntry>,
    pub encrypted_key: String,
    pub share_public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeySharesFile {
    pub version: String,
    pub shares: Vec<KeySharesPayload>,
}

/// One operator's signed proof of participation for a validator, as
/// written to the proofs file and replayed into future reshare requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofEntry {
    pub dealer: OperatorId,
    pub validator_pubkey: String,
    pub encrypted_share: String,
    pub share_public_key: String,
    pub owner_address: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofsFile {
    pub validator_pubkey: String,
    pub proofs: Vec<ProofEntry>,
}

/// Output of a resign ceremony: the BeaconChain `SignedVoluntaryExit`,
/// written out as `validator-exit-<index>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedVoluntaryExit {
    pub exit: VoluntaryExit,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoluntaryExit {
    pub epoch: u64,
    pub validator_index: u64,
}
