//! Contract for the beacon-node REST client a resign ceremony consults to
//! learn a validator's current active epoch. The concrete REST client is an
//! external collaborator out of this crate's scope; only the trait is
//! core-owned.

use async_trait::async_trait;
use std::collections::HashMap;

#[async_trait]
pub trait BeaconNodeClient: Send + Sync {
    /// Current epoch the chain has finalized/is processing for this
    /// validator, used to decide whether a resign's `target_fork_epoch`
    /// is still in the future.
    async fn active_epoch(&self, validator_pubkey: &[u8; 48]) -> crate::Result<u64>;
}

/// Canned beacon-node double for tests: returns a fixed epoch per
/// validator, or a default for anything unregistered.
pub struct StaticBeaconNodeClient {
    epochs: HashMap<[u8; 48], u64>,
    default_epoch: u64,
}

impl StaticBeaconNodeClient {
    pub fn new(default_epoch: u64) -> Self {
        Self {
            epochs: HashMap::new(),
            default_epoch,
        }
    }

    pub fn with_epoch(mut self, validator_pubkey: [u8; 48], epoch: u64) -> Self {
        self.epochs.insert(validator_pubkey, epoch);
        self
    }
}

#[async_trait]
impl BeaconNodeClient for StaticBeaconNodeClient {
    async fn active_epoch(&self, validator_pubkey: &[u8; 48]) -> crate::Result<u64> {
        Ok(self
            .epochs
            .get(validator_pubkey)
            .copied()
            .unwrap_or(self.default_epoch))
    }
}
