//! Ceremony-wide configuration: round deadlines and fan-out concurrency.

use std::time::Duration;

/// Per-round deadlines. Expiry of the deadline for the current round
/// transitions the instance (operator side) or the ceremony (initiator side)
/// to ABORTED.
#[derive(Debug, Clone, Copy)]
pub struct CeremonyTimeouts {
    /// Deadline for rounds that do not involve heavy cryptography
    /// (Init/Exchange relay, Ping/Pong, Result).
    pub round: Duration,
    /// Deadline for rounds that involve polynomial sampling, commitment
    /// verification or partial BLS signing.
    pub crypto_round: Duration,
}

impl Default for CeremonyTimeouts {
    fn default() -> Self {
        Self {
            round: Duration::from_secs(10),
            crypto_round: Duration::from_secs(60),
        }
    }
}

/// Bound on the number of operators contacted concurrently by the
/// orchestrator's fan-out, and on the number of ceremonies a batch CLI
/// command runs concurrently.
#[derive(Debug, Clone, Copy)]
pub struct Concurrency(pub usize);

impl Default for Concurrency {
    fn default() -> Self {
        Self(10)
    }
}
