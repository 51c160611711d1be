//! Error types for the ceremony engine

use thiserror::Error;

/// Result type alias used throughout the ceremony engine
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the wire codec, crypto primitives, instance state
/// machine, switch and orchestrator.
///
/// Variants map 1:1 onto the error kinds in the ceremony protocol; each
/// carries the HTTP status an operator route should return for it via
/// [`Error::http_status`].
#[derive(Debug, Error)]
pub enum Error {
    /// Envelope failed to decode
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Envelope signature did not verify against the bound operator set
    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    /// The message type does not match the route it arrived on
    #[error("wrong message type: expected {expected}, got {actual}")]
    WrongMessageType { expected: &'static str, actual: &'static str },

    /// Signer is not present in the bound operator set
    #[error("unknown operator: {0}")]
    UnknownOperator(u64),

    /// No instance exists for this ceremony identifier
    #[error("unknown ceremony: {0}")]
    UnknownCeremony(String),

    /// An instance already exists for this ceremony identifier
    #[error("duplicate ceremony: {0}")]
    DuplicateCeremony(String),

    /// Unexpected round/state transition, or two distinct messages received
    /// from the same peer for the same round
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Commitment check, share decryption, or signature verification failed
    #[error("crypto failure: {0}")]
    CryptoFail(String),

    /// Round deadline exceeded
    #[error("timeout waiting for: {0}")]
    Timeout(String),

    /// Fewer than N operators responded before the deadline
    #[error("quorum failure: needed {needed}, got {got}")]
    QuorumFail { needed: usize, got: usize },

    /// Serialization/deserialization failure not covered by the above
    #[error("serialization error: {0}")]
    Serialization(String),

    /// RSA operation (sign/verify/encrypt/decrypt) failed
    #[error("rsa error: {0}")]
    Rsa(String),

    /// Underlying transport (HTTP, etc.) failed
    #[error("transport error: {0}")]
    Transport(String),

    /// Invalid ceremony configuration (bad operator-set size, threshold, ...)
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Requested resource was not found in the blob store
    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    /// HTTP status an operator route should answer with for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::MalformedEnvelope(_) => 400,
            Error::SignatureInvalid(_) => 400,
            Error::WrongMessageType { .. } => 400,
            Error::UnknownOperator(_) => 400,
            Error::UnknownCeremony(_) => 400,
            Error::DuplicateCeremony(_) => 400,
            Error::ProtocolViolation(_) => 400,
            Error::CryptoFail(_) => 400,
            Error::Timeout(_) => 400,
            Error::QuorumFail { .. } => 400,
            Error::Serialization(_) => 400,
            Error::Rsa(_) => 400,
            Error::Transport(_) => 502,
            Error::InvalidConfig(_) => 400,
            Error::NotFound(_) => 404,
        }
    }

    /// Whether this error aborts the owning ceremony instance.
    /// MALFORMED_ENVELOPE / WRONG_MESSAGE_TYPE / UNKNOWN_CEREMONY leave
    /// instance state untouched; everything else aborts.
    pub fn aborts_instance(&self) -> bool {
        !matches!(
            self,
            Error::MalformedEnvelope(_) | Error::WrongMessageType { .. } | Error::UnknownCeremony(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
