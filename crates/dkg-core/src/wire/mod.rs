//! Canonical wire codec: message envelopes, domain-separated signing digests
//! and the concrete message bodies exchanged between operators and the
//! initiator.

pub mod envelope;
pub mod messages;

pub use envelope::SignedTransport;
pub use messages::{
    ErrorMessage, ExchangeMessage, Message, OutputMessage, PeerShare, PingMessage, PongMessage,
    ResignMessage, ResignOutputMessage, ResultMessage, SignedProof,
};

/// Domain separation tags mixed into every signed digest, one per message
/// type, so a signature over one message type can never be replayed as
/// another.
pub mod domain {
    pub const INIT: &[u8] = b"ssv-dkg/init/v1";
    pub const EXCHANGE: &[u8] = b"ssv-dkg/exchange/v1";
    pub const OUTPUT: &[u8] = b"ssv-dkg/output/v1";
    pub const RESHARE: &[u8] = b"ssv-dkg/reshare/v1";
    pub const RESIGN: &[u8] = b"ssv-dkg/resign/v1";
    pub const RESULT: &[u8] = b"ssv-dkg/result/v1";
    pub const PING: &[u8] = b"ssv-dkg/ping/v1";
    pub const ERROR: &[u8] = b"ssv-dkg/error/v1";
}
