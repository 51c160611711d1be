//! Concrete message bodies carried inside a [`super::envelope::SignedTransport`].

use crate::types::{CeremonyInput, OperatorId, ReshareInput, ResignInput};
use serde::{Deserialize, Serialize};

/// One dealer's encrypted share for one recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerShare {
    pub recipient: OperatorId,
    /// RSA-OAEP ciphertext of the recipient's 32-byte scalar share.
    pub ciphertext: Vec<u8>,
}

/// Broadcast from one dealer during the Exchange round: Feldman commitments
/// to its polynomial plus one encrypted share per recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeMessage {
    pub dealer: OperatorId,
    pub commitments: Vec<[u8; 48]>,
    pub shares: Vec<PeerShare>,
}

/// Broadcast from one operator once it has verified every dealer's share
/// and combined them into its final share of the group secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputMessage {
    pub signer: OperatorId,
    /// Partial BLS signature over the deposit message under this operator's
    /// final combined share.
    pub partial_deposit_sig: [u8; 96],
    /// Partial BLS signature over the owner/nonce binding message, proving
    /// this operator's share is bound to this specific ceremony's owner and
    /// nonce (replay protection).
    pub partial_owner_nonce_sig: [u8; 96],
    /// This operator's final combined share, RSA-OAEP encrypted to itself,
    /// handed back to the initiator for safekeeping in the keyshares file.
    pub encrypted_final_share: Vec<u8>,
    pub public_share: [u8; 48],
    /// The group public key this operator derived locally by summing every
    /// dealer's constant-term commitment. The initiator cross-checks this
    /// is identical across a quorum of operators before trusting it.
    pub group_public_key: [u8; 48],
}

/// The initiator's final, aggregated ceremony result, broadcast back to
/// every operator for confirmation and archival.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMessage {
    pub operators: Vec<OperatorId>,
    pub deposit_signature: [u8; 96],
    pub group_public_key: [u8; 48],
    pub deposit_data_root: [u8; 32],
}

/// Liveness probe; `pong` must echo the same nonce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingMessage {
    pub nonce: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PongMessage {
    pub operator: OperatorId,
    pub nonce: u64,
}

/// An operator's signed proof of participation, included in the proofs
/// file and replayed into reshare requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedProof {
    pub dealer: OperatorId,
    pub validator: [u8; 48],
    pub encrypted_share: Vec<u8>,
    pub share_pub_key: [u8; 48],
    pub owner_address: [u8; 20],
    pub signature: Vec<u8>,
}

/// Request to re-sign a voluntary exit under an already-established group
/// key, carried in its own envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResignMessage {
    pub input: ResignInput,
}

/// An operator's reply to a [`ResignMessage`]: a partial BLS signature over
/// the voluntary-exit message under this operator's own decrypted share,
/// with no new DKG round involved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResignOutputMessage {
    pub signer: OperatorId,
    pub partial_exit_sig: [u8; 96],
    pub public_share: [u8; 48],
}

/// Structured error reported back over the wire instead of (or alongside)
/// an HTTP status code, so a caller driving many operators in parallel can
/// distinguish error kinds without parsing prose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub kind: String,
    pub detail: String,
}

/// The full set of message bodies that can appear inside a signed envelope.
/// Every route on the operator side checks the body's variant matches the
/// route it arrived on before acting on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "body")]
pub enum Message {
    Init(CeremonyInput),
    Reshare(ReshareInput),
    Resign(ResignMessage),
    Exchange(ExchangeMessage),
    /// The initiator's relayed bundle of every dealer's [`ExchangeMessage`],
    /// sent to each operator on the `/dkg` route once all dealers have
    /// replied to `Init`. Operators never talk to each other directly; the
    /// initiator is the only relay.
    ExchangeSet(Vec<ExchangeMessage>),
    Output(OutputMessage),
    ResignOutput(ResignOutputMessage),
    Result(ResultMessage),
    Ping(PingMessage),
    Pong(PongMessage),
    Error(ErrorMessage),
}

impl Message {
    /// Stable name used in logs and in [`crate::Error::WrongMessageType`].
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Init(_) => "init",
            Message::Reshare(_) => "reshare",
            Message::Resign(_) => "resign",
            Message::Exchange(_) => "exchange",
            Message::ExchangeSet(_) => "exchange_set",
            Message::Output(_) => "output",
            Message::ResignOutput(_) => "resign_output",
            Message::Result(_) => "result",
            Message::Ping(_) => "ping",
            Message::Pong(_) => "pong",
            Message::Error(_) => "error",
        }
    }

    /// The domain separation tag this message type signs under.
    pub fn domain_tag(&self) -> &'static [u8] {
        match self {
            Message::Init(_) => super::domain::INIT,
            Message::Reshare(_) => super::domain::RESHARE,
            Message::Resign(_) => super::domain::RESIGN,
            Message::Exchange(_) | Message::ExchangeSet(_) => super::domain::EXCHANGE,
            Message::Output(_) => super::domain::OUTPUT,
            Message::ResignOutput(_) => super::domain::RESIGN,
            Message::Result(_) => super::domain::RESULT,
            Message::Ping(_) | Message::Pong(_) => super::domain::PING,
            Message::Error(_) => super::domain::ERROR,
        }
    }
}
