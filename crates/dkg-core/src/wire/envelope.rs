//! Signed transport envelope: every message that crosses the wire is wrapped
//! in one of these and RSA-PSS signed by its sender.

use crate::crypto::rsa_primitives::{sign_envelope as rsa_sign, verify_envelope as rsa_verify};
use crate::crypto::RsaKeyPair;
use crate::types::{CeremonyId, OperatorId};
use crate::wire::Message;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A message plus the metadata needed to verify and route it.
///
/// `signer == 0` denotes the initiator, which has no slot in any
/// [`crate::types::OperatorSet`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTransport {
    pub ceremony_id: CeremonyId,
    pub signer: OperatorId,
    pub message: Message,
    pub signature: Vec<u8>,
}

pub const INITIATOR_ID: OperatorId = 0;

impl SignedTransport {
    /// Build and sign a fresh envelope.
    pub fn sign(
        ceremony_id: CeremonyId,
        signer: OperatorId,
        message: Message,
        keypair: &RsaKeyPair,
    ) -> Result<Self> {
        let digest = signing_digest(&ceremony_id, signer, &message)?;
        let signature = rsa_sign(keypair, &digest)?;
        Ok(Self {
            ceremony_id,
            signer,
            message,
            signature,
        })
    }

    /// Verify this envelope's signature against the claimed signer's public
    /// key (looked up by the caller in the bound [`crate::types::OperatorSet`]
    /// or, for `signer == 0`, the initiator's well-known key).
    pub fn verify(&self, signer_pub_der: &[u8]) -> Result<()> {
        let digest = signing_digest(&self.ceremony_id, self.signer, &self.message)?;
        rsa_verify(signer_pub_der, &digest, &self.signature)
    }

    /// Assert the wrapped message is the expected variant, returning the
    /// route-appropriate error otherwise.
    pub fn expect_kind(&self, expected: &'static str) -> Result<()> {
        let actual = self.message.kind();
        if actual == expected {
            Ok(())
        } else {
            Err(Error::WrongMessageType { expected, actual })
        }
    }
}

/// `SHA-256(domain_tag || ceremony_id || signer_id_be || canonical(message))`.
///
/// Binding the ceremony id and signer into the digest means a signature over
/// one envelope can never be replayed into a different ceremony or under a
/// different claimed signer.
fn signing_digest(ceremony_id: &CeremonyId, signer: OperatorId, message: &Message) -> Result<Vec<u8>> {
    let encoded = serde_json::to_vec(message)?;
    let mut hasher = Sha256::new();
    hasher.update(message.domain_tag());
    hasher.update(ceremony_id.as_bytes());
    hasher.update(signer.to_be_bytes());
    hasher.update(&encoded);
    Ok(hasher.finalize().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::PingMessage;
    use rsa::pkcs8::EncodePrivateKey;
    use rsa::RsaPrivateKey;

    fn keypair() -> RsaKeyPair {
        let mut rng = rand::rngs::OsRng;
        let private = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let der = private.to_pkcs8_der().unwrap();
        RsaKeyPair::from_pkcs8_der(der.as_bytes()).unwrap()
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let kp = keypair();
        let ceremony_id = CeremonyId::generate(1, [7u8; 16]);
        let envelope = SignedTransport::sign(
            ceremony_id,
            INITIATOR_ID,
            Message::Ping(PingMessage { nonce: 42 }),
            &kp,
        )
        .unwrap();
        assert!(envelope.verify(kp.public_der()).is_ok());
        assert!(envelope.expect_kind("ping").is_ok());
        assert!(envelope.expect_kind("pong").is_err());
    }

    #[test]
    fn verify_rejects_tampered_ceremony_id() {
        let kp = keypair();
        let ceremony_id = CeremonyId::generate(1, [7u8; 16]);
        let mut envelope = SignedTransport::sign(
            ceremony_id,
            INITIATOR_ID,
            Message::Ping(PingMessage { nonce: 42 }),
            &kp,
        )
        .unwrap();
        envelope.ceremony_id = CeremonyId::generate(2, [9u8; 16]);
        assert!(envelope.verify(kp.public_der()).is_err());
    }
}
