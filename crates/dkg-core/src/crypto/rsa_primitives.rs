//! RSA-OAEP share encryption and RSA-PSS envelope signatures.
//!
//! Keys travel the wire and live in config as DER bytes (SubjectPublicKeyInfo
//! for public keys, PKCS#8 for private keys) and are parsed into live `rsa`
//! types only where needed.

use crate::{Error, Result};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::pss::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

/// An operator's own RSA keypair. `RsaPrivateKey` zeroizes its internal
/// limbs on drop; this wrapper exists so the private half never leaves the
/// ceremony engine except through [`sign_envelope`] and [`decrypt_share`].
#[derive(ZeroizeOnDrop)]
pub struct RsaKeyPair {
    #[zeroize(skip)]
    public_der: Vec<u8>,
    private: RsaPrivateKey,
}

impl RsaKeyPair {
    /// Load from a PKCS#8 DER-encoded private key, as produced by the
    /// (out-of-scope) key-file loader.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        let private =
            RsaPrivateKey::from_pkcs8_der(der).map_err(|e| Error::Rsa(e.to_string()))?;
        let public_der = public_key_to_der(&private.to_public_key())?;
        Ok(Self { private, public_der })
    }

    pub fn public_der(&self) -> &[u8] {
        &self.public_der
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.private.to_public_key()
    }
}

fn public_key_to_der(key: &RsaPublicKey) -> Result<Vec<u8>> {
    use rsa::pkcs8::EncodePublicKey;
    key.to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| Error::Rsa(e.to_string()))
}

/// Parse a SubjectPublicKeyInfo DER blob into a live RSA public key.
pub fn parse_public_key(der: &[u8]) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_der(der).map_err(|e| Error::Rsa(e.to_string()))
}

/// Encrypt a VSS share (or, for resign, a previously-issued key share) under
/// an operator's RSA public key with OAEP/SHA-256 padding.
pub fn encrypt_share(recipient_pub_der: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let pub_key = parse_public_key(recipient_pub_der)?;
    let mut rng = rand::rngs::OsRng;
    pub_key
        .encrypt(&mut rng, Oaep::new::<Sha256>(), plaintext)
        .map_err(|e| Error::Rsa(e.to_string()))
}

/// Decrypt a share previously produced by [`encrypt_share`] under this
/// operator's own key pair.
pub fn decrypt_share(keypair: &RsaKeyPair, ciphertext: &[u8]) -> Result<Vec<u8>> {
    keypair
        .private
        .decrypt(Oaep::new::<Sha256>(), ciphertext)
        .map_err(|e| Error::Rsa(e.to_string()))
}

/// Sign a transport envelope digest with RSA-PSS/SHA-256.
pub fn sign_envelope(keypair: &RsaKeyPair, digest: &[u8]) -> Result<Vec<u8>> {
    let signing_key = SigningKey::<Sha256>::new(keypair.private.clone());
    let mut rng = rand::rngs::OsRng;
    let signature = signing_key.sign_with_rng(&mut rng, digest);
    Ok(signature.to_bytes().to_vec())
}

/// Verify a transport envelope signature against the claimed signer's
/// public key.
pub fn verify_envelope(signer_pub_der: &[u8], digest: &[u8], signature: &[u8]) -> Result<()> {
    let pub_key = parse_public_key(signer_pub_der)?;
    let verifying_key = VerifyingKey::<Sha256>::new(pub_key);
    let signature = Signature::try_from(signature)
        .map_err(|e| Error::SignatureInvalid(e.to_string()))?;
    verifying_key
        .verify(digest, &signature)
        .map_err(|e| Error::SignatureInvalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_keypair() -> RsaKeyPair {
        let mut rng = rand::rngs::OsRng;
        let private = RsaPrivateKey::new(&mut rng, 2048).expect("keygen");
        let public_der = public_key_to_der(&private.to_public_key()).unwrap();
        RsaKeyPair { private, public_der }
    }

    #[test]
    fn encrypt_decrypt_round_trips() {
        let kp = fresh_keypair();
        let plaintext = b"threshold share bytes";
        let ciphertext = encrypt_share(kp.public_der(), plaintext).unwrap();
        let recovered = decrypt_share(&kp, &ciphertext).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn sign_verify_round_trips() {
        let kp = fresh_keypair();
        let digest = b"envelope digest bytes";
        let sig = sign_envelope(&kp, digest).unwrap();
        assert!(verify_envelope(kp.public_der(), digest, &sig).is_ok());
    }

    #[test]
    fn verify_rejects_tampered_digest() {
        let kp = fresh_keypair();
        let sig = sign_envelope(&kp, b"original").unwrap();
        assert!(verify_envelope(kp.public_der(), b"tampered", &sig).is_err());
    }
}
