//! Cryptographic primitives: RSA envelopes for transport and share
//! encryption, and the BLS12-381 / Pedersen-VSS machinery that drives the
//! ceremony itself.

pub mod bls;
pub mod ceremony_id;
pub mod rsa_primitives;

pub use bls::{lagrange_coefficients, Polynomial, ThresholdPublicKey};
pub use ceremony_id::generate_ceremony_id;
pub use rsa_primitives::{decrypt_share, encrypt_share, sign_envelope, verify_envelope, RsaKeyPair};
