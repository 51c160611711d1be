//! BLS12-381 threshold primitives: Feldman/Pedersen-style polynomial
//! commitments, share evaluation, Lagrange reconstruction and partial
//! signature aggregation.
//!
//! Public keys live on G1 (48-byte compressed points), signatures and
//! partial signatures on G2 (96-byte compressed points) — the
//! "minimal-pubkey-size" BLS variant, matching the beacon-chain convention
//! deposit and voluntary-exit messages are signed under.

use crate::{Error, Result};
use bls12_381::hash_to_curve::{ExpandMsgXmd, HashToCurve};
use bls12_381::{pairing, G1Affine, G1Projective, G2Affine, G2Projective, Scalar};
use ff::Field;
use group::{Curve, Group};
use rand_core::OsRng;
use sha2::Sha256;

/// Domain separation tag for hashing deposit/voluntary-exit messages onto G2,
/// per the beacon-chain BLS signing convention this ceremony ultimately
/// serves.
const SIGNATURE_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

/// A dealer's secret polynomial `f(x) = a_0 + a_1 x + ... + a_{t-1} x^{t-1}`.
/// `a_0` is this dealer's contribution to the group secret (random for a
/// fresh DKG; the dealer's Lagrange-weighted old share for a reshare).
pub struct Polynomial {
    coefficients: Vec<Scalar>,
}

impl Drop for Polynomial {
    fn drop(&mut self) {
        for c in &mut self.coefficients {
            *c = Scalar::ZERO;
        }
    }
}

impl Polynomial {
    /// Sample a degree `threshold - 1` polynomial. `fixed_constant`, when
    /// set, pins `a_0` (used by reshare dealers to preserve the group key
    /// instead of contributing a fresh random secret).
    pub fn sample(threshold: usize, fixed_constant: Option<Scalar>) -> Self {
        let mut coefficients: Vec<Scalar> = (0..threshold)
            .map(|_| Scalar::random(&mut OsRng))
            .collect();
        if let Some(constant) = fixed_constant {
            coefficients[0] = constant;
        }
        Self { coefficients }
    }

    pub fn degree(&self) -> usize {
        self.coefficients.len() - 1
    }

    /// Evaluate `f(x)` at the integer evaluation point `x` (Horner's method).
    pub fn evaluate(&self, x: u64) -> Scalar {
        let x = Scalar::from(x);
        let mut acc = Scalar::ZERO;
        for coeff in self.coefficients.iter().rev() {
            acc = acc * x + coeff;
        }
        acc
    }

    /// Feldman commitments `[a_0]G1, [a_1]G1, ..., [a_{t-1}]G1`, broadcast
    /// alongside encrypted shares so recipients can verify them without
    /// trusting the dealer.
    pub fn commit(&self) -> Vec<G1Affine> {
        self.coefficients
            .iter()
            .map(|c| (G1Projective::generator() * c).to_affine())
            .collect()
    }

    pub fn constant_term(&self) -> Scalar {
        self.coefficients[0]
    }
}

/// Verify that `share = f(x)` is consistent with the dealer's published
/// commitments: `[share]G1 == sum_i x^i * commitments[i]`.
pub fn verify_share_commitment(share: Scalar, x: u64, commitments: &[G1Affine]) -> bool {
    let x = Scalar::from(x);
    let mut expected = G1Projective::identity();
    let mut power = Scalar::ONE;
    for commitment in commitments {
        expected += G1Projective::from(*commitment) * power;
        power *= x;
    }
    let actual = G1Projective::generator() * share;
    actual.to_affine() == expected.to_affine()
}

/// Lagrange coefficients `lambda_i = prod_{j != i} x_j / (x_j - x_i)` for
/// reconstructing `f(0)` from the points in `xs`, evaluated at the single
/// index `i` within `xs`.
pub fn lagrange_coefficients(xs: &[u64]) -> Vec<Scalar> {
    let points: Vec<Scalar> = xs.iter().map(|&x| Scalar::from(x)).collect();
    points
        .iter()
        .enumerate()
        .map(|(i, &xi)| {
            let mut num = Scalar::ONE;
            let mut den = Scalar::ONE;
            for (j, &xj) in points.iter().enumerate() {
                if i == j {
                    continue;
                }
                num *= xj;
                den *= xj - xi;
            }
            let den_inv = Option::<Scalar>::from(den.invert())
                .expect("distinct evaluation points");
            num * den_inv
        })
        .collect()
}

/// Reconstruct `f(0)` (the group secret, or any other evaluation-point-0
/// value) from a quorum of `(evaluation_point, share)` pairs via Lagrange
/// interpolation.
pub fn reconstruct_secret(points: &[(u64, Scalar)]) -> Scalar {
    let xs: Vec<u64> = points.iter().map(|(x, _)| *x).collect();
    let lambdas = lagrange_coefficients(&xs);
    points
        .iter()
        .zip(lambdas.iter())
        .fold(Scalar::ZERO, |acc, ((_, share), lambda)| {
            acc + share * lambda
        })
}

/// Hash an arbitrary message onto G2 under the deposit/voluntary-exit
/// signing domain.
fn hash_to_g2(message: &[u8]) -> G2Projective {
    <G2Projective as HashToCurve<ExpandMsgXmd<Sha256>>>::hash_to_curve(message, SIGNATURE_DST)
}

/// Produce this operator's partial signature over `message` using its share
/// of the group secret key.
pub fn partial_sign(share: Scalar, message: &[u8]) -> G2Affine {
    (hash_to_g2(message) * share).to_affine()
}

/// Combine a quorum of partial signatures into the final group signature,
/// weighting each by its Lagrange coefficient.
pub fn combine_partial_signatures(partials: &[(u64, G2Affine)]) -> G2Affine {
    let xs: Vec<u64> = partials.iter().map(|(x, _)| *x).collect();
    let lambdas = lagrange_coefficients(&xs);
    let mut acc = G2Projective::identity();
    for ((_, sig), lambda) in partials.iter().zip(lambdas.iter()) {
        acc += G2Projective::from(*sig) * lambda;
    }
    acc.to_affine()
}

/// The ceremony's resulting group public key, held on G1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdPublicKey(pub G1Affine);

impl ThresholdPublicKey {
    pub fn from_secret(secret: Scalar) -> Self {
        Self((G1Projective::generator() * secret).to_affine())
    }

    pub fn to_compressed(self) -> [u8; 48] {
        self.0.to_compressed()
    }

    pub fn from_compressed(bytes: &[u8; 48]) -> Result<Self> {
        Option::<G1Affine>::from(G1Affine::from_compressed(bytes))
            .map(Self)
            .ok_or_else(|| Error::CryptoFail("invalid compressed G1 point".into()))
    }

    /// Verify a combined group signature over `message` via the standard
    /// BLS pairing check: `e(sig, G2::generator) == e(H(message), pubkey)`.
    pub fn verify(&self, message: &[u8], signature: G2Affine) -> bool {
        let h = hash_to_g2(message).to_affine();
        pairing(&self.0, &h) == pairing(&G1Affine::generator(), &signature)
    }
}

/// Serialize a scalar to its canonical 32-byte little-endian form for
/// envelope/ciphertext payloads.
pub fn scalar_to_bytes(s: &Scalar) -> [u8; 32] {
    s.to_bytes()
}

pub fn scalar_from_bytes(bytes: &[u8; 32]) -> Result<Scalar> {
    Option::<Scalar>::from(Scalar::from_bytes(bytes))
        .ok_or_else(|| Error::CryptoFail("invalid scalar encoding".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_commitment_round_trips() {
        let poly = Polynomial::sample(3, None);
        let commitments = poly.commit();
        for x in 1..=5u64 {
            let share = poly.evaluate(x);
            assert!(verify_share_commitment(share, x, &commitments));
        }
    }

    #[test]
    fn share_commitment_rejects_tampered_share() {
        let poly = Polynomial::sample(3, None);
        let commitments = poly.commit();
        let tampered = poly.evaluate(1) + Scalar::ONE;
        assert!(!verify_share_commitment(tampered, 1, &commitments));
    }

    #[test]
    fn reconstructs_constant_term_from_quorum() {
        let poly = Polynomial::sample(3, None);
        let secret = poly.constant_term();
        let points: Vec<(u64, Scalar)> = (1..=3u64).map(|x| (x, poly.evaluate(x))).collect();
        assert_eq!(reconstruct_secret(&points), secret);
    }

    #[test]
    fn reshare_preserves_fixed_constant() {
        let pinned = Scalar::random(&mut OsRng);
        let poly = Polynomial::sample(3, Some(pinned));
        assert_eq!(poly.constant_term(), pinned);
    }

    #[test]
    fn partial_signatures_combine_to_group_signature() {
        let poly = Polynomial::sample(3, None);
        let secret = poly.constant_term();
        let pubkey = ThresholdPublicKey::from_secret(secret);
        let message = b"voluntary exit payload";

        let partials: Vec<(u64, G2Affine)> = (1..=3u64)
            .map(|x| (x, partial_sign(poly.evaluate(x), message)))
            .collect();
        let combined = combine_partial_signatures(&partials);

        let direct = (hash_to_g2(message) * secret).to_affine();
        assert_eq!(combined, direct);
        assert!(pubkey.verify(message, combined));
    }
}
