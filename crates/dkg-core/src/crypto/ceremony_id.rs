//! Fresh [`CeremonyId`](crate::types::CeremonyId) generation.

use crate::types::CeremonyId;
use rand::RngCore;

/// Mint a new ceremony id: current unix-millis timestamp concatenated with
/// 16 bytes of CSPRNG output. The timestamp prefix keeps ids roughly
/// time-ordered for log correlation; the random suffix makes collisions
/// between concurrently started ceremonies practically impossible.
pub fn generate_ceremony_id() -> CeremonyId {
    let unix_millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let mut random = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut random);
    CeremonyId::generate(unix_millis, random)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_distinct_ids() {
        let a = generate_ceremony_id();
        let b = generate_ceremony_id();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }
}
