//! Combines a QKD key with a PQC key into the final WireGuard pre-shared key,
//! and provides the CSPRNG fallback used to poison the tunnel on failure.

use base64ct::{Base64, Encoding};
use hkdf::Hkdf;
use rand::RngCore;
use sha3::Sha3_256;

use crate::error::DaemonError;

pub const PSK_LEN: usize = 32;

/// Derive the final 32-byte PSK from a base64-encoded QKD key and raw PQC key
/// bytes, via HKDF-SHA3-256 with an empty salt and empty info string.
pub fn derive(qkd_b64: &str, pqc_raw: &[u8]) -> Result<String, DaemonError> {
    let qkd_raw = Base64::decode_vec(qkd_b64)
        .map_err(|e| DaemonError::DecodeError(format!("qkd key is not valid base64: {e}")))?;

    let mut ikm = Vec::with_capacity(qkd_raw.len() + pqc_raw.len());
    ikm.extend_from_slice(&qkd_raw);
    ikm.extend_from_slice(pqc_raw);

    let hk = Hkdf::<Sha3_256>::new(None, &ikm);
    let mut okm = [0u8; PSK_LEN];
    hk.expand(&[], &mut okm)
        .map_err(|e| DaemonError::KdfError(e.to_string()))?;

    Ok(Base64::encode_string(&okm))
}

/// Generate a cryptographically random 32-byte PSK, base64-encoded. This is
/// the only source of the poisoning key installed when key agreement fails.
pub fn random_psk() -> String {
    let mut bytes = [0u8; PSK_LEN];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    Base64::encode_string(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn b64_of(byte: u8) -> String {
        Base64::encode_string(&[byte; PSK_LEN])
    }

    #[test]
    fn derive_is_deterministic() {
        let q = b64_of(0x11);
        let p = [0x22u8; PSK_LEN];
        let a = derive(&q, &p).unwrap();
        let b = derive(&q, &p).unwrap();
        assert_eq!(a, b);
        assert_eq!(Base64::decode_vec(&a).unwrap().len(), PSK_LEN);
    }

    #[test]
    fn derive_rejects_bad_base64() {
        let err = derive("not-base64!!", &[0x22u8; PSK_LEN]).unwrap_err();
        assert!(matches!(err, DaemonError::DecodeError(_)));
    }

    #[test]
    fn derive_matches_known_vector() {
        // ikm = 32x0x11 || 32x0x22, salt = empty, info = empty.
        let q = b64_of(0x11);
        let p = [0x22u8; PSK_LEN];
        let psk = derive(&q, &p).unwrap();

        let mut ikm = Vec::new();
        ikm.extend_from_slice(&[0x11u8; PSK_LEN]);
        ikm.extend_from_slice(&[0x22u8; PSK_LEN]);
        let hk = Hkdf::<Sha3_256>::new(None, &ikm);
        let mut expected = [0u8; PSK_LEN];
        hk.expand(&[], &mut expected).unwrap();

        assert_eq!(psk, Base64::encode_string(&expected));
    }

    #[test]
    fn random_psk_is_unique_and_well_formed() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let psk = random_psk();
            let decoded = Base64::decode_vec(&psk).unwrap();
            assert_eq!(decoded.len(), PSK_LEN);
            assert!(seen.insert(psk), "random_psk produced a duplicate");
        }
    }
}
