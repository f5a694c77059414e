use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tiny_keccak::{Hasher, Keccak};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid recovery id {0}")]
    InvalidRecoveryId(u8),

    #[error("Invalid signature encoding")]
    InvalidSignature,

    #[error("Public key recovery failed")]
    RecoveryFailed,
}

/// Compute keccak256 hash of data.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut output);
    output
}

/// Keccak256 over several slices without concatenating them first.
pub fn keccak256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize(&mut output);
    output
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Bitcoin's double SHA256, in internal (little endian) byte order.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// Recover the ethereum address that produced `signature` (r ‖ s) over `hash`.
/// `v` may be given as 0/1 or 27/28.
pub fn recover_address(hash: &[u8; 32], signature: &[u8; 64], v: u8) -> Result<[u8; 20], CryptoError> {
    let id = match v {
        0 | 27 => 0,
        1 | 28 => 1,
        _ => return Err(CryptoError::InvalidRecoveryId(v)),
    };
    let recovery_id = RecoveryId::try_from(id).map_err(|_| CryptoError::InvalidRecoveryId(v))?;
    let sig = Signature::from_slice(signature).map_err(|_| CryptoError::InvalidSignature)?;

    let key = VerifyingKey::recover_from_prehash(hash, &sig, recovery_id)
        .map_err(|_| CryptoError::RecoveryFailed)?;

    // uncompressed point is 0x04 || x || y
    let point = key.to_encoded_point(false);
    Ok(public_key_to_address(&point.as_bytes()[1..]))
}

/// Address of an uncompressed public key given without its `0x04` tag.
pub fn public_key_to_address(public_key: &[u8]) -> [u8; 20] {
    let hash = keccak256(public_key);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    address
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use k256::ecdsa::SigningKey;

    #[test]
    fn test_keccak256_empty() {
        assert_eq!(
            keccak256(&[]),
            hex!("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470")
        );
    }

    #[test]
    fn test_keccak256_concat_matches_single() {
        assert_eq!(keccak256_concat(&[b"ab", b"c"]), keccak256(b"abc"));
    }

    #[test]
    fn test_sha256d_genesis_header() {
        let header = hex!(
            "01000000" "0000000000000000000000000000000000000000000000000000000000000000"
            "3ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a"
            "29ab5f49" "ffff001d" "1dac2b7c"
        );
        let mut hash = sha256d(&header);
        hash.reverse();
        assert_eq!(
            hash,
            hex!("000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f")
        );
    }

    #[test]
    fn test_recover_address_roundtrip() {
        let key = SigningKey::from_slice(&[0x11; 32]).unwrap();
        let point = key.verifying_key().to_encoded_point(false);
        let expected = public_key_to_address(&point.as_bytes()[1..]);

        let hash = keccak256(b"incubed");
        let (sig, recid) = key.sign_prehash_recoverable(&hash).unwrap();
        let mut rs = [0u8; 64];
        rs.copy_from_slice(&sig.to_bytes());

        assert_eq!(recover_address(&hash, &rs, recid.to_byte()).unwrap(), expected);
        assert_eq!(recover_address(&hash, &rs, recid.to_byte() + 27).unwrap(), expected);
        assert_eq!(
            recover_address(&hash, &rs, 5),
            Err(CryptoError::InvalidRecoveryId(5))
        );
    }
}
