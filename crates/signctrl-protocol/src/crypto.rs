use std::path::Path;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::ProtocolError;

/// Generate a new Ed25519 keypair.
pub fn generate_keypair() -> SigningKey {
    let mut rng = rand::thread_rng();
    SigningKey::generate(&mut rng)
}

/// Validator address: upper-case hex of the first 20 bytes of SHA-256(pubkey).
pub fn derive_address(verifying_key: &VerifyingKey) -> String {
    let hash = Sha256::digest(verifying_key.as_bytes());
    hex::encode_upper(&hash[..20])
}

pub fn sign_message(signing_key: &SigningKey, payload: &[u8]) -> Signature {
    signing_key.sign(payload)
}

pub fn verify_signature(
    verifying_key: &VerifyingKey,
    payload: &[u8],
    signature: &Signature,
) -> Result<(), ProtocolError> {
    verifying_key
        .verify(payload, signature)
        .map_err(|e| ProtocolError::InvalidSignature(e.to_string()))
}

/// Parse a hex-encoded 64-byte signature.
pub fn signature_from_hex(s: &str) -> Result<Signature, ProtocolError> {
    let bytes = hex::decode(s).map_err(|e| ProtocolError::Crypto(format!("invalid hex: {e}")))?;
    let arr: [u8; 64] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| ProtocolError::Crypto(format!("signature is {} bytes, expected 64", bytes.len())))?;
    Ok(Signature::from_bytes(&arr))
}

/// Build a signing key from a 32-byte seed, wiping the input buffer.
pub fn keypair_from_seed(mut seed_bytes: Vec<u8>) -> Result<SigningKey, ProtocolError> {
    if seed_bytes.len() != 32 {
        let len = seed_bytes.len();
        seed_bytes.zeroize();
        return Err(ProtocolError::Crypto(format!(
            "key seed is {len} bytes, expected 32"
        )));
    }
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&seed_bytes);
    seed_bytes.zeroize();
    let key = SigningKey::from_bytes(&seed);
    seed.zeroize();
    Ok(key)
}

/// Load an Ed25519 keypair stored as a raw 32-byte seed.
/// Fails if the file does not exist.
pub fn load_keypair(path: &Path) -> Result<SigningKey, ProtocolError> {
    let seed_bytes = std::fs::read(path)
        .map_err(|e| ProtocolError::Crypto(format!("read key file {}: {e}", path.display())))?;
    keypair_from_seed(seed_bytes)
}

/// Load an Ed25519 keypair from a file, or create a new one if the file doesn't exist.
/// The file stores the raw 32-byte Ed25519 seed with mode 0600.
pub fn load_or_create_keypair(path: &Path) -> Result<SigningKey, ProtocolError> {
    if path.exists() {
        return load_keypair(path);
    }
    let key = generate_keypair();
    write_private_file(path, &key.to_bytes())?;
    tracing::info!(path = %path.display(), "Generated new key");
    Ok(key)
}

/// Write a file readable only by its owner, creating parent directories.
pub(crate) fn write_private_file(path: &Path, contents: &[u8]) -> Result<(), ProtocolError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ProtocolError::Crypto(format!("create dir: {e}")))?;
    }
    std::fs::write(path, contents)
        .map_err(|e| ProtocolError::Crypto(format!("write key file: {e}")))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| ProtocolError::Crypto(format!("set permissions: {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_is_20_bytes_upper_hex() {
        let key = generate_keypair();
        let addr = derive_address(&key.verifying_key());
        assert_eq!(addr.len(), 40);
        assert_eq!(addr, addr.to_uppercase());
    }

    #[test]
    fn test_sign_verify_wrong_message() {
        let key = generate_keypair();
        let sig = sign_message(&key, b"correct");
        assert!(verify_signature(&key.verifying_key(), b"correct", &sig).is_ok());
        assert!(verify_signature(&key.verifying_key(), b"wrong", &sig).is_err());
    }

    #[test]
    fn test_signature_hex_roundtrip() {
        let key = generate_keypair();
        let sig = sign_message(&key, b"x");
        let parsed = signature_from_hex(&hex::encode(sig.to_bytes())).unwrap();
        assert_eq!(sig, parsed);
        assert!(signature_from_hex("abcd").is_err());
    }

    #[test]
    fn test_short_seed_rejected() {
        assert!(keypair_from_seed(vec![1u8; 31]).is_err());
    }

    #[test]
    fn test_load_missing_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_keypair(&dir.path().join("conn.key")).is_err());
    }

    #[test]
    fn test_load_or_create_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("conn.key");
        let k1 = load_or_create_keypair(&path).unwrap();
        let k2 = load_or_create_keypair(&path).unwrap();
        assert_eq!(k1.verifying_key(), k2.verifying_key());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
