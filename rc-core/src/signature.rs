//! Request signing and verification.
//!
//! Every connection attempt carries a signature header, verified by the
//! server against a directory of authorized public keys before the
//! connection is upgraded. The header name is fixed so both endpoints
//! agree on it without negotiation.
//!
//! Header shape: `base64(nonce) "." base64(timestamp) "." base64(signature)`,
//! where the signed message is `nonce || timestamp` (big-endian).

use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::{
    Signature, Signer, SigningKey, Verifier, VerifyingKey, pkcs8::DecodePrivateKey,
    pkcs8::DecodePublicKey,
};
use rand::RngCore;

use crate::error::RcError;

/// The HTTP header carrying the signature, agreed on by both endpoints.
pub const SIGNATURE_HEADER_NAME: &str = "Authorization";

const NONCE_LEN: usize = 16;

/// Build the signature header for the client identified by `(key_dir, key_name)`.
pub fn create_sig(key_name: &str, key_dir: &Path) -> Result<String, RcError> {
    let key_path = key_dir.join(format!("{key_name}.key"));
    let pem = fs::read_to_string(&key_path)
        .map_err(|e| RcError::SignatureInvalid(format!("reading {}: {e}", key_path.display())))?;
    let signing_key = SigningKey::from_pkcs8_pem(&pem)
        .map_err(|e| RcError::SignatureInvalid(format!("parsing private key: {e}")))?;

    let mut nonce = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce);

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| RcError::SignatureInvalid(e.to_string()))?
        .as_secs();
    let timestamp_bytes = timestamp.to_be_bytes();

    let mut signed = Vec::with_capacity(NONCE_LEN + timestamp_bytes.len());
    signed.extend_from_slice(&nonce);
    signed.extend_from_slice(&timestamp_bytes);

    let signature = signing_key.sign(&signed);

    Ok(format!(
        "{}.{}.{}",
        BASE64.encode(nonce),
        BASE64.encode(timestamp_bytes),
        BASE64.encode(signature.to_bytes())
    ))
}

/// Verify a signature header against every public key in `cert_dir`.
///
/// Accepts if any key in the directory verifies the signature — the
/// server does not know in advance which client is dialing in.
pub fn check_sig(header: &str, cert_dir: &Path) -> Result<bool, RcError> {
    if header.is_empty() {
        return Ok(false);
    }

    let mut parts = header.splitn(3, '.');
    let (Some(nonce_b64), Some(ts_b64), Some(sig_b64)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(RcError::SignatureInvalid("malformed header".to_string()));
    };

    let nonce = BASE64
        .decode(nonce_b64)
        .map_err(|e| RcError::SignatureInvalid(format!("bad nonce: {e}")))?;
    let timestamp_bytes = BASE64
        .decode(ts_b64)
        .map_err(|e| RcError::SignatureInvalid(format!("bad timestamp: {e}")))?;
    let sig_bytes = BASE64
        .decode(sig_b64)
        .map_err(|e| RcError::SignatureInvalid(format!("bad signature: {e}")))?;
    let signature = Signature::from_slice(&sig_bytes)
        .map_err(|e| RcError::SignatureInvalid(format!("bad signature bytes: {e}")))?;

    let mut signed = Vec::with_capacity(nonce.len() + timestamp_bytes.len());
    signed.extend_from_slice(&nonce);
    signed.extend_from_slice(&timestamp_bytes);

    let entries = fs::read_dir(cert_dir)
        .map_err(|e| RcError::SignatureInvalid(format!("reading {}: {e}", cert_dir.display())))?;

    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("pub") {
            continue;
        }
        let Ok(pem) = fs::read_to_string(&path) else {
            continue;
        };
        let Ok(verifying_key) = VerifyingKey::from_public_key_pem(&pem) else {
            continue;
        };
        if verifying_key.verify(&signed, &signature).is_ok() {
            return Ok(true);
        }
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::pkcs8::{EncodePrivateKey, EncodePublicKey, spki::der::pem::LineEnding};
    use tempfile::tempdir;

    fn write_keypair(key_dir: &Path, cert_dir: &Path, name: &str) -> SigningKey {
        let mut seed = [0u8; 32];
        rand::rng().fill_bytes(&mut seed);
        let signing_key = SigningKey::from_bytes(&seed);

        fs::write(
            key_dir.join(format!("{name}.key")),
            signing_key.to_pkcs8_pem(LineEnding::LF).unwrap().as_bytes(),
        )
        .unwrap();
        fs::write(
            cert_dir.join(format!("{name}.pub")),
            signing_key
                .verifying_key()
                .to_public_key_pem(LineEnding::LF)
                .unwrap(),
        )
        .unwrap();

        signing_key
    }

    #[test]
    fn round_trip_law_holds_for_authorized_key() {
        let key_dir = tempdir().unwrap();
        let cert_dir = tempdir().unwrap();
        write_keypair(key_dir.path(), cert_dir.path(), "client1");

        let header = create_sig("client1", key_dir.path()).unwrap();
        assert!(check_sig(&header, cert_dir.path()).unwrap());
    }

    #[test]
    fn round_trip_law_fails_when_public_key_absent() {
        let key_dir = tempdir().unwrap();
        let cert_dir = tempdir().unwrap();
        let unrelated_cert_dir = tempdir().unwrap();
        // key exists for signing, but its public counterpart is never placed in cert_dir
        write_keypair(key_dir.path(), unrelated_cert_dir.path(), "client1");

        let header = create_sig("client1", key_dir.path()).unwrap();
        assert!(!check_sig(&header, cert_dir.path()).unwrap());
    }

    #[test]
    fn empty_header_is_rejected() {
        let cert_dir = tempdir().unwrap();
        assert!(!check_sig("", cert_dir.path()).unwrap());
    }

    #[test]
    fn malformed_header_is_an_error() {
        let cert_dir = tempdir().unwrap();
        assert!(check_sig("not-a-valid-header", cert_dir.path()).is_err());
    }
}
