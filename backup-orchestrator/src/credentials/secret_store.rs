//! At-rest encryption for stored SSH key material.
//!
//! Each call derives a fresh key from the server secret with Argon2id and a
//! random salt, then seals with XChaCha20-Poly1305 under a random 24-byte
//! nonce. The output is text so it can live in any string column:
//!
//! ```text
//! v1:base64(salt[16] || nonce[24] || ciphertext+tag)
//! ```

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{OrchestratorError, Result};

const FORMAT_PREFIX: &str = "v1:";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;
const KEY_LEN: usize = 32;
const TAG_LEN: usize = 16;

// Argon2id, 19 MiB / 2 passes / 1 lane.
const ARGON2_MEMORY_KIB: u32 = 19_456;
const ARGON2_TIME_COST: u32 = 2;
const ARGON2_PARALLELISM: u32 = 1;

fn derive_key(secret: &str, salt: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let params = Params::new(ARGON2_MEMORY_KIB, ARGON2_TIME_COST, ARGON2_PARALLELISM, Some(KEY_LEN))
        .map_err(|e| OrchestratorError::Secret(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(secret.as_bytes(), salt, key.as_mut())
        .map_err(|e| OrchestratorError::Secret(e.to_string()))?;
    Ok(key)
}

/// Seal `plaintext` under `secret`.
///
/// An empty server secret is rejected on purpose: it would make every stored
/// key decryptable by anyone holding the ciphertext. Any non-empty secret
/// round-trips through [`decrypt`].
pub fn encrypt(plaintext: &str, secret: &str) -> Result<String> {
    if secret.is_empty() {
        return Err(OrchestratorError::Secret("encryption secret is empty".into()));
    }

    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let key = derive_key(secret, &salt)?;
    let cipher = XChaCha20Poly1305::new_from_slice(key.as_ref())
        .map_err(|e| OrchestratorError::Secret(e.to_string()))?;
    let sealed = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|e| OrchestratorError::Secret(e.to_string()))?;

    let mut blob = Vec::with_capacity(SALT_LEN + NONCE_LEN + sealed.len());
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&sealed);

    Ok(format!("{FORMAT_PREFIX}{}", STANDARD.encode(blob)))
}

pub fn decrypt(ciphertext: &str, secret: &str) -> Result<String> {
    let encoded = ciphertext
        .trim()
        .strip_prefix(FORMAT_PREFIX)
        .ok_or_else(|| OrchestratorError::Secret("unrecognized ciphertext format".into()))?;
    let blob = STANDARD
        .decode(encoded)
        .map_err(|e| OrchestratorError::Secret(format!("invalid ciphertext encoding: {e}")))?;

    if blob.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
        return Err(OrchestratorError::Secret("ciphertext too short".into()));
    }
    let (salt, rest) = blob.split_at(SALT_LEN);
    let (nonce, sealed) = rest.split_at(NONCE_LEN);

    let key = derive_key(secret, salt)?;
    let cipher = XChaCha20Poly1305::new_from_slice(key.as_ref())
        .map_err(|e| OrchestratorError::Secret(e.to_string()))?;
    let plain = cipher
        .decrypt(XNonce::from_slice(nonce), sealed)
        .map_err(|_| OrchestratorError::Secret("decryption failed (wrong secret or tampered data)".into()))?;

    String::from_utf8(plain)
        .map_err(|_| OrchestratorError::Secret("decrypted data is not valid UTF-8".into()))
}
