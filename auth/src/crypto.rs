//! Symmetric token encryption (`spec.md` §6 "Token binary format"),
//! grounded on `Tonksthebear-trybotster/cli/src/crypto.rs`'s AES-256-GCM
//! envelope. Unlike that example's on-disk JSON envelope, tokens here
//! travel as a single opaque bearer string, so the nonce and ciphertext
//! are concatenated and base64url-encoded together instead of wrapped
//! in a JSON object.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64;
use base64::Engine;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_SIZE: usize = 12;

/// A symmetric key used to encrypt one token family (access, refresh,
/// or share). `spec.md` §3 gives the authorizator and the token
/// manager each their own key.
#[derive(Clone)]
pub struct TokenKey([u8; 32]);

impl TokenKey {
    pub fn new(key: [u8; 32]) -> Self {
        Self(key)
    }

    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self(key)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token encoding is invalid")]
    Malformed,
    #[error("token failed integrity check")]
    Tampered,
    #[error("token payload could not be deserialized")]
    Corrupt,
}

/// Archives `value` with the binary archiver (`spec.md` §6) and
/// encrypts it, returning a base64url (no padding) string suitable for
/// a bearer token, cookie value, or form field.
pub fn encrypt_token<T: Serialize>(key: &TokenKey, value: &T) -> String {
    let plaintext = bincode::serialize(value).expect("token payloads are always serializable");
    let cipher = Aes256Gcm::new_from_slice(&key.0).expect("key is exactly 32 bytes");

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_ref())
        .expect("encryption under a fresh nonce cannot fail");

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    BASE64.encode(out)
}

/// Reverses [`encrypt_token`]. The GCM tag folded into the ciphertext
/// is the "integrity bytes" `spec.md` §6 calls for; a tampered or
/// foreign-key token fails as [`TokenError::Tampered`] during the
/// decrypt call itself, not as a separate check.
pub fn decrypt_token<T: DeserializeOwned>(key: &TokenKey, token: &str) -> Result<T, TokenError> {
    let raw = BASE64.decode(token).map_err(|_| TokenError::Malformed)?;
    if raw.len() <= NONCE_SIZE {
        return Err(TokenError::Malformed);
    }
    let (nonce_bytes, ciphertext) = raw.split_at(NONCE_SIZE);
    let cipher = Aes256Gcm::new_from_slice(&key.0).expect("key is exactly 32 bytes");
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| TokenError::Tampered)?;
    bincode::deserialize(&plaintext).map_err(|_| TokenError::Corrupt)
}

/// Hashes a share link's password for storage in a [`crate::token::ShareToken`]
/// (`spec.md` §3 "share_token ... optional password hash"). A plain
/// SHA-256 digest, not a slow hash: minting share tokens is an
/// out-of-scope admin operation (`SPEC_FULL.md` module D), so this only
/// has to resist the share link itself being guessed, not an offline
/// attack on a leaked hash.
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    BASE64.encode(hasher.finalize())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    hash_password(password) == hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct Payload {
        id: u64,
        name: String,
    }

    #[test]
    fn round_trips_through_encrypt_and_decrypt() {
        let key = TokenKey::generate();
        let payload = Payload { id: 7, name: "alice".into() };
        let token = encrypt_token(&key, &payload);
        let decoded: Payload = decrypt_token(&key, &token).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn wrong_key_is_rejected_as_tampered() {
        let key = TokenKey::generate();
        let other = TokenKey::generate();
        let token = encrypt_token(&key, &Payload { id: 1, name: "x".into() });
        assert_eq!(decrypt_token::<Payload>(&other, &token).unwrap_err(), TokenError::Tampered);
    }

    #[test]
    fn malformed_base64_is_rejected() {
        let key = TokenKey::generate();
        assert_eq!(decrypt_token::<Payload>(&key, "not valid base64!!").unwrap_err(), TokenError::Malformed);
    }

    #[test]
    fn password_hash_round_trips() {
        let hash = hash_password("hunter2");
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("wrong", &hash));
    }
}
