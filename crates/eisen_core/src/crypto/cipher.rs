//! Authenticated encryption (AES-256-GCM) over derived keys.
//!
//! Sealed layout: `nonce[12] || ciphertext || tag[16]`.
//!
//! # Invariants
//! - Every `encrypt` call draws a fresh random nonce.
//! - `decrypt` verifies the tag before returning any plaintext.

use crate::crypto::kdf::DerivedKey;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Tag verification failed: wrong key, or the sealed bytes/AAD were modified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticationError;

impl Display for AuthenticationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "authentication failed")
    }
}

impl Error for AuthenticationError {}

/// The AEAD backend refused to encrypt (payload exceeds cipher limits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionError;

impl Display for EncryptionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "encryption failed")
    }
}

impl Error for EncryptionError {}

/// Encrypts `plaintext`, binding `aad` into the tag.
pub fn encrypt(
    key: &DerivedKey,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| EncryptionError)?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypts bytes produced by [`encrypt`] with the same key and `aad`.
pub fn decrypt(key: &DerivedKey, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, AuthenticationError> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(AuthenticationError);
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| AuthenticationError)
}

/// Returns the nonce prefix of sealed bytes, if present.
pub fn nonce_of(sealed: &[u8]) -> Option<&[u8]> {
    sealed.get(..NONCE_LEN)
}
