//! Key derivation and authenticated encryption.
//!
//! # Responsibility
//! - Turn a password plus per-store salt into key material.
//! - Seal/open task payloads so tampering and wrong keys are detected.
//!
//! # Invariants
//! - No key material is persisted or logged.
//! - Decryption never returns unauthenticated plaintext.

pub mod blob;
pub mod cipher;
pub mod kdf;
