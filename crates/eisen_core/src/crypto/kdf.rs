//! Password-based key derivation (Argon2id).
//!
//! # Invariants
//! - Same password + salt + params always yield the same key.
//! - A wrong password is never detected here; only decryption notices it.
//! - Derived key bytes are zeroized when dropped.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const KEY_LEN: usize = 32;
/// Length of freshly generated salts.
pub const SALT_LEN: usize = 16;
pub const MIN_SALT_LEN: usize = 16;
pub const MAX_SALT_LEN: usize = 64;

const MEMORY_KIB_MAX: u32 = 1024 * 1024;
const ITERATIONS_MAX: u32 = 64;
const PARALLELISM_MAX: u32 = 16;

/// Configuration errors for key derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KdfError {
    SaltLength(usize),
    ParamOutOfBounds {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
    Backend(String),
}

impl Display for KdfError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SaltLength(len) => write!(
                f,
                "salt must be {MIN_SALT_LEN}..={MAX_SALT_LEN} bytes, got {len}"
            ),
            Self::ParamOutOfBounds {
                field,
                value,
                min,
                max,
            } => write!(f, "{field} out of bounds: {value} (expected {min}..={max})"),
            Self::Backend(message) => write!(f, "argon2 failure: {message}"),
        }
    }
}

impl Error for KdfError {}

/// Argon2id cost parameters, persisted alongside each store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 102_400,
            iterations: 4,
            parallelism: 8,
        }
    }
}

impl KdfParams {
    /// Rejects params outside the supported cost envelope.
    ///
    /// Upper bounds also guard `unlock` against forged headers that would
    /// otherwise request unbounded memory.
    pub fn validate(&self) -> Result<(), KdfError> {
        check_bounds("parallelism", self.parallelism, 1, PARALLELISM_MAX)?;
        check_bounds("iterations", self.iterations, 1, ITERATIONS_MAX)?;
        check_bounds(
            "memory_kib",
            self.memory_kib,
            8 * self.parallelism,
            MEMORY_KIB_MAX,
        )?;
        Ok(())
    }
}

fn check_bounds(field: &'static str, value: u32, min: u32, max: u32) -> Result<(), KdfError> {
    if value < min || value > max {
        return Err(KdfError::ParamOutOfBounds {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Random, non-secret per-store salt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Salt(Vec<u8>);

impl Salt {
    /// Generates a new salt from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; SALT_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, KdfError> {
        if !(MIN_SALT_LEN..=MAX_SALT_LEN).contains(&bytes.len()) {
            return Err(KdfError::SaltLength(bytes.len()));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

/// Symmetric key derived from a password. Never persisted.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; KEY_LEN]);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey(..)")
    }
}

/// Derives a 32-byte key from `password` and `salt`.
///
/// Blocking and deliberately slow; callers with an interactive thread should
/// run it elsewhere.
pub fn derive_key(
    password: &str,
    salt: &Salt,
    params: &KdfParams,
) -> Result<DerivedKey, KdfError> {
    params.validate()?;
    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|err| KdfError::Backend(err.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut key = DerivedKey([0u8; KEY_LEN]);
    argon2
        .hash_password_into(password.as_bytes(), salt.as_bytes(), &mut key.0)
        .map_err(|err| KdfError::Backend(err.to_string()))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::{derive_key, KdfError, KdfParams, Salt};

    fn cheap() -> KdfParams {
        KdfParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn derivation_is_deterministic_and_password_sensitive() {
        let salt = Salt::from_bytes(vec![7u8; 16]).unwrap();
        let a = derive_key("correcthorse", &salt, &cheap()).unwrap();
        let b = derive_key("correcthorse", &salt, &cheap()).unwrap();
        let c = derive_key("correcthorsf", &salt, &cheap()).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
    }

    #[test]
    fn different_salts_give_different_keys() {
        let a = derive_key("pw123456", &Salt::generate(), &cheap()).unwrap();
        let b = derive_key("pw123456", &Salt::generate(), &cheap()).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn short_salt_is_a_configuration_error() {
        let err = Salt::from_bytes(vec![1u8; 8]).unwrap_err();
        assert_eq!(err, KdfError::SaltLength(8));
    }

    #[test]
    fn params_reject_out_of_bounds_values() {
        let mut params = cheap();
        params.iterations = 0;
        assert!(matches!(
            params.validate(),
            Err(KdfError::ParamOutOfBounds {
                field: "iterations",
                ..
            })
        ));

        let mut params = cheap();
        params.parallelism = 4;
        params.memory_kib = 16;
        assert!(matches!(
            params.validate(),
            Err(KdfError::ParamOutOfBounds {
                field: "memory_kib",
                ..
            })
        ));
    }

    #[test]
    fn default_params_are_valid() {
        KdfParams::default().validate().unwrap();
    }

    #[test]
    fn debug_output_hides_key_bytes() {
        let salt = Salt::from_bytes(vec![3u8; 16]).unwrap();
        let key = derive_key("secret-pw", &salt, &cheap()).unwrap();
        assert_eq!(format!("{key:?}"), "DerivedKey(..)");
    }
}
