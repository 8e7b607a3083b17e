//! Non-secret store config record and store options.
//!
//! # Invariants
//! - The config record never contains key material.
//! - Omitted `kdf` params fall back to `KdfParams::default()`.

use crate::crypto::kdf::{KdfError, KdfParams, Salt};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const CONFIG_FORMAT: u32 = 1;
pub const DEFAULT_MIN_PASSWORD_LEN: usize = 6;
pub const DEFAULT_BACKUP_COUNT: usize = 3;

/// Config record failed to parse or validate.
#[derive(Debug)]
pub enum ConfigError {
    Json(serde_json::Error),
    Hex(hex::FromHexError),
    Kdf(KdfError),
    UnsupportedFormat(u32),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(err) => write!(f, "invalid store config json: {err}"),
            Self::Hex(err) => write!(f, "invalid store config salt: {err}"),
            Self::Kdf(err) => write!(f, "invalid store config kdf: {err}"),
            Self::UnsupportedFormat(format) => write!(
                f,
                "store config format {format} is newer than supported {CONFIG_FORMAT}"
            ),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Json(err) => Some(err),
            Self::Hex(err) => Some(err),
            Self::Kdf(err) => Some(err),
            Self::UnsupportedFormat(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<hex::FromHexError> for ConfigError {
    fn from(value: hex::FromHexError) -> Self {
        Self::Hex(value)
    }
}

impl From<KdfError> for ConfigError {
    fn from(value: KdfError) -> Self {
        Self::Kdf(value)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ConfigRecord {
    #[serde(default = "default_format")]
    format_version: u32,
    salt: String,
    #[serde(default)]
    kdf: Option<KdfParams>,
}

fn default_format() -> u32 {
    CONFIG_FORMAT
}

/// Companion record registering a store's salt and derivation cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub salt: Salt,
    pub kdf: KdfParams,
}

impl StoreConfig {
    pub fn to_json(&self) -> Result<Vec<u8>, ConfigError> {
        let record = ConfigRecord {
            format_version: CONFIG_FORMAT,
            salt: self.salt.to_hex(),
            kdf: Some(self.kdf),
        };
        Ok(serde_json::to_vec_pretty(&record)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, ConfigError> {
        let record: ConfigRecord = serde_json::from_slice(bytes)?;
        if record.format_version > CONFIG_FORMAT {
            return Err(ConfigError::UnsupportedFormat(record.format_version));
        }
        let salt = Salt::from_bytes(hex::decode(record.salt.trim())?)?;
        let kdf = record.kdf.unwrap_or_default();
        kdf.validate()?;
        Ok(Self { salt, kdf })
    }
}

/// Caller-supplied store policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Cost used whenever a new salt is issued (create, change_password).
    pub kdf: KdfParams,
    /// Minimum length for new passwords.
    pub min_password_len: usize,
    /// Number of previous blobs kept as `.bak.N`; 0 disables rollover.
    pub backup_count: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            min_password_len: DEFAULT_MIN_PASSWORD_LEN,
            backup_count: DEFAULT_BACKUP_COUNT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, StoreConfig};
    use crate::crypto::kdf::{KdfParams, Salt};

    #[test]
    fn json_roundtrip_uses_hex_salt() {
        let config = StoreConfig {
            salt: Salt::from_bytes(vec![0xAB; 16]).unwrap(),
            kdf: KdfParams {
                memory_kib: 64,
                iterations: 1,
                parallelism: 1,
            },
        };
        let json = config.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["salt"], "abababababababababababababababab");
        assert_eq!(value["kdf"]["memory_kib"], 64);
        assert_eq!(StoreConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn missing_kdf_uses_defaults() {
        let json = br#"{"salt":"00112233445566778899aabbccddeeff"}"#;
        let config = StoreConfig::from_json(json).unwrap();
        assert_eq!(config.kdf, KdfParams::default());
    }

    #[test]
    fn short_salt_and_bad_hex_are_rejected() {
        assert!(matches!(
            StoreConfig::from_json(br#"{"salt":"0011"}"#),
            Err(ConfigError::Kdf(_))
        ));
        assert!(matches!(
            StoreConfig::from_json(br#"{"salt":"zz"}"#),
            Err(ConfigError::Hex(_))
        ));
    }
}
