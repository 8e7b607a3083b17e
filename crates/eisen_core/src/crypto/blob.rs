//! Self-describing on-disk blob layout.
//!
//! ```text
//! MAGIC "EISN" | format u8 | salt_len u8 | salt | memory_kib u32be
//!   | iterations u32be | parallelism u32be | nonce[12] | ciphertext || tag[16]
//! ```
//!
//! Everything before the nonce is the header and is bound as AAD, so any
//! header modification fails authentication.

use crate::crypto::cipher::{self, AuthenticationError, EncryptionError, NONCE_LEN, TAG_LEN};
use crate::crypto::kdf::{DerivedKey, KdfError, KdfParams, Salt};
use std::error::Error;
use std::fmt::{Display, Formatter};

const BLOB_MAGIC: &[u8; 4] = b"EISN";
const BLOB_FORMAT: u8 = 1;
const FIXED_HEADER_LEN: usize = 4 + 1 + 1;
const PARAMS_LEN: usize = 12;

/// Structural problems found while parsing a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobError {
    Truncated,
    InvalidMagic,
    UnsupportedFormat(u8),
    Kdf(KdfError),
}

impl Display for BlobError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated => write!(f, "encrypted blob is truncated"),
            Self::InvalidMagic => write!(f, "encrypted blob magic header mismatch"),
            Self::UnsupportedFormat(version) => {
                write!(f, "unsupported encrypted blob format: {version}")
            }
            Self::Kdf(err) => write!(f, "invalid blob key parameters: {err}"),
        }
    }
}

impl Error for BlobError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Kdf(err) => Some(err),
            _ => None,
        }
    }
}

impl From<KdfError> for BlobError {
    fn from(value: KdfError) -> Self {
        Self::Kdf(value)
    }
}

/// Parsed encrypted blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBlob {
    pub salt: Salt,
    pub params: KdfParams,
    /// `nonce || ciphertext || tag`.
    pub sealed: Vec<u8>,
}

impl EncryptedBlob {
    /// Encrypts `plaintext` under `key`, recording the salt and params it was derived with.
    pub fn seal(
        key: &DerivedKey,
        salt: &Salt,
        params: &KdfParams,
        plaintext: &[u8],
    ) -> Result<Self, EncryptionError> {
        let header = encode_header(salt, params);
        let sealed = cipher::encrypt(key, plaintext, &header)?;
        Ok(Self {
            salt: salt.clone(),
            params: *params,
            sealed,
        })
    }

    /// Decrypts and authenticates the payload, header included.
    pub fn open(&self, key: &DerivedKey) -> Result<Vec<u8>, AuthenticationError> {
        let header = encode_header(&self.salt, &self.params);
        cipher::decrypt(key, &self.sealed, &header)
    }

    /// Nonce prefix of `sealed`; `None` when `sealed` is too short to hold one.
    pub fn nonce(&self) -> Option<&[u8]> {
        cipher::nonce_of(&self.sealed)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = encode_header(&self.salt, &self.params);
        out.extend_from_slice(&self.sealed);
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, BlobError> {
        if bytes.len() < FIXED_HEADER_LEN {
            return Err(BlobError::Truncated);
        }
        if &bytes[..BLOB_MAGIC.len()] != BLOB_MAGIC {
            return Err(BlobError::InvalidMagic);
        }
        let format = bytes[4];
        if format != BLOB_FORMAT {
            return Err(BlobError::UnsupportedFormat(format));
        }
        let salt_len = usize::from(bytes[5]);
        let params_start = FIXED_HEADER_LEN + salt_len;
        let sealed_start = params_start + PARAMS_LEN;
        if bytes.len() < sealed_start + NONCE_LEN + TAG_LEN {
            return Err(BlobError::Truncated);
        }

        let salt = Salt::from_bytes(bytes[FIXED_HEADER_LEN..params_start].to_vec())?;
        let params = KdfParams {
            memory_kib: read_u32(bytes, params_start),
            iterations: read_u32(bytes, params_start + 4),
            parallelism: read_u32(bytes, params_start + 8),
        };
        params.validate()?;

        Ok(Self {
            salt,
            params,
            sealed: bytes[sealed_start..].to_vec(),
        })
    }
}

fn encode_header(salt: &Salt, params: &KdfParams) -> Vec<u8> {
    let salt_bytes = salt.as_bytes();
    let mut out = Vec::with_capacity(FIXED_HEADER_LEN + salt_bytes.len() + PARAMS_LEN);
    out.extend_from_slice(BLOB_MAGIC);
    out.push(BLOB_FORMAT);
    // Salt length is bounded by `MAX_SALT_LEN`, which fits in one byte.
    out.push(salt_bytes.len() as u8);
    out.extend_from_slice(salt_bytes);
    out.extend_from_slice(&params.memory_kib.to_be_bytes());
    out.extend_from_slice(&params.iterations.to_be_bytes());
    out.extend_from_slice(&params.parallelism.to_be_bytes());
    out
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::{BlobError, EncryptedBlob};
    use crate::crypto::kdf::{derive_key, KdfParams, Salt};

    fn params() -> KdfParams {
        KdfParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn bytes_roundtrip_preserves_header_and_payload() {
        let salt = Salt::generate();
        let key = derive_key("pw123456", &salt, &params()).unwrap();
        let blob = EncryptedBlob::seal(&key, &salt, &params(), b"[]").unwrap();

        let parsed = EncryptedBlob::parse(&blob.to_bytes()).unwrap();
        assert_eq!(parsed, blob);
        assert_eq!(parsed.open(&key).unwrap(), b"[]");
    }

    #[test]
    fn parse_rejects_bad_magic_and_format() {
        let salt = Salt::generate();
        let key = derive_key("pw123456", &salt, &params()).unwrap();
        let bytes = EncryptedBlob::seal(&key, &salt, &params(), b"[]")
            .unwrap()
            .to_bytes();

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert_eq!(
            EncryptedBlob::parse(&bad_magic),
            Err(BlobError::InvalidMagic)
        );

        let mut bad_format = bytes.clone();
        bad_format[4] = 9;
        assert_eq!(
            EncryptedBlob::parse(&bad_format),
            Err(BlobError::UnsupportedFormat(9))
        );

        assert_eq!(
            EncryptedBlob::parse(&bytes[..20]),
            Err(BlobError::Truncated)
        );
    }

    #[test]
    fn parse_rejects_oversized_memory_cost() {
        let salt = Salt::generate();
        let key = derive_key("pw123456", &salt, &params()).unwrap();
        let mut bytes = EncryptedBlob::seal(&key, &salt, &params(), b"[]")
            .unwrap()
            .to_bytes();
        // First byte of memory_kib follows magic, format, salt_len and salt.
        bytes[6 + 16] = 0xFF;
        assert!(matches!(
            EncryptedBlob::parse(&bytes),
            Err(BlobError::Kdf(_))
        ));
    }

    #[test]
    fn nonce_of_hand_built_short_blob_is_none() {
        let blob = EncryptedBlob {
            salt: Salt::generate(),
            params: params(),
            sealed: vec![1, 2, 3],
        };
        assert_eq!(blob.nonce(), None);
        assert!(blob.open(&derive_key("pw123456", &blob.salt, &params()).unwrap()).is_err());
    }

    #[test]
    fn header_tampering_fails_authentication() {
        let salt = Salt::generate();
        let key = derive_key("pw123456", &salt, &params()).unwrap();
        let blob = EncryptedBlob::seal(&key, &salt, &params(), b"[]").unwrap();

        let mut forged = blob.clone();
        forged.params.iterations = 2;
        assert!(forged.open(&key).is_err());
    }
}
