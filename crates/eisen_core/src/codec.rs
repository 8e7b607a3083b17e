//! Task collection codec.
//!
//! # Responsibility
//! - Serialize a `TaskCollection` into the canonical JSON envelope.
//! - Decode current and legacy payloads into a validated collection.
//!
//! # Invariants
//! - Decoded collections satisfy every task and collection invariant.
//! - Missing optional fields take model defaults; unknown fields are ignored.
//! - Codec failures stay distinguishable from authentication failures.

use crate::model::collection::{CollectionError, TaskCollection};
use crate::model::task::Task;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Envelope format written by this build.
pub const CODEC_FORMAT: u32 = 1;

pub type CodecResult<T> = Result<T, CodecError>;

/// Decoded bytes do not form a valid task collection.
#[derive(Debug)]
pub enum CodecError {
    Json(serde_json::Error),
    UnsupportedFormat(u32),
    UnexpectedShape(&'static str),
    Invalid(CollectionError),
}

impl Display for CodecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(err) => write!(f, "task payload is not valid json: {err}"),
            Self::UnsupportedFormat(format) => write!(
                f,
                "task payload format {format} is newer than supported {CODEC_FORMAT}"
            ),
            Self::UnexpectedShape(details) => write!(f, "unexpected task payload shape: {details}"),
            Self::Invalid(err) => write!(f, "task payload violates invariants: {err}"),
        }
    }
}

impl Error for CodecError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Json(err) => Some(err),
            Self::Invalid(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<CollectionError> for CodecError {
    fn from(value: CollectionError) -> Self {
        Self::Invalid(value)
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    format: u32,
    tasks: &'a [Task],
}

#[derive(Deserialize)]
struct Envelope {
    format: u32,
    #[serde(default)]
    tasks: Vec<Task>,
}

/// Encodes a collection, re-validating it first.
pub fn encode(tasks: &TaskCollection) -> CodecResult<Vec<u8>> {
    TaskCollection::from_tasks(tasks.as_slice().to_vec())?;
    let envelope = EnvelopeRef {
        format: CODEC_FORMAT,
        tasks: tasks.as_slice(),
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Decodes an envelope, or a legacy bare task array.
pub fn decode(bytes: &[u8]) -> CodecResult<TaskCollection> {
    let value: Value = serde_json::from_slice(bytes)?;
    let tasks = match value {
        Value::Array(_) => serde_json::from_value::<Vec<Task>>(value)?,
        Value::Object(_) => {
            let envelope: Envelope = serde_json::from_value(value)?;
            if envelope.format > CODEC_FORMAT {
                return Err(CodecError::UnsupportedFormat(envelope.format));
            }
            envelope.tasks
        }
        _ => return Err(CodecError::UnexpectedShape("expected object or array")),
    };

    Ok(TaskCollection::from_tasks(tasks)?)
}
