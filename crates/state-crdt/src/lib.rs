/// Local-first state tracking for per-user, per-field values
/// Optimistic local mutations reconciled against server-delivered summaries
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

mod kind;
pub use kind::*;

mod operations;
pub use operations::*;

mod add_record;
pub use add_record::*;

mod tombstones;
pub use tombstones::*;

mod report;
pub use report::*;

mod payload;
pub use payload::*;

mod tracker;
pub use tracker::*;

mod config;
pub use config::*;

mod coordinator;
pub use coordinator::*;

#[derive(Debug, Error)]
pub enum CrdtError {
    #[error("malformed payload: user {user_id} has no entry for field `{field_name}`")]
    MalformedPayload { user_id: UserId, field_name: String },

    #[error("invalid tracker: {0}")]
    InvalidTracker(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("field `{field_name}` is already tracked as {existing}, not {requested}")]
    KindMismatch {
        field_name: String,
        existing: CrdtKind,
        requested: CrdtKind,
    },

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("tracker worker stopped")]
    WorkerStopped,
}

pub type Result<T> = std::result::Result<T, CrdtError>;

/// Opaque identifier of the user whose state is tracked
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
