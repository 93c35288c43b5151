/// Operation identifiers and the generators that mint them
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a freshly generated operation id
pub const DEFAULT_OPERATION_ID_LENGTH: usize = 6;

/// Opaque token identifying one write attempt
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub String);

impl OperationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for OperationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Source of fresh operation ids for local writes
pub trait IdGenerator: Send {
    fn next_id(&mut self) -> OperationId;
}

/// Random alphanumeric ids of a fixed length, never shorter than one character
#[derive(Debug, Clone)]
pub struct RandomIdGenerator {
    length: usize,
}

impl RandomIdGenerator {
    pub fn new(length: usize) -> Self {
        Self {
            length: length.max(1),
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }
}

impl Default for RandomIdGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_OPERATION_ID_LENGTH)
    }
}

impl IdGenerator for RandomIdGenerator {
    fn next_id(&mut self) -> OperationId {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.length)
            .map(char::from)
            .collect();
        OperationId(id)
    }
}

/// Deterministic ids `prefix-1`, `prefix-2`, ...
#[derive(Debug, Clone)]
pub struct SequenceIdGenerator {
    prefix: String,
    counter: u64,
}

impl SequenceIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: 0,
        }
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn next_id(&mut self) -> OperationId {
        self.counter += 1;
        OperationId(format!("{}-{}", self.prefix, self.counter))
    }
}
