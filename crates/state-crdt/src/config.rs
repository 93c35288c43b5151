/// Tracker configuration
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{CrdtError, RandomIdGenerator, Result, DEFAULT_OPERATION_ID_LENGTH};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Characters in each generated operation id
    pub operation_id_length: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            operation_id_length: DEFAULT_OPERATION_ID_LENGTH,
        }
    }
}

impl TrackerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: TrackerConfig =
            serde_json::from_str(json).map_err(|e| CrdtError::SerializationError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            CrdtError::InvalidConfig(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.operation_id_length == 0 {
            return Err(CrdtError::InvalidConfig(
                "operation_id_length must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn id_generator(&self) -> RandomIdGenerator {
        RandomIdGenerator::new(self.operation_id_length)
    }
}
