use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::limits::{
    DEFAULT_EVENT_CHANNEL_CAPACITY, DEFAULT_MAX_GROUP_SIZE, HARD_MAX_GROUP_SIZE,
    MAX_DESCRIPTION_CHARS, MAX_TITLE_CHARS,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("max_group_size must be between 1 and {max}, got {got}")]
    GroupSizeOutOfRange { got: usize, max: usize },

    #[error("{0} must be non-zero")]
    Zero(&'static str),
}

/// Engine tunables. Every field falls back to its default when absent from
/// the JSON source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Members + pending invites allowed per group.
    pub max_group_size: usize,
    pub max_title_chars: usize,
    pub max_description_chars: usize,
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_group_size: DEFAULT_MAX_GROUP_SIZE,
            max_title_chars: MAX_TITLE_CHARS,
            max_description_chars: MAX_DESCRIPTION_CHARS,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_group_size == 0 || self.max_group_size > HARD_MAX_GROUP_SIZE {
            return Err(ConfigError::GroupSizeOutOfRange {
                got: self.max_group_size,
                max: HARD_MAX_GROUP_SIZE,
            });
        }
        if self.max_title_chars == 0 {
            return Err(ConfigError::Zero("max_title_chars"));
        }
        if self.event_channel_capacity == 0 {
            return Err(ConfigError::Zero("event_channel_capacity"));
        }
        Ok(())
    }
}

impl fmt::Display for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EngineConfig(max_group_size={}, max_title_chars={}, max_description_chars={})",
            self.max_group_size, self.max_title_chars, self.max_description_chars
        )
    }
}
