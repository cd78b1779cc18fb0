//! Engine configuration module
//! Handles tunable limits for rooms and message handling

use crate::constants::{
    DEFAULT_MAX_MESSAGE_BYTES, DEFAULT_MAX_PENDING_MESSAGES, DEFAULT_MAX_ROOM_OCCUPANTS,
};
use crate::error::{ParleyError, Result};
use std::env;

/// Engine configuration parameters
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of occupants a single room will admit
    pub max_room_occupants: usize,
    /// Maximum number of messages a moderated room keeps awaiting approval
    pub max_pending_messages: usize,
    /// Maximum serialized body size accepted from a session
    pub max_message_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_room_occupants: DEFAULT_MAX_ROOM_OCCUPANTS,
            max_pending_messages: DEFAULT_MAX_PENDING_MESSAGES,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl EngineConfig {
    /// Create a test configuration
    #[cfg(test)]
    pub fn for_testing() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables if available
    pub fn from_env() -> Result<Self> {
        let max_room_occupants = env::var("PARLEY_MAX_OCCUPANTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_ROOM_OCCUPANTS);

        let max_pending_messages = env::var("PARLEY_MAX_PENDING")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_PENDING_MESSAGES);

        let max_message_bytes = env::var("PARLEY_MAX_MESSAGE_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_MESSAGE_BYTES);

        let config = Self {
            max_room_occupants,
            max_pending_messages,
            max_message_bytes,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_room_occupants == 0 {
            return Err(ParleyError::ConfigError(
                "PARLEY_MAX_OCCUPANTS must be at least 1".to_string(),
            ));
        }
        if self.max_pending_messages == 0 {
            return Err(ParleyError::ConfigError(
                "PARLEY_MAX_PENDING must be at least 1".to_string(),
            ));
        }
        if self.max_message_bytes == 0 {
            return Err(ParleyError::ConfigError(
                "PARLEY_MAX_MESSAGE_BYTES must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
