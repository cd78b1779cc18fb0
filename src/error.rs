use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum ParleyError {
    // Session errors
    SessionNotFound(String),

    // Room errors
    RoomNotFound(String),
    ContainerNotFound(String),

    // Storage errors
    StorageError(String),

    // Request errors: a caller omitted a required field, which is a
    // programming error rather than a runtime condition to recover from
    MalformedRequest(String),

    // Configuration errors
    ConfigError(String),
}

impl fmt::Display for ParleyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionNotFound(id) => write!(f, "Session not found: {}", id),
            Self::RoomNotFound(id) => write!(f, "Room not found: {}", id),
            Self::ContainerNotFound(id) => write!(f, "Container not found: {}", id),
            Self::StorageError(msg) => write!(f, "Storage error: {}", msg),
            Self::MalformedRequest(msg) => write!(f, "Malformed request: {}", msg),
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl Error for ParleyError {}

// Generic result type for the engine
pub type Result<T> = std::result::Result<T, ParleyError>;
