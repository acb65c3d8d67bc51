use thiserror::Error;

use crate::Dpid;

/// Common error types for sdnmon
#[derive(Error, Debug)]
pub enum SdnmonError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Control plane error: {0}")]
    ControlPlane(#[from] ControlPlaneError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Configuration errors; fatal at startup
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{section}:{key} parameter missing")]
    MissingParameter { section: String, key: String },

    #[error("{section}:{key} parameter invalid: '{value}' - {reason}")]
    InvalidParameter {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read configuration file '{path}': {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

impl ConfigError {
    pub fn missing(section: &str, key: &str) -> Self {
        ConfigError::MissingParameter {
            section: section.to_string(),
            key: key.to_string(),
        }
    }

    pub fn invalid(section: &str, key: &str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidParameter {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while handing a command to the control plane
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlPlaneError {
    #[error("Control channel closed")]
    ChannelClosed,

    #[error("Switch {dpid} is not connected")]
    SwitchUnavailable { dpid: Dpid },
}

/// Result type aliases for convenience
pub type SdnmonResult<T> = Result<T, SdnmonError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type ControlPlaneResult<T> = Result<T, ControlPlaneError>;
