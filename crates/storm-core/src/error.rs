//! Error types for the storm tracking system

use thiserror::Error;

/// Core error type shared by the storm tracking crates
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Unexpected frame name format: {0}")]
    InvalidFrameName(String),

    #[error("Invalid timestamp token '{token}' in {name}")]
    InvalidTimestamp { name: String, token: String },

    #[error("Not an image frame: {0}")]
    NotAnImage(String),

    #[error("Invalid radar range label: {0}")]
    InvalidRadarRange(String),

    #[error("Invalid sensor geometry: {0}")]
    InvalidGeometry(String),
}

impl CoreError {
    pub fn invalid_frame_name(name: impl Into<String>) -> Self {
        Self::InvalidFrameName(name.into())
    }

    pub fn invalid_timestamp(name: impl Into<String>, token: impl Into<String>) -> Self {
        Self::InvalidTimestamp {
            name: name.into(),
            token: token.into(),
        }
    }

    pub fn invalid_radar_range(label: impl Into<String>) -> Self {
        Self::InvalidRadarRange(label.into())
    }

    /// Whether this error is a filename/timestamp parse failure
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidFrameName(_) | Self::InvalidTimestamp { .. }
        )
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
