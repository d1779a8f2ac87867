//! Error types for the CV module

use thiserror::Error;

/// Errors that can occur in detection and tracking
#[derive(Error, Debug)]
pub enum CvError {
    #[error("Image not found: {0}")]
    NotFound(String),

    #[error("Image decode error: {0}")]
    Decode(String),

    #[error("Frame processing error: {0}")]
    FrameProcessing(String),

    #[error("Tracking error: {0}")]
    Tracking(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CvError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn frame_processing(msg: impl Into<String>) -> Self {
        Self::FrameProcessing(msg.into())
    }

    pub fn tracking(msg: impl Into<String>) -> Self {
        Self::Tracking(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

impl From<image::ImageError> for CvError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(io) if io.kind() == std::io::ErrorKind::NotFound => {
                Self::NotFound(io.to_string())
            }
            other => Self::Decode(other.to_string()),
        }
    }
}

pub type CvResult<T> = Result<T, CvError>;
