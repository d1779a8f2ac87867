//! Pipeline error types

use storm_core::CoreError;
use storm_cv::CvError;
use storm_db::DbError;
use thiserror::Error;

/// Session and pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object store error: {0}")]
    Store(String),

    #[error("Cannot list {prefix}: {reason}")]
    Listing { prefix: String, reason: String },

    #[error("Export error: {0}")]
    Export(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Cv(#[from] CvError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("Session task failed: {0}")]
    Task(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn listing(prefix: impl Into<String>, reason: impl ToString) -> Self {
        Self::Listing {
            prefix: prefix.into(),
            reason: reason.to_string(),
        }
    }

    pub fn export(msg: impl Into<String>) -> Self {
        Self::Export(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Missing object, from the store or the detector
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Cv(CvError::NotFound(_)))
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
