pub mod config;
pub use config::{Config, RedactionConfig, ReportConfig, StorageConfig};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StudyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Malformed snapshot for {key}: {detail}")]
    MalformedSnapshot { key: String, detail: String },
    #[error("Invalid date: {0}")]
    InvalidDate(String),
    #[error("Invalid unit: {0} (expected year, month, day, hour, minute or second)")]
    InvalidUnit(String),
    #[error("Study not opted in: no participant identifier or opt-in date")]
    NotOptedIn,
    #[error("Study discontinued")]
    Discontinued,
    #[error("Config error: {0}")]
    Config(String),
    #[error("{0}")]
    Other(String),
}

impl StudyError {
    pub fn malformed(key: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::MalformedSnapshot { key: key.into(), detail: detail.into() }
    }
}

pub type Result<T> = std::result::Result<T, StudyError>;
