use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisitAtlasError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Validation(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Backup of {} failed: {source}", .path.display())]
    Backup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Writing {} failed: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid geo data: {0}")]
    GeoData(String),

    #[error("Bad request path: {0}")]
    BadPath(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}
