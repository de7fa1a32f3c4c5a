pub mod backup;
pub mod config;
pub mod editor;
pub mod error;
pub mod feature;
pub mod guard;
pub mod manifest;
pub mod server;
pub mod staging;
pub mod storage;
pub mod visits;

pub use backup::{BackupRotation, PruneReport};
pub use config::ServerConfig;
pub use editor::{EditOutcome, EditorSession};
pub use error::VisitAtlasError;
pub use manifest::{GeoFormat, GeoManifest, GeoSource};
pub use storage::{SaveOutcome, VisitFileStore};
pub use visits::{VisitRecord, VisitStore};

/// Re-export commonly used types
pub type Result<T> = std::result::Result<T, VisitAtlasError>;
