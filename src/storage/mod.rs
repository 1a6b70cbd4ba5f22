//! Persistent storage
//!
//! This module handles data persistence for characters and application settings.

pub mod characters;
pub mod settings;

use std::path::PathBuf;
use thiserror::Error;

pub use characters::CharacterStore;

/// Errors raised by the on-disk stores
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Could not determine a data directory for this platform")]
    NoDataDir,
    #[error("Invalid character id: {0:?}")]
    InvalidId(String),
}

/// Platform data directory for the application
///
/// Linux: ~/.local/share/koboldrs
/// macOS: ~/Library/Application Support/com.KoboldRs.koboldrs
/// Windows: %APPDATA%\KoboldRs\koboldrs\data
pub fn get_data_dir() -> Result<PathBuf, StorageError> {
    directories::ProjectDirs::from("com", "KoboldRs", "koboldrs")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(StorageError::NoDataDir)
}
