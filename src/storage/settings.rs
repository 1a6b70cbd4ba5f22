//! Settings storage
//!
//! Manages persistence of the server address and generation parameters.

use crate::kobold::DEFAULT_BASE_URL;
use crate::storage::{get_data_dir, StorageError};
use crate::types::generation::GenerationParams;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the configured server address
pub const BASE_URL_ENV: &str = "KOBOLD_BASE_URL";

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Base URL of the KoboldCpp server
    pub base_url: String,
    /// Context window sent with every request
    pub max_context_length: u32,
    /// Maximum number of tokens to generate
    pub max_length: u32,
    /// Temperature parameter for text generation (0.0 - 2.0)
    pub temperature: f32,
    /// Top-p (nucleus sampling) parameter (0.0 - 1.0)
    pub top_p: f32,
    /// Directory holding one `<id>.json` file per character
    pub characters_directory: PathBuf,
    /// Seconds allowed for establishing a connection
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_characters_directory() -> PathBuf {
    get_data_dir()
        .ok()
        .map(|d| d.join("characters"))
        .unwrap_or_else(|| PathBuf::from("./characters"))
}

impl Default for AppSettings {
    fn default() -> Self {
        let params = GenerationParams::default();
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            max_context_length: params.max_context_length,
            max_length: params.max_length,
            temperature: params.temperature,
            top_p: params.top_p,
            characters_directory: default_characters_directory(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl AppSettings {
    /// Validate settings values
    ///
    /// Ensures all parameters are within acceptable ranges.
    pub fn validate(&mut self) {
        self.temperature = self.temperature.clamp(0.0, 2.0);
        self.top_p = self.top_p.clamp(0.0, 1.0);

        self.max_length = self.max_length.max(1);
        if self.max_context_length < self.max_length {
            tracing::warn!(
                "Context length {} smaller than max length {}, raising it",
                self.max_context_length,
                self.max_length
            );
            self.max_context_length = self.max_length;
        }

        let trimmed = self.base_url.trim().trim_end_matches('/');
        self.base_url = if trimmed.is_empty() {
            DEFAULT_BASE_URL.to_string()
        } else {
            trimmed.to_string()
        };

        if self.connect_timeout_secs == 0 {
            self.connect_timeout_secs = default_connect_timeout();
        }
    }

    /// Sampling parameters to send with each prompt
    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            max_context_length: self.max_context_length,
            max_length: self.max_length,
            temperature: self.temperature,
            top_p: self.top_p,
        }
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            if !url.trim().is_empty() {
                tracing::debug!("Using {} from environment", BASE_URL_ENV);
                self.base_url = url;
            }
        }
    }
}

/// Get the settings file path
fn get_settings_path() -> Result<PathBuf, StorageError> {
    Ok(get_data_dir()?.join("settings.json"))
}

/// Load settings from disk
///
/// Returns default settings if the file doesn't exist or is corrupted.
/// `KOBOLD_BASE_URL` overrides the stored server address.
pub fn load_settings() -> AppSettings {
    let mut settings = match get_settings_path().and_then(|path| load_settings_from(&path)) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            AppSettings::default()
        }
    };
    settings.apply_env();
    settings.validate();
    settings
}

/// Load settings from a specific file
pub fn load_settings_from(path: &Path) -> Result<AppSettings, StorageError> {
    if !path.exists() {
        tracing::info!("Settings file not found, using defaults");
        return Ok(AppSettings::default());
    }

    let json = fs::read_to_string(path)?;
    let mut settings: AppSettings = serde_json::from_str(&json)?;
    settings.validate();

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Save settings to the data directory
pub fn save_settings(settings: &AppSettings) -> Result<(), StorageError> {
    save_settings_to(settings, &get_settings_path()?)
}

/// Save settings to a specific file
pub fn save_settings_to(settings: &AppSettings, path: &Path) -> Result<(), StorageError> {
    // Ensure the parent directory exists
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;

    tracing::debug!("Saved settings to {}", path.display());
    Ok(())
}
