// Settings management and persistence
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::credentials::CredentialPool;

pub const ENV_API_KEYS: &str = "SPICE_JADOO_API_KEYS";
pub const ENV_GEMINI_URL: &str = "SPICE_JADOO_GEMINI_URL";
pub const ENV_OUTPUT: &str = "SPICE_JADOO_OUTPUT";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to write settings file {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Remote generative service settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiSettings {
    pub base_url: String,
    pub judgement_model: String,
    pub speech_model: String,
    pub voice: String,
    pub timeout_secs: u64,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            judgement_model: "gemini-2.5-flash".to_string(),
            speech_model: "gemini-2.5-flash-preview-tts".to_string(),
            voice: "Kore".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Where decoded audio goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Default system output device
    Device,
    /// Silent, real-time clocked
    Null,
}

impl std::str::FromStr for OutputKind {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "device" => Ok(Self::Device),
            "null" | "none" => Ok(Self::Null),
            other => Err(SettingsError::InvalidValue {
                key: ENV_OUTPUT.to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Audio settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub volume: f32, // 0.0-1.0
    pub output: OutputKind,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            volume: 1.0,
            output: OutputKind::Device,
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub version: i32, // Settings schema version for future migrations
    pub credentials: Vec<String>,
    pub gemini: GeminiSettings,
    pub audio: AudioSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            version: 1,
            credentials: Vec::new(),
            gemini: GeminiSettings::default(),
            audio: AudioSettings::default(),
        }
    }
}

impl AppSettings {
    /// Get the settings file path
    pub fn get_settings_path(app_dir: &Path) -> PathBuf {
        app_dir.join("settings.json")
    }

    /// Load settings from file, or return defaults if file doesn't exist
    pub fn load(app_dir: &Path) -> Result<Self, SettingsError> {
        let path = Self::get_settings_path(app_dir);

        if !path.exists() {
            info!("No settings file found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).map_err(|source| SettingsError::Read {
            path: path.clone(),
            source,
        })?;

        let settings: AppSettings = serde_json::from_str(&content)?;

        info!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Save settings to file
    pub fn save(&self, app_dir: &Path) -> Result<(), SettingsError> {
        let path = Self::get_settings_path(app_dir);
        let write_err = |source| SettingsError::Write {
            path: path.clone(),
            source,
        };

        // Ensure directory exists
        fs::create_dir_all(app_dir).map_err(write_err)?;

        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content).map_err(write_err)?;

        info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Apply overrides from a variable lookup. Unset or blank variables are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(keys) = get(ENV_API_KEYS) {
            self.credentials = keys.split(',').map(|k| k.trim().to_string()).collect();
            info!(count = self.credentials.len(), "Credential pool taken from {}", ENV_API_KEYS);
        }
        if let Some(url) = get(ENV_GEMINI_URL) {
            self.gemini.base_url = url.trim().to_string();
        }
        if let Some(output) = get(ENV_OUTPUT) {
            self.audio.output = output.parse()?;
        }
        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<(), SettingsError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Clamp out-of-range values and warn about unusable configuration
    pub fn validate(&mut self) {
        if !self.audio.volume.is_finite() {
            warn!("Volume {} is not a number, resetting", self.audio.volume);
            self.audio.volume = 1.0;
        }
        self.audio.volume = self.audio.volume.clamp(0.0, 1.0);

        if self.gemini.timeout_secs == 0 {
            self.gemini.timeout_secs = GeminiSettings::default().timeout_secs;
        }

        if CredentialPool::starting_at(&self.credentials, 0).is_empty() {
            warn!(
                "No usable API keys configured; set {} or add credentials to settings.json",
                ENV_API_KEYS
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = AppSettings::load(dir.path()).unwrap();
        assert_eq!(settings, AppSettings::default());
    }

    #[test]
    fn save_then_load_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("app");

        let mut settings = AppSettings::default();
        settings.credentials = vec!["key-one".to_string()];
        settings.audio.volume = 0.4;
        settings.audio.output = OutputKind::Null;
        settings.save(&nested).unwrap();

        assert_eq!(AppSettings::load(&nested).unwrap(), settings);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            AppSettings::get_settings_path(dir.path()),
            r#"{"credentials": ["abc"], "gemini": {"voice": "Puck"}}"#,
        )
        .unwrap();

        let settings = AppSettings::load(dir.path()).unwrap();
        assert_eq!(settings.gemini.voice, "Puck");
        assert_eq!(settings.gemini.judgement_model, "gemini-2.5-flash");
        assert_eq!(settings.audio.volume, 1.0);
    }

    #[test]
    fn corrupt_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(AppSettings::get_settings_path(dir.path()), "{not json").unwrap();
        assert!(matches!(AppSettings::load(dir.path()), Err(SettingsError::Parse(_))));
    }

    #[test]
    fn overrides_replace_pool_and_output() {
        let vars: HashMap<&str, &str> = [
            (ENV_API_KEYS, " k1, k2 ,k3"),
            (ENV_OUTPUT, "NULL"),
            (ENV_GEMINI_URL, ""),
        ]
        .into_iter()
        .collect();

        let mut settings = AppSettings::default();
        settings
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.credentials, vec!["k1", "k2", "k3"]);
        assert_eq!(settings.audio.output, OutputKind::Null);
        assert_eq!(settings.gemini.base_url, GeminiSettings::default().base_url);
    }

    #[test]
    fn unknown_output_kind_is_rejected() {
        let mut settings = AppSettings::default();
        let result = settings.apply_overrides(|k| (k == ENV_OUTPUT).then(|| "speaker".to_string()));
        assert!(matches!(result, Err(SettingsError::InvalidValue { .. })));
    }

    #[test]
    fn validate_keeps_credentials_as_written() {
        let mut settings = AppSettings::default();
        settings.credentials = vec!["PASTE_YOUR_API_KEY_HERE".to_string(), " real ".to_string()];
        settings.validate();
        assert_eq!(settings.credentials, vec!["PASTE_YOUR_API_KEY_HERE", " real "]);
    }

    #[test]
    fn validate_clamps_volume() {
        let mut settings = AppSettings::default();
        settings.audio.volume = 3.0;
        settings.gemini.timeout_secs = 0;
        settings.validate();
        assert_eq!(settings.audio.volume, 1.0);
        assert_eq!(settings.gemini.timeout_secs, 60);

        settings.audio.volume = f32::NAN;
        settings.validate();
        assert_eq!(settings.audio.volume, 1.0);
    }
}
