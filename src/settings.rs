// Persisted settings and download history
//
// Both live as pretty JSON in one config directory. A missing settings file is
// created with defaults; an unreadable one yields defaults and is left alone.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::downloader::errors::DownloadError;
use crate::downloader::models::{JobResult, SubtitleLanguage, STREAMING_CONTAINER};

pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const HISTORY_FILE_NAME: &str = "history.json";
pub const CONFIG_DIR_ENV: &str = "EASYDL_CONFIG_DIR";

/// Entries kept in the history list
pub const HISTORY_LIMIT: usize = 10;

const APP_DIR_NAME: &str = "easydl";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub dark_mode: bool,
    pub default_download_path: PathBuf,
    pub default_format: String,
    pub default_quality: String,
    pub default_sub_lang: SubtitleLanguage,
    pub language: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dark_mode: false,
            default_download_path: default_download_dir(),
            default_format: STREAMING_CONTAINER.to_string(),
            default_quality: "1080p (?? MB) [mp4]".to_string(),
            default_sub_lang: SubtitleLanguage::Auto,
            language: "en".to_string(),
        }
    }
}

impl Settings {
    /// Update one field from its textual form
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), DownloadError> {
        let value = value.trim();
        match key {
            "dark_mode" => {
                self.dark_mode = value
                    .parse()
                    .map_err(|_| DownloadError::InvalidInput(format!("dark_mode expects true/false, got {:?}", value)))?;
            }
            "default_download_path" => self.default_download_path = PathBuf::from(value),
            "default_format" => self.default_format = value.to_lowercase(),
            "default_quality" => self.default_quality = value.to_string(),
            "default_sub_lang" => {
                self.default_sub_lang = value.parse().map_err(DownloadError::InvalidInput)?;
            }
            "language" => self.language = value.to_string(),
            other => {
                return Err(DownloadError::InvalidInput(format!("unknown setting: {}", other)));
            }
        }
        Ok(())
    }
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Config directory: explicit override, then `$EASYDL_CONFIG_DIR`, then the
/// platform config dir
pub fn resolve_config_dir(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| std::env::var_os(CONFIG_DIR_ENV).map(PathBuf::from))
        .or_else(|| dirs::config_dir().map(|d| d.join(APP_DIR_NAME)))
        .unwrap_or_else(|| PathBuf::from(".").join(APP_DIR_NAME))
}

/// File access for settings and history in one directory
#[derive(Debug, Clone)]
pub struct SettingsStore {
    dir: PathBuf,
}

impl SettingsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn settings_path(&self) -> PathBuf {
        self.dir.join(SETTINGS_FILE_NAME)
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE_NAME)
    }

    pub fn load_settings(&self) -> Result<Settings, DownloadError> {
        let path = self.settings_path();
        if !path.exists() {
            let settings = Settings::default();
            self.save_settings(&settings)?;
            return Ok(settings);
        }

        let raw = fs::read_to_string(&path)?;
        match serde_json::from_str(&raw) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                log::warn!("[settings] {} is unreadable, using defaults: {}", path.display(), e);
                Ok(Settings::default())
            }
        }
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<(), DownloadError> {
        self.write_json(&self.settings_path(), settings)
    }

    /// Stored history; a missing or unreadable file is an empty list
    pub fn load_history(&self) -> Vec<String> {
        let path = self.history_path();
        let Ok(raw) = fs::read_to_string(&path) else {
            return Vec::new();
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            log::warn!("[history] {} is unreadable, starting empty: {}", path.display(), e);
            Vec::new()
        })
    }

    pub fn save_history(&self, entries: &[String]) -> Result<(), DownloadError> {
        self.write_json(&self.history_path(), &entries)
    }

    fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<(), DownloadError> {
        fs::create_dir_all(&self.dir)?;
        let payload = serde_json::to_string_pretty(value)?;
        fs::write(path, payload)?;
        Ok(())
    }
}

/// Recent output paths, newest first, persisted after every change
#[derive(Debug)]
pub struct History {
    entries: Vec<String>,
    store: SettingsStore,
}

impl History {
    pub fn load(store: SettingsStore) -> Self {
        let mut entries = store.load_history();
        entries.truncate(HISTORY_LIMIT);
        Self { entries, store }
    }

    /// Every stored entry, including ones whose file is gone
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Entries whose file still exists
    pub fn visible(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| Path::new(e.as_str()).exists())
            .map(String::as_str)
            .collect()
    }

    /// Record the existing outputs of a finished job
    pub fn add_result(&mut self, result: &JobResult) -> Result<(), DownloadError> {
        let paths: Vec<String> = result
            .output_paths()
            .iter()
            .filter(|p| p.exists())
            .map(|p| p.display().to_string())
            .collect();
        if paths.is_empty() {
            return Ok(());
        }

        for path in paths {
            self.entries.insert(0, path);
        }
        self.entries.truncate(HISTORY_LIMIT);
        self.store.save_history(&self.entries)
    }

    pub fn clear(&mut self) -> Result<(), DownloadError> {
        self.entries.clear();
        self.store.save_history(&self.entries)
    }
}
