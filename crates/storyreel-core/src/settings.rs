//! Application settings.
//!
//! Defaults for generation runs (model tier, aspect ratio, resolution, scene
//! count) plus gateway knobs. Stored as `settings.json` in the data
//! directory; unknown or missing fields fall back to defaults so older files
//! keep loading.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::CoreResult;
use crate::fsutil;
use crate::types::{AspectRatio, ImageResolution, ModelTier};

/// Settings file name inside the data directory.
pub const SETTINGS_FILE: &str = "settings.json";

/// Current settings schema version.
pub const SETTINGS_VERSION: u32 = 1;

/// Scene count bounds for a generation run.
pub const MIN_SCENE_COUNT: u32 = 1;
pub const MAX_SCENE_COUNT: u32 = 20;

/// Default number of scenes per storyboard.
pub const DEFAULT_SCENE_COUNT: u32 = 10;

const DEFAULT_REQUEST_TIMEOUT_SEC: u64 = 60;
const MIN_REQUEST_TIMEOUT_SEC: u64 = 5;

/// Persisted defaults for generation runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppSettings {
    pub version: u32,
    pub model_tier: ModelTier,
    pub aspect_ratio: AspectRatio,
    pub resolution: ImageResolution,
    pub scene_count: u32,
    /// Per-request timeout applied to the provider HTTP client.
    pub request_timeout_sec: u64,
    /// Override for the provider base URL (tests, proxies).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            model_tier: ModelTier::default(),
            aspect_ratio: AspectRatio::default(),
            resolution: ImageResolution::default(),
            scene_count: DEFAULT_SCENE_COUNT,
            request_timeout_sec: DEFAULT_REQUEST_TIMEOUT_SEC,
            base_url: None,
        }
    }
}

impl AppSettings {
    /// Clamps out-of-range values in place.
    pub fn normalize(&mut self) {
        if self.scene_count < MIN_SCENE_COUNT {
            warn!(
                "Scene count {} below minimum, clamping to {}",
                self.scene_count, MIN_SCENE_COUNT
            );
            self.scene_count = MIN_SCENE_COUNT;
        }
        if self.scene_count > MAX_SCENE_COUNT {
            warn!(
                "Scene count {} above maximum, clamping to {}",
                self.scene_count, MAX_SCENE_COUNT
            );
            self.scene_count = MAX_SCENE_COUNT;
        }
        if self.request_timeout_sec < MIN_REQUEST_TIMEOUT_SEC {
            self.request_timeout_sec = MIN_REQUEST_TIMEOUT_SEC;
        }
        if let Some(url) = &self.base_url {
            if url.trim().is_empty() {
                self.base_url = None;
            }
        }
    }
}

/// Loads and saves `AppSettings` under a data directory.
pub struct SettingsManager {
    settings_path: PathBuf,
}

impl SettingsManager {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            settings_path: data_dir.as_ref().join(SETTINGS_FILE),
        }
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// Loads settings, falling back to defaults on a missing or unreadable
    /// file.
    pub fn load(&self) -> AppSettings {
        if !self.settings_path.exists() {
            info!("Settings file not found, using defaults");
            return AppSettings::default();
        }

        let loaded = std::fs::read_to_string(&self.settings_path)
            .map_err(|e| e.to_string())
            .and_then(|content| {
                serde_json::from_str::<AppSettings>(&content).map_err(|e| e.to_string())
            });

        match loaded {
            Ok(mut settings) => {
                settings.version = SETTINGS_VERSION;
                settings.normalize();
                settings
            }
            Err(e) => {
                warn!("Failed to load settings, using defaults: {}", e);
                AppSettings::default()
            }
        }
    }

    /// Normalizes and writes settings atomically, returning the stored form.
    pub fn save(&self, settings: &AppSettings) -> CoreResult<AppSettings> {
        let mut normalized = settings.clone();
        normalized.version = SETTINGS_VERSION;
        normalized.normalize();
        fsutil::atomic_write_json_pretty(&self.settings_path, &normalized)?;
        info!("Settings saved to {:?}", self.settings_path);
        Ok(normalized)
    }
}

/// Default data directory (`<platform data dir>/storyreel`), with a relative
/// fallback for sandboxed environments where no home is resolvable.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("storyreel"))
        .unwrap_or_else(|| PathBuf::from(".storyreel"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_normalized() {
        let mut settings = AppSettings::default();
        let before = settings.clone();
        settings.normalize();
        assert_eq!(settings, before);
        assert_eq!(settings.scene_count, DEFAULT_SCENE_COUNT);
        assert_eq!(settings.aspect_ratio, AspectRatio::Widescreen);
    }

    #[test]
    fn normalize_clamps_scene_count() {
        let mut settings = AppSettings {
            scene_count: 0,
            ..Default::default()
        };
        settings.normalize();
        assert_eq!(settings.scene_count, MIN_SCENE_COUNT);

        settings.scene_count = 99;
        settings.normalize();
        assert_eq!(settings.scene_count, MAX_SCENE_COUNT);
    }

    #[test]
    fn normalize_floors_timeout_and_drops_blank_url() {
        let mut settings = AppSettings {
            request_timeout_sec: 0,
            base_url: Some("   ".into()),
            ..Default::default()
        };
        settings.normalize();
        assert_eq!(settings.request_timeout_sec, MIN_REQUEST_TIMEOUT_SEC);
        assert_eq!(settings.base_url, None);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(dir.path());

        let settings = AppSettings {
            model_tier: ModelTier::Pro,
            resolution: ImageResolution::TwoK,
            scene_count: 5,
            ..Default::default()
        };
        manager.save(&settings).unwrap();

        let loaded = manager.load();
        assert_eq!(loaded.model_tier, ModelTier::Pro);
        assert_eq!(loaded.resolution, ImageResolution::TwoK);
        assert_eq!(loaded.scene_count, 5);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(dir.path());
        assert_eq!(manager.load(), AppSettings::default());
    }

    #[test]
    fn corrupt_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "12 nonsense }").unwrap();

        let manager = SettingsManager::new(dir.path());
        assert_eq!(manager.load(), AppSettings::default());
    }
}
