//! Alert Channel Settings
//!
//! Operator notification preferences, persisted as JSON in the data dir.
//! Every update writes through to disk before it is visible in memory.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SETTINGS_FILE: &str = "alert-channel-settings.json";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to write settings to {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ============================================================================
// SETTINGS
// ============================================================================

/// Missing keys in a stored file take these defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertChannelSettings {
    pub email_enabled: bool,
    pub email_address: String,
    pub sms_enabled: bool,
    pub phone_number: String,
    pub alert_on_critical: bool,
    pub alert_on_high: bool,
    pub cooldown_minutes: u32,
}

impl Default for AlertChannelSettings {
    fn default() -> Self {
        Self {
            email_enabled: false,
            email_address: String::new(),
            sms_enabled: false,
            phone_number: String::new(),
            alert_on_critical: true,
            alert_on_high: false,
            cooldown_minutes: 5,
        }
    }
}

impl AlertChannelSettings {
    pub fn any_channel_enabled(&self) -> bool {
        self.email_enabled || self.sms_enabled
    }

    /// Email recipient, if the channel is enabled and addressed
    pub fn email_target(&self) -> Option<&str> {
        (self.email_enabled && !self.email_address.is_empty()).then_some(self.email_address.as_str())
    }

    /// SMS recipient, if the channel is enabled and addressed
    pub fn sms_target(&self) -> Option<&str> {
        (self.sms_enabled && !self.phone_number.is_empty()).then_some(self.phone_number.as_str())
    }

    pub fn apply(&mut self, patch: AlertSettingsPatch) {
        if let Some(v) = patch.email_enabled {
            self.email_enabled = v;
        }
        if let Some(v) = patch.email_address {
            self.email_address = v;
        }
        if let Some(v) = patch.sms_enabled {
            self.sms_enabled = v;
        }
        if let Some(v) = patch.phone_number {
            self.phone_number = v;
        }
        if let Some(v) = patch.alert_on_critical {
            self.alert_on_critical = v;
        }
        if let Some(v) = patch.alert_on_high {
            self.alert_on_high = v;
        }
        if let Some(v) = patch.cooldown_minutes {
            self.cooldown_minutes = v;
        }
    }
}

/// Partial update; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertSettingsPatch {
    pub email_enabled: Option<bool>,
    pub email_address: Option<String>,
    pub sms_enabled: Option<bool>,
    pub phone_number: Option<String>,
    pub alert_on_critical: Option<bool>,
    pub alert_on_high: Option<bool>,
    pub cooldown_minutes: Option<u32>,
}

// ============================================================================
// STORE
// ============================================================================

/// Owner of the settings; the only writer
pub struct SettingsStore {
    path: PathBuf,
    current: AlertChannelSettings,
}

impl SettingsStore {
    /// Load from `<dir>/alert-channel-settings.json`, falling back to defaults
    pub fn open(dir: &Path) -> Self {
        let path = dir.join(SETTINGS_FILE);
        let current = load_from_disk(&path);
        Self { path, current }
    }

    pub fn get(&self) -> &AlertChannelSettings {
        &self.current
    }

    /// Merge, persist, then publish. On a write failure memory is untouched.
    pub fn update(&mut self, patch: AlertSettingsPatch) -> Result<&AlertChannelSettings, SettingsError> {
        let mut updated = self.current.clone();
        updated.apply(patch);
        save_to_disk(&self.path, &updated)?;
        self.current = updated;
        Ok(&self.current)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn load_from_disk(path: &Path) -> AlertChannelSettings {
    if !path.exists() {
        return AlertChannelSettings::default();
    }

    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AlertChannelSettings>(&content) {
            Ok(settings) => {
                log::info!("[AlertChannels] Loaded settings from {}", path.display());
                settings
            }
            Err(e) => {
                log::warn!("[AlertChannels] Failed to parse {}: {}", path.display(), e);
                AlertChannelSettings::default()
            }
        },
        Err(e) => {
            log::warn!("[AlertChannels] Failed to read {}: {}", path.display(), e);
            AlertChannelSettings::default()
        }
    }
}

fn save_to_disk(path: &Path, settings: &AlertChannelSettings) -> Result<(), SettingsError> {
    let io_err = |source: std::io::Error| SettingsError::Io {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json).map_err(io_err)?;
    log::debug!("[AlertChannels] Saved settings to {}", path.display());
    Ok(())
}
