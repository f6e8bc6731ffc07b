use std::fs;

use chrono::Duration;
use serde::Deserialize;

const DEFAULT_SUBCONVERSATION_STALENESS_HOURS: i64 = 24;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub mls_enabled: bool,
    pub reset_enabled: bool,
    pub subconversation_staleness_hours: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mls_enabled: true,
            reset_enabled: false,
            subconversation_staleness_hours: DEFAULT_SUBCONVERSATION_STALENESS_HOURS,
        }
    }
}

impl Settings {
    pub fn subconversation_staleness(&self) -> Duration {
        Duration::hours(self.subconversation_staleness_hours)
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    mls_enabled: Option<bool>,
    reset_enabled: Option<bool>,
    subconversation_staleness_hours: Option<i64>,
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("group_lifecycle.toml") {
        if let Ok(file_cfg) = toml::from_str::<FileSettings>(&raw) {
            if let Some(v) = file_cfg.mls_enabled {
                settings.mls_enabled = v;
            }
            if let Some(v) = file_cfg.reset_enabled {
                settings.reset_enabled = v;
            }
            if let Some(v) = file_cfg.subconversation_staleness_hours {
                settings.subconversation_staleness_hours = v;
            }
        }
    }

    if let Ok(v) = std::env::var("APP__MLS_ENABLED") {
        if let Ok(parsed) = v.parse::<bool>() {
            settings.mls_enabled = parsed;
        }
    }
    if let Ok(v) = std::env::var("APP__RESET_ENABLED") {
        if let Ok(parsed) = v.parse::<bool>() {
            settings.reset_enabled = parsed;
        }
    }
    if let Ok(v) = std::env::var("APP__SUBCONVERSATION_STALENESS_HOURS") {
        if let Ok(parsed) = v.parse::<i64>() {
            settings.subconversation_staleness_hours = parsed;
        }
    }

    settings
}
