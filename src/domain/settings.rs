use crate::domain::models::Rgb;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

/// Per-device session options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Address used when none is given on the command line
    #[serde(default)]
    pub address: Option<String>,
    /// Idle period after which the link is dropped; 0 keeps it open
    #[serde(default = "default_disconnect_delay_secs")]
    pub disconnect_delay_secs: u64,
    #[serde(default = "default_false")]
    pub reset: bool,
    /// Last color sent from the command line, replayed by brightness changes
    #[serde(default)]
    pub last_color: Option<Rgb>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            address: None,
            disconnect_delay_secs: default_disconnect_delay_secs(),
            reset: default_false(),
            last_color: None,
        }
    }
}

impl DeviceSettings {
    pub fn disconnect_delay(&self) -> Option<Duration> {
        match self.disconnect_delay_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            backoff_ms: default_retry_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    #[serde(default = "default_scan_timeout_secs")]
    pub scan_timeout_secs: u64,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            scan_timeout_secs: default_scan_timeout_secs(),
            connect_attempts: default_connect_attempts(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "bj_led".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}
fn default_disconnect_delay_secs() -> u64 {
    120
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    250
}
fn default_scan_timeout_secs() -> u64 {
    10
}
fn default_connect_attempts() -> u32 {
    4
}
fn default_connect_timeout_secs() -> u64 {
    20
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    #[serde(default)]
    pub device: DeviceSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    // Advanced BLE Settings
    #[serde(default)]
    pub transport: TransportSettings,
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load from an explicit file, falling back to defaults if it is missing or unreadable
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("BJLed");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn set_default_address(&mut self, address: &str) -> anyhow::Result<()> {
        if self.settings.device.address.as_deref() != Some(address) {
            self.settings.device.address = Some(address.to_string());
            self.save()?;
        }
        Ok(())
    }

    pub fn remember_color(&mut self, rgb: Rgb) -> anyhow::Result<()> {
        if self.settings.device.last_color != Some(rgb) {
            self.settings.device.last_color = Some(rgb);
            self.save()?;
        }
        Ok(())
    }
}
