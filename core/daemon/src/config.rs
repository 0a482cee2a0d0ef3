//! Runtime configuration for the daemon.
//!
//! Loaded from `~/.parksentry/daemon/config.toml`; a missing file means full
//! defaults. The config mostly names the helper commands that bridge to the
//! platform:
//!
//! ```toml
//! [location]
//! fix_command = ["where-am-i"]          # prints "<lat> <lng>"; exit 77 = no permission
//! fix_timeout_ms = 8000
//! last_fix_file = "/home/me/.parksentry/last-fix"
//!
//! [geofence]
//! command = ["parksentry-geofence"]     # register <id> <lat> <lng> <radius> | deregister <id>
//!
//! [motion]
//! command = ["parksentry-motion"]       # start <interval_ms> | stop
//! interval_ms = 5000
//!
//! [notify]
//! command = ["notify-send"]
//! ```

use serde::Deserialize;
use std::path::PathBuf;

const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".parksentry/daemon/config.toml";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub geofence: GeofenceConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    #[serde(default)]
    pub fix_command: Option<Vec<String>>,
    #[serde(default = "default_fix_timeout_ms")]
    pub fix_timeout_ms: u64,
    #[serde(default)]
    pub last_fix_file: Option<PathBuf>,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            fix_command: None,
            fix_timeout_ms: default_fix_timeout_ms(),
            last_fix_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct GeofenceConfig {
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MotionConfig {
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default = "default_motion_interval_ms")]
    pub interval_ms: u64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            command: None,
            interval_ms: default_motion_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_notify_command")]
    pub command: Vec<String>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            command: default_notify_command(),
        }
    }
}

fn default_fix_timeout_ms() -> u64 {
    8_000
}

fn default_motion_interval_ms() -> u64 {
    5_000
}

fn default_notify_command() -> Vec<String> {
    vec!["notify-send".to_string()]
}

fn default_config_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

pub fn load_runtime_config(path: Option<PathBuf>) -> Result<RuntimeConfig, String> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(RuntimeConfig::default());
    }

    let content = fs_err::read_to_string(&config_path)
        .map_err(|err| format!("Failed to read config {}: {}", config_path.display(), err))?;
    toml::from_str::<RuntimeConfig>(&content)
        .map_err(|err| format!("Failed to parse config {}: {}", config_path.display(), err))
}
