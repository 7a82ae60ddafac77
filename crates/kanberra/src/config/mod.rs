//! Configuration for kanberra contexts
//!
//! Three layers, lowest precedence first:
//!
//! - Built-in defaults ([`KanberraConfig::default`])
//! - The user's YAML file at `<config_dir>/kanberra/config.yaml`
//! - `KANBERRA_DRIVER` / `KANBERRA_DEVICE` from the environment, read once
//!   when a context is created
//!
//! # Usage
//!
//! ```ignore
//! use kanberra::config::{KanberraConfig, load_config, default_config_path};
//!
//! let config: KanberraConfig = load_config(&default_config_path());
//! let config = config.apply_env();
//! ```

mod io;
mod paths;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use io::{load_config, save_config};
pub use paths::{cache_file_path, default_config_path, machine_id, SearchPaths};

/// Environment variable overriding the driver selection
pub const DRIVER_ENV: &str = "KANBERRA_DRIVER";

/// Environment variable overriding the output device
pub const DEVICE_ENV: &str = "KANBERRA_DEVICE";

/// Theme used when nothing else names one, and the fallback theme searched
/// after the requested theme
pub const DEFAULT_THEME: &str = "freedesktop";

/// Output profile tried after the requested one
pub const DEFAULT_OUTPUT_PROFILE: &str = "stereo";

/// Default minimum time between two scans of the theme trees' mtimes
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 10;

/// Persistent lookup cache settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Disable to always resolve through the theme trees
    pub enabled: bool,
    /// Explicit cache file; the machine/target scoped default is used when unset
    pub path: Option<PathBuf>,
    /// Minimum seconds between theme-tree modification scans
    pub refresh_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
        }
    }
}

impl CacheSettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

/// Overrides for the XDG data search roots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchPathSettings {
    pub data_home: Option<PathBuf>,
    pub data_dirs: Option<Vec<PathBuf>>,
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KanberraConfig {
    /// Driver name or comma/colon separated preference list
    pub driver: Option<String>,
    /// Backend specific device string
    pub device: Option<String>,
    /// Default sound theme
    pub theme: Option<String>,
    /// Default output profile
    pub output_profile: Option<String>,
    pub cache: CacheSettings,
    pub search_paths: SearchPathSettings,
}

impl KanberraConfig {
    /// Load the user's configuration file (defaults if absent)
    pub fn load_default() -> Self {
        load_config(&default_config_path())
    }

    /// Apply `KANBERRA_DRIVER` / `KANBERRA_DEVICE` from the process environment
    pub fn apply_env(self) -> Self {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides through an arbitrary lookup function
    pub fn apply_env_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(driver) = lookup(DRIVER_ENV).filter(|s| !s.is_empty()) {
            log::debug!("Driver overridden by {}: {}", DRIVER_ENV, driver);
            self.driver = Some(driver);
        }
        if let Some(device) = lookup(DEVICE_ENV).filter(|s| !s.is_empty()) {
            log::debug!("Device overridden by {}: {}", DEVICE_ENV, device);
            self.device = Some(device);
        }
        self
    }

    pub fn with_driver(mut self, driver: &str) -> Self {
        self.driver = Some(driver.to_string());
        self
    }

    pub fn with_device(mut self, device: &str) -> Self {
        self.device = Some(device.to_string());
        self
    }

    pub fn with_theme(mut self, theme: &str) -> Self {
        self.theme = Some(theme.to_string());
        self
    }

    pub fn with_search_paths(mut self, data_home: Option<PathBuf>, data_dirs: Vec<PathBuf>) -> Self {
        self.search_paths = SearchPathSettings {
            data_home,
            data_dirs: Some(data_dirs),
        };
        self
    }

    pub fn with_cache_path(mut self, path: PathBuf) -> Self {
        self.cache.path = Some(path);
        self
    }

    pub fn with_cache_disabled(mut self) -> Self {
        self.cache.enabled = false;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.cache.refresh_interval_secs = interval.as_secs();
        self
    }

    /// Effective search roots: explicit overrides, else the XDG environment
    pub fn search_paths(&self) -> SearchPaths {
        let env = SearchPaths::from_env();
        SearchPaths {
            data_home: self.search_paths.data_home.clone().or(env.data_home),
            data_dirs: self
                .search_paths
                .data_dirs
                .clone()
                .unwrap_or(env.data_dirs),
        }
    }

    pub fn theme_name(&self) -> &str {
        self.theme.as_deref().unwrap_or(DEFAULT_THEME)
    }
}
