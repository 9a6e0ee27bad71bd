//! Configuration management for roadmate.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::store::Role;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "roadmate";

/// Default shared database file name.
const DATABASE_FILE_NAME: &str = "trip.db";

/// Environment variable prefix.
const ENV_PREFIX: &str = "ROADMATE_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `ROADMATE_`, sections separated
///    by `__`, e.g. `ROADMATE_DEVICE__USER`)
/// 2. TOML config file at `~/.config/roadmate/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// This device.
    pub device: DeviceConfig,
    /// The trip definition and its members.
    pub trip: TripConfig,
    /// Telemetry and notification timing.
    pub navigation: NavigationConfig,
    /// Remote document store.
    pub sync: SyncConfig,
}

/// Device identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Driver or passenger console.
    pub role: Role,
    /// Who is using this device. Sender of user notifications.
    pub user: String,
}

/// Trip definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TripConfig {
    /// JSON trip file. The builtin trip is used when unset.
    pub file: Option<PathBuf>,
    /// People who can pay for things.
    pub members: Vec<String>,
}

/// Navigation tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    /// Speed used to project ETAs, in km/h.
    pub planning_speed_kmh: f64,
    /// How long a notification stays up before it is cleared, in seconds.
    pub notification_display_secs: u64,
    /// Movement that counts as a route change, in metres.
    pub route_refresh_threshold_m: f64,
}

/// Which document store backs replication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncBackend {
    /// In-process only. Nothing is shared with other processes.
    Memory,
    /// A SQLite file shared by every process on the host.
    #[default]
    Sqlite,
}

impl std::fmt::Display for SyncBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Replication settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Broker implementation.
    pub backend: SyncBackend,
    /// Path to the shared database.
    /// Defaults to `~/.local/share/roadmate/trip.db`
    pub database_path: Option<PathBuf>,
    /// How often the SQLite broker checks for changes, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            role: Role::Driver,
            user: "Taro".to_string(),
        }
    }
}

impl Default for TripConfig {
    fn default() -> Self {
        Self {
            file: None,
            members: default_members(),
        }
    }
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            planning_speed_kmh: 80.0,
            notification_display_secs: 6,
            route_refresh_threshold_m: 50.0,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backend: SyncBackend::Sqlite,
            database_path: None, // Will be resolved to default at runtime
            poll_interval_ms: 500,
        }
    }
}

/// Default payer set for the builtin trip.
fn default_members() -> Vec<String> {
    vec![
        "Taro".to_string(),
        "Hanako".to_string(),
        "Kenji".to_string(),
        "Yuki".to_string(),
    ]
}

impl NavigationConfig {
    /// Notification display time as a Duration.
    #[must_use]
    pub fn notification_display(&self) -> Duration {
        Duration::from_secs(self.notification_display_secs)
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. TOML config file (if exists)
    /// 3. Environment variables (prefixed with `ROADMATE_`)
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.device.user.trim().is_empty() {
            return Err(invalid("device.user must not be empty"));
        }

        if self.trip.members.is_empty() {
            return Err(invalid("trip.members must list at least one member"));
        }
        for (i, member) in self.trip.members.iter().enumerate() {
            if member.trim().is_empty() {
                return Err(invalid("trip.members must not contain empty names"));
            }
            if self.trip.members[..i].contains(member) {
                return Err(invalid(format!("duplicate member '{member}'")));
            }
        }

        let speed = self.navigation.planning_speed_kmh;
        if !(speed.is_finite() && speed > 0.0) {
            return Err(invalid(format!(
                "planning_speed_kmh must be positive (got {speed})"
            )));
        }

        if self.navigation.notification_display_secs == 0 {
            return Err(invalid("notification_display_secs must be greater than 0"));
        }

        let threshold = self.navigation.route_refresh_threshold_m;
        if !(threshold.is_finite() && threshold >= 0.0) {
            return Err(invalid(format!(
                "route_refresh_threshold_m must be non-negative (got {threshold})"
            )));
        }

        if self.sync.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms must be greater than 0"));
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.sync
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the poll interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.sync.poll_interval_ms)
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ConfigValidation {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.device.role, Role::Driver);
        assert_eq!(config.device.user, "Taro");
        assert!(config.trip.file.is_none());
        assert_eq!(config.trip.members.len(), 4);
        assert_eq!(config.sync.backend, SyncBackend::Sqlite);
    }

    #[test]
    fn test_default_navigation_config() {
        let navigation = NavigationConfig::default();

        assert!((navigation.planning_speed_kmh - 80.0).abs() < f64::EPSILON);
        assert_eq!(navigation.notification_display_secs, 6);
        assert!((navigation.route_refresh_threshold_m - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_default_sync_config() {
        let sync = SyncConfig::default();

        assert!(sync.database_path.is_none());
        assert_eq!(sync.poll_interval_ms, 500);
    }

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_user() {
        let mut config = Config::default();
        config.device.user = "  ".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("device.user"));
    }

    #[test]
    fn test_validate_no_members() {
        let mut config = Config::default();
        config.trip.members.clear();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("trip.members"));
    }

    #[test]
    fn test_validate_duplicate_member() {
        let mut config = Config::default();
        config.trip.members.push("Taro".to_string());

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("duplicate member 'Taro'"));
    }

    #[test]
    fn test_validate_planning_speed() {
        let mut config = Config::default();
        config.navigation.planning_speed_kmh = 0.0;
        assert!(config.validate().is_err());

        config.navigation.planning_speed_kmh = f64::NAN;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("planning_speed_kmh"));
    }

    #[test]
    fn test_validate_zero_display_time() {
        let mut config = Config::default();
        config.navigation.notification_display_secs = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("notification_display_secs"));
    }

    #[test]
    fn test_validate_negative_threshold() {
        let mut config = Config::default();
        config.navigation.route_refresh_threshold_m = -1.0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("route_refresh_threshold_m"));
    }

    #[test]
    fn test_validate_zero_poll_interval() {
        let mut config = Config::default();
        config.sync.poll_interval_ms = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("poll_interval_ms"));
    }

    #[test]
    fn test_database_path_default() {
        let config = Config::default();
        let path = config.database_path();

        assert!(path.to_string_lossy().contains("trip.db"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = Config::default();
        config.sync.database_path = Some(PathBuf::from("/custom/path/trip.sqlite"));

        assert_eq!(
            config.database_path(),
            PathBuf::from("/custom/path/trip.sqlite")
        );
    }

    #[test]
    fn test_durations() {
        let config = Config::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.navigation.notification_display(), Duration::from_secs(6));
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("roadmate"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_default_data_dir() {
        let path = Config::default_data_dir();
        assert!(path.to_string_lossy().contains("roadmate"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        // Loading from a nonexistent path should work (uses defaults)
        let result = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml")));
        assert!(result.is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let path = std::env::temp_dir().join(format!("roadmate-config-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[device]
role = "passenger"
user = "Hanako"

[navigation]
planning_speed_kmh = 60.0

[sync]
backend = "memory"
"#
        )
        .unwrap();
        drop(file);

        let config = Config::load_from(Some(path.clone())).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.device.role, Role::Passenger);
        assert_eq!(config.device.user, "Hanako");
        assert!((config.navigation.planning_speed_kmh - 60.0).abs() < f64::EPSILON);
        assert_eq!(config.sync.backend, SyncBackend::Memory);
        // Untouched sections keep their defaults.
        assert_eq!(config.trip.members.len(), 4);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let path = std::env::temp_dir().join(format!("roadmate-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "[sync]\npoll_interval_ms = 0\n").unwrap();

        let result = Config::load_from(Some(path.clone()));
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(result, Err(Error::ConfigValidation { .. })));
    }

    #[test]
    fn test_sync_backend_serde() {
        let sync: SyncConfig = serde_json::from_str(r#"{"backend": "memory"}"#).unwrap();
        assert_eq!(sync.backend, SyncBackend::Memory);
        assert_eq!(SyncBackend::Sqlite.to_string(), "sqlite");
    }

    #[test]
    fn test_config_serialize() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(json.contains("planning_speed_kmh"));
        assert!(json.contains("\"role\":\"driver\""));
    }
}
