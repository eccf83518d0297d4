//! Configuration system for the Brigade server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/brigade-server/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;
use std::time::Duration;

use brigade_proto::codec::DEFAULT_MAX_FRAME_SIZE;
use brigade_proto::location::Coordinate;
use chrono::TimeDelta;

use crate::registry::{Geofence, PresencePolicy};

/// Errors that can occur when loading server configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A value parsed but makes no sense.
    #[error("invalid config value for {key}: {reason}")]
    Invalid {
        /// Offending key.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the server.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerConfigFile {
    server: ServerSection,
    presence: PresenceSection,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerSection {
    bind_addr: Option<String>,
    max_frame_size: Option<usize>,
    max_history: Option<usize>,
}

/// `[presence]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct PresenceSection {
    active_window_secs: Option<u64>,
    ttl_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
    geofence: Option<GeofenceSection>,
}

/// `[presence.geofence]` section. All three keys are required when present.
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize)]
pub struct GeofenceSection {
    /// Latitude of the fence centre.
    pub latitude: f64,
    /// Longitude of the fence centre.
    pub longitude: f64,
    /// Radius in kilometres.
    pub radius_km: f64,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Brigade presence and notification server")]
pub struct ServerCliArgs {
    /// Address to bind the server to.
    #[arg(short, long, env = "BRIGADE_BIND")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/brigade-server/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum push-channel frame size in bytes.
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Seconds a location report counts as active.
    #[arg(long)]
    pub active_window_secs: Option<u64>,

    /// Seconds after which a location report is dropped.
    #[arg(long)]
    pub ttl_secs: Option<u64>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "BRIGADE_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:8000`).
    pub bind_addr: String,
    /// Largest accepted push-channel frame in bytes.
    pub max_frame_size: usize,
    /// Number of chat messages kept in memory.
    pub max_history: usize,
    /// Seconds a report stays `active`.
    pub active_window_secs: u64,
    /// Seconds before a report is dropped.
    pub ttl_secs: u64,
    /// Seconds between expiry sweeps.
    pub sweep_interval_secs: u64,
    /// Optional geofence around the operations base.
    pub geofence: Option<GeofenceSection>,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_history: 1000,
            active_window_secs: 60,
            ttl_secs: 300,
            sweep_interval_secs: 30,
            geofence: None,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and a missing
    /// file is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or if the resolved values are inconsistent.
    pub fn load(cli: &ServerCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        let config = Self::resolve(cli, &file);
        config.validate()?;
        Ok(config)
    }

    /// Resolve a `ServerConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &ServerCliArgs, file: &ServerConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            max_frame_size: cli
                .max_frame_size
                .or(file.server.max_frame_size)
                .unwrap_or(defaults.max_frame_size),
            max_history: file.server.max_history.unwrap_or(defaults.max_history),
            active_window_secs: cli
                .active_window_secs
                .or(file.presence.active_window_secs)
                .unwrap_or(defaults.active_window_secs),
            ttl_secs: cli
                .ttl_secs
                .or(file.presence.ttl_secs)
                .unwrap_or(defaults.ttl_secs),
            sweep_interval_secs: file
                .presence
                .sweep_interval_secs
                .unwrap_or(defaults.sweep_interval_secs),
            geofence: file.presence.geofence,
            log_level: cli.log_level.clone(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl_secs < self.active_window_secs {
            return Err(ConfigError::Invalid {
                key: "presence.ttl_secs",
                reason: format!(
                    "{} is shorter than active_window_secs ({})",
                    self.ttl_secs, self.active_window_secs
                ),
            });
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "presence.sweep_interval_secs",
                reason: "must be at least 1".into(),
            });
        }
        if let Some(fence) = &self.geofence {
            let center = Coordinate::new(fence.latitude, fence.longitude);
            if !center.is_valid() || fence.radius_km <= 0.0 {
                return Err(ConfigError::Invalid {
                    key: "presence.geofence",
                    reason: format!("centre {center} radius {} km", fence.radius_km),
                });
            }
        }
        Ok(())
    }

    /// The presence policy these settings describe.
    #[must_use]
    pub fn presence_policy(&self) -> PresencePolicy {
        PresencePolicy {
            active_window: secs(self.active_window_secs),
            ttl: secs(self.ttl_secs),
            geofence: self.geofence.map(|g| Geofence {
                center: Coordinate::new(g.latitude, g.longitude),
                radius_km: g.radius_km,
            }),
        }
    }

    /// Interval between expiry sweeps.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn secs(value: u64) -> TimeDelta {
    TimeDelta::seconds(i64::try_from(value).unwrap_or(i64::MAX / 1000))
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the server.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<ServerConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ServerConfigFile::default());
        };
        config_dir.join("brigade-server").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
