//! Configuration system for the Brigade client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/brigade/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use brigade_proto::location::Coordinate;
use url::Url;

use crate::location::LocationOptions;
use crate::poller::PollMode;
use crate::reporter::ReporterConfig;
use crate::session::SessionConfig;
use crate::transport::selector::ReconnectPolicy;

/// Errors that can occur when loading configuration.
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

    /// A server URL could not be parsed.
    #[error("invalid URL {url:?}: {source}")]
    InvalidUrl {
        /// The offending value.
        url: String,
        /// Parser error.
        source: url::ParseError,
    },

    /// No member identity was configured.
    #[error("no user id configured (use --user-id or [network] user_id)")]
    MissingUserId,

    /// A value was present but unusable.
    #[error("invalid value for {key}: {reason}")]
    Invalid {
        /// Config key.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    sync: SyncFileConfig,
    location: LocationFileConfig,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    server_url: Option<String>,
    ws_url: Option<String>,
    user_id: Option<String>,
    token: Option<String>,
    connect_timeout_secs: Option<u64>,
    handshake_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    event_buffer: Option<usize>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    reconnect_attempts: Option<u32>,
    reconnect_delay_ms: Option<u64>,
    presence_poll_secs: Option<u64>,
    poll_mode: Option<PollMode>,
    unread_poll_secs: Option<u64>,
}

/// `[location]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct LocationFileConfig {
    report_interval_secs: Option<u64>,
    fallback_latitude: Option<f64>,
    fallback_longitude: Option<f64>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    high_accuracy: Option<bool>,
    timeout_ms: Option<u64>,
    maximum_age_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Network --
    /// HTTP base URL of the Brigade server.
    pub server_url: String,
    /// Push endpoint. Derived from `server_url` when unset.
    pub ws_url: Option<String>,
    /// Member identity.
    pub user_id: Option<String>,
    /// Bearer token. Defaults to the user id.
    pub token: Option<String>,
    /// Timeout for opening the push channel.
    pub connect_timeout: Duration,
    /// Timeout for the push handshake acknowledgment.
    pub handshake_timeout: Duration,
    /// Timeout for each HTTP request.
    pub request_timeout: Duration,
    /// Capacity of the push event broadcast.
    pub event_buffer: usize,

    // -- Sync --
    /// Reconnect attempts after a lost or failed channel.
    pub reconnect_attempts: u32,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Presence poll cadence.
    pub presence_poll: Duration,
    /// Whether to poll always or only while the push channel is down.
    pub poll_mode: PollMode,
    /// Unread-count poll cadence.
    pub unread_poll: Duration,

    // -- Location --
    /// Re-send cadence for the latest fix.
    pub report_interval: Duration,
    /// Coordinate reported when no real fix is available.
    pub fallback: Coordinate,
    /// Fixed device position, if this client has no positioning hardware.
    pub fixed_position: Option<Coordinate>,
    /// Location service options.
    pub location_options: LocationOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let reporter = ReporterConfig::default();
        let reconnect = ReconnectPolicy::default();
        Self {
            server_url: "http://127.0.0.1:8000".to_string(),
            ws_url: None,
            user_id: None,
            token: None,
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            event_buffer: 256,
            reconnect_attempts: reconnect.max_attempts,
            reconnect_delay: reconnect.delay,
            presence_poll: Duration::from_secs(3),
            poll_mode: PollMode::Always,
            unread_poll: Duration::from_secs(10),
            report_interval: reporter.interval,
            fallback: reporter.fallback,
            fixed_position: None,
            location_options: reporter.options,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// Otherwise the default path (`~/.config/brigade/config.toml`) is tried
    /// and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let net = &file.network;
        let sync = &file.sync;
        let loc = &file.location;

        let fixed_latitude = cli.latitude.or(loc.latitude);
        let fixed_longitude = cli.longitude.or(loc.longitude);

        Self {
            server_url: cli
                .server_url
                .clone()
                .or_else(|| net.server_url.clone())
                .unwrap_or(defaults.server_url),
            ws_url: cli.ws_url.clone().or_else(|| net.ws_url.clone()),
            user_id: cli.user_id.clone().or_else(|| net.user_id.clone()),
            token: cli.token.clone().or_else(|| net.token.clone()),
            connect_timeout: net
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            handshake_timeout: net
                .handshake_timeout_secs
                .map_or(defaults.handshake_timeout, Duration::from_secs),
            request_timeout: net
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            event_buffer: net.event_buffer.unwrap_or(defaults.event_buffer),
            reconnect_attempts: sync
                .reconnect_attempts
                .unwrap_or(defaults.reconnect_attempts),
            reconnect_delay: sync
                .reconnect_delay_ms
                .map_or(defaults.reconnect_delay, Duration::from_millis),
            presence_poll: sync
                .presence_poll_secs
                .map_or(defaults.presence_poll, Duration::from_secs),
            poll_mode: cli.poll_mode.or(sync.poll_mode).unwrap_or(defaults.poll_mode),
            unread_poll: sync
                .unread_poll_secs
                .map_or(defaults.unread_poll, Duration::from_secs),
            report_interval: loc
                .report_interval_secs
                .map_or(defaults.report_interval, Duration::from_secs),
            fallback: Coordinate::new(
                loc.fallback_latitude.unwrap_or(defaults.fallback.latitude),
                loc.fallback_longitude.unwrap_or(defaults.fallback.longitude),
            ),
            fixed_position: fixed_latitude
                .zip(fixed_longitude)
                .map(|(lat, lon)| Coordinate::new(lat, lon)),
            location_options: LocationOptions {
                enable_high_accuracy: loc
                    .high_accuracy
                    .unwrap_or(defaults.location_options.enable_high_accuracy),
                timeout: loc
                    .timeout_ms
                    .map_or(defaults.location_options.timeout, Duration::from_millis),
                maximum_age: loc
                    .maximum_age_ms
                    .map_or(defaults.location_options.maximum_age, Duration::from_millis),
            },
        }
    }

    /// The push endpoint: `ws_url` if set, else `server_url` with its scheme
    /// switched to `ws`/`wss` and `/ws` appended to the path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`] if `server_url` does not parse and
    /// [`ConfigError::Invalid`] if its scheme is not `http` or `https`.
    pub fn push_endpoint(&self) -> Result<String, ConfigError> {
        if let Some(ws_url) = &self.ws_url {
            return Ok(ws_url.clone());
        }

        let mut url = parse_url(&self.server_url)?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => {
                return Err(ConfigError::Invalid {
                    key: "server_url",
                    reason: format!("unsupported scheme {other:?}"),
                });
            }
        };
        url.set_scheme(scheme).map_err(|()| ConfigError::Invalid {
            key: "server_url",
            reason: format!("cannot switch scheme to {scheme}"),
        })?;
        let path = format!("{}/ws", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.set_query(None);
        Ok(url.to_string())
    }

    /// Build a [`SessionConfig`] from this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingUserId`] if no (non-empty) user id is
    /// configured, or a URL error from [`Self::push_endpoint`].
    pub fn to_session_config(&self) -> Result<SessionConfig, ConfigError> {
        let user_id = self
            .user_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or(ConfigError::MissingUserId)?;
        if !self.fallback.is_valid() {
            return Err(ConfigError::Invalid {
                key: "location.fallback_latitude/fallback_longitude",
                reason: format!("{} is not a valid coordinate", self.fallback),
            });
        }
        for (key, cadence) in [
            ("sync.presence_poll_secs", self.presence_poll),
            ("sync.unread_poll_secs", self.unread_poll),
            ("location.report_interval_secs", self.report_interval),
        ] {
            if cadence.is_zero() {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid {
                key: "network.event_buffer",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(SessionConfig {
            token: self.token.clone().unwrap_or_else(|| user_id.clone()),
            user_id,
            server_url: parse_url(&self.server_url)?,
            ws_url: self.push_endpoint()?,
            connect_timeout: self.connect_timeout,
            handshake_timeout: self.handshake_timeout,
            request_timeout: self.request_timeout,
            event_buffer: self.event_buffer,
            reconnect: ReconnectPolicy {
                max_attempts: self.reconnect_attempts,
                delay: self.reconnect_delay,
            },
            presence_poll: self.presence_poll,
            poll_mode: self.poll_mode,
            unread_poll: self.unread_poll,
            reporter: ReporterConfig {
                interval: self.report_interval,
                fallback: self.fallback,
                options: self.location_options,
            },
        })
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Live presence and notification sync client")]
pub struct CliArgs {
    /// HTTP base URL of the Brigade server.
    #[arg(long, env = "BRIGADE_SERVER")]
    pub server_url: Option<String>,

    /// Push channel URL (default: derived from the server URL).
    #[arg(long, env = "BRIGADE_WS_URL")]
    pub ws_url: Option<String>,

    /// Your member identity.
    #[arg(long, env = "BRIGADE_USER")]
    pub user_id: Option<String>,

    /// Bearer token (default: the user id).
    #[arg(long, env = "BRIGADE_TOKEN")]
    pub token: Option<String>,

    /// Report a fixed latitude instead of using the fallback.
    #[arg(long, requires = "longitude", allow_hyphen_values = true)]
    pub latitude: Option<f64>,

    /// Report a fixed longitude instead of using the fallback.
    #[arg(long, requires = "latitude", allow_hyphen_values = true)]
    pub longitude: Option<f64>,

    /// When to poll presence over HTTP.
    #[arg(long, value_enum)]
    pub poll_mode: Option<PollMode>,

    /// Path to config file (default: `~/.config/brigade/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "BRIGADE_LOG")]
    pub log_level: String,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn parse_url(raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
        url: raw.to_string(),
        source,
    })
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("brigade").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
