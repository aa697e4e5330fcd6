//! Configuration management for the CDP relay

use crate::{Error, Result};
use serde::Deserialize;
use std::env;

/// Macro for parsing environment variables with type safety and consistent error handling
macro_rules! parse_env_var {
    ($config:ident, $field:ident, $env_var:expr, $ty:ty) => {
        if let Ok(value) = env::var($env_var) {
            $config.$field = value
                .parse::<$ty>()
                .map_err(|_| Error::configuration(concat!("Invalid ", $env_var)))?;
        }
    };

    ($config:ident, $field:ident, $env_var:expr) => {
        if let Ok(value) = env::var($env_var) {
            $config.$field = value;
        }
    };

    (opt $config:ident, $field:ident, $env_var:expr) => {
        if let Ok(value) = env::var($env_var) {
            $config.$field = Some(value);
        }
    };
}

/// Policy for commands that arrive while the extension link is `idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionWaitPolicy {
    /// Reject immediately with `ExtensionUnavailable`.
    RejectImmediately,
    /// Hold the client/command open for one grace interval, then fail.
    QueueWithGracePeriod,
}

impl Default for ExtensionWaitPolicy {
    fn default() -> Self {
        ExtensionWaitPolicy::RejectImmediately
    }
}

impl std::str::FromStr for ExtensionWaitPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "reject_immediately" => Ok(ExtensionWaitPolicy::RejectImmediately),
            "queue_with_grace_period" => Ok(ExtensionWaitPolicy::QueueWithGracePeriod),
            other => Err(Error::configuration(format!(
                "Invalid extension wait policy: {other}"
            ))),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Host address to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Optional bearer token required on `/cdp/*` and `/extension` handshakes.
    pub token: Option<String>,

    /// Kill a prior instance (probed via `/version`) before binding.
    pub replace: bool,

    /// Deadline, in seconds, for a command sent to the extension.
    pub extension_command_timeout_secs: u64,

    /// Grace interval, in seconds, before a queued command fails when the
    /// extension is idle (only used under `QueueWithGracePeriod`).
    pub extension_wait_grace_secs: u64,

    /// Policy applied to client commands that arrive while no extension is connected.
    pub extension_wait_policy: ExtensionWaitPolicy,

    /// Seconds a frozen target survives an extension disconnect before being dropped.
    pub target_freeze_timeout_secs: u64,

    /// Seconds to wait for a `final:true` recording marker before timing out `stopRecording`.
    pub recording_final_chunk_timeout_secs: u64,

    /// High-water mark, in bytes, for a client's outbound write buffer before it is dropped.
    pub client_backpressure_limit_bytes: usize,

    /// Log level (`RUST_LOG`-style directive), used when no `RUST_LOG` env var is set.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 19988,
            token: None,
            replace: false,
            extension_command_timeout_secs: 30,
            extension_wait_grace_secs: 10,
            extension_wait_policy: ExtensionWaitPolicy::RejectImmediately,
            target_freeze_timeout_secs: 30,
            recording_final_chunk_timeout_secs: 30,
            client_backpressure_limit_bytes: 16 * 1024 * 1024,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, layered on defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        parse_env_var!(config, host, "CDP_RELAY_HOST");
        parse_env_var!(config, port, "CDP_RELAY_PORT", u16);
        parse_env_var!(opt config, token, "CDP_RELAY_TOKEN");
        parse_env_var!(config, replace, "CDP_RELAY_REPLACE", bool);
        parse_env_var!(
            config,
            extension_command_timeout_secs,
            "CDP_RELAY_EXTENSION_TIMEOUT_SECS",
            u64
        );
        parse_env_var!(
            config,
            extension_wait_grace_secs,
            "CDP_RELAY_EXTENSION_GRACE_SECS",
            u64
        );
        if let Ok(value) = env::var("CDP_RELAY_EXTENSION_WAIT_POLICY") {
            config.extension_wait_policy = value.parse()?;
        }
        parse_env_var!(
            config,
            target_freeze_timeout_secs,
            "CDP_RELAY_TARGET_FREEZE_SECS",
            u64
        );
        parse_env_var!(
            config,
            recording_final_chunk_timeout_secs,
            "CDP_RELAY_RECORDING_TIMEOUT_SECS",
            u64
        );
        parse_env_var!(
            config,
            client_backpressure_limit_bytes,
            "CDP_RELAY_BACKPRESSURE_BYTES",
            usize
        );
        parse_env_var!(config, log_level, "CDP_RELAY_LOG_LEVEL");

        Ok(config)
    }

    /// Load configuration from a TOML file, layered on defaults for any
    /// field the file omits.
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::configuration(format!("Failed to read config file: {e}")))?;

        let partial: PartialConfig = toml::from_str(&content)
            .map_err(|e| Error::configuration(format!("Failed to parse config: {e}")))?;

        Ok(partial.apply_to(Config::default()))
    }

    /// The address to bind the HTTP/WebSocket listener to.
    pub fn bind_addr(&self) -> Result<std::net::SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(Error::from)
    }
}

/// Mirrors [`Config`] but with every field optional, so a TOML file may
/// specify only the settings it wants to override.
#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    host: Option<String>,
    port: Option<u16>,
    token: Option<String>,
    replace: Option<bool>,
    extension_command_timeout_secs: Option<u64>,
    extension_wait_grace_secs: Option<u64>,
    extension_wait_policy: Option<ExtensionWaitPolicy>,
    target_freeze_timeout_secs: Option<u64>,
    recording_final_chunk_timeout_secs: Option<u64>,
    client_backpressure_limit_bytes: Option<usize>,
    log_level: Option<String>,
}

impl PartialConfig {
    fn apply_to(self, mut base: Config) -> Config {
        if let Some(v) = self.host {
            base.host = v;
        }
        if let Some(v) = self.port {
            base.port = v;
        }
        if self.token.is_some() {
            base.token = self.token;
        }
        if let Some(v) = self.replace {
            base.replace = v;
        }
        if let Some(v) = self.extension_command_timeout_secs {
            base.extension_command_timeout_secs = v;
        }
        if let Some(v) = self.extension_wait_grace_secs {
            base.extension_wait_grace_secs = v;
        }
        if let Some(v) = self.extension_wait_policy {
            base.extension_wait_policy = v;
        }
        if let Some(v) = self.target_freeze_timeout_secs {
            base.target_freeze_timeout_secs = v;
        }
        if let Some(v) = self.recording_final_chunk_timeout_secs {
            base.recording_final_chunk_timeout_secs = v;
        }
        if let Some(v) = self.client_backpressure_limit_bytes {
            base.client_backpressure_limit_bytes = v;
        }
        if let Some(v) = self.log_level {
            base.log_level = v;
        }
        base
    }
}
