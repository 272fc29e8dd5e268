//! Layered configuration loading for the NSQ client.
//!
//! This crate loads the *default* identify options and handshake tuning that
//! seed a `nsq_client::Client`/`Reader`. It is deliberately narrow: the
//! per-call arguments a caller passes to `Client::new` —
//! `lookupd_http_addresses`, `nsqd_tcp_addresses`, `topic`, `channel` — are
//! never sourced from here. Those are the caller's business; this crate only
//! supplies the defaults that make sense to centralize (client identity,
//! heartbeat interval, handshake timeouts).
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/nsq-client/config.toml` (system)
//! 2. `~/.config/nsq-client/config.toml` (user)
//! 3. `./nsq-client.toml` (local override)
//! 4. Environment variables (`NSQ_CLIENT_*`)
//!
//! # Example Config
//!
//! ```toml
//! [identify]
//! client_id = "order-processor"
//! user_agent = "my-app/1.0"
//! heartbeat_interval_ms = 30000
//! output_buffer_size = 16384
//! output_buffer_timeout_ms = 250
//!
//! [handshake]
//! dial_timeout_ms = 5000
//! identify_timeout_ms = 5000
//!
//! [discovery]
//! poll_interval_secs = 60
//! ```

pub mod loader;

pub use loader::ConfigSources;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Default values used when establishing the NSQ `IDENTIFY` handshake.
///
/// These seed `nsq_proto::IdentifyOptions`; a caller may still override any
/// field on the options struct it actually constructs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentifyDefaults {
    /// Default: hostname, or "nsq-client" if it cannot be determined.
    #[serde(default = "IdentifyDefaults::default_client_id")]
    pub client_id: String,

    /// Default: `nsq-client/<crate version>`.
    #[serde(default = "IdentifyDefaults::default_user_agent")]
    pub user_agent: String,

    /// Milliseconds between broker heartbeats. Default: 30000.
    #[serde(default = "IdentifyDefaults::default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u32,

    /// Broker-side output buffer size in bytes. Default: 16384.
    #[serde(default = "IdentifyDefaults::default_output_buffer_size")]
    pub output_buffer_size: u32,

    /// Broker-side output buffer flush timeout in milliseconds. Default: 250.
    #[serde(default = "IdentifyDefaults::default_output_buffer_timeout_ms")]
    pub output_buffer_timeout_ms: u32,
}

impl IdentifyDefaults {
    fn default_client_id() -> String {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "nsq-client".to_string())
    }

    fn default_user_agent() -> String {
        format!("nsq-client/{}", env!("CARGO_PKG_VERSION"))
    }

    fn default_heartbeat_interval_ms() -> u32 {
        30_000
    }

    fn default_output_buffer_size() -> u32 {
        16_384
    }

    fn default_output_buffer_timeout_ms() -> u32 {
        250
    }
}

impl Default for IdentifyDefaults {
    fn default() -> Self {
        Self {
            client_id: Self::default_client_id(),
            user_agent: Self::default_user_agent(),
            heartbeat_interval_ms: Self::default_heartbeat_interval_ms(),
            output_buffer_size: Self::default_output_buffer_size(),
            output_buffer_timeout_ms: Self::default_output_buffer_timeout_ms(),
        }
    }
}

/// Timeouts governing the TCP dial and `IDENTIFY` handshake for a single
/// `Connection::open()` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandshakeConfig {
    /// Default: 5000.
    #[serde(default = "HandshakeConfig::default_dial_timeout_ms")]
    pub dial_timeout_ms: u32,

    /// Default: 5000.
    #[serde(default = "HandshakeConfig::default_identify_timeout_ms")]
    pub identify_timeout_ms: u32,
}

impl HandshakeConfig {
    fn default_dial_timeout_ms() -> u32 {
        5_000
    }

    fn default_identify_timeout_ms() -> u32 {
        5_000
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            dial_timeout_ms: Self::default_dial_timeout_ms(),
            identify_timeout_ms: Self::default_identify_timeout_ms(),
        }
    }
}

/// Discovery polling configuration. `poll_interval_secs = 0` means
/// "construction-time lookup only" (spec.md §9's default, and the
/// behavior of the original source) — no periodic sweep is scheduled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub poll_interval_secs: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 0,
        }
    }
}

/// Complete nsq-client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct NsqClientConfig {
    #[serde(default)]
    pub identify: IdentifyDefaults,
    #[serde(default)]
    pub handshake: HandshakeConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

impl NsqClientConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/nsq-client/config.toml`
    /// 3. `~/.config/nsq-client/config.toml`
    /// 4. `./nsq-client.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    ///
    /// If `config_path` is provided, it takes precedence over the local
    /// `./nsq-client.toml` override. System and user configs still load first.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and return information about where values came from.
    pub fn load_with_sources() -> Result<(Self, ConfigSources), ConfigError> {
        Self::load_with_sources_from(None)
    }

    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = NsqClientConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let overlay = loader::load_overlay_from_file(&path)?;
            config = loader::merge_configs(config, overlay);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}
