//! Config file discovery, merging, and environment overrides.

use crate::{ConfigError, DiscoveryConfig, HandshakeConfig, IdentifyDefaults, NsqClientConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Records where configuration values actually came from, for diagnostics.
#[derive(Debug, Default, Clone)]
pub struct ConfigSources {
    pub files: Vec<PathBuf>,
    pub env_overrides: Vec<String>,
}

/// Returns the config files that exist, in increasing-precedence order.
///
/// `override_path`, if given, replaces the `./nsq-client.toml` slot rather
/// than adding to it — an explicit path is a deliberate substitution, not an
/// additional layer.
pub fn discover_config_files_with_override(override_path: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::new();

    let system_path = PathBuf::from("/etc/nsq-client/config.toml");
    if system_path.exists() {
        paths.push(system_path);
    }

    if let Some(dirs) = directories::ProjectDirs::from("", "", "nsq-client") {
        let user_path = dirs.config_dir().join("config.toml");
        if user_path.exists() {
            paths.push(user_path);
        }
    }

    match override_path {
        Some(path) => {
            if path.exists() {
                paths.push(path.to_path_buf());
            }
        }
        None => {
            let local_path = PathBuf::from("./nsq-client.toml");
            if local_path.exists() {
                paths.push(local_path);
            }
        }
    }

    paths
}

pub fn load_from_file(path: &Path) -> Result<NsqClientConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_toml(path, &text)
}

pub fn parse_toml(path: &Path, text: &str) -> Result<NsqClientConfig, ConfigError> {
    toml::from_str(text).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// A config file's sections, each present only if the file text actually
/// named it. Unlike `NsqClientConfig` itself (whose fields always deserialize
/// to a `Default` when a section is missing), this is what lets
/// `merge_configs` tell "the file set this section" apart from "the file
/// didn't mention it" — serde leaves an absent `Option<T>` field as `None`
/// without needing an explicit `#[serde(default)]`.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigOverlay {
    identify: Option<IdentifyDefaults>,
    handshake: Option<HandshakeConfig>,
    discovery: Option<DiscoveryConfig>,
}

pub fn load_overlay_from_file(path: &Path) -> Result<ConfigOverlay, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_overlay(path, &text)
}

pub fn parse_overlay(path: &Path, text: &str) -> Result<ConfigOverlay, ConfigError> {
    toml::from_str(text).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Merge `overlay` onto `base`, replacing only the sections `overlay` actually
/// declared. A later file that only names `[handshake]` leaves `base`'s
/// `identify`/`discovery` untouched rather than stomping them with that
/// section's compiled defaults.
pub fn merge_configs(base: NsqClientConfig, overlay: ConfigOverlay) -> NsqClientConfig {
    NsqClientConfig {
        identify: overlay.identify.unwrap_or(base.identify),
        handshake: overlay.handshake.unwrap_or(base.handshake),
        discovery: overlay.discovery.unwrap_or(base.discovery),
    }
}

/// Apply `NSQ_CLIENT_*` environment variable overrides on top of file config.
pub fn apply_env_overrides(config: &mut NsqClientConfig, sources: &mut ConfigSources) {
    apply_env_string("NSQ_CLIENT_CLIENT_ID", sources, |v| {
        config.identify.client_id = v;
    });
    apply_env_string("NSQ_CLIENT_USER_AGENT", sources, |v| {
        config.identify.user_agent = v;
    });
    apply_env_u32("NSQ_CLIENT_HEARTBEAT_INTERVAL_MS", sources, |v| {
        config.identify.heartbeat_interval_ms = v;
    });
    apply_env_u32("NSQ_CLIENT_OUTPUT_BUFFER_SIZE", sources, |v| {
        config.identify.output_buffer_size = v;
    });
    apply_env_u32("NSQ_CLIENT_OUTPUT_BUFFER_TIMEOUT_MS", sources, |v| {
        config.identify.output_buffer_timeout_ms = v;
    });
    apply_env_u32("NSQ_CLIENT_DIAL_TIMEOUT_MS", sources, |v| {
        config.handshake.dial_timeout_ms = v;
    });
    apply_env_u32("NSQ_CLIENT_IDENTIFY_TIMEOUT_MS", sources, |v| {
        config.handshake.identify_timeout_ms = v;
    });
    apply_env_u32("NSQ_CLIENT_DISCOVERY_POLL_INTERVAL_SECS", sources, |v| {
        config.discovery.poll_interval_secs = v;
    });
}

fn apply_env_string(key: &str, sources: &mut ConfigSources, set: impl FnOnce(String)) {
    if let Ok(value) = std::env::var(key) {
        set(value);
        sources.env_overrides.push(key.to_string());
    }
}

fn apply_env_u32(key: &str, sources: &mut ConfigSources, set: impl FnOnce(u32)) {
    if let Ok(value) = std::env::var(key) {
        if let Ok(parsed) = value.parse::<u32>() {
            set(parsed);
            sources.env_overrides.push(key.to_string());
        }
    }
}

/// Expand a leading `~` to the current user's home directory.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = directories::UserDirs::new() {
            return home.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_minimal_toml() {
        let path = Path::new("nsq-client.toml");
        let text = "[identify]\nclient_id = \"worker-1\"\n";
        let config = parse_toml(path, text).unwrap();
        assert_eq!(config.identify.client_id, "worker-1");
        assert_eq!(config.identify.heartbeat_interval_ms, 30_000);
    }

    #[test]
    fn rejects_malformed_toml() {
        let path = Path::new("nsq-client.toml");
        let err = parse_toml(path, "not valid = [[[").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn load_from_file_reads_and_parses() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[handshake]\ndial_timeout_ms = 9000").unwrap();
        let config = load_from_file(file.path()).unwrap();
        assert_eq!(config.handshake.dial_timeout_ms, 9000);
    }

    #[test]
    fn env_override_replaces_client_id() {
        std::env::set_var("NSQ_CLIENT_CLIENT_ID", "env-worker");
        let mut config = NsqClientConfig::default();
        let mut sources = ConfigSources::default();
        apply_env_overrides(&mut config, &mut sources);
        assert_eq!(config.identify.client_id, "env-worker");
        assert!(sources
            .env_overrides
            .contains(&"NSQ_CLIENT_CLIENT_ID".to_string()));
        std::env::remove_var("NSQ_CLIENT_CLIENT_ID");
    }

    #[test]
    fn merge_configs_only_replaces_sections_the_overlay_names() {
        let mut base = NsqClientConfig::default();
        base.identify.client_id = "system-worker".to_string();
        base.discovery.poll_interval_secs = 60;

        let overlay = parse_overlay(
            Path::new("nsq-client.toml"),
            "[handshake]\ndial_timeout_ms = 9000\n",
        )
        .unwrap();
        let merged = merge_configs(base, overlay);

        assert_eq!(merged.handshake.dial_timeout_ms, 9000);
        // Sections the overlay didn't mention must survive from `base`
        // rather than being stomped by this section's compiled defaults.
        assert_eq!(merged.identify.client_id, "system-worker");
        assert_eq!(merged.discovery.poll_interval_secs, 60);
    }

    #[test]
    fn expand_path_leaves_absolute_paths_untouched() {
        assert_eq!(expand_path("/etc/nsq-client/config.toml"), PathBuf::from("/etc/nsq-client/config.toml"));
    }
}
