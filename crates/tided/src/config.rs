//! Daemon configuration.
//!
//! Loaded from `<config_dir>/tidewatch/config.toml`. A missing file yields
//! the defaults; an unreadable or invalid one is an error. Environment
//! variables override the file.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Default Unix socket path the hook script connects to.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/tidewatch.sock";

/// Default loopback TCP port (reached from remote hosts through `ssh -R`).
pub const DEFAULT_TCP_PORT: u16 = 12345;

pub const ENV_SOCKET: &str = "TIDE_SOCKET";
pub const ENV_TCP_PORT: &str = "TIDE_TCP_PORT";
pub const ENV_PROJECTS_ROOT: &str = "TIDE_PROJECTS_ROOT";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {var}: {value}")]
    Env { var: &'static str, value: String },
}

/// Remote (ssh) fetch settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// ssh `ConnectTimeout` per attempt, in seconds
    pub connect_timeout_secs: u64,
    pub max_attempts: u32,
    /// First retry delay; doubles after every failed attempt
    pub base_backoff_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            max_attempts: 3,
            base_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub tcp_port: u16,
    /// Root of Claude Code's per-project log directories
    pub projects_root: PathBuf,
    pub interrupt_poll_ms: u64,
    pub remote: RemoteConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            tcp_port: DEFAULT_TCP_PORT,
            projects_root: default_projects_root(),
            interrupt_poll_ms: 500,
            remote: RemoteConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Loads the config file (if any) and applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match default_config_path() {
            Some(path) => Self::load_from(&path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Loads from `path`, returning defaults when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let mut config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.socket_path = expand_tilde(&config.socket_path);
        config.projects_root = expand_tilde(&config.projects_root);
        Ok(config)
    }

    /// Applies overrides from a variable lookup (the process environment in production).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        if let Some(socket) = lookup(ENV_SOCKET).filter(|v| !v.is_empty()) {
            self.socket_path = expand_tilde(Path::new(&socket));
        }
        if let Some(port) = lookup(ENV_TCP_PORT).filter(|v| !v.is_empty()) {
            self.tcp_port = port.trim().parse().map_err(|_| ConfigError::Env {
                var: ENV_TCP_PORT,
                value: port.clone(),
            })?;
        }
        if let Some(root) = lookup(ENV_PROJECTS_ROOT).filter(|v| !v.is_empty()) {
            self.projects_root = expand_tilde(Path::new(&root));
        }
        Ok(())
    }

    /// The TCP listener address. Always loopback.
    pub fn tcp_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.tcp_port))
    }

    pub fn interrupt_poll(&self) -> Duration {
        Duration::from_millis(self.interrupt_poll_ms.max(1))
    }
}

/// `<config_dir>/tidewatch/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tidewatch").join("config.toml"))
}

/// `~/.claude/projects`
pub fn default_projects_root() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".claude").join("projects"))
        .unwrap_or_else(|| PathBuf::from(".claude/projects"))
}

/// Expands a leading `~` to the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/tidewatch.sock"));
        assert_eq!(config.tcp_port, 12345);
        assert_eq!(config.remote.max_attempts, 3);
        assert_eq!(config.remote.base_backoff_ms, 500);
        assert!(config.projects_root.ends_with(".claude/projects"));
        assert!(config.tcp_addr().ip().is_loopback());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = DaemonConfig::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, DaemonConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "tcp_port = 2222\n\n[remote]\nmax_attempts = 5\n").unwrap();

        let config = DaemonConfig::load_from(&path).unwrap();
        assert_eq!(config.tcp_port, 2222);
        assert_eq!(config.remote.max_attempts, 5);
        assert_eq!(config.remote.connect_timeout_secs, 5);
        assert_eq!(config.socket_path, PathBuf::from(DEFAULT_SOCKET_PATH));
    }

    #[test]
    fn test_invalid_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "tcp_port = \"not a number\"").unwrap();
        assert!(matches!(
            DaemonConfig::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_SOCKET, "/run/tide.sock"),
            (ENV_TCP_PORT, "4000"),
            (ENV_PROJECTS_ROOT, "/data/projects"),
        ]);
        let mut config = DaemonConfig::default();
        config
            .apply_env(|var| env.get(var).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.socket_path, PathBuf::from("/run/tide.sock"));
        assert_eq!(config.tcp_port, 4000);
        assert_eq!(config.projects_root, PathBuf::from("/data/projects"));
    }

    #[test]
    fn test_bad_env_port() {
        let mut config = DaemonConfig::default();
        let result = config.apply_env(|var| (var == ENV_TCP_PORT).then(|| "http".to_string()));
        assert!(matches!(result, Err(ConfigError::Env { .. })));
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde(Path::new("/abs")), PathBuf::from("/abs"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/x")), home.join("x"));
        }
    }
}
