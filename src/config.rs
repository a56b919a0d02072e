//! Server configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pack::{PackRelay, DEFAULT_CHUNK_SIZE};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Directory that repository paths are resolved under.
    pub repo_root: PathBuf,
    /// Program invoked as `<program> upload-pack|receive-pack ...`.
    pub git_program: PathBuf,
    /// Extra arguments given to the program before the pack subcommand.
    pub git_args: Vec<String>,
    /// Largest chunk read from a backend at once.
    pub chunk_size: usize,
    pub http: HttpConfig,
    pub ssh: SshConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub listen: SocketAddr,
    /// Wall-clock limit for a whole pack exchange request.
    pub body_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SshConfig {
    pub enabled: bool,
    pub listen: SocketAddr,
    pub host_keys: Vec<PathBuf>,
    pub inactivity_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repo_root: PathBuf::from("./repos"),
            git_program: PathBuf::from("git"),
            git_args: Vec::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            http: HttpConfig::default(),
            ssh: SshConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            body_timeout_secs: 60,
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: SocketAddr::from(([0, 0, 0, 0], 2222)),
            host_keys: Vec::new(),
            inactivity_timeout_secs: 3600,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Loads a YAML config file. A missing file yields the defaults.
    pub fn load_yaml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be positive".into()));
        }
        if self.http.body_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "http.body_timeout_secs must be positive".into(),
            ));
        }
        if self.ssh.enabled && self.ssh.host_keys.is_empty() {
            return Err(ConfigError::Invalid(
                "ssh is enabled but no ssh.host_keys are configured".into(),
            ));
        }
        Ok(())
    }

    pub fn relay(&self) -> PackRelay {
        PackRelay::new(self.git_program.as_os_str(), self.chunk_size).with_args(&self.git_args)
    }

    pub fn body_timeout(&self) -> Duration {
        Duration::from_secs(self.http.body_timeout_secs)
    }
}
