//! Error types for the pack relay and its configuration.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while relaying a pack exchange.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The requested service is neither upload-pack nor receive-pack.
    #[error("invalid pack service: {0:?}")]
    InvalidService(String),

    /// The backend program could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The backend exited non-zero. `exit_code` is -1 when it was killed by a signal.
    #[error("backend exited with code {exit_code}: {}", String::from_utf8_lossy(.stderr).trim_end())]
    Backend { exit_code: i32, stderr: Vec<u8> },

    /// The client's inbound byte stream failed.
    #[error("inbound stream error: {0}")]
    Inbound(#[source] std::io::Error),

    /// Reading or writing a backend pipe failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The relay was torn down before the backend finished.
    #[error("relay cancelled")]
    Cancelled,
}

impl RelayError {
    /// True for failures detected before the backend was started.
    pub fn is_invocation(&self) -> bool {
        matches!(self, RelayError::InvalidService(_) | RelayError::Spawn { .. })
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised while starting a transport.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to load host key {path}: {source}")]
    HostKey {
        path: PathBuf,
        #[source]
        source: russh::keys::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
