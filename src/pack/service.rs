use std::fmt;
use std::str::FromStr;

use crate::error::RelayError;

/// Direction of a pack exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackService {
    /// Server to client object transfer (fetch, clone).
    UploadPack,
    /// Client to server object transfer (push).
    ReceivePack,
}

impl PackService {
    /// The service name as clients spell it, e.g. `git-upload-pack`.
    pub fn as_str(&self) -> &'static str {
        match self {
            PackService::UploadPack => "git-upload-pack",
            PackService::ReceivePack => "git-receive-pack",
        }
    }

    /// The `git` subcommand that serves this direction.
    pub fn subcommand(&self) -> &'static str {
        match self {
            PackService::UploadPack => "upload-pack",
            PackService::ReceivePack => "receive-pack",
        }
    }

    /// Maps a bare subcommand (`upload-pack`) as it appears in SSH exec
    /// commands.
    pub fn from_subcommand(name: &str) -> Option<Self> {
        match name {
            "upload-pack" => Some(PackService::UploadPack),
            "receive-pack" => Some(PackService::ReceivePack),
            _ => None,
        }
    }

    pub fn advertisement_content_type(&self) -> String {
        format!("application/x-{}-advertisement", self.as_str())
    }

    pub fn result_content_type(&self) -> String {
        format!("application/x-{}-result", self.as_str())
    }
}

/// Only the `git-` service names are accepted.
impl FromStr for PackService {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "git-upload-pack" => Ok(PackService::UploadPack),
            "git-receive-pack" => Ok(PackService::ReceivePack),
            other => Err(RelayError::InvalidService(other.to_string())),
        }
    }
}

impl fmt::Display for PackService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
