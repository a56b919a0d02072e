//! Admission checks and repository resolution.

use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

/// Decides who may use the relay and which repository a request maps to.
///
/// All checks run before a backend is spawned. The defaults admit everyone.
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    fn peer_allowed(&self, _peer: Option<SocketAddr>) -> bool {
        true
    }

    fn username_valid(&self, _username: &str) -> bool {
        true
    }

    /// Maps a client-supplied repository path to a directory on disk, or
    /// `None` when it does not exist or `username` may not use it.
    async fn resolve_repository(&self, requested: &str, username: &str) -> Option<PathBuf>;
}

/// Serves every existing repository below a root directory.
#[derive(Debug, Clone)]
pub struct RootedAccess {
    root: PathBuf,
}

impl RootedAccess {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves `requested` under the root and checks that it exists.
    pub async fn locate(&self, requested: &str) -> Option<PathBuf> {
        let path = join_under_root(&self.root, requested)?;
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Some(path),
            _ => None,
        }
    }
}

#[async_trait]
impl AccessPolicy for RootedAccess {
    async fn resolve_repository(&self, requested: &str, _username: &str) -> Option<PathBuf> {
        self.locate(requested).await
    }
}

/// Joins a client path under `root`. Leading slashes are dropped; paths that
/// are empty or contain `..` are refused.
pub fn join_under_root(root: &Path, requested: &str) -> Option<PathBuf> {
    let relative = Path::new(requested.trim_start_matches('/'));
    let mut joined = root.to_path_buf();
    let mut segments = 0;
    for component in relative.components() {
        match component {
            Component::Normal(segment) => {
                joined.push(segment);
                segments += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (segments > 0).then_some(joined)
}
