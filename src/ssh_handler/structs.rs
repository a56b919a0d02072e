use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use futures::channel::mpsc;
use uuid::Uuid;

use crate::access::AccessPolicy;
use crate::pack::{PackRelay, PackService};

/// Written to clients that ask for a shell.
pub const NO_SHELL_MSG: &[u8] =
    b"Successfully authenticated, but this server does not provide shell access";
/// Written for every refused exec request, whatever the reason.
pub const NO_ACCESS_MSG: &[u8] = b"request path does not exist, or you do not have access";

/// Accepts connections and hands each one a [`HandlerSSH`].
pub struct ServerSSH {
    pub(crate) relay: Arc<PackRelay>,
    pub(crate) access: Arc<dyn AccessPolicy>,
}

/// Per-connection handler; one relay per exec channel.
pub struct HandlerSSH {
    pub(crate) session: SshSession,
    pub(crate) state: SessionState,
    pub(crate) relay: Arc<PackRelay>,
    pub(crate) access: Arc<dyn AccessPolicy>,
    /// Client bytes bound for the running relay, closed on channel EOF.
    pub(crate) fd_in: Option<mpsc::Sender<io::Result<Bytes>>>,
}

#[derive(Debug, Clone)]
pub struct SshSession {
    pub id: Uuid,
    pub peer: Option<SocketAddr>,
    pub username: Option<String>,
    pub command: Option<String>,
    pub repository: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Rejected,
    CommandValidated,
    RepoRejected,
    Relaying,
    Closed,
}

/// What a channel request turns into once admission checks have run.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Admission {
    Reply(&'static [u8]),
    Relay {
        service: PackService,
        repository: PathBuf,
    },
}
