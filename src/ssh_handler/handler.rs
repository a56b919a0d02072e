use std::net::SocketAddr;
use std::sync::Arc;

use futures::channel::mpsc;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use russh::server::{Auth, Handle, Handler, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec};
use tracing::{debug, info, trace, warn, Instrument};
use uuid::Uuid;

use super::command::PackCommand;
use super::structs::{
    Admission, HandlerSSH, SessionState, SshSession, NO_ACCESS_MSG, NO_SHELL_MSG,
};
use crate::access::AccessPolicy;
use crate::error::RelayError;
use crate::pack::{ssh_pack_exchange, PackRelay, RelayResult};

/// Client chunks buffered ahead of the backend.
const INBOUND_BUFFER: usize = 64;

impl HandlerSSH {
    pub(crate) fn new(
        peer: Option<SocketAddr>,
        relay: Arc<PackRelay>,
        access: Arc<dyn AccessPolicy>,
    ) -> Self {
        HandlerSSH {
            session: SshSession {
                id: Uuid::new_v4(),
                peer,
                username: None,
                command: None,
                repository: None,
            },
            state: SessionState::Connected,
            relay,
            access,
            fd_in: None,
        }
    }

    fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "ssh_session",
            id = %self.session.id,
            peer = ?self.session.peer,
            user = self.session.username.as_deref().unwrap_or(""),
        )
    }

    fn set_state(&mut self, state: SessionState) {
        trace!(from = ?self.state, to = ?state, "session state");
        self.state = state;
    }

    /// Runs the peer, username, command and repository checks for a
    /// channel request. `None` means the client asked for a shell.
    pub(crate) async fn admit(&mut self, command: Option<&str>) -> Admission {
        let username = self.session.username.clone().unwrap_or_default();

        if !self.access.peer_allowed(self.session.peer) {
            warn!(peer = ?self.session.peer, "peer denied");
            self.set_state(SessionState::Rejected);
            return Admission::Reply(NO_ACCESS_MSG);
        }
        if !self.access.username_valid(&username) {
            debug!(username = %username, "username rejected");
            self.set_state(SessionState::Rejected);
            return Admission::Reply(NO_ACCESS_MSG);
        }

        let Some(command) = command else {
            return Admission::Reply(NO_SHELL_MSG);
        };
        self.session.command = Some(command.to_string());

        let Some(request) = PackCommand::parse(command) else {
            debug!(command = %command, "malformed command");
            self.set_state(SessionState::RepoRejected);
            return Admission::Reply(NO_ACCESS_MSG);
        };
        self.set_state(SessionState::CommandValidated);
        debug!(service = %request.service, path = %request.path, "pack command received");

        match self
            .access
            .resolve_repository(&request.path, &username)
            .await
        {
            Some(repository) => {
                self.session.repository = Some(repository.clone());
                Admission::Relay {
                    service: request.service,
                    repository,
                }
            }
            None => {
                debug!(path = %request.path, "invalid repo path");
                self.set_state(SessionState::RepoRejected);
                Admission::Reply(NO_ACCESS_MSG)
            }
        }
    }

    fn reply_and_close(
        &mut self,
        channel: ChannelId,
        message: &[u8],
        session: &mut Session,
    ) -> Result<(), russh::Error> {
        session.data(channel, CryptoVec::from_slice(message))?;
        self.finish(channel, session)
    }

    fn finish(&mut self, channel: ChannelId, session: &mut Session) -> Result<(), russh::Error> {
        self.set_state(SessionState::Closed);
        session.exit_status_request(channel, 0)?;
        session.eof(channel)?;
        session.close(channel)
    }

    fn record_user(&mut self, user: &str) {
        if self.session.username.is_none() {
            debug!(peer = ?self.session.peer, username = %user, "accepting client");
        }
        self.session.username = Some(user.to_string());
    }
}

impl Handler for HandlerSSH {
    type Error = russh::Error;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        self.record_user(user);
        Ok(Auth::Accept)
    }

    async fn auth_password(&mut self, user: &str, _password: &str) -> Result<Auth, Self::Error> {
        self.record_user(user);
        Ok(Auth::Accept)
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        _public_key: &russh::keys::PublicKey,
    ) -> Result<Auth, Self::Error> {
        self.record_user(user);
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel)?;
        let span = self.span();
        match self.admit(None).instrument(span).await {
            Admission::Reply(message) => self.reply_and_close(channel, message, session),
            Admission::Relay { .. } => self.finish(channel, session),
        }
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel)?;
        let command = String::from_utf8_lossy(data).into_owned();
        let span = self.span();

        let admission = self.admit(Some(command.as_str())).instrument(span.clone()).await;
        let (service, repository) = match admission {
            Admission::Reply(message) => return self.reply_and_close(channel, message, session),
            Admission::Relay {
                service,
                repository,
            } => (service, repository),
        };

        let (fd_in, inbound) = mpsc::channel(INBOUND_BUFFER);
        let output = match ssh_pack_exchange(
            self.relay.clone(),
            repository,
            service,
            inbound.boxed(),
        ) {
            Ok(output) => output,
            Err(err) => {
                span.in_scope(|| warn!(error = %err, "failed to start pack backend"));
                return self.finish(channel, session);
            }
        };

        self.fd_in = Some(fd_in);
        self.set_state(SessionState::Relaying);
        tokio::spawn(forward(session.handle(), channel, output).instrument(span));
        Ok(())
    }

    async fn data(
        &mut self,
        _channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        match self.fd_in.as_mut() {
            Some(fd_in) => {
                if fd_in.send(Ok(bytes::Bytes::copy_from_slice(data))).await.is_err() {
                    trace!("relay no longer reads client input");
                    self.fd_in = None;
                }
            }
            None => trace!(len = data.len(), "dropping data outside a relay"),
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        _channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        // ends the inbound sequence; the relay task closes the channel
        self.fd_in.take();
        Ok(())
    }
}

/// Writes relay output to the channel, then exits with status 0 whatever
/// the outcome.
async fn forward(
    handle: Handle,
    channel: ChannelId,
    mut output: BoxStream<'static, RelayResult>,
) {
    while let Some(chunk) = output.next().await {
        match chunk {
            Ok(chunk) => {
                if handle
                    .data(channel, CryptoVec::from_slice(&chunk))
                    .await
                    .is_err()
                {
                    debug!("channel closed during relay");
                    break;
                }
            }
            Err(err) => {
                log_relay_failure(&err);
                break;
            }
        }
    }
    drop(output);

    let _ = handle.exit_status_request(channel, 0).await;
    let _ = handle.eof(channel).await;
    let _ = handle.close(channel).await;
    info!("pack exchange finished");
}

fn log_relay_failure(err: &RelayError) {
    match err {
        RelayError::Backend { exit_code, stderr } => warn!(
            exit_code,
            stderr = %String::from_utf8_lossy(stderr).trim_end(),
            "pack backend failed mid-stream"
        ),
        other => warn!(error = %other, "pack relay failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::RootedAccess;
    use async_trait::async_trait;
    use std::path::PathBuf;

    fn handler(root: &std::path::Path) -> HandlerSSH {
        let relay = Arc::new(PackRelay::new("/nonexistent/git", 64));
        let mut handler = HandlerSSH::new(
            Some(SocketAddr::from(([127, 0, 0, 1], 40000))),
            relay,
            Arc::new(RootedAccess::new(root)),
        );
        handler.record_user("git");
        handler
    }

    #[tokio::test]
    async fn missing_repository_gets_fixed_message() {
        let root = tempfile::tempdir().unwrap();
        let mut handler = handler(root.path());

        let admission = handler.admit(Some("upload-pack '/repos/foo.git'")).await;

        assert_eq!(admission, Admission::Reply(NO_ACCESS_MSG));
        assert_eq!(handler.state, SessionState::RepoRejected);
        assert!(handler.fd_in.is_none());
    }

    #[tokio::test]
    async fn malformed_command_is_indistinguishable_from_missing_repo() {
        let root = tempfile::tempdir().unwrap();
        let mut handler = handler(root.path());

        let admission = handler.admit(Some("git-upload-pack /repos/foo.git")).await;

        assert_eq!(admission, Admission::Reply(NO_ACCESS_MSG));
    }

    #[tokio::test]
    async fn shell_request_is_refused() {
        let root = tempfile::tempdir().unwrap();
        let mut handler = handler(root.path());

        assert_eq!(handler.admit(None).await, Admission::Reply(NO_SHELL_MSG));
    }

    #[tokio::test]
    async fn existing_repository_is_relayed() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("repos/foo.git")).unwrap();
        let mut handler = handler(root.path());

        let admission = handler.admit(Some("git-receive-pack '/repos/foo.git'")).await;

        assert_eq!(
            admission,
            Admission::Relay {
                service: crate::pack::PackService::ReceivePack,
                repository: root.path().join("repos/foo.git"),
            }
        );
        assert_eq!(handler.state, SessionState::CommandValidated);
        assert_eq!(
            handler.session.repository,
            Some(root.path().join("repos/foo.git"))
        );
    }

    struct DenyAll;

    #[async_trait]
    impl AccessPolicy for DenyAll {
        fn peer_allowed(&self, _peer: Option<SocketAddr>) -> bool {
            false
        }

        async fn resolve_repository(&self, _requested: &str, _username: &str) -> Option<PathBuf> {
            Some(PathBuf::from("/"))
        }
    }

    #[tokio::test]
    async fn denied_peer_never_reaches_repository_check() {
        let relay = Arc::new(PackRelay::default());
        let mut handler = HandlerSSH::new(None, relay, Arc::new(DenyAll));

        let admission = handler.admit(Some("git-upload-pack '/x.git'")).await;

        assert_eq!(admission, Admission::Reply(NO_ACCESS_MSG));
        assert_eq!(handler.state, SessionState::Rejected);
        assert!(handler.session.command.is_none());
    }
}
