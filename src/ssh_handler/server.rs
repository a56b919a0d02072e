use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use russh::server::Server;
use russh::{MethodKind, MethodSet};
use tokio::net::TcpListener;

use super::structs::{HandlerSSH, ServerSSH};
use crate::access::AccessPolicy;
use crate::config::SshConfig;
use crate::error::ServerError;
use crate::pack::PackRelay;

impl ServerSSH {
    pub fn new(relay: Arc<PackRelay>, access: Arc<dyn AccessPolicy>) -> Self {
        ServerSSH { relay, access }
    }

    /// Listens on `config.listen` until the listener fails.
    pub async fn serve(self, config: &SshConfig) -> Result<(), ServerError> {
        let listener = TcpListener::bind(config.listen).await?;
        self.serve_on(config, listener).await
    }

    /// Accepts connections from an already bound listener.
    pub async fn serve_on(
        mut self,
        config: &SshConfig,
        listener: TcpListener,
    ) -> Result<(), ServerError> {
        let russh_config = russh_config(config)?;
        tracing::info!(addr = %listener.local_addr()?, "SSH transport listening");
        self.run_on_socket(Arc::new(russh_config), &listener).await?;
        Ok(())
    }
}

/// Every client is accepted; the username is only recorded.
fn russh_config(config: &SshConfig) -> Result<russh::server::Config, ServerError> {
    let keys = config
        .host_keys
        .iter()
        .map(|path| {
            russh::keys::load_secret_key(path, None).map_err(|source| ServerError::HostKey {
                path: path.clone(),
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut methods = MethodSet::empty();
    methods.push(MethodKind::None);
    methods.push(MethodKind::Password);
    methods.push(MethodKind::PublicKey);

    Ok(russh::server::Config {
        inactivity_timeout: Some(Duration::from_secs(config.inactivity_timeout_secs)),
        auth_rejection_time: Duration::from_secs(3),
        auth_rejection_time_initial: Some(Duration::from_secs(0)),
        methods,
        keys,
        ..Default::default()
    })
}

impl Server for ServerSSH {
    type Handler = HandlerSSH;

    fn new_client(&mut self, address: Option<SocketAddr>) -> Self::Handler {
        match address {
            Some(peer) => tracing::info!(%peer, "client connected"),
            None => tracing::info!("client connected"),
        }
        HandlerSSH::new(address, self.relay.clone(), self.access.clone())
    }

    fn handle_session_error(&mut self, error: <Self::Handler as russh::server::Handler>::Error) {
        tracing::error!(error = %error, "session error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreadable_host_key_is_reported() {
        let config = SshConfig {
            enabled: true,
            host_keys: vec!["/nonexistent/ssh_host_ed25519_key".into()],
            ..SshConfig::default()
        };
        let err = russh_config(&config).unwrap_err();
        assert!(matches!(err, ServerError::HostKey { .. }));
    }
}
