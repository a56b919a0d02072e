//! Relays pack exchanges through the native `git` pack programs.
//!
//! Every call to [`PackRelay::relay`] spawns one backend process. A driver
//! task owns that process: it feeds client bytes to stdin, pumps stdout back
//! as chunks, drains stderr and waits for the exit status. The caller pulls
//! the chunks from a [`RelayStream`]; dropping the stream kills and reaps
//! the backend.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt, TryStreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn, Instrument};

use super::advertisement::encode_advertisement;
use super::chunks::{ChunkReader, DEFAULT_CHUNK_SIZE};
use super::service::PackService;
use crate::error::RelayError;

/// Marks the end of negotiation input on a channel with no separate EOF.
pub const NEGOTIATION_SENTINEL: &[u8] = b"done\n";

/// Bytes sent by the client, in arrival order.
pub type InboundStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Outbound relay output.
pub type RelayResult = Result<Bytes, RelayError>;

#[derive(Debug, Clone)]
pub struct PackRelay {
    program: OsString,
    /// Placed before the pack subcommand, e.g. `-c key=value`.
    args: Vec<OsString>,
    chunk_size: usize,
}

impl Default for PackRelay {
    fn default() -> Self {
        PackRelay::new("git", DEFAULT_CHUNK_SIZE)
    }
}

impl PackRelay {
    pub fn new(program: impl Into<OsString>, chunk_size: usize) -> Self {
        PackRelay {
            program: program.into(),
            args: Vec::new(),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn with_args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &Path {
        Path::new(&self.program)
    }

    /// Starts one pack exchange against `repository`.
    ///
    /// Without `inbound` the backend runs in advertisement mode and the
    /// returned stream starts with the smart HTTP service announcement.
    /// With `inbound` every chunk is written to the backend until the
    /// sequence ends or a chunk ends with [`NEGOTIATION_SENTINEL`].
    ///
    /// Spawn failures are returned here, before any output exists. Backend
    /// failures arrive as the last item of the stream.
    pub fn relay(
        &self,
        repository: &Path,
        service: PackService,
        inbound: Option<InboundStream>,
    ) -> Result<RelayStream, RelayError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(service.subcommand())
            .arg("--stateless-rpc");
        if inbound.is_none() {
            command.arg("--http-backend-info-refs");
        }
        command
            .arg(repository)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| RelayError::Spawn {
            program: self.program.to_string_lossy().into_owned(),
            source,
        })?;

        let pid = child.id();
        let streams = (child.stdin.take(), child.stdout.take(), child.stderr.take());
        let (stdin, stdout, stderr) = match streams {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => {
                return Err(RelayError::Io(std::io::Error::other(
                    "backend standard streams were not captured",
                )))
            }
        };

        debug!(
            pid,
            service = %service,
            repository = %repository.display(),
            advertise = inbound.is_none(),
            "spawned pack backend"
        );

        let preamble = inbound
            .is_none()
            .then(|| encode_advertisement(service.as_str()));

        let (tx, rx) = mpsc::channel(1);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let driver = Driver {
            child,
            stdin,
            stdout,
            stderr,
            inbound,
            chunk_size: self.chunk_size,
            tx,
        };
        tokio::spawn(
            driver
                .run(cancel_rx)
                .instrument(tracing::debug_span!("pack_backend", pid, service = %service)),
        );

        Ok(RelayStream {
            preamble,
            rx,
            _cancel: cancel_tx,
        })
    }
}

/// Output of one backend process, in the order it was produced.
///
/// Ends after the backend exits; a non-zero exit is delivered as a final
/// `Err` item. Dropping the stream before that point terminates the backend.
pub struct RelayStream {
    preamble: Option<Bytes>,
    rx: mpsc::Receiver<RelayResult>,
    // dropping this signals the driver to kill the backend
    _cancel: oneshot::Sender<()>,
}

impl Stream for RelayStream {
    type Item = RelayResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(preamble) = self.preamble.take() {
            return Poll::Ready(Some(Ok(preamble)));
        }
        self.rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for RelayStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayStream")
            .field("preamble", &self.preamble.is_some())
            .finish_non_exhaustive()
    }
}

struct Driver {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    stderr: ChildStderr,
    inbound: Option<InboundStream>,
    chunk_size: usize,
    tx: mpsc::Sender<RelayResult>,
}

impl Driver {
    async fn run(self, mut cancel: oneshot::Receiver<()>) {
        let Driver {
            mut child,
            stdin,
            stdout,
            stderr,
            inbound,
            chunk_size,
            tx,
        } = self;

        let outcome = tokio::select! {
            outcome = exchange(&mut child, stdin, stdout, stderr, inbound, chunk_size, &tx) => outcome,
            _ = &mut cancel => Err(RelayError::Cancelled),
        };

        match outcome {
            Ok((status, _)) if status.success() => {
                trace!("backend exited cleanly");
            }
            Ok((status, stderr)) => {
                let exit_code = status.code().unwrap_or(-1);
                debug!(exit_code, "backend exited with failure");
                let _ = tx.send(Err(RelayError::Backend { exit_code, stderr })).await;
            }
            Err(RelayError::Cancelled) => {
                debug!("relay cancelled, terminating backend");
                reap(&mut child).await;
            }
            Err(err) => {
                warn!(error = %err, "relay failed, terminating backend");
                reap(&mut child).await;
                let _ = tx.send(Err(err)).await;
            }
        }
    }
}

async fn exchange(
    child: &mut Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    mut stderr: ChildStderr,
    inbound: Option<InboundStream>,
    chunk_size: usize,
    tx: &mpsc::Sender<RelayResult>,
) -> Result<(ExitStatus, Vec<u8>), RelayError> {
    let pump = async {
        let mut chunks = ChunkReader::new(stdout, chunk_size);
        while let Some(chunk) = chunks.next().await {
            if tx.send(Ok(chunk?)).await.is_err() {
                return Err(RelayError::Cancelled);
            }
        }
        Ok::<_, RelayError>(())
    };
    let diagnostics = async {
        let mut buf = Vec::new();
        stderr.read_to_end(&mut buf).await?;
        Ok::<_, RelayError>(buf)
    };

    let ((), (), diagnostics) = tokio::try_join!(feed(stdin, inbound), pump, diagnostics)?;

    let status = child.wait().await?;
    Ok((status, diagnostics))
}

/// Writes inbound chunks to the backend, then closes its stdin.
async fn feed(mut stdin: ChildStdin, inbound: Option<InboundStream>) -> Result<(), RelayError> {
    if let Some(mut inbound) = inbound {
        while let Some(chunk) = inbound.next().await {
            let chunk = chunk.map_err(RelayError::Inbound)?;
            if let Err(err) = stdin.write_all(&chunk).await {
                debug!(error = %err, "backend stopped reading input");
                return Ok(());
            }
            if chunk.ends_with(NEGOTIATION_SENTINEL) {
                trace!("negotiation sentinel received");
                break;
            }
        }
    }
    if let Err(err) = stdin.shutdown().await {
        debug!(error = %err, "failed to flush backend input");
    }
    Ok(())
}

async fn reap(child: &mut Child) {
    if let Err(err) = child.kill().await {
        warn!(error = %err, "failed to kill backend");
    }
}

/// The full SSH-style exchange on one channel: the backend's advertisement
/// (without the smart HTTP announcement) followed by the negotiation output.
///
/// The exchange backend is only spawned once the advertisement is drained.
pub fn ssh_pack_exchange(
    relay: Arc<PackRelay>,
    repository: PathBuf,
    service: PackService,
    inbound: InboundStream,
) -> Result<BoxStream<'static, RelayResult>, RelayError> {
    let advertisement = relay.relay(&repository, service, None)?.skip(1);

    let exchange = stream::once(async move {
        debug!(repository = %repository.display(), "advertisement done");
        relay.relay(&repository, service, Some(inbound))
    })
    .try_flatten();

    Ok(advertisement.chain(exchange).boxed())
}
