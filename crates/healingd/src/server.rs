//! Socket server - Unix socket listener for healing requests
//!
//! One request per connection: the client writes a JSON request and
//! half-closes, the daemon answers with one JSON response and closes.

use crate::executor::PrivilegedExecutor;
use anyhow::{Context, Result};
use healing_common::protocol::MAX_REQUEST_BYTES;
use healing_common::HealingConfig;
use nix::unistd::{chown, Group};
use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

/// Outcome of reading one request off the wire
enum Incoming {
    Complete(Vec<u8>),
    TooLarge,
}

pub struct SocketServer {
    listener: UnixListener,
    path: PathBuf,
    executor: Arc<PrivilegedExecutor>,
    read_timeout: Duration,
}

impl SocketServer {
    /// Bind the socket: create its directory, remove a stale socket, apply
    /// mode and group ownership.
    pub fn bind(config: &HealingConfig, executor: Arc<PrivilegedExecutor>) -> Result<Self> {
        let path = config.socket_path.clone();

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create socket directory {}", dir.display()))?;
        }

        if path.exists() {
            std::fs::remove_file(&path).context("Failed to remove old socket")?;
        }

        let listener = UnixListener::bind(&path)
            .with_context(|| format!("Failed to bind socket at {}", path.display()))?;

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(config.socket_mode))
            .context("Failed to set socket permissions")?;

        set_socket_group(&path, &config.socket_group);

        info!(
            "Listening on {} (permissions: {:o}, group: {})",
            path.display(),
            config.socket_mode,
            config.socket_group
        );

        Ok(Self {
            listener,
            path,
            executor,
            read_timeout: Duration::from_secs(config.read_timeout_secs),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `shutdown` resolves, then remove the socket file.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let executor = Arc::clone(&self.executor);
                        let read_timeout = self.read_timeout;
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, executor, read_timeout).await {
                                error!("Connection handler error: {:#}", e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
                _ = &mut shutdown => {
                    info!("Shutting down socket server");
                    break;
                }
            }
        }

        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove socket {}: {}", self.path.display(), e);
        }
        Ok(())
    }
}

fn set_socket_group(path: &Path, group: &str) {
    match Group::from_name(group) {
        Ok(Some(group)) => {
            if let Err(e) = chown(path, None, Some(group.gid)) {
                warn!("Failed to chown socket to group {}: {}", group.name, e);
            }
        }
        Ok(None) => warn!("Group {} does not exist, socket keeps default group", group),
        Err(e) => warn!("Failed to look up group {}: {}", group, e),
    }
}

async fn handle_connection(
    mut stream: UnixStream,
    executor: Arc<PrivilegedExecutor>,
    read_timeout: Duration,
) -> Result<()> {
    let response = match tokio::time::timeout(read_timeout, read_request(&mut stream)).await {
        Ok(Ok(Incoming::Complete(bytes))) => executor.handle_raw(&bytes).await,
        Ok(Ok(Incoming::TooLarge)) => executor.reject("Request too large").await,
        Ok(Err(e)) => {
            debug!("Read failed: {}", e);
            executor.reject("Invalid request format").await
        }
        Err(_) => executor.reject("Request read timed out").await,
    };

    let body = serde_json::to_vec(&response)?;
    stream
        .write_all(&body)
        .await
        .context("Failed to write response")?;
    stream.shutdown().await.context("Failed to close connection")?;
    Ok(())
}

/// Read until EOF. Past the cap, keep draining so the client can still read
/// the rejection.
async fn read_request(stream: &mut UnixStream) -> std::io::Result<Incoming> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 8192];
    let mut too_large = false;

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        if !too_large {
            if buf.len() + n > MAX_REQUEST_BYTES {
                too_large = true;
                buf = Vec::new();
            } else {
                buf.extend_from_slice(&chunk[..n]);
            }
        }
    }

    Ok(if too_large {
        Incoming::TooLarge
    } else {
        Incoming::Complete(buf)
    })
}
