//! Hook ingest server.
//!
//! The server:
//! - Listens on a Unix socket for local hooks
//! - Listens on loopback TCP for hooks on remote hosts (reached via `ssh -R`)
//! - Spawns a [`HookConnection`] per connection
//! - Holds the pending-permission table and the tool-use-id cache
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐
//! │ UnixListener │   │ TcpListener  │
//! └──────┬───────┘   └──────┬───────┘
//!        │ accept()         │ accept()
//!        ▼                  ▼
//! ┌─────────────────────────────────┐     ┌──────────────┐
//! │   HookConnection (per client)   │────▶│ EngineHandle │
//! └─────────────────────────────────┘     └──────────────┘
//!        ▲
//!        │ decision / cancel
//! ┌─────────────────────────────────┐
//! │       PendingPermissions        │
//! └─────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept errors are logged and the loop continues

mod connection;
mod pending;
mod tool_id_cache;

pub use connection::{HookConnection, IngestContext};
pub use pending::{PendingOutcome, PendingPermissions, Registration, Resolution};
pub use tool_id_cache::ToolUseIdCache;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tide_core::DomainError;

use crate::engine::EngineHandle;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to setup socket at {path}: {error}")]
    SocketSetup { path: PathBuf, error: String },

    #[error("Failed to bind {addr}: {error}")]
    TcpBind { addr: SocketAddr, error: String },

    #[error("Refusing to listen on non-loopback address {0}")]
    NotLoopback(SocketAddr),
}

impl From<ServerError> for DomainError {
    fn from(err: ServerError) -> Self {
        DomainError::protocol(err.to_string())
    }
}

/// Accepts hook connections on a Unix socket and optionally loopback TCP.
pub struct HookIngestServer {
    socket_path: PathBuf,
    tcp_addr: Option<SocketAddr>,
    ctx: IngestContext,
    connection_counter: Arc<AtomicU64>,
}

impl HookIngestServer {
    /// Creates a server.
    ///
    /// `pending` must be the table the engine's approval router answers through.
    pub fn new(
        socket_path: impl Into<PathBuf>,
        tcp_addr: Option<SocketAddr>,
        engine: EngineHandle,
        pending: Arc<PendingPermissions>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            tcp_addr,
            ctx: IngestContext {
                engine,
                pending,
                tool_ids: Arc::new(ToolUseIdCache::new()),
                cancel,
            },
            connection_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn pending(&self) -> &Arc<PendingPermissions> {
        &self.ctx.pending
    }

    /// Binds both listeners and serves until cancelled.
    pub async fn run(self) -> Result<(), ServerError> {
        self.bind().await?.serve().await;
        Ok(())
    }

    /// Binds the listeners without accepting yet.
    ///
    /// A stale socket file is removed first. The TCP address must be loopback.
    pub async fn bind(self) -> Result<BoundIngestServer, ServerError> {
        let setup_err = |e: std::io::Error| ServerError::SocketSetup {
            path: self.socket_path.clone(),
            error: e.to_string(),
        };

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(setup_err)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(setup_err)?;
            }
        }
        let unix = UnixListener::bind(&self.socket_path).map_err(setup_err)?;

        let tcp = match self.tcp_addr {
            Some(addr) if !addr.ip().is_loopback() => return Err(ServerError::NotLoopback(addr)),
            Some(addr) => Some(TcpListener::bind(addr).await.map_err(|e| ServerError::TcpBind {
                addr,
                error: e.to_string(),
            })?),
            None => None,
        };

        let tcp_local_addr = tcp.as_ref().and_then(|l| l.local_addr().ok());
        info!(
            socket = %self.socket_path.display(),
            tcp = ?tcp_local_addr,
            "Hook ingest listening"
        );

        Ok(BoundIngestServer {
            server: self,
            unix,
            tcp,
            tcp_local_addr,
        })
    }
}

/// A server whose listeners are bound.
pub struct BoundIngestServer {
    server: HookIngestServer,
    unix: UnixListener,
    tcp: Option<TcpListener>,
    tcp_local_addr: Option<SocketAddr>,
}

impl BoundIngestServer {
    /// The bound TCP address (useful with port 0).
    pub fn tcp_local_addr(&self) -> Option<SocketAddr> {
        self.tcp_local_addr
    }

    /// Runs both accept loops until the cancellation token fires, then
    /// removes the socket file.
    pub async fn serve(self) {
        let Self {
            server, unix, tcp, ..
        } = self;

        let unix_loop = accept_unix(unix, &server);
        let tcp_loop = async {
            if let Some(listener) = tcp {
                accept_tcp(listener, &server).await;
            }
        };
        tokio::join!(unix_loop, tcp_loop);

        cleanup(&server.socket_path);
    }
}

async fn accept_unix(listener: UnixListener, server: &HookIngestServer) {
    loop {
        tokio::select! {
            _ = server.ctx.cancel.cancelled() => {
                info!("Unix listener shutting down");
                break;
            }
            result = listener.accept() => match result {
                Ok((stream, _addr)) => spawn_connection(stream, server),
                Err(e) => error!(error = %e, "Failed to accept unix connection"),
            }
        }
    }
}

async fn accept_tcp(listener: TcpListener, server: &HookIngestServer) {
    loop {
        tokio::select! {
            _ = server.ctx.cancel.cancelled() => {
                info!("TCP listener shutting down");
                break;
            }
            result = listener.accept() => match result {
                Ok((stream, addr)) => {
                    if !addr.ip().is_loopback() {
                        warn!(peer = %addr, "dropping non-loopback connection");
                        continue;
                    }
                    spawn_connection(stream, server);
                }
                Err(e) => error!(error = %e, "Failed to accept tcp connection"),
            }
        }
    }
}

/// Hands a connection to its own task; the accept loop never touches the engine.
fn spawn_connection<S>(stream: S, server: &HookIngestServer)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
{
    let id = server.connection_counter.fetch_add(1, Ordering::Relaxed);
    let ctx = server.ctx.clone();
    tokio::spawn(HookConnection::new(stream, ctx, id).run());
}

fn cleanup(socket_path: &Path) {
    if socket_path.exists() {
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!(
                socket = %socket_path.display(),
                error = %e,
                "Failed to remove socket file"
            );
        }
    }
    info!("Hook ingest stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_display() {
        let err = ServerError::NotLoopback("0.0.0.0:12345".parse().unwrap());
        assert!(err.to_string().contains("0.0.0.0:12345"));
    }
}
