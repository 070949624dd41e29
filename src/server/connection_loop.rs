// src/server/connection_loop.rs

//! Contains the main server loop for accepting connections and handling graceful shutdown.

use super::context::ServerContext;
use crate::connection::{ConnectionGuard, ConnectionHandler};
use crate::core::metrics;
use crate::core::pairing::ConnId;
use crate::core::state::ServerState;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// How long open connections get to send their shutdown notice and close.
const CLIENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The main server loop. Accepts connections until `shutdown` resolves or a
/// background task fails, then shuts everything down.
pub async fn run(mut ctx: ServerContext, shutdown: impl Future<Output = ()>) {
    let mut session_id_counter: u64 = 0;
    let mut client_tasks = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("Shutdown requested, no longer accepting connections.");
                break;
            }

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            res = ctx.listener.accept() => {
                let (socket, addr) = match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                };
                metrics::CONNECTIONS_RECEIVED_TOTAL.inc();

                let Ok(permit) = ctx.connection_permits.clone().try_acquire_owned() else {
                    warn!(
                        "Rejecting connection from {}: max_clients ({}) reached.",
                        addr, ctx.state.config.max_clients
                    );
                    metrics::CONNECTIONS_REJECTED_TOTAL.inc();
                    ctx.state.stats.increment_rejected_connections();
                    drop(socket);
                    continue;
                };

                session_id_counter = session_id_counter.wrapping_add(1);
                let id = ConnId(session_id_counter);
                let connected = ctx.state.stats.client_connected();
                metrics::CONNECTED_CLIENTS.inc();
                info!("Client {} connected from {}. Total connected clients: {}", id, addr, connected);

                let guard = ConnectionGuard::new(ctx.state.clone(), id, addr);
                let state_clone = ctx.state.clone();
                let conn_shutdown_rx = ctx.shutdown_tx.subscribe();
                let acceptor = ctx.acceptor.clone();
                let handshake_timeout = ctx.state.config.limits.handshake_timeout;

                client_tasks.spawn(async move {
                    let _permit = permit;
                    match acceptor {
                        Some(acceptor) => match tokio::time::timeout(handshake_timeout, acceptor.accept(socket)).await {
                            Ok(Ok(tls_stream)) => {
                                debug!("TLS handshake successful for {addr}");
                                serve(tls_stream, addr, id, state_clone, conn_shutdown_rx, guard).await;
                            }
                            Ok(Err(e)) => warn!("TLS handshake error for {addr}: {e}"),
                            Err(_) => warn!("TLS handshake from {addr} timed out after {handshake_timeout:?}"),
                        },
                        None => serve(socket, addr, id, state_clone, conn_shutdown_rx, guard).await,
                    }
                });
            },

            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A client handler panicked: {e:?}");
                }
            },
        }
    }

    info!("Shutting down. Sending signal to all tasks.");
    if ctx.shutdown_tx.send(()).is_err() {
        error!("Failed to send shutdown signal. Some tasks may not terminate gracefully.");
    }

    if tokio::time::timeout(CLIENT_DRAIN_TIMEOUT, async {
        while client_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for client connections to close; aborting the rest.");
        client_tasks.shutdown().await;
    }
    info!("All client connections closed.");

    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(Duration::from_secs(10), async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    };
    let stats = &ctx.state.stats;
    info!(
        "Server shutdown complete. Served {} connections ({} rejected, {} still open).",
        stats.get_total_connections(),
        stats.get_rejected_connections(),
        stats.get_connected_clients()
    );
}

/// Upgrades an accepted stream to WebSocket and runs its handler to completion.
async fn serve<S>(
    stream: S,
    addr: SocketAddr,
    id: ConnId,
    state: Arc<ServerState>,
    shutdown_rx: broadcast::Receiver<()>,
    guard: ConnectionGuard,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match ConnectionHandler::accept(stream, addr, id, state, shutdown_rx).await {
        Ok(mut handler) => {
            if let Err(e) = handler.run(guard).await {
                warn!("Connection from {} terminated unexpectedly: {}", addr, e);
            }
        }
        Err(e) => warn!("Rejected connection from {}: {}", addr, e),
    }
}
