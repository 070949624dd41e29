// src/server/mod.rs

use crate::config::Config;
use crate::core::state::ServerState;
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

mod connection_loop;
mod context;
mod initialization;
mod metrics_server;
mod spawner;

/// The main server startup function. Runs until SIGINT or SIGTERM.
pub async fn run(config: Config) -> Result<()> {
    // 1. Bind the listener and build the shared state.
    let mut server_context = initialization::setup(config).await?;

    // 2. Spawn the relay coordinator and other background tasks.
    spawner::spawn_all(&mut server_context)?;

    // 3. Accept connections until a shutdown signal arrives.
    connection_loop::run(server_context, shutdown_signal()).await;

    Ok(())
}

/// Starts the server on the current runtime and returns immediately.
///
/// Dropping the returned handle also shuts the server down.
pub async fn start(config: Config) -> Result<ServerHandle> {
    let mut server_context = initialization::setup(config).await?;
    spawner::spawn_all(&mut server_context)?;

    let local_addr = server_context.local_addr;
    let state = server_context.state.clone();
    let (stop_tx, stop_rx) = oneshot::channel();
    let task = tokio::spawn(connection_loop::run(server_context, async move {
        let _ = stop_rx.await;
    }));

    Ok(ServerHandle {
        local_addr,
        state,
        stop_tx,
        task,
    })
}

/// A running server started with [`start`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    state: Arc<ServerState>,
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// The address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Performs a graceful shutdown and waits for it to finish.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(());
        if let Err(e) = self.task.await {
            error!("Server task ended abnormally: {e:?}");
        }
    }
}

/// Resolves on the first SIGINT or SIGTERM.
async fn shutdown_signal() {
    let (mut sigint, mut sigterm) =
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to register signal handlers: {}. Falling back to Ctrl-C.", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received, initiating graceful shutdown."),
        _ = sigterm.recv() => info!("SIGTERM received, initiating graceful shutdown."),
    }
}
