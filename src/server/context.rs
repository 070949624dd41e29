// src/server/context.rs

use crate::core::state::{ServerInit, ServerState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;

/// Holds all the initialized state required to run the server's main loop.
pub struct ServerContext {
    pub state: Arc<ServerState>,
    pub init: ServerInit,
    pub listener: TcpListener,
    /// The address the listener is actually bound to (resolves port 0).
    pub local_addr: SocketAddr,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<Result<(), anyhow::Error>>,
    pub acceptor: Option<TlsAcceptor>,
    /// One permit per concurrently open client connection.
    pub connection_permits: Arc<Semaphore>,
}
