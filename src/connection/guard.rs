// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard for connection resource management.

use crate::core::metrics;
use crate::core::pairing::ConnId;
use crate::core::state::ServerState;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// An RAII guard to ensure connection resources are always cleaned up when a
/// connection task exits, including by panic or cancellation.
pub struct ConnectionGuard {
    /// A shared reference to the server state.
    pub(crate) state: Arc<ServerState>,
    /// The relay identity of the connection.
    pub(crate) id: ConnId,
    /// The network address of the client.
    pub(crate) addr: SocketAddr,
    /// Set once the connection entered the pairing table.
    is_registered: bool,
    /// Set once the handler delivered its own disconnect to the relay.
    is_disconnected: bool,
}

impl ConnectionGuard {
    /// Creates a new `ConnectionGuard` for an accepted socket.
    pub fn new(state: Arc<ServerState>, id: ConnId, addr: SocketAddr) -> Self {
        Self {
            state,
            id,
            addr,
            is_registered: false,
            is_disconnected: false,
        }
    }

    pub(crate) fn set_registered(&mut self) {
        self.is_registered = true;
    }

    pub(crate) fn set_disconnected(&mut self) {
        self.is_disconnected = true;
    }
}

impl Drop for ConnectionGuard {
    /// Releases the client slot and, if the handler did not get to it,
    /// removes the connection from the pairing table.
    fn drop(&mut self) {
        metrics::CONNECTED_CLIENTS.dec();
        let remaining = self.state.stats.client_disconnected();

        if self.is_registered && !self.is_disconnected {
            debug!(
                "ConnectionGuard for {} dropped before disconnect; notifying relay.",
                self.addr
            );
            self.state.relay.disconnect_detached(self.id);
        }

        info!(
            "Client {} ({}) disconnected. Total connected clients: {}",
            self.id, self.addr, remaining
        );
    }
}
