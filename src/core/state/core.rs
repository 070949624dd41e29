// src/core/state/core.rs

//! Defines the central `ServerState` struct, holding all shared server-wide state.

use super::stats::StatsState;
use crate::config::Config;
use crate::core::relay::{RelayCoordinator, RelayHandle};
use std::sync::Arc;

/// Contains all initialized components required to spawn the server's background tasks.
/// This struct is created once during server initialization and then consumed by the spawner.
pub struct ServerInit {
    /// The fully initialized, shared server state.
    pub state: Arc<ServerState>,
    /// The coordinator task, taken by the spawner.
    pub coordinator: Option<RelayCoordinator>,
}

/// The central struct holding all shared, server-wide state.
/// It is wrapped in an `Arc` and passed to every connection handler.
#[derive(Debug)]
pub struct ServerState {
    pub config: Config,
    pub relay: RelayHandle,
    pub stats: StatsState,
}

impl ServerState {
    /// Builds the shared state and the coordinator that will own the pairing table.
    pub fn initialize(config: Config) -> ServerInit {
        let (coordinator, relay) = RelayCoordinator::new(&config);
        let state = Arc::new(ServerState {
            config,
            relay,
            stats: StatsState::new(),
        });
        ServerInit {
            state,
            coordinator: Some(coordinator),
        }
    }
}
