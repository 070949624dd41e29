// src/core/relay/mod.rs

//! The relay: a single coordinator task owns the pairing table, and connection
//! handlers talk to it through a `RelayHandle`.

use crate::core::errors::RelayError;
use crate::core::notice::ServerNotice;
use crate::core::pairing::{ConnId, PeerState};
use std::net::SocketAddr;
use tokio::sync::{mpsc, oneshot};

pub mod coordinator;
pub mod handle;

pub use coordinator::RelayCoordinator;
pub use handle::RelayHandle;

/// The capacity of the command channel into the coordinator.
pub(crate) const COMMAND_CHANNEL_CAPACITY: usize = 1024;

/// An opaque client message. The frame kind is kept so text stays text and
/// binary stays binary on the partner's side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(s) => s.len(),
            Payload::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What the coordinator asks a connection handler to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A payload from the partner.
    Relay(Payload),
    /// A status notice.
    Notice(ServerNotice),
    /// Close the connection, optionally sending a final notice first.
    Close(Option<ServerNotice>),
}

/// Commands processed one at a time by the coordinator.
#[derive(Debug)]
pub(crate) enum RelayCommand {
    Connect {
        id: ConnId,
        addr: SocketAddr,
        outbound: mpsc::Sender<Outbound>,
    },
    Relay {
        from: ConnId,
        payload: Payload,
    },
    Disconnect {
        id: ConnId,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<(ConnId, PeerState)>>,
    },
    CheckInvariants {
        reply: oneshot::Sender<Result<(), RelayError>>,
    },
}
