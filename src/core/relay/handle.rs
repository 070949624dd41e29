// src/core/relay/handle.rs

use super::{Outbound, Payload, RelayCommand};
use crate::core::errors::RelayError;
use crate::core::pairing::{ConnId, PeerState};
use std::net::SocketAddr;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// A cloneable handle to the `RelayCoordinator`.
///
/// Every method enqueues a command; the coordinator applies them strictly in
/// arrival order, which is what keeps the pairing table's read-modify-write
/// sequences atomic with respect to each other.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    tx: mpsc::Sender<RelayCommand>,
}

impl RelayHandle {
    pub(crate) fn new(tx: mpsc::Sender<RelayCommand>) -> Self {
        Self { tx }
    }

    /// Registers a connection. Notices and relayed payloads for it will be
    /// pushed into `outbound`.
    pub async fn connect(
        &self,
        id: ConnId,
        addr: SocketAddr,
        outbound: mpsc::Sender<Outbound>,
    ) -> Result<(), RelayError> {
        self.send(RelayCommand::Connect { id, addr, outbound }).await
    }

    /// Hands a payload to the coordinator for delivery to `from`'s partner.
    /// Success means the payload was accepted, not that it was delivered.
    pub async fn relay(&self, from: ConnId, payload: Payload) -> Result<(), RelayError> {
        self.send(RelayCommand::Relay { from, payload }).await
    }

    pub async fn disconnect(&self, id: ConnId) -> Result<(), RelayError> {
        self.send(RelayCommand::Disconnect { id }).await
    }

    /// Enqueues a disconnect without awaiting, for use from `Drop`.
    pub fn disconnect_detached(&self, id: ConnId) {
        match self.tx.try_send(RelayCommand::Disconnect { id }) {
            Ok(()) => {}
            Err(TrySendError::Full(cmd)) => match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let tx = self.tx.clone();
                    runtime.spawn(async move {
                        let _ = tx.send(cmd).await;
                    });
                }
                Err(_) => debug!("No runtime available to deliver disconnect for {}", id),
            },
            Err(TrySendError::Closed(_)) => {
                debug!("Relay coordinator gone; disconnect for {} skipped.", id)
            }
        }
    }

    /// Returns a sorted copy of the pairing table.
    pub async fn snapshot(&self) -> Result<Vec<(ConnId, PeerState)>, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| RelayError::CoordinatorGone)
    }

    /// Runs the pairing table's consistency checks inside the coordinator.
    pub async fn check_invariants(&self) -> Result<(), RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayCommand::CheckInvariants { reply }).await?;
        rx.await.map_err(|_| RelayError::CoordinatorGone)?
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, cmd: RelayCommand) -> Result<(), RelayError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| RelayError::CoordinatorGone)
    }
}
