// src/core/relay/coordinator.rs

//! The single owner of the pairing table.

use super::handle::RelayHandle;
use super::{COMMAND_CHANNEL_CAPACITY, Outbound, Payload, RelayCommand};
use crate::config::Config;
use crate::core::metrics;
use crate::core::notice::ServerNotice;
use crate::core::pairing::{ConnId, PairEvent, PairingTable};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// The write side of a registered connection.
struct PeerLink {
    addr: SocketAddr,
    outbound: mpsc::Sender<Outbound>,
}

/// Applies connect, relay and disconnect commands to the pairing table one at
/// a time and pushes the resulting notices and payloads to the connections.
///
/// Pushes use `try_send` so the coordinator never waits on a slow client. A
/// relayed payload that does not fit is dropped; a status notice that does
/// not fit closes the connection instead.
pub struct RelayCoordinator {
    table: PairingTable,
    peers: HashMap<ConnId, PeerLink>,
    rx: mpsc::Receiver<RelayCommand>,
    wait_timeout: Option<Duration>,
    sweep_interval: Duration,
}

impl RelayCoordinator {
    /// Creates a coordinator and the handle used to reach it.
    pub fn new(config: &Config) -> (Self, RelayHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let coordinator = Self {
            table: PairingTable::new(),
            peers: HashMap::new(),
            rx,
            wait_timeout: config.pairing.wait_timeout,
            sweep_interval: config.pairing.sweep_interval,
        };
        (coordinator, RelayHandle::new(tx))
    }

    /// Runs until shutdown is signalled or every handle has been dropped.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let wait_timeout = self.wait_timeout;

        info!(
            "Relay coordinator started (wait timeout: {}).",
            wait_timeout.map_or_else(|| "none".to_string(), |t| format!("{t:?}"))
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("Relay coordinator shutting down with {} connections in the table.", self.table.len());
                    break;
                }
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => {
                            debug!("All relay handles dropped; coordinator exiting.");
                            break;
                        }
                    }
                }
                _ = sweep.tick(), if wait_timeout.is_some() => {
                    if let Some(timeout) = wait_timeout {
                        self.expire_waiter(timeout);
                    }
                }
            }
            self.update_gauges();
        }
    }

    fn handle_command(&mut self, cmd: RelayCommand) {
        match cmd {
            RelayCommand::Connect { id, addr, outbound } => self.on_connect(id, addr, outbound),
            RelayCommand::Relay { from, payload } => self.on_message(from, payload),
            RelayCommand::Disconnect { id } => self.on_disconnect(id),
            RelayCommand::Snapshot { reply } => {
                let _ = reply.send(self.table.snapshot());
            }
            RelayCommand::CheckInvariants { reply } => {
                let _ = reply.send(self.table.check_invariants());
            }
        }
    }

    fn on_connect(&mut self, id: ConnId, addr: SocketAddr, outbound: mpsc::Sender<Outbound>) {
        if let Some(previous) = self.peers.insert(id, PeerLink { addr, outbound }) {
            error!(
                "{} registered twice (previous peer {}, new peer {}).",
                id, previous.addr, addr
            );
        }
        let events = self.table.connect(id);
        self.announce(events);
    }

    fn on_message(&mut self, from: ConnId, payload: Payload) {
        let Some(partner) = self.table.partner_of(from) else {
            debug!("Dropping {} byte message from unpaired {}.", payload.len(), from);
            metrics::MESSAGES_DROPPED_TOTAL
                .with_label_values(&["unpaired"])
                .inc();
            return;
        };

        let Some(link) = self.peers.get(&partner) else {
            let events = self
                .table
                .evict(partner, "paired partner has no live connection");
            self.announce(events);
            return;
        };

        let len = payload.len();
        match link.outbound.try_send(Outbound::Relay(payload)) {
            Ok(()) => {
                debug!("Relayed {} bytes {} -> {}.", len, from, partner);
                metrics::MESSAGES_RELAYED_TOTAL.inc();
            }
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Outbound queue of {} ({}) is full; dropping {} byte message from {}.",
                    partner, link.addr, len, from
                );
                metrics::MESSAGES_DROPPED_TOTAL
                    .with_label_values(&["queue_full"])
                    .inc();
            }
            Err(TrySendError::Closed(_)) => {
                debug!("{} is closing; dropping message from {}.", partner, from);
                metrics::MESSAGES_DROPPED_TOTAL
                    .with_label_values(&["partner_closed"])
                    .inc();
            }
        }
    }

    fn on_disconnect(&mut self, id: ConnId) {
        let link = self.peers.remove(&id);
        let events = self.table.disconnect(id);
        if let Some(link) = link {
            info!("{} ({}) left the relay.", id, link.addr);
        }
        self.announce(events);
    }

    fn expire_waiter(&mut self, timeout: Duration) {
        let Some(id) = self.table.take_expired_waiter(timeout) else {
            return;
        };
        metrics::WAIT_TIMEOUTS_TOTAL.inc();
        if let Some(link) = self.peers.remove(&id) {
            info!(
                "{} ({}) waited longer than {:?} for a pair; closing.",
                id, link.addr, timeout
            );
            let _ = link
                .outbound
                .try_send(Outbound::Close(Some(ServerNotice::WaitTimeout)));
        }
    }

    /// Pushes the notices for a batch of table events, in order.
    ///
    /// Notices are never dropped. A connection whose queue has no room for one
    /// is cut off: its link is removed so its handler closes, and it is taken
    /// out of the table once the rest of the batch has been announced, which
    /// may produce further events for its partner.
    fn announce(&mut self, events: Vec<PairEvent>) {
        let mut pending = events;
        while !pending.is_empty() {
            let mut stalled = Vec::new();
            for event in pending {
                self.announce_one(event, &mut stalled);
            }

            pending = Vec::new();
            for conn in stalled {
                if let Some(link) = self.peers.remove(&conn) {
                    warn!(
                        "Outbound queue of {} ({}) is full; a status notice could not be queued. Closing the connection.",
                        conn, link.addr
                    );
                }
                pending.extend(self.table.disconnect(conn));
            }
        }
    }

    fn announce_one(&mut self, event: PairEvent, stalled: &mut Vec<ConnId>) {
        match event {
            PairEvent::Waiting(conn) => {
                debug!("{} is waiting for a pair.", conn);
                self.notify(conn, ServerNotice::Waiting, stalled);
            }
            PairEvent::Paired(first, second) => {
                info!("Paired {} with {}.", first, second);
                metrics::PAIRS_FORMED_TOTAL.inc();
                self.notify(first, ServerNotice::Paired, stalled);
                self.notify(second, ServerNotice::Paired, stalled);
            }
            PairEvent::PartnerLeft(conn) => {
                info!("Partner of {} disconnected; it is waiting again.", conn);
                self.notify(conn, ServerNotice::PartnerLeft, stalled);
            }
            PairEvent::Evicted { conn, reason } => {
                error!(
                    "CRITICAL: pairing table inconsistency for {}: {}. Closing the connection.",
                    conn, reason
                );
                metrics::INVARIANT_VIOLATIONS_TOTAL.inc();
                if let Some(link) = self.peers.remove(&conn) {
                    let _ = link.outbound.try_send(Outbound::Close(None));
                }
            }
        }
    }

    /// Queues a notice, recording `conn` in `stalled` if its queue is full.
    fn notify(&self, conn: ConnId, notice: ServerNotice, stalled: &mut Vec<ConnId>) {
        if stalled.contains(&conn) {
            return;
        }
        let Some(link) = self.peers.get(&conn) else {
            debug!("No live connection for {}; notice {:?} dropped.", conn, notice);
            return;
        };
        match link.outbound.try_send(Outbound::Notice(notice)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => stalled.push(conn),
            // The handler is already on its way out and disconnects itself.
            Err(TrySendError::Closed(_)) => {
                debug!("{} is closing; notice {:?} dropped.", conn, notice)
            }
        }
    }

    fn update_gauges(&self) {
        metrics::WAITING_CLIENTS.set(self.table.waiting_count() as f64);
        metrics::ACTIVE_PAIRS.set(self.table.pair_count() as f64);
    }
}
