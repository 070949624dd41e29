// src/core/pairing.rs

//! The pairing table: a symmetric mapping from each connection to its partner
//! or to the single waiting slot.
//!
//! The table is synchronous and owns no I/O. Every mutation returns the list of
//! `PairEvent`s it produced so the caller can announce them in order. The table
//! never fails; an inconsistency it detects is repaired by evicting the affected
//! connection and reported as `PairEvent::Evicted`.

use crate::core::errors::RelayError;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// The server-assigned identity of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// The value of a table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Waiting,
    Paired(ConnId),
}

/// A transition produced by a table mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairEvent {
    /// A newly registered connection entered the waiting slot. A demoted
    /// partner is covered by `PartnerLeft` instead.
    Waiting(ConnId),
    /// Two connections were paired. The first one is the longer-waiting side.
    Paired(ConnId, ConnId),
    /// The connection's partner left; it is now waiting or about to be re-paired.
    PartnerLeft(ConnId),
    /// The connection was dropped from the table because its entry was inconsistent.
    Evicted { conn: ConnId, reason: &'static str },
}

#[derive(Debug, Default)]
pub struct PairingTable {
    entries: HashMap<ConnId, PeerState>,
    /// The only connection allowed to sit in `PeerState::Waiting`, with the
    /// instant it started waiting.
    waiting: Option<(ConnId, Instant)>,
}

impl PairingTable {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, conn: ConnId) -> bool {
        self.entries.contains_key(&conn)
    }

    pub fn state_of(&self, conn: ConnId) -> Option<PeerState> {
        self.entries.get(&conn).copied()
    }

    /// Returns the current partner of `conn`, if it is paired.
    pub fn partner_of(&self, conn: ConnId) -> Option<ConnId> {
        match self.entries.get(&conn) {
            Some(PeerState::Paired(partner)) => Some(*partner),
            _ => None,
        }
    }

    /// Returns the connection currently waiting for a partner.
    pub fn waiting(&self) -> Option<ConnId> {
        self.waiting.map(|(conn, _)| conn)
    }

    pub fn waiting_count(&self) -> usize {
        usize::from(self.waiting.is_some())
    }

    /// The number of active pairs (two entries each).
    pub fn pair_count(&self) -> usize {
        (self.entries.len() - self.waiting_count()) / 2
    }

    /// Registers a newly accepted connection.
    ///
    /// Pairs it with the waiting connection if there is one, otherwise makes it
    /// the waiting connection. Registering an id that is already present is an
    /// invariant violation: the existing entry is evicted and the id is not
    /// re-added.
    pub fn connect(&mut self, conn: ConnId) -> Vec<PairEvent> {
        let mut events = Vec::with_capacity(2);
        if self.entries.contains_key(&conn) {
            self.evict_into(conn, "connection id registered twice", &mut events);
            return events;
        }
        self.enqueue(conn, true, &mut events);
        events
    }

    /// Removes a closing connection.
    ///
    /// Its partner, if any, receives `PartnerLeft` and goes back to waiting (or
    /// is immediately re-paired with a connection that was already waiting).
    /// Unknown connections are a no-op.
    pub fn disconnect(&mut self, conn: ConnId) -> Vec<PairEvent> {
        let mut events = Vec::new();
        match self.entries.remove(&conn) {
            None => {}
            Some(PeerState::Waiting) => self.clear_waiting_slot(conn),
            Some(PeerState::Paired(partner)) => self.release_partner(conn, partner, &mut events),
        }
        events
    }

    /// Drops `conn` from the table after an inconsistency was detected outside
    /// the table, e.g. a paired connection without a live transport.
    pub fn evict(&mut self, conn: ConnId, reason: &'static str) -> Vec<PairEvent> {
        let mut events = Vec::new();
        self.evict_into(conn, reason, &mut events);
        events
    }

    /// Removes the waiting connection if it has waited at least `timeout`.
    pub fn take_expired_waiter(&mut self, timeout: Duration) -> Option<ConnId> {
        let (conn, since) = self.waiting?;
        if since.elapsed() < timeout {
            return None;
        }
        self.waiting = None;
        self.entries.remove(&conn);
        Some(conn)
    }

    /// Returns a copy of the table, sorted by connection id.
    pub fn snapshot(&self) -> Vec<(ConnId, PeerState)> {
        let mut entries: Vec<_> = self.entries.iter().map(|(c, s)| (*c, *s)).collect();
        entries.sort_by_key(|(conn, _)| *conn);
        entries
    }

    /// Verifies symmetry and the single-waiter rule.
    pub fn check_invariants(&self) -> Result<(), RelayError> {
        let mut waiters = 0;
        for (conn, state) in &self.entries {
            match state {
                PeerState::Waiting => {
                    waiters += 1;
                    if self.waiting() != Some(*conn) {
                        return Err(RelayError::invariant(*conn, "waiting outside the waiting slot"));
                    }
                }
                PeerState::Paired(partner) if partner == conn => {
                    return Err(RelayError::invariant(*conn, "paired with itself"));
                }
                PeerState::Paired(partner) => {
                    if self.entries.get(partner) != Some(&PeerState::Paired(*conn)) {
                        return Err(RelayError::invariant(
                            *conn,
                            format!("partner {partner} does not map back"),
                        ));
                    }
                }
            }
        }
        if waiters > 1 {
            return Err(RelayError::InvariantViolation {
                conn: self.waiting().unwrap_or(ConnId(0)),
                detail: format!("{waiters} connections waiting"),
            });
        }
        if let Some(waiter) = self.waiting()
            && self.entries.get(&waiter) != Some(&PeerState::Waiting)
        {
            return Err(RelayError::invariant(waiter, "waiting slot points at a non-waiting entry"));
        }
        Ok(())
    }

    /// Pairs `conn` with the waiting connection or parks it in the waiting slot.
    fn enqueue(&mut self, conn: ConnId, is_new: bool, events: &mut Vec<PairEvent>) {
        while let Some((waiter, _)) = self.waiting.take() {
            if self.entries.get(&waiter) != Some(&PeerState::Waiting) {
                // The slot is stale; the entry was repaired elsewhere.
                self.evict_into(waiter, "waiting slot points at a non-waiting entry", events);
                continue;
            }
            self.entries.insert(waiter, PeerState::Paired(conn));
            self.entries.insert(conn, PeerState::Paired(waiter));
            events.push(PairEvent::Paired(waiter, conn));
            return;
        }
        self.entries.insert(conn, PeerState::Waiting);
        self.waiting = Some((conn, Instant::now()));
        if is_new {
            events.push(PairEvent::Waiting(conn));
        }
    }

    /// Handles the partner of a connection whose entry was just removed.
    fn release_partner(&mut self, gone: ConnId, partner: ConnId, events: &mut Vec<PairEvent>) {
        match self.entries.get(&partner) {
            Some(PeerState::Paired(back)) if *back == gone => {
                self.entries.remove(&partner);
                events.push(PairEvent::PartnerLeft(partner));
                self.enqueue(partner, false, events);
            }
            Some(_) => self.evict_into(partner, "partner entry does not map back", events),
            None => {}
        }
    }

    fn evict_into(&mut self, conn: ConnId, reason: &'static str, events: &mut Vec<PairEvent>) {
        match self.entries.remove(&conn) {
            Some(PeerState::Paired(partner)) => {
                events.push(PairEvent::Evicted { conn, reason });
                if self.entries.get(&partner) == Some(&PeerState::Paired(conn)) {
                    self.entries.remove(&partner);
                    events.push(PairEvent::PartnerLeft(partner));
                    self.enqueue(partner, false, events);
                }
            }
            Some(PeerState::Waiting) => {
                self.clear_waiting_slot(conn);
                events.push(PairEvent::Evicted { conn, reason });
            }
            None => {
                self.clear_waiting_slot(conn);
                events.push(PairEvent::Evicted { conn, reason });
            }
        }
    }

    fn clear_waiting_slot(&mut self, conn: ConnId) {
        if self.waiting() == Some(conn) {
            self.waiting = None;
        }
    }
}
