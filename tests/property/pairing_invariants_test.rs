// tests/property/pairing_invariants_test.rs

//! Property-based tests for the pairing table invariants.

use pairlink::core::{ConnId, PairEvent, PairingTable, PeerState};
use proptest::prelude::*;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone)]
enum Op {
    Connect,
    /// Disconnects the n-th id handed out so far (modulo), which may already be gone.
    Disconnect(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Connect),
        2 => any::<usize>().prop_map(Op::Disconnect),
    ]
}

/// A straightforward model of the pairing rules.
#[derive(Default)]
struct Model {
    entries: BTreeMap<ConnId, PeerState>,
    waiting: Option<ConnId>,
}

impl Model {
    fn enqueue(&mut self, conn: ConnId) {
        match self.waiting.take() {
            Some(waiter) => {
                self.entries.insert(waiter, PeerState::Paired(conn));
                self.entries.insert(conn, PeerState::Paired(waiter));
            }
            None => {
                self.entries.insert(conn, PeerState::Waiting);
                self.waiting = Some(conn);
            }
        }
    }

    fn disconnect(&mut self, conn: ConnId) {
        match self.entries.remove(&conn) {
            Some(PeerState::Waiting) => self.waiting = None,
            Some(PeerState::Paired(partner)) => {
                self.entries.remove(&partner);
                self.enqueue(partner);
            }
            None => {}
        }
    }

    fn snapshot(&self) -> Vec<(ConnId, PeerState)> {
        self.entries.iter().map(|(c, s)| (*c, *s)).collect()
    }
}

fn assert_table_invariants(table: &PairingTable) {
    table.check_invariants().unwrap();
    let snapshot = table.snapshot();
    let waiters: Vec<_> = snapshot
        .iter()
        .filter(|(_, s)| *s == PeerState::Waiting)
        .map(|(c, _)| *c)
        .collect();
    assert!(waiters.len() <= 1, "more than one waiter: {waiters:?}");
    assert_eq!(table.waiting(), waiters.first().copied());
    for (conn, state) in &snapshot {
        if let PeerState::Paired(partner) = state {
            assert_ne!(conn, partner);
            assert_eq!(table.partner_of(*partner), Some(*conn));
        }
    }
    assert_eq!(table.pair_count() * 2 + waiters.len(), table.len());
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 1000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_table_matches_model(ops in prop::collection::vec(op_strategy(), 1..=200)) {
        let mut table = PairingTable::new();
        let mut model = Model::default();
        let mut next_id = 0u64;

        for op in ops {
            let events = match op {
                Op::Connect => {
                    next_id += 1;
                    let id = ConnId(next_id);
                    model.enqueue(id);
                    table.connect(id)
                }
                Op::Disconnect(_) if next_id == 0 => continue,
                Op::Disconnect(n) => {
                    let id = ConnId(n as u64 % next_id + 1);
                    model.disconnect(id);
                    table.disconnect(id)
                }
            };

            prop_assert!(
                !events.iter().any(|e| matches!(e, PairEvent::Evicted { .. })),
                "unexpected eviction in {:?}", events
            );
            assert_table_invariants(&table);
            prop_assert_eq!(table.snapshot(), model.snapshot());
        }
    }

    #[test]
    fn test_events_describe_new_state(ops in prop::collection::vec(op_strategy(), 1..=200)) {
        let mut table = PairingTable::new();
        let mut next_id = 0u64;

        for op in ops {
            let events = match op {
                Op::Connect => {
                    next_id += 1;
                    table.connect(ConnId(next_id))
                }
                Op::Disconnect(_) if next_id == 0 => continue,
                Op::Disconnect(n) => table.disconnect(ConnId(n as u64 % next_id + 1)),
            };

            // The last event naming a connection reflects where it ended up.
            let mut seen = HashSet::new();
            for event in events.iter().rev() {
                match *event {
                    PairEvent::Paired(a, b) => {
                        if seen.insert(a) {
                            prop_assert_eq!(table.partner_of(a), Some(b));
                        }
                        if seen.insert(b) {
                            prop_assert_eq!(table.partner_of(b), Some(a));
                        }
                    }
                    PairEvent::Waiting(c) | PairEvent::PartnerLeft(c) => {
                        if seen.insert(c) {
                            prop_assert_eq!(table.state_of(c), Some(PeerState::Waiting));
                        }
                    }
                    PairEvent::Evicted { conn, .. } => prop_assert!(!table.contains(conn)),
                }
            }
        }
    }

    #[test]
    fn test_disconnecting_everyone_empties_table(
        count in 1usize..=64,
        order in prop::collection::vec(any::<usize>(), 64),
    ) {
        let mut table = PairingTable::new();
        let mut ids: Vec<ConnId> = (1..=count as u64).map(ConnId).collect();
        for id in &ids {
            table.connect(*id);
        }

        while !ids.is_empty() {
            let pick = order[ids.len() % order.len()] % ids.len();
            let id = ids.swap_remove(pick);
            table.disconnect(id);
            assert_table_invariants(&table);
        }
        prop_assert!(table.is_empty());
        prop_assert_eq!(table.waiting(), None);
    }
}
