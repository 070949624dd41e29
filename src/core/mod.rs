// src/core/mod.rs

//! The central module containing the pairing and relay logic of Pairlink.

pub mod errors;
pub mod metrics;
pub mod notice;
pub mod pairing;
pub mod relay;
pub mod state;

pub use errors::RelayError;
pub use notice::{NoticeFormat, ServerNotice};
pub use pairing::{ConnId, PairEvent, PairingTable, PeerState};
pub use relay::{Outbound, Payload, RelayCoordinator, RelayHandle};
