// src/core/errors.rs

//! Defines the primary error type for the relay.

use crate::core::pairing::ConnId;
use std::sync::Arc;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// The main error enum, representing all failures inside the relay.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    /// The pairing table is inconsistent for `conn`. The affected connections
    /// must be isolated; the rest of the table is still trusted.
    #[error("Pairing invariant violated for {conn}: {detail}")]
    InvariantViolation { conn: ConnId, detail: String },

    #[error("Relay coordinator is no longer running")]
    CoordinatorGone,
}

impl RelayError {
    pub(crate) fn invariant(conn: ConnId, detail: impl Into<String>) -> Self {
        RelayError::InvariantViolation {
            conn,
            detail: detail.into(),
        }
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
impl Clone for RelayError {
    fn clone(&self) -> Self {
        match self {
            RelayError::Io(e) => RelayError::Io(Arc::clone(e)),
            RelayError::Transport(s) => RelayError::Transport(s.clone()),
            RelayError::Handshake(s) => RelayError::Handshake(s.clone()),
            RelayError::InvariantViolation { conn, detail } => RelayError::InvariantViolation {
                conn: *conn,
                detail: detail.clone(),
            },
            RelayError::CoordinatorGone => RelayError::CoordinatorGone,
        }
    }
}

impl PartialEq for RelayError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RelayError::Io(e1), RelayError::Io(e2)) => e1.to_string() == e2.to_string(),
            (RelayError::Transport(s1), RelayError::Transport(s2)) => s1 == s2,
            (RelayError::Handshake(s1), RelayError::Handshake(s2)) => s1 == s2,
            (
                RelayError::InvariantViolation { conn: c1, .. },
                RelayError::InvariantViolation { conn: c2, .. },
            ) => c1 == c2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for RelayError {
    fn from(e: std::io::Error) -> Self {
        RelayError::Io(Arc::new(e))
    }
}

impl From<tungstenite::Error> for RelayError {
    fn from(e: tungstenite::Error) -> Self {
        match e {
            tungstenite::Error::Io(io) => RelayError::Io(Arc::new(io)),
            other => RelayError::Transport(other.to_string()),
        }
    }
}
