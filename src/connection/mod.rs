// src/connection/mod.rs

//! Manages the lifecycle of a single client WebSocket connection: handshake,
//! registration with the relay, the read/write loop, and cleanup.

mod guard;
mod handler;

pub use guard::ConnectionGuard;
pub use handler::ConnectionHandler;
