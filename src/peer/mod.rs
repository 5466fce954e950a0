//! Peer management module
//!
//! Handles peer connections, their lifecycle state and I/O deadlines.

pub mod connection;
pub mod deadline;
pub mod state;

// Re-export main types
pub use connection::PeerConnection;
pub use deadline::{bounded, DEFAULT_PEER_TIMEOUT};
pub use state::{ConnectionState, Peer};
