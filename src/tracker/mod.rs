//! Tracker module
//!
//! Peer discovery through HTTP tracker announces.

pub mod client;

pub use client::{parse_compact_peers, AnnounceResponse, TrackerClient, DEFAULT_PORT, DEFAULT_TRACKER_TIMEOUT};
