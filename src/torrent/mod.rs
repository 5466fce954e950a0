//! Torrent file handling module
//!
//! This module provides functionality for parsing .torrent files into structured metadata.

pub mod info;
pub mod parser;

pub use info::TorrentInfo;
pub use parser::TorrentParser;
