//! rust-torrent-client
//!
//! A minimal BitTorrent client: bencode codec, torrent metadata, tracker
//! announces and the peer wire protocol for fetching verified pieces.

pub mod bencode;
pub mod cli;
pub mod error;
pub mod peer;
pub mod protocol;
pub mod storage;
pub mod torrent;
pub mod tracker;

pub use error::{Result, TorrentError};

pub use bencode::BencodeValue;
pub use cli::{CliArgs, Command, Config};
pub use peer::{ConnectionState, Peer, PeerConnection};
pub use protocol::{Handshake, Message, MessageId};
pub use storage::{
    DownloadOptions, DownloadStats, FileWriter, MemoryWriter, PieceDownloader, PieceWriter,
    TorrentDownload,
};
pub use torrent::{TorrentInfo, TorrentParser};
pub use tracker::{AnnounceResponse, TrackerClient};
