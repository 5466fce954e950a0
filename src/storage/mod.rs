//! Storage module
//!
//! Handles piece assembly and verification, the shared work queue, the
//! download drivers and the writers verified pieces end up in.

pub mod download;
pub mod file;
pub mod piece;
pub mod queue;
pub mod writer;

// Re-export download types
pub use download::{DownloadOptions, DownloadStats, PieceDownloader, TorrentDownload};

// Re-export piece types
pub use piece::{Block, BlockRequest, PieceAssembly, BLOCK_SIZE};

// Re-export storage types
pub use file::FileWriter;
pub use queue::WorkQueue;
pub use writer::{MemoryWriter, PieceWriter};
