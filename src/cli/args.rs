//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// CLI arguments for the torrent client
#[derive(Debug, Parser)]
#[command(name = "rust-torrent-client")]
#[command(about = "A minimal BitTorrent client", long_about = None)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Our peer id: 20 raw bytes or 40 hex characters (random if omitted)
    #[arg(long, global = true, value_name = "ID")]
    pub peer_id: Option<String>,

    /// Port reported to the tracker
    #[arg(long, global = true, default_value_t = 6881)]
    pub port: u16,

    /// Seconds to wait on any single peer operation
    #[arg(long, global = true, default_value_t = 30)]
    pub peer_timeout: u64,

    /// Seconds to wait for the tracker to answer
    #[arg(long, global = true, default_value_t = 15)]
    pub tracker_timeout: u64,

    /// Block requests kept in flight per peer
    #[arg(long, global = true, default_value_t = 5)]
    pub pipeline_depth: usize,

    /// Maximum number of peers used by `download`
    #[arg(long, global = true, default_value_t = 5)]
    pub max_peers: usize,

    /// Failed attempts before a piece is given up
    #[arg(long, global = true, default_value_t = 5)]
    pub max_piece_attempts: u32,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Decode a bencoded value and print it as JSON
    Decode {
        /// Bencoded text, e.g. `d3:cow3:moo4:spam4:eggse`
        value: String,
    },

    /// Print the metadata of a torrent file
    Info {
        /// Path to the .torrent file
        torrent: PathBuf,
    },

    /// Ask the tracker for peers
    Peers {
        /// Path to the .torrent file
        torrent: PathBuf,
    },

    /// Perform a handshake with one peer and print its peer id
    Handshake {
        /// Path to the .torrent file
        torrent: PathBuf,
        /// Peer address as `ip:port`
        peer: SocketAddr,
    },

    /// Download and verify a single piece
    #[command(name = "download_piece")]
    DownloadPiece {
        /// Where to write the piece
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
        /// Fetch from this peer instead of asking the tracker
        #[arg(long, value_name = "ADDR")]
        peer: Option<SocketAddr>,
        /// Path to the .torrent file
        torrent: PathBuf,
        /// Zero-based piece index
        index: u32,
    },

    /// Download the whole torrent
    Download {
        /// Where to write the file
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
        /// Path to the .torrent file
        torrent: PathBuf,
    },
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Get the log level based on verbosity settings
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }

    /// Output path of the subcommand, if it writes one
    pub fn output(&self) -> Option<&PathBuf> {
        match &self.command {
            Command::DownloadPiece { output, .. } | Command::Download { output, .. } => Some(output),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let args = CliArgs::try_parse_from(["rust-torrent-client", "info", "sample.torrent"]).unwrap();

        assert_eq!(args.port, 6881);
        assert_eq!(args.peer_timeout, 30);
        assert_eq!(args.tracker_timeout, 15);
        assert_eq!(args.pipeline_depth, 5);
        assert!(args.peer_id.is_none());
        assert!(args.output().is_none());
        assert_eq!(args.log_level(), tracing::Level::INFO);
        assert!(matches!(args.command, Command::Info { .. }));
    }

    #[test]
    fn test_download_piece_subcommand() {
        let args = CliArgs::try_parse_from([
            "rust-torrent-client",
            "download_piece",
            "-o",
            "/tmp/piece-0",
            "sample.torrent",
            "0",
        ])
        .unwrap();

        match &args.command {
            Command::DownloadPiece { output, peer, torrent, index } => {
                assert_eq!(output, &PathBuf::from("/tmp/piece-0"));
                assert!(peer.is_none());
                assert_eq!(torrent, &PathBuf::from("sample.torrent"));
                assert_eq!(*index, 0);
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(args.output(), Some(&PathBuf::from("/tmp/piece-0")));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = CliArgs::try_parse_from([
            "rust-torrent-client",
            "handshake",
            "sample.torrent",
            "127.0.0.1:6881",
            "-v",
            "--pipeline-depth",
            "8",
        ])
        .unwrap();

        assert!(args.is_verbose());
        assert_eq!(args.pipeline_depth, 8);
        assert_eq!(args.log_level(), tracing::Level::DEBUG);
        match args.command {
            Command::Handshake { peer, .. } => assert_eq!(peer.port(), 6881),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_bad_peer_address() {
        let result = CliArgs::try_parse_from([
            "rust-torrent-client",
            "handshake",
            "sample.torrent",
            "not-an-address",
        ]);
        assert!(result.is_err());
    }
}
