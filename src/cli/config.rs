//! CLI configuration module
//!
//! Manages configuration for the CLI application.

use crate::cli::args::CliArgs;
use crate::error::{Result, TorrentError};
use crate::peer::DEFAULT_PEER_TIMEOUT;
use crate::protocol::Handshake;
use crate::storage::download::{
    DownloadOptions, DEFAULT_MAX_PEERS, DEFAULT_MAX_PIECE_ATTEMPTS, DEFAULT_PIPELINE_DEPTH,
};
use crate::tracker::{DEFAULT_PORT, DEFAULT_TRACKER_TIMEOUT};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the torrent client
#[derive(Debug, Clone)]
pub struct Config {
    /// Our peer id, fixed for the whole process
    pub peer_id: [u8; 20],
    /// Port reported to the tracker
    pub port: u16,
    /// Deadline for each peer operation
    pub peer_timeout: Duration,
    /// Deadline for a tracker announce
    pub tracker_timeout: Duration,
    /// Block requests kept in flight per peer
    pub pipeline_depth: usize,
    /// Concurrent peers for a full download
    pub max_peers: usize,
    /// Failed attempts before a piece is given up
    pub max_piece_attempts: u32,
    /// Output path of the subcommand, if any
    pub output: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            peer_id: Handshake::generate_peer_id(),
            port: DEFAULT_PORT,
            peer_timeout: DEFAULT_PEER_TIMEOUT,
            tracker_timeout: DEFAULT_TRACKER_TIMEOUT,
            pipeline_depth: DEFAULT_PIPELINE_DEPTH,
            max_peers: DEFAULT_MAX_PEERS,
            max_piece_attempts: DEFAULT_MAX_PIECE_ATTEMPTS,
            output: None,
        }
    }
}

impl Config {
    /// Create configuration from CLI arguments
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let peer_id = match &args.peer_id {
            Some(id) => parse_peer_id(id)?,
            None => Handshake::generate_peer_id(),
        };

        Ok(Self {
            peer_id,
            port: args.port,
            peer_timeout: Duration::from_secs(args.peer_timeout),
            tracker_timeout: Duration::from_secs(args.tracker_timeout),
            pipeline_depth: args.pipeline_depth,
            max_peers: args.max_peers,
            max_piece_attempts: args.max_piece_attempts,
            output: args.output().cloned(),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(TorrentError::config("port", "port cannot be 0"));
        }
        if self.peer_timeout.is_zero() {
            return Err(TorrentError::config("peer_timeout", "must be greater than zero"));
        }
        if self.tracker_timeout.is_zero() {
            return Err(TorrentError::config("tracker_timeout", "must be greater than zero"));
        }
        if self.pipeline_depth == 0 {
            return Err(TorrentError::config("pipeline_depth", "must be at least 1"));
        }
        if self.max_peers == 0 {
            return Err(TorrentError::config("max_peers", "must be at least 1"));
        }
        if self.max_piece_attempts == 0 {
            return Err(TorrentError::config("max_piece_attempts", "must be at least 1"));
        }
        if let Some(output) = &self.output {
            if output.as_os_str().is_empty() {
                return Err(TorrentError::config("output", "output path cannot be empty"));
            }
        }

        Ok(())
    }

    /// Options for the download drivers
    pub fn download_options(&self) -> DownloadOptions {
        DownloadOptions {
            peer_timeout: self.peer_timeout,
            pipeline_depth: self.pipeline_depth,
            max_peers: self.max_peers,
            max_piece_attempts: self.max_piece_attempts,
        }
    }

    /// Our peer id as hex
    pub fn peer_id_hex(&self) -> String {
        hex::encode(self.peer_id)
    }
}

/// Accept 20 raw bytes or 40 hex characters
fn parse_peer_id(id: &str) -> Result<[u8; 20]> {
    let bytes = if id.len() == 40 {
        hex::decode(id).map_err(|e| TorrentError::config("peer_id", format!("invalid hex: {}", e)))?
    } else {
        id.as_bytes().to_vec()
    };

    bytes.try_into().map_err(|bytes: Vec<u8>| {
        TorrentError::config(
            "peer_id",
            format!("expected 20 bytes or 40 hex characters, got {} bytes", bytes.len()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(argv: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(argv.iter().copied()).unwrap()
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.port, 6881);
        assert_eq!(config.peer_timeout, Duration::from_secs(30));
        assert_eq!(config.tracker_timeout, Duration::from_secs(15));
        assert_eq!(config.pipeline_depth, 5);
        assert!(config.peer_id.starts_with(b"-RC0001-"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_args() {
        let args = parse(&[
            "rust-torrent-client",
            "download",
            "-o",
            "/tmp/out.iso",
            "sample.torrent",
            "--port",
            "6882",
            "--peer-id",
            "ABCDEFGHIJKLMNOPQRST",
            "--peer-timeout",
            "10",
            "--max-peers",
            "3",
        ]);
        let config = Config::from_args(&args).unwrap();

        assert_eq!(&config.peer_id, b"ABCDEFGHIJKLMNOPQRST");
        assert_eq!(config.port, 6882);
        assert_eq!(config.peer_timeout, Duration::from_secs(10));
        assert_eq!(config.max_peers, 3);
        assert_eq!(config.output, Some(PathBuf::from("/tmp/out.iso")));

        let options = config.download_options();
        assert_eq!(options.peer_timeout, Duration::from_secs(10));
        assert_eq!(options.max_peers, 3);
    }

    #[test]
    fn test_hex_peer_id() {
        let hex_id = "00112233445566778899aabbccddeeff00112233";
        let args = parse(&["rust-torrent-client", "info", "x.torrent", "--peer-id", hex_id]);
        let config = Config::from_args(&args).unwrap();
        assert_eq!(config.peer_id_hex(), hex_id);
    }

    #[test]
    fn test_bad_peer_id_rejected() {
        let args = parse(&["rust-torrent-client", "info", "x.torrent", "--peer-id", "short"]);
        let err = Config::from_args(&args).unwrap_err();
        match err {
            TorrentError::Config { field, message } => {
                assert_eq!(field, "peer_id");
                assert!(message.contains("got 5 bytes"), "{}", message);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_config_validate_rejects_zero_values() {
        let cases: [(&str, fn(&mut Config)); 6] = [
            ("port", |c| c.port = 0),
            ("peer_timeout", |c| c.peer_timeout = Duration::ZERO),
            ("tracker_timeout", |c| c.tracker_timeout = Duration::ZERO),
            ("pipeline_depth", |c| c.pipeline_depth = 0),
            ("max_peers", |c| c.max_peers = 0),
            ("max_piece_attempts", |c| c.max_piece_attempts = 0),
        ];

        for (name, mutate) in cases {
            let mut config = Config::default();
            mutate(&mut config);
            match config.validate() {
                Err(TorrentError::Config { field, .. }) => assert_eq!(field, name),
                other => panic!("{}: expected config error, got {:?}", name, other),
            }
        }
    }
}
