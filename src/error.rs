//! Error types for the torrent client
//!
//! Every failure the core can report is a variant of [`TorrentError`]. The core
//! never aborts the process; callers inspect the variant (or the
//! [`TorrentError::is_retryable`] / [`TorrentError::is_peer_fatal`] helpers)
//! and decide whether to retry, switch peers or give up.

use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, TorrentError>;

/// Error type for torrent operations
#[derive(Debug, Error)]
pub enum TorrentError {
    /// Bencode syntax violation
    #[error("Malformed bencode at offset {offset}: {reason}")]
    MalformedEncoding { offset: usize, reason: String },

    /// A required metadata field is absent or has the wrong type
    #[error("Missing field '{field}'{}", detail.as_ref().map(|d| format!(" ({})", d)).unwrap_or_default())]
    MissingField {
        field: String,
        detail: Option<String>,
    },

    /// The `pieces` table does not describe the content
    #[error("Invalid piece table: {0}")]
    InvalidPieceTable(String),

    /// The tracker could not be reached
    #[error("Tracker unreachable: {url} ({source})")]
    TrackerUnreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The tracker answered with something other than a valid announce response
    #[error("Tracker protocol error: {0}")]
    TrackerProtocolError(String),

    /// The peer's handshake did not match ours
    #[error("Handshake failed with {peer}: {reason}")]
    HandshakeFailed { peer: String, reason: String },

    /// A bounded peer operation did not finish in time
    #[error("Peer {peer} timed out during {operation}")]
    PeerTimeout { peer: String, operation: String },

    /// Socket-level failure on a peer connection
    #[error("Peer I/O error with {peer}: {message}")]
    PeerIo { peer: String, message: String },

    /// The peer sent a frame we cannot accept
    #[error("Peer protocol error with {peer}: {message}")]
    PeerProtocol { peer: String, message: String },

    /// Downloaded piece does not hash to the expected digest
    #[error("Piece {index} hash mismatch (expected {expected}, got {actual})")]
    PieceHashMismatch {
        index: u32,
        expected: String,
        actual: String,
    },

    /// Piece index outside the torrent
    #[error("Invalid piece index: {0}")]
    InvalidPieceIndex(u32),

    /// Work remained but every peer connection has failed
    #[error("No peers available to finish the download ({remaining} pieces left)")]
    NoPeersAvailable { remaining: usize },

    /// Reading torrent files or writing pieces failed
    #[error("Storage error at {path}: {message}")]
    Storage { path: String, message: String },

    /// Invalid configuration value
    #[error("Config error ({field}): {message}")]
    Config { field: String, message: String },
}

impl TorrentError {
    /// Create a new MalformedEncoding error
    pub fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        TorrentError::MalformedEncoding {
            offset,
            reason: reason.into(),
        }
    }

    /// Create a new MissingField error
    pub fn missing_field(field: impl Into<String>) -> Self {
        TorrentError::MissingField {
            field: field.into(),
            detail: None,
        }
    }

    /// Create a MissingField error for a field that exists with the wrong type
    pub fn wrong_type(field: impl Into<String>, expected: &str) -> Self {
        TorrentError::MissingField {
            field: field.into(),
            detail: Some(format!("wrong type, expected {}", expected)),
        }
    }

    /// Create a new HandshakeFailed error
    pub fn handshake_failed(peer: impl ToString, reason: impl Into<String>) -> Self {
        TorrentError::HandshakeFailed {
            peer: peer.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a new PeerTimeout error
    pub fn peer_timeout(peer: impl ToString, operation: impl Into<String>) -> Self {
        TorrentError::PeerTimeout {
            peer: peer.to_string(),
            operation: operation.into(),
        }
    }

    /// Create a new PeerIo error
    pub fn peer_io(peer: impl ToString, err: &std::io::Error) -> Self {
        TorrentError::PeerIo {
            peer: peer.to_string(),
            message: err.to_string(),
        }
    }

    /// Create a new PeerProtocol error
    pub fn peer_protocol(peer: impl ToString, message: impl Into<String>) -> Self {
        TorrentError::PeerProtocol {
            peer: peer.to_string(),
            message: message.into(),
        }
    }

    /// Create a new Storage error
    pub fn storage(path: impl Into<String>, err: &std::io::Error) -> Self {
        TorrentError::Storage {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Create a new Config error
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        TorrentError::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Attach a peer address to a peer-scoped error
    ///
    /// Frame and handshake decoding happen before the socket layer knows which
    /// errors to label, so they report an empty peer that the connection fills in.
    pub fn with_peer(self, addr: impl ToString) -> Self {
        let addr = addr.to_string();
        match self {
            TorrentError::HandshakeFailed { reason, .. } => TorrentError::HandshakeFailed { peer: addr, reason },
            TorrentError::PeerTimeout { operation, .. } => TorrentError::PeerTimeout { peer: addr, operation },
            TorrentError::PeerIo { message, .. } => TorrentError::PeerIo { peer: addr, message },
            TorrentError::PeerProtocol { message, .. } => TorrentError::PeerProtocol { peer: addr, message },
            other => other,
        }
    }

    /// Whether repeating the operation (possibly elsewhere) can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TorrentError::TrackerUnreachable { .. } | TorrentError::PieceHashMismatch { .. }
        )
    }

    /// Whether the error ends the connection it happened on
    pub fn is_peer_fatal(&self) -> bool {
        matches!(
            self,
            TorrentError::HandshakeFailed { .. }
                | TorrentError::PeerTimeout { .. }
                | TorrentError::PeerIo { .. }
                | TorrentError::PeerProtocol { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_display() {
        let err = TorrentError::malformed(3, "unterminated integer");
        assert_eq!(
            err.to_string(),
            "Malformed bencode at offset 3: unterminated integer"
        );
    }

    #[test]
    fn test_missing_field_display() {
        let err = TorrentError::missing_field("announce");
        assert_eq!(err.to_string(), "Missing field 'announce'");

        let err = TorrentError::wrong_type("piece length", "integer");
        assert!(err.to_string().contains("piece length"));
        assert!(err.to_string().contains("expected integer"));
    }

    #[test]
    fn test_peer_timeout_display() {
        let err = TorrentError::peer_timeout("127.0.0.1:6881", "handshake read");
        assert!(err.to_string().contains("127.0.0.1:6881"));
        assert!(err.to_string().contains("handshake read"));
    }

    #[test]
    fn test_retry_classification() {
        let mismatch = TorrentError::PieceHashMismatch {
            index: 0,
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        };
        assert!(mismatch.is_retryable());
        assert!(!mismatch.is_peer_fatal());

        let timeout = TorrentError::peer_timeout("peer", "read");
        assert!(timeout.is_peer_fatal());
        assert!(!timeout.is_retryable());

        assert!(!TorrentError::malformed(0, "x").is_retryable());
        assert!(!TorrentError::InvalidPieceTable("x".to_string()).is_peer_fatal());
    }

    #[test]
    fn test_with_peer_relabels_peer_errors() {
        let err = TorrentError::peer_protocol("", "unknown message id 20").with_peer("10.0.0.2:6881");
        match err {
            TorrentError::PeerProtocol { peer, .. } => assert_eq!(peer, "10.0.0.2:6881"),
            other => panic!("unexpected error: {:?}", other),
        }

        let untouched = TorrentError::InvalidPieceIndex(4).with_peer("10.0.0.2:6881");
        assert!(matches!(untouched, TorrentError::InvalidPieceIndex(4)));
    }

    #[test]
    fn test_peer_io_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = TorrentError::peer_io("10.0.0.1:51413", &io_err);
        assert!(matches!(err, TorrentError::PeerIo { .. }));
        assert!(err.to_string().contains("reset by peer"));
    }
}
