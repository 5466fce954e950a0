//! Torrent information structures
//!
//! Provides the structured view of a single-file torrent's metadata.

use sha1::{Digest, Sha1};

use crate::error::{Result, TorrentError};

/// Length of a SHA-1 digest
pub const HASH_LEN: usize = 20;

/// Metadata extracted from a .torrent file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentInfo {
    /// Tracker announce URL
    pub announce: String,
    /// SHA1 hash of the bencoded info dictionary
    pub info_hash: [u8; 20],
    /// Size of each piece in bytes (the last piece may be shorter)
    pub piece_length: u64,
    /// Piece digests, in piece order
    pub pieces: Vec<[u8; 20]>,
    /// Suggested file name
    pub name: String,
    /// Total content length in bytes
    pub length: u64,
}

impl TorrentInfo {
    /// Total size of the content
    pub fn total_size(&self) -> u64 {
        self.length
    }

    /// Get number of pieces in torrent
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Get info hash as a hex string
    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    /// Piece digests as hex strings
    pub fn piece_hashes_hex(&self) -> Vec<String> {
        self.pieces.iter().map(hex::encode).collect()
    }

    /// Generate info hash from info dictionary bytes
    pub fn generate_info_hash(info_dict_bytes: &[u8]) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(info_dict_bytes);
        hasher.finalize().into()
    }

    /// Parse piece hashes from the concatenated `pieces` field
    pub fn parse_piece_hashes(pieces_bytes: &[u8]) -> Result<Vec<[u8; 20]>> {
        if pieces_bytes.len() % HASH_LEN != 0 {
            return Err(TorrentError::InvalidPieceTable(format!(
                "pieces field length must be a multiple of {}, got {}",
                HASH_LEN,
                pieces_bytes.len()
            )));
        }

        Ok(pieces_bytes
            .chunks_exact(HASH_LEN)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect())
    }

    /// Number of pieces a torrent of `length` bytes split by `piece_length` must have
    pub fn expected_piece_count(length: u64, piece_length: u64) -> u64 {
        if piece_length == 0 {
            return 0;
        }
        length.div_ceil(piece_length)
    }

    /// Get piece hash for a specific piece index
    pub fn piece_hash(&self, index: usize) -> Option<[u8; 20]> {
        self.pieces.get(index).copied()
    }

    /// Get byte range `[start, end)` of a piece within the content
    pub fn piece_range(&self, index: usize) -> Option<(u64, u64)> {
        if index >= self.pieces.len() {
            return None;
        }

        let start = (index as u64) * self.piece_length;
        let end = std::cmp::min(start + self.piece_length, self.length);

        Some((start, end))
    }

    /// Length in bytes of a piece; only the final piece can be shorter
    pub fn piece_size(&self, index: usize) -> Option<u64> {
        self.piece_range(index).map(|(start, end)| end - start)
    }
}
