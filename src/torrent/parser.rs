//! Torrent file parser
//!
//! Handles parsing of .torrent files and extracting metadata.

use std::path::Path;

use tracing::{debug, error, info, trace};

use crate::bencode::{self, BencodeValue};
use crate::error::{Result, TorrentError};
use crate::torrent::info::TorrentInfo;

/// Parser for .torrent files
pub struct TorrentParser;

impl TorrentParser {
    /// Parse a .torrent file from bytes
    pub fn parse_bytes(data: &[u8]) -> Result<TorrentInfo> {
        info!("Parsing torrent file from {} bytes", data.len());
        trace!("Torrent data (first 100 bytes): {:?}", &data[..data.len().min(100)]);

        let root = bencode::decode_all(data)?;
        Self::convert_to_torrent_info(&root)
    }

    /// Parse a .torrent file from a file path
    pub fn parse_file(path: &Path) -> Result<TorrentInfo> {
        info!("Loading torrent file from: {}", path.display());

        let data = std::fs::read(path).map_err(|e| {
            error!("Failed to read torrent file '{}': {}", path.display(), e);
            TorrentError::storage(path.display().to_string(), &e)
        })?;

        debug!("Read {} bytes from torrent file", data.len());
        Self::parse_bytes(&data)
    }

    /// Build [`TorrentInfo`] from a decoded torrent dictionary
    pub fn convert_to_torrent_info(root: &BencodeValue) -> Result<TorrentInfo> {
        if root.as_dict().is_none() {
            return Err(TorrentError::wrong_type("<root>", "dictionary"));
        }

        let announce = required_str(root, "announce")?;

        let info_dict = root
            .get(b"info")
            .ok_or_else(|| TorrentError::missing_field("info"))?;
        if info_dict.as_dict().is_none() {
            return Err(TorrentError::wrong_type("info", "dictionary"));
        }

        let name = required_str(info_dict, "name")?;
        let length = required_u64(info_dict, "length")?;
        let piece_length = required_u64(info_dict, "piece length")?;
        if piece_length == 0 {
            return Err(TorrentError::InvalidPieceTable(
                "piece length must be positive".to_string(),
            ));
        }

        let pieces_bytes = info_dict
            .get(b"pieces")
            .ok_or_else(|| TorrentError::missing_field("pieces"))?
            .as_bytes()
            .ok_or_else(|| TorrentError::wrong_type("pieces", "byte string"))?;
        let pieces = TorrentInfo::parse_piece_hashes(pieces_bytes)?;

        let expected = TorrentInfo::expected_piece_count(length, piece_length);
        if pieces.len() as u64 != expected {
            return Err(TorrentError::InvalidPieceTable(format!(
                "{} bytes in pieces of {} need {} digests, found {}",
                length,
                piece_length,
                expected,
                pieces.len()
            )));
        }

        // Re-encode the decoded dictionary as stored; the decoder keeps the
        // file's key order, so this reproduces the original info bytes.
        let info_bytes = bencode::encode(info_dict);
        let info_hash = TorrentInfo::generate_info_hash(&info_bytes);
        debug!("Computed info hash {} over {} bytes", hex::encode(info_hash), info_bytes.len());

        info!("Successfully parsed torrent: {} ({} pieces)", name, pieces.len());
        Ok(TorrentInfo {
            announce,
            info_hash,
            piece_length,
            pieces,
            name,
            length,
        })
    }
}

fn required_str(dict: &BencodeValue, field: &str) -> Result<String> {
    let value = dict
        .get(field.as_bytes())
        .ok_or_else(|| TorrentError::missing_field(field))?;
    let bytes = value
        .as_bytes()
        .ok_or_else(|| TorrentError::wrong_type(field, "byte string"))?;
    String::from_utf8(bytes.to_vec()).map_err(|_| TorrentError::wrong_type(field, "UTF-8 text"))
}

fn required_u64(dict: &BencodeValue, field: &str) -> Result<u64> {
    let value = dict
        .get(field.as_bytes())
        .ok_or_else(|| TorrentError::missing_field(field))?;
    let int = value
        .as_integer()
        .ok_or_else(|| TorrentError::wrong_type(field, "integer"))?;
    u64::try_from(int).map_err(|_| TorrentError::wrong_type(field, "non-negative integer"))
}
