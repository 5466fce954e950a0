//! Bencode decoder
//!
//! Every parse step returns `(value, bytes_consumed)` relative to the offset it
//! started at, so composite values decode their children by advancing a local
//! position rather than sharing a mutable cursor.

use std::collections::HashSet;

use tracing::trace;

use super::BencodeValue;
use crate::error::{Result, TorrentError};

/// Nesting limit for lists and dictionaries
pub const MAX_DEPTH: usize = 256;

/// Decode one value starting at `offset`
///
/// Returns the value and the number of bytes it occupied. Bytes after the value
/// are left untouched so callers can decode a run of sibling values.
pub fn decode(input: &[u8], offset: usize) -> Result<(BencodeValue, usize)> {
    decode_value(input, offset, 0)
}

/// Decode a complete message: exactly one value and nothing after it
pub fn decode_all(input: &[u8]) -> Result<BencodeValue> {
    trace!("Decoding {} bytes of bencode", input.len());
    let (value, consumed) = decode(input, 0)?;
    if consumed != input.len() {
        return Err(TorrentError::malformed(
            consumed,
            format!("{} trailing bytes after value", input.len() - consumed),
        ));
    }
    Ok(value)
}

fn decode_value(input: &[u8], offset: usize, depth: usize) -> Result<(BencodeValue, usize)> {
    if depth > MAX_DEPTH {
        return Err(TorrentError::malformed(offset, "nesting too deep"));
    }

    match input.get(offset) {
        None => Err(TorrentError::malformed(offset, "unexpected end of input")),
        Some(b'i') => decode_integer(input, offset),
        Some(b'l') => decode_list(input, offset, depth),
        Some(b'd') => decode_dict(input, offset, depth),
        Some(b'0'..=b'9') => decode_bytes(input, offset),
        Some(&other) => Err(TorrentError::malformed(
            offset,
            format!("unexpected byte 0x{:02x}", other),
        )),
    }
}

/// `<len>:<bytes>`
fn decode_bytes(input: &[u8], offset: usize) -> Result<(BencodeValue, usize)> {
    let (bytes, consumed) = decode_raw_bytes(input, offset)?;
    Ok((BencodeValue::Bytes(bytes), consumed))
}

fn decode_raw_bytes(input: &[u8], offset: usize) -> Result<(Vec<u8>, usize)> {
    let colon = find(input, offset, b':')
        .ok_or_else(|| TorrentError::malformed(offset, "byte string length not terminated by ':'"))?;
    let digits = &input[offset..colon];
    if !is_canonical_unsigned(digits) {
        return Err(TorrentError::malformed(offset, "invalid byte string length"));
    }
    let length: usize = parse_ascii(digits)
        .ok_or_else(|| TorrentError::malformed(offset, "byte string length out of range"))?;

    let start = colon + 1;
    let remaining = input.len() - start;
    if length > remaining {
        return Err(TorrentError::malformed(
            offset,
            format!("declared length {} exceeds remaining {} bytes", length, remaining),
        ));
    }

    Ok((input[start..start + length].to_vec(), start + length - offset))
}

/// `i<digits>e`
fn decode_integer(input: &[u8], offset: usize) -> Result<(BencodeValue, usize)> {
    let end = find(input, offset + 1, b'e')
        .ok_or_else(|| TorrentError::malformed(offset, "unterminated integer"))?;
    let digits = &input[offset + 1..end];

    let unsigned = digits.strip_prefix(b"-").unwrap_or(digits);
    if !is_canonical_unsigned(unsigned) || digits == b"-0" {
        return Err(TorrentError::malformed(
            offset,
            format!("invalid integer '{}'", String::from_utf8_lossy(digits)),
        ));
    }
    let value: i64 = parse_ascii(digits)
        .ok_or_else(|| TorrentError::malformed(offset, "integer out of range"))?;

    Ok((BencodeValue::Integer(value), end + 1 - offset))
}

/// `l<value>*e`
fn decode_list(input: &[u8], offset: usize, depth: usize) -> Result<(BencodeValue, usize)> {
    let mut items = Vec::new();
    let mut pos = offset + 1;
    loop {
        match input.get(pos) {
            None => return Err(TorrentError::malformed(offset, "unterminated list")),
            Some(b'e') => return Ok((BencodeValue::List(items), pos + 1 - offset)),
            Some(_) => {
                let (item, consumed) = decode_value(input, pos, depth + 1)?;
                items.push(item);
                pos += consumed;
            }
        }
    }
}

/// `d(<key><value>)*e`
fn decode_dict(input: &[u8], offset: usize, depth: usize) -> Result<(BencodeValue, usize)> {
    let mut entries: Vec<(Vec<u8>, BencodeValue)> = Vec::new();
    let mut seen: HashSet<Vec<u8>> = HashSet::new();
    let mut pos = offset + 1;
    loop {
        match input.get(pos) {
            None => return Err(TorrentError::malformed(offset, "unterminated dictionary")),
            Some(b'e') => return Ok((BencodeValue::Dict(entries), pos + 1 - offset)),
            Some(b'0'..=b'9') => {
                let (key, key_len) = decode_raw_bytes(input, pos)?;
                if !seen.insert(key.clone()) {
                    return Err(TorrentError::malformed(
                        pos,
                        format!("duplicate dictionary key '{}'", String::from_utf8_lossy(&key)),
                    ));
                }
                pos += key_len;

                let (value, value_len) = decode_value(input, pos, depth + 1)?;
                pos += value_len;
                entries.push((key, value));
            }
            Some(_) => {
                return Err(TorrentError::malformed(pos, "dictionary key is not a byte string"))
            }
        }
    }
}

fn find(input: &[u8], from: usize, needle: u8) -> Option<usize> {
    input
        .get(from..)?
        .iter()
        .position(|&b| b == needle)
        .map(|p| from + p)
}

/// Non-empty ASCII digits without a redundant leading zero
fn is_canonical_unsigned(digits: &[u8]) -> bool {
    !digits.is_empty()
        && digits.iter().all(u8::is_ascii_digit)
        && (digits.len() == 1 || digits[0] != b'0')
}

fn parse_ascii<T: std::str::FromStr>(digits: &[u8]) -> Option<T> {
    std::str::from_utf8(digits).ok()?.parse().ok()
}
