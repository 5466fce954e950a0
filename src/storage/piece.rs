//! Piece assembly module
//!
//! Splits a piece into block requests, collects the answering blocks into a
//! buffer and checks the finished buffer against the piece digest.

use std::collections::{BTreeMap, VecDeque};

use sha1::{Digest, Sha1};
use tracing::{debug, trace, warn};

use crate::error::{Result, TorrentError};

/// Size of a block request; only the final block of a piece may be shorter
pub const BLOCK_SIZE: u32 = 16 * 1024;

/// A request for one block of a piece
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRequest {
    /// Piece index
    pub index: u32,
    /// Offset within the piece
    pub begin: u32,
    /// Requested length
    pub length: u32,
}

/// A block of piece data received from a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Piece index this block belongs to
    pub index: u32,
    /// Offset within the piece
    pub begin: u32,
    /// Block data
    pub data: Vec<u8>,
}

impl Block {
    /// Create a new block
    pub fn new(index: u32, begin: u32, data: Vec<u8>) -> Self {
        Self { index, begin, data }
    }
}

/// Partition a piece of `piece_len` bytes into block requests
pub fn block_requests(index: u32, piece_len: u32) -> Vec<BlockRequest> {
    (0..piece_len)
        .step_by(BLOCK_SIZE as usize)
        .map(|begin| BlockRequest {
            index,
            begin,
            length: BLOCK_SIZE.min(piece_len - begin),
        })
        .collect()
}

/// Check `data` against the expected SHA1 digest
pub fn verify_piece(index: u32, data: &[u8], expected: &[u8; 20]) -> Result<()> {
    let actual: [u8; 20] = Sha1::digest(data).into();
    if actual != *expected {
        return Err(TorrentError::PieceHashMismatch {
            index,
            expected: hex::encode(expected),
            actual: hex::encode(actual),
        });
    }
    Ok(())
}

/// In-progress download of a single piece
///
/// Owned by exactly one downloader and dropped once the piece is verified or
/// abandoned.
#[derive(Debug)]
pub struct PieceAssembly {
    index: u32,
    buffer: Vec<u8>,
    expected: [u8; 20],
    /// Requests not yet sent
    pending: VecDeque<BlockRequest>,
    /// Requests sent and not yet answered, keyed by offset
    outstanding: BTreeMap<u32, BlockRequest>,
    /// Number of blocks copied into the buffer
    received: usize,
    total_blocks: usize,
}

impl PieceAssembly {
    /// Create an empty assembly for a piece of `piece_len` bytes
    pub fn new(index: u32, piece_len: u32, expected: [u8; 20]) -> Self {
        let pending: VecDeque<BlockRequest> = block_requests(index, piece_len).into();
        let total_blocks = pending.len();
        debug!("Piece {}: {} bytes in {} blocks", index, piece_len, total_blocks);
        Self {
            index,
            buffer: vec![0u8; piece_len as usize],
            expected,
            pending,
            outstanding: BTreeMap::new(),
            received: 0,
            total_blocks,
        }
    }

    /// Take the next unsent request and mark it outstanding
    pub fn next_request(&mut self) -> Option<BlockRequest> {
        let request = self.pending.pop_front()?;
        self.outstanding.insert(request.begin, request);
        Some(request)
    }

    /// Number of requests on the wire
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Every block has arrived
    pub fn is_complete(&self) -> bool {
        self.received == self.total_blocks
    }

    /// Copy an answering block into the buffer
    ///
    /// Returns `Ok(false)` for a block we did not ask for (another piece, an
    /// unknown offset or a duplicate). A block whose size differs from the
    /// request is a protocol error.
    pub fn accept(&mut self, block: Block) -> Result<bool> {
        if block.index != self.index {
            debug!("Ignoring block for piece {} while assembling {}", block.index, self.index);
            return Ok(false);
        }

        let Some(request) = self.outstanding.get(&block.begin).copied() else {
            debug!("Ignoring unsolicited block at {} for piece {}", block.begin, self.index);
            return Ok(false);
        };

        if block.data.len() != request.length as usize {
            warn!(
                "Block at {} of piece {} is {} bytes, requested {}",
                block.begin,
                self.index,
                block.data.len(),
                request.length
            );
            return Err(TorrentError::peer_protocol(
                "",
                format!(
                    "block {} of piece {} has {} bytes, requested {}",
                    block.begin,
                    self.index,
                    block.data.len(),
                    request.length
                ),
            ));
        }

        self.outstanding.remove(&block.begin);
        let start = block.begin as usize;
        self.buffer[start..start + block.data.len()].copy_from_slice(&block.data);
        self.received += 1;
        trace!(
            "Piece {}: block at {} stored ({}/{})",
            self.index,
            block.begin,
            self.received,
            self.total_blocks
        );
        Ok(true)
    }

    /// Move every outstanding request back to the front of the pending queue
    ///
    /// Used when the peer chokes us: it discards our in-flight requests.
    pub fn requeue_outstanding(&mut self) -> usize {
        let count = self.outstanding.len();
        let requests: Vec<BlockRequest> = std::mem::take(&mut self.outstanding).into_values().collect();
        for request in requests.into_iter().rev() {
            self.pending.push_front(request);
        }
        count
    }

    /// Check the assembled buffer against the expected digest
    pub fn verify(&self) -> Result<()> {
        verify_piece(self.index, &self.buffer, &self.expected)
    }

    /// Verify and hand out the finished buffer
    pub fn finish(self) -> Result<Vec<u8>> {
        self.verify()?;
        Ok(self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(data: &[u8]) -> [u8; 20] {
        Sha1::digest(data).into()
    }

    #[test]
    fn test_block_requests_partition() {
        let requests = block_requests(3, 40_000);
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0], BlockRequest { index: 3, begin: 0, length: 16384 });
        assert_eq!(requests[1], BlockRequest { index: 3, begin: 16384, length: 16384 });
        assert_eq!(requests[2], BlockRequest { index: 3, begin: 32768, length: 40_000 - 32768 });

        assert_eq!(block_requests(0, 16384).len(), 1);
        assert!(block_requests(0, 0).is_empty());
    }

    #[test]
    fn test_verify_piece() {
        let data = vec![7u8; 1000];
        assert!(verify_piece(0, &data, &digest(&data)).is_ok());

        let mut flipped = data.clone();
        flipped[500] ^= 0x01;
        let err = verify_piece(0, &flipped, &digest(&data)).unwrap_err();
        assert!(matches!(err, TorrentError::PieceHashMismatch { index: 0, .. }));
    }

    #[test]
    fn test_assembly_out_of_order() {
        let data: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
        let mut assembly = PieceAssembly::new(1, data.len() as u32, digest(&data));

        let mut requests = Vec::new();
        while let Some(request) = assembly.next_request() {
            requests.push(request);
        }
        assert_eq!(assembly.outstanding(), 3);

        for request in requests.iter().rev() {
            let start = request.begin as usize;
            let block = Block::new(1, request.begin, data[start..start + request.length as usize].to_vec());
            assert!(assembly.accept(block).unwrap());
        }

        assert!(assembly.is_complete());
        assert_eq!(assembly.finish().unwrap(), data);
    }

    #[test]
    fn test_assembly_ignores_unsolicited_and_duplicate() {
        let data = vec![1u8; 100];
        let mut assembly = PieceAssembly::new(0, 100, digest(&data));

        assert!(!assembly.accept(Block::new(0, 0, data.clone())).unwrap());

        assembly.next_request();
        assert!(!assembly.accept(Block::new(5, 0, data.clone())).unwrap());
        assert!(assembly.accept(Block::new(0, 0, data.clone())).unwrap());
        assert!(!assembly.accept(Block::new(0, 0, data)).unwrap());
        assert!(assembly.is_complete());
    }

    #[test]
    fn test_assembly_rejects_wrong_length() {
        let mut assembly = PieceAssembly::new(0, 100, [0u8; 20]);
        assembly.next_request();
        let err = assembly.accept(Block::new(0, 0, vec![1u8; 99])).unwrap_err();
        assert!(matches!(err, TorrentError::PeerProtocol { .. }));
    }

    #[test]
    fn test_requeue_outstanding_keeps_order() {
        let mut assembly = PieceAssembly::new(0, 3 * BLOCK_SIZE, [0u8; 20]);
        let first = assembly.next_request().unwrap();
        let second = assembly.next_request().unwrap();

        assert_eq!(assembly.requeue_outstanding(), 2);
        assert_eq!(assembly.outstanding(), 0);
        assert_eq!(assembly.next_request(), Some(first));
        assert_eq!(assembly.next_request(), Some(second));
    }

    #[test]
    fn test_flipped_bit_fails_verification() {
        let data = vec![0x55u8; 2 * BLOCK_SIZE as usize];
        let mut assembly = PieceAssembly::new(0, data.len() as u32, digest(&data));
        for begin in [0, BLOCK_SIZE] {
            assembly.next_request();
            let mut block = data[begin as usize..(begin + BLOCK_SIZE) as usize].to_vec();
            if begin == BLOCK_SIZE {
                block[0] ^= 0x80;
            }
            assembly.accept(Block::new(0, begin, block)).unwrap();
        }

        assert!(assembly.is_complete());
        assert!(matches!(
            assembly.verify().unwrap_err(),
            TorrentError::PieceHashMismatch { .. }
        ));
    }
}
