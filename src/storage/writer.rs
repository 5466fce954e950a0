//! Piece writer abstraction
//!
//! Verified pieces leave the download pipeline through [`PieceWriter`], so the
//! orchestrator never knows whether they land on disk or in memory.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::trace;

use crate::error::Result;

/// Destination for verified pieces
///
/// Implementations are shared by every peer task, so writes take `&self`.
#[async_trait]
pub trait PieceWriter: Send + Sync {
    /// Store a verified piece
    async fn write_piece(&self, index: u32, data: Bytes) -> Result<()>;

    /// Flush anything buffered once all pieces are written
    async fn finish(&self) -> Result<()> {
        Ok(())
    }
}

/// Keeps written pieces in memory
#[derive(Debug, Default)]
pub struct MemoryWriter {
    pieces: Mutex<BTreeMap<u32, Bytes>>,
}

impl MemoryWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of a written piece
    pub async fn piece(&self, index: u32) -> Option<Bytes> {
        self.pieces.lock().await.get(&index).cloned()
    }

    /// Number of pieces written
    pub async fn len(&self) -> usize {
        self.pieces.lock().await.len()
    }

    /// Whether nothing has been written yet
    pub async fn is_empty(&self) -> bool {
        self.pieces.lock().await.is_empty()
    }

    /// All pieces concatenated in index order
    pub async fn contents(&self) -> Vec<u8> {
        self.pieces
            .lock()
            .await
            .values()
            .flat_map(|piece| piece.iter().copied())
            .collect()
    }
}

#[async_trait]
impl PieceWriter for MemoryWriter {
    async fn write_piece(&self, index: u32, data: Bytes) -> Result<()> {
        trace!("Storing piece {} in memory ({} bytes)", index, data.len());
        self.pieces.lock().await.insert(index, data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_writer_orders_pieces() {
        let writer = MemoryWriter::new();
        assert!(writer.is_empty().await);

        writer.write_piece(1, Bytes::from_static(b"world")).await.unwrap();
        writer.write_piece(0, Bytes::from_static(b"hello ")).await.unwrap();

        assert_eq!(writer.len().await, 2);
        assert_eq!(writer.piece(1).await, Some(Bytes::from_static(b"world")));
        assert_eq!(writer.contents().await, b"hello world".to_vec());
        writer.finish().await.unwrap();
    }
}
