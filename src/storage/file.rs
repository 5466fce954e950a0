//! File storage module
//!
//! Writes verified pieces into a single output file at their byte offset.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace};

use crate::error::{Result, TorrentError};
use crate::storage::writer::PieceWriter;

/// Piece writer backed by one file on disk
#[derive(Debug)]
pub struct FileWriter {
    /// Output file path
    path: PathBuf,
    /// Nominal piece length; piece `i` starts at `i * piece_length`
    piece_length: u64,
    /// Open handle; seeks and writes happen under the lock
    file: Mutex<fs::File>,
}

impl FileWriter {
    /// Create (or truncate) the output file and size it to `total_length`
    pub async fn create(path: &Path, total_length: u64, piece_length: u64) -> Result<Self> {
        info!("Creating output file: {} ({} bytes)", path.display(), total_length);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                debug!("Creating directory: {}", parent.display());
                fs::create_dir_all(parent).await.map_err(|e| {
                    error!("Failed to create directory '{}': {}", parent.display(), e);
                    TorrentError::storage(parent.display().to_string(), &e)
                })?;
            }
        }

        let file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await
            .map_err(|e| {
                error!("Failed to create file '{}': {}", path.display(), e);
                TorrentError::storage(path.display().to_string(), &e)
            })?;
        file.set_len(total_length).await.map_err(|e| {
            error!("Failed to size file '{}': {}", path.display(), e);
            TorrentError::storage(path.display().to_string(), &e)
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            piece_length,
            file: Mutex::new(file),
        })
    }

    fn io_error(&self, err: std::io::Error) -> TorrentError {
        error!("I/O error on '{}': {}", self.path.display(), err);
        TorrentError::storage(self.path.display().to_string(), &err)
    }
}

#[async_trait]
impl PieceWriter for FileWriter {
    async fn write_piece(&self, index: u32, data: Bytes) -> Result<()> {
        let offset = index as u64 * self.piece_length;
        debug!("Writing piece {} to disk at offset {} ({} bytes)", index, offset, data.len());

        let mut file = self.file.lock().await;
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(|e| self.io_error(e))?;
        file.write_all(&data).await.map_err(|e| self.io_error(e))?;
        trace!("Piece {} written successfully", index);
        Ok(())
    }

    async fn finish(&self) -> Result<()> {
        let mut file = self.file.lock().await;
        file.flush().await.map_err(|e| self.io_error(e))?;
        file.sync_all().await.map_err(|e| self.io_error(e))?;
        info!("Finished writing {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pieces_land_at_their_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/sample.bin");
        let writer = FileWriter::create(&path, 10, 4).await.unwrap();

        writer.write_piece(2, Bytes::from_static(b"ij")).await.unwrap();
        writer.write_piece(0, Bytes::from_static(b"abcd")).await.unwrap();
        writer.write_piece(1, Bytes::from_static(b"efgh")).await.unwrap();
        writer.finish().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"abcdefghij");
    }

    #[tokio::test]
    async fn test_file_is_presized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sparse.bin");
        let writer = FileWriter::create(&path, 1000, 100).await.unwrap();
        writer.write_piece(3, Bytes::from_static(b"x")).await.unwrap();
        writer.finish().await.unwrap();

        let contents = std::fs::read(&path).unwrap();
        assert_eq!(contents.len(), 1000);
        assert_eq!(contents[300], b'x');
        assert_eq!(contents[0], 0);
    }

    #[tokio::test]
    async fn test_create_reuses_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("nested/a.bin");
        let second = dir.path().join("nested/b.bin");

        FileWriter::create(&first, 4, 4).await.unwrap();
        let writer = FileWriter::create(&second, 4, 4).await.unwrap();
        writer.write_piece(0, Bytes::from_static(b"wxyz")).await.unwrap();
        writer.finish().await.unwrap();

        assert_eq!(std::fs::read(&second).unwrap(), b"wxyz");
        assert_eq!(std::fs::read(&first).unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_create_in_missing_dir_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"").unwrap();

        let err = FileWriter::create(&blocker.join("child.bin"), 10, 5).await.unwrap_err();
        assert!(matches!(err, TorrentError::Storage { .. }));
    }
}
