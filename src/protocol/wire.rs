//! Wire protocol utilities
//!
//! Reads and writes handshakes and length-prefixed frames on any async stream.
//! Errors carry an empty peer label; the connection attaches its address.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{error, trace};

use super::handshake::HANDSHAKE_LEN;
use super::{Handshake, Message};
use crate::error::{Result, TorrentError};

/// Largest frame body accepted from a peer
///
/// A piece message carries at most one 16 KiB block plus a 9 byte header, and a
/// bitfield for very large torrents can run to a few hundred KiB.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// WireProtocol trait for protocol utilities
#[allow(async_fn_in_trait)]
pub trait WireProtocol {
    /// Read a complete message from the stream
    async fn read_message<R: AsyncReadExt + Unpin>(&mut self, reader: &mut R) -> Result<Message>;

    /// Write a message to the stream
    async fn write_message<W: AsyncWriteExt + Unpin>(&mut self, writer: &mut W, message: &Message) -> Result<()>;

    /// Read a handshake from the stream
    async fn read_handshake<R: AsyncReadExt + Unpin>(&mut self, reader: &mut R) -> Result<Handshake>;

    /// Write a handshake to the stream
    async fn write_handshake<W: AsyncWriteExt + Unpin>(&mut self, writer: &mut W, handshake: &Handshake) -> Result<()>;
}

/// Default implementation of WireProtocol
#[derive(Debug, Default, Clone, Copy)]
pub struct BitTorrentWire;

impl WireProtocol for BitTorrentWire {
    /// Read the 4-byte length, then exactly that many bytes
    async fn read_message<R: AsyncReadExt + Unpin>(&mut self, reader: &mut R) -> Result<Message> {
        let mut length_buf = [0u8; 4];
        reader.read_exact(&mut length_buf).await.map_err(io_error)?;
        let length = u32::from_be_bytes(length_buf) as usize;

        if length == 0 {
            trace!("Read keep-alive frame");
            return Ok(Message::KeepAlive);
        }

        if length > MAX_FRAME_LEN {
            error!("Frame length {} exceeds limit {}", length, MAX_FRAME_LEN);
            return Err(TorrentError::peer_protocol(
                "",
                format!("frame length {} exceeds limit {}", length, MAX_FRAME_LEN),
            ));
        }

        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).await.map_err(io_error)?;
        trace!("Read frame of {} bytes", length);

        Message::from_body(&body)
    }

    async fn write_message<W: AsyncWriteExt + Unpin>(&mut self, writer: &mut W, message: &Message) -> Result<()> {
        let serialized = message.serialize();
        writer.write_all(&serialized).await.map_err(io_error)?;
        writer.flush().await.map_err(io_error)?;
        Ok(())
    }

    /// Read exactly 68 bytes and parse them
    async fn read_handshake<R: AsyncReadExt + Unpin>(&mut self, reader: &mut R) -> Result<Handshake> {
        let mut buf = [0u8; HANDSHAKE_LEN];
        reader.read_exact(&mut buf).await.map_err(io_error)?;
        Handshake::deserialize(&buf)
    }

    async fn write_handshake<W: AsyncWriteExt + Unpin>(&mut self, writer: &mut W, handshake: &Handshake) -> Result<()> {
        let serialized = handshake.serialize();
        writer.write_all(&serialized).await.map_err(io_error)?;
        writer.flush().await.map_err(io_error)?;
        Ok(())
    }
}

fn io_error(err: std::io::Error) -> TorrentError {
    TorrentError::peer_io("", &err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_message_over_stream() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let mut wire = BitTorrentWire;

        let sent = Message::Piece { index: 2, begin: 16384, block: vec![9u8; 32] };
        wire.write_message(&mut client, &sent).await.unwrap();
        wire.write_message(&mut client, &Message::KeepAlive).await.unwrap();

        assert_eq!(wire.read_message(&mut server).await.unwrap(), sent);
        assert_eq!(wire.read_message(&mut server).await.unwrap(), Message::KeepAlive);
    }

    #[tokio::test]
    async fn test_handshake_over_stream() {
        let (mut client, mut server) = tokio::io::duplex(256);
        let mut wire = BitTorrentWire;

        let handshake = Handshake::new([5u8; 20], [6u8; 20]);
        wire.write_handshake(&mut client, &handshake).await.unwrap();
        assert_eq!(wire.read_handshake(&mut server).await.unwrap(), handshake);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&(MAX_FRAME_LEN as u32 + 1).to_be_bytes()).await.unwrap();

        let err = BitTorrentWire.read_message(&mut server).await.unwrap_err();
        assert!(matches!(err, TorrentError::PeerProtocol { .. }));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_io_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0, 0, 0, 13, 6, 0, 0]).await.unwrap();
        drop(client);

        let err = BitTorrentWire.read_message(&mut server).await.unwrap_err();
        assert!(matches!(err, TorrentError::PeerIo { .. }));
    }
}
