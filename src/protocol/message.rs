//! BitTorrent protocol messages
//!
//! Defines the framed messages exchanged after the handshake.

use bytes::{Buf, BufMut, BytesMut};
use tracing::{debug, error, trace};

use crate::error::{Result, TorrentError};

/// BitTorrent message IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for MessageId {
    type Error = TorrentError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            8 => Ok(MessageId::Cancel),
            _ => {
                error!("Invalid message ID: {}", value);
                Err(TorrentError::peer_protocol("", format!("unknown message id {}", value)))
            }
        }
    }
}

/// BitTorrent protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece_index: u32 },
    Bitfield { bitfield: Vec<u8> },
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
}

impl Message {
    /// Get the message ID (returns None for KeepAlive)
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            Message::Choke => Some(MessageId::Choke),
            Message::Unchoke => Some(MessageId::Unchoke),
            Message::Interested => Some(MessageId::Interested),
            Message::NotInterested => Some(MessageId::NotInterested),
            Message::Have { .. } => Some(MessageId::Have),
            Message::Bitfield { .. } => Some(MessageId::Bitfield),
            Message::Request { .. } => Some(MessageId::Request),
            Message::Piece { .. } => Some(MessageId::Piece),
            Message::Cancel { .. } => Some(MessageId::Cancel),
            Message::KeepAlive => None,
        }
    }

    /// Get the message length (excluding the length prefix)
    pub fn length(&self) -> u32 {
        match self {
            Message::KeepAlive => 0,
            Message::Choke | Message::Unchoke | Message::Interested | Message::NotInterested => 1,
            Message::Have { .. } => 5,
            Message::Bitfield { bitfield } => 1 + bitfield.len() as u32,
            Message::Request { .. } | Message::Cancel { .. } => 13,
            Message::Piece { block, .. } => 9 + block.len() as u32,
        }
    }

    /// Serialize the message to bytes (including length prefix)
    pub fn serialize(&self) -> Vec<u8> {
        trace!("Serializing message: {:?}", self.message_id());
        let mut buf = BytesMut::with_capacity(4 + self.length() as usize);
        buf.put_u32(self.length());

        if let Some(id) = self.message_id() {
            buf.put_u8(id as u8);
        }

        match self {
            Message::KeepAlive
            | Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => {}
            Message::Have { piece_index } => buf.put_u32(*piece_index),
            Message::Bitfield { bitfield } => buf.put_slice(bitfield),
            Message::Request { index, begin, length } | Message::Cancel { index, begin, length } => {
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Piece { index, begin, block } => {
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(block);
            }
        }

        buf.to_vec()
    }

    /// Deserialize a complete frame (including length prefix)
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(TorrentError::peer_protocol(
                "",
                format!("frame of {} bytes has no length prefix", data.len()),
            ));
        }
        let mut buf = data;
        let length = buf.get_u32() as usize;
        if length != buf.remaining() {
            return Err(TorrentError::peer_protocol(
                "",
                format!("length prefix {} but {} bytes follow", length, buf.remaining()),
            ));
        }
        Self::from_body(buf)
    }

    /// Decode a frame body: the id byte and its payload, without the length prefix
    ///
    /// An empty body is a keep-alive.
    pub fn from_body(body: &[u8]) -> Result<Self> {
        let Some((&id, mut payload)) = body.split_first() else {
            trace!("Received KeepAlive message");
            return Ok(Message::KeepAlive);
        };
        let message_id = MessageId::try_from(id)?;

        let message = match message_id {
            MessageId::Choke => {
                expect_len(message_id, payload, 0)?;
                Message::Choke
            }
            MessageId::Unchoke => {
                expect_len(message_id, payload, 0)?;
                Message::Unchoke
            }
            MessageId::Interested => {
                expect_len(message_id, payload, 0)?;
                Message::Interested
            }
            MessageId::NotInterested => {
                expect_len(message_id, payload, 0)?;
                Message::NotInterested
            }
            MessageId::Have => {
                expect_len(message_id, payload, 4)?;
                Message::Have {
                    piece_index: payload.get_u32(),
                }
            }
            MessageId::Bitfield => Message::Bitfield {
                bitfield: payload.to_vec(),
            },
            MessageId::Request | MessageId::Cancel => {
                expect_len(message_id, payload, 12)?;
                let index = payload.get_u32();
                let begin = payload.get_u32();
                let length = payload.get_u32();
                if message_id == MessageId::Request {
                    Message::Request { index, begin, length }
                } else {
                    Message::Cancel { index, begin, length }
                }
            }
            MessageId::Piece => {
                if payload.len() < 8 {
                    return Err(TorrentError::peer_protocol(
                        "",
                        format!("Piece payload is {} bytes, expected at least 8", payload.len()),
                    ));
                }
                let index = payload.get_u32();
                let begin = payload.get_u32();
                Message::Piece {
                    index,
                    begin,
                    block: payload.to_vec(),
                }
            }
        };

        debug!("Decoded {:?} message", message_id);
        Ok(message)
    }
}

/// Fixed-size payloads must match exactly
fn expect_len(id: MessageId, payload: &[u8], expected: usize) -> Result<()> {
    if payload.len() != expected {
        error!("{:?} message has {} payload bytes, expected {}", id, payload.len(), expected);
        return Err(TorrentError::peer_protocol(
            "",
            format!("{:?} payload is {} bytes, expected {}", id, payload.len(), expected),
        ));
    }
    Ok(())
}
