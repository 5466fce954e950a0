//! Peer connection module
//!
//! Manages a single outbound peer connection: handshake, interest and choke
//! tracking, and framed message exchange. Every blocking step is bounded by
//! the connection's timeout, and any peer-fatal failure closes the connection.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Result, TorrentError};
use crate::peer::deadline::bounded;
use crate::peer::{ConnectionState, Peer};
use crate::protocol::{BitTorrentWire, Handshake, Message, WireProtocol};

/// Represents a connected peer
#[derive(Debug)]
pub struct PeerConnection {
    /// Peer information
    pub peer: Peer,
    /// TCP connection stream
    stream: TcpStream,
    /// Wire protocol handler
    wire: BitTorrentWire,
    /// Limit for each connect, handshake and frame operation
    timeout: Duration,
}

impl PeerConnection {
    /// Connect to a peer at the given address and perform handshake
    pub async fn connect(
        addr: SocketAddr,
        info_hash: [u8; 20],
        our_peer_id: [u8; 20],
        timeout: Duration,
    ) -> Result<Self> {
        info!("Connecting to peer: {}", addr);

        let stream = bounded(addr, "connect", timeout, async {
            TcpStream::connect(addr).await.map_err(|e| {
                error!("Failed to connect to {}: {}", addr, e);
                TorrentError::peer_io(addr, &e)
            })
        })
        .await?;
        debug!("TCP connection established with {}", addr);

        let mut connection = Self {
            peer: Peer::new(addr),
            stream,
            wire: BitTorrentWire,
            timeout,
        };

        if let Err(e) = connection.perform_handshake(info_hash, our_peer_id).await {
            connection.close().await;
            return Err(e);
        }

        info!("Successfully connected and handshaked with peer: {}", addr);
        Ok(connection)
    }

    /// Exchange handshakes and check the peer serves our torrent
    async fn perform_handshake(&mut self, info_hash: [u8; 20], our_peer_id: [u8; 20]) -> Result<()> {
        let addr = self.peer.addr;
        let limit = self.timeout;
        let ours = Handshake::new(info_hash, our_peer_id);

        debug!("Sending handshake to peer: {}", addr);
        bounded(addr, "handshake write", limit, self.wire.write_handshake(&mut self.stream, &ours)).await?;
        self.peer.set_state(ConnectionState::HandshakeSent);

        debug!("Reading handshake from peer: {}", addr);
        let theirs = bounded(addr, "handshake read", limit, self.wire.read_handshake(&mut self.stream)).await?;
        theirs.validate(&info_hash).map_err(|e| e.with_peer(addr))?;

        self.peer.peer_id = Some(theirs.peer_id);
        self.peer.set_state(ConnectionState::HandshakeVerified);
        debug!("Peer {} has id {}", addr, theirs.peer_id_hex());
        Ok(())
    }

    /// Declare interest and wait until the peer unchokes us
    ///
    /// `interested` goes out immediately, so a peer that never sends a bitfield
    /// does not stall us; bitfield, have and choke traffic that arrives while
    /// waiting is recorded.
    pub async fn prepare(&mut self) -> Result<()> {
        self.peer.set_state(ConnectionState::AwaitingBitfield);
        self.send(&Message::Interested).await?;
        self.peer.am_interested = true;
        self.peer.set_state(ConnectionState::Interested);

        while self.peer.peer_choking {
            match self.receive().await? {
                Message::Unchoke => break,
                Message::KeepAlive => trace!("Keep-alive from {} while waiting for unchoke", self.peer.addr),
                other => debug!("Waiting for unchoke from {}, got {:?}", self.peer.addr, other.message_id()),
            }
        }

        info!("Peer {} unchoked us", self.peer.addr);
        Ok(())
    }

    /// Send a message to the peer
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        self.ensure_open()?;
        trace!("Sending {:?} message to peer: {}", message.message_id(), self.peer.addr);

        let result = bounded(
            self.peer.addr,
            "frame write",
            self.timeout,
            self.wire.write_message(&mut self.stream, message),
        )
        .await;
        self.close_on_error(result)
    }

    /// Receive the next frame, keep-alives included
    pub async fn receive(&mut self) -> Result<Message> {
        self.ensure_open()?;

        let result = bounded(
            self.peer.addr,
            "frame read",
            self.timeout,
            self.wire.read_message(&mut self.stream),
        )
        .await;
        let message = self.close_on_error(result)?;

        self.observe(&message);
        Ok(message)
    }

    /// Request a block from the peer
    pub async fn request_block(&mut self, index: u32, begin: u32, length: u32) -> Result<()> {
        if !self.peer.can_request() {
            warn!("Cannot request block from peer {}: not unchoked", self.peer.addr);
            return Err(TorrentError::peer_protocol(
                self.peer.addr,
                format!("request for piece {} while in state {:?}", index, self.peer.state),
            ));
        }

        debug!("Requesting piece {} block {} ({} bytes) from peer: {}", index, begin, length, self.peer.addr);
        self.send(&Message::Request { index, begin, length }).await?;
        self.peer.set_state(ConnectionState::Active);
        Ok(())
    }

    /// Shut the socket down and mark the connection closed
    pub async fn close(&mut self) {
        if self.peer.state == ConnectionState::Closed {
            return;
        }
        info!("Closing connection to peer: {}", self.peer.addr);
        if let Err(e) = self.stream.shutdown().await {
            debug!("Shutdown of {} failed: {}", self.peer.addr, e);
        }
        self.peer.set_state(ConnectionState::Closed);
    }

    /// Get the peer's address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer.addr
    }

    /// Get the peer's ID
    pub fn peer_id(&self) -> Option<[u8; 20]> {
        self.peer.peer_id
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.peer.state
    }

    /// Check if the peer is choking us
    pub fn peer_choking(&self) -> bool {
        self.peer.peer_choking
    }

    /// Limit applied to each peer operation
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether the peer advertised a piece
    pub fn has_piece(&self, index: usize) -> bool {
        self.peer.has_piece(index)
    }

    /// Apply the state effects of an incoming message
    fn observe(&mut self, message: &Message) {
        match message {
            Message::Choke => {
                debug!("Peer {} choked us", self.peer.addr);
                self.peer.peer_choking = true;
                if self.peer.state >= ConnectionState::Unchoked {
                    self.peer.set_state(ConnectionState::Interested);
                }
            }
            Message::Unchoke => {
                debug!("Peer {} unchoked us", self.peer.addr);
                self.peer.peer_choking = false;
                if self.peer.state < ConnectionState::Unchoked {
                    self.peer.set_state(ConnectionState::Unchoked);
                }
            }
            Message::Have { piece_index } => {
                trace!("Peer {} has piece {}", self.peer.addr, piece_index);
                self.peer.set_piece(*piece_index);
            }
            Message::Bitfield { bitfield } => {
                debug!("Peer {} sent bitfield of {} bytes", self.peer.addr, bitfield.len());
                self.peer.update_bitfield(bitfield.clone());
            }
            _ => {}
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if !self.peer.state.is_open() {
            return Err(TorrentError::peer_protocol(self.peer.addr, "connection is closed"));
        }
        Ok(())
    }

    fn close_on_error<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            if e.is_peer_fatal() {
                warn!("Closing connection to {}: {}", self.peer.addr, e);
                self.peer.set_state(ConnectionState::Closed);
            }
        }
        result
    }
}
