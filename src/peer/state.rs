//! Peer state module
//!
//! Defines the connection lifecycle and what we know about the remote peer.

use std::net::SocketAddr;

/// Lifecycle of a peer connection
///
/// States only move forward, except that any state can drop to `Closed` and a
/// choke sends `Unchoked`/`Active` back to `Interested`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ConnectionState {
    /// TCP connect in progress
    #[default]
    Connecting,
    /// Our handshake is on the wire
    HandshakeSent,
    /// The peer answered with a matching info hash
    HandshakeVerified,
    /// Waiting for the peer's optional bitfield
    AwaitingBitfield,
    /// We sent `interested` and wait for `unchoke`
    Interested,
    /// The peer lets us request blocks
    Unchoked,
    /// Block requests are in flight
    Active,
    /// Socket shut down or failed
    Closed,
}

impl ConnectionState {
    /// Whether the connection is still usable
    pub fn is_open(&self) -> bool {
        !matches!(self, ConnectionState::Closed)
    }

    /// Whether block requests are allowed in this state
    pub fn can_request(&self) -> bool {
        matches!(self, ConnectionState::Unchoked | ConnectionState::Active)
    }
}

/// Represents a remote peer and its state
#[derive(Debug, Clone)]
pub struct Peer {
    /// Peer address
    pub addr: SocketAddr,
    /// Peer identifier, known after the handshake
    pub peer_id: Option<[u8; 20]>,
    /// Current state
    pub state: ConnectionState,
    /// We're interested
    pub am_interested: bool,
    /// They're choking us
    pub peer_choking: bool,
    /// Pieces they have (bitfield, high bit first)
    pub bitfield: Option<Vec<u8>>,
}

impl Peer {
    /// Create a new peer
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            peer_id: None,
            state: ConnectionState::Connecting,
            am_interested: false,
            peer_choking: true,
            bitfield: None,
        }
    }

    /// Update peer's bitfield
    pub fn update_bitfield(&mut self, bitfield: Vec<u8>) {
        self.bitfield = Some(bitfield);
    }

    /// Record a `have` announcement, growing the bitfield if needed
    pub fn set_piece(&mut self, piece_index: u32) {
        let byte_index = piece_index as usize / 8;
        let bit_index = 7 - (piece_index % 8);
        let bitfield = self.bitfield.get_or_insert_with(Vec::new);
        if bitfield.len() <= byte_index {
            bitfield.resize(byte_index + 1, 0);
        }
        bitfield[byte_index] |= 1 << bit_index;
    }

    /// Check if peer has specific piece
    pub fn has_piece(&self, piece_index: usize) -> bool {
        if let Some(ref bitfield) = self.bitfield {
            let byte_index = piece_index / 8;
            let bit_index = 7 - (piece_index % 8);

            if byte_index < bitfield.len() {
                let byte = bitfield[byte_index];
                return (byte >> bit_index) & 1 == 1;
            }
        }
        false
    }

    /// Check if we can request from peer
    pub fn can_request(&self) -> bool {
        !self.peer_choking && self.am_interested && self.state.can_request()
    }

    /// Set peer state
    pub fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> Peer {
        Peer::new("127.0.0.1:6881".parse().unwrap())
    }

    #[test]
    fn test_peer_new() {
        let peer = peer();
        assert!(peer.peer_id.is_none());
        assert_eq!(peer.state, ConnectionState::Connecting);
        assert!(!peer.am_interested);
        assert!(peer.peer_choking);
    }

    #[test]
    fn test_has_piece() {
        let mut peer = peer();
        assert!(!peer.has_piece(0));

        peer.update_bitfield(vec![0b1100_0000]);
        assert!(peer.has_piece(0));
        assert!(peer.has_piece(1));
        assert!(!peer.has_piece(2));
        assert!(!peer.has_piece(9));
    }

    #[test]
    fn test_set_piece_grows_bitfield() {
        let mut peer = peer();
        peer.set_piece(10);
        assert_eq!(peer.bitfield, Some(vec![0, 0b0010_0000]));
        assert!(peer.has_piece(10));
        assert!(!peer.has_piece(11));
    }

    #[test]
    fn test_can_request() {
        let mut peer = peer();
        assert!(!peer.can_request());

        peer.am_interested = true;
        peer.set_state(ConnectionState::Interested);
        assert!(!peer.can_request());

        peer.peer_choking = false;
        peer.set_state(ConnectionState::Unchoked);
        assert!(peer.can_request());

        peer.set_state(ConnectionState::Closed);
        assert!(!peer.can_request());
    }

    #[test]
    fn test_state_order() {
        assert!(ConnectionState::Connecting < ConnectionState::HandshakeSent);
        assert!(ConnectionState::Interested < ConnectionState::Unchoked);
        assert!(ConnectionState::Active.is_open());
        assert!(!ConnectionState::Closed.is_open());
    }
}
