//! Download manager module
//!
//! [`PieceDownloader`] fetches and verifies one piece over an unchoked
//! connection. [`TorrentDownload`] drives one task per peer over a shared
//! [`WorkQueue`] until every piece is written.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Result, TorrentError};
use crate::peer::{PeerConnection, DEFAULT_PEER_TIMEOUT};
use crate::protocol::Message;
use crate::storage::piece::{Block, PieceAssembly};
use crate::storage::queue::WorkQueue;
use crate::storage::writer::PieceWriter;
use crate::torrent::TorrentInfo;

/// Default number of block requests kept in flight
pub const DEFAULT_PIPELINE_DEPTH: usize = 5;

/// Default number of concurrent peer connections
pub const DEFAULT_MAX_PEERS: usize = 5;

/// Default number of failed attempts before a piece is abandoned
pub const DEFAULT_MAX_PIECE_ATTEMPTS: u32 = 5;

/// Download statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadStats {
    /// Total verified bytes
    pub downloaded_bytes: u64,
    /// Pieces verified and written
    pub pieces_verified: usize,
    /// Pieces that failed verification
    pub pieces_failed: usize,
    /// Peers that completed the handshake and unchoked us
    pub peers_used: usize,
}

/// Fetches single pieces over an established connection
#[derive(Debug, Clone)]
pub struct PieceDownloader {
    torrent: Arc<TorrentInfo>,
    pipeline_depth: usize,
}

impl PieceDownloader {
    /// Create a downloader; a depth of zero is raised to one
    pub fn new(torrent: Arc<TorrentInfo>, pipeline_depth: usize) -> Self {
        Self {
            torrent,
            pipeline_depth: pipeline_depth.max(1),
        }
    }

    /// Download and verify piece `index`
    ///
    /// The connection must already be prepared (interested and unchoked).
    /// Responses are matched by offset, so the peer may answer in any order.
    /// A choke sends in-flight requests back to the pending list until the
    /// peer unchokes us again.
    pub async fn download(&self, conn: &mut PeerConnection, index: u32) -> Result<Vec<u8>> {
        let piece_len = self
            .torrent
            .piece_size(index as usize)
            .ok_or(TorrentError::InvalidPieceIndex(index))?;
        let expected = self
            .torrent
            .piece_hash(index as usize)
            .ok_or(TorrentError::InvalidPieceIndex(index))?;
        let piece_len = u32::try_from(piece_len).map_err(|_| {
            TorrentError::InvalidPieceTable(format!("piece {} is {} bytes", index, piece_len))
        })?;

        info!("Downloading piece {} ({} bytes) from {}", index, piece_len, conn.peer_addr());
        let mut assembly = PieceAssembly::new(index, piece_len, expected);
        let mut last_progress = Instant::now();

        while !assembly.is_complete() {
            // Keep-alives and chokes reset the per-read deadline but not this one
            if last_progress.elapsed() > conn.timeout() {
                warn!("No block of piece {} from {} in {:?}", index, conn.peer_addr(), conn.timeout());
                return Err(TorrentError::peer_timeout(conn.peer_addr(), "piece progress"));
            }

            if !conn.peer_choking() {
                while assembly.outstanding() < self.pipeline_depth {
                    let Some(request) = assembly.next_request() else {
                        break;
                    };
                    conn.request_block(request.index, request.begin, request.length).await?;
                }
            }

            match conn.receive().await? {
                Message::Piece { index: piece, begin, block } => {
                    let accepted = assembly
                        .accept(Block::new(piece, begin, block))
                        .map_err(|e| e.with_peer(conn.peer_addr()))?;
                    if accepted {
                        last_progress = Instant::now();
                    }
                }
                Message::Choke => {
                    let requeued = assembly.requeue_outstanding();
                    debug!("Choked during piece {}; {} requests will be re-sent", index, requeued);
                }
                Message::Unchoke => debug!("Unchoked again during piece {}", index),
                Message::KeepAlive => trace!("Keep-alive during piece {}", index),
                other => trace!("Ignoring {:?} during piece {}", other.message_id(), index),
            }
        }

        let data = assembly.finish()?;
        info!("Piece {} verified", index);
        Ok(data)
    }
}

/// Tunables for a whole-torrent download
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Limit for every connect, handshake and frame operation
    pub peer_timeout: Duration,
    /// Block requests kept in flight per connection
    pub pipeline_depth: usize,
    /// Peer connections used at once
    pub max_peers: usize,
    /// Failed attempts before a piece fails the download
    pub max_piece_attempts: u32,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            peer_timeout: DEFAULT_PEER_TIMEOUT,
            pipeline_depth: DEFAULT_PIPELINE_DEPTH,
            max_peers: DEFAULT_MAX_PEERS,
            max_piece_attempts: DEFAULT_MAX_PIECE_ATTEMPTS,
        }
    }
}

/// State shared by every peer task
struct Shared {
    torrent: Arc<TorrentInfo>,
    peer_id: [u8; 20],
    options: DownloadOptions,
    queue: WorkQueue,
    writer: Arc<dyn PieceWriter>,
    /// Peer addresses not tried yet
    candidates: Mutex<VecDeque<SocketAddr>>,
    stats: Mutex<DownloadStats>,
    /// Error that ended the download early
    failure: Mutex<Option<TorrentError>>,
}

impl Shared {
    /// Record the first fatal error and stop handing out work
    async fn fail(&self, err: TorrentError) {
        let mut failure = self.failure.lock().await;
        if failure.is_none() {
            error!("Download failed: {}", err);
            *failure = Some(err);
        }
        drop(failure);
        self.queue.close().await;
    }

    /// Return a piece to the queue; abandon the download once it failed too often
    async fn release(&self, index: u32, err: TorrentError) {
        let attempts = self.queue.release(index).await;
        if attempts >= self.options.max_piece_attempts {
            warn!("Piece {} failed {} times, giving up", index, attempts);
            self.fail(err).await;
        }
    }
}

/// Whole-torrent download over several peers
pub struct TorrentDownload {
    torrent: Arc<TorrentInfo>,
    peer_id: [u8; 20],
    options: DownloadOptions,
}

impl TorrentDownload {
    /// Create a download for `torrent` using our `peer_id`
    pub fn new(torrent: Arc<TorrentInfo>, peer_id: [u8; 20], options: DownloadOptions) -> Self {
        Self {
            torrent,
            peer_id,
            options,
        }
    }

    /// Download every piece from `peers` and hand each verified piece to `writer`
    ///
    /// At most `max_peers` workers run at once. Each worker takes the next
    /// untried address and stays with that peer until the queue is drained or
    /// the peer fails; a failed peer gives its piece back and the worker moves
    /// on to the next address. A piece that fails its hash check goes back to
    /// the queue. If work remains once every address is used up, the result
    /// is [`TorrentError::NoPeersAvailable`].
    pub async fn run(
        &self,
        peers: impl IntoIterator<Item = SocketAddr>,
        writer: Arc<dyn PieceWriter>,
    ) -> Result<DownloadStats> {
        let piece_count = self.torrent.piece_count() as u32;
        let candidates: VecDeque<SocketAddr> = peers.into_iter().collect();
        let workers = candidates.len().min(self.options.max_peers.max(1));
        info!(
            "Downloading {} pieces of '{}' with {} workers over {} peers",
            piece_count,
            self.torrent.name,
            workers,
            candidates.len()
        );

        let shared = Arc::new(Shared {
            torrent: Arc::clone(&self.torrent),
            peer_id: self.peer_id,
            options: self.options.clone(),
            queue: WorkQueue::new(0..piece_count),
            writer,
            candidates: Mutex::new(candidates),
            stats: Mutex::new(DownloadStats::default()),
            failure: Mutex::new(None),
        });

        let mut tasks = JoinSet::new();
        for _ in 0..workers {
            let shared = Arc::clone(&shared);
            tasks.spawn(async move { peer_worker(shared).await });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Peer task panicked or was cancelled: {}", e);
            }
        }

        if let Some(err) = shared.failure.lock().await.take() {
            return Err(err);
        }

        let remaining = shared.queue.remaining().await;
        if remaining > 0 {
            error!("All peers gone with {} pieces left", remaining);
            return Err(TorrentError::NoPeersAvailable { remaining });
        }

        shared.writer.finish().await?;
        let stats = shared.stats.lock().await.clone();
        info!(
            "Download complete: {} pieces, {} bytes, {} failed verifications",
            stats.pieces_verified, stats.downloaded_bytes, stats.pieces_failed
        );
        Ok(stats)
    }
}

/// Work through candidate peers until the queue is drained or none are left
async fn peer_worker(shared: Arc<Shared>) {
    loop {
        if shared.failure.lock().await.is_some() || shared.queue.remaining().await == 0 {
            break;
        }
        let Some(addr) = shared.candidates.lock().await.pop_front() else {
            break;
        };
        if !peer_session(addr, &shared).await {
            break;
        }
    }
}

/// Connect to one peer and download pieces from it
///
/// Returns `true` when the peer failed and another one should be tried.
async fn peer_session(addr: SocketAddr, shared: &Shared) -> bool {
    let mut conn = match PeerConnection::connect(
        addr,
        shared.torrent.info_hash,
        shared.peer_id,
        shared.options.peer_timeout,
    )
    .await
    {
        Ok(conn) => conn,
        Err(e) => {
            warn!("Skipping peer {}: {}", addr, e);
            return true;
        }
    };

    if let Err(e) = conn.prepare().await {
        warn!("Peer {} never unchoked us: {}", addr, e);
        conn.close().await;
        return true;
    }
    shared.stats.lock().await.peers_used += 1;

    let downloader = PieceDownloader::new(Arc::clone(&shared.torrent), shared.options.pipeline_depth);
    let mut peer_failed = false;

    while let Some(index) = shared.queue.next().await {
        match downloader.download(&mut conn, index).await {
            Ok(data) => {
                let len = data.len() as u64;
                if let Err(e) = shared.writer.write_piece(index, Bytes::from(data)).await {
                    shared.queue.release(index).await;
                    shared.fail(e).await;
                    break;
                }
                shared.queue.complete(index).await;

                let mut stats = shared.stats.lock().await;
                stats.pieces_verified += 1;
                stats.downloaded_bytes += len;
                debug!("Peer {} finished piece {} ({} done)", addr, index, stats.pieces_verified);
            }
            Err(e @ TorrentError::PieceHashMismatch { .. }) => {
                warn!("Peer {} sent a corrupt piece {}: {}", addr, index, e);
                shared.stats.lock().await.pieces_failed += 1;
                shared.release(index, e).await;
            }
            Err(e) => {
                warn!("Dropping peer {} during piece {}: {}", addr, index, e);
                shared.release(index, e).await;
                peer_failed = true;
                break;
            }
        }
    }

    conn.close().await;
    peer_failed
}
