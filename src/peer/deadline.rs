//! Deadline wrapper for peer I/O
//!
//! Every blocking step on a peer connection runs through [`bounded`], so a
//! silent or stalled peer always surfaces as [`TorrentError::PeerTimeout`].

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;
use tracing::warn;

use crate::error::{Result, TorrentError};

/// Default limit for a single connect, handshake or frame operation
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(30);

/// Run `fut` with a time limit
///
/// Errors from the future and the timeout itself are labelled with `peer`.
pub async fn bounded<T, F>(peer: impl Display, operation: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(limit, fut).await {
        Ok(result) => result.map_err(|e| e.with_peer(&peer)),
        Err(_) => {
            warn!("Peer {} timed out after {:?} during {}", peer, limit, operation);
            Err(TorrentError::peer_timeout(&peer, operation))
        }
    }
}
