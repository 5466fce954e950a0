//! Shared piece work queue
//!
//! Peer tasks claim piece indices from a single queue, so each piece has at
//! most one active downloader.

use std::collections::{HashMap, VecDeque};

use tokio::sync::{Mutex, Notify};
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct QueueState {
    /// Indices waiting for a downloader
    needed: VecDeque<u32>,
    /// Pieces handed out and not yet completed or released
    claimed: usize,
    /// Failed attempts per piece
    attempts: HashMap<u32, u32>,
    /// No more pieces will be handed out
    closed: bool,
}

/// Work queue of piece indices shared by all peer tasks
#[derive(Debug)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    /// Signalled whenever a claimed piece is completed or released
    changed: Notify,
}

impl WorkQueue {
    /// Create a queue holding `pieces` in order
    pub fn new(pieces: impl IntoIterator<Item = u32>) -> Self {
        let needed: VecDeque<u32> = pieces.into_iter().collect();
        debug!("Work queue created with {} pieces", needed.len());
        Self {
            state: Mutex::new(QueueState {
                needed,
                ..Default::default()
            }),
            changed: Notify::new(),
        }
    }

    /// Take the next piece; the caller becomes its only downloader
    ///
    /// Returns `None` at once if nothing is queued right now.
    pub async fn claim(&self) -> Option<u32> {
        let mut state = self.state.lock().await;
        if state.closed {
            return None;
        }
        let index = state.needed.pop_front()?;
        state.claimed += 1;
        trace!("Claimed piece {}", index);
        Some(index)
    }

    /// Claim the next piece, waiting while other tasks still hold claims
    ///
    /// A claimed piece may come back through [`WorkQueue::release`], so an
    /// empty queue only means "done" once nothing is claimed. Returns `None`
    /// when all work is complete or the queue was closed.
    pub async fn next(&self) -> Option<u32> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.closed {
                    return None;
                }
                if let Some(index) = state.needed.pop_front() {
                    state.claimed += 1;
                    trace!("Claimed piece {}", index);
                    return Some(index);
                }
                if state.claimed == 0 {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Stop handing out pieces and wake every waiting task
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.changed.notify_waiters();
    }

    /// Mark a claimed piece as done
    pub async fn complete(&self, index: u32) {
        let mut state = self.state.lock().await;
        state.claimed = state.claimed.saturating_sub(1);
        state.attempts.remove(&index);
        drop(state);
        trace!("Completed piece {}", index);
        self.changed.notify_waiters();
    }

    /// Put a claimed piece back at the end of the queue after a failed attempt
    ///
    /// Returns the number of failed attempts recorded for the piece.
    pub async fn release(&self, index: u32) -> u32 {
        let mut state = self.state.lock().await;
        state.claimed = state.claimed.saturating_sub(1);
        state.needed.push_back(index);
        let attempts = state.attempts.entry(index).or_insert(0);
        *attempts += 1;
        let attempts = *attempts;
        drop(state);
        debug!("Released piece {} after {} failed attempts", index, attempts);
        self.changed.notify_waiters();
        attempts
    }

    /// Pieces not yet completed, claimed ones included
    pub async fn remaining(&self) -> usize {
        let state = self.state.lock().await;
        state.needed.len() + state.claimed
    }
}
