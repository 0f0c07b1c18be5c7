//! Deferred ICE candidates
//!
//! Candidates that arrive before the remote description is set cannot be
//! applied yet. They are held in receipt order and handed back exactly once.

use super::backend::IceCandidate;
use std::collections::VecDeque;

/// Ordered queue of remote candidates awaiting a remote description
#[derive(Debug, Default)]
pub struct PendingCandidates {
    queue: VecDeque<IceCandidate>,
}

impl PendingCandidates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: IceCandidate) {
        self.queue.push_back(candidate);
    }

    /// Take every queued candidate in receipt order, leaving the queue empty
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
