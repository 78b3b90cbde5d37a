//! Barrier bookkeeping shared by channel-level and input-level alignment.
//!
//! A [`BarrierTracker`] follows one checkpoint at a time across a fixed set
//! of parties (the channels of a gate, or the logical inputs of a task).
//! It decides when a checkpoint starts, when every live party has reported
//! its barrier, and which barriers are stale. What to *do* with events in
//! the meantime (buffer, block, capture) is left to the caller.
//!
//! ## Rules
//!
//! 1. The first barrier of a checkpoint starts it.
//! 2. A barrier for a newer checkpoint aborts the pending one.
//! 3. Barriers for checkpoints at or below the last closed ID are stale.
//! 4. Finished parties are excluded from the pending set.
//! 5. A `CANCEL` barrier or [`BarrierTracker::cancel`] closes the pending
//!    checkpoint if its ID is not newer than the canceled one.

use std::time::Instant;

use super::barrier::CheckpointBarrier;

/// Result of feeding a barrier to a [`BarrierTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierOutcome {
    /// Stale, duplicate or canceled; nothing to do.
    Ignored,
    /// The barrier canceled the pending checkpoint with this ID.
    Aborted(u64),
    /// Recorded; other parties are still pending.
    Pending {
        /// This barrier started a new checkpoint.
        started: bool,
        /// A previously pending checkpoint was aborted by this barrier.
        aborted: Option<u64>,
    },
    /// Every live party has reported the barrier.
    Completed {
        /// The barrier of the completed checkpoint (as first observed).
        barrier: CheckpointBarrier,
        /// This barrier started the checkpoint (single live party).
        started: bool,
        /// A previously pending checkpoint was aborted by this barrier.
        aborted: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy)]
struct PendingCheckpoint {
    barrier: CheckpointBarrier,
    started_at: Instant,
}

/// Tracks which parties have reported the pending checkpoint's barrier.
#[derive(Debug)]
pub struct BarrierTracker {
    reported: Vec<bool>,
    finished: Vec<bool>,
    reported_count: usize,
    pending: Option<PendingCheckpoint>,
    last_closed: Option<u64>,
}

impl BarrierTracker {
    /// Creates a tracker for `num_parties` parties.
    ///
    /// # Panics
    ///
    /// Panics if `num_parties` is 0.
    #[must_use]
    pub fn new(num_parties: usize) -> Self {
        assert!(num_parties > 0, "num_parties must be > 0");
        Self {
            reported: vec![false; num_parties],
            finished: vec![false; num_parties],
            reported_count: 0,
            pending: None,
            last_closed: None,
        }
    }

    /// Records a barrier from `party`.
    ///
    /// # Panics
    ///
    /// Panics if `party` is out of range.
    pub fn on_barrier(&mut self, party: usize, barrier: CheckpointBarrier) -> BarrierOutcome {
        assert!(
            party < self.reported.len(),
            "party {party} >= num_parties {}",
            self.reported.len()
        );

        if barrier.is_cancel() {
            return match self.cancel(barrier.checkpoint_id) {
                Some(id) => BarrierOutcome::Aborted(id),
                None => BarrierOutcome::Ignored,
            };
        }
        if self.is_closed(barrier.checkpoint_id) {
            return BarrierOutcome::Ignored;
        }

        let mut aborted = None;
        match self.pending {
            Some(p) if p.barrier.checkpoint_id == barrier.checkpoint_id => {
                if self.reported[party] {
                    return BarrierOutcome::Ignored;
                }
                self.mark(party);
                return self.outcome(false, None);
            }
            Some(p) if barrier.checkpoint_id < p.barrier.checkpoint_id => {
                return BarrierOutcome::Ignored;
            }
            Some(p) => {
                aborted = Some(p.barrier.checkpoint_id);
                self.close(p.barrier.checkpoint_id);
            }
            None => {}
        }

        self.pending = Some(PendingCheckpoint {
            barrier,
            started_at: Instant::now(),
        });
        self.mark(party);
        self.outcome(true, aborted)
    }

    /// Excludes `party` from alignment after it reached end of input.
    ///
    /// Returns the pending barrier if this completes the checkpoint.
    pub fn on_party_finished(&mut self, party: usize) -> Option<CheckpointBarrier> {
        if self.finished.get(party).copied().unwrap_or(true) {
            return None;
        }
        self.finished[party] = true;
        let pending = self.pending?;
        if self.all_live_reported() {
            self.close(pending.barrier.checkpoint_id);
            Some(pending.barrier)
        } else {
            None
        }
    }

    /// Cancels checkpoint `checkpoint_id` and every older one.
    ///
    /// Returns the ID of the pending checkpoint if it was aborted.
    pub fn cancel(&mut self, checkpoint_id: u64) -> Option<u64> {
        let aborted = match self.pending {
            Some(p) if p.barrier.checkpoint_id <= checkpoint_id => {
                self.close(p.barrier.checkpoint_id);
                Some(p.barrier.checkpoint_id)
            }
            _ => None,
        };
        if !self.is_closed(checkpoint_id) {
            self.last_closed = Some(checkpoint_id);
        }
        aborted
    }

    /// Marks the pending checkpoint as unaligned.
    pub fn convert_to_unaligned(&mut self) {
        if let Some(p) = self.pending.as_mut() {
            p.barrier = p.barrier.as_unaligned();
        }
    }

    /// The barrier of the pending checkpoint, if any.
    #[must_use]
    pub fn pending(&self) -> Option<CheckpointBarrier> {
        self.pending.map(|p| p.barrier)
    }

    /// When the pending checkpoint started.
    #[must_use]
    pub fn pending_since(&self) -> Option<Instant> {
        self.pending.map(|p| p.started_at)
    }

    /// Whether `party` has reported the pending checkpoint's barrier.
    #[must_use]
    pub fn has_reported(&self, party: usize) -> bool {
        self.pending.is_some() && self.reported.get(party).copied().unwrap_or(false)
    }

    /// Whether `party` was excluded after finishing.
    #[must_use]
    pub fn is_finished(&self, party: usize) -> bool {
        self.finished.get(party).copied().unwrap_or(false)
    }

    /// Number of parties that reported the pending barrier.
    #[must_use]
    pub fn reported_count(&self) -> usize {
        self.reported_count
    }

    /// Highest checkpoint ID that was completed, aborted or canceled.
    #[must_use]
    pub fn last_closed(&self) -> Option<u64> {
        self.last_closed
    }

    /// Whether a barrier for `checkpoint_id` would be discarded as stale.
    #[must_use]
    pub fn is_closed(&self, checkpoint_id: u64) -> bool {
        self.last_closed.is_some_and(|closed| checkpoint_id <= closed)
    }

    fn mark(&mut self, party: usize) {
        if !self.reported[party] {
            self.reported[party] = true;
            self.reported_count += 1;
        }
    }

    fn all_live_reported(&self) -> bool {
        self.reported
            .iter()
            .zip(&self.finished)
            .all(|(&reported, &finished)| reported || finished)
    }

    fn outcome(&mut self, started: bool, aborted: Option<u64>) -> BarrierOutcome {
        match self.pending {
            Some(p) if self.all_live_reported() => {
                self.close(p.barrier.checkpoint_id);
                BarrierOutcome::Completed {
                    barrier: p.barrier,
                    started,
                    aborted,
                }
            }
            _ => BarrierOutcome::Pending { started, aborted },
        }
    }

    fn close(&mut self, checkpoint_id: u64) {
        self.pending = None;
        self.reported.iter_mut().for_each(|r| *r = false);
        self.reported_count = 0;
        if !self.is_closed(checkpoint_id) {
            self.last_closed = Some(checkpoint_id);
        }
    }
}
