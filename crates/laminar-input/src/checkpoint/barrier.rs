//! Checkpoint barriers, and barrier injection for chained sources.
//!
//! Network inputs get barriers in-band from the transport. A chained
//! source has no transport, so the checkpoint coordinator arms a
//! [`CheckpointBarrierInjector`] from its own thread and the task thread
//! claims the barrier through a [`BarrierPollHandle`] before the source's
//! next record. Claiming is a single relaxed load while nothing is armed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Barrier options, OR-ed into [`CheckpointBarrier::flags`].
pub mod flags {
    /// Aligned checkpoint, no options.
    pub const NONE: u64 = 0;
    /// Snapshot full state rather than a delta.
    pub const FULL_SNAPSHOT: u64 = 1 << 0;
    /// Drain in-flight data before the snapshot.
    pub const DRAIN: u64 = 1 << 1;
    /// Abort checkpoint `checkpoint_id` and every older one.
    pub const CANCEL: u64 = 1 << 2;
    /// Capture in-flight data instead of aligning channels.
    pub const UNALIGNED: u64 = 1 << 3;
}

/// Marker delimiting a consistent snapshot point in every channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CheckpointBarrier {
    /// Checkpoint the barrier belongs to. Newer checkpoints have larger IDs.
    pub checkpoint_id: u64,
    /// Sequence number of the barrier on its path.
    pub epoch: u64,
    /// Options from [`flags`].
    pub flags: u64,
}

impl CheckpointBarrier {
    /// An aligned barrier.
    #[must_use]
    pub const fn new(checkpoint_id: u64, epoch: u64) -> Self {
        Self::with_flags(checkpoint_id, epoch, flags::NONE)
    }

    /// A barrier requesting in-flight capture.
    #[must_use]
    pub const fn unaligned(checkpoint_id: u64, epoch: u64) -> Self {
        Self::with_flags(checkpoint_id, epoch, flags::UNALIGNED)
    }

    /// A barrier aborting `checkpoint_id`.
    #[must_use]
    pub const fn cancel(checkpoint_id: u64, epoch: u64) -> Self {
        Self::with_flags(checkpoint_id, epoch, flags::CANCEL)
    }

    const fn with_flags(checkpoint_id: u64, epoch: u64, flags: u64) -> Self {
        Self {
            checkpoint_id,
            epoch,
            flags,
        }
    }

    /// The same barrier, switched to in-flight capture.
    #[must_use]
    pub const fn as_unaligned(self) -> Self {
        Self::with_flags(self.checkpoint_id, self.epoch, self.flags | flags::UNALIGNED)
    }

    /// Whether the barrier aborts a checkpoint.
    #[must_use]
    pub const fn is_cancel(&self) -> bool {
        self.flags & flags::CANCEL != 0
    }

    /// Whether the barrier requests in-flight capture.
    #[must_use]
    pub const fn is_unaligned(&self) -> bool {
        self.flags & flags::UNALIGNED != 0
    }
}

#[derive(Debug, Default)]
struct Armed {
    ready: AtomicBool,
    barrier: Mutex<Option<(u64, u64)>>,
}

/// Coordinator-side half: arms barriers for one chained source.
#[derive(Debug, Default)]
pub struct CheckpointBarrierInjector {
    armed: Arc<Armed>,
    triggered: AtomicU64,
}

impl CheckpointBarrierInjector {
    /// An injector with nothing armed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle for the task thread.
    #[must_use]
    pub fn handle(&self) -> BarrierPollHandle {
        BarrierPollHandle {
            armed: Arc::clone(&self.armed),
        }
    }

    /// Arms a barrier for `checkpoint_id`. An unclaimed older barrier is
    /// replaced.
    pub fn trigger(&self, checkpoint_id: u64, barrier_flags: u64) {
        let mut slot = self.armed.barrier.lock();
        *slot = Some((checkpoint_id, barrier_flags));
        // Raised under the lock so a concurrent claim cannot clear it early.
        self.armed.ready.store(true, Ordering::Release);
        drop(slot);
        self.triggered.fetch_add(1, Ordering::Relaxed);
    }

    /// Barriers armed so far.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.triggered.load(Ordering::Relaxed)
    }
}

/// Task-side half of a [`CheckpointBarrierInjector`].
#[derive(Debug, Clone)]
pub struct BarrierPollHandle {
    armed: Arc<Armed>,
}

impl BarrierPollHandle {
    /// Claims the armed barrier, stamping it with `epoch`. Each armed
    /// barrier is claimed by exactly one handle.
    #[must_use]
    pub fn poll(&self, epoch: u64) -> Option<CheckpointBarrier> {
        if !self.is_pending() {
            return None;
        }
        let mut slot = self.armed.barrier.lock();
        self.armed.ready.store(false, Ordering::Release);
        let (checkpoint_id, barrier_flags) = slot.take()?;
        Some(CheckpointBarrier::with_flags(checkpoint_id, epoch, barrier_flags))
    }

    /// Whether a barrier is armed.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.armed.ready.load(Ordering::Acquire)
    }
}
