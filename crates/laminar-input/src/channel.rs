//! Input channels: the hand-off point between the transport layer and the
//! task thread.
//!
//! A channel is one physical sub-partition feeding a network input, or the
//! output of a chained source. The task thread consumes it through the
//! [`InputChannel`] trait with non-blocking polls; the transport side may
//! run on its own I/O thread and pushes through a [`ChannelProducer`].
//!
//! # Thread Safety
//!
//! [`QueueChannel`] is the only interior boundary that synchronizes. All
//! state above it (gates, valves, adapters) is owned by the task thread.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::event::StreamEvent;

/// Default bound on queued events per channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4096;

/// Transport-level failure surfaced by a channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The transport reported an unrecoverable failure.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The peer vanished without signaling end of input.
    #[error("channel disconnected before end of input")]
    Disconnected,
}

/// A pull-based source of events for one channel.
pub trait InputChannel<T>: Send {
    /// Returns the next event if one is available right now.
    ///
    /// Never blocks. Returning `Ok(None)` must not change any observable
    /// state of the channel.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if the transport failed. The failure is
    /// fatal for the task.
    fn poll(&mut self) -> Result<Option<StreamEvent<T>>, ChannelError>;

    /// Whether [`poll`](Self::poll) would return something right now.
    fn is_available(&self) -> bool;

    /// Whether no event will ever be returned again.
    fn is_finished(&self) -> bool;

    /// Acknowledges that the barrier for `checkpoint_id` was received on
    /// this channel. Transports that take part in the alignment protocol
    /// override this.
    fn acknowledge_barrier(&mut self, _checkpoint_id: u64) {}
}

/// Error returned from [`ChannelProducer::try_push`].
#[derive(Debug)]
pub struct TryPushError<T> {
    /// The event that could not be pushed.
    pub event: StreamEvent<T>,
    /// Whether the channel was closed (otherwise it was full).
    pub closed: bool,
}

impl<T> TryPushError<T> {
    /// Returns true if the error is due to a full channel.
    #[must_use]
    pub fn is_full(&self) -> bool {
        !self.closed
    }

    /// Consumes the error and returns the event that could not be pushed.
    #[must_use]
    pub fn into_inner(self) -> StreamEvent<T> {
        self.event
    }
}

impl<T> fmt::Display for TryPushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.closed {
            write!(f, "try_push failed: channel is closed")
        } else {
            write!(f, "try_push failed: channel is full")
        }
    }
}

impl<T: fmt::Debug> std::error::Error for TryPushError<T> {}

struct Shared<T> {
    queue: Mutex<VecDeque<StreamEvent<T>>>,
    capacity: usize,
    closed: AtomicBool,
    failure: Mutex<Option<String>>,
    acknowledged: Mutex<Vec<u64>>,
}

/// Creates a bounded channel and returns its producer and consumer halves.
///
/// # Panics
///
/// Panics if `capacity` is 0.
#[must_use]
pub fn channel<T>(capacity: usize) -> (ChannelProducer<T>, QueueChannel<T>) {
    assert!(capacity > 0, "capacity must be > 0");
    let shared = Arc::new(Shared {
        queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        capacity,
        closed: AtomicBool::new(false),
        failure: Mutex::new(None),
        acknowledged: Mutex::new(Vec::new()),
    });
    (
        ChannelProducer {
            shared: Arc::clone(&shared),
        },
        QueueChannel { shared },
    )
}

/// Transport-side half of a [`QueueChannel`].
///
/// Dropping the producer closes the channel (end of input).
pub struct ChannelProducer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> ChannelProducer<T> {
    /// Pushes an event without blocking.
    ///
    /// # Errors
    ///
    /// Returns the event back if the channel is full or closed.
    pub fn try_push(&self, event: StreamEvent<T>) -> Result<(), TryPushError<T>> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(TryPushError {
                event,
                closed: true,
            });
        }
        let mut queue = self.shared.queue.lock();
        if queue.len() >= self.shared.capacity {
            return Err(TryPushError {
                event,
                closed: false,
            });
        }
        queue.push_back(event);
        Ok(())
    }

    /// Pushes every event of `events` until the channel is full.
    ///
    /// Returns the number of events pushed.
    pub fn push_all(&self, events: impl IntoIterator<Item = StreamEvent<T>>) -> usize {
        let mut pushed = 0;
        for event in events {
            if self.try_push(event).is_err() {
                break;
            }
            pushed += 1;
        }
        pushed
    }

    /// Signals end of input. Queued events remain readable.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }

    /// Injects a transport failure. It is surfaced by the consumer once the
    /// events queued before it have been read.
    pub fn fail(&self, reason: impl Into<String>) {
        *self.shared.failure.lock() = Some(reason.into());
        self.close();
    }

    /// Checkpoint IDs whose barriers the consumer acknowledged, in order.
    #[must_use]
    pub fn acknowledged_barriers(&self) -> Vec<u64> {
        self.shared.acknowledged.lock().clone()
    }

    /// Number of queued events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Drop for ChannelProducer<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> fmt::Debug for ChannelProducer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelProducer")
            .field("len", &self.len())
            .field("capacity", &self.shared.capacity)
            .finish_non_exhaustive()
    }
}

/// Task-side half of a bounded channel.
pub struct QueueChannel<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send> InputChannel<T> for QueueChannel<T> {
    fn poll(&mut self) -> Result<Option<StreamEvent<T>>, ChannelError> {
        if let Some(event) = self.shared.queue.lock().pop_front() {
            return Ok(Some(event));
        }
        match self.shared.failure.lock().as_ref() {
            Some(reason) => Err(ChannelError::Transport(reason.clone())),
            None => Ok(None),
        }
    }

    fn is_available(&self) -> bool {
        !self.shared.queue.lock().is_empty() || self.shared.failure.lock().is_some()
    }

    fn is_finished(&self) -> bool {
        // Pushes happen before close, so observing `closed` first makes the
        // emptiness check authoritative.
        self.shared.closed.load(Ordering::Acquire)
            && self.shared.queue.lock().is_empty()
            && self.shared.failure.lock().is_none()
    }

    fn acknowledge_barrier(&mut self, checkpoint_id: u64) {
        self.shared.acknowledged.lock().push(checkpoint_id);
    }
}

impl<T> fmt::Debug for QueueChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueChannel")
            .field("len", &self.shared.queue.lock().len())
            .field("closed", &self.shared.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_poll_fifo() {
        let (tx, mut rx) = channel::<u32>(4);
        tx.try_push(StreamEvent::record(1, 1)).unwrap();
        tx.try_push(StreamEvent::record(2, 2)).unwrap();
        assert!(rx.is_available());

        assert_eq!(rx.poll().unwrap(), Some(StreamEvent::record(1, 1)));
        assert_eq!(rx.poll().unwrap(), Some(StreamEvent::record(2, 2)));
        assert_eq!(rx.poll().unwrap(), None);
        assert!(!rx.is_available());
    }

    #[test]
    fn test_empty_poll_is_side_effect_free() {
        let (tx, mut rx) = channel::<u32>(4);
        for _ in 0..3 {
            assert_eq!(rx.poll().unwrap(), None);
            assert!(!rx.is_available());
            assert!(!rx.is_finished());
        }
        tx.try_push(StreamEvent::record(9, 0)).unwrap();
        assert_eq!(rx.poll().unwrap(), Some(StreamEvent::record(9, 0)));
    }

    #[test]
    fn test_bounded_capacity() {
        let (tx, _rx) = channel::<u32>(2);
        assert_eq!(tx.push_all((0..5).map(|i| StreamEvent::record(i, 0))), 2);
        let err = tx.try_push(StreamEvent::record(7, 0)).unwrap_err();
        assert!(err.is_full());
        assert_eq!(err.into_inner(), StreamEvent::record(7, 0));
    }

    #[test]
    fn test_finished_after_close_and_drain() {
        let (tx, mut rx) = channel::<u32>(4);
        tx.try_push(StreamEvent::record(1, 0)).unwrap();
        drop(tx);
        assert!(!rx.is_finished());
        rx.poll().unwrap();
        assert!(rx.is_finished());
    }

    #[test]
    fn test_push_after_close_rejected() {
        let (tx, _rx) = channel::<u32>(4);
        tx.close();
        let err = tx.try_push(StreamEvent::record(1, 0)).unwrap_err();
        assert!(!err.is_full());
    }

    #[test]
    fn test_failure_surfaces_after_queued_events() {
        let (tx, mut rx) = channel::<u32>(4);
        tx.try_push(StreamEvent::record(1, 0)).unwrap();
        tx.fail("connection reset");
        assert_eq!(rx.poll().unwrap(), Some(StreamEvent::record(1, 0)));
        assert!(rx.is_available());
        assert!(!rx.is_finished());
        assert_eq!(
            rx.poll().unwrap_err(),
            ChannelError::Transport("connection reset".into())
        );
    }

    #[test]
    fn test_barrier_acknowledgement_visible_to_producer() {
        let (tx, mut rx) = channel::<u32>(4);
        rx.acknowledge_barrier(3);
        rx.acknowledge_barrier(4);
        assert_eq!(tx.acknowledged_barriers(), vec![3, 4]);
    }

    #[test]
    fn test_cross_thread_hand_off() {
        let (tx, mut rx) = channel::<u64>(1024);
        let producer = std::thread::spawn(move || {
            for i in 0..500 {
                while tx.try_push(StreamEvent::record(i, 0)).is_err() {
                    std::thread::yield_now();
                }
            }
        });

        let mut received = Vec::new();
        while !rx.is_finished() {
            if let Some(StreamEvent::Record(r)) = rx.poll().unwrap() {
                received.push(r.value);
            }
        }
        producer.join().unwrap();
        assert_eq!(received, (0..500).collect::<Vec<_>>());
    }
}
