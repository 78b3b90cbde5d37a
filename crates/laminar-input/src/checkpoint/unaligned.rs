//! In-flight capture for unaligned checkpoints.
//!
//! When a checkpoint runs unaligned (requested by the barrier, forced by
//! configuration, or converted after an alignment timeout), the barrier
//! overtakes the events still travelling on channels that have not
//! reported it yet. Those events are forwarded as usual, and a copy is
//! recorded so the checkpoint can persist them as channel state.
//!
//! ## Protocol
//!
//! 1. First barrier (or timeout) → barrier emitted, recording starts
//! 2. Events from channels that have not reported → forwarded and captured
//! 3. Late barriers arrive → their channel stops being captured
//! 4. All channels reported → [`UnalignedSnapshot`] is complete
//!
//! Capture is bounded. A recorder refuses events past its limit, and the
//! gate then fails the checkpoint instead of holding the channel back:
//! the late barrier sits behind those very events.

use super::barrier::CheckpointBarrier;
use crate::event::StreamEvent;

/// In-flight data captured from a single input channel.
#[derive(Debug, Clone, PartialEq)]
pub struct InFlightChannelData<T> {
    /// Channel the data was captured from.
    pub channel: usize,
    /// Events that overtook the barrier on this channel, in arrival order.
    pub events: Vec<StreamEvent<T>>,
}

/// Result of an unaligned checkpoint on one gate.
#[derive(Debug, Clone, PartialEq)]
pub struct UnalignedSnapshot<T> {
    /// The barrier that triggered this snapshot.
    pub barrier: CheckpointBarrier,
    /// In-flight data from channels that reported late. Channels without
    /// captured events are omitted.
    pub inflight_data: Vec<InFlightChannelData<T>>,
    /// Whether the unaligned path was triggered by the alignment timeout.
    pub was_timeout_triggered: bool,
}

impl<T> UnalignedSnapshot<T> {
    /// Total number of captured events across all channels.
    #[must_use]
    pub fn total_events(&self) -> usize {
        self.inflight_data.iter().map(|d| d.events.len()).sum()
    }
}

/// Accumulates in-flight events while an unaligned checkpoint is pending.
#[derive(Debug)]
pub(crate) struct InFlightRecorder<T> {
    barrier: CheckpointBarrier,
    channels: Vec<Vec<StreamEvent<T>>>,
    captured: usize,
    limit: usize,
    timeout_triggered: bool,
}

impl<T: Clone> InFlightRecorder<T> {
    pub(crate) fn new(
        barrier: CheckpointBarrier,
        num_channels: usize,
        limit: usize,
        timeout_triggered: bool,
    ) -> Self {
        Self {
            barrier,
            channels: (0..num_channels).map(|_| Vec::new()).collect(),
            captured: 0,
            limit,
            timeout_triggered,
        }
    }

    /// Records a copy of `event`. Returns `false`, capturing nothing, once
    /// `limit` events are held.
    pub(crate) fn capture(&mut self, channel: usize, event: &StreamEvent<T>) -> bool {
        if self.captured >= self.limit {
            return false;
        }
        if let Some(events) = self.channels.get_mut(channel) {
            events.push(event.clone());
            self.captured += 1;
        }
        true
    }

    pub(crate) fn barrier(&self) -> CheckpointBarrier {
        self.barrier
    }

    pub(crate) fn finish(self) -> UnalignedSnapshot<T> {
        let inflight_data = self
            .channels
            .into_iter()
            .enumerate()
            .filter(|(_, events)| !events.is_empty())
            .map(|(channel, events)| InFlightChannelData { channel, events })
            .collect();
        UnalignedSnapshot {
            barrier: self.barrier,
            inflight_data,
            was_timeout_triggered: self.timeout_triggered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_groups_by_channel() {
        let barrier = CheckpointBarrier::unaligned(3, 1);
        let mut recorder = InFlightRecorder::new(barrier, 3, 16, false);
        assert!(recorder.capture(2, &StreamEvent::record(1u32, 10)));
        assert!(recorder.capture(0, &StreamEvent::watermark(5)));
        assert!(recorder.capture(2, &StreamEvent::record(2u32, 11)));
        assert!(recorder.capture(9, &StreamEvent::record(3u32, 12)));

        let snapshot = recorder.finish();
        assert_eq!(snapshot.barrier.checkpoint_id, 3);
        assert_eq!(snapshot.total_events(), 3);
        assert_eq!(snapshot.inflight_data.len(), 2);
        assert_eq!(snapshot.inflight_data[0].channel, 0);
        assert_eq!(
            snapshot.inflight_data[1].events,
            vec![StreamEvent::record(1, 10), StreamEvent::record(2, 11)]
        );
        assert!(!snapshot.was_timeout_triggered);
    }

    #[test]
    fn test_empty_capture() {
        let recorder = InFlightRecorder::<u8>::new(CheckpointBarrier::unaligned(1, 1), 2, 16, true);
        let snapshot = recorder.finish();
        assert!(snapshot.inflight_data.is_empty());
        assert!(snapshot.was_timeout_triggered);
    }

    #[test]
    fn test_capture_refused_at_limit() {
        let mut recorder = InFlightRecorder::new(CheckpointBarrier::unaligned(1, 1), 2, 2, false);
        assert!(recorder.capture(0, &StreamEvent::record(1u32, 0)));
        assert!(recorder.capture(1, &StreamEvent::record(2u32, 0)));
        assert!(!recorder.capture(1, &StreamEvent::record(3u32, 0)));
        assert_eq!(recorder.finish().total_events(), 2);
    }
}
