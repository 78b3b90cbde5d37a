//! Checkpoint-aligning input gate.
//!
//! A gate multiplexes the channels of one network input and makes sure
//! that, by the time a barrier for checkpoint K is handed on, every event
//! that preceded K on every channel has been handed on too, and nothing
//! that followed K on any channel has leaked ahead of it.
//!
//! ## Algorithm
//!
//! 1. Barrier arrives on channel `c` → `c` is marked reported
//! 2. Further events from `c` are buffered (aligned mode), up to
//!    `max_buffered_events_per_channel`; past that `c` is not polled
//! 3. Once every live channel reported → emit the barrier
//! 4. Release buffered events channel by channel, in arrival order
//!
//! Unaligned checkpoints skip step 2: the barrier is emitted on first
//! arrival and events from late channels are forwarded and captured (see
//! [`UnalignedSnapshot`]). An aligned checkpoint that stays pending past
//! `aligned_checkpoint_timeout` is converted to unaligned. Capture stops
//! at `max_inflight_events`: the checkpoint is then canceled and a cancel
//! barrier is handed on in place of its snapshot.

use std::collections::VecDeque;

use tracing::{debug, warn};

use super::barrier::CheckpointBarrier;
use super::tracker::{BarrierOutcome, BarrierTracker};
use super::unaligned::{InFlightRecorder, UnalignedSnapshot};
use crate::channel::{ChannelError, InputChannel};
use crate::config::AlignmentConfig;
use crate::event::StreamEvent;

/// An event handed on by a [`CheckpointedInputGate`].
#[derive(Debug, Clone, PartialEq)]
pub enum GateEvent<T> {
    /// An event read from `channel`.
    Event {
        /// Channel index within the gate.
        channel: usize,
        /// The event.
        event: StreamEvent<T>,
    },
    /// The channel reached end of input; nothing follows for it.
    EndOfChannel(usize),
}

/// A channel failure observed by the gate.
#[derive(Debug, Clone, thiserror::Error)]
#[error("channel {channel}: {source}")]
pub struct GateError {
    /// Index of the failed channel.
    pub channel: usize,
    /// The underlying failure.
    #[source]
    pub source: ChannelError,
}

/// Multiplexes N channels and aligns checkpoint barriers across them.
pub struct CheckpointedInputGate<T> {
    channels: Vec<Box<dyn InputChannel<T>>>,
    config: AlignmentConfig,
    tracker: BarrierTracker,
    /// Post-barrier events of reported channels (aligned mode only).
    buffers: Vec<VecDeque<StreamEvent<T>>>,
    /// Events ready to hand on.
    output: VecDeque<GateEvent<T>>,
    /// Channel whose barrier started the pending checkpoint.
    origin: usize,
    recorder: Option<InFlightRecorder<T>>,
    snapshots: VecDeque<UnalignedSnapshot<T>>,
    /// The channel returned nothing more and is finished.
    exhausted: Vec<bool>,
    /// `EndOfChannel` has been queued.
    end_emitted: Vec<bool>,
    next_channel: usize,
}

impl<T: Clone> CheckpointedInputGate<T> {
    /// Creates a gate over `channels`.
    ///
    /// # Panics
    ///
    /// Panics if `channels` is empty.
    #[must_use]
    pub fn new(channels: Vec<Box<dyn InputChannel<T>>>, config: AlignmentConfig) -> Self {
        assert!(!channels.is_empty(), "a gate needs at least one channel");
        let n = channels.len();
        Self {
            channels,
            config,
            tracker: BarrierTracker::new(n),
            buffers: (0..n).map(|_| VecDeque::new()).collect(),
            output: VecDeque::new(),
            origin: 0,
            recorder: None,
            snapshots: VecDeque::new(),
            exhausted: vec![false; n],
            end_emitted: vec![false; n],
            next_channel: 0,
        }
    }

    /// Returns the next event to hand on, if any is ready.
    ///
    /// Channels are polled round-robin, starting after the channel that
    /// produced the previous event.
    ///
    /// # Errors
    ///
    /// Returns [`GateError`] if a channel reports a transport failure.
    pub fn poll_next(&mut self) -> Result<Option<GateEvent<T>>, GateError> {
        self.check_alignment_timeout();
        let n = self.channels.len();
        loop {
            if let Some(event) = self.output.pop_front() {
                return Ok(Some(event));
            }
            let mut progressed = false;
            for _ in 0..n {
                let c = self.next_channel;
                self.next_channel = (c + 1) % n;
                if !self.is_pollable(c) {
                    continue;
                }
                match self.channels[c]
                    .poll()
                    .map_err(|source| GateError { channel: c, source })?
                {
                    Some(event) => {
                        self.on_event(c, event);
                        progressed = true;
                        break;
                    }
                    None if self.channels[c].is_finished() => {
                        self.on_channel_finished(c);
                        progressed = true;
                        break;
                    }
                    None => {}
                }
            }
            if !progressed {
                return Ok(None);
            }
        }
    }

    /// Whether [`poll_next`](Self::poll_next) may return an event now.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !self.output.is_empty()
            || (0..self.channels.len()).any(|c| {
                self.is_pollable(c)
                    && (self.channels[c].is_available() || self.channels[c].is_finished())
            })
    }

    /// Whether every channel ended and everything was handed on.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.output.is_empty() && self.end_emitted.iter().all(|&e| e)
    }

    /// Number of channels multiplexed by this gate.
    #[must_use]
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// The barrier currently being aligned, if any.
    #[must_use]
    pub fn pending_checkpoint(&self) -> Option<CheckpointBarrier> {
        self.tracker.pending()
    }

    /// Number of events held back for alignment.
    #[must_use]
    pub fn buffered_events(&self) -> usize {
        self.buffers.iter().map(VecDeque::len).sum()
    }

    /// Aborts the pending checkpoint if its ID is `checkpoint_id` or older,
    /// and discards later barriers for those checkpoints.
    pub fn cancel_checkpoint(&mut self, checkpoint_id: u64) {
        if let Some(aborted) = self.tracker.cancel(checkpoint_id) {
            warn!(checkpoint_id = aborted, "checkpoint canceled during alignment");
            self.abort_pending();
        }
    }

    /// Takes the oldest completed unaligned snapshot.
    pub fn take_inflight_snapshot(&mut self) -> Option<UnalignedSnapshot<T>> {
        self.snapshots.pop_front()
    }

    fn is_pollable(&self, c: usize) -> bool {
        if self.exhausted[c] {
            return false;
        }
        let blocked = self.recorder.is_none()
            && self.tracker.has_reported(c)
            && self.buffers[c].len() >= self.config.max_buffered_events_per_channel;
        !blocked
    }

    fn on_event(&mut self, c: usize, event: StreamEvent<T>) {
        if let StreamEvent::Barrier(barrier) = event {
            self.on_barrier(c, barrier);
            return;
        }
        if let Some(recorder) = self.recorder.as_mut() {
            if !self.tracker.has_reported(c) && !recorder.capture(c, &event) {
                self.fail_capture(c);
            }
        } else if self.tracker.has_reported(c) {
            self.buffers[c].push_back(event);
            return;
        }
        self.output.push_back(GateEvent::Event { channel: c, event });
    }

    fn on_barrier(&mut self, c: usize, barrier: CheckpointBarrier) {
        self.channels[c].acknowledge_barrier(barrier.checkpoint_id);
        let barrier = if self.config.force_unaligned && !barrier.is_cancel() {
            barrier.as_unaligned()
        } else {
            barrier
        };
        let first_cancel = barrier.is_cancel() && !self.tracker.is_closed(barrier.checkpoint_id);

        match self.tracker.on_barrier(c, barrier) {
            BarrierOutcome::Ignored => {
                if first_cancel {
                    self.forward_cancel(c, barrier);
                } else {
                    debug!(
                        code = crate::error_codes::STALE_BARRIER,
                        channel = c,
                        checkpoint_id = barrier.checkpoint_id,
                        "discarding stale barrier"
                    );
                }
            }
            BarrierOutcome::Aborted(id) => {
                warn!(channel = c, checkpoint_id = id, "checkpoint canceled by barrier");
                self.abort_pending();
                self.forward_cancel(c, barrier);
            }
            BarrierOutcome::Pending { started, aborted } => {
                self.on_aborted(aborted);
                if started {
                    debug!(
                        channel = c,
                        checkpoint_id = barrier.checkpoint_id,
                        unaligned = barrier.is_unaligned(),
                        "barrier alignment started"
                    );
                    self.origin = c;
                    if barrier.is_unaligned() {
                        self.begin_unaligned(barrier, false);
                    }
                } else if barrier.is_unaligned() && self.recorder.is_none() {
                    self.tracker.convert_to_unaligned();
                    self.begin_unaligned(barrier, false);
                }
            }
            BarrierOutcome::Completed {
                barrier: completed,
                started,
                aborted,
            } => {
                self.on_aborted(aborted);
                if started {
                    self.origin = c;
                }
                let completed = if barrier.is_unaligned() {
                    completed.as_unaligned()
                } else {
                    completed
                };
                self.complete(completed);
            }
        }
    }

    fn on_channel_finished(&mut self, c: usize) {
        self.exhausted[c] = true;
        debug!(channel = c, "channel finished");
        if let Some(barrier) = self.tracker.on_party_finished(c) {
            self.complete(barrier);
        }
        if !self.end_emitted[c] && self.buffers[c].is_empty() {
            self.end_emitted[c] = true;
            self.output.push_back(GateEvent::EndOfChannel(c));
        }
    }

    fn check_alignment_timeout(&mut self) {
        let Some(timeout) = self.config.aligned_checkpoint_timeout else {
            return;
        };
        if self.recorder.is_some() {
            return;
        }
        let (Some(barrier), Some(since)) = (self.tracker.pending(), self.tracker.pending_since())
        else {
            return;
        };
        if since.elapsed() >= timeout {
            debug!(
                checkpoint_id = barrier.checkpoint_id,
                reported = self.tracker.reported_count(),
                "alignment timed out, switching to unaligned checkpoint"
            );
            self.tracker.convert_to_unaligned();
            self.begin_unaligned(barrier, true);
        }
    }

    /// Emits the barrier ahead of everything still in flight and starts
    /// recording late channels.
    fn begin_unaligned(&mut self, barrier: CheckpointBarrier, timeout_triggered: bool) {
        let barrier = barrier.as_unaligned();
        self.output.push_back(GateEvent::Event {
            channel: self.origin,
            event: StreamEvent::Barrier(barrier),
        });
        self.release_buffers();
        self.recorder = Some(InFlightRecorder::new(
            barrier,
            self.channels.len(),
            self.config.max_inflight_events,
            timeout_triggered,
        ));
    }

    /// Cancels the unaligned checkpoint whose capture overflowed. Its
    /// barrier already went downstream, so a cancel barrier follows it.
    fn fail_capture(&mut self, c: usize) {
        let Some(recorder) = self.recorder.take() else {
            return;
        };
        let barrier = recorder.barrier();
        warn!(
            channel = c,
            checkpoint_id = barrier.checkpoint_id,
            limit = self.config.max_inflight_events,
            "in-flight capture limit reached, canceling checkpoint"
        );
        self.tracker.cancel(barrier.checkpoint_id);
        self.release_buffers();
        self.forward_cancel(
            c,
            CheckpointBarrier::cancel(barrier.checkpoint_id, barrier.epoch),
        );
    }

    fn complete(&mut self, barrier: CheckpointBarrier) {
        if let Some(recorder) = self.recorder.take() {
            let snapshot = recorder.finish();
            debug!(
                checkpoint_id = snapshot.barrier.checkpoint_id,
                inflight_events = snapshot.total_events(),
                "unaligned checkpoint complete"
            );
            self.snapshots.push_back(snapshot);
            return;
        }
        if barrier.is_unaligned() {
            // Every live channel reported at once; nothing could overtake.
            self.begin_unaligned(barrier, false);
            if let Some(recorder) = self.recorder.take() {
                self.snapshots.push_back(recorder.finish());
            }
            return;
        }
        debug!(
            checkpoint_id = barrier.checkpoint_id,
            buffered = self.buffered_events(),
            "barrier alignment complete"
        );
        self.output.push_back(GateEvent::Event {
            channel: self.origin,
            event: StreamEvent::Barrier(barrier),
        });
        self.release_buffers();
    }

    fn on_aborted(&mut self, aborted: Option<u64>) {
        if let Some(id) = aborted {
            warn!(checkpoint_id = id, "pending checkpoint aborted by newer barrier");
            self.abort_pending();
        }
    }

    fn abort_pending(&mut self) {
        if let Some(recorder) = self.recorder.take() {
            debug!(
                checkpoint_id = recorder.barrier().checkpoint_id,
                "dropping in-flight capture of aborted checkpoint"
            );
        }
        self.release_buffers();
    }

    fn forward_cancel(&mut self, c: usize, barrier: CheckpointBarrier) {
        self.output.push_back(GateEvent::Event {
            channel: c,
            event: StreamEvent::Barrier(barrier),
        });
    }

    fn release_buffers(&mut self) {
        for (c, buffer) in self.buffers.iter_mut().enumerate() {
            self.output.extend(
                buffer
                    .drain(..)
                    .map(|event| GateEvent::Event { channel: c, event }),
            );
            if self.exhausted[c] && !self.end_emitted[c] {
                self.end_emitted[c] = true;
                self.output.push_back(GateEvent::EndOfChannel(c));
            }
        }
    }
}

impl<T> std::fmt::Debug for CheckpointedInputGate<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointedInputGate")
            .field("num_channels", &self.channels.len())
            .field("pending", &self.tracker.pending())
            .field("queued", &self.output.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::channel::{channel, ChannelProducer};

    type Producers = Vec<ChannelProducer<u32>>;

    fn gate(n: usize, config: AlignmentConfig) -> (Producers, CheckpointedInputGate<u32>) {
        let mut producers = Vec::new();
        let mut channels: Vec<Box<dyn InputChannel<u32>>> = Vec::new();
        for _ in 0..n {
            let (tx, rx) = channel(64);
            producers.push(tx);
            channels.push(Box::new(rx));
        }
        (producers, CheckpointedInputGate::new(channels, config))
    }

    fn drain(gate: &mut CheckpointedInputGate<u32>) -> Vec<GateEvent<u32>> {
        let mut out = Vec::new();
        while let Some(event) = gate.poll_next().unwrap() {
            out.push(event);
        }
        out
    }

    fn rec(channel: usize, value: u32) -> GateEvent<u32> {
        GateEvent::Event {
            channel,
            event: StreamEvent::record(value, 0),
        }
    }

    fn barrier_id(event: &GateEvent<u32>) -> Option<u64> {
        match event {
            GateEvent::Event { event, .. } => event.as_barrier().map(|b| b.checkpoint_id),
            GateEvent::EndOfChannel(_) => None,
        }
    }

    #[test]
    fn test_round_robin_across_channels() {
        let (tx, mut gate) = gate(2, AlignmentConfig::default());
        tx[0].push_all([StreamEvent::record(1, 0), StreamEvent::record(2, 0)]);
        tx[1].push_all([StreamEvent::record(10, 0), StreamEvent::record(20, 0)]);

        assert_eq!(drain(&mut gate), vec![rec(0, 1), rec(1, 10), rec(0, 2), rec(1, 20)]);
    }

    #[test]
    fn test_aligned_barrier_holds_back_post_barrier_events() {
        let (tx, mut gate) = gate(2, AlignmentConfig::default());
        let b = CheckpointBarrier::new(1, 1);
        tx[0].push_all([
            StreamEvent::Barrier(b),
            StreamEvent::record(2, 0),
            StreamEvent::watermark(50),
        ]);
        tx[1].push_all([StreamEvent::record(10, 0)]);

        // Channel 1's pre-barrier record flows; channel 0 is buffered.
        assert_eq!(drain(&mut gate), vec![rec(1, 10)]);
        assert_eq!(gate.buffered_events(), 2);
        assert!(gate.pending_checkpoint().is_some());

        tx[1].try_push(StreamEvent::Barrier(b)).unwrap();
        let out = drain(&mut gate);
        assert_eq!(barrier_id(&out[0]), Some(1));
        assert_eq!(out[1], rec(0, 2));
        assert_eq!(
            out[2],
            GateEvent::Event {
                channel: 0,
                event: StreamEvent::watermark(50)
            }
        );
        assert_eq!(tx[0].acknowledged_barriers(), vec![1]);
        assert_eq!(tx[1].acknowledged_barriers(), vec![1]);
    }

    #[test]
    fn test_buffer_bound_blocks_channel() {
        let config = AlignmentConfig {
            max_buffered_events_per_channel: 1,
            ..AlignmentConfig::default()
        };
        let (tx, mut gate) = gate(2, config);
        tx[0].push_all([
            StreamEvent::Barrier(CheckpointBarrier::new(1, 1)),
            StreamEvent::record(1, 0),
            StreamEvent::record(2, 0),
        ]);
        assert!(drain(&mut gate).is_empty());
        assert_eq!(gate.buffered_events(), 1);
        // The second record stays in the channel.
        assert_eq!(tx[0].len(), 1);
    }

    #[test]
    fn test_unaligned_barrier_forwards_and_captures() {
        let (tx, mut gate) = gate(2, AlignmentConfig::default());
        let b = CheckpointBarrier::unaligned(4, 1);
        tx[0].push_all([StreamEvent::Barrier(b), StreamEvent::record(1, 0)]);

        let out = drain(&mut gate);
        assert_eq!(barrier_id(&out[0]), Some(4));
        assert_eq!(out[1], rec(0, 1));

        tx[1].push_all([StreamEvent::record(7, 0), StreamEvent::Barrier(b)]);
        assert_eq!(drain(&mut gate), vec![rec(1, 7)]);

        let snapshot = gate.take_inflight_snapshot().unwrap();
        assert_eq!(snapshot.barrier.checkpoint_id, 4);
        assert_eq!(snapshot.inflight_data.len(), 1);
        assert_eq!(snapshot.inflight_data[0].channel, 1);
        assert_eq!(snapshot.inflight_data[0].events, vec![StreamEvent::record(7, 0)]);
        assert!(gate.take_inflight_snapshot().is_none());
    }

    #[test]
    fn test_inflight_limit_cancels_checkpoint() {
        let config = AlignmentConfig {
            max_inflight_events: 2,
            ..AlignmentConfig::default()
        };
        let (tx, mut gate) = gate(2, config);
        let b = CheckpointBarrier::unaligned(6, 1);
        tx[0].push_all([StreamEvent::Barrier(b)]);
        assert_eq!(barrier_id(&drain(&mut gate)[0]), Some(6));

        tx[1].push_all((1..=4).map(|v| StreamEvent::record(v, 0)));
        tx[1].push_all([StreamEvent::Barrier(b)]);
        let out = drain(&mut gate);

        // Every record is still handed on. The cancel precedes the first
        // record that did not fit.
        let records: Vec<_> = out.iter().filter(|e| barrier_id(e).is_none()).collect();
        assert_eq!(records, vec![&rec(1, 1), &rec(1, 2), &rec(1, 3), &rec(1, 4)]);
        match &out[2] {
            GateEvent::Event {
                channel: 1,
                event: StreamEvent::Barrier(cancel),
            } => {
                assert!(cancel.is_cancel());
                assert_eq!(cancel.checkpoint_id, 6);
            }
            other => panic!("expected cancel barrier, got {other:?}"),
        }
        // The late barrier of the failed checkpoint is discarded.
        assert_eq!(out.len(), 5);
        assert!(gate.take_inflight_snapshot().is_none());
        assert!(gate.pending_checkpoint().is_none());
    }

    #[test]
    fn test_force_unaligned() {
        let config = AlignmentConfig {
            force_unaligned: true,
            ..AlignmentConfig::default()
        };
        let (tx, mut gate) = gate(2, config);
        tx[0].push_all([
            StreamEvent::Barrier(CheckpointBarrier::new(1, 1)),
            StreamEvent::record(5, 0),
        ]);
        let out = drain(&mut gate);
        assert_eq!(out.len(), 2);
        match &out[0] {
            GateEvent::Event {
                event: StreamEvent::Barrier(b),
                ..
            } => assert!(b.is_unaligned()),
            other => panic!("expected barrier, got {other:?}"),
        }
    }

    #[test]
    fn test_alignment_timeout_converts_to_unaligned() {
        let config = AlignmentConfig {
            aligned_checkpoint_timeout: Some(Duration::ZERO),
            ..AlignmentConfig::default()
        };
        let (tx, mut gate) = gate(2, config);
        tx[0].push_all([
            StreamEvent::Barrier(CheckpointBarrier::new(2, 1)),
            StreamEvent::record(1, 0),
        ]);
        // First poll starts alignment and buffers; the next poll times out.
        let mut out = drain(&mut gate);
        out.extend(drain(&mut gate));
        assert_eq!(barrier_id(&out[0]), Some(2));
        assert_eq!(out[1], rec(0, 1));

        tx[1].push_all([
            StreamEvent::record(9, 0),
            StreamEvent::Barrier(CheckpointBarrier::new(2, 1)),
        ]);
        assert_eq!(drain(&mut gate), vec![rec(1, 9)]);
        let snapshot = gate.take_inflight_snapshot().unwrap();
        assert!(snapshot.was_timeout_triggered);
        assert_eq!(snapshot.total_events(), 1);
    }

    #[test]
    fn test_newer_barrier_aborts_pending_alignment() {
        let (tx, mut gate) = gate(2, AlignmentConfig::default());
        tx[0].push_all([
            StreamEvent::Barrier(CheckpointBarrier::new(1, 1)),
            StreamEvent::record(1, 0),
        ]);
        assert!(drain(&mut gate).is_empty());

        tx[1].push_all([StreamEvent::Barrier(CheckpointBarrier::new(2, 2))]);
        // Checkpoint 1 aborted: channel 0's buffered record is released.
        assert_eq!(drain(&mut gate), vec![rec(0, 1)]);
        assert_eq!(gate.pending_checkpoint().unwrap().checkpoint_id, 2);

        // Channel 0's late barrier 1 is stale.
        tx[0].push_all([
            StreamEvent::Barrier(CheckpointBarrier::new(1, 1)),
            StreamEvent::Barrier(CheckpointBarrier::new(2, 2)),
            StreamEvent::record(3, 0),
        ]);
        let out = drain(&mut gate);
        assert_eq!(barrier_id(&out[0]), Some(2));
        assert_eq!(out[1], rec(0, 3));
    }

    #[test]
    fn test_external_cancel_releases_and_discards() {
        let (tx, mut gate) = gate(2, AlignmentConfig::default());
        tx[0].push_all([
            StreamEvent::Barrier(CheckpointBarrier::new(5, 1)),
            StreamEvent::record(1, 0),
        ]);
        drain(&mut gate);
        gate.cancel_checkpoint(5);
        assert_eq!(drain(&mut gate), vec![rec(0, 1)]);

        tx[1].push_all([StreamEvent::Barrier(CheckpointBarrier::new(5, 1))]);
        assert!(drain(&mut gate).is_empty());
        assert!(gate.pending_checkpoint().is_none());
    }

    #[test]
    fn test_cancel_barrier_forwarded_once() {
        let (tx, mut gate) = gate(2, AlignmentConfig::default());
        tx[0].push_all([StreamEvent::Barrier(CheckpointBarrier::new(3, 1))]);
        drain(&mut gate);
        tx[1].push_all([StreamEvent::Barrier(CheckpointBarrier::cancel(3, 1))]);
        tx[0].push_all([StreamEvent::Barrier(CheckpointBarrier::cancel(3, 1))]);
        let out = drain(&mut gate);
        assert_eq!(out.len(), 1);
        assert_eq!(barrier_id(&out[0]), Some(3));
    }

    #[test]
    fn test_finished_channel_leaves_pending_set() {
        let (mut tx, mut gate) = gate(2, AlignmentConfig::default());
        tx[0].push_all([
            StreamEvent::Barrier(CheckpointBarrier::new(1, 1)),
            StreamEvent::record(1, 0),
        ]);
        drain(&mut gate);
        drop(tx.pop());

        let out = drain(&mut gate);
        assert_eq!(barrier_id(&out[0]), Some(1));
        assert_eq!(out[1], rec(0, 1));
        assert_eq!(out[2], GateEvent::EndOfChannel(1));
    }

    #[test]
    fn test_end_of_channel_after_buffered_events() {
        let (tx, mut gate) = gate(2, AlignmentConfig::default());
        tx[0].push_all([
            StreamEvent::Barrier(CheckpointBarrier::new(1, 1)),
            StreamEvent::record(1, 0),
        ]);
        tx[0].close();
        assert!(drain(&mut gate).is_empty());
        assert!(!gate.is_finished());

        tx[1].push_all([StreamEvent::Barrier(CheckpointBarrier::new(1, 1))]);
        tx[1].close();
        let out = drain(&mut gate);
        assert_eq!(barrier_id(&out[0]), Some(1));
        assert_eq!(&out[1..], &[rec(0, 1), GateEvent::EndOfChannel(0), GateEvent::EndOfChannel(1)]);
        assert!(gate.is_finished());
    }

    #[test]
    fn test_channel_failure_carries_index() {
        let (tx, mut gate) = gate(2, AlignmentConfig::default());
        tx[1].fail("reset by peer");
        let err = gate.poll_next().unwrap_err();
        assert_eq!(err.channel, 1);
        assert_eq!(err.source, ChannelError::Transport("reset by peer".into()));
    }
}
