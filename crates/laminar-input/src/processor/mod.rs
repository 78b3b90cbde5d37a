//! # Processor Module
//!
//! The driver of a multi-input task. [`MultiInputProcessor::process_once`]
//! services exactly one logical input per call:
//!
//! ```text
//! select input ─▶ poll (gate+valve | chained source | sorting stage)
//!                   │
//!                   ├─ Record / Watermark / Status / LatencyMarker ─▶ OutputAdapter ─▶ operator
//!                   ├─ Barrier ─▶ task-level alignment ─▶ operator.snapshot_state
//!                   └─ EndOfInput ─▶ operator.end_input
//! ```
//!
//! ## Task-level alignment
//!
//! Gates align the channels of one network input. Across logical inputs
//! the driver aligns again: once an input delivered aligned barrier K it is
//! not selected until every unfinished input delivered K. The operator then
//! snapshots once and all inputs are released. Unaligned barriers snapshot
//! on first arrival and block nothing.

mod output;

use std::time::Duration;

use tracing::{debug, warn};

use crate::checkpoint::{BarrierOutcome, BarrierTracker, CheckpointBarrier, UnalignedSnapshot};
use crate::event::{Payload, StreamEvent};
use crate::input::{InputPoll, TaskInput};
use crate::operator::MultiInputOperator;
use crate::selection::{InputSelection, SelectionHandler, SelectionMode};
use crate::sort::SortingStage;
use crate::Result;

pub(crate) use output::OutputAdapter;

/// Outcome of one [`MultiInputProcessor::process_once`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessResult {
    /// An event was consumed; more may be available.
    MoreAvailable,
    /// No input had anything to consume. Nothing changed.
    NothingAvailable,
    /// Every input reached its end.
    Finished,
}

/// Where a logical input is read from.
pub(crate) enum InputSlot<T> {
    /// Read directly.
    Direct(TaskInput<T>),
    /// Owned by the sorting stage.
    Sorted,
}

/// Drives a [`MultiInputOperator`] from its logical inputs.
///
/// Built by [`ProcessorFactory`](crate::factory::ProcessorFactory).
pub struct MultiInputProcessor<T, O> {
    slots: Vec<InputSlot<T>>,
    adapters: Vec<OutputAdapter<T>>,
    finished: Vec<bool>,
    sorting: Option<SortingStage<T>>,
    pass_through: InputSelection,
    selection: SelectionHandler,
    barriers: BarrierTracker,
    aligned_timeout: Option<Duration>,
    last_snapshot: Option<u64>,
    operator: O,
}

impl<T: Payload, O: MultiInputOperator<T>> MultiInputProcessor<T, O> {
    pub(crate) fn new(
        slots: Vec<InputSlot<T>>,
        adapters: Vec<OutputAdapter<T>>,
        sorting: Option<SortingStage<T>>,
        mode: SelectionMode,
        aligned_timeout: Option<Duration>,
        mut operator: O,
    ) -> Self {
        let num_inputs = slots.len();
        let pass_through = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| matches!(slot, InputSlot::Direct(_)))
            .map(|(i, _)| i)
            .collect();
        let mut barriers = BarrierTracker::new(num_inputs);
        // Sorting inputs never deliver barriers.
        for (i, slot) in slots.iter().enumerate() {
            if matches!(slot, InputSlot::Sorted) {
                barriers.on_party_finished(i);
            }
        }
        let mut selection = SelectionHandler::new(mode, num_inputs);
        if mode == SelectionMode::OperatorDriven {
            selection.set_operator_preference(operator.next_selection());
        }
        Self {
            slots,
            adapters,
            finished: vec![false; num_inputs],
            sorting,
            pass_through,
            selection,
            barriers,
            aligned_timeout,
            last_snapshot: None,
            operator,
        }
    }

    /// Services at most one input.
    ///
    /// # Errors
    ///
    /// Returns the first channel, spill or operator failure. The processor
    /// must not be driven further after an error.
    pub fn process_once(&mut self) -> Result<ProcessResult> {
        if self.is_finished() {
            return Ok(ProcessResult::Finished);
        }
        self.check_alignment_timeout()?;

        let eligible = self.eligible();
        let stage_eligible = match &self.sorting {
            Some(stage) => stage.eligible().union(self.pass_through),
            None => InputSelection::ALL,
        };
        let Some(input) = self
            .selection
            .select(eligible, stage_eligible, |i| self.is_input_available(i))
        else {
            return Ok(ProcessResult::NothingAvailable);
        };
        let polled = match &mut self.slots[input] {
            InputSlot::Direct(source) => source.poll_next()?,
            InputSlot::Sorted => match &mut self.sorting {
                Some(stage) => stage.poll_next(input)?,
                None => InputPoll::Nothing,
            },
        };

        if matches!(polled, InputPoll::Nothing) {
            return Ok(ProcessResult::NothingAvailable);
        }
        self.selection.serviced(input);

        match polled {
            InputPoll::Nothing | InputPoll::Absorbed => {}
            InputPoll::EndOfInput => self.end_input(input)?,
            InputPoll::Event(StreamEvent::Barrier(barrier)) => self.on_barrier(input, barrier)?,
            InputPoll::Event(event) => self.adapters[input].deliver(event, &mut self.operator)?,
        }
        if self.selection.mode() == SelectionMode::OperatorDriven {
            self.selection
                .set_operator_preference(self.operator.next_selection());
        }

        Ok(if self.is_finished() {
            ProcessResult::Finished
        } else {
            ProcessResult::MoreAvailable
        })
    }

    /// Whether any input can be serviced now.
    #[must_use]
    pub fn is_available(&self) -> bool {
        let eligible = self.eligible();
        (0..self.slots.len()).any(|i| eligible.contains(i) && self.is_input_available(i))
    }

    /// Aborts checkpoint `checkpoint_id` (and older ones) in every gate and
    /// in the task-level alignment, releasing blocked inputs.
    pub fn cancel_checkpoint(&mut self, checkpoint_id: u64) {
        for slot in &mut self.slots {
            if let InputSlot::Direct(source) = slot {
                source.cancel_checkpoint(checkpoint_id);
            }
        }
        if let Some(aborted) = self.barriers.cancel(checkpoint_id) {
            warn!(checkpoint_id = aborted, "checkpoint canceled during input alignment");
        }
    }

    /// Takes every completed unaligned snapshot of in-flight channel data.
    pub fn take_unaligned_snapshots(&mut self) -> Vec<UnalignedSnapshot<T>> {
        let mut snapshots = Vec::new();
        for slot in &mut self.slots {
            if let InputSlot::Direct(source) = slot {
                while let Some(snapshot) = source.take_inflight_snapshot() {
                    snapshots.push(snapshot);
                }
            }
        }
        snapshots
    }

    fn eligible(&self) -> InputSelection {
        let aligning = self.barriers.pending().is_some_and(|b| !b.is_unaligned());
        (0..self.slots.len())
            .filter(|&i| !self.finished[i] && !(aligning && self.barriers.has_reported(i)))
            .collect()
    }

    fn is_input_available(&self, input: usize) -> bool {
        match &self.slots[input] {
            InputSlot::Direct(source) => source.is_available(),
            InputSlot::Sorted => self
                .sorting
                .as_ref()
                .is_some_and(|stage| stage.is_available(input)),
        }
    }

    fn end_input(&mut self, input: usize) -> Result<()> {
        if self.finished[input] {
            return Ok(());
        }
        self.finished[input] = true;
        debug!(input, "input finished");
        self.operator.end_input(input)?;
        if let Some(barrier) = self.barriers.on_party_finished(input) {
            self.snapshot(&barrier)?;
        }
        Ok(())
    }

    fn on_barrier(&mut self, input: usize, barrier: CheckpointBarrier) -> Result<()> {
        match self.barriers.on_barrier(input, barrier) {
            BarrierOutcome::Ignored => {
                debug!(
                    code = crate::error_codes::STALE_BARRIER,
                    input,
                    checkpoint_id = barrier.checkpoint_id,
                    "discarding stale barrier"
                );
            }
            BarrierOutcome::Aborted(checkpoint_id) => {
                warn!(input, checkpoint_id, "checkpoint canceled by barrier");
                for slot in &mut self.slots {
                    if let InputSlot::Direct(source) = slot {
                        source.cancel_checkpoint(barrier.checkpoint_id);
                    }
                }
            }
            BarrierOutcome::Pending { started, aborted } => {
                if let Some(aborted) = aborted {
                    warn!(checkpoint_id = aborted, "checkpoint aborted by newer barrier");
                }
                if started {
                    debug!(input, checkpoint_id = barrier.checkpoint_id, "input alignment started");
                }
                if barrier.is_unaligned() && self.last_snapshot != Some(barrier.checkpoint_id) {
                    self.barriers.convert_to_unaligned();
                    self.snapshot(&barrier)?;
                }
            }
            BarrierOutcome::Completed {
                barrier: completed,
                aborted,
                ..
            } => {
                if let Some(aborted) = aborted {
                    warn!(checkpoint_id = aborted, "checkpoint aborted by newer barrier");
                }
                self.snapshot(&completed)?;
            }
        }
        Ok(())
    }

    /// Converts a pending aligned checkpoint that waited too long.
    fn check_alignment_timeout(&mut self) -> Result<()> {
        let (Some(timeout), Some(pending), Some(since)) = (
            self.aligned_timeout,
            self.barriers.pending(),
            self.barriers.pending_since(),
        ) else {
            return Ok(());
        };
        if pending.is_unaligned() || since.elapsed() < timeout {
            return Ok(());
        }
        debug!(
            checkpoint_id = pending.checkpoint_id,
            "input alignment timed out, switching to unaligned"
        );
        self.barriers.convert_to_unaligned();
        self.snapshot(&pending.as_unaligned())
    }

    fn snapshot(&mut self, barrier: &CheckpointBarrier) -> Result<()> {
        if self.last_snapshot == Some(barrier.checkpoint_id) {
            return Ok(());
        }
        self.last_snapshot = Some(barrier.checkpoint_id);
        debug!(
            checkpoint_id = barrier.checkpoint_id,
            unaligned = barrier.is_unaligned(),
            "snapshotting operator"
        );
        self.operator.snapshot_state(barrier)?;
        Ok(())
    }
}

impl<T, O> MultiInputProcessor<T, O> {
    /// Whether every input reached its end.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.iter().all(|&f| f)
    }

    /// Number of logical inputs.
    #[must_use]
    pub fn num_inputs(&self) -> usize {
        self.slots.len()
    }

    /// How the next input is chosen.
    #[must_use]
    pub fn selection_mode(&self) -> SelectionMode {
        self.selection.mode()
    }

    /// Whether sorting inputs are present.
    #[must_use]
    pub fn is_sorting(&self) -> bool {
        self.sorting.is_some()
    }

    /// The checkpoint inputs are currently aligning on, if any.
    #[must_use]
    pub fn pending_checkpoint(&self) -> Option<CheckpointBarrier> {
        self.barriers.pending()
    }

    /// The driven operator.
    pub fn operator(&self) -> &O {
        &self.operator
    }

    /// The driven operator, mutably.
    pub fn operator_mut(&mut self) -> &mut O {
        &mut self.operator
    }

    /// Releases sort buffers and spill runs. Idempotent; also done on drop.
    pub fn close(&mut self) {
        if let Some(stage) = &mut self.sorting {
            stage.close();
        }
    }
}

impl<T, O> std::fmt::Debug for MultiInputProcessor<T, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiInputProcessor")
            .field("num_inputs", &self.slots.len())
            .field("finished", &self.finished)
            .field("mode", &self.selection.mode())
            .field("sorting", &self.sorting)
            .field("pending_checkpoint", &self.barriers.pending())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{channel, ChannelError, ChannelProducer, InputChannel, QueueChannel};
    use crate::checkpoint::CheckpointBarrierInjector;
    use crate::event::Record;
    use crate::input::{ChainedSourceInput, SourceOutput};
    use crate::metrics::MetricRegistry;
    use crate::operator::OperatorError;

    type OpResult = std::result::Result<(), OperatorError>;

    #[derive(Default)]
    struct Log {
        events: Vec<String>,
        snapshots: Vec<u64>,
        ended: Vec<usize>,
    }

    impl MultiInputOperator<u32> for Log {
        fn input_count(&self) -> usize {
            2
        }

        fn process_record(&mut self, input: usize, record: Record<u32>) -> OpResult {
            self.events.push(format!("{input}:{}", record.value));
            Ok(())
        }

        fn snapshot_state(&mut self, barrier: &CheckpointBarrier) -> OpResult {
            self.snapshots.push(barrier.checkpoint_id);
            Ok(())
        }

        fn end_input(&mut self, input: usize) -> OpResult {
            self.ended.push(input);
            Ok(())
        }
    }

    fn chained(
        index: usize,
        barriers: Option<&CheckpointBarrierInjector>,
    ) -> (ChannelProducer<u32>, InputSlot<u32>) {
        let (tx, rx) = channel(64);
        let input = ChainedSourceInput::new(
            index,
            SourceOutput {
                channel: Box::new(rx),
                barriers: barriers.map(CheckpointBarrierInjector::handle),
            },
        );
        (tx, InputSlot::Direct(TaskInput::ChainedSource(input)))
    }

    fn processor(
        slots: Vec<InputSlot<u32>>,
        timeout: Option<Duration>,
    ) -> MultiInputProcessor<u32, Log> {
        let registry = MetricRegistry::new();
        let adapters = (0..slots.len())
            .map(|i| OutputAdapter::new(i, false, None, &registry))
            .collect();
        MultiInputProcessor::new(
            slots,
            adapters,
            None,
            SelectionMode::AnyAvailable,
            timeout,
            Log::default(),
        )
    }

    fn drain(p: &mut MultiInputProcessor<u32, Log>) {
        while p.process_once().unwrap() == ProcessResult::MoreAvailable {}
    }

    #[test]
    fn test_nothing_available_has_no_side_effects() {
        let (_a, slot_a) = chained(0, None);
        let (_b, slot_b) = chained(1, None);
        let mut p = processor(vec![slot_a, slot_b], None);
        assert_eq!(p.process_once().unwrap(), ProcessResult::NothingAvailable);
        assert!(!p.is_available());
        assert!(p.operator().events.is_empty());
    }

    /// Claims availability once before its first event is really there.
    struct LaggingChannel {
        inner: QueueChannel<u32>,
        lagging: bool,
    }

    impl InputChannel<u32> for LaggingChannel {
        fn poll(&mut self) -> std::result::Result<Option<StreamEvent<u32>>, ChannelError> {
            if std::mem::take(&mut self.lagging) {
                return Ok(None);
            }
            self.inner.poll()
        }

        fn is_available(&self) -> bool {
            self.lagging || self.inner.is_available()
        }

        fn is_finished(&self) -> bool {
            !self.lagging && self.inner.is_finished()
        }
    }

    #[test]
    fn test_empty_poll_keeps_round_robin_position() {
        let (tx, rx) = channel(8);
        let lagging = ChainedSourceInput::new(
            0,
            SourceOutput {
                channel: Box::new(LaggingChannel {
                    inner: rx,
                    lagging: true,
                }),
                barriers: None,
            },
        );
        let (b, slot_b) = chained(1, None);
        let mut p = processor(
            vec![InputSlot::Direct(TaskInput::ChainedSource(lagging)), slot_b],
            None,
        );
        tx.push_all([StreamEvent::record(1, 0)]);
        b.push_all([StreamEvent::record(1, 0)]);

        assert_eq!(p.process_once().unwrap(), ProcessResult::NothingAvailable);
        drain(&mut p);
        // Input 0 still has the first turn.
        assert_eq!(p.operator().events, vec!["0:1", "1:1"]);
    }

    #[test]
    fn test_finishes_after_every_input_ended() {
        let (a, slot_a) = chained(0, None);
        let (b, slot_b) = chained(1, None);
        let mut p = processor(vec![slot_a, slot_b], None);
        a.push_all([StreamEvent::record(1, 0)]);
        drop(a);
        drain(&mut p);
        assert_eq!(p.operator().ended, vec![0]);
        assert!(!p.is_finished());
        drop(b);
        drain(&mut p);
        assert!(p.is_finished());
        assert_eq!(p.process_once().unwrap(), ProcessResult::Finished);
        assert_eq!(p.operator().ended, vec![0, 1]);
    }

    #[test]
    fn test_aligned_barrier_blocks_until_all_inputs_deliver() {
        let injector_a = CheckpointBarrierInjector::new();
        let injector_b = CheckpointBarrierInjector::new();
        let (a, slot_a) = chained(0, Some(&injector_a));
        let (b, slot_b) = chained(1, Some(&injector_b));
        let mut p = processor(vec![slot_a, slot_b], None);

        injector_a.trigger(1, crate::checkpoint::flags::NONE);
        a.push_all([StreamEvent::record(10, 0)]);
        b.push_all([StreamEvent::record(20, 0)]);

        // Input 0 delivers the barrier first and is then blocked.
        assert_eq!(p.process_once().unwrap(), ProcessResult::MoreAvailable);
        assert_eq!(p.pending_checkpoint().map(|b| b.checkpoint_id), Some(1));
        drain(&mut p);
        assert_eq!(p.operator().events, vec!["1:20"]);
        assert!(p.operator().snapshots.is_empty());

        injector_b.trigger(1, crate::checkpoint::flags::NONE);
        drain(&mut p);
        assert_eq!(p.operator().snapshots, vec![1]);
        assert_eq!(p.operator().events, vec!["1:20", "0:10"]);
    }

    #[test]
    fn test_unaligned_barrier_snapshots_immediately() {
        let injector = CheckpointBarrierInjector::new();
        let (a, slot_a) = chained(0, Some(&injector));
        let (b, slot_b) = chained(1, None);
        let mut p = processor(vec![slot_a, slot_b], None);

        injector.trigger(4, crate::checkpoint::flags::UNALIGNED);
        a.push_all([StreamEvent::record(1, 0)]);
        b.push_all([StreamEvent::record(2, 0)]);
        drain(&mut p);
        assert_eq!(p.operator().snapshots, vec![4]);
        assert_eq!(p.operator().events.len(), 2);
    }

    #[test]
    fn test_finished_input_completes_alignment() {
        let injector = CheckpointBarrierInjector::new();
        let (a, slot_a) = chained(0, Some(&injector));
        let (b, slot_b) = chained(1, None);
        let mut p = processor(vec![slot_a, slot_b], None);

        injector.trigger(2, crate::checkpoint::flags::NONE);
        drain(&mut p);
        assert!(p.operator().snapshots.is_empty());
        drop(b);
        drain(&mut p);
        assert_eq!(p.operator().snapshots, vec![2]);
        assert_eq!(p.pending_checkpoint(), None);
        drop(a);
    }

    #[test]
    fn test_cancel_releases_blocked_input() {
        let injector = CheckpointBarrierInjector::new();
        let (a, slot_a) = chained(0, Some(&injector));
        let (_b, slot_b) = chained(1, None);
        let mut p = processor(vec![slot_a, slot_b], None);

        injector.trigger(3, crate::checkpoint::flags::NONE);
        a.push_all([StreamEvent::record(7, 0)]);
        drain(&mut p);
        assert!(p.operator().events.is_empty());

        p.cancel_checkpoint(3);
        drain(&mut p);
        assert_eq!(p.operator().events, vec!["0:7"]);
        assert!(p.operator().snapshots.is_empty());
    }

    #[test]
    fn test_alignment_timeout_switches_to_unaligned() {
        let injector = CheckpointBarrierInjector::new();
        let (a, slot_a) = chained(0, Some(&injector));
        let (_b, slot_b) = chained(1, None);
        let mut p = processor(vec![slot_a, slot_b], Some(Duration::ZERO));

        injector.trigger(5, crate::checkpoint::flags::NONE);
        a.push_all([StreamEvent::record(8, 0)]);
        drain(&mut p);
        assert_eq!(p.operator().snapshots, vec![5]);
        assert_eq!(p.operator().events, vec!["0:8"]);
    }
}
