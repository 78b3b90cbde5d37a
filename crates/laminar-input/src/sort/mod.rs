//! # Sort Module
//!
//! Key-ordered delivery for inputs that require sorting.
//!
//! The [`SortingStage`] owns every sorting input. It runs in two phases:
//!
//! 1. **Collecting**: sorting inputs are drained into per-input
//!    [`SortBuffer`](buffer::SortBuffer)s. Nothing is delivered for them;
//!    the highest watermark of each is remembered. Buffers spill sorted
//!    runs when they outgrow their share of the memory budget.
//! 2. **Emitting**: once every sorting input ended, all runs of all sorting
//!    inputs are merged by `(key, input, seq)`. After an input's last record
//!    its remembered watermark is delivered, then its end of input.
//!
//! Pass-through inputs never touch the stage; they stay eligible for
//! selection in both phases.

mod buffer;
mod key;
mod merge;
mod spill;

pub use key::{KeySelector, SortKey};
pub use spill::{
    FileSpillStorage, MemoryBudget, MemoryManager, RunReader, RunWriter, SpillError, SpillStorage,
};

use std::collections::VecDeque;

use tracing::{debug, warn};

use self::buffer::SortBuffer;
use self::merge::{reduce_runs, KWayMerge};
use crate::event::{Payload, Record, StreamEvent};
use crate::input::{InputPoll, TaskInput};
use crate::selection::InputSelection;
use crate::time::Watermark;
use crate::Result;

struct SortedSlot<T> {
    input: usize,
    source: TaskInput<T>,
    selector: KeySelector<T>,
    buffer: SortBuffer,
    max_watermark: Option<Watermark>,
    exhausted: bool,
    /// Records of this input still inside the merge.
    remaining: u64,
    /// Watermark and end of input queued after the last record.
    tail: VecDeque<InputPoll<T>>,
    finished: bool,
}

enum Phase {
    Collecting,
    Emitting(KWayMerge),
    Closed,
}

/// Merges sorting inputs into key order with bounded memory.
pub struct SortingStage<T> {
    slots: Vec<SortedSlot<T>>,
    storage: Box<dyn SpillStorage>,
    max_merge_fan_in: usize,
    phase: Phase,
}

impl<T: Payload> SortingStage<T> {
    /// Creates a stage over `inputs`, each with its key selector.
    ///
    /// The budget is split evenly across the inputs.
    #[must_use]
    pub fn new(
        inputs: Vec<(TaskInput<T>, KeySelector<T>)>,
        budget: MemoryBudget,
        storage: Box<dyn SpillStorage>,
        max_merge_fan_in: usize,
    ) -> Self {
        let per_input = budget.per_part(inputs.len());
        let slots = inputs
            .into_iter()
            .map(|(source, selector)| SortedSlot {
                input: source.index(),
                source,
                selector,
                buffer: SortBuffer::new(per_input, max_merge_fan_in),
                max_watermark: None,
                exhausted: false,
                remaining: 0,
                tail: VecDeque::new(),
                finished: false,
            })
            .collect();
        Self {
            slots,
            storage,
            max_merge_fan_in,
            phase: Phase::Collecting,
        }
    }

    /// Whether `input` is a sorting input owned by this stage.
    #[must_use]
    pub fn contains(&self, input: usize) -> bool {
        self.slot(input).is_some()
    }

    /// Logical indices of the sorting inputs.
    pub fn inputs(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots.iter().map(|s| s.input)
    }

    /// Whether the stage is still collecting.
    #[must_use]
    pub fn is_collecting(&self) -> bool {
        matches!(self.phase, Phase::Collecting)
    }

    /// Sorting inputs that may be serviced now: every unfinished one while
    /// collecting, and while emitting only those whose next output keeps
    /// the global key order.
    #[must_use]
    pub fn eligible(&self) -> InputSelection {
        match &self.phase {
            Phase::Collecting => self
                .slots
                .iter()
                .filter(|s| !s.exhausted)
                .map(|s| s.input)
                .collect(),
            Phase::Emitting(merge) => {
                let head = merge.peek_input();
                self.slots
                    .iter()
                    .filter(|s| !s.tail.is_empty() || head == Some(s.input))
                    .map(|s| s.input)
                    .collect()
            }
            Phase::Closed => InputSelection::NONE,
        }
    }

    /// Whether polling `input` may make progress now.
    #[must_use]
    pub fn is_available(&self, input: usize) -> bool {
        let Some(slot) = self.slot(input) else {
            return false;
        };
        match &self.phase {
            Phase::Collecting => !slot.exhausted && slot.source.is_available(),
            Phase::Emitting(merge) => {
                !slot.tail.is_empty() || merge.peek_input() == Some(input)
            }
            Phase::Closed => false,
        }
    }

    /// Whether `input`'s end of input was delivered.
    #[must_use]
    pub fn is_finished(&self, input: usize) -> bool {
        self.slot(input).is_none_or(|s| s.finished)
    }

    /// Advances sorting input `input` by one step.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelFailure`](crate::Error::ChannelFailure) if the
    /// underlying input failed and
    /// [`Error::SpillStorageFailure`](crate::Error::SpillStorageFailure) if
    /// spilling or reading a run failed.
    pub fn poll_next(&mut self, input: usize) -> Result<InputPoll<T>> {
        let Some(pos) = self.position(input) else {
            return Ok(InputPoll::Nothing);
        };
        match self.phase {
            Phase::Collecting => self.collect(pos),
            Phase::Emitting(_) => self.emit(pos),
            Phase::Closed => Ok(InputPoll::Nothing),
        }
    }

    fn collect(&mut self, pos: usize) -> Result<InputPoll<T>> {
        let slot = &mut self.slots[pos];
        if slot.exhausted {
            return Ok(InputPoll::Nothing);
        }
        match slot.source.poll_next()? {
            InputPoll::Nothing => return Ok(InputPoll::Nothing),
            InputPoll::Absorbed => {}
            InputPoll::EndOfInput => {
                slot.exhausted = true;
                debug!(
                    input = slot.input,
                    records = slot.buffer.records(),
                    bytes_in_memory = slot.buffer.bytes_in_memory(),
                    spilled_runs = slot.buffer.spilled_runs(),
                    "sorting input collected"
                );
                if self.slots.iter().all(|s| s.exhausted) {
                    self.begin_emitting()?;
                }
            }
            InputPoll::Event(event) => match event {
                StreamEvent::Record(record) => {
                    let key = (slot.selector)(&record.value).encode();
                    let payload =
                        bincode::serde::encode_to_vec(&record, bincode::config::standard())
                            .map_err(|e| SpillError::Serialization(e.to_string()))?;
                    slot.buffer.push(key, payload, self.storage.as_ref())?;
                }
                StreamEvent::Watermark(watermark) => {
                    slot.max_watermark = slot.max_watermark.max(Some(watermark));
                }
                StreamEvent::Barrier(barrier) => {
                    warn!(
                        input = slot.input,
                        checkpoint_id = barrier.checkpoint_id,
                        "discarding barrier on sorting input"
                    );
                }
                StreamEvent::Status(_) | StreamEvent::LatencyMarker(_) => {}
            },
        }
        Ok(InputPoll::Absorbed)
    }

    fn emit(&mut self, pos: usize) -> Result<InputPoll<T>> {
        let slot = &mut self.slots[pos];
        if let Some(next) = slot.tail.pop_front() {
            if matches!(next, InputPoll::EndOfInput) {
                slot.finished = true;
            }
            return Ok(next);
        }
        let Phase::Emitting(merge) = &mut self.phase else {
            return Ok(InputPoll::Nothing);
        };
        if merge.peek_input() != Some(slot.input) {
            return Ok(InputPoll::Nothing);
        }
        let Some((_, entry)) = merge.pop()? else {
            return Ok(InputPoll::Nothing);
        };
        let (record, _): (Record<T>, usize) =
            bincode::serde::decode_from_slice(&entry.payload, bincode::config::standard())
                .map_err(|e| SpillError::Serialization(e.to_string()))?;
        slot.remaining = slot.remaining.saturating_sub(1);
        if slot.remaining == 0 {
            slot.queue_tail();
        }
        Ok(InputPoll::Event(StreamEvent::Record(record)))
    }

    fn begin_emitting(&mut self) -> Result<()> {
        let mut runs = Vec::new();
        for slot in &mut self.slots {
            slot.remaining = slot.buffer.records();
            let input_runs = reduce_runs(
                slot.buffer.finish(),
                self.max_merge_fan_in,
                self.storage.as_ref(),
            )?;
            runs.extend(input_runs.into_iter().map(|run| (slot.input, run)));
            if slot.remaining == 0 {
                slot.queue_tail();
            }
        }
        debug!(runs = runs.len(), "sorting stage merging");
        self.phase = Phase::Emitting(KWayMerge::new(runs)?);
        Ok(())
    }
}

impl<T> SortingStage<T> {
    /// Releases buffers and spill runs. Further polls return nothing.
    pub fn close(&mut self) {
        if matches!(self.phase, Phase::Closed) {
            return;
        }
        for slot in &mut self.slots {
            slot.buffer.clear();
            slot.tail.clear();
        }
        self.phase = Phase::Closed;
        debug!("sorting stage closed");
    }

    /// Whether [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self.phase, Phase::Closed)
    }

    fn slot(&self, input: usize) -> Option<&SortedSlot<T>> {
        self.slots.iter().find(|s| s.input == input)
    }

    fn position(&self, input: usize) -> Option<usize> {
        self.slots.iter().position(|s| s.input == input)
    }
}

impl<T> SortedSlot<T> {
    fn queue_tail(&mut self) {
        if let Some(watermark) = self.max_watermark {
            self.tail.push_back(InputPoll::Event(StreamEvent::Watermark(watermark)));
        }
        self.tail.push_back(InputPoll::EndOfInput);
    }
}

impl<T> Drop for SortingStage<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> std::fmt::Debug for SortingStage<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match self.phase {
            Phase::Collecting => "collecting",
            Phase::Emitting(_) => "emitting",
            Phase::Closed => "closed",
        };
        f.debug_struct("SortingStage")
            .field("inputs", &self.slots.iter().map(|s| s.input).collect::<Vec<_>>())
            .field("phase", &phase)
            .finish_non_exhaustive()
    }
}
