//! The consuming multi-input operator, seen from the merge engine.

use crate::checkpoint::CheckpointBarrier;
use crate::event::{LatencyMarker, Record};
use crate::selection::InputSelection;
use crate::sort::SortKey;
use crate::time::{StreamStatus, Watermark};

/// Failure raised by an operator entry point.
#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    /// Processing an event failed.
    #[error("input {input}: {reason}")]
    Processing {
        /// Logical input the event came from.
        input: usize,
        /// Cause.
        reason: String,
    },

    /// Taking a snapshot failed.
    #[error("snapshot for checkpoint {checkpoint_id} failed: {reason}")]
    Snapshot {
        /// The checkpoint being taken.
        checkpoint_id: u64,
        /// Cause.
        reason: String,
    },
}

/// An operator with one input slot per logical input.
///
/// All entry points are called from the task thread, one at a time.
pub trait MultiInputOperator<T>: Send {
    /// Number of logical inputs the operator declares.
    fn input_count(&self) -> usize;

    /// Sets the key of the record about to be delivered on `input`. Only
    /// called for inputs configured with a key selector.
    fn set_key_context(&mut self, _input: usize, _key: &SortKey) {}

    /// Delivers a record.
    fn process_record(&mut self, input: usize, record: Record<T>) -> Result<(), OperatorError>;

    /// Delivers the aggregate watermark of `input`.
    fn process_watermark(
        &mut self,
        _input: usize,
        _watermark: Watermark,
    ) -> Result<(), OperatorError> {
        Ok(())
    }

    /// Delivers the aggregate status of `input`.
    fn process_status(
        &mut self,
        _input: usize,
        _status: StreamStatus,
    ) -> Result<(), OperatorError> {
        Ok(())
    }

    /// Delivers a latency marker.
    fn process_latency_marker(
        &mut self,
        _input: usize,
        _marker: LatencyMarker,
    ) -> Result<(), OperatorError> {
        Ok(())
    }

    /// Snapshots operator state. Called once per checkpoint, after every
    /// input delivered the barrier (aligned) or after the first one did
    /// (unaligned).
    fn snapshot_state(&mut self, _barrier: &CheckpointBarrier) -> Result<(), OperatorError> {
        Ok(())
    }

    /// `input` reached its end. Called once per input.
    fn end_input(&mut self, _input: usize) -> Result<(), OperatorError> {
        Ok(())
    }

    /// Whether the operator wants to choose which inputs are read.
    fn is_input_selectable(&self) -> bool {
        false
    }

    /// The inputs the operator wants next. Consulted after every consumed
    /// event when [`is_input_selectable`](Self::is_input_selectable) holds.
    fn next_selection(&mut self) -> InputSelection {
        InputSelection::ALL
    }
}
