//! Network input: an aligning gate followed by a watermark valve.

use std::collections::VecDeque;

use super::InputPoll;
use crate::checkpoint::{CheckpointedInputGate, GateEvent, UnalignedSnapshot};
use crate::event::StreamEvent;
use crate::time::{StatusWatermarkValve, ValveOutput, ValveOutputs};
use crate::{Error, Result};

/// A logical input fed by the channels of one gate.
///
/// Watermarks and status changes are folded by the valve; everything else
/// passes through in gate order.
#[derive(Debug)]
pub struct NetworkInput<T> {
    index: usize,
    gate: CheckpointedInputGate<T>,
    valve: StatusWatermarkValve,
    pending: VecDeque<StreamEvent<T>>,
    end_reported: bool,
}

impl<T: Clone> NetworkInput<T> {
    /// Wraps `gate` as logical input `index`.
    #[must_use]
    pub fn new(index: usize, gate: CheckpointedInputGate<T>) -> Self {
        let valve = StatusWatermarkValve::new(gate.num_channels());
        Self {
            index,
            gate,
            valve,
            pending: VecDeque::new(),
            end_reported: false,
        }
    }

    /// Consumes at most one event from the gate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelFailure`] if a channel failed.
    pub fn poll_next(&mut self) -> Result<InputPoll<T>> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(InputPoll::Event(event));
        }
        if self.end_reported {
            return Ok(InputPoll::Nothing);
        }
        let polled = self.gate.poll_next().map_err(|e| Error::ChannelFailure {
            input: self.index,
            channel: e.channel,
            reason: e.source.to_string(),
        })?;
        let outputs = match polled {
            None if self.gate.is_finished() => {
                self.end_reported = true;
                return Ok(InputPoll::EndOfInput);
            }
            None => return Ok(InputPoll::Nothing),
            Some(GateEvent::EndOfChannel(channel)) => self.valve.channel_finished(channel),
            Some(GateEvent::Event { channel, event }) => match event {
                StreamEvent::Watermark(watermark) => {
                    self.valve.input_watermark(channel, watermark)
                }
                StreamEvent::Status(status) => self.valve.input_status(channel, status),
                other => return Ok(InputPoll::Event(other)),
            },
        };
        Ok(self.forward(outputs))
    }

    /// Whether [`poll_next`](Self::poll_next) may make progress now.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !self.pending.is_empty()
            || (!self.end_reported && (self.gate.is_available() || self.gate.is_finished()))
    }

    /// Whether end of input was reported.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.end_reported && self.pending.is_empty()
    }

    /// The logical input index.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Forwards a checkpoint cancellation to the gate.
    pub fn cancel_checkpoint(&mut self, checkpoint_id: u64) {
        self.gate.cancel_checkpoint(checkpoint_id);
    }

    /// Takes the oldest completed unaligned snapshot of the gate.
    pub fn take_inflight_snapshot(&mut self) -> Option<UnalignedSnapshot<T>> {
        self.gate.take_inflight_snapshot()
    }

    /// The watermark/status valve of this input.
    #[must_use]
    pub fn valve(&self) -> &StatusWatermarkValve {
        &self.valve
    }

    fn forward(&mut self, outputs: ValveOutputs) -> InputPoll<T> {
        self.pending.extend(outputs.into_iter().map(|out| match out {
            ValveOutput::Watermark(w) => StreamEvent::Watermark(w),
            ValveOutput::Status(s) => StreamEvent::Status(s),
        }));
        match self.pending.pop_front() {
            Some(event) => InputPoll::Event(event),
            None => InputPoll::Absorbed,
        }
    }
}
