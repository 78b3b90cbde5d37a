//! Chained source input.
//!
//! A source operator chained into the task writes into a local channel.
//! Barriers for it do not travel through a transport; the checkpoint
//! coordinator triggers them through a
//! [`CheckpointBarrierInjector`](crate::checkpoint::CheckpointBarrierInjector)
//! and the input claims them here, ahead of the next record.

use super::InputPoll;
use crate::channel::InputChannel;
use crate::checkpoint::BarrierPollHandle;
use crate::event::StreamEvent;
use crate::{Error, Result};

/// Output of one chained source, as registered in a [`SourceChain`].
pub struct SourceOutput<T> {
    /// The channel the source writes into.
    pub channel: Box<dyn InputChannel<T>>,
    /// Barrier injection handle, when the source takes part in checkpoints.
    pub barriers: Option<BarrierPollHandle>,
}

impl<T> std::fmt::Debug for SourceOutput<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceOutput")
            .field("barriers", &self.barriers.is_some())
            .finish_non_exhaustive()
    }
}

/// The pre-existing outputs of the sources chained into the task, keyed by
/// source index.
pub struct SourceChain<T> {
    outputs: Vec<Option<SourceOutput<T>>>,
}

impl<T> SourceChain<T> {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self {
            outputs: Vec::new(),
        }
    }

    /// Registers a source output and returns its source index.
    pub fn push(
        &mut self,
        channel: Box<dyn InputChannel<T>>,
        barriers: Option<BarrierPollHandle>,
    ) -> usize {
        self.outputs.push(Some(SourceOutput { channel, barriers }));
        self.outputs.len() - 1
    }

    /// Number of registered sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Whether no source is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Whether `index` refers to a source that has not been taken.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        matches!(self.outputs.get(index), Some(Some(_)))
    }

    /// Removes the output of source `index`.
    pub fn take(&mut self, index: usize) -> Option<SourceOutput<T>> {
        self.outputs.get_mut(index).and_then(Option::take)
    }
}

impl<T> Default for SourceChain<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for SourceChain<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceChain")
            .field("sources", &self.outputs.len())
            .finish()
    }
}

/// A logical input reading a chained source's output.
pub struct ChainedSourceInput<T> {
    index: usize,
    output: SourceOutput<T>,
    epoch: u64,
    end_reported: bool,
}

impl<T> ChainedSourceInput<T> {
    /// Wraps `output` as logical input `index`.
    #[must_use]
    pub fn new(index: usize, output: SourceOutput<T>) -> Self {
        Self {
            index,
            output,
            epoch: 0,
            end_reported: false,
        }
    }

    /// Consumes at most one event. A pending injected barrier goes first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelFailure`] if the source's channel failed.
    pub fn poll_next(&mut self) -> Result<InputPoll<T>> {
        if self.end_reported {
            return Ok(InputPoll::Nothing);
        }
        if let Some(handle) = &self.output.barriers {
            if let Some(barrier) = handle.poll(self.epoch + 1) {
                self.epoch += 1;
                return Ok(InputPoll::Event(StreamEvent::Barrier(barrier)));
            }
        }
        let polled = self
            .output
            .channel
            .poll()
            .map_err(|e| Error::ChannelFailure {
                input: self.index,
                channel: 0,
                reason: e.to_string(),
            })?;
        Ok(match polled {
            Some(event) => InputPoll::Event(event),
            None if self.output.channel.is_finished() => {
                self.end_reported = true;
                InputPoll::EndOfInput
            }
            None => InputPoll::Nothing,
        })
    }

    /// Whether [`poll_next`](Self::poll_next) may make progress now.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !self.end_reported
            && (self.output.barriers.as_ref().is_some_and(BarrierPollHandle::is_pending)
                || self.output.channel.is_available()
                || self.output.channel.is_finished())
    }

    /// Whether end of input was reported.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.end_reported
    }

    /// The logical input index.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Barriers injected into this input so far.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl<T> std::fmt::Debug for ChainedSourceInput<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainedSourceInput")
            .field("index", &self.index)
            .field("epoch", &self.epoch)
            .field("end_reported", &self.end_reported)
            .finish_non_exhaustive()
    }
}
