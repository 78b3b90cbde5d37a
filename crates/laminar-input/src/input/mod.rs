//! # Input Module
//!
//! Logical inputs of a task. Each logical input is either a network input
//! (a set of transport channels behind an aligning gate and a valve) or a
//! chained source input (the output of a source operator running in the
//! same task). The kind is fixed at assembly and dispatched through the
//! closed [`TaskInput`] enum.

mod network;
mod source;

pub use network::NetworkInput;
pub use source::{ChainedSourceInput, SourceChain, SourceOutput};

use crate::checkpoint::UnalignedSnapshot;
use crate::event::StreamEvent;
use crate::Result;

/// Outcome of polling a logical input once.
#[derive(Debug, Clone, PartialEq)]
pub enum InputPoll<T> {
    /// An event to deliver to the operator.
    Event(StreamEvent<T>),
    /// The input reached its end. Reported exactly once.
    EndOfInput,
    /// An event was consumed but produced nothing to deliver (for example a
    /// channel watermark that did not move the aggregate).
    Absorbed,
    /// Nothing was available; no state changed.
    Nothing,
}

/// A logical input of the task.
#[derive(Debug)]
pub enum TaskInput<T> {
    /// Backed by transport channels.
    Network(NetworkInput<T>),
    /// Backed by a chained source's output.
    ChainedSource(ChainedSourceInput<T>),
}

impl<T: Clone> TaskInput<T> {
    /// Consumes at most one event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelFailure`](crate::Error::ChannelFailure) if a
    /// channel failed.
    pub fn poll_next(&mut self) -> Result<InputPoll<T>> {
        match self {
            Self::Network(input) => input.poll_next(),
            Self::ChainedSource(input) => input.poll_next(),
        }
    }

    /// Whether polling may make progress now.
    #[must_use]
    pub fn is_available(&self) -> bool {
        match self {
            Self::Network(input) => input.is_available(),
            Self::ChainedSource(input) => input.is_available(),
        }
    }

    /// Whether end of input was reported.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        match self {
            Self::Network(input) => input.is_finished(),
            Self::ChainedSource(input) => input.is_finished(),
        }
    }

    /// The logical input index.
    #[must_use]
    pub fn index(&self) -> usize {
        match self {
            Self::Network(input) => input.index(),
            Self::ChainedSource(input) => input.index(),
        }
    }

    /// Whether records of this input crossed the network boundary.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Aborts checkpoints up to `checkpoint_id` in the input's gate.
    pub fn cancel_checkpoint(&mut self, checkpoint_id: u64) {
        if let Self::Network(input) = self {
            input.cancel_checkpoint(checkpoint_id);
        }
    }

    /// Takes the oldest completed unaligned snapshot, if any.
    pub fn take_inflight_snapshot(&mut self) -> Option<UnalignedSnapshot<T>> {
        match self {
            Self::Network(input) => input.take_inflight_snapshot(),
            Self::ChainedSource(_) => None,
        }
    }
}
