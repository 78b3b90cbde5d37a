//! # Checkpoint Module
//!
//! Barrier handling for the merge engine.
//!
//! - [`barrier`]: barrier type, flags, and the cross-thread injector used by
//!   chained source inputs
//! - [`BarrierTracker`]: which parties reported the pending checkpoint
//! - [`CheckpointedInputGate`]: channel-level alignment for network inputs
//! - [`UnalignedSnapshot`]: in-flight data captured by unaligned checkpoints

pub mod barrier;
mod gate;
mod tracker;
mod unaligned;

pub use barrier::{flags, BarrierPollHandle, CheckpointBarrier, CheckpointBarrierInjector};
pub use gate::{CheckpointedInputGate, GateError, GateEvent};
pub use tracker::{BarrierOutcome, BarrierTracker};
pub use unaligned::{InFlightChannelData, UnalignedSnapshot};
