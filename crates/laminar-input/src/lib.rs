//! # `LaminarDB` Input
//!
//! The multi-input merge engine of a streaming task: combines network
//! inputs and chained source outputs into one ordered event stream for a
//! multi-input operator.
//!
//! ## Layers
//!
//! - **Channels** ([`channel`]): the thread-safe hand-off from the transport
//! - **Gates and valves** ([`checkpoint`], [`time`]): barrier alignment and
//!   watermark/status aggregation per network input
//! - **Sorting** ([`sort`]): optional key-ordered delivery via external sort
//! - **Selection** ([`selection`]): which input is serviced next
//! - **Driver** ([`processor`]): `process_once` and the per-input adapters
//! - **Assembly** ([`factory`]): validation and wiring
//!
//! ## Threading
//!
//! Everything above the channels is owned by the task thread. Only
//! [`channel::QueueChannel`] synchronizes with transport I/O threads.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod channel;
pub mod checkpoint;
pub mod config;
pub mod error_codes;
pub mod event;
pub mod factory;
pub mod input;
pub mod metrics;
pub mod operator;
pub mod processor;
pub mod selection;
pub mod sort;
pub mod time;

pub use channel::{channel, ChannelError, ChannelProducer, InputChannel, QueueChannel};
pub use checkpoint::{CheckpointBarrier, CheckpointBarrierInjector, UnalignedSnapshot};
pub use config::{AlignmentConfig, InputConfig, InputKind, MergeConfig};
pub use event::{LatencyMarker, Payload, Record, StreamEvent};
pub use factory::{ProcessorFactory, TaskInputs};
pub use input::SourceChain;
pub use metrics::{MetricRegistry, MetricsSink};
pub use operator::{MultiInputOperator, OperatorError};
pub use processor::{MultiInputProcessor, ProcessResult};
pub use selection::InputSelection;
pub use sort::{FileSpillStorage, KeySelector, MemoryManager, SortKey, SpillError, SpillStorage};
pub use time::{StreamStatus, Watermark};

/// Result type for merge engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the merge engine.
///
/// None of them is recovered locally; they propagate to the task's
/// failure handling, which restores from the last checkpoint.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A physical channel failed.
    #[error("[LDB-5101] input {input}, channel {channel} failed: {reason}")]
    ChannelFailure {
        /// Logical input index.
        input: usize,
        /// Channel index within the input.
        channel: usize,
        /// Transport-provided cause.
        reason: String,
    },

    /// The configuration does not fit the operator or itself. Only raised
    /// during assembly.
    #[error("configuration mismatch: {0}")]
    ConfigurationMismatch(String),

    /// Spilling or reading back sorted runs failed.
    #[error("[LDB-5102] sort spill failed: {0}")]
    SpillStorageFailure(#[from] SpillError),

    /// An input path cannot carry an event variant. Raised during assembly,
    /// or when a barrier reaches an input's output adapter.
    #[error("[LDB-0105] input {input} cannot deliver {variant} events")]
    UnsupportedEventVariant {
        /// Logical input index.
        input: usize,
        /// Event variant name.
        variant: &'static str,
    },

    /// The operator failed while processing an event.
    #[error("[LDB-8101] operator failed: {0}")]
    Operator(#[from] OperatorError),
}

impl Error {
    /// The stable `LDB-NNNN` code of this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ChannelFailure { .. } => error_codes::CHANNEL_FAILURE,
            Self::ConfigurationMismatch(detail) => {
                [
                    error_codes::INPUT_COUNT_MISMATCH,
                    error_codes::SELECTION_WITH_SORTING,
                    error_codes::UNRESOLVED_INPUT,
                    error_codes::INVALID_MERGE_CONFIG,
                ]
                .into_iter()
                .find(|code| detail.starts_with(&format!("[{code}]")))
                .unwrap_or(error_codes::INVALID_MERGE_CONFIG)
            }
            Self::SpillStorageFailure(_) => error_codes::SPILL_FAILURE,
            Self::UnsupportedEventVariant { .. } => error_codes::UNSUPPORTED_EVENT_VARIANT,
            Self::Operator(_) => error_codes::OPERATOR_FAILURE,
        }
    }

    pub(crate) fn mismatch(code: &'static str, detail: impl std::fmt::Display) -> Self {
        Self::ConfigurationMismatch(format!("[{code}] {detail}"))
    }
}
