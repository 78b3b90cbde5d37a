//! Events that flow through input channels.
//!
//! [`StreamEvent`] wraps user records with the control signals that travel
//! alongside them: watermarks, stream status changes, checkpoint barriers
//! and latency markers. Events are produced by the transport layer (or a
//! chained source) and are never mutated afterwards.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointBarrier;
use crate::time::{StreamStatus, Watermark};

/// Bound for record payloads carried by the engine.
///
/// Payloads cross threads at the channel hand-off, are cloned into
/// unaligned checkpoint snapshots, and are serialized when the sorting
/// stage spills.
pub trait Payload: Clone + Send + Serialize + DeserializeOwned + 'static {}

impl<T> Payload for T where T: Clone + Send + Serialize + DeserializeOwned + 'static {}

/// A user record with its optional event timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record<T> {
    /// The record payload.
    pub value: T,
    /// Event time in millis since epoch, if the record carries one.
    pub timestamp: Option<i64>,
}

impl<T> Record<T> {
    /// Creates a record without a timestamp.
    pub const fn new(value: T) -> Self {
        Self {
            value,
            timestamp: None,
        }
    }

    /// Creates a record with an event timestamp.
    pub const fn with_timestamp(value: T, timestamp: i64) -> Self {
        Self {
            value,
            timestamp: Some(timestamp),
        }
    }
}

/// A probe used to measure end-to-end latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LatencyMarker {
    /// Wall-clock time at which the marker was emitted (millis).
    pub marked_time: i64,
    /// Operator that emitted the marker.
    pub origin_operator: u64,
    /// Subtask of the origin operator.
    pub origin_subtask: u32,
}

/// A single event delivered by a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent<T> {
    /// A user data record.
    Record(Record<T>),
    /// Event-time progress.
    Watermark(Watermark),
    /// Activity change of the producing channel.
    Status(StreamStatus),
    /// A checkpoint barrier.
    Barrier(CheckpointBarrier),
    /// A latency probe.
    LatencyMarker(LatencyMarker),
}

impl<T> StreamEvent<T> {
    /// Convenience constructor for a timestamped record event.
    pub const fn record(value: T, timestamp: i64) -> Self {
        Self::Record(Record::with_timestamp(value, timestamp))
    }

    /// Convenience constructor for a watermark event.
    pub const fn watermark(timestamp: i64) -> Self {
        Self::Watermark(Watermark::new(timestamp))
    }

    /// Returns `true` if this is a record.
    #[must_use]
    pub const fn is_record(&self) -> bool {
        matches!(self, Self::Record(_))
    }

    /// Returns `true` if this is a barrier.
    #[must_use]
    pub const fn is_barrier(&self) -> bool {
        matches!(self, Self::Barrier(_))
    }

    /// Extracts the barrier if this is a [`StreamEvent::Barrier`].
    #[must_use]
    pub const fn as_barrier(&self) -> Option<&CheckpointBarrier> {
        match self {
            Self::Barrier(b) => Some(b),
            _ => None,
        }
    }

    /// Short variant name, used in logs and error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Record(_) => "record",
            Self::Watermark(_) => "watermark",
            Self::Status(_) => "stream-status",
            Self::Barrier(_) => "checkpoint-barrier",
            Self::LatencyMarker(_) => "latency-marker",
        }
    }
}
