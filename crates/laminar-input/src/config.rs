//! Configuration for the merge engine.
//!
//! [`MergeConfig`] holds task-wide settings and can be deserialized from a
//! job configuration file. [`InputConfig`] describes one logical input and
//! is built in code, since it carries the key extraction function.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error_codes;
use crate::sort::KeySelector;
use crate::{Error, Result};

/// Serde helper that encodes an optional [`Duration`] as milliseconds.
mod opt_duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S>(d: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match d {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

/// Default managed memory: 64 MiB.
const fn default_managed_memory_bytes() -> usize {
    64 * 1024 * 1024
}

const fn default_sort_memory_fraction() -> f64 {
    0.4
}

/// Default merge fan-in; more runs than this are pre-merged.
const fn default_max_merge_fan_in() -> usize {
    64
}

const fn default_max_buffered_events() -> usize {
    100_000
}

const fn default_max_inflight_events() -> usize {
    1_000_000
}

/// Barrier alignment settings for network inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentConfig {
    /// Convert an aligned checkpoint to unaligned after this long.
    /// `None` waits for the coordinator to cancel.
    #[serde(default, with = "opt_duration_millis")]
    pub aligned_checkpoint_timeout: Option<Duration>,

    /// Events buffered per channel while waiting for alignment. A channel
    /// at the limit is not polled until the checkpoint is released.
    #[serde(default = "default_max_buffered_events")]
    pub max_buffered_events_per_channel: usize,

    /// Treat every barrier as unaligned.
    #[serde(default)]
    pub force_unaligned: bool,

    /// Events captured per gate for one unaligned checkpoint. Reaching the
    /// limit fails that checkpoint.
    #[serde(default = "default_max_inflight_events")]
    pub max_inflight_events: usize,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            aligned_checkpoint_timeout: None,
            max_buffered_events_per_channel: default_max_buffered_events(),
            force_unaligned: false,
            max_inflight_events: default_max_inflight_events(),
        }
    }
}

/// Task-wide settings for the merge engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Memory managed by the task, in bytes.
    #[serde(default = "default_managed_memory_bytes")]
    pub managed_memory_bytes: usize,

    /// Fraction of managed memory granted to the sorting stage, in (0, 1].
    #[serde(default = "default_sort_memory_fraction")]
    pub sort_memory_fraction: f64,

    /// Directory for sort spill files (`None` = the system temp dir).
    #[serde(default)]
    pub spill_dir: Option<PathBuf>,

    /// Maximum number of runs merged at once.
    #[serde(default = "default_max_merge_fan_in")]
    pub max_merge_fan_in: usize,

    /// Whether the job takes checkpoints. Sorting inputs cannot carry
    /// barriers, so they are rejected when this is set.
    #[serde(default)]
    pub checkpointing_enabled: bool,

    /// Barrier alignment for network inputs.
    #[serde(default)]
    pub alignment: AlignmentConfig,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            managed_memory_bytes: default_managed_memory_bytes(),
            sort_memory_fraction: default_sort_memory_fraction(),
            spill_dir: None,
            max_merge_fan_in: default_max_merge_fan_in(),
            checkpointing_enabled: false,
            alignment: AlignmentConfig::default(),
        }
    }
}

impl MergeConfig {
    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationMismatch`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if !(self.sort_memory_fraction > 0.0 && self.sort_memory_fraction <= 1.0) {
            return Err(invalid(format!(
                "sort_memory_fraction must be in (0, 1], got {}",
                self.sort_memory_fraction
            )));
        }
        if self.max_merge_fan_in < 2 {
            return Err(invalid(format!(
                "max_merge_fan_in must be >= 2, got {}",
                self.max_merge_fan_in
            )));
        }
        if self.alignment.max_buffered_events_per_channel == 0 {
            return Err(invalid(
                "alignment.max_buffered_events_per_channel must be > 0".into(),
            ));
        }
        if self.alignment.max_inflight_events == 0 {
            return Err(invalid("alignment.max_inflight_events must be > 0".into()));
        }
        Ok(())
    }

    /// The directory spill files are created in.
    #[must_use]
    pub fn spill_directory(&self) -> PathBuf {
        self.spill_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

fn invalid(detail: String) -> Error {
    Error::mismatch(
        error_codes::INVALID_MERGE_CONFIG,
        format_args!("invalid merge config: {detail}"),
    )
}

/// Where a logical input's events come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputKind {
    /// A network input backed by the channel group at `gate_index`.
    Network {
        /// Index into the channel groups handed to the factory.
        gate_index: usize,
    },
    /// The output of a source operator chained into this task.
    ChainedSource {
        /// Index into the [`SourceChain`](crate::input::SourceChain).
        source_index: usize,
    },
}

/// Static description of one logical input.
pub struct InputConfig<T> {
    /// Where events come from.
    pub kind: InputKind,
    /// Whether records must be delivered in key order.
    pub requires_sorting: bool,
    /// Key extraction for sorting and keyed state.
    pub key_selector: Option<KeySelector<T>>,
}

impl<T> InputConfig<T> {
    /// A network input reading the channel group at `gate_index`.
    #[must_use]
    pub fn network(gate_index: usize) -> Self {
        Self {
            kind: InputKind::Network { gate_index },
            requires_sorting: false,
            key_selector: None,
        }
    }

    /// A chained source input reading source `source_index`.
    #[must_use]
    pub fn chained_source(source_index: usize) -> Self {
        Self {
            kind: InputKind::ChainedSource { source_index },
            requires_sorting: false,
            key_selector: None,
        }
    }

    /// Sets the key selector without requiring sorted delivery.
    #[must_use]
    pub fn keyed(mut self, selector: KeySelector<T>) -> Self {
        self.key_selector = Some(selector);
        self
    }

    /// Requires key-ordered delivery using `selector`.
    #[must_use]
    pub fn sorted(mut self, selector: KeySelector<T>) -> Self {
        self.requires_sorting = true;
        self.key_selector = Some(selector);
        self
    }

    /// Whether this is a network input.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self.kind, InputKind::Network { .. })
    }
}

impl<T> Clone for InputConfig<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            requires_sorting: self.requires_sorting,
            key_selector: self.key_selector.clone(),
        }
    }
}

impl<T> fmt::Debug for InputConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputConfig")
            .field("kind", &self.kind)
            .field("requires_sorting", &self.requires_sorting)
            .field("keyed", &self.key_selector.is_some())
            .finish()
    }
}
