//! Structured error code registry for the multi-input merge engine.
//!
//! Every error raised by `laminar-input` carries a stable `LDB-NNNN` code
//! that is:
//! - Present in the error message (grep-able in logs)
//! - Present in the source code (grep-able in code)
//! - Stable across versions (codes are never reused)
//!
//! # Code Ranges
//!
//! | Range | Category |
//! |-------|----------|
//! | `LDB-0xxx` | Assembly / configuration |
//! | `LDB-5xxx` | Channel transport / spill I/O |
//! | `LDB-6xxx` | Checkpoint alignment |
//! | `LDB-8xxx` | Operator / internal |
//!
//! The ranges line up with the registry in `laminar-core`; the individual
//! codes below are owned by this crate.

// ── Assembly / Configuration (LDB-0xxx) ──

/// Configured input count does not match the operator's declared inputs.
pub const INPUT_COUNT_MISMATCH: &str = "LDB-0101";
/// Operator-driven selection requested together with sorted inputs.
pub const SELECTION_WITH_SORTING: &str = "LDB-0102";
/// A gate or chained source index could not be resolved.
pub const UNRESOLVED_INPUT: &str = "LDB-0103";
/// A configuration value is out of range.
pub const INVALID_MERGE_CONFIG: &str = "LDB-0104";
/// An event variant cannot be delivered by the configured input path.
pub const UNSUPPORTED_EVENT_VARIANT: &str = "LDB-0105";

// ── Transport / Spill I/O (LDB-5xxx) ──

/// A physical channel reported a transport failure.
pub const CHANNEL_FAILURE: &str = "LDB-5101";
/// Writing or reading a sort spill run failed.
pub const SPILL_FAILURE: &str = "LDB-5102";

// ── Checkpoint (LDB-6xxx) ──

/// A barrier arrived for a checkpoint that was already closed.
pub const STALE_BARRIER: &str = "LDB-6101";

// ── Operator / Internal (LDB-8xxx) ──

/// The consuming operator failed while processing an event.
pub const OPERATOR_FAILURE: &str = "LDB-8101";
