//! Event-time progress: watermarks, stream status, and the per-input
//! [`StatusWatermarkValve`] that folds channel-level progress into one
//! aggregate.
//!
//! A watermark at `t` promises that no record with an earlier timestamp
//! follows. A [`StreamStatus::Idle`] channel stops holding the aggregate
//! back until it turns active again.

mod valve;

pub use valve::{StatusWatermarkValve, ValveOutput, ValveOutputs};

/// Event-time progress marker, in milliseconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark(pub i64);

impl Watermark {
    /// The smallest possible watermark; nothing has been observed yet.
    pub const MIN: Self = Self(i64::MIN);
    /// The final watermark of a bounded input.
    pub const MAX: Self = Self(i64::MAX);

    /// A watermark at `timestamp`.
    #[must_use]
    pub const fn new(timestamp: i64) -> Self {
        Self(timestamp)
    }

    /// Milliseconds since the epoch.
    #[must_use]
    pub const fn timestamp(&self) -> i64 {
        self.0
    }

    /// Whether a record at `event_time` arrived behind this watermark.
    #[must_use]
    pub const fn is_late(&self, event_time: i64) -> bool {
        event_time < self.0
    }
}

/// Activity signal of a channel or logical input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamStatus {
    /// The stream is producing records and watermarks.
    #[default]
    Active,
    /// The stream is temporarily quiet; it does not hold back watermarks.
    Idle,
}

impl StreamStatus {
    /// Returns `true` for [`StreamStatus::Active`].
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watermark_late_detection() {
        let wm = Watermark::new(50);
        assert_eq!(wm.timestamp(), 50);
        assert!(wm.is_late(49));
        assert!(!wm.is_late(50));
        assert!(!Watermark::MIN.is_late(i64::MIN));
    }

    #[test]
    fn test_watermark_ordering() {
        assert!(Watermark::MIN < Watermark::new(0));
        assert!(Watermark::new(5) < Watermark::MAX);
        assert_eq!(Watermark::new(3).max(Watermark::new(7)), Watermark::new(7));
    }

    #[test]
    fn test_default_status_is_active() {
        assert!(StreamStatus::default().is_active());
        assert!(!StreamStatus::Idle.is_active());
    }
}
