//! Watermark and stream-status valve for one logical network input.
//!
//! A network input is fed by several physical channels, each with its own
//! watermark and status. The valve folds those into a single aggregate that
//! is safe to hand to the operator:
//!
//! - The aggregate watermark is the minimum over channels that are active,
//!   not finished, and aligned. A channel that has not reported a watermark
//!   yet holds the aggregate back entirely.
//! - The aggregate never regresses. A channel that comes back from idle
//!   with a watermark below the last emitted aggregate is *unaligned* and is
//!   ignored until it catches up.
//! - The input is idle iff every non-finished channel is idle.
//!
//! Only changes are emitted; feeding the same state twice yields nothing.

use smallvec::SmallVec;

use super::{StreamStatus, Watermark};

/// An aggregated signal to forward downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValveOutput {
    /// The aggregate watermark advanced.
    Watermark(Watermark),
    /// The aggregate stream status changed.
    Status(StreamStatus),
}

/// Outputs produced by a single valve update (at most a status change and a
/// watermark advance).
pub type ValveOutputs = SmallVec<[ValveOutput; 2]>;

#[derive(Debug, Clone, Copy)]
struct ChannelState {
    watermark: Option<i64>,
    status: StreamStatus,
    /// Whether the channel participates in the minimum.
    aligned: bool,
    finished: bool,
}

impl ChannelState {
    const fn new() -> Self {
        Self {
            watermark: None,
            status: StreamStatus::Active,
            aligned: true,
            finished: false,
        }
    }

    const fn participates(&self) -> bool {
        !self.finished && self.status.is_active() && self.aligned
    }
}

/// Folds per-channel watermarks and statuses into one aggregate.
#[derive(Debug)]
pub struct StatusWatermarkValve {
    channels: Vec<ChannelState>,
    last_watermark: Option<i64>,
    last_status: StreamStatus,
}

impl StatusWatermarkValve {
    /// Creates a valve for `num_channels` channels, all active and without
    /// watermarks.
    ///
    /// # Panics
    ///
    /// Panics if `num_channels` is 0.
    #[must_use]
    pub fn new(num_channels: usize) -> Self {
        assert!(num_channels > 0, "num_channels must be > 0");
        Self {
            channels: vec![ChannelState::new(); num_channels],
            last_watermark: None,
            last_status: StreamStatus::Active,
        }
    }

    /// Feeds a watermark observed on `channel`.
    ///
    /// Watermarks that do not advance the channel, or that arrive while the
    /// channel is idle or finished, are ignored.
    pub fn input_watermark(&mut self, channel: usize, watermark: Watermark) -> ValveOutputs {
        let mut out = ValveOutputs::new();
        let last = self.last_watermark;
        let Some(state) = self.channels.get_mut(channel) else {
            return out;
        };
        if state.finished || !state.status.is_active() {
            return out;
        }
        let ts = watermark.timestamp();
        if state.watermark.is_some_and(|current| ts <= current) {
            return out;
        }
        state.watermark = Some(ts);
        if !state.aligned && last.is_none_or(|l| ts >= l) {
            state.aligned = true;
        }
        self.push_advanced_watermark(&mut out);
        out
    }

    /// Feeds a status change observed on `channel`.
    pub fn input_status(&mut self, channel: usize, status: StreamStatus) -> ValveOutputs {
        let mut out = ValveOutputs::new();
        let last = self.last_watermark;
        let Some(state) = self.channels.get_mut(channel) else {
            return out;
        };
        if state.finished || state.status == status {
            return out;
        }
        state.status = status;
        match status {
            StreamStatus::Idle => {
                state.aligned = false;
                if self.all_idle() {
                    self.push_status(StreamStatus::Idle, &mut out);
                } else {
                    self.push_advanced_watermark(&mut out);
                }
            }
            StreamStatus::Active => {
                state.aligned = match (state.watermark, last) {
                    (_, None) => true,
                    (Some(wm), Some(l)) => wm >= l,
                    (None, Some(_)) => false,
                };
                self.push_status(StreamStatus::Active, &mut out);
            }
        }
        out
    }

    /// Removes `channel` from the aggregate after it reached end of input.
    pub fn channel_finished(&mut self, channel: usize) -> ValveOutputs {
        let mut out = ValveOutputs::new();
        let Some(state) = self.channels.get_mut(channel) else {
            return out;
        };
        if state.finished {
            return out;
        }
        state.finished = true;
        if self.channels.iter().any(|c| !c.finished) && self.all_idle() {
            self.push_status(StreamStatus::Idle, &mut out);
        } else {
            self.push_advanced_watermark(&mut out);
        }
        out
    }

    /// The last emitted aggregate watermark.
    #[must_use]
    pub fn current_watermark(&self) -> Option<Watermark> {
        self.last_watermark.map(Watermark::new)
    }

    /// The last emitted aggregate status.
    #[must_use]
    pub fn current_status(&self) -> StreamStatus {
        self.last_status
    }

    /// The latest watermark seen on `channel`.
    #[must_use]
    pub fn channel_watermark(&self, channel: usize) -> Option<Watermark> {
        self.channels
            .get(channel)
            .and_then(|c| c.watermark)
            .map(Watermark::new)
    }

    /// Number of channels folded by this valve.
    #[must_use]
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    fn all_idle(&self) -> bool {
        self.channels
            .iter()
            .filter(|c| !c.finished)
            .all(|c| !c.status.is_active())
    }

    fn push_status(&mut self, status: StreamStatus, out: &mut ValveOutputs) {
        if self.last_status != status {
            self.last_status = status;
            out.push(ValveOutput::Status(status));
        }
    }

    fn push_advanced_watermark(&mut self, out: &mut ValveOutputs) {
        let mut min: Option<i64> = None;
        for channel in self.channels.iter().filter(|c| c.participates()) {
            // An aligned channel without a watermark holds everything back.
            let wm = match channel.watermark {
                Some(wm) => wm,
                None => return,
            };
            min = Some(min.map_or(wm, |m| m.min(wm)));
        }
        if let Some(candidate) = min {
            if self.last_watermark.is_none_or(|l| candidate > l) {
                self.last_watermark = Some(candidate);
                out.push(ValveOutput::Watermark(Watermark::new(candidate)));
            }
        }
    }
}
