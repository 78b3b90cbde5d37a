//! Input selection: which logical input is serviced next.
//!
//! Sets of inputs are `u128` bitsets, so a task supports at most
//! [`MAX_INPUTS`] logical inputs.
//!
//! ## Modes
//!
//! - [`SelectionMode::AnyAvailable`]: fair round-robin over available inputs
//! - [`SelectionMode::OperatorDriven`]: the operator names the inputs it
//!   wants next after every consumed event
//! - [`SelectionMode::Sorted`]: the sorting stage names the eligible inputs
//!
//! Round-robin always starts after the last serviced input. If nothing in
//! the preferred set is available, any other eligible input that is
//! available is picked instead, so selection never stalls while something
//! could make progress.

/// Maximum number of logical inputs.
pub const MAX_INPUTS: usize = 128;

/// A set of logical inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputSelection(u128);

impl InputSelection {
    /// Every input.
    pub const ALL: Self = Self(u128::MAX);
    /// No input.
    pub const NONE: Self = Self(0);

    /// Inputs `0..n`.
    #[must_use]
    pub const fn first(n: usize) -> Self {
        if n >= MAX_INPUTS {
            Self::ALL
        } else {
            Self((1u128 << n) - 1)
        }
    }

    /// Exactly input `input`.
    #[must_use]
    pub const fn single(input: usize) -> Self {
        Self(bit(input))
    }

    /// Adds `input`.
    #[must_use]
    pub const fn with(self, input: usize) -> Self {
        Self(self.0 | bit(input))
    }

    /// Removes `input`.
    #[must_use]
    pub const fn without(self, input: usize) -> Self {
        Self(self.0 & !bit(input))
    }

    /// Whether `input` is in the set.
    #[must_use]
    pub const fn contains(self, input: usize) -> bool {
        self.0 & bit(input) != 0
    }

    /// Inputs in both sets.
    #[must_use]
    pub const fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Inputs in either set.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Whether the set is empty.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of inputs in the set.
    #[must_use]
    pub const fn len(self) -> u32 {
        self.0.count_ones()
    }
}

impl FromIterator<usize> for InputSelection {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        iter.into_iter().fold(Self::NONE, Self::with)
    }
}

const fn bit(input: usize) -> u128 {
    if input < MAX_INPUTS {
        1u128 << input
    } else {
        0
    }
}

/// Who decides the preferred inputs. Fixed at assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    /// No preference; fair rotation over available inputs.
    AnyAvailable,
    /// The operator's `next_selection` decides.
    OperatorDriven,
    /// The sorting stage decides.
    Sorted,
}

/// Picks the next input to service.
#[derive(Debug)]
pub struct SelectionHandler {
    mode: SelectionMode,
    num_inputs: usize,
    last_serviced: Option<usize>,
    operator_preference: InputSelection,
}

impl SelectionHandler {
    /// Creates a handler for `num_inputs` inputs.
    #[must_use]
    pub fn new(mode: SelectionMode, num_inputs: usize) -> Self {
        Self {
            mode,
            num_inputs: num_inputs.min(MAX_INPUTS),
            last_serviced: None,
            operator_preference: InputSelection::ALL,
        }
    }

    /// The selection mode.
    #[must_use]
    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    /// Records the operator's preference for the next pick.
    pub fn set_operator_preference(&mut self, preference: InputSelection) {
        self.operator_preference = preference;
    }

    /// Records that `input` was serviced.
    pub fn serviced(&mut self, input: usize) {
        self.last_serviced = Some(input);
    }

    /// Picks an input.
    ///
    /// `eligible` holds the inputs that may be serviced at all (unfinished
    /// and not blocked by barrier alignment). `stage_eligible` is the
    /// sorting stage's set, used in [`SelectionMode::Sorted`].
    pub fn select(
        &self,
        eligible: InputSelection,
        stage_eligible: InputSelection,
        is_available: impl Fn(usize) -> bool,
    ) -> Option<usize> {
        let (preferred, fallback) = match self.mode {
            SelectionMode::AnyAvailable => (eligible, eligible),
            SelectionMode::OperatorDriven => {
                (eligible.intersect(self.operator_preference), eligible)
            }
            SelectionMode::Sorted => {
                let allowed = eligible.intersect(stage_eligible);
                (allowed, allowed)
            }
        };
        self.round_robin(preferred, &is_available)
            .or_else(|| self.round_robin(fallback, &is_available))
    }

    fn round_robin(
        &self,
        set: InputSelection,
        is_available: &impl Fn(usize) -> bool,
    ) -> Option<usize> {
        if set.is_empty() || self.num_inputs == 0 {
            return None;
        }
        let start = self.last_serviced.map_or(0, |last| last + 1);
        (0..self.num_inputs)
            .map(|offset| (start + offset) % self.num_inputs)
            .find(|&input| set.contains(input) && is_available(input))
    }
}
