//! K-way merge over sorted runs.
//!
//! Heads of all runs sit in a min-heap ordered by `(key, input, seq)`, so
//! equal keys from different inputs come out lower input first and equal
//! keys within one input keep arrival order.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use tracing::debug;

use super::buffer::{Run, SortEntry};
use super::spill::{SpillError, SpillStorage};

#[derive(Debug)]
struct Head {
    entry: SortEntry,
    input: usize,
    run: usize,
}

impl Head {
    fn order_key(&self) -> (&[u8], usize, u64) {
        (self.entry.key.as_slice(), self.input, self.entry.seq)
    }
}

impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.order_key() == other.order_key()
    }
}

impl Eq for Head {}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Head {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order_key().cmp(&other.order_key())
    }
}

/// Merges runs tagged with the input they belong to.
#[derive(Debug)]
pub(crate) struct KWayMerge {
    runs: Vec<(usize, Run)>,
    heap: BinaryHeap<Reverse<Head>>,
}

impl KWayMerge {
    pub(crate) fn new(runs: Vec<(usize, Run)>) -> Result<Self, SpillError> {
        let mut merge = Self {
            heap: BinaryHeap::with_capacity(runs.len()),
            runs,
        };
        for run in 0..merge.runs.len() {
            merge.refill(run)?;
        }
        Ok(merge)
    }

    /// Input owning the smallest remaining entry.
    pub(crate) fn peek_input(&self) -> Option<usize> {
        self.heap.peek().map(|Reverse(head)| head.input)
    }

    /// Removes and returns the smallest entry with its input.
    pub(crate) fn pop(&mut self) -> Result<Option<(usize, SortEntry)>, SpillError> {
        let Some(Reverse(head)) = self.heap.pop() else {
            return Ok(None);
        };
        self.refill(head.run)?;
        Ok(Some((head.input, head.entry)))
    }

    fn refill(&mut self, run: usize) -> Result<(), SpillError> {
        let (input, source) = &mut self.runs[run];
        if let Some(entry) = source.next_entry()? {
            self.heap.push(Reverse(Head {
                entry,
                input: *input,
                run,
            }));
        }
        Ok(())
    }
}

/// Reduces `runs` of one input to at most `fan_in` by merging the oldest
/// `fan_in` runs into a new spilled run, repeatedly.
pub(crate) fn reduce_runs(
    mut runs: Vec<Run>,
    fan_in: usize,
    storage: &dyn SpillStorage,
) -> Result<Vec<Run>, SpillError> {
    let fan_in = fan_in.max(2);
    while runs.len() > fan_in {
        let batch: Vec<(usize, Run)> = runs.drain(..fan_in).map(|run| (0, run)).collect();
        let mut merge = KWayMerge::new(batch)?;
        let merged = Run::spill(
            std::iter::from_fn(|| merge.pop().transpose()).map(|r| r.map(|(_, entry)| entry)),
            storage,
        )?;
        runs.push(merged);
        debug!(fan_in, remaining = runs.len(), "pre-merged spill runs");
    }
    Ok(runs)
}
