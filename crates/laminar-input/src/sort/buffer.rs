//! Per-input sort buffer with bounded memory.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::merge::reduce_runs;
use super::spill::{RunReader, SpillError, SpillStorage};

/// Fixed per-entry bookkeeping charged on top of key and payload bytes.
const ENTRY_OVERHEAD: usize = std::mem::size_of::<SortEntry>();

/// One buffered record: encoded key, insertion order, encoded payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SortEntry {
    pub(crate) key: Vec<u8>,
    pub(crate) seq: u64,
    pub(crate) payload: Vec<u8>,
}

impl SortEntry {
    fn size(&self) -> usize {
        self.key.len() + self.payload.len() + ENTRY_OVERHEAD
    }

    fn encode(&self) -> Result<Vec<u8>, SpillError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| SpillError::Serialization(e.to_string()))
    }

    fn decode(frame: &[u8]) -> Result<Self, SpillError> {
        bincode::serde::decode_from_slice(frame, bincode::config::standard())
            .map(|(entry, _)| entry)
            .map_err(|e| SpillError::Serialization(e.to_string()))
    }

    fn sort_order(a: &Self, b: &Self) -> std::cmp::Ordering {
        a.key.cmp(&b.key).then(a.seq.cmp(&b.seq))
    }
}

/// A sorted sequence of entries, in memory or on spill storage.
pub(crate) enum Run {
    Memory(VecDeque<SortEntry>),
    Spilled(Box<dyn RunReader>),
}

impl Run {
    pub(crate) fn next_entry(&mut self) -> Result<Option<SortEntry>, SpillError> {
        match self {
            Self::Memory(entries) => Ok(entries.pop_front()),
            Self::Spilled(reader) => reader
                .read_frame()?
                .map(|frame| SortEntry::decode(&frame))
                .transpose(),
        }
    }

    /// Writes every remaining entry of `entries` (already sorted) as a new
    /// spilled run.
    pub(crate) fn spill(
        entries: impl IntoIterator<Item = Result<SortEntry, SpillError>>,
        storage: &dyn SpillStorage,
    ) -> Result<Self, SpillError> {
        let mut writer = storage.create_run()?;
        for entry in entries {
            writer.write_frame(&entry?.encode()?)?;
        }
        Ok(Self::Spilled(writer.finish()?))
    }
}

impl fmt::Debug for Run {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory(entries) => write!(f, "Run::Memory({})", entries.len()),
            Self::Spilled(_) => f.write_str("Run::Spilled"),
        }
    }
}

/// Collects the records of one sorting input.
///
/// Entries are held serialized so their footprint is known exactly.
/// Exceeding the budget sorts the buffer and spills it as one run. Spilled
/// runs are pre-merged whenever they outnumber `fan_in`, so at most
/// `fan_in` runs stay open at a time.
#[derive(Debug)]
pub(crate) struct SortBuffer {
    entries: Vec<SortEntry>,
    bytes: usize,
    budget: usize,
    fan_in: usize,
    runs: Vec<Run>,
    next_seq: u64,
    records: u64,
}

impl SortBuffer {
    pub(crate) fn new(budget: usize, fan_in: usize) -> Self {
        Self {
            entries: Vec::new(),
            bytes: 0,
            budget,
            fan_in: fan_in.max(2),
            runs: Vec::new(),
            next_seq: 0,
            records: 0,
        }
    }

    pub(crate) fn push(
        &mut self,
        key: Vec<u8>,
        payload: Vec<u8>,
        storage: &dyn SpillStorage,
    ) -> Result<(), SpillError> {
        let entry = SortEntry {
            key,
            seq: self.next_seq,
            payload,
        };
        self.next_seq += 1;
        self.records += 1;
        self.bytes += entry.size();
        self.entries.push(entry);
        if self.bytes > self.budget {
            self.spill(storage)?;
        }
        Ok(())
    }

    /// Total records pushed.
    pub(crate) fn records(&self) -> u64 {
        self.records
    }

    /// Bytes currently held in memory.
    pub(crate) fn bytes_in_memory(&self) -> usize {
        self.bytes
    }

    /// Runs written to spill storage so far.
    pub(crate) fn spilled_runs(&self) -> usize {
        self.runs.len()
    }

    /// Sorts what is left in memory and returns all runs. The in-memory
    /// remainder is the last run.
    pub(crate) fn finish(&mut self) -> Vec<Run> {
        let mut entries = std::mem::take(&mut self.entries);
        entries.sort_unstable_by(SortEntry::sort_order);
        self.bytes = 0;
        let mut runs = std::mem::take(&mut self.runs);
        if !entries.is_empty() {
            runs.push(Run::Memory(entries.into()));
        }
        runs
    }

    /// Drops buffered entries and spilled runs.
    pub(crate) fn clear(&mut self) {
        self.entries = Vec::new();
        self.runs.clear();
        self.bytes = 0;
    }

    fn spill(&mut self, storage: &dyn SpillStorage) -> Result<(), SpillError> {
        let mut entries = std::mem::take(&mut self.entries);
        entries.sort_unstable_by(SortEntry::sort_order);
        let count = entries.len();
        let bytes = std::mem::replace(&mut self.bytes, 0);
        self.runs.push(Run::spill(entries.into_iter().map(Ok), storage)?);
        debug!(entries = count, bytes, runs = self.runs.len(), "spilled sort buffer");
        if self.runs.len() > self.fan_in {
            self.runs = reduce_runs(std::mem::take(&mut self.runs), self.fan_in, storage)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::spill::FileSpillStorage;

    fn drain(runs: Vec<Run>) -> Vec<Vec<u64>> {
        runs.into_iter()
            .map(|mut run| {
                let mut seqs = Vec::new();
                while let Some(entry) = run.next_entry().unwrap() {
                    seqs.push(entry.seq);
                }
                seqs
            })
            .collect()
    }

    #[test]
    fn test_in_memory_sort_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSpillStorage::new(dir.path());
        let mut buffer = SortBuffer::new(usize::MAX, 64);
        for key in [3u8, 1, 3, 2] {
            buffer.push(vec![key], vec![], &storage).unwrap();
        }
        assert_eq!(buffer.spilled_runs(), 0);
        assert!(buffer.bytes_in_memory() > 0);
        // keys 1,2,3,3 -> seqs 1,3,0,2
        assert_eq!(drain(buffer.finish()), vec![vec![1, 3, 0, 2]]);
        assert_eq!(buffer.records(), 4);
    }

    #[test]
    fn test_budget_overflow_spills_sorted_runs() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSpillStorage::new(dir.path());
        // Room for two entries.
        let mut buffer = SortBuffer::new(2 * (ENTRY_OVERHEAD + 2), 64);
        for key in [5u8, 4, 3, 2, 1] {
            buffer.push(vec![key], vec![key], &storage).unwrap();
        }
        assert_eq!(buffer.spilled_runs(), 1);
        assert_eq!(storage.runs_created(), 1);
        assert_eq!(drain(buffer.finish()), vec![vec![2, 1, 0], vec![4, 3]]);
    }

    #[test]
    fn test_open_runs_stay_within_fan_in() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSpillStorage::new(dir.path());
        // Every push spills.
        let mut buffer = SortBuffer::new(1, 2);
        let keys: Vec<u8> = (0..200u32).map(|i| ((i * 37) % 251) as u8).collect();
        for &key in &keys {
            buffer.push(vec![key], vec![], &storage).unwrap();
            assert!(buffer.spilled_runs() <= 2, "{} open runs", buffer.spilled_runs());
        }
        assert!(storage.runs_created() > 200);

        let mut merged = Vec::new();
        for mut run in buffer.finish() {
            while let Some(entry) = run.next_entry().unwrap() {
                merged.push(entry.key[0]);
            }
        }
        let mut expected = keys;
        expected.sort_unstable();
        merged.sort_unstable();
        assert_eq!(merged, expected);
    }

    #[test]
    fn test_entry_frame_round_trip() {
        let entry = SortEntry {
            key: vec![0x02, 0x80],
            seq: 7,
            payload: b"payload".to_vec(),
        };
        assert_eq!(SortEntry::decode(&entry.encode().unwrap()).unwrap(), entry);
        assert!(SortEntry::decode(&[0xFF]).is_err());
    }
}
