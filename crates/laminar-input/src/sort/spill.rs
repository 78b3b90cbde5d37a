//! Memory grants and spill storage for the sorting stage.
//!
//! The stage never allocates beyond its [`MemoryBudget`]. When a sort
//! buffer would exceed its share, the buffer is sorted and written out as a
//! *run* through a [`SpillStorage`]. A run is a sequence of length-prefixed
//! frames; it only becomes readable once [`RunWriter::finish`] has flushed
//! and synced it, so nothing is handed downstream from a half-written run.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

/// Errors from spill storage.
#[derive(Debug, thiserror::Error)]
pub enum SpillError {
    /// Reading or writing a spill file failed.
    #[error("spill I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An entry could not be encoded or decoded.
    #[error("spill serialization error: {0}")]
    Serialization(String),

    /// A run ended in the middle of a frame.
    #[error("corrupt spill run: {0}")]
    Corrupt(String),
}

/// Grants byte allowances out of the task's managed memory.
#[derive(Debug, Clone, Copy)]
pub struct MemoryManager {
    total_bytes: usize,
}

impl MemoryManager {
    /// Creates a manager over `total_bytes` of managed memory.
    #[must_use]
    pub const fn new(total_bytes: usize) -> Self {
        Self { total_bytes }
    }

    /// Total managed memory.
    #[must_use]
    pub const fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Grants `fraction` of managed memory. Fractions are clamped to [0, 1].
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn budget(&self, fraction: f64) -> MemoryBudget {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        MemoryBudget {
            bytes: (self.total_bytes as f64 * fraction) as usize,
        }
    }
}

/// A byte allowance granted by [`MemoryManager::budget`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBudget {
    bytes: usize,
}

impl MemoryBudget {
    /// Granted bytes.
    #[must_use]
    pub const fn bytes(&self) -> usize {
        self.bytes
    }

    /// Splits the budget evenly across `parts` consumers.
    #[must_use]
    pub fn per_part(&self, parts: usize) -> usize {
        self.bytes / parts.max(1)
    }
}

/// Creates spill runs.
pub trait SpillStorage: Send {
    /// Opens a new, empty run for writing.
    ///
    /// # Errors
    ///
    /// Returns [`SpillError`] if the backing storage cannot be allocated.
    fn create_run(&self) -> Result<Box<dyn RunWriter>, SpillError>;
}

/// Write side of a spill run.
pub trait RunWriter: Send {
    /// Appends one frame.
    ///
    /// # Errors
    ///
    /// Returns [`SpillError`] on I/O failure.
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), SpillError>;

    /// Makes the run durable and returns a reader positioned at its start.
    ///
    /// # Errors
    ///
    /// Returns [`SpillError`] if flushing or syncing fails.
    fn finish(self: Box<Self>) -> Result<Box<dyn RunReader>, SpillError>;
}

/// Read side of a finished spill run.
pub trait RunReader: Send {
    /// Returns the next frame, or `None` at the end of the run.
    ///
    /// # Errors
    ///
    /// Returns [`SpillError`] on I/O failure or a truncated frame.
    fn read_frame(&mut self) -> Result<Option<Vec<u8>>, SpillError>;
}

/// Spill storage backed by unnamed temporary files.
///
/// Files are created in `dir` and are removed by the OS as soon as they
/// are closed, so dropping a run releases its disk space.
#[derive(Debug)]
pub struct FileSpillStorage {
    dir: PathBuf,
    runs_created: AtomicU64,
}

impl FileSpillStorage {
    /// Creates storage spilling into `dir`.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            runs_created: AtomicU64::new(0),
        }
    }

    /// The spill directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of runs created so far.
    #[must_use]
    pub fn runs_created(&self) -> u64 {
        self.runs_created.load(Ordering::Relaxed)
    }
}

impl SpillStorage for FileSpillStorage {
    fn create_run(&self) -> Result<Box<dyn RunWriter>, SpillError> {
        let file = tempfile::tempfile_in(&self.dir)?;
        let run = self.runs_created.fetch_add(1, Ordering::Relaxed);
        debug!(run, dir = %self.dir.display(), "created spill run");
        Ok(Box::new(FileRunWriter {
            writer: BufWriter::new(file),
            frames: 0,
        }))
    }
}

struct FileRunWriter {
    writer: BufWriter<File>,
    frames: u64,
}

impl RunWriter for FileRunWriter {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), SpillError> {
        let len = u32::try_from(frame.len())
            .map_err(|_| SpillError::Serialization(format!("frame of {} bytes", frame.len())))?;
        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(frame)?;
        self.frames += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Box<dyn RunReader>, SpillError> {
        let frames = self.frames;
        let mut file = self.writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_data()?;
        file.seek(SeekFrom::Start(0))?;
        Ok(Box::new(FileRunReader {
            reader: BufReader::new(file),
            remaining: frames,
        }))
    }
}

struct FileRunReader {
    reader: BufReader<File>,
    remaining: u64,
}

impl RunReader for FileRunReader {
    fn read_frame(&mut self) -> Result<Option<Vec<u8>>, SpillError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let mut len = [0u8; 4];
        self.reader.read_exact(&mut len).map_err(truncated)?;
        let mut frame = vec![0u8; u32::from_le_bytes(len) as usize];
        self.reader.read_exact(&mut frame).map_err(truncated)?;
        self.remaining -= 1;
        Ok(Some(frame))
    }
}

fn truncated(e: std::io::Error) -> SpillError {
    if e.kind() == ErrorKind::UnexpectedEof {
        SpillError::Corrupt("run ended mid-frame".into())
    } else {
        SpillError::Io(e)
    }
}
