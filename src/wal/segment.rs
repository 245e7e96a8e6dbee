//! WAL Segment Store
//!
//! One logical log split across fixed-capacity files.
//!
//! ## Responsibilities
//! - Name segments so that lexicographic order equals numeric order
//! - Create and preallocate new segments
//! - Discover existing segments on startup
//! - Reopen older segments read-only

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{Result, WalError};

/// Extension of segment files
pub const SEGMENT_EXTENSION: &str = "wal";

/// Lifecycle of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// Created but not yet sized
    Empty,
    /// Owns the open write handle
    Active,
    /// Closed after rollover, read-only from now on
    Full,
    /// Wholly before the latest resumption checkpoint
    Archived,
}

/// A single segment file
#[derive(Debug)]
pub struct Segment {
    number: u32,
    state: SegmentState,
    capacity: u32,
    write_offset: u32,
    path: PathBuf,
    /// `None` once closed
    file: Option<File>,
}

impl Segment {
    /// Create a new segment file sized to `capacity` and mark it active.
    ///
    /// Fails if the file already exists: segments are never rewritten. A
    /// zero-length file, as left by a create that failed before sizing, is
    /// taken over instead. If sizing fails the new file is removed again.
    pub fn create(dir: &Path, number: u32, capacity: u32, preallocate: bool) -> Result<Self> {
        if number == 0 {
            return Err(WalError::InvalidArgument(
                "segment numbers start at 1".to_string(),
            ));
        }
        if capacity == 0 {
            return Err(WalError::InvalidArgument(
                "segment capacity must be above zero".to_string(),
            ));
        }

        let path = segment_path(dir, number);
        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => match reopen_empty(&path)? {
                Some(file) => {
                    tracing::warn!(segment = number, path = %path.display(), "reusing empty segment file");
                    file
                }
                None => return Err(e.into()),
            },
            Err(e) => return Err(e.into()),
        };

        let mut segment = Self {
            number,
            state: SegmentState::Empty,
            capacity,
            write_offset: 0,
            path,
            file: Some(file),
        };
        if let Err(e) = segment.reserve(preallocate).and_then(|()| sync_directory(dir)) {
            segment.close();
            if let Err(remove) = fs::remove_file(&segment.path) {
                tracing::warn!(segment = number, error = %remove, "failed to remove unsized segment file");
            }
            return Err(e);
        }

        segment.state = SegmentState::Active;
        tracing::debug!(segment = number, capacity, path = %segment.path.display(), "created segment");
        Ok(segment)
    }

    /// Open an existing segment for reads.
    ///
    /// A missing file surfaces as `Io(NotFound)`, which is how callers learn
    /// that the log ends at the previous segment.
    pub fn open_read_only(dir: &Path, number: u32) -> Result<Self> {
        let path = segment_path(dir, number);
        let file = File::open(&path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            number,
            state: SegmentState::Full,
            capacity: u32::try_from(len).unwrap_or(u32::MAX),
            write_offset: 0,
            path,
            file: Some(file),
        })
    }

    /// Size the file to the full capacity, fast path first
    fn reserve(&mut self, preallocate: bool) -> Result<()> {
        let file = self.handle()?;
        let len = self.capacity as u64;
        if preallocate {
            if let Err(e) = file.allocate(len) {
                tracing::debug!(segment = self.number, error = %e, "preallocation unavailable, falling back to set_len");
                file.set_len(len)?;
            }
        } else {
            file.set_len(len)?;
        }
        Ok(())
    }

    /// Write `bytes` at `offset` in one contiguous write.
    ///
    /// Does not advance the write offset; the append engine does that once
    /// the whole record is on disk.
    pub fn write_at(&mut self, offset: u32, bytes: &[u8]) -> Result<()> {
        if offset as u64 + bytes.len() as u64 > self.capacity as u64 {
            return Err(WalError::InvalidArgument(format!(
                "write of {} bytes at offset {} overflows segment {} (capacity {})",
                bytes.len(),
                offset,
                self.number,
                self.capacity
            )));
        }
        let file = self.handle_mut()?;
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(bytes)?;
        Ok(())
    }

    /// Sync the segment: `durable` syncs data and metadata, otherwise data only
    pub fn sync(&self, durable: bool) -> Result<()> {
        let Some(file) = self.file.as_ref() else {
            return Ok(());
        };
        if durable {
            file.sync_all()?;
        } else {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Close the handle. Idempotent; the file stays on disk.
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            tracing::debug!(segment = self.number, state = ?self.state, "closed segment");
        }
    }

    pub fn mark_full(&mut self) {
        self.state = SegmentState::Full;
    }

    pub fn advance(&mut self, len: u32) {
        self.write_offset += len;
    }

    /// Bytes left before the segment is full
    pub fn remaining(&self) -> u32 {
        self.capacity - self.write_offset
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn state(&self) -> SegmentState {
        self.state
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn write_offset(&self) -> u32 {
        self.write_offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hand the underlying file to a reader
    pub fn into_file(mut self) -> Result<File> {
        self.file
            .take()
            .ok_or_else(|| WalError::InvalidArgument(format!("segment {} is closed", self.number)))
    }

    fn handle(&self) -> Result<&File> {
        self.file
            .as_ref()
            .ok_or_else(|| WalError::InvalidArgument(format!("segment {} is closed", self.number)))
    }

    fn handle_mut(&mut self) -> Result<&mut File> {
        let number = self.number;
        self.file
            .as_mut()
            .ok_or_else(|| WalError::InvalidArgument(format!("segment {} is closed", number)))
    }
}

// =============================================================================
// Naming & Discovery
// =============================================================================

/// "0000000042.wal" for segment 42. Ten digits hold any u32, so string
/// order and numeric order agree.
pub fn segment_file_name(number: u32) -> String {
    format!("{:010}.{}", number, SEGMENT_EXTENSION)
}

pub fn segment_path(dir: &Path, number: u32) -> PathBuf {
    dir.join(segment_file_name(number))
}

/// Parse a segment number from a file name
/// "0000000042.wal" → Some(42)
pub fn parse_segment_number(path: &Path) -> Option<u32> {
    if path.extension()? != SEGMENT_EXTENSION {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.len() != 10 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match stem.parse() {
        Ok(0) | Err(_) => None,
        Ok(n) => Some(n),
    }
}

/// Segment numbers present in `dir`, ascending. Foreign files are ignored.
pub fn list_segments(dir: &Path) -> Result<Vec<u32>> {
    let mut numbers = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(number) = parse_segment_number(&path) {
            numbers.push(number);
        }
    }
    numbers.sort_unstable();
    Ok(numbers)
}

/// Open an existing segment file for writing if nothing was ever written to it
fn reopen_empty(path: &Path) -> Result<Option<File>> {
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    if file.metadata()?.len() == 0 {
        Ok(Some(file))
    } else {
        Ok(None)
    }
}

/// Make a newly created file's directory entry durable
#[cfg(unix)]
fn sync_directory(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> Result<()> {
    // NTFS journals metadata; directory handles cannot be fsynced
    Ok(())
}
