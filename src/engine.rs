//! Engine Module
//!
//! `Wal`, the context callers hold: it ties the append path, random reads
//! and crash recovery to one directory.
//!
//! ## Concurrency Model
//!
//! - **Writes** (begin/end record, checkpoint, recover): one record in flight
//!   per context. `begin_record` claims the context through an atomic flag
//!   and a second claim fails with `ConcurrentUse` instead of blocking or
//!   clobbering the pending record.
//! - **Flush**: takes the writer lock only, so it can run while a record is
//!   being filled in.
//! - **Reads** (`read_record`): open their own read-only handle and never
//!   touch the writer. Older segments are immutable and the active one is
//!   only appended to.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::config::WalConfig;
use crate::error::{Result, WalError};
use crate::wal::{
    list_segments, read_record, segment_path, Location, PendingRecord, Record, RecordHeader,
    RecordType, RecoveryHandlers, RecoveryStats, SegmentState, WalRecovery, WalWriter,
};

/// Write-ahead log context
pub struct Wal {
    config: WalConfig,

    /// Append path (exclusive access needed)
    writer: Mutex<WalWriter>,

    /// Set while a record builder, checkpoint or recovery holds the context
    claimed: AtomicBool,
}

/// Snapshot of one segment file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub number: u32,
    pub state: SegmentState,
    pub file_len: u64,
    pub path: std::path::PathBuf,
}

impl Wal {
    /// Open (or create) a WAL directory with the default configuration
    pub fn open(dir: impl AsRef<Path>, segment_capacity: u32) -> Result<Self> {
        let config = WalConfig::builder()
            .dir(dir.as_ref())
            .segment_capacity(segment_capacity)
            .build();
        Self::open_with_config(config)
    }

    /// Open with an explicit config
    ///
    /// A fresh active segment is started after any existing ones; existing
    /// segments are left untouched until `recover` reads them.
    pub fn open_with_config(config: WalConfig) -> Result<Self> {
        let writer = WalWriter::open(&config)?;
        Ok(Self {
            config,
            writer: Mutex::new(writer),
            claimed: AtomicBool::new(false),
        })
    }

    /// Durably flush and release the active segment
    pub fn close(self) -> Result<()> {
        self.writer.lock().close()
    }

    // =========================================================================
    // Append Path
    // =========================================================================

    /// Start a record of `data_len` payload bytes.
    ///
    /// The builder holds the context until `end_record` or until it is
    /// dropped (which abandons the record).
    pub fn begin_record(
        &self,
        record_type: RecordType,
        xid: u32,
        data_len: u16,
    ) -> Result<RecordBuilder<'_>> {
        if record_type == RecordType::Checkpoint {
            return Err(WalError::InvalidArgument(
                "checkpoint records are written by checkpoint()".to_string(),
            ));
        }

        let claim = self.claim()?;
        let pending = self.writer.lock().prepare(record_type, xid, data_len)?;
        Ok(RecordBuilder {
            wal: self,
            pending,
            _claim: claim,
        })
    }

    /// Write a whole record in one call
    pub fn append(&self, record_type: RecordType, xid: u32, payload: &[u8]) -> Result<Location> {
        let data_len = u16::try_from(payload.len()).map_err(|_| {
            WalError::InvalidArgument(format!(
                "payload of {} bytes exceeds the {} byte record limit",
                payload.len(),
                u16::MAX
            ))
        })?;
        let mut builder = self.begin_record(record_type, xid, data_len)?;
        builder.payload_mut().copy_from_slice(payload);
        builder.end_record()
    }

    /// Sync the active segment. `durable` also syncs file metadata.
    ///
    /// When this returns, every record from a completed `end_record` survives
    /// a crash.
    pub fn flush(&self, durable: bool) -> Result<()> {
        self.writer.lock().flush(durable)
    }

    /// Write a CHECKPOINT record and durably flush it
    pub fn checkpoint(&self) -> Result<Location> {
        let _claim = self.claim()?;
        self.writer.lock().checkpoint()
    }

    // =========================================================================
    // Reads & Recovery
    // =========================================================================

    /// Read and verify the record at `location`
    pub fn read_record(&self, location: Location) -> Result<Record> {
        read_record(&self.config.dir, location)
    }

    /// Replay committed records through `handlers`, then checkpoint so the
    /// recovered history is not scanned again
    pub fn recover(&self, handlers: &mut RecoveryHandlers<'_>) -> Result<RecoveryStats> {
        let _claim = self.claim()?;
        let stats = self.recovery().recover(handlers)?;

        let mut writer = self.writer.lock();
        writer.seed_backlink(stats.end_location);
        writer.checkpoint()?;
        Ok(stats)
    }

    /// Replay committed records located at or before `end`.
    ///
    /// No checkpoint is written: later records must stay visible to a
    /// subsequent full recovery.
    pub fn recover_until(
        &self,
        handlers: &mut RecoveryHandlers<'_>,
        end: Location,
    ) -> Result<RecoveryStats> {
        let _claim = self.claim()?;
        self.recovery().until(end).recover(handlers)
    }

    /// Classify the log without applying or writing anything
    pub fn verify(&self) -> Result<RecoveryStats> {
        self.recovery().verify()
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Location of the last record written through this context
    pub fn last_location(&self) -> Option<Location> {
        let location = self.writer.lock().last_location();
        (!location.is_zero()).then_some(location)
    }

    /// Number of the segment currently receiving writes
    pub fn active_segment(&self) -> u32 {
        self.writer.lock().active_segment().number()
    }

    /// All segment files, oldest first
    pub fn segments(&self) -> Result<Vec<SegmentInfo>> {
        let (active, checkpoint) = {
            let writer = self.writer.lock();
            (writer.active_segment().number(), writer.last_checkpoint())
        };

        let mut infos = Vec::new();
        for number in list_segments(&self.config.dir)? {
            let path = segment_path(&self.config.dir, number);
            let file_len = fs::metadata(&path)?.len();
            let state = if number == active {
                SegmentState::Active
            } else if checkpoint.is_some_and(|c| number < c.segment) {
                SegmentState::Archived
            } else {
                SegmentState::Full
            };
            infos.push(SegmentInfo {
                number,
                state,
                file_len,
                path,
            });
        }
        Ok(infos)
    }

    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn recovery(&self) -> WalRecovery {
        WalRecovery::new(&self.config.dir)
    }

    fn claim(&self) -> Result<Claim<'_>> {
        self.claimed
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| WalError::ConcurrentUse)?;
        Ok(Claim {
            flag: &self.claimed,
        })
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        if let Err(e) = self.writer.get_mut().close() {
            tracing::warn!(error = %e, "failed to flush WAL on drop");
        }
    }
}

/// Releases the context when dropped
struct Claim<'a> {
    flag: &'a AtomicBool,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

// =============================================================================
// Record Builder
// =============================================================================

/// A record being filled in. Holds the WAL context until consumed.
pub struct RecordBuilder<'a> {
    wal: &'a Wal,
    pending: PendingRecord,
    _claim: Claim<'a>,
}

impl RecordBuilder<'_> {
    pub fn header(&self) -> &RecordHeader {
        self.pending.header()
    }

    /// Payload region, exactly `data_len` bytes
    pub fn payload_mut(&mut self) -> &mut [u8] {
        self.pending.payload_mut()
    }

    /// Checksum and write the record, returning where it landed.
    ///
    /// On an I/O failure, including a failed sync under the sync strategy,
    /// nothing is recorded as written and the context is released; begin the
    /// record again to retry.
    pub fn end_record(self) -> Result<Location> {
        let RecordBuilder {
            wal,
            pending,
            _claim,
        } = self;
        let location = wal.writer.lock().append(pending)?;
        Ok(location)
    }
}
