//! WAL Writer
//!
//! The append path: owns the active segment and the global append cursor,
//! frames records, rolls over full segments and applies the sync strategy.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use bytes::BytesMut;

use crate::config::{SyncStrategy, WalConfig};
use crate::error::{Result, WalError};

use super::record::{self, CheckpointInfo, Location, RecordHeader, RecordType, HEADER_SIZE};
use super::segment::{list_segments, Segment};

/// A record between `prepare` and `append`: header already encoded,
/// payload region zeroed and waiting for the caller
#[derive(Debug)]
pub struct PendingRecord {
    header: RecordHeader,
    buf: BytesMut,
}

impl PendingRecord {
    pub fn header(&self) -> &RecordHeader {
        &self.header
    }

    /// The `data_len` bytes the caller fills in
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buf[HEADER_SIZE..]
    }

    pub fn payload(&self) -> &[u8] {
        &self.buf[HEADER_SIZE..]
    }
}

/// Appends records to the active segment
pub struct WalWriter {
    dir: PathBuf,
    capacity: u32,
    preallocate: bool,
    sync_strategy: SyncStrategy,

    /// Segment owning the write handle
    active: Segment,

    /// Last successfully written record (`ZERO` before the first write)
    last_location: Location,

    /// Latest checkpoint usable as a recovery resumption point
    last_checkpoint: Option<Location>,

    /// Records written since the last sync
    unsynced: usize,

    /// Transactions seen without a commit/abort marker yet
    open_xids: HashSet<u32>,

    /// Fail the next sync with an I/O error
    #[cfg(test)]
    fail_next_sync: bool,
}

impl WalWriter {
    /// Open the directory and start a fresh active segment after any existing ones
    pub fn open(config: &WalConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.dir)?;

        let existing = list_segments(&config.dir)?;
        let next = match existing.last() {
            Some(&u32::MAX) => {
                return Err(WalError::InvalidArgument(
                    "segment numbers exhausted".to_string(),
                ))
            }
            Some(&highest) => highest + 1,
            None => 1,
        };

        let active = Segment::create(
            &config.dir,
            next,
            config.segment_capacity,
            config.preallocate,
        )?;

        tracing::info!(
            dir = %config.dir.display(),
            existing_segments = existing.len(),
            active_segment = next,
            "WAL writer opened"
        );

        Ok(Self {
            dir: config.dir.clone(),
            capacity: config.segment_capacity,
            preallocate: config.preallocate,
            sync_strategy: config.sync_strategy,
            active,
            last_location: Location::ZERO,
            last_checkpoint: None,
            unsynced: 0,
            open_xids: HashSet::new(),
            #[cfg(test)]
            fail_next_sync: false,
        })
    }

    /// Allocate a record buffer with its header filled in.
    ///
    /// `prev_location` is the last written location at this moment; the
    /// caller guarantees nothing else is appended before `append`.
    pub fn prepare(&self, record_type: RecordType, xid: u32, data_len: u16) -> Result<PendingRecord> {
        if record_type == RecordType::Null {
            return Err(WalError::InvalidArgument(
                "NULL records cannot be written".to_string(),
            ));
        }

        let header = RecordHeader::new(record_type, xid, self.last_location, data_len);
        if header.total_len > self.capacity {
            return Err(WalError::InvalidArgument(format!(
                "record of {} bytes does not fit in a {} byte segment",
                header.total_len, self.capacity
            )));
        }

        let mut buf = BytesMut::with_capacity(header.total_len as usize);
        header.encode_into(&mut buf);
        buf.resize(HEADER_SIZE + data_len as usize, 0);

        Ok(PendingRecord { header, buf })
    }

    /// Seal and write a prepared record, rolling over first if it does not fit.
    ///
    /// A sync required by the sync strategy happens before the cursor moves.
    /// On a failed write or sync the cursor is left where it was, so the
    /// record counts as not written and the next one overwrites its bytes.
    pub fn append(&mut self, pending: PendingRecord) -> Result<Location> {
        let PendingRecord { header, mut buf } = pending;
        let total_len = header.total_len;

        if self.active.is_closed() || self.active.remaining() < total_len {
            self.rollover()?;
        }

        record::seal(&mut buf);
        debug_assert_eq!(buf.len(), total_len as usize);

        let location = Location::new(self.active.number(), self.active.write_offset());
        self.active.write_at(location.offset, &buf)?;

        let unsynced = self.unsynced + 1;
        if self.sync_due(unsynced) {
            if let Err(e) = self.sync_active(false) {
                self.discard(location.offset, total_len);
                return Err(e);
            }
            self.unsynced = 0;
        } else {
            self.unsynced = unsynced;
        }

        self.active.advance(total_len);
        self.last_location = location;
        self.track_transaction(&header);

        tracing::trace!(
            %location,
            record_type = %header.record_type,
            xid = header.xid,
            len = total_len,
            "appended record"
        );
        Ok(location)
    }

    /// Sync the active segment. Earlier segments were synced on rollover.
    pub fn flush(&mut self, durable: bool) -> Result<()> {
        self.sync_active(durable)?;
        self.unsynced = 0;
        Ok(())
    }

    /// Write a CHECKPOINT record and make everything up to it durable
    pub fn checkpoint(&mut self) -> Result<Location> {
        let mut in_flight: Vec<u32> = self.open_xids.iter().copied().collect();
        in_flight.sort_unstable();
        let info = CheckpointInfo { in_flight };

        let max_payload = (self.capacity as usize - record::RECORD_OVERHEAD).min(record::MAX_PAYLOAD_SIZE);
        let payload = info.encode(max_payload)?;

        let mut pending = self.prepare(RecordType::Checkpoint, 0, payload.len() as u16)?;
        pending.payload_mut().copy_from_slice(&payload);
        let location = self.append(pending)?;
        self.flush(true)?;

        if info.is_quiescent() {
            self.last_checkpoint = Some(location);
        }
        tracing::debug!(
            %location,
            in_flight = info.in_flight.len(),
            "checkpoint written"
        );
        Ok(location)
    }

    /// Flush and release the active segment
    pub fn close(&mut self) -> Result<()> {
        if self.active.is_closed() {
            return Ok(());
        }
        self.flush(true)?;
        self.active.close();
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn last_location(&self) -> Location {
        self.last_location
    }

    pub fn last_checkpoint(&self) -> Option<Location> {
        self.last_checkpoint
    }

    pub fn active_segment(&self) -> &Segment {
        &self.active
    }

    pub fn open_transactions(&self) -> usize {
        self.open_xids.len()
    }

    /// Link the next record back to `end` (the last recovered record) when
    /// nothing has been written in this session yet
    pub fn seed_backlink(&mut self, end: Location) {
        if self.last_location.is_zero() {
            self.last_location = end;
        }
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Close the full active segment and open the next one
    fn rollover(&mut self) -> Result<()> {
        let next = self
            .active
            .number()
            .checked_add(1)
            .ok_or_else(|| WalError::InvalidArgument("segment numbers exhausted".to_string()))?;

        if !self.active.is_closed() {
            // A later flush only syncs the new segment
            self.active.sync(false)?;
            self.active.mark_full();
            self.active.close();
            tracing::debug!(
                segment = self.active.number(),
                used = self.active.write_offset(),
                "segment full, rolling over"
            );
        }

        self.active = Segment::create(&self.dir, next, self.capacity, self.preallocate)?;
        self.unsynced = 0;
        Ok(())
    }

    fn sync_due(&self, unsynced: usize) -> bool {
        match self.sync_strategy {
            SyncStrategy::Manual => false,
            SyncStrategy::EveryWrite => true,
            SyncStrategy::EveryNEntries { count } => unsynced >= count,
        }
    }

    fn sync_active(&mut self, durable: bool) -> Result<()> {
        #[cfg(test)]
        if std::mem::take(&mut self.fail_next_sync) {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "sync failed").into());
        }
        self.active.sync(durable)
    }

    /// Zero the bytes of a record that was written but not accepted, so a
    /// shorter record reusing the offset does not leave a valid one behind it
    fn discard(&mut self, offset: u32, len: u32) {
        let zeros = vec![0u8; len as usize];
        if let Err(e) = self.active.write_at(offset, &zeros) {
            tracing::warn!(
                segment = self.active.number(),
                offset,
                error = %e,
                "failed to clear rejected record"
            );
        }
    }

    /// XACT_COMMIT opens a transaction the first time an xid is seen and
    /// closes it the second time; XACT_ABORT closes it
    fn track_transaction(&mut self, header: &RecordHeader) {
        if header.xid == 0 {
            return;
        }
        match header.record_type {
            RecordType::XactCommit => {
                if !self.open_xids.remove(&header.xid) {
                    self.open_xids.insert(header.xid);
                }
            }
            RecordType::XactAbort => {
                self.open_xids.remove(&header.xid);
            }
            t if t.is_data() => {
                self.open_xids.insert(header.xid);
            }
            _ => {}
        }
    }
}
