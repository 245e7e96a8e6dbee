//! WAL Recovery
//!
//! Replays the log after a crash so that only committed transactions take
//! effect.
//!
//! ## Phases
//! 1. **Locate**: walk segments newest → oldest for the latest checkpoint
//!    taken with no transaction in flight. Recovery resumes there, or at the
//!    start of the oldest segment when there is none.
//! 2. **Classify**: scan to the end of the log and settle every xid as
//!    committed, aborted or incomplete.
//! 3. **Apply**: scan the same range again and hand each data record of a
//!    committed transaction to the handler registered for its type.
//!
//! Classification must finish before anything is applied: the commit marker
//! of a transaction comes after its data records.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{HandlerError, Result, WalError};

use super::reader::{ScanEnd, SegmentReader};
use super::record::{Location, Record, RecordHeader, RecordType};
use super::segment::list_segments;

/// Result type of a recovery handler
pub type HandlerResult = std::result::Result<(), HandlerError>;

// =============================================================================
// Handlers
// =============================================================================

/// Re-applies one kind of data record to external storage
pub trait RecordHandler {
    fn apply(&mut self, header: &RecordHeader, payload: &[u8]) -> HandlerResult;
}

impl<F> RecordHandler for F
where
    F: FnMut(&RecordHeader, &[u8]) -> HandlerResult,
{
    fn apply(&mut self, header: &RecordHeader, payload: &[u8]) -> HandlerResult {
        self(header, payload)
    }
}

/// Handlers keyed by data record type
#[derive(Default)]
pub struct RecoveryHandlers<'a> {
    handlers: HashMap<RecordType, Box<dyn RecordHandler + 'a>>,
}

impl<'a> RecoveryHandlers<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a data record type, replacing any previous one
    pub fn register(
        &mut self,
        record_type: RecordType,
        handler: impl RecordHandler + 'a,
    ) -> Result<&mut Self> {
        if !record_type.is_data() {
            return Err(WalError::InvalidArgument(format!(
                "{} records are never replayed",
                record_type
            )));
        }
        self.handlers.insert(record_type, Box::new(handler));
        Ok(self)
    }

    pub fn contains(&self, record_type: RecordType) -> bool {
        self.handlers.contains_key(&record_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn get_mut(&mut self, record_type: RecordType) -> Option<&mut (dyn RecordHandler + 'a)> {
        self.handlers.get_mut(&record_type).map(|h| h.as_mut())
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Counters produced by a recovery pass. They only ever grow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Segments visited while classifying
    pub segments_processed: u64,
    /// Valid records in the recovered range, control records included
    pub records_processed: u64,
    /// Data records handed to a handler
    pub records_applied: u64,
    /// Data records not applied (not committed, or no handler)
    pub records_skipped: u64,
    /// Committed data records skipped for lack of a handler
    pub unhandled_records: u64,
    /// Segments whose scan ended on a torn or damaged record
    pub corrupt_records: u64,
    pub committed_transactions: u64,
    pub aborted_transactions: u64,
    pub incomplete_transactions: u64,
    /// Encoded size of all valid records in the range
    pub bytes_processed: u64,
    /// Where scanning started
    pub resume_location: Location,
    /// Last valid record seen (`ZERO` if none)
    pub end_location: Location,
    pub elapsed: Duration,
}

// =============================================================================
// Transaction Table
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    InProgress,
    Committed,
    Aborted,
}

#[derive(Debug, Clone, Copy)]
struct Transaction {
    state: TxnState,
    first_location: Location,
    last_location: Location,
}

/// xid → outcome, built from control records during classification
#[derive(Debug, Default)]
struct TransactionTable {
    txns: HashMap<u32, Transaction>,
}

impl TransactionTable {
    fn observe(&mut self, location: Location, header: &RecordHeader) {
        if header.xid == 0 || header.record_type == RecordType::Checkpoint {
            return;
        }

        match self.txns.entry(header.xid) {
            Entry::Vacant(slot) => {
                // A first XACT_COMMIT marks the start of the transaction
                let state = match header.record_type {
                    RecordType::XactAbort => TxnState::Aborted,
                    _ => TxnState::InProgress,
                };
                slot.insert(Transaction {
                    state,
                    first_location: location,
                    last_location: location,
                });
            }
            Entry::Occupied(mut slot) => {
                let txn = slot.get_mut();
                txn.last_location = location;
                if txn.state == TxnState::InProgress {
                    match header.record_type {
                        RecordType::XactCommit => txn.state = TxnState::Committed,
                        RecordType::XactAbort => txn.state = TxnState::Aborted,
                        _ => {}
                    }
                }
            }
        }
    }

    fn is_committed(&self, xid: u32) -> bool {
        matches!(
            self.txns.get(&xid),
            Some(Transaction {
                state: TxnState::Committed,
                ..
            })
        )
    }

    fn tally(&self, stats: &mut RecoveryStats) {
        for (xid, txn) in &self.txns {
            match txn.state {
                TxnState::Committed => stats.committed_transactions += 1,
                TxnState::Aborted => stats.aborted_transactions += 1,
                TxnState::InProgress => {
                    tracing::debug!(
                        xid,
                        first = %txn.first_location,
                        last = %txn.last_location,
                        "incomplete transaction"
                    );
                    stats.incomplete_transactions += 1;
                }
            }
        }
    }
}

// =============================================================================
// Recovery Engine
// =============================================================================

/// Recovers a WAL directory. Reads only; writing the closing checkpoint is
/// left to the caller that owns the append path.
pub struct WalRecovery {
    dir: PathBuf,
    /// Only recover records at or before this location
    until: Option<Location>,
}

impl WalRecovery {
    /// Segments are read with their own file length as the record bound,
    /// so no capacity is needed
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            until: None,
        }
    }

    /// Stop at `end` (inclusive) instead of the end of the log
    pub fn until(mut self, end: Location) -> Self {
        self.until = Some(end);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Run all three phases, applying committed records through `handlers`
    pub fn recover(&self, handlers: &mut RecoveryHandlers<'_>) -> Result<RecoveryStats> {
        let started = Instant::now();
        let mut stats = RecoveryStats::default();

        let Some(resume) = self.resumption_point()? else {
            tracing::info!(dir = %self.dir.display(), "no WAL segments, nothing to recover");
            stats.elapsed = started.elapsed();
            return Ok(stats);
        };
        stats.resume_location = resume;
        tracing::info!(dir = %self.dir.display(), %resume, "WAL recovery started");

        let table = self.classify(resume, &mut stats)?;
        self.apply(resume, &table, handlers, &mut stats, started)?;

        stats.elapsed = started.elapsed();
        tracing::info!(
            applied = stats.records_applied,
            skipped = stats.records_skipped,
            committed = stats.committed_transactions,
            aborted = stats.aborted_transactions,
            incomplete = stats.incomplete_transactions,
            corrupt = stats.corrupt_records,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "WAL recovery finished"
        );
        Ok(stats)
    }

    /// Locate and classify without applying anything
    pub fn verify(&self) -> Result<RecoveryStats> {
        let started = Instant::now();
        let mut stats = RecoveryStats::default();
        if let Some(resume) = self.resumption_point()? {
            stats.resume_location = resume;
            self.classify(resume, &mut stats)?;
        }
        stats.elapsed = started.elapsed();
        Ok(stats)
    }

    // =========================================================================
    // Phase A: Locate
    // =========================================================================

    /// Latest quiescent checkpoint, else the start of the oldest segment.
    /// `None` when the directory holds no segments.
    pub fn resumption_point(&self) -> Result<Option<Location>> {
        let segments = list_segments(&self.dir)?;
        let Some(&oldest) = segments.first() else {
            return Ok(None);
        };

        for &number in segments.iter().rev() {
            if self.until.is_some_and(|end| number > end.segment) {
                continue;
            }
            if let Some(checkpoint) = self.last_checkpoint_in(number)? {
                tracing::debug!(%checkpoint, "resuming from checkpoint");
                return Ok(Some(checkpoint));
            }
        }

        Ok(Some(Location::new(oldest, 0)))
    }

    fn last_checkpoint_in(&self, number: u32) -> Result<Option<Location>> {
        let mut reader = SegmentReader::open(&self.dir, number)?;
        let mut found = None;
        while let Some((location, record)) = reader.next_record()? {
            if self.past_end(location) {
                break;
            }
            // Checkpoints taken with transactions open carry their xids
            if record.record_type() == RecordType::Checkpoint && record.payload.is_empty() {
                found = Some(location);
            }
        }
        Ok(found)
    }

    // =========================================================================
    // Phase B: Classify
    // =========================================================================

    fn classify(&self, resume: Location, stats: &mut RecoveryStats) -> Result<TransactionTable> {
        let mut table = TransactionTable::default();
        let mut counted = HashSet::new();

        self.scan(resume, |location, record, end| {
            if counted.insert(location.segment) {
                stats.segments_processed += 1;
            }
            match record {
                Some(record) => {
                    stats.records_processed += 1;
                    stats.bytes_processed += record.encoded_len() as u64;
                    stats.end_location = location;
                    table.observe(location, &record.header);
                }
                None => {
                    if let Some(ScanEnd::Torn { location, cause }) = end {
                        tracing::warn!(%location, %cause, "torn record, ignoring rest of segment");
                        stats.corrupt_records += 1;
                    }
                }
            }
            Ok(())
        })?;

        table.tally(stats);
        Ok(table)
    }

    // =========================================================================
    // Phase C: Apply
    // =========================================================================

    fn apply(
        &self,
        resume: Location,
        table: &TransactionTable,
        handlers: &mut RecoveryHandlers<'_>,
        stats: &mut RecoveryStats,
        started: Instant,
    ) -> Result<()> {
        let mut warned = HashSet::new();

        self.scan(resume, |location, record, _| {
            let Some(record) = record else {
                return Ok(());
            };
            let header = &record.header;
            if !header.record_type.is_data() {
                return Ok(());
            }
            if !table.is_committed(header.xid) {
                stats.records_skipped += 1;
                return Ok(());
            }

            match handlers.get_mut(header.record_type) {
                Some(handler) => {
                    if let Err(source) = handler.apply(header, &record.payload) {
                        let mut partial = stats.clone();
                        partial.elapsed = started.elapsed();
                        return Err(WalError::HandlerFailure {
                            record_type: header.record_type,
                            location,
                            source,
                            stats: Box::new(partial),
                        });
                    }
                    stats.records_applied += 1;
                }
                None => {
                    if warned.insert(header.record_type) {
                        tracing::warn!(
                            record_type = %header.record_type,
                            "no recovery handler registered, skipping records of this type"
                        );
                    }
                    stats.records_skipped += 1;
                    stats.unhandled_records += 1;
                }
            }
            Ok(())
        })
    }

    // =========================================================================
    // Scanning
    // =========================================================================

    /// Visit every valid record from `from` to the end of the log (or
    /// `until`). After each segment the visitor is called once more with
    /// `None` and the reason the segment scan stopped.
    ///
    /// A missing segment number ends the log.
    fn scan<F>(&self, from: Location, mut visit: F) -> Result<()>
    where
        F: FnMut(Location, Option<&Record>, Option<&ScanEnd>) -> Result<()>,
    {
        let mut number = from.segment;
        let mut offset = from.offset;

        loop {
            if self.until.is_some_and(|end| number > end.segment) {
                return Ok(());
            }

            let mut reader = match SegmentReader::open(&self.dir, number) {
                Ok(reader) => reader,
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e),
            };
            if offset > 0 {
                reader.seek(offset)?;
            }

            while let Some((location, record)) = reader.next_record()? {
                if self.past_end(location) {
                    return Ok(());
                }
                visit(location, Some(&record), None)?;
            }
            let segment_start = Location::new(number, reader.offset());
            visit(segment_start, None, reader.stop_reason())?;
            tracing::debug!(
                segment = number,
                valid_bytes = reader.offset(),
                torn = reader.stop_reason().is_some_and(ScanEnd::is_torn),
                "segment scanned"
            );

            number = match number.checked_add(1) {
                Some(next) => next,
                None => return Ok(()),
            };
            offset = 0;
        }
    }

    fn past_end(&self, location: Location) -> bool {
        self.until.is_some_and(|end| location > end)
    }
}
