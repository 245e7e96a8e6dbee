//! WAL Reader
//!
//! Sequential scanning of one segment and random reads by location.
//! Every record is bounds- and checksum-verified on the way out.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{Result, WalError};

use super::record::{self, Corruption, Location, Record, RecordHeader, HEADER_SIZE};
use super::segment::Segment;

/// Why a segment scan stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEnd {
    /// Reached unwritten space or the end of the file on a record boundary
    Clean,
    /// Hit a record that failed validation: a torn or damaged write
    Torn { location: Location, cause: Corruption },
}

impl ScanEnd {
    pub fn is_torn(&self) -> bool {
        matches!(self, ScanEnd::Torn { .. })
    }
}

/// Reads records from a single segment in order
pub struct SegmentReader {
    number: u32,
    /// Length of the segment file, the bound on any record in it
    limit: u32,
    reader: BufReader<File>,
    offset: u32,
    end: Option<ScanEnd>,
    /// Reused scratch buffer for record bytes
    scratch: Vec<u8>,
}

impl SegmentReader {
    /// Open a segment for scanning from offset 0.
    ///
    /// Records are bounded by this segment's own file length, whatever
    /// capacity the log is currently opened with.
    pub fn open(dir: &Path, number: u32) -> Result<Self> {
        let segment = Segment::open_read_only(dir, number)?;
        let limit = segment.capacity();
        let file = segment.into_file()?;
        Ok(Self {
            number,
            limit,
            reader: BufReader::new(file),
            offset: 0,
            end: None,
            scratch: Vec::with_capacity(HEADER_SIZE),
        })
    }

    /// Position the scan at `offset` (must be a record boundary)
    pub fn seek(&mut self, offset: u32) -> Result<()> {
        self.reader.seek(SeekFrom::Start(offset as u64))?;
        self.offset = offset;
        self.end = None;
        Ok(())
    }

    /// Read the next valid record.
    ///
    /// Returns `Ok(None)` once the scan has stopped; `stop_reason()` then
    /// tells a clean end from a torn tail. Only I/O failures are errors.
    pub fn next_record(&mut self) -> Result<Option<(Location, Record)>> {
        if self.end.is_some() {
            return Ok(None);
        }

        let location = Location::new(self.number, self.offset);

        // Header; a short non-zero tail at the end of the file is torn
        self.scratch.clear();
        self.scratch.resize(HEADER_SIZE, 0);
        let got = read_full(&mut self.reader, &mut self.scratch)?;
        if got == 0 {
            self.end = Some(ScanEnd::Clean);
            return Ok(None);
        }
        self.scratch.truncate(got);

        let header = match RecordHeader::decode(&self.scratch, self.limit) {
            Ok(header) => header,
            Err(cause) => return Ok(self.stop(location, cause)),
        };

        // Payload + checksum
        let total = header.total_len as usize;
        self.scratch.resize(total, 0);
        let got = read_full(&mut self.reader, &mut self.scratch[HEADER_SIZE..])?;
        if got < total - HEADER_SIZE {
            let cause = Corruption::Truncated {
                needed: total,
                available: HEADER_SIZE + got,
            };
            return Ok(self.stop(location, cause));
        }

        match record::decode(&self.scratch, self.limit) {
            Ok(record) => {
                self.offset += header.total_len;
                Ok(Some((location, record)))
            }
            Err(cause) => Ok(self.stop(location, cause)),
        }
    }

    /// Iterate over all remaining valid records
    pub fn records(self) -> SegmentRecords {
        SegmentRecords { reader: self }
    }

    pub fn stop_reason(&self) -> Option<&ScanEnd> {
        self.end.as_ref()
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    /// Offset of the next record to read; after a stop, the end of valid data
    pub fn offset(&self) -> u32 {
        self.offset
    }

    fn stop(&mut self, location: Location, cause: Corruption) -> Option<(Location, Record)> {
        self.end = Some(if cause.is_unwritten() {
            ScanEnd::Clean
        } else {
            ScanEnd::Torn { location, cause }
        });
        None
    }
}

/// Iterator over a segment's valid records
pub struct SegmentRecords {
    reader: SegmentReader,
}

impl SegmentRecords {
    pub fn stop_reason(&self) -> Option<&ScanEnd> {
        self.reader.stop_reason()
    }
}

impl Iterator for SegmentRecords {
    type Item = Result<(Location, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.next_record().transpose()
    }
}

/// Read and verify the record at `location`
pub fn read_record(dir: &Path, location: Location) -> Result<Record> {
    if location.segment == 0 {
        return Err(WalError::InvalidArgument(format!(
            "{} does not name a segment",
            location
        )));
    }

    let segment = Segment::open_read_only(dir, location.segment)?;
    let limit = segment.capacity();
    if location.offset >= limit {
        return Err(WalError::InvalidArgument(format!(
            "offset {} is past the end of a {} byte segment",
            location.offset, limit
        )));
    }

    let mut file = segment.into_file()?;
    file.seek(SeekFrom::Start(location.offset as u64))?;

    let corrupt = |cause| WalError::CorruptRecord { location, cause };

    let mut buf = vec![0u8; HEADER_SIZE];
    let got = read_full(&mut file, &mut buf)?;
    buf.truncate(got);
    let header = RecordHeader::decode(&buf, limit).map_err(corrupt)?;

    let total = header.total_len as usize;
    buf.resize(total, 0);
    let got = read_full(&mut file, &mut buf[HEADER_SIZE..])?;
    buf.truncate(HEADER_SIZE + got);

    record::decode(&buf, limit).map_err(corrupt)
}

/// Fill as much of `buf` as the file allows; short only at end of file
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
