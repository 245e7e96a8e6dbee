//! WAL record definitions and codec
//!
//! Frames opaque payloads with a fixed little-endian header and a trailing
//! CRC32. The codec never looks inside the payload.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Result, WalError};

/// Header size: total_len (4) + type (4) + xid (4) + prev_location (8) + data_len (2)
pub const HEADER_SIZE: usize = 22;

/// Trailing checksum size
pub const CHECKSUM_SIZE: usize = 4;

/// Bytes every record costs on top of its payload
pub const RECORD_OVERHEAD: usize = HEADER_SIZE + CHECKSUM_SIZE;

/// Largest payload a single record can carry (data_len is a u16)
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

// =============================================================================
// Location
// =============================================================================

/// Position of a record: segment number plus byte offset inside it.
///
/// Ordering is lexicographic on (segment, offset), which is both append
/// order and scan order. Segment numbers start at 1, so `Location::ZERO`
/// never names a real record.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Location {
    pub segment: u32,
    pub offset: u32,
}

impl Location {
    pub const ZERO: Location = Location {
        segment: 0,
        offset: 0,
    };

    pub fn new(segment: u32, offset: u32) -> Self {
        Self { segment, offset }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.segment, self.offset)
    }
}

// =============================================================================
// Record Types
// =============================================================================

/// Kinds of records that can appear in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum RecordType {
    /// Invalid placeholder, never written
    Null = 0,
    Checkpoint = 1,
    XactCommit = 2,
    XactAbort = 3,
    Insert = 4,
    Update = 5,
    Delete = 6,
    NewPage = 7,
    Schema = 8,
}

impl RecordType {
    /// Record types that carry mutations and need a recovery handler
    pub const DATA_TYPES: [RecordType; 5] = [
        RecordType::Insert,
        RecordType::Update,
        RecordType::Delete,
        RecordType::NewPage,
        RecordType::Schema,
    ];

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Null),
            1 => Some(Self::Checkpoint),
            2 => Some(Self::XactCommit),
            3 => Some(Self::XactAbort),
            4 => Some(Self::Insert),
            5 => Some(Self::Update),
            6 => Some(Self::Delete),
            7 => Some(Self::NewPage),
            8 => Some(Self::Schema),
            _ => None,
        }
    }

    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Checkpoint and transaction markers; never replayed
    pub fn is_control(self) -> bool {
        matches!(
            self,
            Self::Checkpoint | Self::XactCommit | Self::XactAbort
        )
    }

    /// Mutation records routed to recovery handlers
    pub fn is_data(self) -> bool {
        Self::DATA_TYPES.contains(&self)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Checkpoint => "CHECKPOINT",
            Self::XactCommit => "XACT_COMMIT",
            Self::XactAbort => "XACT_ABORT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::NewPage => "NEWPAGE",
            Self::Schema => "SCHEMA",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Corruption
// =============================================================================

/// Why a byte range failed to decode as a record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Corruption {
    /// All-zero header: unwritten (preallocated) space
    #[error("unwritten space (zero header)")]
    ZeroHeader,

    #[error("record truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("invalid record length {total_len} (data_len {data_len}, limit {limit})")]
    BadLength {
        total_len: u32,
        data_len: u16,
        limit: u32,
    },

    #[error("unknown record type {0}")]
    UnknownType(u32),

    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
}

impl Corruption {
    /// End of written data rather than damage
    pub fn is_unwritten(&self) -> bool {
        matches!(self, Corruption::ZeroHeader)
    }
}

// =============================================================================
// Header
// =============================================================================

/// Fixed-size header preceding every payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Header + payload + checksum
    pub total_len: u32,
    pub record_type: RecordType,
    /// Transaction id, 0 when the record belongs to none
    pub xid: u32,
    /// Location of the record written just before this one (write order,
    /// not per transaction); `Location::ZERO` for the first record
    pub prev_location: Location,
    pub data_len: u16,
}

impl RecordHeader {
    pub fn new(record_type: RecordType, xid: u32, prev_location: Location, data_len: u16) -> Self {
        Self {
            total_len: (RECORD_OVERHEAD + data_len as usize) as u32,
            record_type,
            xid,
            prev_location,
            data_len,
        }
    }

    /// Append the 22 header bytes to `buf`
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.total_len);
        buf.put_u32_le(self.record_type.as_u32());
        buf.put_u32_le(self.xid);
        buf.put_u32_le(self.prev_location.segment);
        buf.put_u32_le(self.prev_location.offset);
        buf.put_u16_le(self.data_len);
    }

    /// Parse and bounds-check a header.
    ///
    /// `limit` is the segment capacity: no valid record is longer.
    pub fn decode(bytes: &[u8], limit: u32) -> std::result::Result<Self, Corruption> {
        if bytes.len() < HEADER_SIZE {
            if bytes.iter().all(|b| *b == 0) {
                return Err(Corruption::ZeroHeader);
            }
            return Err(Corruption::Truncated {
                needed: HEADER_SIZE,
                available: bytes.len(),
            });
        }

        let raw = &bytes[..HEADER_SIZE];
        if raw.iter().all(|b| *b == 0) {
            return Err(Corruption::ZeroHeader);
        }

        let mut cursor = raw;
        let total_len = cursor.get_u32_le();
        let type_code = cursor.get_u32_le();
        let xid = cursor.get_u32_le();
        let prev_segment = cursor.get_u32_le();
        let prev_offset = cursor.get_u32_le();
        let data_len = cursor.get_u16_le();

        let expected = RECORD_OVERHEAD as u64 + data_len as u64;
        if (total_len as usize) < RECORD_OVERHEAD
            || total_len > limit
            || total_len as u64 != expected
        {
            return Err(Corruption::BadLength {
                total_len,
                data_len,
                limit,
            });
        }

        let record_type = match RecordType::from_u32(type_code) {
            Some(RecordType::Null) | None => return Err(Corruption::UnknownType(type_code)),
            Some(t) => t,
        };

        Ok(Self {
            total_len,
            record_type,
            xid,
            prev_location: Location::new(prev_segment, prev_offset),
            data_len,
        })
    }
}

// =============================================================================
// Record
// =============================================================================

/// A decoded record: header plus its opaque payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub header: RecordHeader,
    pub payload: Bytes,
}

impl Record {
    pub fn record_type(&self) -> RecordType {
        self.header.record_type
    }

    pub fn xid(&self) -> u32 {
        self.header.xid
    }

    /// Bytes this record occupies on disk
    pub fn encoded_len(&self) -> usize {
        self.header.total_len as usize
    }
}

/// CRC32 over header and payload (everything except the checksum field)
pub fn checksum(framed: &[u8]) -> u32 {
    crc32fast::hash(framed)
}

/// Append the checksum of `buf` to `buf`, completing the frame
pub fn seal(buf: &mut BytesMut) {
    let crc = checksum(buf);
    buf.put_u32_le(crc);
}

/// Encode a full record: header, payload, checksum
pub fn encode(
    record_type: RecordType,
    xid: u32,
    prev_location: Location,
    payload: &[u8],
) -> Result<Bytes> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(WalError::InvalidArgument(format!(
            "payload of {} bytes exceeds the {} byte record limit",
            payload.len(),
            MAX_PAYLOAD_SIZE
        )));
    }

    let header = RecordHeader::new(record_type, xid, prev_location, payload.len() as u16);
    let mut buf = BytesMut::with_capacity(header.total_len as usize);
    header.encode_into(&mut buf);
    buf.put_slice(payload);
    seal(&mut buf);
    Ok(buf.freeze())
}

/// Decode one record from the front of `bytes`, verifying bounds and checksum
pub fn decode(bytes: &[u8], limit: u32) -> std::result::Result<Record, Corruption> {
    let header = RecordHeader::decode(bytes, limit)?;
    let total = header.total_len as usize;
    if bytes.len() < total {
        return Err(Corruption::Truncated {
            needed: total,
            available: bytes.len(),
        });
    }

    let body_end = total - CHECKSUM_SIZE;
    let stored = (&bytes[body_end..total]).get_u32_le();
    let computed = checksum(&bytes[..body_end]);
    if stored != computed {
        return Err(Corruption::ChecksumMismatch { stored, computed });
    }

    Ok(Record {
        header,
        payload: Bytes::copy_from_slice(&bytes[HEADER_SIZE..body_end]),
    })
}

// =============================================================================
// Checkpoint Payload
// =============================================================================

/// Contents of a CHECKPOINT record.
///
/// Empty (zero-length payload) when no transaction was open at checkpoint
/// time. Only such checkpoints are used as recovery resumption points.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    /// Transactions without a commit/abort marker when the checkpoint was taken
    pub in_flight: Vec<u32>,
}

impl CheckpointInfo {
    pub fn is_quiescent(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Serialize to at most `max_len` bytes; the xid list is cut to fit
    pub fn encode(&self, max_len: usize) -> Result<Vec<u8>> {
        if self.is_quiescent() {
            return Ok(Vec::new());
        }
        // bincode: u64 length prefix + 4 bytes per xid
        let fit = max_len.saturating_sub(8) / 4;
        let mut info = self.clone();
        info.in_flight.truncate(fit.max(1));
        Ok(bincode::serialize(&info)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.is_empty() {
            return Ok(Self::default());
        }
        Ok(bincode::deserialize(payload)?)
    }
}
