//! Write-Ahead Log (WAL) Module
//!
//! Durability and crash recovery for mutation records.
//!
//! ## Responsibilities
//! - Fixed-capacity segment files, rolled over when full
//! - CRC32-framed records with a write-order backlink
//! - Durable flush and checkpoint barriers
//! - Transaction-aware replay of committed records
//!
//! ## Segment Layout
//! ```text
//! {dir}/0000000001.wal   (capacity bytes, preallocated)
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Record @ offset 0                                            │
//! │ ┌───────────┬──────────┬─────────┬──────────────┬──────────┐ │
//! │ │TotalLen(4)│ Type (4) │ Xid (4) │ Prev (4 + 4) │DataLen(2)│ │
//! │ └───────────┴──────────┴─────────┴──────────────┴──────────┘ │
//! │ ┌──────────────────────────────┬───────────┐                 │
//! │ │ Payload (DataLen bytes)      │ CRC32 (4) │                 │
//! │ └──────────────────────────────┴───────────┘                 │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Record @ offset TotalLen ...                                 │
//! ├──────────────────────────────────────────────────────────────┤
//! │ zeros (unwritten)                                            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//! All integers are little-endian. The CRC covers header and payload.

mod reader;
mod record;
mod recovery;
mod segment;
mod writer;

pub use reader::{read_record, ScanEnd, SegmentReader, SegmentRecords};
pub use record::{
    checksum, decode, encode, seal, CheckpointInfo, Corruption, Location, Record, RecordHeader,
    RecordType, CHECKSUM_SIZE, HEADER_SIZE, MAX_PAYLOAD_SIZE, RECORD_OVERHEAD,
};
pub use recovery::{
    HandlerResult, RecordHandler, RecoveryHandlers, RecoveryStats, WalRecovery,
};
pub use segment::{
    list_segments, parse_segment_number, segment_file_name, segment_path, Segment, SegmentState,
    SEGMENT_EXTENSION,
};
pub use writer::{PendingRecord, WalWriter};
