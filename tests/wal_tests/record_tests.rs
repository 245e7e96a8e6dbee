//! Tests for the WAL record codec
//!
//! These tests verify:
//! - Little-endian header layout and checksum placement
//! - Rejection of zeroed, truncated, mis-sized and damaged records
//! - Record type classes
//! - Checkpoint payload encoding

use segwal::wal::{
    self, checksum, CheckpointInfo, Corruption, Location, RecordHeader, RecordType,
    CHECKSUM_SIZE, HEADER_SIZE, RECORD_OVERHEAD,
};

const LIMIT: u32 = 4096;

// =============================================================================
// Layout Tests
// =============================================================================

#[test]
fn test_header_layout_is_little_endian() {
    let bytes = wal::encode(RecordType::Insert, 7, Location::new(1, 26), b"abc").unwrap();

    assert_eq!(bytes.len(), RECORD_OVERHEAD + 3);
    assert_eq!(&bytes[0..4], &29u32.to_le_bytes());
    assert_eq!(&bytes[4..8], &4u32.to_le_bytes());
    assert_eq!(&bytes[8..12], &7u32.to_le_bytes());
    assert_eq!(&bytes[12..16], &1u32.to_le_bytes());
    assert_eq!(&bytes[16..20], &26u32.to_le_bytes());
    assert_eq!(&bytes[20..22], &3u16.to_le_bytes());
    assert_eq!(&bytes[HEADER_SIZE..HEADER_SIZE + 3], b"abc");
}

#[test]
fn test_checksum_covers_header_and_payload() {
    let bytes = wal::encode(RecordType::Update, 42, Location::ZERO, b"payload").unwrap();
    let body_end = bytes.len() - CHECKSUM_SIZE;

    let stored = u32::from_le_bytes(bytes[body_end..].try_into().unwrap());
    assert_eq!(stored, checksum(&bytes[..body_end]));
    assert_eq!(stored, crc32fast::hash(&bytes[..body_end]));
}

#[test]
fn test_decode_returns_header_and_payload() {
    let prev = Location::new(3, 1000);
    let bytes = wal::encode(RecordType::Delete, 9, prev, b"row-17").unwrap();

    let record = wal::decode(&bytes, LIMIT).unwrap();
    assert_eq!(record.record_type(), RecordType::Delete);
    assert_eq!(record.xid(), 9);
    assert_eq!(record.header.prev_location, prev);
    assert_eq!(record.header.data_len, 6);
    assert_eq!(record.encoded_len(), bytes.len());
    assert_eq!(&record.payload[..], b"row-17");
}

#[test]
fn test_empty_payload() {
    let bytes = wal::encode(RecordType::XactCommit, 5, Location::ZERO, &[]).unwrap();
    assert_eq!(bytes.len(), RECORD_OVERHEAD);

    let record = wal::decode(&bytes, LIMIT).unwrap();
    assert!(record.payload.is_empty());
}

#[test]
fn test_decode_ignores_trailing_bytes() {
    let mut bytes = wal::encode(RecordType::Insert, 1, Location::ZERO, b"x").unwrap().to_vec();
    bytes.extend_from_slice(&[0xEE; 16]);

    let record = wal::decode(&bytes, LIMIT).unwrap();
    assert_eq!(&record.payload[..], b"x");
}

#[test]
fn test_encode_rejects_oversized_payload() {
    let payload = vec![0u8; u16::MAX as usize + 1];
    let result = wal::encode(RecordType::Insert, 1, Location::ZERO, &payload);
    assert!(matches!(result, Err(segwal::WalError::InvalidArgument(_))));
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_zero_header_is_unwritten() {
    let zeros = [0u8; 64];
    let err = wal::decode(&zeros, LIMIT).unwrap_err();
    assert_eq!(err, Corruption::ZeroHeader);
    assert!(err.is_unwritten());

    // A short all-zero tail is unwritten space too
    assert_eq!(wal::decode(&zeros[..5], LIMIT).unwrap_err(), Corruption::ZeroHeader);
}

#[test]
fn test_truncated_header() {
    let bytes = wal::encode(RecordType::Insert, 1, Location::ZERO, b"abc").unwrap();
    let err = wal::decode(&bytes[..10], LIMIT).unwrap_err();
    assert_eq!(
        err,
        Corruption::Truncated {
            needed: HEADER_SIZE,
            available: 10
        }
    );
    assert!(!err.is_unwritten());
}

#[test]
fn test_truncated_payload() {
    let bytes = wal::encode(RecordType::Insert, 1, Location::ZERO, b"abcdef").unwrap();
    let cut = bytes.len() - 2;
    let err = wal::decode(&bytes[..cut], LIMIT).unwrap_err();
    assert_eq!(
        err,
        Corruption::Truncated {
            needed: bytes.len(),
            available: cut
        }
    );
}

#[test]
fn test_total_len_must_match_data_len() {
    let mut bytes = wal::encode(RecordType::Insert, 1, Location::ZERO, b"abc").unwrap().to_vec();
    bytes[0..4].copy_from_slice(&40u32.to_le_bytes());

    let err = wal::decode(&bytes, LIMIT).unwrap_err();
    assert!(matches!(err, Corruption::BadLength { total_len: 40, data_len: 3, .. }));
}

#[test]
fn test_total_len_below_overhead() {
    let mut bytes = wal::encode(RecordType::Insert, 1, Location::ZERO, &[]).unwrap().to_vec();
    bytes[0..4].copy_from_slice(&10u32.to_le_bytes());

    assert!(matches!(
        wal::decode(&bytes, LIMIT).unwrap_err(),
        Corruption::BadLength { total_len: 10, .. }
    ));
}

#[test]
fn test_total_len_above_limit() {
    let bytes = wal::encode(RecordType::Insert, 1, Location::ZERO, &[1u8; 100]).unwrap();
    assert!(matches!(
        wal::decode(&bytes, 64).unwrap_err(),
        Corruption::BadLength { limit: 64, .. }
    ));
}

#[test]
fn test_unknown_and_null_types_rejected() {
    let mut bytes = wal::encode(RecordType::Insert, 1, Location::ZERO, b"a").unwrap().to_vec();

    bytes[4..8].copy_from_slice(&99u32.to_le_bytes());
    assert_eq!(wal::decode(&bytes, LIMIT).unwrap_err(), Corruption::UnknownType(99));

    bytes[4..8].copy_from_slice(&0u32.to_le_bytes());
    assert_eq!(wal::decode(&bytes, LIMIT).unwrap_err(), Corruption::UnknownType(0));
}

#[test]
fn test_flipped_payload_byte_fails_checksum() {
    let mut bytes = wal::encode(RecordType::Insert, 1, Location::ZERO, b"hello").unwrap().to_vec();
    bytes[HEADER_SIZE + 1] ^= 0xFF;

    assert!(matches!(
        wal::decode(&bytes, LIMIT).unwrap_err(),
        Corruption::ChecksumMismatch { .. }
    ));
}

#[test]
fn test_flipped_xid_byte_fails_checksum() {
    let mut bytes = wal::encode(RecordType::Insert, 1, Location::ZERO, b"hello").unwrap().to_vec();
    bytes[8] ^= 0x01;

    assert!(matches!(
        wal::decode(&bytes, LIMIT).unwrap_err(),
        Corruption::ChecksumMismatch { .. }
    ));
}

#[test]
fn test_header_decode_without_payload() {
    let bytes = wal::encode(RecordType::Schema, 3, Location::new(2, 52), b"ddl").unwrap();
    let header = RecordHeader::decode(&bytes[..HEADER_SIZE], LIMIT).unwrap();
    assert_eq!(header, RecordHeader::new(RecordType::Schema, 3, Location::new(2, 52), 3));
}

// =============================================================================
// Type & Location Tests
// =============================================================================

#[test]
fn test_record_type_classes() {
    for t in RecordType::DATA_TYPES {
        assert!(t.is_data());
        assert!(!t.is_control());
    }
    for t in [RecordType::Checkpoint, RecordType::XactCommit, RecordType::XactAbort] {
        assert!(t.is_control());
        assert!(!t.is_data());
    }
    assert!(!RecordType::Null.is_data());
    assert!(!RecordType::Null.is_control());
}

#[test]
fn test_record_type_codes() {
    for code in 0..=8u32 {
        assert_eq!(RecordType::from_u32(code).unwrap().as_u32(), code);
    }
    assert_eq!(RecordType::from_u32(9), None);
    assert_eq!(RecordType::NewPage.to_string(), "NEWPAGE");
}

#[test]
fn test_location_order_and_display() {
    assert!(Location::new(1, 500) < Location::new(2, 0));
    assert!(Location::new(2, 0) < Location::new(2, 26));
    assert!(Location::ZERO < Location::new(1, 0));
    assert!(Location::ZERO.is_zero());
    assert_eq!(Location::new(3, 78).to_string(), "3/78");
}

// =============================================================================
// Checkpoint Payload Tests
// =============================================================================

#[test]
fn test_quiescent_checkpoint_is_empty() {
    let info = CheckpointInfo::default();
    assert!(info.is_quiescent());
    assert!(info.encode(100).unwrap().is_empty());
    assert_eq!(CheckpointInfo::decode(&[]).unwrap(), info);
}

#[test]
fn test_in_flight_checkpoint_roundtrip() {
    let info = CheckpointInfo {
        in_flight: vec![1001, 1003],
    };
    let bytes = info.encode(100).unwrap();
    assert!(!bytes.is_empty());
    assert_eq!(CheckpointInfo::decode(&bytes).unwrap(), info);
}

#[test]
fn test_in_flight_list_truncated_to_fit() {
    let info = CheckpointInfo {
        in_flight: (1..=100).collect(),
    };
    let bytes = info.encode(38).unwrap();
    assert!(bytes.len() <= 38);

    let decoded = CheckpointInfo::decode(&bytes).unwrap();
    assert!(!decoded.is_quiescent());
    assert_eq!(decoded.in_flight[..], info.in_flight[..decoded.in_flight.len()]);
}
