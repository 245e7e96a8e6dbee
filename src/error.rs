//! Error types for segwal
//!
//! Provides a unified error type for all WAL operations.

use thiserror::Error;

use crate::wal::{Corruption, Location, RecordType, RecoveryStats};

/// Result type alias using WalError
pub type Result<T> = std::result::Result<T, WalError>;

/// Error returned by a recovery handler
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Unified error type for WAL operations
#[derive(Debug, Error)]
pub enum WalError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Record Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt record at {location}: {cause}")]
    CorruptRecord {
        location: Location,
        cause: Corruption,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    #[error("A record is already being built on this WAL")]
    ConcurrentUse,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // -------------------------------------------------------------------------
    // Recovery Errors
    // -------------------------------------------------------------------------
    /// A registered handler rejected a committed record. Recovery stops and
    /// the statistics gathered so far are attached.
    #[error("Recovery handler for {record_type} failed at {location}: {source}")]
    HandlerFailure {
        record_type: RecordType,
        location: Location,
        #[source]
        source: HandlerError,
        stats: Box<RecoveryStats>,
    },
}

impl WalError {
    /// True when the underlying I/O error is `NotFound`
    pub fn is_not_found(&self) -> bool {
        matches!(self, WalError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }

    /// Partial statistics carried by a failed recovery
    pub fn partial_stats(&self) -> Option<&RecoveryStats> {
        match self {
            WalError::HandlerFailure { stats, .. } => Some(stats),
            _ => None,
        }
    }
}

impl From<bincode::Error> for WalError {
    fn from(e: bincode::Error) -> Self {
        WalError::Serialization(e.to_string())
    }
}
