//! # segwal
//!
//! A segmented write-ahead log with:
//! - Fixed-capacity, preallocated segment files
//! - CRC32-checked records framing opaque payloads
//! - Explicit flush and checkpoint durability barriers
//! - Crash recovery that replays only committed transactions
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Storage / Query Layer (caller)                 │
//! │        opaque payloads in, recovery handlers out            │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        Wal                                  │
//! │          (one record in flight per context)                 │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │   Writer    │          │  Recovery   │
//!   │  (Append)   │          │ (3 phases)  │
//!   └──────┬──────┘          └──────┬──────┘
//!          │                        │
//!          ▼                        ▼
//!   ┌─────────────────────────────────────┐
//!   │   Record Codec  +  Segment Store    │
//!   └─────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod wal;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{HandlerError, Result, WalError};
pub use config::{SyncStrategy, WalConfig};
pub use engine::{RecordBuilder, SegmentInfo, Wal};
pub use wal::{Location, Record, RecordHeader, RecordType, RecoveryHandlers, RecoveryStats};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of segwal
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
