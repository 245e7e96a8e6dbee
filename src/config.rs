//! Configuration for segwal
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, WalError};

/// Default segment capacity (16 MB)
pub const DEFAULT_SEGMENT_CAPACITY: u32 = 16 * 1024 * 1024;

/// Smallest accepted segment capacity
pub const MIN_SEGMENT_CAPACITY: u32 = 64;

/// Main configuration for a WAL instance
#[derive(Debug, Clone)]
pub struct WalConfig {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory holding the segment files
    /// Internal structure:
    ///   {dir}/
    ///     ├── 0000000001.wal
    ///     ├── 0000000002.wal
    ///     └── ...
    pub dir: PathBuf,

    /// Fixed size of every segment file (in bytes)
    pub segment_capacity: u32,

    /// Reserve the full segment on disk at creation time
    pub preallocate: bool,

    // -------------------------------------------------------------------------
    // Durability Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to sync the active segment
    pub sync_strategy: SyncStrategy,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStrategy {
    /// Only sync on explicit `flush()` / `checkpoint()`
    #[default]
    Manual,

    /// data sync after every record (safest, slowest)
    EveryWrite,

    /// data sync after N unsynced records (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./segwal_data"),
            segment_capacity: DEFAULT_SEGMENT_CAPACITY,
            preallocate: true,
            sync_strategy: SyncStrategy::Manual,
        }
    }
}

impl WalConfig {
    /// Create a new config builder
    pub fn builder() -> WalConfigBuilder {
        WalConfigBuilder::default()
    }

    /// Reject configurations the WAL cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.dir.as_os_str().is_empty() {
            return Err(WalError::InvalidArgument(
                "WAL directory path is empty".to_string(),
            ));
        }
        if self.segment_capacity < MIN_SEGMENT_CAPACITY {
            return Err(WalError::InvalidArgument(format!(
                "segment capacity {} is below the minimum of {} bytes",
                self.segment_capacity, MIN_SEGMENT_CAPACITY
            )));
        }
        if let SyncStrategy::EveryNEntries { count: 0 } = self.sync_strategy {
            return Err(WalError::InvalidArgument(
                "EveryNEntries sync strategy needs a count above zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for WalConfig
#[derive(Default)]
pub struct WalConfigBuilder {
    config: WalConfig,
}

impl WalConfigBuilder {
    /// Set the segment directory
    pub fn dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.dir = path.into();
        self
    }

    /// Set the segment capacity (in bytes)
    pub fn segment_capacity(mut self, bytes: u32) -> Self {
        self.config.segment_capacity = bytes;
        self
    }

    /// Enable or disable preallocation of new segments
    pub fn preallocate(mut self, enabled: bool) -> Self {
        self.config.preallocate = enabled;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    pub fn build(self) -> WalConfig {
        self.config
    }
}
