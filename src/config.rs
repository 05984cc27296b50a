//! Manager configuration.
//!
//! This mirrors the shape a section-config/CLI frontend (out of scope for
//! this crate) would deserialize into: a flat, serde-friendly struct with
//! defaults matching §6 of the design.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// On-disk pack-entry encoding. `Legacy` encrypts the whole pack under one
/// IV and is read-only; `PerEntry` is the only format new writers emit.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatVersion {
    Legacy = 0,
    PerEntry = 1,
}

impl FormatVersion {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(FormatVersion::Legacy),
            1 => Some(FormatVersion::PerEntry),
            _ => None,
        }
    }
}

/// Which backend holds the currently in-use set of index blocks.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommittedIndexBackend {
    Memory,
    Disk { directory: PathBuf },
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub max_pack_size: u64,
    pub format_version: FormatVersion,
    pub min_preamble_length: u32,
    pub max_preamble_length: u32,
    pub padding_unit: u32,
    pub flush_interval: Duration,
    pub parallel_fetches: usize,
    pub index_load_attempts: u32,

    pub committed_index: CommittedIndexBackend,

    /// Empty means the content/list caches degrade to pass-throughs.
    pub cache_directory: PathBuf,
    pub max_cache_size_bytes: u64,
    pub max_list_cache_duration: Duration,
    pub hmac_secret: Vec<u8>,

    pub compact_min_small: usize,
    pub compact_max_small: usize,
    pub auto_compaction_skip_deleted_older_than: Option<Duration>,

    /// Enables the §3 invariant checker on every manager-lock release.
    /// Intended for tests only; panics on violation.
    pub invariant_check: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            max_pack_size: 20 * 1024 * 1024,
            format_version: FormatVersion::PerEntry,
            min_preamble_length: 32,
            max_preamble_length: 32,
            padding_unit: 4096,
            flush_interval: Duration::from_secs(10 * 60),
            parallel_fetches: 5,
            index_load_attempts: 10,
            committed_index: CommittedIndexBackend::Memory,
            cache_directory: PathBuf::new(),
            max_cache_size_bytes: 0,
            max_list_cache_duration: Duration::from_secs(30),
            hmac_secret: Vec::new(),
            compact_min_small: 4,
            compact_max_small: 64,
            auto_compaction_skip_deleted_older_than: None,
            invariant_check: false,
        }
    }
}

impl ManagerConfig {
    pub fn caching_enabled(&self) -> bool {
        !self.cache_directory.as_os_str().is_empty()
    }
}
