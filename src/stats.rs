//! Running statistics exposed by a [`crate::manager::Manager`], similar in
//! shape to a garbage-collection status report: counters updated as blocks
//! flow through the manager rather than computed by a standalone pass.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of a [`Stats`] at a point in time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Number of index blocks currently merged into the live view.
    pub index_block_count: u64,
    /// Number of pack files currently referenced by live entries.
    pub pack_file_count: u64,
    /// Blocks written since the manager was opened.
    pub blocks_written: u64,
    /// Blocks read since the manager was opened.
    pub blocks_read: u64,
    /// Blocks marked deleted (tombstoned) since the manager was opened.
    pub blocks_deleted: u64,
    /// Reads that failed the hash-suffix integrity check.
    pub invalid_blocks: u64,
    /// Index-block fetch attempts that raced a concurrent compaction and
    /// had to retry.
    pub load_retries: u64,
    /// Index blocks merged away by `compact_indexes`.
    pub compactions: u64,
}

/// Thread-safe counters, cheap to update from any manager operation. Call
/// [`Stats::snapshot`] for a consistent-enough read (individual counters are
/// atomic, but the set as a whole is not locked together).
#[derive(Default)]
pub struct Stats {
    index_block_count: AtomicU64,
    pack_file_count: AtomicU64,
    blocks_written: AtomicU64,
    blocks_read: AtomicU64,
    blocks_deleted: AtomicU64,
    invalid_blocks: AtomicU64,
    load_retries: AtomicU64,
    compactions: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Stats::default()
    }

    pub fn record_write(&self) {
        self.blocks_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read(&self) {
        self.blocks_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.blocks_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid_block(&self) {
        self.invalid_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load_retry(&self) {
        self.load_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_index_block_count(&self, n: u64) {
        self.index_block_count.store(n, Ordering::Relaxed);
    }

    pub fn set_pack_file_count(&self, n: u64) {
        self.pack_file_count.store(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            index_block_count: self.index_block_count.load(Ordering::Relaxed),
            pack_file_count: self.pack_file_count.load(Ordering::Relaxed),
            blocks_written: self.blocks_written.load(Ordering::Relaxed),
            blocks_read: self.blocks_read.load(Ordering::Relaxed),
            blocks_deleted: self.blocks_deleted.load(Ordering::Relaxed),
            invalid_blocks: self.invalid_blocks.load(Ordering::Relaxed),
            load_retries: self.load_retries.load(Ordering::Relaxed),
            compactions: self.compactions.load(Ordering::Relaxed),
        }
    }
}
