//! Time-injection seam (§9 open question: wall-clock vs. logical clock for
//! `timestamp_seconds`). This crate adopts wall-clock seconds; callers on
//! lossy clocks can inject a fixed/fake clock for tests via this trait.

use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    fn now_seconds(&self) -> u64;
}

#[derive(Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_secs()
    }
}

/// A clock fixed at construction, advanced explicitly. Used by tests that
/// need deterministic ordering of timestamps (e.g. the tombstone-wins
/// scenario in §8).
#[cfg(test)]
pub struct FixedClock(std::sync::atomic::AtomicU64);

#[cfg(test)]
impl FixedClock {
    pub fn new(start: u64) -> Self {
        FixedClock(std::sync::atomic::AtomicU64::new(start))
    }

    pub fn advance(&self, delta: u64) {
        self.0.fetch_add(delta, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now_seconds(&self) -> u64 {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}
