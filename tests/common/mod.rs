//! A process-local `ObjectStore` double for the integration tests.
//!
//! This duplicates `blockrepo::object_store::test_support::MemoryObjectStore`
//! (which is `pub(crate)` and invisible from here, since integration tests
//! compile against the library as an external crate).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use blockrepo::{Clock, Error, ObjectMeta, ObjectStore};

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, (Vec<u8>, u64)>>,
    clock: AtomicU64,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        MemoryObjectStore {
            objects: Mutex::new(HashMap::new()),
            clock: AtomicU64::new(1),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.objects.lock().unwrap().contains_key(name)
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn corrupt_byte(&self, name: &str, offset: usize) {
        let mut objects = self.objects.lock().unwrap();
        if let Some((bytes, _)) = objects.get_mut(name) {
            bytes[offset] ^= 0xff;
        }
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let ts = self.clock.fetch_add(1, Ordering::Relaxed);
        self.objects
            .lock()
            .unwrap()
            .insert(name.to_string(), (bytes.to_vec(), ts));
        Ok(())
    }

    fn get(&self, name: &str, offset: u64, length: Option<u64>) -> Result<Vec<u8>> {
        let objects = self.objects.lock().unwrap();
        let (bytes, _) = objects
            .get(name)
            .ok_or_else(|| anyhow::Error::new(Error::NotFound(name.to_string())))?;
        let start = offset as usize;
        let end = match length {
            Some(len) => (start + len as usize).min(bytes.len()),
            None => bytes.len(),
        };
        if start > bytes.len() || start > end {
            anyhow::bail!("read out of range for {}", name);
        }
        Ok(bytes[start..end].to_vec())
    }

    fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, (bytes, ts))| ObjectMeta {
                name: name.clone(),
                length: bytes.len() as u64,
                timestamp_seconds: *ts,
            })
            .collect())
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(name);
        Ok(())
    }
}

/// A clock fixed at construction, advanced explicitly by the test driving
/// it. The library's own equivalent is `#[cfg(test)]`-gated and invisible
/// from here.
pub struct FixedClock(AtomicU64);

impl FixedClock {
    pub fn new(start: u64) -> Self {
        FixedClock(AtomicU64::new(start))
    }

    pub fn advance(&self, delta: u64) {
        self.0.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_seconds(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}
