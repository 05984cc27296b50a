//! The object store contract consumed by this crate (§6). Implementing this
//! trait and wiring it in is the embedder's job; everything else in this
//! crate is built against it.

use anyhow::Result;

#[derive(Clone, Debug)]
pub struct ObjectMeta {
    pub name: String,
    pub length: u64,
    pub timestamp_seconds: u64,
}

/// `NotFound` conditions are reported through `crate::error::Error::NotFound`
/// wrapped as an `anyhow::Error`; callers can match via
/// `err.downcast_ref::<crate::error::Error>()`.
pub trait ObjectStore: Send + Sync {
    /// Write `bytes` under `name`. Atomic from the reader's perspective;
    /// overwriting with identical bytes is legal.
    fn put(&self, name: &str, bytes: &[u8]) -> Result<()>;

    /// Read `[offset, offset+length)`, or `[offset, end)` if `length` is
    /// `None`. Returns `NotFound` if the object is absent.
    fn get(&self, name: &str, offset: u64, length: Option<u64>) -> Result<Vec<u8>>;

    /// Stream (here: collect) every object whose name starts with `prefix`.
    /// Order is unspecified.
    fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Idempotent: deleting an absent object is not an error.
    fn delete(&self, name: &str) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    /// A process-local object store used by unit tests throughout the
    /// crate. `tests/common/mod.rs` defines an equivalent public test
    /// double for the integration tests, since those compile against the
    /// library as an external crate and cannot see `#[cfg(test)]` items.
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
                .ok_or_else(|| anyhow::Error::new(crate::error::Error::NotFound(name.to_string())))?;
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
}
