//! Read-through, HMAC-tagged byte-range cache over pack file contents
//! (§4.10), keyed by logical `ContentID` so a block shared across many
//! reads is fetched from the store once. Degrades to pass-through when no
//! cache directory is configured.

use std::path::PathBuf;

use anyhow::{Context, Result};
use log::{debug, warn};

use crate::codec;
use crate::content_id::ContentID;
use crate::fsutil;

pub struct ContentCache {
    directory: PathBuf,
    max_size_bytes: u64,
    hmac_secret: Vec<u8>,
}

impl ContentCache {
    pub fn new(directory: PathBuf, max_size_bytes: u64, hmac_secret: Vec<u8>) -> Self {
        ContentCache {
            directory,
            max_size_bytes,
            hmac_secret,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.directory.as_os_str().is_empty()
    }

    /// ContentIDs of odd length (one namespace letter plus hex) are rotated
    /// one character left so the namespace letter doesn't dominate the
    /// top-level shard, spreading entries 256 ways regardless of prefix use.
    fn cache_key(id: &ContentID) -> String {
        let s = id.as_str();
        if s.len() % 2 == 1 {
            let mut chars = s.chars();
            let first = chars.next().expect("non-empty id");
            let mut rotated: String = chars.collect();
            rotated.push(first);
            rotated
        } else {
            s.to_string()
        }
    }

    fn entry_path(&self, id: &ContentID) -> PathBuf {
        let key = Self::cache_key(id);
        let shard = if key.len() >= 2 { &key[..2] } else { &key[..] };
        self.directory.join(shard).join(key.clone())
    }

    /// Look up the cached bytes for `id`; on miss (or tamper detection) call
    /// `fetch` (expected to read the entry's byte range from the backing
    /// pack file) and cache the result best-effort.
    pub fn get_or_insert_with<F>(&self, id: &ContentID, fetch: F) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        if !self.is_enabled() {
            return fetch();
        }

        let path = self.entry_path(id);
        if let Some(bytes) = self.read_verified(&path) {
            return Ok(bytes);
        }

        let bytes = fetch()?;
        if let Err(err) = self.write_entry(&path, &bytes) {
            warn!("failed to populate content cache entry for {id}: {err:#}");
        }
        Ok(bytes)
    }

    fn read_verified(&self, path: &PathBuf) -> Option<Vec<u8>> {
        let raw = std::fs::read(path).ok()?;
        if raw.len() < codec::HASH_SIZE {
            return None;
        }
        let (tag, data) = raw.split_at(codec::HASH_SIZE);
        let expected = codec::hmac(data, &self.hmac_secret);
        if tag == expected {
            Some(data.to_vec())
        } else {
            warn!("content cache entry {:?} failed integrity check, evicting", path);
            let _ = std::fs::remove_file(path);
            None
        }
    }

    fn write_entry(&self, path: &PathBuf, data: &[u8]) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating content cache shard {:?}", dir))?;
        }
        let tag = codec::hmac(data, &self.hmac_secret);
        let mut payload = Vec::with_capacity(tag.len() + data.len());
        payload.extend_from_slice(&tag);
        payload.extend_from_slice(data);
        fsutil::atomic_write(path, &payload)
    }

    /// Delete the least-recently-modified entries until the cache directory
    /// is back under `max_size_bytes`. Intended to run periodically (every
    /// ~1 minute) rather than after every insert.
    pub fn sweep(&self) -> Result<()> {
        if !self.is_enabled() || self.max_size_bytes == 0 {
            return Ok(());
        }

        let mut entries: Vec<(PathBuf, u64, std::time::SystemTime)> = Vec::new();
        let mut total: u64 = 0;
        for entry in walkdir::WalkDir::new(&self.directory)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            let modified = meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            total += meta.len();
            entries.push((entry.into_path(), meta.len(), modified));
        }

        if total <= self.max_size_bytes {
            return Ok(());
        }

        entries.sort_by_key(|(_, _, modified)| *modified);
        for (path, len, _) in entries {
            if total <= self.max_size_bytes {
                break;
            }
            if std::fs::remove_file(&path).is_ok() {
                total = total.saturating_sub(len);
                debug!("evicted content cache entry {:?} during sweep", path);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ContentID {
        ContentID::parse(s).unwrap()
    }

    fn test_cache(name: &str) -> (ContentCache, PathBuf) {
        let dir = std::env::temp_dir().join(format!(
            "blockrepo-content-cache-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        (ContentCache::new(dir.clone(), 1024 * 1024, b"secret".to_vec()), dir)
    }

    #[test]
    fn disabled_cache_always_fetches() {
        let cache = ContentCache::new(PathBuf::new(), 0, Vec::new());
        let mut calls = 0;
        let out = cache
            .get_or_insert_with(&id("aabb"), || {
                calls += 1;
                Ok(vec![1, 2, 3])
            })
            .unwrap();
        assert_eq!(out, vec![1, 2, 3]);
        assert_eq!(calls, 1);
        let out2 = cache
            .get_or_insert_with(&id("aabb"), || {
                calls += 1;
                Ok(vec![1, 2, 3])
            })
            .unwrap();
        assert_eq!(out2, vec![1, 2, 3]);
        assert_eq!(calls, 2, "pass-through must refetch every time");
    }

    #[test]
    fn enabled_cache_only_fetches_once() {
        let (cache, dir) = test_cache("hit");
        let mut calls = 0;
        for _ in 0..3 {
            let out = cache
                .get_or_insert_with(&id("aabbcc"), || {
                    calls += 1;
                    Ok(vec![9, 9, 9, 9])
                })
                .unwrap();
            assert_eq!(out, vec![9, 9, 9, 9]);
        }
        assert_eq!(calls, 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn tampered_entry_is_evicted_and_refetched() {
        let (cache, dir) = test_cache("tamper");
        let content_id = id("aabb");
        cache
            .get_or_insert_with(&content_id, || Ok(vec![1, 2, 3]))
            .unwrap();
        let path = cache.entry_path(&content_id);
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let mut calls = 0;
        let out = cache
            .get_or_insert_with(&content_id, || {
                calls += 1;
                Ok(vec![1, 2, 3])
            })
            .unwrap();
        assert_eq!(out, vec![1, 2, 3]);
        assert_eq!(calls, 1, "tampered entry should be treated as a miss");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn odd_length_ids_rotate_for_sharding() {
        // "gabc" (4 chars) has even length -- no rotation.
        assert_eq!(ContentCache::cache_key(&id("gabc")), "gabc");
    }
}
