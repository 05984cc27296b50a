//! JSON+HMAC-tagged cache of the index-block-name listing (§4.10), bounded
//! by a time-to-live rather than an access-based eviction policy.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::fsutil;
use crate::object_store::ObjectMeta;

const LIST_CACHE_FILE: &str = "index_blocks.json";

#[derive(Serialize, Deserialize)]
struct CachedListing {
    fetched_at_seconds: u64,
    entries: Vec<(String, u64, u64)>,
}

pub struct ListCache {
    directory: PathBuf,
    max_age: Duration,
    hmac_secret: Vec<u8>,
}

impl ListCache {
    pub fn new(directory: PathBuf, max_age: Duration, hmac_secret: Vec<u8>) -> Self {
        ListCache {
            directory,
            max_age,
            hmac_secret,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.directory.as_os_str().is_empty()
    }

    fn path(&self) -> PathBuf {
        self.directory.join(LIST_CACHE_FILE)
    }

    /// Return the cached listing if present and younger than `max_age`.
    pub fn get(&self) -> Option<Vec<ObjectMeta>> {
        if !self.is_enabled() {
            return None;
        }
        let raw = std::fs::read(self.path()).ok()?;
        if raw.len() < codec::HASH_SIZE {
            return None;
        }
        let (tag, body) = raw.split_at(codec::HASH_SIZE);
        if codec::hmac(body, &self.hmac_secret) != tag {
            let _ = std::fs::remove_file(self.path());
            return None;
        }
        let cached: CachedListing = serde_json::from_slice(body).ok()?;
        let now = now_seconds();
        let age = Duration::from_secs(now.saturating_sub(cached.fetched_at_seconds));
        if age > self.max_age {
            return None;
        }
        Some(
            cached
                .entries
                .into_iter()
                .map(|(name, length, timestamp_seconds)| ObjectMeta {
                    name,
                    length,
                    timestamp_seconds,
                })
                .collect(),
        )
    }

    pub fn put(&self, listing: &[ObjectMeta]) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.directory)
            .with_context(|| format!("creating list cache directory {:?}", self.directory))?;
        let cached = CachedListing {
            fetched_at_seconds: now_seconds(),
            entries: listing
                .iter()
                .map(|m| (m.name.clone(), m.length, m.timestamp_seconds))
                .collect(),
        };
        let body = serde_json::to_vec(&cached).context("serializing list cache entry")?;
        let tag = codec::hmac(&body, &self.hmac_secret);
        let mut payload = Vec::with_capacity(tag.len() + body.len());
        payload.extend_from_slice(&tag);
        payload.extend_from_slice(&body);

        // Unlike the content cache, this file is overwritten on every
        // refresh, so go through a temp-file swap unconditionally rather
        // than `fsutil::atomic_write`'s "already present, skip" shortcut.
        let tmp = self.path().with_extension("json.tmp");
        std::fs::write(&tmp, &payload).context("writing list cache temp file")?;
        std::fs::rename(&tmp, self.path()).context("renaming list cache into place")?;
        Ok(())
    }

    /// Invalidate the cache, forcing the next `get()` to miss. Called
    /// whenever the manager flushes new index blocks into the store.
    pub fn invalidate(&self) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        match std::fs::remove_file(self.path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).context("invalidating list cache"),
        }
    }
}

fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}
