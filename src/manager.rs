//! The `Manager` façade: orchestrates the pending pack, pack finalization,
//! index flush, reads, deletes, loading, and compaction (§4.5-4.9).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use log::{info, warn};

use crate::cache::{ContentCache, ListCache};
use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::codec::{self, Key};
use crate::committed::CommittedIndex;
use crate::config::{CommittedIndexBackend, FormatVersion, ManagerConfig};
use crate::content_id::{validate_prefix, ContentID, PackFile};
use crate::error::{Error, Result};
use crate::index::{IndexBuilder, IndexReader, Info, Payload};
use crate::object_store::{ObjectMeta, ObjectStore};
use crate::stats::{Stats, StatsSnapshot};

struct ManagerState {
    current_pack_items: BTreeMap<ContentID, Info>,
    current_pack_data_length: u64,
    packing_builder: IndexBuilder,
    flush_pack_indexes_after: u64,
}

/// Options for an explicit [`Manager::compact_indexes`] call (§4.9).
#[derive(Clone, Debug, Default)]
pub struct CompactOptions {
    pub all_blocks: bool,
    pub skip_deleted_older_than: Option<Duration>,
}

enum FetchError {
    NotFound(String),
    Other(anyhow::Error),
}

impl From<FetchError> for Error {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::NotFound(name) => Error::NotFound(name),
            FetchError::Other(e) => Error::IoError(e),
        }
    }
}

enum FetchOutcome {
    Ok(String, Vec<u8>),
    NotFound(String),
    Err(anyhow::Error),
}

pub struct Manager {
    store: Arc<dyn ObjectStore>,
    config: ManagerConfig,
    clock: Arc<dyn Clock>,
    master_key: Key,
    state: Mutex<ManagerState>,
    committed: CommittedIndex,
    content_cache: ContentCache,
    list_cache: ListCache,
    stats: Stats,
}

impl Manager {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        config: ManagerConfig,
        master_key: Key,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let committed = match &config.committed_index {
            CommittedIndexBackend::Memory => CommittedIndex::memory(),
            CommittedIndexBackend::Disk { directory } => {
                CommittedIndex::disk(directory).map_err(Error::IoError)?
            }
        };
        let content_cache_dir = if config.caching_enabled() {
            config.cache_directory.clone()
        } else {
            std::path::PathBuf::new()
        };
        let list_cache_dir = if config.caching_enabled() {
            config.cache_directory.join("list")
        } else {
            std::path::PathBuf::new()
        };
        let content_cache = ContentCache::new(
            content_cache_dir,
            config.max_cache_size_bytes,
            config.hmac_secret.clone(),
        );
        let list_cache = ListCache::new(
            list_cache_dir,
            config.max_list_cache_duration,
            config.hmac_secret.clone(),
        );
        let flush_pack_indexes_after = clock.now_seconds() + config.flush_interval.as_secs();

        Ok(Manager {
            store,
            config,
            clock,
            master_key,
            state: Mutex::new(ManagerState {
                current_pack_items: BTreeMap::new(),
                current_pack_data_length: 0,
                packing_builder: IndexBuilder::new(),
                flush_pack_indexes_after,
            }),
            committed,
            content_cache,
            list_cache,
            stats: Stats::new(),
        })
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    // ---- write path (§4.5) ----------------------------------------------

    pub fn write_block(
        &self,
        plaintext: &[u8],
        prefix: &str,
        cancel: &CancelToken,
    ) -> Result<ContentID> {
        cancel.check()?;
        validate_prefix(prefix)?;
        let digest = codec::hash(plaintext);
        let id = ContentID::new(prefix, &hex::encode(digest))?;

        let mut state = self.state.lock().unwrap();

        if let Some(existing) = state.packing_builder.get(&id) {
            if !existing.deleted {
                return Ok(id);
            }
        } else if let Some(committed) = self.committed.get_block(&id) {
            if !committed.deleted {
                return Ok(id);
            }
        }

        let timestamp_seconds = self.clock.now_seconds();
        let info = Info::new_payload(id.clone(), timestamp_seconds, Payload::Inline(plaintext.to_vec()));
        state.current_pack_items.insert(id.clone(), info.clone());
        state.packing_builder.add(info);
        state.current_pack_data_length += plaintext.len() as u64;

        if state.current_pack_data_length >= self.config.max_pack_size {
            self.finalize_pack(&mut state, cancel)?;
            if self.clock.now_seconds() > state.flush_pack_indexes_after {
                self.flush_index(&mut state, cancel)?;
            }
        }

        if self.config.invariant_check {
            self.check_invariants(&state);
        }
        self.stats.record_write();
        Ok(id)
    }

    pub fn delete_block(&self, id: &ContentID, cancel: &CancelToken) -> Result<()> {
        cancel.check()?;
        let mut state = self.state.lock().unwrap();

        if let Some(existing) = state.packing_builder.get(id).cloned() {
            if existing.deleted {
                return Ok(());
            }
            if existing.pack_file().is_none() {
                state.current_pack_data_length = state
                    .current_pack_data_length
                    .saturating_sub(existing.length());
                state.current_pack_items.remove(id);
                state.packing_builder.remove(id);
            } else {
                state
                    .packing_builder
                    .add(Info::tombstone(id.clone(), self.clock.now_seconds()));
            }
            if self.config.invariant_check {
                self.check_invariants(&state);
            }
            self.stats.record_delete();
            return Ok(());
        }

        match self.committed.get_block(id) {
            Some(info) if info.deleted => Ok(()),
            Some(_) => {
                state
                    .packing_builder
                    .add(Info::tombstone(id.clone(), self.clock.now_seconds()));
                if self.config.invariant_check {
                    self.check_invariants(&state);
                }
                self.stats.record_delete();
                Ok(())
            }
            None => Err(Error::NotFound(id.as_str().to_string())),
        }
    }

    // ---- pack finalization (§4.6) ----------------------------------------

    fn finalize_pack(&self, state: &mut ManagerState, cancel: &CancelToken) -> Result<()> {
        cancel.check()?;
        if state.current_pack_items.is_empty() {
            return Ok(());
        }

        let mut name_bytes = [0u8; 16];
        openssl::rand::rand_bytes(&mut name_bytes).map_err(|e| Error::IoError(e.into()))?;
        let pack_file = PackFile::new(format!("p{}", hex::encode(name_bytes)))?;

        let mut buffer = Vec::with_capacity(state.current_pack_data_length as usize);
        let preamble_len =
            random_range(self.config.min_preamble_length, self.config.max_preamble_length)
                .map_err(Error::IoError)?;
        buffer.extend_from_slice(&random_bytes(preamble_len as usize).map_err(Error::IoError)?);

        // New writes always use the per-entry format; the legacy whole-pack
        // format is read-only (§4.1).
        let mut finalized = Vec::new();
        for (content_id, info) in state.current_pack_items.iter() {
            let payload = match &info.payload {
                Payload::Inline(bytes) => bytes,
                _ => continue,
            };
            let offset = buffer.len() as u32;
            let iv = codec::iv_from_content_id(content_id)?;
            let content_hash = codec::hash(payload);
            let key = codec::derive_block_key(&self.master_key, &content_hash);
            let ciphertext = codec::encrypt(payload, &key, &iv).map_err(Error::IoError)?;
            let length = ciphertext.len() as u32;
            buffer.extend_from_slice(&ciphertext);
            finalized.push(Info::new_payload(
                content_id.clone(),
                info.timestamp_seconds,
                Payload::Packed {
                    pack_file: pack_file.clone(),
                    pack_offset: offset,
                    length,
                    format_version: FormatVersion::PerEntry.as_u8(),
                },
            ));
        }

        if self.config.padding_unit > 0 {
            let rem = (buffer.len() as u32) % self.config.padding_unit;
            if rem != 0 {
                let pad_len = self.config.padding_unit - rem;
                buffer.extend_from_slice(&random_bytes(pad_len as usize).map_err(Error::IoError)?);
            }
        }

        self.store
            .put(pack_file.as_str(), &buffer)
            .with_context(|| format!("writing pack file {pack_file}"))
            .map_err(Error::IoError)?;

        for info in finalized {
            state.packing_builder.add(info);
        }
        state.current_pack_items.clear();
        state.current_pack_data_length = 0;
        Ok(())
    }

    // ---- index flush (§4.7) ----------------------------------------------

    fn flush_index(&self, state: &mut ManagerState, cancel: &CancelToken) -> Result<()> {
        cancel.check()?;
        if state.packing_builder.is_empty() {
            state.flush_pack_indexes_after =
                self.clock.now_seconds() + self.config.flush_interval.as_secs();
            return Ok(());
        }

        let bytes = state.packing_builder.build();
        let digest = codec::hash(&bytes);
        let name = format!("n{}", hex::encode(digest));
        let key = codec::derive_block_key(&self.master_key, &digest);
        let iv = codec::iv_from_hash(&digest);
        let ciphertext = codec::encrypt(&bytes, &key, &iv).map_err(Error::IoError)?;

        self.store
            .put(&name, &ciphertext)
            .with_context(|| format!("writing index block {name}"))
            .map_err(Error::IoError)?;
        self.list_cache.invalidate().map_err(Error::IoError)?;
        self.committed
            .add_block(&name, &bytes, true)
            .map_err(Error::IoError)?;

        state.packing_builder = IndexBuilder::new();
        state.flush_pack_indexes_after =
            self.clock.now_seconds() + self.config.flush_interval.as_secs();
        Ok(())
    }

    pub fn flush(&self, cancel: &CancelToken) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        self.finalize_pack(&mut state, cancel)?;
        self.flush_index(&mut state, cancel)?;
        if self.config.invariant_check {
            self.check_invariants(&state);
        }
        Ok(())
    }

    // ---- read path (§4.8) -------------------------------------------------

    pub fn get_block(&self, id: &ContentID, cancel: &CancelToken) -> Result<Vec<u8>> {
        cancel.check()?;
        let state = self.state.lock().unwrap();
        if let Some(info) = state.current_pack_items.get(id) {
            if !info.deleted {
                if let Payload::Inline(bytes) = &info.payload {
                    self.stats.record_read();
                    return Ok(bytes.clone());
                }
            }
        }
        let info = state
            .packing_builder
            .get(id)
            .cloned()
            .or_else(|| self.committed.get_block(id));
        drop(state);

        let info = match info {
            Some(info) if !info.deleted => info,
            _ => return Err(Error::NotFound(id.as_str().to_string())),
        };

        let bytes = match &info.payload {
            Payload::Inline(bytes) => bytes.clone(),
            Payload::None => return Err(Error::NotFound(id.as_str().to_string())),
            Payload::Packed {
                pack_file,
                pack_offset,
                length,
                format_version,
            } => {
                let format_version = FormatVersion::from_u8(*format_version)
                    .ok_or(Error::UnsupportedFormat(*format_version))?;
                cancel.check()?;
                let ciphertext = self.content_cache.get_or_insert_with(id, || {
                    self.store
                        .get(pack_file.as_str(), *pack_offset as u64, Some(*length as u64))
                })?;
                self.decode_packed_entry(id, pack_file, *pack_offset, &ciphertext, format_version)?
            }
        };

        self.stats.record_read();
        Ok(bytes)
    }

    fn decode_packed_entry(
        &self,
        id: &ContentID,
        pack_file: &PackFile,
        pack_offset: u32,
        ciphertext: &[u8],
        format_version: FormatVersion,
    ) -> Result<Vec<u8>> {
        let content_hash = codec::content_hash_bytes(id)?;
        let key = codec::derive_block_key(&self.master_key, &content_hash);

        match format_version {
            FormatVersion::PerEntry => {
                let iv = codec::iv_from_content_id(id)?;
                let plaintext = codec::decrypt(ciphertext, &key, &iv).map_err(Error::IoError)?;
                if !codec::verify_integrity(&plaintext, &iv) {
                    self.stats.record_invalid_block();
                    return Err(Error::InvalidChecksum(id.as_str().to_string()));
                }
                Ok(plaintext)
            }
            // The whole pack shares one keystream seeded by the pack's own
            // IV; no per-entry integrity suffix exists to check against.
            FormatVersion::Legacy => {
                let base_iv = codec::iv_from_pack_file(pack_file)?;
                codec::decrypt_at_offset(ciphertext, &key, &base_iv, pack_offset as u64)
                    .map_err(Error::IoError)
            }
        }
    }

    pub fn block_info(&self, id: &ContentID) -> Result<Info> {
        let state = self.state.lock().unwrap();
        if let Some(info) = state.current_pack_items.get(id) {
            if !info.deleted {
                return Ok(info.clone());
            }
        }
        let info = state
            .packing_builder
            .get(id)
            .cloned()
            .or_else(|| self.committed.get_block(id));
        match info {
            Some(info) if !info.deleted => Ok(info),
            _ => Err(Error::NotFound(id.as_str().to_string())),
        }
    }

    pub fn list_blocks(&self, prefix: &str) -> Vec<ContentID> {
        let state = self.state.lock().unwrap();
        let mut seen: BTreeMap<ContentID, bool> = BTreeMap::new();
        self.committed.list_blocks(prefix, |info| {
            seen.insert(info.block_id.clone(), info.deleted);
            true
        });
        state.packing_builder.iterate(prefix, |info| {
            seen.insert(info.block_id.clone(), info.deleted);
            true
        });
        seen.into_iter()
            .filter(|(_, deleted)| !deleted)
            .map(|(id, _)| id)
            .collect()
    }

    // ---- loading (§4.9) ----------------------------------------------------

    fn list_index_blocks(&self, cancel: &CancelToken) -> Result<Vec<ObjectMeta>> {
        cancel.check()?;
        if let Some(cached) = self.list_cache.get() {
            return Ok(cached);
        }
        let listing = self.store.list("n").map_err(Error::IoError)?;
        self.list_cache.put(&listing).map_err(Error::IoError)?;
        Ok(listing)
    }

    /// Load (or reload) the committed set of index blocks from the store.
    pub fn load(&self, cancel: &CancelToken) -> Result<()> {
        let mut backoff = Duration::from_millis(100);
        for attempt in 0..self.config.index_load_attempts {
            cancel.check()?;
            let listing = self.list_index_blocks(cancel)?;
            let names: Vec<String> = listing.iter().map(|m| m.name.clone()).collect();
            let missing: Vec<String> = names
                .iter()
                .filter(|n| !self.committed.has(n))
                .cloned()
                .collect();

            match self.fetch_missing(&missing, cancel) {
                Ok(()) => {
                    self.committed.use_blocks(&names).map_err(Error::IoError)?;
                    return Ok(());
                }
                Err(FetchError::NotFound(name)) => {
                    warn!(
                        "index block {name} vanished during load (attempt {attempt}), retrying"
                    );
                    self.stats.record_load_retry();
                    self.list_cache.invalidate().map_err(Error::IoError)?;
                    std::thread::sleep(backoff);
                    backoff *= 2;
                }
                Err(FetchError::Other(e)) => return Err(Error::IoError(e)),
            }
        }
        Err(Error::NotFound(
            "index block set kept changing during load".to_string(),
        ))
    }

    pub fn refresh(&self, cancel: &CancelToken) -> Result<()> {
        self.load(cancel)
    }

    fn fetch_missing(
        &self,
        names: &[String],
        cancel: &CancelToken,
    ) -> std::result::Result<(), FetchError> {
        if names.is_empty() {
            return Ok(());
        }
        let worker_count = self.config.parallel_fetches.max(1).min(names.len());
        let (work_tx, work_rx) = crossbeam_channel::unbounded::<String>();
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<FetchOutcome>();
        for name in names {
            work_tx.send(name.clone()).expect("work channel open");
        }
        drop(work_tx);

        let mut handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            let store = Arc::clone(&self.store);
            let cancel = cancel.clone();
            handles.push(std::thread::spawn(move || {
                while let Ok(name) = work_rx.recv() {
                    if cancel.is_cancelled() {
                        let _ = result_tx.send(FetchOutcome::Err(anyhow::Error::new(Error::Cancelled)));
                        continue;
                    }
                    match store.get(&name, 0, None) {
                        Ok(bytes) => {
                            let _ = result_tx.send(FetchOutcome::Ok(name, bytes));
                        }
                        Err(e) => {
                            let not_found = e
                                .downcast_ref::<Error>()
                                .map(Error::is_not_found)
                                .unwrap_or(false);
                            if not_found {
                                let _ = result_tx.send(FetchOutcome::NotFound(name));
                            } else {
                                let _ = result_tx.send(FetchOutcome::Err(e));
                            }
                        }
                    }
                }
            }));
        }
        drop(result_tx);

        let mut fetched = Vec::new();
        let mut first_not_found = None;
        let mut first_err = None;
        for outcome in result_rx {
            match outcome {
                FetchOutcome::Ok(name, bytes) => fetched.push((name, bytes)),
                FetchOutcome::NotFound(name) => {
                    first_not_found.get_or_insert(name);
                }
                FetchOutcome::Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        for handle in handles {
            let _ = handle.join();
        }

        if let Some(e) = first_err {
            return Err(FetchError::Other(e));
        }
        if let Some(name) = first_not_found {
            return Err(FetchError::NotFound(name));
        }

        for (name, ciphertext) in fetched {
            let plaintext = self
                .decrypt_index_block(&name, &ciphertext)
                .map_err(FetchError::Other)?;
            self.committed
                .add_block(&name, &plaintext, false)
                .map_err(FetchError::Other)?;
        }
        Ok(())
    }

    fn decrypt_index_block(&self, name: &str, ciphertext: &[u8]) -> anyhow::Result<Vec<u8>> {
        let hex_part = name
            .strip_prefix('n')
            .ok_or_else(|| anyhow::anyhow!("not an index block name: {name}"))?;
        let digest_vec = hex::decode(hex_part).context("decoding index block digest")?;
        if digest_vec.len() != codec::HASH_SIZE {
            anyhow::bail!("bad index block digest length for {name}");
        }
        let mut digest = [0u8; codec::HASH_SIZE];
        digest.copy_from_slice(&digest_vec);
        let key = codec::derive_block_key(&self.master_key, &digest);
        let iv = codec::iv_from_hash(&digest);
        let plaintext = codec::decrypt(ciphertext, &key, &iv)
            .with_context(|| format!("decrypting index block {name}"))?;
        if !codec::verify_integrity(&plaintext, &iv) {
            anyhow::bail!("index block {name} failed integrity check");
        }
        Ok(plaintext)
    }

    // ---- compaction (§4.9) -------------------------------------------------

    pub fn compact_indexes(&self, opts: &CompactOptions, cancel: &CancelToken) -> Result<()> {
        cancel.check()?;
        let listing = self.list_index_blocks(cancel)?;
        let max_pack_size = self.config.max_pack_size;
        let small_threshold = max_pack_size / 20;

        let candidates: Vec<ObjectMeta> = listing
            .into_iter()
            .filter(|m| opts.all_blocks || m.length <= max_pack_size)
            .collect();
        let (very_small, medium): (Vec<ObjectMeta>, Vec<ObjectMeta>) =
            candidates.into_iter().partition(|m| m.length < small_threshold);
        let total = very_small.len() + medium.len();
        if total < self.config.compact_min_small {
            return Ok(());
        }

        let mut selected: Vec<ObjectMeta> =
            if very_small.len() * 2 > total && medium.len() + 1 < self.config.compact_min_small {
                very_small
            } else {
                very_small.into_iter().chain(medium).collect()
            };
        selected.sort_by_key(|m| m.length);
        if self.config.compact_max_small > 0 && selected.len() > self.config.compact_max_small {
            let dropped = selected.len() - self.config.compact_max_small;
            info!(
                "compaction candidate set has {} blocks, compacting the {} smallest this pass ({dropped} deferred)",
                selected.len(),
                self.config.compact_max_small
            );
            selected.truncate(self.config.compact_max_small);
        }
        if selected.len() < 2 {
            return Ok(());
        }

        let to_compact: Vec<String> = selected.into_iter().map(|m| m.name).collect();
        let mut merged = IndexBuilder::new();
        for name in &to_compact {
            cancel.check()?;
            let ciphertext = self
                .store
                .get(name, 0, None)
                .with_context(|| format!("fetching index block {name} for compaction"))
                .map_err(Error::IoError)?;
            let plaintext = self
                .decrypt_index_block(name, &ciphertext)
                .map_err(Error::IoError)?;
            let reader = IndexReader::open(&plaintext).map_err(Error::IoError)?;
            for entry in reader.iter() {
                if entry.deleted {
                    if let Some(skip_older) = opts.skip_deleted_older_than {
                        let cutoff = self.clock.now_seconds().saturating_sub(skip_older.as_secs());
                        if entry.timestamp_seconds < cutoff {
                            continue;
                        }
                    }
                }
                merged.add(entry.clone());
            }
        }

        let bytes = merged.build();
        let digest = codec::hash(&bytes);
        let new_name = format!("n{}", hex::encode(digest));
        let key = codec::derive_block_key(&self.master_key, &digest);
        let iv = codec::iv_from_hash(&digest);
        let ciphertext = codec::encrypt(&bytes, &key, &iv).map_err(Error::IoError)?;
        self.store
            .put(&new_name, &ciphertext)
            .with_context(|| format!("writing compacted index block {new_name}"))
            .map_err(Error::IoError)?;
        self.committed
            .add_block(&new_name, &bytes, false)
            .map_err(Error::IoError)?;

        for old_name in &to_compact {
            if old_name != &new_name {
                if let Err(e) = self.store.delete(old_name) {
                    warn!("failed to delete superseded index block {old_name}: {e:#}");
                }
            }
        }
        self.list_cache.invalidate().map_err(Error::IoError)?;
        self.stats.record_compaction();
        Ok(())
    }

    // ---- invariant checker (§3, test-only) --------------------------------

    fn check_invariants(&self, state: &ManagerState) {
        for (id, info) in state.current_pack_items.iter() {
            assert_eq!(&info.block_id, id, "invariant 5 violated for {id:?}");
            let builder_info = state
                .packing_builder
                .get(id)
                .unwrap_or_else(|| panic!("invariant 1 violated: {id:?} missing from packing_builder"));
            assert_eq!(
                builder_info, info,
                "invariant 1 violated: current_pack_items/packing_builder differ for {id:?}"
            );
        }

        for info in state.packing_builder.iter() {
            if info.timestamp_seconds == 0 {
                panic!("invariant 3 violated: {:?} has zero timestamp", info.block_id);
            }
            if info.deleted {
                if info.pack_file().is_some() {
                    panic!("invariant 4 violated: deleted entry {:?} has a pack_file", info.block_id);
                }
                continue;
            }
            if !state.current_pack_items.contains_key(&info.block_id) {
                match &info.payload {
                    Payload::Packed { format_version, .. } => {
                        if FormatVersion::from_u8(*format_version).is_none() {
                            panic!(
                                "invariant 2 violated: {:?} has unrecognized format_version {}",
                                info.block_id, format_version
                            );
                        }
                    }
                    _ => panic!(
                        "invariant 2 violated: {:?} not pending but carries no pack_file",
                        info.block_id
                    ),
                }
            }
        }
    }
}

fn random_bytes(len: usize) -> anyhow::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    openssl::rand::rand_bytes(&mut buf)?;
    Ok(buf)
}

fn random_range(min: u32, max: u32) -> anyhow::Result<u32> {
    if min >= max {
        return Ok(min);
    }
    let mut buf = [0u8; 4];
    openssl::rand::rand_bytes(&mut buf)?;
    let r = u32::from_le_bytes(buf);
    Ok(min + (r % (max - min + 1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::object_store::test_support::MemoryObjectStore;

    fn manager(store: Arc<MemoryObjectStore>, clock: Arc<FixedClock>) -> Manager {
        let config = ManagerConfig {
            max_pack_size: 1024,
            ..ManagerConfig::default()
        };
        Manager::new(store, config, [1u8; codec::KEY_SIZE], clock).unwrap()
    }

    #[test]
    fn write_then_get_round_trips_within_process() {
        let store = Arc::new(MemoryObjectStore::new());
        let clock = Arc::new(FixedClock::new(1000));
        let mgr = manager(store, clock);
        let cancel = CancelToken::new();

        let id = mgr.write_block(b"hello world", "", &cancel).unwrap();
        let got = mgr.get_block(&id, &cancel).unwrap();
        assert_eq!(got, b"hello world");
    }

    #[test]
    fn duplicate_writes_dedupe() {
        let store = Arc::new(MemoryObjectStore::new());
        let clock = Arc::new(FixedClock::new(1000));
        let mgr = manager(store, clock);
        let cancel = CancelToken::new();

        let id1 = mgr.write_block(b"same", "", &cancel).unwrap();
        let id2 = mgr.write_block(b"same", "", &cancel).unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn delete_then_get_not_found() {
        let store = Arc::new(MemoryObjectStore::new());
        let clock = Arc::new(FixedClock::new(1000));
        let mgr = manager(store, clock);
        let cancel = CancelToken::new();

        let id = mgr.write_block(b"gone soon", "", &cancel).unwrap();
        mgr.delete_block(&id, &cancel).unwrap();
        assert!(mgr.get_block(&id, &cancel).unwrap_err().is_not_found());
        // idempotent
        mgr.delete_block(&id, &cancel).unwrap();
    }

    #[test]
    fn write_block_rejects_bad_prefix() {
        let store = Arc::new(MemoryObjectStore::new());
        let clock = Arc::new(FixedClock::new(1000));
        let mgr = manager(store, clock);
        let cancel = CancelToken::new();
        assert!(matches!(
            mgr.write_block(b"x", "a", &cancel),
            Err(Error::InvalidPrefix(_))
        ));
    }

    #[test]
    fn flush_survives_reopen_against_same_store() {
        let store = Arc::new(MemoryObjectStore::new());
        let clock = Arc::new(FixedClock::new(1000));
        let cancel = CancelToken::new();

        let m1 = manager(store.clone(), clock.clone());
        let id = m1.write_block(b"persisted", "", &cancel).unwrap();
        m1.flush(&cancel).unwrap();

        let m2 = manager(store, clock);
        m2.load(&cancel).unwrap();
        assert_eq!(m2.get_block(&id, &cancel).unwrap(), b"persisted");
    }

    #[test]
    fn tombstone_with_later_timestamp_wins_across_managers() {
        let store = Arc::new(MemoryObjectStore::new());
        let clock = Arc::new(FixedClock::new(1000));
        let cancel = CancelToken::new();

        let m1 = manager(store.clone(), clock.clone());
        let id = m1.write_block(b"data", "", &cancel).unwrap();
        m1.flush(&cancel).unwrap();

        clock.advance(10);
        let m2 = manager(store.clone(), clock.clone());
        m2.load(&cancel).unwrap();
        m2.delete_block(&id, &cancel).unwrap();
        m2.flush(&cancel).unwrap();

        m1.load(&cancel).unwrap();
        assert!(m1.get_block(&id, &cancel).unwrap_err().is_not_found());
    }

    #[test]
    fn corrupted_pack_byte_yields_invalid_checksum() {
        let store = Arc::new(MemoryObjectStore::new());
        let clock = Arc::new(FixedClock::new(1000));
        let cancel = CancelToken::new();
        let mgr = manager(store.clone(), clock);

        let id = mgr.write_block(b"abc", "", &cancel).unwrap();
        mgr.flush(&cancel).unwrap();

        let info = mgr.block_info(&id).unwrap();
        let pack_file = info.pack_file().unwrap().as_str().to_string();
        store.corrupt_byte(&pack_file, 0);

        let err = mgr.get_block(&id, &cancel).unwrap_err();
        assert!(matches!(err, Error::InvalidChecksum(_)));
        assert_eq!(mgr.stats().invalid_blocks, 1);
    }

    #[test]
    fn pack_is_padded_to_padding_unit() {
        let store = Arc::new(MemoryObjectStore::new());
        let clock = Arc::new(FixedClock::new(1000));
        let cancel = CancelToken::new();
        let mgr = manager(store.clone(), clock);

        let id = mgr.write_block(b"short", "", &cancel).unwrap();
        mgr.flush(&cancel).unwrap();
        let info = mgr.block_info(&id).unwrap();
        let pack_file = info.pack_file().unwrap().as_str().to_string();
        let bytes = store.get(&pack_file, 0, None).unwrap();
        assert_eq!(bytes.len() % 4096, 0);
    }

    #[test]
    fn list_blocks_hides_pending_tombstones() {
        let store = Arc::new(MemoryObjectStore::new());
        let clock = Arc::new(FixedClock::new(1000));
        let cancel = CancelToken::new();
        let mgr = manager(store, clock);

        let id = mgr.write_block(b"listed", "", &cancel).unwrap();
        mgr.flush(&cancel).unwrap();
        assert!(mgr.list_blocks("").contains(&id));

        mgr.delete_block(&id, &cancel).unwrap();
        assert!(!mgr.list_blocks("").contains(&id));
    }

    #[test]
    fn compaction_merges_small_index_blocks() {
        let store = Arc::new(MemoryObjectStore::new());
        let clock = Arc::new(FixedClock::new(1000));
        let cancel = CancelToken::new();
        let config = ManagerConfig {
            max_pack_size: 1024,
            compact_min_small: 2,
            compact_max_small: 64,
            ..ManagerConfig::default()
        };
        let mgr = Manager::new(store.clone(), config, [1u8; codec::KEY_SIZE], clock).unwrap();

        for i in 0..3u8 {
            mgr.write_block(&[i], "", &cancel).unwrap();
            mgr.flush(&cancel).unwrap();
        }

        let before = mgr.list_index_blocks(&cancel).unwrap().len();
        assert_eq!(before, 3);

        mgr.compact_indexes(&CompactOptions::default(), &cancel).unwrap();
        let after = mgr.list_index_blocks(&cancel).unwrap().len();
        assert_eq!(after, 1);

        // every previously written id must still resolve via the fresh load.
        let mgr2 = Manager::new(
            store,
            ManagerConfig {
                max_pack_size: 1024,
                ..ManagerConfig::default()
            },
            [1u8; codec::KEY_SIZE],
            Arc::new(FixedClock::new(2000)),
        )
        .unwrap();
        mgr2.load(&cancel).unwrap();
        assert_eq!(mgr2.list_blocks("").len(), 3);
    }

    #[test]
    fn invariant_checker_passes_on_normal_operation() {
        let store = Arc::new(MemoryObjectStore::new());
        let clock = Arc::new(FixedClock::new(1000));
        let cancel = CancelToken::new();
        let config = ManagerConfig {
            max_pack_size: 1024,
            invariant_check: true,
            ..ManagerConfig::default()
        };
        let mgr = Manager::new(store, config, [1u8; codec::KEY_SIZE], clock).unwrap();
        let id = mgr.write_block(b"checked", "", &cancel).unwrap();
        mgr.flush(&cancel).unwrap();
        mgr.delete_block(&id, &cancel).unwrap();
    }
}
