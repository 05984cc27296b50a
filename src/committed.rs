//! The committed-block index: the set of index blocks currently merged into
//! the live read view, with a memory- or disk-backed cache of their bytes
//! (§4.4).

use std::collections::{BTreeSet, HashMap};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use log::{debug, warn};

use crate::content_id::ContentID;
use crate::index::{IndexReader, Info, MergedIndex};

const SNDX_SUFFIX: &str = ".sndx";
const EXPIRE_AFTER: Duration = Duration::from_secs(3600);

/// A read-only memory mapping, used transiently while parsing a disk-backed
/// index block. `IndexReader::open` copies every field out into owned
/// storage, so the mapping does not need to outlive the parse.
struct MmapBytes {
    ptr: *mut libc::c_void,
    len: usize,
}

impl MmapBytes {
    fn map(file: &std::fs::File, len: usize) -> Result<Self> {
        if len == 0 {
            return Ok(MmapBytes {
                ptr: std::ptr::null_mut(),
                len: 0,
            });
        }
        use std::os::unix::io::AsRawFd;
        let ptr = unsafe {
            nix::sys::mman::mmap(
                std::ptr::null_mut(),
                len,
                nix::sys::mman::ProtFlags::PROT_READ,
                nix::sys::mman::MapFlags::MAP_PRIVATE,
                file.as_raw_fd(),
                0,
            )
        }
        .context("mmap index block failed")?;
        Ok(MmapBytes { ptr, len })
    }
}

impl Deref for MmapBytes {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        if self.len == 0 {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.len) }
        }
    }
}

impl Drop for MmapBytes {
    fn drop(&mut self) {
        if self.len > 0 {
            let _ = unsafe { nix::sys::mman::munmap(self.ptr, self.len) };
        }
    }
}

enum Backend {
    Memory,
    Disk { directory: PathBuf },
}

struct State {
    cache: HashMap<String, Arc<IndexReader>>,
    active: BTreeSet<String>,
    merged: MergedIndex,
}

impl State {
    fn recompute_merged(&mut self) {
        let readers = self
            .active
            .iter()
            .filter_map(|name| self.cache.get(name).cloned())
            .collect();
        self.merged = MergedIndex::new(readers);
    }
}

/// Holds the currently in-use set of index blocks.
pub struct CommittedIndex {
    backend: Backend,
    state: Mutex<State>,
}

impl CommittedIndex {
    pub fn memory() -> Self {
        CommittedIndex {
            backend: Backend::Memory,
            state: Mutex::new(State {
                cache: HashMap::new(),
                active: BTreeSet::new(),
                merged: MergedIndex::default(),
            }),
        }
    }

    pub fn disk(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)
            .with_context(|| format!("creating committed-index directory {:?}", directory))?;
        Ok(CommittedIndex {
            backend: Backend::Disk { directory },
            state: Mutex::new(State {
                cache: HashMap::new(),
                active: BTreeSet::new(),
                merged: MergedIndex::default(),
            }),
        })
    }

    fn disk_path(directory: &Path, name: &str) -> PathBuf {
        directory.join(format!("{name}{SNDX_SUFFIX}"))
    }

    /// Idempotent write into the cache; if `use_immediately`, the block
    /// joins the active merged view right away (without waiting for a
    /// subsequent `use_blocks` call).
    pub fn add_block(&self, name: &str, bytes: &[u8], use_immediately: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.cache.contains_key(name) {
            if let Backend::Disk { directory } = &self.backend {
                self.persist_to_disk(directory, name, bytes)?;
            }
            let reader = IndexReader::open(bytes)
                .with_context(|| format!("parsing index block {name}"))?;
            state.cache.insert(name.to_string(), Arc::new(reader));
        }
        if use_immediately {
            state.active.insert(name.to_string());
            state.recompute_merged();
        }
        Ok(())
    }

    fn persist_to_disk(&self, directory: &Path, name: &str, bytes: &[u8]) -> Result<()> {
        let final_path = Self::disk_path(directory, name);
        crate::fsutil::atomic_write(&final_path, bytes)
            .with_context(|| format!("persisting index block {name}"))
    }

    pub fn has(&self, name: &str) -> bool {
        self.state.lock().unwrap().cache.contains_key(name)
    }

    /// Replace the active set with exactly `names`. Returns `true` iff the
    /// set changed. Names not yet present via `add_block` are ignored (the
    /// caller is expected to have fetched and added them first).
    pub fn use_blocks(&self, names: &[String]) -> Result<bool> {
        let new_active: BTreeSet<String> = names.iter().cloned().collect();
        let mut state = self.state.lock().unwrap();
        if new_active == state.active {
            if let Backend::Disk { directory } = &self.backend {
                self.expire_unused(directory, &new_active)?;
            }
            return Ok(false);
        }
        state.active = new_active.clone();
        state.recompute_merged();
        drop(state);

        if let Backend::Disk { directory } = &self.backend {
            self.expire_unused(directory, &new_active)?;
        }
        Ok(true)
    }

    /// Disk backend only: delete `.sndx` files not in `keep` whose mtime is
    /// older than one hour, so that blocks superseded by a compaction
    /// eventually stop occupying the local cache.
    fn expire_unused(&self, directory: &Path, keep: &BTreeSet<String>) -> Result<()> {
        let now = SystemTime::now();
        for entry in walkdir::WalkDir::new(directory)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let file_name = entry.file_name().to_string_lossy().to_string();
            let Some(name) = file_name.strip_suffix(SNDX_SUFFIX) else {
                continue;
            };
            if keep.contains(name) {
                continue;
            }
            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(m) => m,
                Err(_) => continue,
            };
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age > EXPIRE_AFTER {
                if let Err(err) = std::fs::remove_file(entry.path()) {
                    warn!("failed to expire stale index block {:?}: {}", entry.path(), err);
                } else {
                    debug!("expired stale index block {:?} (age {:?})", entry.path(), age);
                }
            }
        }
        Ok(())
    }

    pub fn get_block(&self, id: &ContentID) -> Option<Info> {
        self.state.lock().unwrap().merged.get_info(id)
    }

    pub fn list_blocks<F>(&self, prefix: &str, callback: F)
    where
        F: FnMut(&Info) -> bool,
    {
        self.state.lock().unwrap().merged.iterate(prefix, callback);
    }

    /// Read a disk-backed block's raw bytes back (used when re-opening a
    /// process against a repository that already has local `.sndx` files,
    /// so we don't have to refetch them from the object store).
    pub fn read_local(&self, name: &str) -> Option<Result<Vec<u8>>> {
        let Backend::Disk { directory } = &self.backend else {
            return None;
        };
        let path = Self::disk_path(directory, name);
        if !path.exists() {
            return None;
        }
        Some((|| {
            let file = std::fs::File::open(&path)
                .with_context(|| format!("opening local index block {:?}", path))?;
            let len = file.metadata()?.len() as usize;
            let mapped = MmapBytes::map(&file, len)?;
            Ok(mapped.to_vec())
        })())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexBuilder, Payload};

    fn id(s: &str) -> ContentID {
        ContentID::parse(s).unwrap()
    }

    fn sample_block(entries: &[&str]) -> Vec<u8> {
        let mut b = IndexBuilder::new();
        for e in entries {
            b.add(Info::new_payload(id(e), 1, Payload::Inline(vec![1])));
        }
        b.build()
    }

    #[test]
    fn add_block_use_immediately_exposes_entries() {
        let ci = CommittedIndex::memory();
        ci.add_block("n1", &sample_block(&["aa", "bb"]), true).unwrap();
        assert!(ci.get_block(&id("aa")).is_some());
        assert!(ci.has("n1"));
    }

    #[test]
    fn use_blocks_is_idempotent() {
        let ci = CommittedIndex::memory();
        ci.add_block("n1", &sample_block(&["aa"]), false).unwrap();
        assert!(ci.use_blocks(&["n1".to_string()]).unwrap());
        assert!(!ci.use_blocks(&["n1".to_string()]).unwrap());
    }

    #[test]
    fn use_blocks_detects_change() {
        let ci = CommittedIndex::memory();
        ci.add_block("n1", &sample_block(&["aa"]), false).unwrap();
        ci.add_block("n2", &sample_block(&["bb"]), false).unwrap();
        assert!(ci.use_blocks(&["n1".to_string()]).unwrap());
        assert!(ci.use_blocks(&["n1".to_string(), "n2".to_string()]).unwrap());
        assert!(ci.get_block(&id("bb")).is_some());
    }

    #[test]
    fn disk_backend_persists_and_reloads() {
        let dir = std::env::temp_dir().join(format!("blockrepo-committed-test-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let ci = CommittedIndex::disk(&dir).unwrap();
        ci.add_block("n1", &sample_block(&["aa"]), true).unwrap();
        assert!(dir.join("n1.sndx").exists());
        let bytes = ci.read_local("n1").unwrap().unwrap();
        let reader = IndexReader::open(bytes).unwrap();
        assert!(reader.get_info(&id("aa")).is_some());
        std::fs::remove_dir_all(&dir).ok();
    }
}
