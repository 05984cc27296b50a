//! In-memory accumulation of `Info` entries prior to serialization (§4.2).

use std::collections::BTreeMap;

use crate::content_id::ContentID;

use super::entry::Info;
use super::format;
use super::reader::IndexReader;

#[derive(Default, Clone, Debug)]
pub struct IndexBuilder {
    entries: BTreeMap<ContentID, Info>,
}

impl IndexBuilder {
    pub fn new() -> Self {
        IndexBuilder {
            entries: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Replace an existing entry iff the newcomer wins under the §3 ordering.
    pub fn add(&mut self, info: Info) {
        match self.entries.get(&info.block_id) {
            Some(existing) if !info.supersedes(existing) => {}
            _ => {
                self.entries.insert(info.block_id.clone(), info);
            }
        }
    }

    pub fn get(&self, id: &ContentID) -> Option<&Info> {
        self.entries.get(id)
    }

    pub fn remove(&mut self, id: &ContentID) -> Option<Info> {
        self.entries.remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Info> {
        self.entries.values()
    }

    /// Visit entries whose `block_id` starts with `prefix`, in ascending
    /// order (the map is already sorted by key).
    pub fn iterate<F>(&self, prefix: &str, mut callback: F)
    where
        F: FnMut(&Info) -> bool,
    {
        for info in self.entries.values() {
            if info.block_id.has_prefix(prefix) && !callback(info) {
                break;
            }
        }
    }

    /// Serialize all entries, sorted by `ContentID`, into a self-describing
    /// binary block.
    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        format::write_header(&mut out, self.entries.len() as u32);
        for info in self.entries.values() {
            format::write_entry(&mut out, info);
        }
        out
    }

    /// Parse this builder's own output back into a read-only index. Used by
    /// tests to check the round-trip law `serialize ∘ open == identity`.
    pub fn build_and_open(&self) -> anyhow::Result<IndexReader> {
        IndexReader::open(self.build())
    }
}
