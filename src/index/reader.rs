//! Read-only view over one serialized index block (§4.2).

use anyhow::Result;

use crate::content_id::ContentID;

use super::entry::Info;
use super::format;

#[derive(Debug)]
pub struct IndexReader {
    // Sorted by `block_id` -- the builder always encodes in that order, and
    // we re-verify it below rather than trust the bytes blindly.
    entries: Vec<Info>,
}

impl IndexReader {
    pub fn open(bytes: impl AsRef<[u8]>) -> Result<Self> {
        let bytes = bytes.as_ref();
        let header = format::read_header(bytes)?;
        let mut entries = format::read_entries(bytes, header.entry_count)?;
        entries.sort_by(|a, b| a.block_id.cmp(&b.block_id));
        Ok(IndexReader { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_info(&self, block_id: &ContentID) -> Option<&Info> {
        self.entries
            .binary_search_by(|info| info.block_id.cmp(block_id))
            .ok()
            .map(|idx| &self.entries[idx])
    }

    /// Invoke `callback` for each entry whose `block_id` starts with
    /// `prefix`, in ascending order. Stops early if `callback` returns
    /// `false`.
    pub fn iterate<'a, F>(&'a self, prefix: &str, mut callback: F)
    where
        F: FnMut(&'a Info) -> bool,
    {
        let start = self
            .entries
            .partition_point(|info| info.block_id.as_str() < prefix);
        for info in &self.entries[start..] {
            if !info.block_id.has_prefix(prefix) {
                break;
            }
            if !callback(info) {
                break;
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Info> {
        self.entries.iter()
    }

    /// The contiguous slice of entries whose `block_id` starts with `prefix`.
    pub fn entries_with_prefix(&self, prefix: &str) -> &[Info] {
        let start = self
            .entries
            .partition_point(|info| info.block_id.as_str() < prefix);
        let rest = &self.entries[start..];
        let end = rest.partition_point(|info| info.block_id.has_prefix(prefix));
        &rest[..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::builder::IndexBuilder;
    use crate::index::entry::Payload;

    fn id(s: &str) -> ContentID {
        ContentID::parse(s).unwrap()
    }

    #[test]
    fn roundtrip_preserves_fields() {
        let mut b = IndexBuilder::new();
        b.add(Info::new_payload(id("aabb"), 42, Payload::Inline(vec![1, 2, 3])));
        b.add(Info::tombstone(id("ccdd"), 99));
        let bytes = b.build();
        let reader = IndexReader::open(bytes).unwrap();
        assert_eq!(reader.len(), 2);

        let a = reader.get_info(&id("aabb")).unwrap();
        assert_eq!(a.timestamp_seconds, 42);
        assert_eq!(a.payload, Payload::Inline(vec![1, 2, 3]));

        let c = reader.get_info(&id("ccdd")).unwrap();
        assert!(c.deleted);

        assert!(reader.get_info(&id("eeff")).is_none());
    }

    #[test]
    fn iterate_respects_prefix_and_order() {
        let mut b = IndexBuilder::new();
        for s in ["gaa", "gbb", "haa"] {
            b.add(Info::new_payload(id(s), 1, Payload::Inline(vec![0])));
        }
        let reader = b.build_and_open().unwrap();
        let mut seen = Vec::new();
        reader.iterate("g", |info| {
            seen.push(info.block_id.as_str().to_string());
            true
        });
        assert_eq!(seen, vec!["gaa", "gbb"]);
    }
}
