//! Overlay of many read-only indexes with newest-wins semantics (§4.3).

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::content_id::ContentID;

use super::entry::Info;
use super::reader::IndexReader;

#[derive(Clone, Default)]
pub struct MergedIndex {
    indexes: Vec<Arc<IndexReader>>,
}

impl MergedIndex {
    pub fn new(indexes: Vec<Arc<IndexReader>>) -> Self {
        MergedIndex { indexes }
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    pub fn get_info(&self, id: &ContentID) -> Option<Info> {
        let mut winner: Option<&Info> = None;
        for index in &self.indexes {
            if let Some(candidate) = index.get_info(id) {
                winner = match winner {
                    None => Some(candidate),
                    Some(current) if candidate.supersedes(current) => Some(candidate),
                    Some(current) => Some(current),
                };
            }
        }
        winner.cloned()
    }

    /// Visit each `ContentID` under `prefix` exactly once, in ascending
    /// order, yielding the §3 winner among all indexes that mention it.
    /// Implemented as a heap-merge over each index's sorted entry slice so
    /// memory use is O(number of indexes), not O(total entries).
    pub fn iterate<F>(&self, prefix: &str, mut callback: F)
    where
        F: FnMut(&Info) -> bool,
    {
        struct Cursor<'a> {
            entries: &'a [Info],
            pos: usize,
        }

        // Ord by block_id ascending via Reverse(Reverse) trick: BinaryHeap is
        // a max-heap, so wrap in Reverse to get the smallest block_id out
        // first.
        struct HeapItem<'a> {
            cursor_idx: usize,
            info: &'a Info,
        }
        impl<'a> PartialEq for HeapItem<'a> {
            fn eq(&self, other: &Self) -> bool {
                self.info.block_id == other.info.block_id
            }
        }
        impl<'a> Eq for HeapItem<'a> {}
        impl<'a> PartialOrd for HeapItem<'a> {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }
        impl<'a> Ord for HeapItem<'a> {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                self.info.block_id.cmp(&other.info.block_id)
            }
        }

        let mut cursors: Vec<Cursor> = self
            .indexes
            .iter()
            .map(|index| Cursor {
                entries: index.entries_with_prefix(prefix),
                pos: 0,
            })
            .collect();

        let mut heap: BinaryHeap<Reverse<HeapItem>> = BinaryHeap::new();
        for (idx, cursor) in cursors.iter().enumerate() {
            if let Some(info) = cursor.entries.first() {
                heap.push(Reverse(HeapItem {
                    cursor_idx: idx,
                    info,
                }));
            }
        }

        while let Some(Reverse(top)) = heap.pop() {
            let current_id = &top.info.block_id;
            let mut winner = top.info;
            let mut same_id_cursors = vec![top.cursor_idx];

            // pull every other cursor currently pointing at the same id
            while let Some(Reverse(next)) = heap.peek() {
                if next.info.block_id != *current_id {
                    break;
                }
                let Reverse(next) = heap.pop().unwrap();
                if next.info.supersedes(winner) {
                    winner = next.info;
                }
                same_id_cursors.push(next.cursor_idx);
            }

            let keep_going = callback(winner);

            for idx in same_id_cursors {
                cursors[idx].pos += 1;
                if let Some(info) = cursors[idx].entries.get(cursors[idx].pos) {
                    heap.push(Reverse(HeapItem {
                        cursor_idx: idx,
                        info,
                    }));
                }
            }

            if !keep_going {
                break;
            }
        }
    }

    pub fn list_ids(&self, prefix: &str) -> Vec<ContentID> {
        let mut out = Vec::new();
        self.iterate(prefix, |info| {
            if !info.deleted {
                out.push(info.block_id.clone());
            }
            true
        });
        out
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

    fn reader_from(entries: &[(&str, u64, bool)]) -> Arc<IndexReader> {
        let mut b = IndexBuilder::new();
        for (name, ts, deleted) in entries {
            if *deleted {
                b.add(Info::tombstone(id(name), *ts));
            } else {
                b.add(Info::new_payload(id(name), *ts, Payload::Inline(vec![1])));
            }
        }
        Arc::new(b.build_and_open().unwrap())
    }

    #[test]
    fn merges_newest_wins_across_indexes() {
        let i1 = reader_from(&[("aa", 1, false), ("bb", 5, false)]);
        let i2 = reader_from(&[("aa", 2, true), ("cc", 1, false)]);
        let merged = MergedIndex::new(vec![i1, i2]);

        let info = merged.get_info(&id("aa")).unwrap();
        assert!(info.deleted, "newer tombstone in i2 should win over older live entry in i1");

        let mut seen = Vec::new();
        merged.iterate("", |info| {
            seen.push((info.block_id.as_str().to_string(), info.deleted));
            true
        });
        assert_eq!(
            seen,
            vec![
                ("aa".to_string(), true),
                ("bb".to_string(), false),
                ("cc".to_string(), false),
            ]
        );
    }

    #[test]
    fn missing_id_is_none() {
        let i1 = reader_from(&[("aa", 1, false)]);
        let merged = MergedIndex::new(vec![i1]);
        assert!(merged.get_info(&id("zz")).is_none());
    }
}
