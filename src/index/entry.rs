//! The invariant per-block record an index holds (§3 "Block entry").

use crate::content_id::{ContentID, PackFile};

/// Where a block's bytes live, if anywhere.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// Payload carried inside the index block itself.
    Inline(Vec<u8>),
    /// Payload lives in a pack file at `[pack_offset, pack_offset+length)`.
    Packed {
        pack_file: PackFile,
        pack_offset: u32,
        length: u32,
        format_version: u8,
    },
    /// No payload -- only valid on a deleted (tombstone) entry.
    None,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Info {
    pub block_id: ContentID,
    pub timestamp_seconds: u64,
    pub deleted: bool,
    pub payload: Payload,
}

impl Info {
    pub fn new_payload(block_id: ContentID, timestamp_seconds: u64, payload: Payload) -> Self {
        Info {
            block_id,
            timestamp_seconds,
            deleted: false,
            payload,
        }
    }

    pub fn tombstone(block_id: ContentID, timestamp_seconds: u64) -> Self {
        Info {
            block_id,
            timestamp_seconds,
            deleted: true,
            payload: Payload::None,
        }
    }

    pub fn length(&self) -> u64 {
        match &self.payload {
            Payload::Inline(bytes) => bytes.len() as u64,
            Payload::Packed { length, .. } => *length as u64,
            Payload::None => 0,
        }
    }

    pub fn pack_file(&self) -> Option<&PackFile> {
        match &self.payload {
            Payload::Packed { pack_file, .. } => Some(pack_file),
            _ => None,
        }
    }

    /// Total preorder from §3: larger `timestamp_seconds` wins; on ties, a
    /// non-deleted entry wins over a deleted one. Returns `true` iff `self`
    /// should replace `other` for the same `block_id`.
    pub fn supersedes(&self, other: &Info) -> bool {
        match self.timestamp_seconds.cmp(&other.timestamp_seconds) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => !self.deleted && other.deleted,
        }
    }
}
