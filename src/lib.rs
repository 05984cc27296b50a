//! Content-addressable block manager for a backup repository.
//!
//! A [`Manager`] sits in front of an [`ObjectStore`] and turns arbitrary byte
//! blocks into deduplicated, encrypted, content-addressed storage: identical
//! plaintext always maps to the same [`ContentID`], writes are batched into
//! pack files and flushed into index blocks, and a merged view of committed
//! index blocks answers reads without touching the store on every call.
//!
//! The embedder supplies the [`ObjectStore`] (the actual backing storage --
//! local disk, object storage, whatever) and a [`Clock`] (wall-clock by
//! default); everything else -- packing, encryption, caching, compaction --
//! is implemented here.

pub mod cache;
pub mod cancel;
pub mod clock;
pub mod codec;
pub mod committed;
pub mod config;
pub mod content_id;
pub mod error;
mod fsutil;
pub mod index;
pub mod manager;
pub mod object_store;
pub mod stats;

pub use cancel::CancelToken;
pub use clock::{Clock, SystemClock};
pub use config::{CommittedIndexBackend, FormatVersion, ManagerConfig};
pub use content_id::ContentID;
pub use error::{Error, Result};
pub use index::{Info, Payload};
pub use manager::{CompactOptions, Manager};
pub use object_store::{ObjectMeta, ObjectStore};
pub use stats::StatsSnapshot;
