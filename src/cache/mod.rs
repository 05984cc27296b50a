//! Local disk caches layered in front of the object store (§4.10).

pub mod content_cache;
pub mod list_cache;

pub use content_cache::ContentCache;
pub use list_cache::ListCache;
