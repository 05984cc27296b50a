//! Pack index entry, builder, read-only reader, and merged multi-index view
//! (§4.2, §4.3).

pub mod builder;
pub mod entry;
mod format;
pub mod merged;
pub mod reader;

pub use builder::IndexBuilder;
pub use entry::{Info, Payload};
pub use merged::MergedIndex;
pub use reader::IndexReader;
