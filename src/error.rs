//! Error taxonomy surfaced across the public API.
//!
//! Internally most code propagates `anyhow::Error` (via `.context(...)`) so
//! causal chains survive up to the boundary where we classify the failure
//! into one of the variants below.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("block not found: {0}")]
    NotFound(String),

    #[error("invalid checksum for block {0}")]
    InvalidChecksum(String),

    #[error("invalid content identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("invalid block prefix '{0}'")]
    InvalidPrefix(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("unsupported format version {0}")]
    UnsupportedFormat(u8),

    #[error("io error: {0}")]
    IoError(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
