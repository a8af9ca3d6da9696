//! Host-agnostic error kinds for the read-only APFS core.

use thiserror::Error;

/// Every failure the core can surface. Flat on purpose: callers switch on
/// `kind()`-like matches, not on a tree of nested causes.
#[derive(Debug, Error)]
pub enum Error {
    #[error("bad parameters: {0}")]
    BadParams(String),

    #[error("corrupt metadata: {0}")]
    CorruptMetadata(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("read-only: {0}")]
    ReadOnly(String),

    #[error("insufficient buffer: need {needed}, got {available}")]
    InsufficientBuffer { needed: usize, available: usize },

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("unrecognized filesystem: {0}")]
    FsUnknown(String),

    #[error("out of memory")]
    NoMemory,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Error::CorruptMetadata(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }
}
