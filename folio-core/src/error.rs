use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure to bring a document into the store.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("document not found at {0:?}")]
    NotFound(PathBuf),
    #[error("document is corrupt or unsupported: {reason}")]
    Corrupt { reason: String },
    #[error("document is password protected")]
    PasswordRequired,
    #[error("failed to start the render worker")]
    WorkerSpawn(#[source] io::Error),
}

/// A page decode that did not produce a raster.
///
/// Never surfaced to the UI: the worker logs it and drops the request, and a
/// later cache miss will ask again.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("failed to decode page {page}: {reason}")]
    TransientFailure { page: usize, reason: String },
}

impl DecodeError {
    pub fn transient(page: usize, reason: impl Into<String>) -> Self {
        Self::TransientFailure {
            page,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("page {page} is out of range (document has {page_count} pages)")]
pub struct InvalidPageIndex {
    pub page: usize,
    pub page_count: usize,
}
