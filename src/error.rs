use std::io;

use thiserror::Error;

/// Opaque failure reported by the network-fetch collaborator. The cache never
/// inspects it; single-item retrievals propagate it, batch retrievals log it.
#[derive(Debug, Error)]
#[error("fetch failed: {0}")]
pub struct FetchError(pub String);

#[derive(Debug, Error)]
pub enum CacheError {
    /// The persistent storage medium failed. Normal misses are not errors;
    /// this means the medium itself could not be read or written.
    #[error("storage error: {0}")]
    Storage(#[from] io::Error),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

pub type Result<T> = std::result::Result<T, CacheError>;
