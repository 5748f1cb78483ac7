//! Error types for the cache engine

use std::fmt;

#[derive(Debug)]
pub enum CacheError {
    /// The network collaborator failed to produce a response.
    Origin(String),
    /// The storage substrate failed during a read, write, delete or
    /// enumeration. Request paths treat these as best-effort.
    Storage(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Origin(msg) => write!(f, "Origin fetch error: {}", msg),
            CacheError::Storage(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {}

pub type Result<T> = std::result::Result<T, CacheError>;
