use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Absolute byte offset of a record in the data file.
/// Examples:
/// - `let root: DiskPos = 96; // first record after a 12-slot header`
/// - `let none: DiskPos = NO_PAGE;`
/// - `let detached: DiskPos = NO_LINK; // a root's parent, a chain endpoint`
pub type DiskPos = i64;

/// Sentinel offset meaning "no page" (an empty tree's root).
pub const NO_PAGE: DiskPos = 0;

/// Sentinel offset meaning "no link" (missing parent or sibling).
pub const NO_LINK: DiskPos = -1;

/// Canonical error type shared across the index subsystems.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("parse: {0}")]
    Parse(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("index: {0}")]
    Index(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias that carries a `StoreError`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Runtime configuration for the storage stack.
///
/// # Example
/// ```
/// use common::StoreConfig;
///
/// let config = StoreConfig::builder()
///     .cache_capacity(4)
///     .reuse_freed_pages(false)
///     .build();
/// assert_eq!(config.info_slots, 12);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct StoreConfig {
    /// Number of pages the buffer pool keeps resident.
    #[builder(default = 500)]
    pub cache_capacity: usize,
    /// Whether freed page offsets are recycled (and persisted) instead of leaked.
    #[builder(default = true)]
    pub reuse_freed_pages: bool,
    /// Number of 8-byte metadata slots at the head of the data file.
    #[builder(default = 12)]
    pub info_slots: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 500,
            reuse_freed_pages: true,
            info_slots: 12,
        }
    }
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{DiskPos, NO_LINK, NO_PAGE, StoreConfig, StoreError, StoreResult};
}
