//! Identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of a managed buffer.
///
/// Identifiers are handed out by the buffer manager in increasing order and
/// are never reused within the lifetime of a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BufferId(u64);

impl BufferId {
    /// Creates a new buffer ID.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for BufferId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}
