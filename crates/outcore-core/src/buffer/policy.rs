//! Allocation policies.
//!
//! A policy is the strategy that performs the raw allocate / reallocate /
//! destroy operations on a buffer's [`Storage`]. The set is closed: heap,
//! page-aligned, and external (no-op) memory.

use std::fmt;

use outcore_common::utils::error::{Error, Result};
use serde::{Deserialize, Serialize};

use super::aligned::AlignedBlock;
use super::storage::Storage;

/// How a buffer's backing memory is obtained and freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationPolicy {
    /// The global allocator.
    #[default]
    Heap,
    /// Page-aligned allocations (4 KiB alignment).
    PageAligned,
    /// Memory owned by the caller. Cannot allocate, resize, or be dumped.
    External,
}

impl AllocationPolicy {
    /// Returns the policy name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Heap => "heap",
            Self::PageAligned => "page_aligned",
            Self::External => "external",
        }
    }

    /// Returns `true` if the manager can recreate this memory after a dump.
    #[must_use]
    pub const fn is_managed(self) -> bool {
        !matches!(self, Self::External)
    }

    pub(crate) const fn to_u8(self) -> u8 {
        match self {
            Self::Heap => 0,
            Self::PageAligned => 1,
            Self::External => 2,
        }
    }

    pub(crate) const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Heap,
            1 => Self::PageAligned,
            _ => Self::External,
        }
    }

    /// Replaces `storage` with `size` fresh zeroed bytes.
    ///
    /// Any previous content is freed first. A `size` of zero leaves the
    /// storage empty.
    pub(crate) fn allocate(self, storage: &mut Storage, size: usize) -> Result<()> {
        if !self.is_managed() {
            return Err(self.unsupported("allocate"));
        }
        self.destroy(storage);
        if size == 0 {
            return Ok(());
        }
        *storage = match self {
            Self::Heap => Storage::Heap(heap_zeroed(size)?),
            Self::PageAligned => Storage::Aligned(AlignedBlock::zeroed(size)?),
            Self::External => unreachable!("rejected above"),
        };
        Ok(())
    }

    /// Resizes `storage`, keeping the first `min(old, new)` bytes.
    ///
    /// On failure the storage is left as it was.
    pub(crate) fn reallocate(self, storage: &mut Storage, new_size: usize) -> Result<()> {
        if !self.is_managed() {
            return Err(self.unsupported("reallocate"));
        }
        if new_size == 0 {
            self.destroy(storage);
            return Ok(());
        }
        match (self, &mut *storage) {
            (_, Storage::Empty) => self.allocate(storage, new_size),
            (Self::Heap, Storage::Heap(bytes)) => {
                let mut vec = std::mem::take(bytes).into_vec();
                let grown = heap_resize(&mut vec, new_size);
                *bytes = vec.into_boxed_slice();
                grown
            }
            (Self::PageAligned, Storage::Aligned(block)) => block.resize(new_size),
            // Storage from another policy (after a swap or adoption): copy over.
            _ => {
                let mut fresh = Storage::Empty;
                self.allocate(&mut fresh, new_size)?;
                let keep = storage.len().min(new_size);
                fresh.as_mut_slice()[..keep].copy_from_slice(&storage.as_slice()[..keep]);
                *storage = fresh;
                Ok(())
            }
        }
    }

    /// Frees `storage`. Idempotent on empty storage.
    pub(crate) fn destroy(self, storage: &mut Storage) {
        *storage = Storage::Empty;
    }

    fn unsupported(self, operation: &'static str) -> Error {
        Error::UnsupportedOperation {
            policy: self.name(),
            operation,
        }
    }
}

impl fmt::Display for AllocationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn heap_zeroed(size: usize) -> Result<Box<[u8]>> {
    let mut vec = Vec::new();
    heap_resize(&mut vec, size)?;
    Ok(vec.into_boxed_slice())
}

fn heap_resize(vec: &mut Vec<u8>, new_size: usize) -> Result<()> {
    if new_size > vec.len() {
        vec.try_reserve_exact(new_size - vec.len())
            .map_err(|e| Error::AllocationFailure {
                requested: new_size,
                reason: e.to_string(),
            })?;
        vec.resize(new_size, 0);
    } else {
        vec.truncate(new_size);
        vec.shrink_to_fit();
    }
    Ok(())
}
