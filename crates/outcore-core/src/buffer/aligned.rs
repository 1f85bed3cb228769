//! Page-aligned heap blocks.

#![allow(unsafe_code)]

use std::alloc::{Layout, alloc_zeroed, dealloc, realloc};
use std::ptr::NonNull;

use outcore_common::utils::error::{Error, Result};

/// Alignment used by [`AllocationPolicy::PageAligned`](super::AllocationPolicy::PageAligned).
pub const PAGE_SIZE: usize = 4096;

/// A zero-initialized, page-aligned byte block of non-zero length.
pub(crate) struct AlignedBlock {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: AlignedBlock exclusively owns its allocation.
unsafe impl Send for AlignedBlock {}
// SAFETY: shared access only hands out `&[u8]`.
unsafe impl Sync for AlignedBlock {}

fn layout(len: usize) -> Result<Layout> {
    Layout::from_size_align(len, PAGE_SIZE).map_err(|e| Error::AllocationFailure {
        requested: len,
        reason: e.to_string(),
    })
}

impl AlignedBlock {
    /// Allocates `len` zeroed bytes. `len` must be non-zero.
    pub(crate) fn zeroed(len: usize) -> Result<Self> {
        debug_assert!(len > 0, "aligned blocks are never empty");
        let layout = layout(len)?;
        // SAFETY: layout has non-zero size and a power-of-two alignment.
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| Error::AllocationFailure {
            requested: len,
            reason: "page-aligned allocator returned null".to_string(),
        })?;
        Ok(Self { ptr, len })
    }

    /// Resizes in place or by moving, keeping the common prefix.
    ///
    /// Bytes past the old length are zeroed. On failure the block is left
    /// untouched.
    pub(crate) fn resize(&mut self, new_len: usize) -> Result<()> {
        debug_assert!(new_len > 0, "aligned blocks are never empty");
        if new_len == self.len {
            return Ok(());
        }
        // Validates the new size against the alignment.
        layout(new_len)?;
        let old_layout = layout(self.len)?;
        // SAFETY: ptr was allocated with `old_layout`, new_len is non-zero
        // and fits the layout rules checked above.
        let ptr = unsafe { realloc(self.ptr.as_ptr(), old_layout, new_len) };
        let ptr = NonNull::new(ptr).ok_or_else(|| Error::AllocationFailure {
            requested: new_len,
            reason: "page-aligned allocator returned null".to_string(),
        })?;
        if new_len > self.len {
            // SAFETY: the range [len, new_len) lies inside the new allocation.
            unsafe { ptr.as_ptr().add(self.len).write_bytes(0, new_len - self.len) };
        }
        self.ptr = ptr;
        self.len = new_len;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for `len` initialized bytes while self lives.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[inline]
    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBlock {
    fn drop(&mut self) {
        if let Ok(layout) = layout(self.len) {
            // SAFETY: ptr was allocated (or reallocated) with this layout.
            unsafe { dealloc(self.ptr.as_ptr(), layout) };
        }
    }
}

impl std::fmt::Debug for AlignedBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBlock").field("len", &self.len).finish()
    }
}
