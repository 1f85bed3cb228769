//! Backing memory of a buffer.

use super::aligned::AlignedBlock;

/// Memory owned outside the buffer manager.
///
/// Wrapped regions take part in the lock protocol but are never dumped or
/// resized: the manager cannot recreate them after freeing.
pub trait ExternalRegion: Send + Sync + 'static {
    /// Returns the region's bytes.
    fn bytes(&self) -> &[u8];

    /// Returns the region's bytes mutably.
    fn bytes_mut(&mut self) -> &mut [u8];
}

impl ExternalRegion for Vec<u8> {
    fn bytes(&self) -> &[u8] {
        self
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

impl ExternalRegion for Box<[u8]> {
    fn bytes(&self) -> &[u8] {
        self
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

impl ExternalRegion for memmap2::MmapMut {
    fn bytes(&self) -> &[u8] {
        self
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

/// The raw memory a buffer currently holds.
#[derive(Default)]
pub(crate) enum Storage {
    /// No memory (unallocated or dumped).
    #[default]
    Empty,
    /// Global-allocator memory.
    Heap(Box<[u8]>),
    /// Page-aligned memory.
    Aligned(AlignedBlock),
    /// Caller-owned memory.
    External(Box<dyn ExternalRegion>),
}

impl Storage {
    pub(crate) fn len(&self) -> usize {
        self.as_slice().len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        match self {
            Self::Empty => &[],
            Self::Heap(bytes) => bytes,
            Self::Aligned(block) => block.as_slice(),
            Self::External(region) => region.bytes(),
        }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Self::Empty => &mut [],
            Self::Heap(bytes) => bytes,
            Self::Aligned(block) => block.as_mut_slice(),
            Self::External(region) => region.bytes_mut(),
        }
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Empty => "empty",
            Self::Heap(_) => "heap",
            Self::Aligned(_) => "aligned",
            Self::External(_) => "external",
        };
        f.debug_struct("Storage")
            .field("kind", &kind)
            .field("len", &self.len())
            .finish()
    }
}
