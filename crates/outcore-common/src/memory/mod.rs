//! System memory monitors.
//!
//! Eviction policies that react to memory pressure need an estimate of how
//! much physical memory is still free. A [`MemoryMonitor`] supplies that
//! estimate; the buffer manager passes in its own resident byte count so
//! that simulated monitors can account for managed buffers.
//!
//! | Monitor | Source of truth |
//! |---------|-----------------|
//! | [`SystemMemoryMonitor`] | `/proc/meminfo` on Linux, unlimited elsewhere |
//! | [`FixedMemoryMonitor`] | a value set by the caller |
//! | [`SimulatedMemoryMonitor`] | `capacity - managed resident bytes` |

mod fixed;
mod system;

pub use fixed::{FixedMemoryMonitor, SimulatedMemoryMonitor};
pub use system::{MemInfo, SystemMemoryMonitor};

/// Source of free-memory estimates for eviction decisions.
pub trait MemoryMonitor: Send + Sync {
    /// Returns the estimated number of free bytes.
    ///
    /// `managed_resident` is the number of bytes currently resident in
    /// buffers owned by the calling manager.
    fn free_memory(&self, managed_resident: u64) -> u64;

    /// Returns the total physical memory, or `u64::MAX` if unknown.
    fn total_memory(&self) -> u64;

    /// Short name used in diagnostics.
    fn name(&self) -> &'static str;
}

impl<M: MemoryMonitor + ?Sized> MemoryMonitor for std::sync::Arc<M> {
    fn free_memory(&self, managed_resident: u64) -> u64 {
        (**self).free_memory(managed_resident)
    }

    fn total_memory(&self) -> u64 {
        (**self).total_memory()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
