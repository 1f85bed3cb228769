//! # outcore-core
//!
//! Out-of-core buffer management: buffers that can be evicted ("dumped") to
//! disk under memory pressure and transparently restored on access.
//!
//! This crate depends only on `outcore-common`.
//!
//! ## Modules
//!
//! - [`buffer`] - Buffer objects, allocation policies, lock guards, restore streams
//! - [`dump`] - Disk-backed dump store
//! - [`eviction`] - Eviction policies (never, always, barrier, valve)
//! - [`manager`] - The buffer manager: registry, accounting, sweeps, statistics
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use outcore_common::memory::SystemMemoryMonitor;
//! use outcore_core::buffer::{AllocationPolicy, BufferObject};
//! use outcore_core::manager::{BufferManager, BufferManagerConfig};
//!
//! # fn main() -> outcore_common::Result<()> {
//! let manager = BufferManager::new(
//!     BufferManagerConfig::default(),
//!     Arc::new(SystemMemoryMonitor::new()),
//! )?;
//! let image = BufferObject::new(&manager);
//! image.allocate(64 << 20, AllocationPolicy::PageAligned)?;
//! image.write()?.fill(7);
//! assert_eq!(image.read()?[0], 7);
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod dump;
pub mod eviction;
pub mod manager;

// Re-export commonly used types
pub use buffer::{
    AllocationPolicy, BufferObject, BufferSource, BufferState, ExternalRegion, FileFormat,
    LoadingMode, LockGuard, LockMode, ReadLock, RestoreStream, StreamFactory, StreamInfo,
    UpgradableLock, WriteLock,
};
pub use eviction::{EvictionPolicy, EvictionTarget, MemoryState, Trigger};
pub use manager::{BufferInfo, BufferManager, BufferManagerConfig, BufferStats, PolicyKind, SweepReport};
