//! # Outcore
//!
//! Out-of-core buffer management for programs that hold more large buffers
//! than fit in RAM.
//!
//! Start with [`BufferManager`]: it owns the eviction policy and the dump
//! directory. Every [`BufferObject`] registers with one manager, and its
//! bytes are only reachable through lock guards. While no guard is held the
//! manager may write the buffer to disk ("dump" it) to relieve memory
//! pressure; the next lock reads it back.
//!
//! ## Eviction policies
//!
//! | Name | Dumps | Parameters |
//! | ---- | ----- | ---------- |
//! | `never` | nothing | |
//! | `always` | every unlocked buffer | |
//! | `barrier` | down to a resident-byte ceiling | `barrier` |
//! | `valve` | until free memory is back above a watermark | `min_free_mem`, `hysteresis_offset` |
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use outcore::{AllocationPolicy, BufferManager, BufferManagerConfig, BufferObject, BufferState};
//! use outcore::{FixedMemoryMonitor, PolicyKind};
//!
//! let config = BufferManagerConfig::default().with_policy(PolicyKind::Never);
//! let manager = BufferManager::new(config, Arc::new(FixedMemoryMonitor::default()))?;
//!
//! let buffer = BufferObject::new(&manager);
//! buffer.allocate(1 << 20, AllocationPolicy::Heap)?;
//! buffer.write()?.fill(9);
//!
//! // Dump it explicitly; the next lock brings it back.
//! assert!(manager.dump(&buffer)?);
//! assert_eq!(buffer.state(), BufferState::Dumped);
//! assert_eq!(buffer.read()?[0], 9);
//! # Ok::<(), outcore::Error>(())
//! ```

// Re-export the buffer manager API
pub use outcore_core::{
    AllocationPolicy, BufferInfo, BufferManager, BufferManagerConfig, BufferObject, BufferSource,
    BufferState, BufferStats, EvictionPolicy, EvictionTarget, ExternalRegion, FileFormat,
    LoadingMode, LockGuard, LockMode, MemoryState, PolicyKind, ReadLock, RestoreStream,
    StreamFactory, StreamInfo, SweepReport, Trigger, UpgradableLock, WriteLock,
};

// Built-in eviction policies, for callers constructing them directly
pub use outcore_core::eviction::{
    AlwaysDump, BarrierDump, NeverDump, POLICY_NAMES, ValveDump, policy_from_config, policy_from_name,
};

// Re-export common types - memory monitors, identifiers and errors
pub use outcore_common::{
    ByteSize, BufferId, Error, FixedMemoryMonitor, MemInfo, MemoryMonitor, Result,
    SimulatedMemoryMonitor, SystemMemoryMonitor,
};
