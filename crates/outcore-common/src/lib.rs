//! # outcore-common
//!
//! Foundation layer for Outcore: identifiers, errors, and memory monitors.
//!
//! This crate provides the fundamental building blocks used by all other
//! Outcore crates. It has no internal dependencies and should be kept minimal.
//!
//! ## Modules
//!
//! - [`types`] - Core type definitions (BufferId)
//! - [`memory`] - System memory monitors used by eviction policies
//! - [`utils`] - Utility functions and helpers (errors, byte sizes)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod memory;
pub mod types;
pub mod utils;

// Re-export commonly used types at crate root
pub use memory::{
    FixedMemoryMonitor, MemInfo, MemoryMonitor, SimulatedMemoryMonitor, SystemMemoryMonitor,
};
pub use types::BufferId;
pub use utils::bytesize::ByteSize;
pub use utils::error::{Error, Result};
