//! Disk-backed spill area for evicted buffers.
//!
//! Each dumped buffer maps to exactly one file in the dump directory, named
//! after its identifier. Files hold the raw bytes only; the length and a
//! CRC-32 of the content are kept in memory and verified on restore.

mod store;

pub use store::DumpEntry;
pub(crate) use store::DumpStore;
