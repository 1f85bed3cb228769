//! CLI command implementations.

pub mod meminfo;
pub mod policies;
pub mod simulate;
