//! Core type definitions for Outcore.
//!
//! This module contains the identifier types shared across the workspace:
//! - [`BufferId`] - unique key of a managed buffer, also used to name its dump file

mod id;

pub use id::BufferId;
