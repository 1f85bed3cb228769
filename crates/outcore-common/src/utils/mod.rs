//! Utility functions and helpers.
//!
//! - [`error`] - The workspace-wide error type
//! - [`bytesize`] - Human-readable byte quantities ("512MiB", "2B")

pub mod bytesize;
pub mod error;
