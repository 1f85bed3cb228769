//! Statistics and introspection.

use std::fmt::Write as _;
use std::path::PathBuf;

use outcore_common::types::BufferId;
use outcore_common::utils::bytesize::ByteSize;
use serde::Serialize;

use crate::buffer::{AllocationPolicy, BufferState};

/// Aggregate figures for a manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    /// Registered buffers.
    pub registered: usize,
    /// Buffers holding memory (resident or dumped).
    pub allocated: usize,
    /// Bytes held by all buffers, resident or dumped.
    pub managed_bytes: u64,
    /// Bytes currently in RAM.
    pub resident_bytes: u64,
    /// Bytes currently in the dump store.
    pub dumped_bytes: u64,
    /// Successful dumps since creation.
    pub dump_count: u64,
    /// Successful restores since creation.
    pub restore_count: u64,
    /// Failed dumps since creation.
    pub dump_failures: u64,
}

/// Snapshot of one registered buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BufferInfo {
    /// Buffer identifier.
    pub id: BufferId,
    /// Logical size in bytes.
    pub size: usize,
    /// Residency state.
    pub state: BufferState,
    /// Allocation policy.
    pub policy: AllocationPolicy,
    /// Outstanding lock guards.
    pub lock_count: usize,
    /// Whether sweeps may dump it.
    pub evictable: bool,
    /// Access clock value of the last lock acquisition.
    pub last_access: u64,
    /// Dump file, if one exists.
    pub dump_path: Option<PathBuf>,
}

/// Renders buffer infos as an aligned text table.
pub(crate) fn render_table(infos: &[BufferInfo], stats: &BufferStats) -> String {
    const HEADERS: [&str; 7] = ["id", "size", "state", "policy", "locks", "evictable", "access"];
    let rows: Vec<[String; 7]> = infos
        .iter()
        .map(|info| {
            [
                info.id.to_string(),
                ByteSize(info.size as u64).to_string(),
                info.state.to_string(),
                info.policy.to_string(),
                info.lock_count.to_string(),
                if info.evictable { "yes" } else { "no" }.to_string(),
                info.last_access.to_string(),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    let mut line = |cells: &[&str]| {
        let parts: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        let _ = writeln!(out, "{}", parts.join(" | ").trim_end());
    };
    line(&HEADERS);
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        line(&cells);
    }
    let _ = write!(
        out,
        "{} buffer(s), {} resident, {} dumped",
        stats.registered,
        ByteSize(stats.resident_bytes),
        ByteSize(stats.dumped_bytes)
    );
    out
}
