//! Free-memory estimates from the operating system.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::utils::error::Result;

use super::MemoryMonitor;

static MEMINFO_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?P<key>[A-Za-z_()]+):\s+(?P<value>\d+)(?:\s+kB)?\s*$")
        .unwrap_or_else(|e| unreachable!("meminfo pattern is valid: {e}"))
});

/// Snapshot of the kernel's memory counters, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemInfo {
    /// Total usable RAM.
    pub total: u64,
    /// Completely unused RAM.
    pub free: u64,
    /// Kernel estimate of memory available without swapping.
    pub available: Option<u64>,
    /// Page cache.
    pub cached: u64,
    /// Block device buffers.
    pub buffers: u64,
    /// Total swap space.
    pub swap_total: u64,
    /// Unused swap space.
    pub swap_free: u64,
}

impl MemInfo {
    /// Parses the text format of `/proc/meminfo`.
    ///
    /// Unknown keys are ignored; missing keys stay zero.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut info = Self::default();
        for caps in MEMINFO_LINE.captures_iter(text) {
            let Ok(kib) = caps["value"].parse::<u64>() else {
                continue;
            };
            let bytes = kib.saturating_mul(1024);
            match &caps["key"] {
                "MemTotal" => info.total = bytes,
                "MemFree" => info.free = bytes,
                "MemAvailable" => info.available = Some(bytes),
                "Cached" => info.cached = bytes,
                "Buffers" => info.buffers = bytes,
                "SwapTotal" => info.swap_total = bytes,
                "SwapFree" => info.swap_free = bytes,
                _ => {}
            }
        }
        info
    }

    /// Reads `/proc/meminfo`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read.
    pub fn read() -> Result<Self> {
        let text = std::fs::read_to_string("/proc/meminfo")?;
        Ok(Self::parse(&text))
    }

    /// Estimated free bytes: `MemAvailable`, or `MemFree + Cached` on kernels
    /// that predate it.
    #[must_use]
    pub fn free_estimate(&self) -> u64 {
        self.available
            .unwrap_or_else(|| self.free.saturating_add(self.cached))
    }
}

/// Monitor backed by the operating system.
///
/// On Linux the estimate comes from `/proc/meminfo`. Elsewhere, or when the
/// file cannot be read, memory is reported as unlimited so that
/// pressure-driven policies never trigger.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemoryMonitor;

impl SystemMemoryMonitor {
    /// Creates a system monitor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Returns the current kernel counters, if available on this platform.
    #[must_use]
    pub fn snapshot(&self) -> Option<MemInfo> {
        if !cfg!(target_os = "linux") {
            return None;
        }
        match MemInfo::read() {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::warn!("Failed to read /proc/meminfo: {}", e);
                None
            }
        }
    }
}

impl MemoryMonitor for SystemMemoryMonitor {
    fn free_memory(&self, _managed_resident: u64) -> u64 {
        self.snapshot().map_or(u64::MAX, |info| info.free_estimate())
    }

    fn total_memory(&self) -> u64 {
        self.snapshot().map_or(u64::MAX, |info| info.total)
    }

    fn name(&self) -> &'static str {
        "system"
    }
}
