//! Deterministic monitors for tests and external controllers.

use std::sync::atomic::{AtomicU64, Ordering};

use super::MemoryMonitor;

/// Reports whatever free-memory value was last set.
#[derive(Debug)]
pub struct FixedMemoryMonitor {
    free: AtomicU64,
    total: AtomicU64,
}

impl FixedMemoryMonitor {
    /// Creates a monitor reporting `free` bytes free out of `total`.
    #[must_use]
    pub fn new(free: u64, total: u64) -> Self {
        Self {
            free: AtomicU64::new(free),
            total: AtomicU64::new(total),
        }
    }

    /// Changes the reported free memory.
    pub fn set_free(&self, free: u64) {
        self.free.store(free, Ordering::Relaxed);
    }

    /// Changes the reported total memory.
    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }
}

impl Default for FixedMemoryMonitor {
    fn default() -> Self {
        Self::new(u64::MAX, u64::MAX)
    }
}

impl MemoryMonitor for FixedMemoryMonitor {
    fn free_memory(&self, _managed_resident: u64) -> u64 {
        self.free.load(Ordering::Relaxed)
    }

    fn total_memory(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// Models a machine with `capacity` bytes where only managed buffers use RAM.
///
/// Free memory shrinks exactly as buffers become resident, which makes
/// eviction outcomes reproducible.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedMemoryMonitor {
    capacity: u64,
}

impl SimulatedMemoryMonitor {
    /// Creates a simulated machine with `capacity` bytes of RAM.
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        Self { capacity }
    }

    /// Returns the simulated capacity.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

impl MemoryMonitor for SimulatedMemoryMonitor {
    fn free_memory(&self, managed_resident: u64) -> u64 {
        self.capacity.saturating_sub(managed_resident)
    }

    fn total_memory(&self) -> u64 {
        self.capacity
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fixed_monitor() {
        let monitor = FixedMemoryMonitor::new(100, 1000);
        assert_eq!(monitor.free_memory(50), 100);
        monitor.set_free(10);
        assert_eq!(monitor.free_memory(0), 10);
        assert_eq!(monitor.total_memory(), 1000);
    }

    #[test]
    fn test_simulated_monitor() {
        let monitor = SimulatedMemoryMonitor::new(1000);
        assert_eq!(monitor.free_memory(0), 1000);
        assert_eq!(monitor.free_memory(400), 600);
        assert_eq!(monitor.free_memory(5000), 0);
    }

    #[test]
    fn test_monitor_through_arc() {
        let shared = Arc::new(FixedMemoryMonitor::new(7, 8));
        let dynamic: Arc<dyn MemoryMonitor> = shared.clone();
        shared.set_free(3);
        assert_eq!(dynamic.free_memory(0), 3);
        assert_eq!(dynamic.name(), "fixed");
    }
}
