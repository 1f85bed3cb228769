//! The buffer manager.
//!
//! A [`BufferManager`] is an explicit, shareable context: buffers are
//! constructed against it, so tests can run isolated managers side by side.
//!
//! # Lock order
//!
//! ```text
//! buffer slot ──▶ manager mutex ──▶ policy (read) ──▶ dump entries
//! ```
//!
//! The manager mutex may be taken while holding a buffer's slot lock, never
//! the other way round: sweeps running under the mutex only *try* to lock
//! candidate slots and skip the ones that are busy. The policy lock is never
//! held while waiting for the manager mutex. The live configuration lock is
//! a leaf and is never held across another acquisition.

mod config;
mod registry;
mod stats;
mod sweep;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use outcore_common::memory::{MemoryMonitor, SystemMemoryMonitor};
use outcore_common::types::BufferId;
use outcore_common::utils::error::{Error, Result};
use parking_lot::{Mutex, RwLock};

pub use config::{BufferManagerConfig, PolicyKind};
pub use stats::{BufferInfo, BufferStats};
pub use sweep::SweepReport;

use self::registry::Registry;
use crate::buffer::{
    BufferObject, BufferShared, BufferState, FileFormat, LoadingMode, RestoreStream, Slot, StreamInfo,
};
use crate::dump::{DumpEntry, DumpStore};
use crate::eviction::{self, EvictionPolicy, MemoryState, Trigger};

/// State guarded by the manager mutex.
pub(crate) struct ManagerState {
    registry: Registry,
    last_report: Option<SweepReport>,
}

#[derive(Default)]
struct Counters {
    dumps: AtomicU64,
    restores: AtomicU64,
    dump_failures: AtomicU64,
}

impl Counters {
    fn record_dump(&self) {
        self.dumps.fetch_add(1, Ordering::Relaxed);
    }

    fn record_restore(&self) {
        self.restores.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dump_failure(&self) {
        self.dump_failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// Registry of buffers and driver of the eviction policy.
///
/// Every size change of a registered buffer is reported here synchronously;
/// when resident bytes grow and the manager is enabled, the active policy
/// is consulted and other buffers may be dumped before the reporting call
/// returns.
pub struct BufferManager {
    config: RwLock<BufferManagerConfig>,
    enabled: AtomicBool,
    shut_down: AtomicBool,
    monitor: Arc<dyn MemoryMonitor>,
    policy: RwLock<Box<dyn EvictionPolicy>>,
    state: Mutex<ManagerState>,
    dumps: DumpStore,
    next_id: AtomicU64,
    clock: AtomicU64,
    counters: Counters,
}

impl BufferManager {
    /// Creates a manager.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the dump directory cannot be created.
    pub fn new(config: BufferManagerConfig, monitor: Arc<dyn MemoryMonitor>) -> Result<Arc<Self>> {
        let dumps = DumpStore::open(config.dump_dir.as_deref(), config.sync_dumps)?;
        let policy = eviction::policy_from_config(&config);
        tracing::info!(
            "Buffer manager started (policy: {}, monitor: {}, dumps: {})",
            policy.name(),
            monitor.name(),
            dumps.dir().display()
        );
        Ok(Arc::new(Self {
            enabled: AtomicBool::new(config.enabled),
            shut_down: AtomicBool::new(false),
            monitor,
            policy: RwLock::new(policy),
            state: Mutex::new(ManagerState {
                registry: Registry::default(),
                last_report: None,
            }),
            dumps,
            next_id: AtomicU64::new(1),
            clock: AtomicU64::new(0),
            counters: Counters::default(),
            config: RwLock::new(config),
        }))
    }

    /// Creates a manager with default configuration and the system monitor.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the dump directory cannot be created.
    pub fn with_defaults() -> Result<Arc<Self>> {
        Self::new(
            BufferManagerConfig::default(),
            Arc::new(SystemMemoryMonitor::new()),
        )
    }

    /// Returns the live configuration.
    ///
    /// Reflects runtime changes made through [`set_enabled`](Self::set_enabled),
    /// [`set_policy_by_name`](Self::set_policy_by_name),
    /// [`set_policy_param`](Self::set_policy_param) and
    /// [`set_loading_mode`](Self::set_loading_mode). The dump directory and
    /// sync flag are fixed at construction.
    #[must_use]
    pub fn config(&self) -> BufferManagerConfig {
        self.config.read().clone()
    }

    /// Returns when source-backed buffers are loaded.
    #[must_use]
    pub fn loading_mode(&self) -> LoadingMode {
        self.config.read().loading_mode
    }

    /// Sets when buffers declared from a source from now on are loaded.
    pub fn set_loading_mode(&self, mode: LoadingMode) {
        self.config.write().loading_mode = mode;
        tracing::info!("Loading mode set to {}", mode);
    }

    pub(crate) fn min_dump_size(&self) -> usize {
        self.config.read().min_dump_size
    }

    /// Returns the dump directory.
    #[must_use]
    pub fn dump_dir(&self) -> &Path {
        self.dumps.dir()
    }

    /// Returns the file a buffer is (or would be) dumped to.
    #[must_use]
    pub fn dump_path(&self, id: BufferId) -> PathBuf {
        self.dumps.path_for(id)
    }

    /// Returns the dump-store entry of a buffer, if it has one.
    #[must_use]
    pub fn dump_entry(&self, id: BufferId) -> Option<DumpEntry> {
        self.dumps.entry(id)
    }

    /// Returns `true` if size changes trigger automatic sweeps.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Enables or disables automatic sweeps.
    ///
    /// Explicit [`sweep`](Self::sweep) and [`dump`](Self::dump) calls work
    /// either way.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        self.config.write().enabled = enabled;
        tracing::info!("Automatic eviction {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Returns `true` after [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Returns the active policy's name.
    #[must_use]
    pub fn policy_name(&self) -> &'static str {
        self.policy.read().name()
    }

    /// Returns the active policy's parameters and their current values.
    #[must_use]
    pub fn policy_params(&self) -> Vec<(&'static str, String)> {
        let policy = self.policy.read();
        policy
            .param_names()
            .iter()
            .map(|&name| (name, policy.param(name).unwrap_or_default()))
            .collect()
    }

    /// Returns one parameter of the active policy.
    #[must_use]
    pub fn policy_param(&self, name: &str) -> Option<String> {
        self.policy.read().param(name)
    }

    /// Replaces the active policy and runs a refresh sweep.
    ///
    /// Returns the refresh report, or `None` if automatic sweeps are
    /// disabled.
    pub fn set_policy(&self, policy: Box<dyn EvictionPolicy>) -> Option<SweepReport> {
        tracing::info!("Eviction policy set to {}", policy.name());
        *self.policy.write() = policy;
        self.refresh()
    }

    /// Replaces the active policy by name, with parameters from the live
    /// configuration.
    ///
    /// Parameters set earlier through [`set_policy_param`](Self::set_policy_param)
    /// carry over when switching back to a policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for unknown names.
    pub fn set_policy_by_name(&self, name: &str) -> Result<Option<SweepReport>> {
        let kind: PolicyKind = name.parse()?;
        let policy = {
            let mut config = self.config.write();
            config.policy = kind;
            eviction::policy_from_config(&config)
        };
        Ok(self.set_policy(policy))
    }

    /// Sets a parameter of the active policy and runs a refresh sweep.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for unknown names or malformed
    /// values; the policy is left unchanged.
    pub fn set_policy_param(&self, name: &str, value: &str) -> Result<Option<SweepReport>> {
        self.policy.write().set_param(name, value)?;
        if let Err(e) = self.config.write().record_policy_param(name, value) {
            tracing::debug!("Parameter {} not recorded in the configuration: {}", name, e);
        }
        tracing::info!("Eviction parameter {} set to {}", name, value);
        Ok(self.refresh())
    }

    fn refresh(&self) -> Option<SweepReport> {
        if !self.is_enabled() || self.is_shut_down() {
            return None;
        }
        let mut state = self.state.lock();
        self.sweep_locked(&mut state, Trigger::Refresh, None)
    }

    /// Runs an eviction sweep now, whether or not automatic sweeps are
    /// enabled.
    pub fn sweep(&self) -> SweepReport {
        let mut state = self.state.lock();
        self.sweep_locked(&mut state, Trigger::Manual, None)
            .unwrap_or_else(|| SweepReport::idle(Trigger::Manual))
    }

    /// Returns the report of the most recent sweep that had a target.
    #[must_use]
    pub fn last_sweep(&self) -> Option<SweepReport> {
        self.state.lock().last_report.clone()
    }

    /// Dumps one buffer now.
    ///
    /// Returns `false` without doing anything if the buffer is locked, not
    /// resident, smaller than the dump threshold, or not evictable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DumpIo`] if writing fails (the buffer stays
    /// resident), or [`Error::InvalidParameter`] if the buffer belongs to
    /// another manager.
    pub fn dump(&self, buffer: &BufferObject) -> Result<bool> {
        self.ensure_owner(buffer)?;
        let shared = buffer.shared();
        if !shared.is_dump_candidate(self.min_dump_size()) {
            return Ok(false);
        }
        let Some(mut slot) = shared.slot.try_write() else {
            return Ok(false);
        };
        if slot.state != BufferState::Resident || shared.lock_count() > 0 {
            return Ok(false);
        }
        match self.dumps.dump(shared.id, &mut slot) {
            Ok(bytes) => {
                shared.publish(&slot);
                self.counters.record_dump();
                self.account(shared.id, 0, bytes);
                Ok(true)
            }
            Err(e) => {
                self.counters.record_dump_failure();
                Err(e)
            }
        }
    }

    /// Restores one dumped buffer now.
    ///
    /// Returns `false` if the buffer was not dumped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RestoreIo`] if the content cannot be read back.
    pub fn restore(&self, buffer: &BufferObject) -> Result<bool> {
        self.ensure_owner(buffer)?;
        if buffer.state() != BufferState::Dumped {
            return Ok(false);
        }
        let shared = buffer.shared();
        let mut slot = shared.slot.write();
        if slot.state != BufferState::Dumped {
            return Ok(false);
        }
        self.restore_slot(shared, &mut slot)?;
        Ok(true)
    }

    /// Opens a readable stream over a buffer, restoring it if dumped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RestoreIo`] if the content cannot be read back.
    pub fn open_restore_stream<'a>(&self, buffer: &'a BufferObject) -> Result<RestoreStream<'a>> {
        self.ensure_owner(buffer)?;
        buffer.restore_stream()
    }

    /// Describes where a buffer's content can be read from.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if the buffer belongs to another
    /// manager.
    pub fn stream_info(&self, buffer: &BufferObject) -> Result<StreamInfo> {
        self.ensure_owner(buffer)?;
        Ok(buffer.stream_info())
    }

    /// Returns the bytes currently resident in managed buffers.
    #[must_use]
    pub fn resident_bytes(&self) -> u64 {
        self.state.lock().registry.resident_total()
    }

    /// Returns the figures the policy currently plans against.
    #[must_use]
    pub fn memory_state(&self) -> MemoryState {
        let resident_bytes = self.resident_bytes();
        MemoryState {
            resident_bytes,
            free_bytes: self.monitor.free_memory(resident_bytes),
            total_bytes: self.monitor.total_memory(),
        }
    }

    /// Returns aggregate statistics.
    #[must_use]
    pub fn stats(&self) -> BufferStats {
        let state = self.state.lock();
        let registry = &state.registry;
        BufferStats {
            registered: registry.len(),
            allocated: registry.allocated(),
            managed_bytes: registry.resident_total() + registry.dumped_total(),
            resident_bytes: registry.resident_total(),
            dumped_bytes: registry.dumped_total(),
            dump_count: self.counters.dumps.load(Ordering::Relaxed),
            restore_count: self.counters.restores.load(Ordering::Relaxed),
            dump_failures: self.counters.dump_failures.load(Ordering::Relaxed),
        }
    }

    /// Returns a snapshot of every registered buffer, in id order.
    #[must_use]
    pub fn buffer_infos(&self) -> Vec<BufferInfo> {
        let live = self.state.lock().registry.live();
        live.iter()
            .map(|shared| BufferInfo {
                id: shared.id,
                size: shared.size(),
                state: shared.state(),
                policy: shared.policy(),
                lock_count: shared.lock_count(),
                evictable: shared.is_evictable() && shared.policy().is_managed(),
                last_access: shared.last_access(),
                dump_path: self.dumps.entry(shared.id).map(|entry| entry.path),
            })
            .collect()
    }

    /// Renders the registered buffers as a text table.
    #[must_use]
    pub fn describe(&self) -> String {
        stats::render_table(&self.buffer_infos(), &self.stats())
    }

    /// Releases every still-registered buffer and deletes all dump files.
    ///
    /// Leaked buffers are released with a warning; locked buffers are left
    /// alone. Afterwards allocations fail with [`Error::ShutDown`].
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let live = self.state.lock().registry.live();
        let mut released = 0usize;
        for shared in live {
            if shared.lock_count() > 0 {
                tracing::error!(
                    "Buffer {} still locked at shutdown, leaving it allocated",
                    shared.id
                );
                continue;
            }
            let Some(mut slot) = shared.slot.try_write() else {
                tracing::error!("Buffer {} busy at shutdown, leaving it allocated", shared.id);
                continue;
            };
            if slot.state == BufferState::Unallocated {
                continue;
            }
            tracing::warn!(
                "Releasing leaked buffer {} ({} bytes, {})",
                shared.id,
                slot.size,
                slot.state
            );
            self.dumps.forget(shared.id);
            slot.clear();
            shared.publish(&slot);
            self.account(shared.id, 0, 0);
            released += 1;
        }
        self.dumps.clear();
        tracing::info!(
            "Buffer manager shut down ({} leaked buffer(s) released)",
            released
        );
    }

    fn ensure_owner(&self, buffer: &BufferObject) -> Result<()> {
        if std::ptr::eq(Arc::as_ptr(buffer.manager()), self) {
            Ok(())
        } else {
            Err(Error::InvalidParameter {
                name: "buffer".to_string(),
                value: format!("buffer {} belongs to another manager", buffer.id()),
            })
        }
    }

    // === Crate-internal hooks used by buffers and guards ===

    pub(crate) fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            Err(Error::ShutDown)
        } else {
            Ok(())
        }
    }

    pub(crate) fn next_buffer_id(&self) -> BufferId {
        BufferId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Advances the access clock.
    pub(crate) fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn register(&self, shared: &Arc<BufferShared>) {
        self.state.lock().registry.register(shared);
    }

    pub(crate) fn unregister(&self, id: BufferId) {
        self.state.lock().registry.unregister(id);
    }

    /// Records new byte counts; sweeps if resident bytes grew.
    ///
    /// The reporting buffer is excluded from the sweep.
    pub(crate) fn report(&self, id: BufferId, resident: u64, dumped: u64, trigger: Trigger) {
        let mut state = self.state.lock();
        let grew = state.registry.update(id, resident, dumped);
        if grew && self.is_enabled() && !self.is_shut_down() {
            self.sweep_locked(&mut state, trigger, Some(id));
        }
    }

    /// Records new byte counts without sweeping.
    pub(crate) fn account(&self, id: BufferId, resident: u64, dumped: u64) {
        self.state.lock().registry.update(id, resident, dumped);
    }

    /// Restores a dumped slot and reports the regained bytes.
    pub(crate) fn restore_slot(&self, shared: &BufferShared, slot: &mut Slot) -> Result<()> {
        let bytes = self.dumps.restore(shared.id, slot)?;
        shared.publish(slot);
        self.counters.record_restore();
        self.report(shared.id, bytes, 0, Trigger::Restore);
        Ok(())
    }

    /// Describes the content location of a locked slot.
    pub(crate) fn slot_stream_info(&self, id: BufferId, slot: &Slot) -> StreamInfo {
        let (path, format) = match (&slot.source, slot.state) {
            (Some(source), _) => (source.path().map(Path::to_path_buf), source.format()),
            (None, BufferState::Dumped) => match self.dumps.entry(id) {
                Some(entry) => (Some(entry.path), FileFormat::Raw),
                None => (None, FileFormat::Other),
            },
            (None, _) => (None, FileFormat::Other),
        };
        StreamInfo {
            size: slot.size,
            state: slot.state,
            path,
            format,
            user_source: slot.source.is_some(),
        }
    }

    pub(crate) fn forget_dump(&self, id: BufferId) {
        self.dumps.forget(id);
    }

    /// Called when a buffer's last lock is released.
    pub(crate) fn on_unlock(&self, _id: BufferId) {
        if !self.is_enabled() || self.is_shut_down() {
            return;
        }
        if !self.policy.read().reacts_to(Trigger::Unlock) {
            return;
        }
        let mut state = self.state.lock();
        self.sweep_locked(&mut state, Trigger::Unlock, None);
    }

    #[cfg(test)]
    pub(crate) fn dump_file_count(&self) -> usize {
        self.dumps.len()
    }
}

impl std::fmt::Debug for BufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferManager")
            .field("policy", &self.policy_name())
            .field("enabled", &self.is_enabled())
            .field("shut_down", &self.is_shut_down())
            .field("dump_dir", &self.dump_dir())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{AllocationPolicy, BufferSource};
    use crate::eviction::{EvictionTarget, NeverDump};
    use std::io::{self, Read};
    use outcore_common::memory::{FixedMemoryMonitor, SimulatedMemoryMonitor};

    const KIB: usize = 1024;

    fn manager_with(config: BufferManagerConfig, monitor: Arc<dyn MemoryMonitor>) -> Arc<BufferManager> {
        BufferManager::new(config, monitor).unwrap()
    }

    fn filled(manager: &Arc<BufferManager>, size: usize, byte: u8) -> BufferObject {
        let buffer = BufferObject::new(manager);
        buffer.set_buffer(vec![byte; size].into_boxed_slice()).unwrap();
        buffer
    }

    #[test]
    fn test_explicit_dump_and_restore() {
        let manager = manager_with(
            BufferManagerConfig::default().with_policy(PolicyKind::Never),
            Arc::new(FixedMemoryMonitor::default()),
        );
        let buffer = filled(&manager, 8 * KIB, 0xAB);

        assert!(manager.dump(&buffer).unwrap());
        assert!(!manager.dump(&buffer).unwrap());
        assert_eq!(buffer.state(), BufferState::Dumped);
        let stats = manager.stats();
        assert_eq!(stats.resident_bytes, 0);
        assert_eq!(stats.dumped_bytes, 8192);
        assert_eq!(stats.managed_bytes, 8192);
        assert_eq!(stats.dump_count, 1);
        let entry = manager.dump_entry(buffer.id()).unwrap();
        assert_eq!(entry.len, 8192);
        assert_eq!(entry.checksum, crc32fast::hash(&[0xAB; 8192]));

        assert!(manager.restore(&buffer).unwrap());
        assert!(!manager.restore(&buffer).unwrap());
        assert_eq!(manager.stats().restore_count, 1);
        assert!(buffer.read().unwrap().iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_small_and_opted_out_buffers_stay_resident() {
        let manager = manager_with(
            BufferManagerConfig::default().with_policy(PolicyKind::Never),
            Arc::new(FixedMemoryMonitor::default()),
        );
        let small = filled(&manager, 100, 1);
        let pinned = filled(&manager, 8 * KIB, 2);
        pinned.set_evictable(false);

        assert!(!manager.dump(&small).unwrap());
        assert!(!manager.dump(&pinned).unwrap());

        manager.set_policy_by_name("always").unwrap();
        let report = manager.sweep();
        assert!(report.dumped.is_empty());
        assert_eq!(small.state(), BufferState::Resident);
        assert_eq!(pinned.state(), BufferState::Resident);
    }

    #[test]
    fn test_dump_rejects_foreign_buffer() {
        let config = BufferManagerConfig::default().with_policy(PolicyKind::Never);
        let a = manager_with(config.clone(), Arc::new(FixedMemoryMonitor::default()));
        let b = manager_with(config, Arc::new(FixedMemoryMonitor::default()));
        let buffer = filled(&a, 8 * KIB, 0);
        assert!(matches!(b.dump(&buffer), Err(Error::InvalidParameter { .. })));
    }

    #[test]
    fn test_barrier_on_allocation() {
        let manager = manager_with(
            BufferManagerConfig::default()
                .with_policy(PolicyKind::Barrier)
                .with_barrier_bytes(20 * KIB as u64),
            Arc::new(FixedMemoryMonitor::default()),
        );
        let first = filled(&manager, 16 * KIB, 1);
        assert_eq!(first.state(), BufferState::Resident);

        // Exceeding the barrier dumps the other buffer, never the new one.
        let second = filled(&manager, 8 * KIB, 2);
        assert_eq!(first.state(), BufferState::Dumped);
        assert_eq!(second.state(), BufferState::Resident);
        assert_eq!(manager.resident_bytes(), 8 * KIB as u64);

        let report = manager.last_sweep().unwrap();
        assert_eq!(report.trigger, Trigger::Allocate);
        assert_eq!(report.target, Some(EvictionTarget::Bytes(4 * KIB as u64)));
        assert_eq!(report.dumped, vec![first.id()]);
        assert!(report.satisfied);
    }

    #[test]
    fn test_restore_sweep_excludes_restored_buffer() {
        let manager = manager_with(
            BufferManagerConfig::default()
                .with_policy(PolicyKind::Barrier)
                .with_barrier_bytes(10 * KIB as u64),
            Arc::new(FixedMemoryMonitor::default()),
        );
        let a = filled(&manager, 8 * KIB, 1);
        let b = filled(&manager, 8 * KIB, 2);
        assert_eq!(a.state(), BufferState::Dumped);

        // Reading `a` back pushes resident bytes over the barrier again.
        assert_eq!(a.read().unwrap()[0], 1);
        assert_eq!(a.state(), BufferState::Resident);
        assert_eq!(b.state(), BufferState::Dumped);
        assert_eq!(manager.last_sweep().unwrap().trigger, Trigger::Restore);
    }

    #[test]
    fn test_always_dumps_on_unlock() {
        let manager = manager_with(
            BufferManagerConfig::default().with_policy(PolicyKind::Always),
            Arc::new(FixedMemoryMonitor::default()),
        );
        let buffer = filled(&manager, 8 * KIB, 3);
        // The allocating buffer is excluded from its own sweep.
        assert_eq!(buffer.state(), BufferState::Resident);

        {
            let guard = buffer.read().unwrap();
            assert_eq!(guard[0], 3);
            assert_eq!(manager.sweep().dumped.len(), 0);
        }
        assert_eq!(buffer.state(), BufferState::Dumped);
        assert_eq!(manager.last_sweep().unwrap().trigger, Trigger::Unlock);
    }

    #[test]
    fn test_disabled_manager_does_not_sweep_automatically() {
        let manager = manager_with(
            BufferManagerConfig::default()
                .with_policy(PolicyKind::Always)
                .with_enabled(false),
            Arc::new(FixedMemoryMonitor::default()),
        );
        let a = filled(&manager, 8 * KIB, 1);
        let b = filled(&manager, 8 * KIB, 2);
        drop(b.read().unwrap());
        assert_eq!(a.state(), BufferState::Resident);
        assert_eq!(b.state(), BufferState::Resident);
        assert!(manager.set_policy(Box::new(NeverDump)).is_none());

        manager.set_policy_by_name("always").unwrap();
        assert_eq!(manager.sweep().dumped.len(), 2);
    }

    #[test]
    fn test_valve_with_simulated_memory() {
        let manager = manager_with(
            BufferManagerConfig::default()
                .with_policy(PolicyKind::Valve)
                .with_min_free_bytes(64 * KIB as u64)
                .with_hysteresis_bytes(8 * KIB as u64),
            Arc::new(SimulatedMemoryMonitor::new(128 * KIB as u64)),
        );
        let buffers: Vec<_> = (0..6).map(|i| filled(&manager, 16 * KIB, i)).collect();

        // 128 KiB capacity and a 64 KiB watermark leave room for 64 KiB.
        assert!(manager.resident_bytes() <= 64 * KIB as u64);
        assert!(buffers.iter().any(|b| b.state() == BufferState::Dumped));
        for (i, buffer) in buffers.iter().enumerate() {
            assert!(buffer.read().unwrap().iter().all(|&b| b == i as u8));
        }
    }

    #[test]
    fn test_set_policy_param_refreshes() {
        let manager = manager_with(
            BufferManagerConfig::default()
                .with_policy(PolicyKind::Valve)
                .with_min_free_bytes(0),
            Arc::new(FixedMemoryMonitor::new(1 << 20, 1 << 30)),
        );
        let buffer = filled(&manager, 8 * KIB, 9);
        assert_eq!(buffer.state(), BufferState::Resident);

        let report = manager.set_policy_param("min_free_mem", "2MiB").unwrap().unwrap();
        assert_eq!(report.trigger, Trigger::Refresh);
        assert_eq!(report.dumped, vec![buffer.id()]);
        assert_eq!(manager.policy_param("min_free_mem").as_deref(), Some("2MiB"));

        assert!(manager.set_policy_param("min_free_mem", "-1B").is_err());
        assert_eq!(manager.policy_param("min_free_mem").as_deref(), Some("2MiB"));
        assert_eq!(
            manager.policy_params(),
            vec![
                ("min_free_mem", "2MiB".to_string()),
                ("hysteresis_offset", "32MiB".to_string())
            ]
        );
    }

    #[test]
    fn test_buffer_infos_and_describe() {
        let manager = manager_with(
            BufferManagerConfig::default().with_policy(PolicyKind::Never),
            Arc::new(FixedMemoryMonitor::default()),
        );
        let a = filled(&manager, 8 * KIB, 1);
        let b = BufferObject::new(&manager);
        manager.dump(&a).unwrap();

        let infos = manager.buffer_infos();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].id, a.id());
        assert_eq!(infos[0].state, BufferState::Dumped);
        assert_eq!(infos[0].dump_path.as_deref(), Some(manager.dump_path(a.id()).as_path()));
        assert_eq!(infos[1].id, b.id());
        assert_eq!(infos[1].state, BufferState::Unallocated);

        let text = manager.describe();
        assert!(text.contains("dumped"));
        assert!(text.contains("unallocated"));
        let json = serde_json::to_string(&infos).unwrap();
        assert!(json.contains(r#""state":"dumped""#));
    }

    #[test]
    fn test_shutdown_releases_leaks_and_dump_files() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(
            BufferManagerConfig::default()
                .with_policy(PolicyKind::Never)
                .with_dump_dir(dir.path()),
            Arc::new(FixedMemoryMonitor::default()),
        );
        let dumped = filled(&manager, 8 * KIB, 1);
        let resident = filled(&manager, 8 * KIB, 2);
        let locked = filled(&manager, 8 * KIB, 3);
        manager.dump(&dumped).unwrap();
        assert_eq!(manager.dump_file_count(), 1);

        let guard = locked.read().unwrap();
        manager.shutdown();
        manager.shutdown();

        assert_eq!(dumped.state(), BufferState::Unallocated);
        assert_eq!(resident.state(), BufferState::Unallocated);
        assert_eq!(locked.state(), BufferState::Resident);
        assert_eq!(guard[0], 3);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(manager.stats().resident_bytes, 8 * KIB as u64);
        assert!(matches!(
            resident.allocate(1, AllocationPolicy::Heap),
            Err(Error::ShutDown)
        ));
    }

    #[test]
    fn test_owned_dump_dir_removed_on_drop() {
        let manager = manager_with(
            BufferManagerConfig::default().with_policy(PolicyKind::Never),
            Arc::new(FixedMemoryMonitor::default()),
        );
        let dir = manager.dump_dir().to_path_buf();
        let buffer = filled(&manager, 8 * KIB, 1);
        manager.dump(&buffer).unwrap();
        assert!(dir.exists());

        drop(buffer);
        drop(manager);
        assert!(!dir.exists());
    }

    #[test]
    fn test_lazy_source_loads_on_first_lock() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("volume.raw");
        std::fs::write(&raw, vec![0x3C; 8 * KIB]).unwrap();
        let manager = manager_with(
            BufferManagerConfig::default()
                .with_policy(PolicyKind::Never)
                .with_loading_mode(LoadingMode::Lazy),
            Arc::new(FixedMemoryMonitor::default()),
        );
        let buffer = BufferObject::new(&manager);
        buffer
            .set_source(BufferSource::raw_file(&raw), 8 * KIB, AllocationPolicy::PageAligned)
            .unwrap();

        assert_eq!(buffer.state(), BufferState::Dumped);
        assert_eq!(buffer.size(), 8 * KIB);
        assert_eq!(manager.stats().dumped_bytes, 8 * KIB as u64);
        assert_eq!(manager.dump_file_count(), 0);
        let info = manager.stream_info(&buffer).unwrap();
        assert!(info.user_source);
        assert_eq!(info.format, FileFormat::Raw);
        assert_eq!(info.path.as_deref(), Some(raw.as_path()));
        assert_eq!(info.state, BufferState::Dumped);

        assert!(buffer.read().unwrap().iter().all(|&b| b == 0x3C));
        assert_eq!(buffer.state(), BufferState::Resident);
        assert_eq!(manager.stats().restore_count, 1);
        assert_eq!(manager.stats().resident_bytes, 8 * KIB as u64);
        let info = buffer.stream_info();
        assert!(!info.user_source);
        assert_eq!(info.format, FileFormat::Other);
        assert!(info.path.is_none());

        // Dumping again goes through the dump store.
        assert!(manager.dump(&buffer).unwrap());
        let info = buffer.stream_info();
        assert_eq!(info.path, Some(manager.dump_path(buffer.id())));
        assert_eq!(info.format, FileFormat::Raw);
        assert!(buffer.read().unwrap().iter().all(|&b| b == 0x3C));
    }

    #[test]
    fn test_direct_source_loads_immediately() {
        let manager = manager_with(
            BufferManagerConfig::default().with_policy(PolicyKind::Never),
            Arc::new(FixedMemoryMonitor::default()),
        );
        assert_eq!(manager.loading_mode(), LoadingMode::Direct);
        let buffer = BufferObject::new(&manager);
        let source = BufferSource::new(|| -> io::Result<Box<dyn Read + Send>> {
            Ok(Box::new(io::Cursor::new((0..=255u8).collect::<Vec<_>>())))
        });
        buffer.set_source(source, 256, AllocationPolicy::Heap).unwrap();

        assert_eq!(buffer.state(), BufferState::Resident);
        assert_eq!(buffer.read().unwrap()[255], 255);
        assert_eq!(manager.stats().dumped_bytes, 0);
        assert!(matches!(
            buffer.set_source(BufferSource::raw_file("unused"), 1, AllocationPolicy::Heap),
            Err(Error::AlreadyAllocated(_))
        ));
    }

    #[test]
    fn test_failed_source_load_can_be_retried() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("late.raw");
        let manager = manager_with(
            BufferManagerConfig::default().with_policy(PolicyKind::Never),
            Arc::new(FixedMemoryMonitor::default()),
        );
        let buffer = BufferObject::new(&manager);
        let err = buffer
            .set_source(BufferSource::raw_file(&raw), 16, AllocationPolicy::Heap)
            .unwrap_err();
        assert!(err.is_data_loss());
        assert_eq!(buffer.state(), BufferState::Dumped);
        assert!(buffer.stream_info().user_source);

        std::fs::write(&raw, [7u8; 16]).unwrap();
        assert!(manager.restore(&buffer).unwrap());
        assert_eq!(&*buffer.read().unwrap(), &[7u8; 16]);

        manager.set_loading_mode(LoadingMode::Lazy);
        assert_eq!(manager.config().loading_mode, LoadingMode::Lazy);
        buffer.release().unwrap();
        assert_eq!(manager.stats().managed_bytes, 0);
    }

    #[test]
    fn test_external_policy_cannot_take_a_source() {
        let manager = manager_with(
            BufferManagerConfig::default().with_policy(PolicyKind::Never),
            Arc::new(FixedMemoryMonitor::default()),
        );
        let buffer = BufferObject::new(&manager);
        assert!(matches!(
            buffer.set_source(BufferSource::raw_file("x.raw"), 4, AllocationPolicy::External),
            Err(Error::UnsupportedOperation { .. })
        ));
        assert_eq!(buffer.state(), BufferState::Unallocated);
        let other = manager_with(BufferManagerConfig::default(), Arc::new(FixedMemoryMonitor::default()));
        assert!(matches!(
            other.stream_info(&buffer),
            Err(Error::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_policy_params_survive_switching() {
        let manager = manager_with(
            BufferManagerConfig::default().with_policy(PolicyKind::Valve),
            Arc::new(FixedMemoryMonitor::default()),
        );
        manager.set_policy_param("min_free_mem", "2MiB").unwrap();
        manager.set_policy_by_name("barrier").unwrap();
        manager.set_policy_param("barrier", "3MiB").unwrap();
        assert_eq!(manager.config().policy, PolicyKind::Barrier);

        manager.set_policy_by_name("valve").unwrap();
        assert_eq!(manager.policy_param("min_free_mem").as_deref(), Some("2MiB"));
        manager.set_policy_by_name("barrier").unwrap();
        assert_eq!(manager.policy_param("barrier").as_deref(), Some("3MiB"));

        manager.set_enabled(false);
        let config = manager.config();
        assert!(!config.enabled);
        assert_eq!(config.min_free_bytes, 2 << 20);
        assert_eq!(config.barrier_bytes, 3 << 20);
    }
}
