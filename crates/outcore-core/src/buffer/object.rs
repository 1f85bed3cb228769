//! The managed buffer and its shared state.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};

use outcore_common::types::BufferId;
use outcore_common::utils::error::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::lock::{self, LockGuard, LockMode, ReadLock, UpgradableLock, WriteLock};
use super::policy::AllocationPolicy;
use super::source::{BufferSource, LoadingMode, StreamInfo};
use super::storage::{ExternalRegion, Storage};
use super::stream::RestoreStream;
use crate::eviction::Trigger;
use crate::manager::BufferManager;

/// Residency state of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferState {
    /// No memory, size is zero.
    Unallocated,
    /// Content lives in RAM.
    Resident,
    /// Content lives in the dump store only.
    Dumped,
}

impl BufferState {
    /// Returns the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unallocated => "unallocated",
            Self::Resident => "resident",
            Self::Dumped => "dumped",
        }
    }

    const fn to_u8(self) -> u8 {
        match self {
            Self::Unallocated => 0,
            Self::Resident => 1,
            Self::Dumped => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Resident,
            2 => Self::Dumped,
            _ => Self::Unallocated,
        }
    }
}

impl fmt::Display for BufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-protected part of a buffer.
#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) storage: Storage,
    pub(crate) policy: AllocationPolicy,
    pub(crate) state: BufferState,
    /// Logical size; kept while dumped.
    pub(crate) size: usize,
    /// Content source of a buffer that has not been loaded yet.
    pub(crate) source: Option<BufferSource>,
}

impl Slot {
    fn new() -> Self {
        Self {
            storage: Storage::Empty,
            policy: AllocationPolicy::default(),
            state: BufferState::Unallocated,
            size: 0,
            source: None,
        }
    }

    pub(crate) fn resident_bytes(&self) -> u64 {
        if self.state == BufferState::Resident {
            self.size as u64
        } else {
            0
        }
    }

    pub(crate) fn dumped_bytes(&self) -> u64 {
        if self.state == BufferState::Dumped {
            self.size as u64
        } else {
            0
        }
    }

    /// Frees the memory and returns to the unallocated state.
    pub(crate) fn clear(&mut self) {
        self.policy.destroy(&mut self.storage);
        self.state = BufferState::Unallocated;
        self.size = 0;
        self.source = None;
    }
}

/// State shared between a [`BufferObject`] and the manager's registry.
///
/// The atomics mirror the slot so that the manager can inspect candidates
/// without blocking on the slot lock.
pub(crate) struct BufferShared {
    pub(crate) id: BufferId,
    pub(crate) slot: RwLock<Slot>,
    lock_count: AtomicUsize,
    state: AtomicU8,
    policy: AtomicU8,
    size: AtomicUsize,
    evictable: AtomicBool,
    last_access: AtomicU64,
}

impl BufferShared {
    fn new(id: BufferId, tick: u64) -> Self {
        Self {
            id,
            slot: RwLock::new(Slot::new()),
            lock_count: AtomicUsize::new(0),
            state: AtomicU8::new(BufferState::Unallocated.to_u8()),
            policy: AtomicU8::new(AllocationPolicy::default().to_u8()),
            size: AtomicUsize::new(0),
            evictable: AtomicBool::new(true),
            last_access: AtomicU64::new(tick),
        }
    }

    /// Copies the slot's observable fields into the mirrors.
    pub(crate) fn publish(&self, slot: &Slot) {
        self.size.store(slot.size, Ordering::Release);
        self.policy.store(slot.policy.to_u8(), Ordering::Release);
        self.state.store(slot.state.to_u8(), Ordering::Release);
    }

    pub(crate) fn state(&self) -> BufferState {
        BufferState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub(crate) fn policy(&self) -> AllocationPolicy {
        AllocationPolicy::from_u8(self.policy.load(Ordering::Acquire))
    }

    pub(crate) fn lock_count(&self) -> usize {
        self.lock_count.load(Ordering::Acquire)
    }

    pub(crate) fn is_evictable(&self) -> bool {
        self.evictable.load(Ordering::Acquire)
    }

    pub(crate) fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    /// Returns `true` if an eviction sweep may dump this buffer.
    pub(crate) fn is_dump_candidate(&self, min_dump_size: usize) -> bool {
        let size = self.size();
        self.state() == BufferState::Resident
            && self.is_evictable()
            && self.policy().is_managed()
            && self.lock_count() == 0
            && size > 0
            && size >= min_dump_size
    }

    pub(crate) fn pin(&self, tick: u64) {
        self.lock_count.fetch_add(1, Ordering::AcqRel);
        self.last_access.store(tick, Ordering::Relaxed);
    }

    /// Returns the lock count before the decrement.
    pub(crate) fn unpin(&self) -> usize {
        self.lock_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0)
    }
}

/// A managed raw memory region.
///
/// The object registers with its manager on construction and unregisters
/// when dropped, removing any dump file it left behind. All operations take
/// `&self` and synchronize internally, so an object can be shared between
/// threads by reference.
///
/// Bytes are only reachable through lock guards ([`read`](Self::read),
/// [`write`](Self::write), [`upgradable_read`](Self::upgradable_read)).
/// Guards borrow the object, so it cannot be dropped while locked.
///
/// A thread must not hold two guards on the same buffer at once: the
/// second acquisition may wait forever on the first.
pub struct BufferObject {
    shared: Arc<BufferShared>,
    manager: Arc<BufferManager>,
}

impl BufferObject {
    /// Creates an empty buffer registered with `manager`.
    #[must_use]
    pub fn new(manager: &Arc<BufferManager>) -> Self {
        let shared = Arc::new(BufferShared::new(manager.next_buffer_id(), manager.tick()));
        manager.register(&shared);
        Self {
            shared,
            manager: Arc::clone(manager),
        }
    }

    /// Returns the buffer's identifier.
    #[inline]
    #[must_use]
    pub fn id(&self) -> BufferId {
        self.shared.id
    }

    /// Returns the manager this buffer is registered with.
    #[must_use]
    pub fn manager(&self) -> &Arc<BufferManager> {
        &self.manager
    }

    /// Returns the current residency state.
    #[must_use]
    pub fn state(&self) -> BufferState {
        self.shared.state()
    }

    /// Returns the logical size in bytes (kept while dumped).
    #[must_use]
    pub fn size(&self) -> usize {
        self.shared.size()
    }

    /// Returns `true` if the buffer holds no memory.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Returns the allocation policy of the current memory.
    #[must_use]
    pub fn policy(&self) -> AllocationPolicy {
        self.shared.policy()
    }

    /// Returns the number of outstanding lock guards.
    #[must_use]
    pub fn lock_count(&self) -> usize {
        self.shared.lock_count()
    }

    /// Returns `true` if eviction sweeps may dump this buffer.
    #[must_use]
    pub fn is_evictable(&self) -> bool {
        self.shared.is_evictable() && self.policy().is_managed()
    }

    /// Opts this buffer in or out of eviction.
    ///
    /// External buffers stay non-evictable regardless.
    pub fn set_evictable(&self, evictable: bool) {
        self.shared.evictable.store(evictable, Ordering::Release);
    }

    pub(crate) fn shared(&self) -> &Arc<BufferShared> {
        &self.shared
    }

    /// Allocates `size` zeroed bytes with `policy`.
    ///
    /// A `size` of zero leaves the buffer unallocated. The manager may evict
    /// other buffers before this returns.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyAllocated`] if the buffer holds memory
    /// - [`Error::Locked`] if guards are outstanding
    /// - [`Error::AllocationFailure`] / [`Error::UnsupportedOperation`] from the policy
    /// - [`Error::ShutDown`] after manager shutdown
    pub fn allocate(&self, size: usize, policy: AllocationPolicy) -> Result<()> {
        self.manager.ensure_running()?;
        self.ensure_unlocked()?;
        let mut slot = self.shared.slot.write();
        if slot.state != BufferState::Unallocated {
            return Err(Error::AlreadyAllocated(self.id()));
        }
        policy.allocate(&mut slot.storage, size)?;
        slot.policy = policy;
        if size > 0 {
            slot.size = size;
            slot.state = BufferState::Resident;
        }
        tracing::debug!("Allocated {} bytes for buffer {} ({})", size, self.id(), policy);
        self.commit(&slot, Trigger::Allocate);
        Ok(())
    }

    /// Resizes the buffer, keeping the common prefix.
    ///
    /// A dumped buffer is restored first. Resizing to zero frees the memory.
    /// The manager may evict other buffers before this returns, never this one.
    ///
    /// # Errors
    ///
    /// - [`Error::NotAllocated`] if the buffer holds no memory
    /// - [`Error::Locked`] if guards are outstanding
    /// - [`Error::RestoreIo`] if the dumped content cannot be read back
    /// - [`Error::AllocationFailure`] / [`Error::UnsupportedOperation`] from the policy
    pub fn reallocate(&self, new_size: usize) -> Result<()> {
        self.manager.ensure_running()?;
        self.ensure_unlocked()?;
        let mut slot = self.shared.slot.write();
        match slot.state {
            BufferState::Unallocated => return Err(Error::NotAllocated(self.id())),
            BufferState::Dumped => self.manager.restore_slot(&self.shared, &mut slot)?,
            BufferState::Resident => {}
        }
        if new_size == slot.size {
            return Ok(());
        }
        let policy = slot.policy;
        policy.reallocate(&mut slot.storage, new_size)?;
        if new_size == 0 {
            self.manager.forget_dump(self.id());
            slot.clear();
            slot.policy = policy;
            self.publish_and_account(&slot);
            return Ok(());
        }
        tracing::debug!(
            "Reallocated buffer {} from {} to {} bytes",
            self.id(),
            slot.size,
            new_size
        );
        slot.size = new_size;
        self.commit(&slot, Trigger::Reallocate);
        Ok(())
    }

    /// Frees the memory (or deletes the dump file) and returns to the
    /// unallocated state. No-op on an unallocated buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Locked`] if guards are outstanding.
    pub fn release(&self) -> Result<()> {
        self.ensure_unlocked()?;
        let mut slot = self.shared.slot.write();
        if slot.state == BufferState::Unallocated {
            return Ok(());
        }
        self.manager.forget_dump(self.id());
        slot.clear();
        tracing::debug!("Released buffer {}", self.id());
        self.publish_and_account(&slot);
        Ok(())
    }

    /// Replaces the content with an adopted heap buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Locked`] if guards are outstanding, or
    /// [`Error::ShutDown`] after manager shutdown.
    pub fn set_buffer(&self, data: Box<[u8]>) -> Result<()> {
        self.adopt(Storage::Heap(data), AllocationPolicy::Heap)
    }

    /// Wraps caller-owned memory under the external policy.
    ///
    /// The buffer becomes permanently non-evictable and cannot be resized;
    /// [`release`](Self::release) drops the region.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Locked`] if guards are outstanding, or
    /// [`Error::ShutDown`] after manager shutdown.
    pub fn wrap_external<R: ExternalRegion>(&self, region: R) -> Result<()> {
        self.set_evictable(false);
        self.adopt(Storage::External(Box::new(region)), AllocationPolicy::External)
    }

    fn adopt(&self, storage: Storage, policy: AllocationPolicy) -> Result<()> {
        self.manager.ensure_running()?;
        self.ensure_unlocked()?;
        let mut slot = self.shared.slot.write();
        self.manager.forget_dump(self.id());
        slot.clear();
        let size = storage.len();
        slot.policy = policy;
        if size > 0 {
            slot.storage = storage;
            slot.size = size;
            slot.state = BufferState::Resident;
        }
        tracing::debug!("Buffer {} adopted {} bytes ({})", self.id(), size, policy);
        self.commit(&slot, Trigger::Allocate);
        Ok(())
    }

    /// Declares the content from a source without loading it.
    ///
    /// The buffer takes `size` bytes under `policy` and counts as dumped.
    /// Under [`LoadingMode::Direct`] it is loaded before this returns;
    /// under [`LoadingMode::Lazy`] the first lock or restore loads it. No
    /// dump file is written for the source's content. A `size` of zero
    /// leaves the buffer unallocated.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyAllocated`] if the buffer holds memory
    /// - [`Error::Locked`] if guards are outstanding
    /// - [`Error::UnsupportedOperation`] for the external policy
    /// - [`Error::RestoreIo`] if a direct load fails; the buffer stays
    ///   dumped and the source is kept for a later attempt
    /// - [`Error::ShutDown`] after manager shutdown
    pub fn set_source(
        &self,
        source: BufferSource,
        size: usize,
        policy: AllocationPolicy,
    ) -> Result<()> {
        self.manager.ensure_running()?;
        self.ensure_unlocked()?;
        if !policy.is_managed() {
            return Err(Error::UnsupportedOperation {
                policy: policy.name(),
                operation: "set_source",
            });
        }
        let mut slot = self.shared.slot.write();
        if slot.state != BufferState::Unallocated {
            return Err(Error::AlreadyAllocated(self.id()));
        }
        slot.policy = policy;
        if size == 0 {
            self.shared.publish(&slot);
            return Ok(());
        }
        tracing::debug!(
            "Buffer {} backed by a source ({} bytes, {})",
            self.id(),
            size,
            source.format()
        );
        slot.size = size;
        slot.state = BufferState::Dumped;
        slot.source = Some(source);
        self.publish_and_account(&slot);

        match self.manager.loading_mode() {
            LoadingMode::Direct => self.manager.restore_slot(&self.shared, &mut slot),
            LoadingMode::Lazy => Ok(()),
        }
    }

    /// Describes where the content can currently be read from.
    ///
    /// Blocks while a write lock is held.
    #[must_use]
    pub fn stream_info(&self) -> StreamInfo {
        let slot = self.shared.slot.read();
        self.manager.slot_stream_info(self.id(), &slot)
    }

    /// Exchanges content, size, allocation policy and eviction opt-in with
    /// `other`.
    ///
    /// Dumped buffers are restored first. Both buffers must belong to the
    /// same manager and be unlocked.
    ///
    /// # Errors
    ///
    /// - [`Error::Locked`] if either buffer has guards outstanding
    /// - [`Error::InvalidParameter`] if the buffers use different managers
    /// - [`Error::RestoreIo`] if a dumped buffer cannot be read back
    pub fn swap(&self, other: &BufferObject) -> Result<()> {
        if !Arc::ptr_eq(&self.manager, &other.manager) {
            return Err(Error::InvalidParameter {
                name: "other".to_string(),
                value: format!("buffer {} belongs to another manager", other.id()),
            });
        }
        if Arc::ptr_eq(&self.shared, &other.shared) {
            return Ok(());
        }
        self.ensure_unlocked()?;
        other.ensure_unlocked()?;

        // Lock in id order so concurrent swaps of the same pair cannot deadlock.
        let (first, second) = if self.id() < other.id() {
            (self, other)
        } else {
            (other, self)
        };
        let mut a = first.shared.slot.write();
        let mut b = second.shared.slot.write();
        if a.state == BufferState::Dumped {
            first.manager.restore_slot(&first.shared, &mut a)?;
        }
        if b.state == BufferState::Dumped {
            second.manager.restore_slot(&second.shared, &mut b)?;
        }
        std::mem::swap(&mut *a, &mut *b);
        let evictable = first.shared.evictable.load(Ordering::Acquire);
        first
            .shared
            .evictable
            .store(second.shared.evictable.swap(evictable, Ordering::AcqRel), Ordering::Release);
        first.publish_and_account(&a);
        second.publish_and_account(&b);
        tracing::debug!("Swapped buffers {} and {}", first.id(), second.id());
        Ok(())
    }

    /// Acquires a shared lock, restoring dumped content first.
    ///
    /// Blocks while a write lock is held.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RestoreIo`] or [`Error::AllocationFailure`] if the
    /// content cannot be restored.
    pub fn read(&self) -> Result<ReadLock<'_>> {
        lock::acquire_read(self, true)
    }

    /// Acquires an exclusive lock, restoring dumped content first.
    ///
    /// Blocks while any other lock is held.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RestoreIo`] or [`Error::AllocationFailure`] if the
    /// content cannot be restored.
    pub fn write(&self) -> Result<WriteLock<'_>> {
        lock::acquire_write(self, true)
    }

    /// Acquires an upgradable shared lock, restoring dumped content first.
    ///
    /// Coexists with plain readers; excludes writers and other upgradable
    /// locks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RestoreIo`] or [`Error::AllocationFailure`] if the
    /// content cannot be restored.
    pub fn upgradable_read(&self) -> Result<UpgradableLock<'_>> {
        lock::acquire_upgradable(self, true)
    }

    /// Non-blocking [`read`](Self::read).
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockConflict`] if a write lock is held.
    pub fn try_read(&self) -> Result<ReadLock<'_>> {
        lock::acquire_read(self, false)
    }

    /// Non-blocking [`write`](Self::write).
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockConflict`] if any lock is held.
    pub fn try_write(&self) -> Result<WriteLock<'_>> {
        lock::acquire_write(self, false)
    }

    /// Non-blocking [`upgradable_read`](Self::upgradable_read).
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockConflict`] if a write or upgradable lock is held.
    pub fn try_upgradable_read(&self) -> Result<UpgradableLock<'_>> {
        lock::acquire_upgradable(self, false)
    }

    /// Acquires a lock of the given mode, blocking as needed.
    ///
    /// # Errors
    ///
    /// See [`read`](Self::read).
    pub fn lock(&self, mode: LockMode) -> Result<LockGuard<'_>> {
        Ok(match mode {
            LockMode::Read => LockGuard::Read(self.read()?),
            LockMode::Write => LockGuard::Write(self.write()?),
            LockMode::Upgradable => LockGuard::Upgradable(self.upgradable_read()?),
        })
    }

    /// Acquires a lock of the given mode without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockConflict`] if an incompatible lock is held.
    pub fn try_lock(&self, mode: LockMode) -> Result<LockGuard<'_>> {
        Ok(match mode {
            LockMode::Read => LockGuard::Read(self.try_read()?),
            LockMode::Write => LockGuard::Write(self.try_write()?),
            LockMode::Upgradable => LockGuard::Upgradable(self.try_upgradable_read()?),
        })
    }

    /// Opens a readable stream over the content, restoring it if dumped.
    ///
    /// # Errors
    ///
    /// See [`read`](Self::read).
    pub fn restore_stream(&self) -> Result<RestoreStream<'_>> {
        Ok(RestoreStream::new(self.read()?))
    }

    /// Restores in place if the slot is dumped.
    pub(crate) fn ensure_resident(&self, slot: &mut Slot) -> Result<()> {
        if slot.state == BufferState::Dumped {
            self.manager.restore_slot(&self.shared, slot)?;
        }
        Ok(())
    }

    fn ensure_unlocked(&self) -> Result<()> {
        match self.lock_count() {
            0 => Ok(()),
            count => Err(Error::Locked {
                id: self.id(),
                count,
            }),
        }
    }

    /// Publishes the slot and reports growth, which may trigger a sweep.
    fn commit(&self, slot: &Slot, trigger: Trigger) {
        self.shared.publish(slot);
        self.manager
            .report(self.id(), slot.resident_bytes(), slot.dumped_bytes(), trigger);
    }

    fn publish_and_account(&self, slot: &Slot) {
        self.shared.publish(slot);
        self.manager
            .account(self.id(), slot.resident_bytes(), slot.dumped_bytes());
    }
}

impl Drop for BufferObject {
    fn drop(&mut self) {
        let mut slot = self.shared.slot.write();
        if self.shared.lock_count() != 0 {
            tracing::error!(
                "Buffer {} dropped with {} lock(s) outstanding",
                self.id(),
                self.shared.lock_count()
            );
            debug_assert_eq!(self.shared.lock_count(), 0, "buffer dropped while locked");
        }
        if slot.state != BufferState::Unallocated {
            self.manager.forget_dump(self.id());
            slot.clear();
            self.shared.publish(&slot);
        }
        drop(slot);
        self.manager.unregister(self.id());
    }
}

impl fmt::Debug for BufferObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferObject")
            .field("id", &self.id())
            .field("size", &self.size())
            .field("state", &self.state())
            .field("policy", &self.policy())
            .field("lock_count", &self.lock_count())
            .finish()
    }
}
