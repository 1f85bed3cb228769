//! Lock guards.
//!
//! Every guard pins its buffer: while it lives the buffer's lock count is
//! non-zero and eviction sweeps skip it. Acquiring a guard on a dumped
//! buffer restores the content first.
//!
//! ```text
//!   UpgradableLock ──upgrade──▶ WriteLock ──downgrade──▶ ReadLock
//!          │                                          ▲
//!          └──────────────downgrade───────────────────┘
//! ```
//!
//! Conversions consume the guard and no conversion leads back to an
//! upgradable lock, so a lock can be promoted at most once per acquisition
//! and a plain read lock can never be promoted.

use std::fmt;
use std::ops::{Deref, DerefMut};

use outcore_common::utils::error::{Error, Result};
use parking_lot::{RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard};

use super::object::{BufferObject, BufferState, Slot};

/// Access mode of a lock guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared read access.
    Read,
    /// Exclusive write access.
    Write,
    /// Shared read access that can be promoted to write.
    Upgradable,
}

impl LockMode {
    /// Returns the mode name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Upgradable => "upgradable",
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-count ticket held by every guard.
///
/// Declared after the slot guard in each guard struct so it is dropped
/// last: the count only reaches zero once the slot lock is free.
struct Pin<'a> {
    object: &'a BufferObject,
}

impl<'a> Pin<'a> {
    fn new(object: &'a BufferObject) -> Self {
        object.shared().pin(object.manager().tick());
        Self { object }
    }
}

impl Drop for Pin<'_> {
    fn drop(&mut self) {
        match self.object.shared().unpin() {
            0 => {
                tracing::error!("Lock count underflow on buffer {}", self.object.id());
                debug_assert!(false, "lock released more often than acquired");
            }
            1 => self.object.manager().on_unlock(self.object.id()),
            _ => {}
        }
    }
}

fn debug_guard(f: &mut fmt::Formatter<'_>, mode: LockMode, pin: &Pin<'_>, len: usize) -> fmt::Result {
    f.debug_struct("Lock")
        .field("mode", &mode)
        .field("id", &pin.object.id())
        .field("len", &len)
        .finish()
}

fn conflict(object: &BufferObject, mode: LockMode) -> Error {
    Error::LockConflict {
        id: object.id(),
        requested: mode.as_str(),
    }
}

fn lock_write<'a>(
    object: &'a BufferObject,
    blocking: bool,
    mode: LockMode,
) -> Result<RwLockWriteGuard<'a, Slot>> {
    let slot = &object.shared().slot;
    if blocking {
        Ok(slot.write())
    } else {
        slot.try_write().ok_or_else(|| conflict(object, mode))
    }
}

pub(super) fn acquire_read(object: &BufferObject, blocking: bool) -> Result<ReadLock<'_>> {
    let slot = &object.shared().slot;
    let guard = if blocking {
        slot.read()
    } else {
        slot.try_read()
            .ok_or_else(|| conflict(object, LockMode::Read))?
    };
    let guard = if guard.state == BufferState::Dumped {
        drop(guard);
        let mut write = lock_write(object, blocking, LockMode::Read)?;
        object.ensure_resident(&mut write)?;
        RwLockWriteGuard::downgrade(write)
    } else {
        guard
    };
    Ok(ReadLock {
        guard,
        _pin: Pin::new(object),
    })
}

pub(super) fn acquire_write(object: &BufferObject, blocking: bool) -> Result<WriteLock<'_>> {
    let mut guard = lock_write(object, blocking, LockMode::Write)?;
    object.ensure_resident(&mut guard)?;
    Ok(WriteLock {
        guard,
        _pin: Pin::new(object),
    })
}

pub(super) fn acquire_upgradable(
    object: &BufferObject,
    blocking: bool,
) -> Result<UpgradableLock<'_>> {
    let slot = &object.shared().slot;
    let guard = if blocking {
        slot.upgradable_read()
    } else {
        slot.try_upgradable_read()
            .ok_or_else(|| conflict(object, LockMode::Upgradable))?
    };
    let guard = if guard.state == BufferState::Dumped {
        let mut write = if blocking {
            RwLockUpgradableReadGuard::upgrade(guard)
        } else {
            RwLockUpgradableReadGuard::try_upgrade(guard)
                .map_err(|_| conflict(object, LockMode::Upgradable))?
        };
        object.ensure_resident(&mut write)?;
        RwLockWriteGuard::downgrade_to_upgradable(write)
    } else {
        guard
    };
    Ok(UpgradableLock {
        guard,
        _pin: Pin::new(object),
        object,
    })
}

/// Shared access to a buffer's bytes.
pub struct ReadLock<'a> {
    guard: RwLockReadGuard<'a, Slot>,
    _pin: Pin<'a>,
}

impl ReadLock<'_> {
    /// Returns a raw pointer to the bytes, valid while the guard lives.
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.guard.storage.as_slice().as_ptr()
    }
}

impl Deref for ReadLock<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.guard.storage.as_slice()
    }
}

impl fmt::Debug for ReadLock<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_guard(f, LockMode::Read, &self._pin, self.len())
    }
}

/// Exclusive access to a buffer's bytes.
pub struct WriteLock<'a> {
    guard: RwLockWriteGuard<'a, Slot>,
    _pin: Pin<'a>,
}

impl<'a> WriteLock<'a> {
    /// Returns a raw mutable pointer to the bytes, valid while the guard lives.
    #[must_use]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.guard.storage.as_mut_slice().as_mut_ptr()
    }

    /// Atomically demotes to a shared lock.
    #[must_use]
    pub fn downgrade(self) -> ReadLock<'a> {
        let Self { guard, _pin: pin } = self;
        ReadLock {
            guard: RwLockWriteGuard::downgrade(guard),
            _pin: pin,
        }
    }
}

impl Deref for WriteLock<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.guard.storage.as_slice()
    }
}

impl fmt::Debug for WriteLock<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_guard(f, LockMode::Write, &self._pin, self.len())
    }
}

impl DerefMut for WriteLock<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.guard.storage.as_mut_slice()
    }
}

/// Shared access that can be promoted to exclusive access.
pub struct UpgradableLock<'a> {
    guard: RwLockUpgradableReadGuard<'a, Slot>,
    _pin: Pin<'a>,
    object: &'a BufferObject,
}

impl<'a> UpgradableLock<'a> {
    /// Promotes to a write lock, waiting for plain readers to leave.
    #[must_use]
    pub fn upgrade(self) -> WriteLock<'a> {
        let Self { guard, _pin: pin, .. } = self;
        WriteLock {
            guard: RwLockUpgradableReadGuard::upgrade(guard),
            _pin: pin,
        }
    }

    /// Promotes to a write lock if no plain readers are present.
    ///
    /// # Errors
    ///
    /// Gives the upgradable lock back if readers are present.
    pub fn try_upgrade(self) -> std::result::Result<WriteLock<'a>, Self> {
        let Self { guard, _pin: pin, object } = self;
        match RwLockUpgradableReadGuard::try_upgrade(guard) {
            Ok(guard) => Ok(WriteLock { guard, _pin: pin }),
            Err(guard) => Err(Self {
                guard,
                _pin: pin,
                object,
            }),
        }
    }

    /// Like [`try_upgrade`](Self::try_upgrade), dropping the lock on failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockConflict`] if readers are present.
    pub fn try_upgrade_or_release(self) -> Result<WriteLock<'a>> {
        let object = self.object;
        self.try_upgrade()
            .map_err(|_| conflict(object, LockMode::Write))
    }

    /// Atomically demotes to a plain read lock.
    #[must_use]
    pub fn downgrade(self) -> ReadLock<'a> {
        let Self { guard, _pin: pin, .. } = self;
        ReadLock {
            guard: RwLockUpgradableReadGuard::downgrade(guard),
            _pin: pin,
        }
    }
}

impl Deref for UpgradableLock<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.guard.storage.as_slice()
    }
}

impl fmt::Debug for UpgradableLock<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_guard(f, LockMode::Upgradable, &self._pin, self.len())
    }
}

/// A guard of any mode, as returned by [`BufferObject::lock`].
pub enum LockGuard<'a> {
    /// Shared lock.
    Read(ReadLock<'a>),
    /// Exclusive lock.
    Write(WriteLock<'a>),
    /// Upgradable lock.
    Upgradable(UpgradableLock<'a>),
}

impl LockGuard<'_> {
    /// Returns the mode of this guard.
    #[must_use]
    pub fn mode(&self) -> LockMode {
        match self {
            Self::Read(_) => LockMode::Read,
            Self::Write(_) => LockMode::Write,
            Self::Upgradable(_) => LockMode::Upgradable,
        }
    }

    /// Returns the bytes mutably if this is a write guard.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match self {
            Self::Write(lock) => Some(&mut **lock),
            _ => None,
        }
    }
}

impl Deref for LockGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Read(lock) => &**lock,
            Self::Write(lock) => &**lock,
            Self::Upgradable(lock) => &**lock,
        }
    }
}

impl fmt::Debug for LockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(lock) => fmt::Debug::fmt(lock, f),
            Self::Write(lock) => fmt::Debug::fmt(lock, f),
            Self::Upgradable(lock) => fmt::Debug::fmt(lock, f),
        }
    }
}
