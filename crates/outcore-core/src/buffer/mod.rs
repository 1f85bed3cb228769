//! Managed buffers.
//!
//! A [`BufferObject`] owns one raw memory region and registers it with a
//! [`BufferManager`](crate::manager::BufferManager). Access to the bytes goes
//! through lock guards, which restore dumped content on acquisition and keep
//! the buffer resident for as long as they live.
//!
//! | Type | Role |
//! |------|------|
//! | [`AllocationPolicy`] | heap, page-aligned or external memory |
//! | [`BufferObject`] | allocate / reallocate / release / swap |
//! | [`ReadLock`], [`WriteLock`], [`UpgradableLock`] | scoped, pinned access |
//! | [`RestoreStream`] | `Read + Seek` view for serializers |
//! | [`BufferSource`] | lazily loaded, caller-supplied content |

mod aligned;
mod lock;
mod object;
mod policy;
mod source;
mod storage;
mod stream;

pub use aligned::PAGE_SIZE;
pub use lock::{LockGuard, LockMode, ReadLock, UpgradableLock, WriteLock};
pub use object::{BufferObject, BufferState};
pub use policy::AllocationPolicy;
pub use source::{BufferSource, FileFormat, LoadingMode, StreamFactory, StreamInfo};
pub use storage::ExternalRegion;
pub use stream::RestoreStream;

pub(crate) use object::{BufferShared, Slot};
pub(crate) use storage::Storage;
