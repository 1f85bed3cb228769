//! Dump file management.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use outcore_common::types::BufferId;
use outcore_common::utils::error::{Error, Result};
use parking_lot::Mutex;
use serde::Serialize;
use tempfile::TempDir;

use crate::buffer::{BufferState, Slot, Storage};

/// Bookkeeping for one dump file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DumpEntry {
    /// Path of the dump file.
    pub path: PathBuf,
    /// Number of bytes written.
    pub len: u64,
    /// CRC-32 of the written bytes.
    pub checksum: u32,
}

enum DumpDir {
    /// Private directory removed when the store is dropped.
    Owned(TempDir),
    /// Caller-provided directory; only our files are removed.
    Configured(PathBuf),
}

impl DumpDir {
    fn path(&self) -> &Path {
        match self {
            Self::Owned(dir) => dir.path(),
            Self::Configured(path) => path,
        }
    }
}

/// The dump directory and its entries.
///
/// The entry map's mutex is never held while taking any other lock.
pub(crate) struct DumpStore {
    dir: DumpDir,
    sync: bool,
    entries: Mutex<HashMap<BufferId, DumpEntry>>,
}

impl DumpStore {
    /// Opens a store in `dir`, or in a fresh private temporary directory.
    pub(crate) fn open(dir: Option<&Path>, sync: bool) -> Result<Self> {
        let dir = match dir {
            Some(path) => {
                fs::create_dir_all(path)?;
                DumpDir::Configured(path.to_path_buf())
            }
            None => DumpDir::Owned(
                tempfile::Builder::new()
                    .prefix("outcore-dumps-")
                    .tempdir()?,
            ),
        };
        tracing::debug!("Dump directory: {}", dir.path().display());
        Ok(Self {
            dir,
            sync,
            entries: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Returns the file a buffer is dumped to.
    pub(crate) fn path_for(&self, id: BufferId) -> PathBuf {
        self.dir.path().join(format!("buffer-{:016x}.raw", id.as_u64()))
    }

    pub(crate) fn entry(&self, id: BufferId) -> Option<DumpEntry> {
        self.entries.lock().get(&id).cloned()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Writes a resident slot to disk, then frees its memory.
    ///
    /// On failure the slot is left resident and untouched. Returns the
    /// number of bytes dumped.
    pub(crate) fn dump(&self, id: BufferId, slot: &mut Slot) -> Result<u64> {
        if slot.state != BufferState::Resident {
            return Err(Error::Internal(format!(
                "cannot dump buffer {id} in state {}",
                slot.state
            )));
        }
        if !slot.policy.is_managed() {
            return Err(Error::UnsupportedOperation {
                policy: slot.policy.name(),
                operation: "dump",
            });
        }

        let path = self.path_for(id);
        let bytes = slot.storage.as_slice();
        self.write_file(&path, bytes)
            .map_err(|source| Error::DumpIo { id, source })?;

        let entry = DumpEntry {
            path,
            len: bytes.len() as u64,
            checksum: crc32fast::hash(bytes),
        };
        let len = entry.len;
        self.entries.lock().insert(id, entry);

        let policy = slot.policy;
        policy.destroy(&mut slot.storage);
        slot.state = BufferState::Dumped;
        tracing::debug!("Dumped buffer {} ({} bytes)", id, len);
        Ok(len)
    }

    fn write_file(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes)?;
        writer.flush()?;
        if self.sync {
            writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Reads a dumped slot back into fresh memory.
    ///
    /// An unloaded source-backed slot reads from its source, which is
    /// dropped once loaded. Otherwise the dump file is read and its length
    /// and checksum are verified before the slot becomes resident. The dump
    /// file is kept so an unchanged buffer can be dumped again.
    pub(crate) fn restore(&self, id: BufferId, slot: &mut Slot) -> Result<u64> {
        if slot.state != BufferState::Dumped {
            return Err(Error::Internal(format!(
                "cannot restore buffer {id} in state {}",
                slot.state
            )));
        }
        if let Some(source) = &slot.source {
            let mut storage = Storage::Empty;
            slot.policy.allocate(&mut storage, slot.size)?;
            source.read_into(id, storage.as_mut_slice())?;
            slot.storage = storage;
            slot.state = BufferState::Resident;
            slot.source = None;
            tracing::debug!("Loaded buffer {} from its source ({} bytes)", id, slot.size);
            return Ok(slot.size as u64);
        }

        let entry = self.entry(id).ok_or_else(|| Error::RestoreIo {
            id,
            source: io::Error::new(io::ErrorKind::NotFound, "no dump entry"),
        })?;
        if entry.len != slot.size as u64 {
            return Err(restore_corrupt(id, "recorded length differs from buffer size"));
        }

        let mut storage = Storage::Empty;
        slot.policy.allocate(&mut storage, slot.size)?;
        read_file(&entry.path, storage.as_mut_slice())
            .map_err(|source| Error::RestoreIo { id, source })?;
        if crc32fast::hash(storage.as_slice()) != entry.checksum {
            return Err(restore_corrupt(id, "checksum mismatch"));
        }

        slot.storage = storage;
        slot.state = BufferState::Resident;
        tracing::debug!("Restored buffer {} ({} bytes)", id, entry.len);
        Ok(entry.len)
    }

    /// Deletes a buffer's dump file. No-op without an entry.
    pub(crate) fn forget(&self, id: BufferId) {
        let Some(entry) = self.entries.lock().remove(&id) else {
            return;
        };
        remove_file(&entry.path);
    }

    /// Deletes every dump file.
    pub(crate) fn clear(&self) {
        let entries: Vec<DumpEntry> = self.entries.lock().drain().map(|(_, e)| e).collect();
        if !entries.is_empty() {
            tracing::debug!("Removing {} dump file(s)", entries.len());
        }
        for entry in entries {
            remove_file(&entry.path);
        }
    }
}

impl Drop for DumpStore {
    fn drop(&mut self) {
        self.clear();
    }
}

fn read_file(path: &Path, out: &mut [u8]) -> io::Result<()> {
    let mut file = File::open(path)?;
    let on_disk = file.metadata()?.len();
    if on_disk != out.len() as u64 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("dump file holds {on_disk} bytes, expected {}", out.len()),
        ));
    }
    file.read_exact(out)
}

fn restore_corrupt(id: BufferId, reason: &str) -> Error {
    Error::RestoreIo {
        id,
        source: io::Error::new(io::ErrorKind::InvalidData, reason.to_string()),
    }
}

fn remove_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove dump file {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::AllocationPolicy;
    use tempfile::tempdir;

    fn resident(bytes: &[u8]) -> Slot {
        let mut slot = Slot {
            storage: Storage::Empty,
            policy: AllocationPolicy::Heap,
            state: BufferState::Resident,
            size: bytes.len(),
            source: None,
        };
        AllocationPolicy::Heap
            .allocate(&mut slot.storage, bytes.len())
            .unwrap();
        slot.storage.as_mut_slice().copy_from_slice(bytes);
        slot
    }

    #[test]
    fn test_dump_and_restore() {
        let dir = tempdir().unwrap();
        let store = DumpStore::open(Some(dir.path()), true).unwrap();
        let id = BufferId::new(7);
        let mut slot = resident(b"hello dump");

        assert_eq!(store.dump(id, &mut slot).unwrap(), 10);
        assert_eq!(slot.state, BufferState::Dumped);
        assert!(slot.storage.is_empty());
        assert_eq!(slot.size, 10);
        assert_eq!(fs::read(store.path_for(id)).unwrap(), b"hello dump");

        assert_eq!(store.restore(id, &mut slot).unwrap(), 10);
        assert_eq!(slot.state, BufferState::Resident);
        assert_eq!(slot.storage.as_slice(), b"hello dump");
    }

    #[test]
    fn test_file_name_is_deterministic() {
        let store = DumpStore::open(None, false).unwrap();
        let path = store.path_for(BufferId::new(255));
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "buffer-00000000000000ff.raw"
        );
        assert_eq!(path.parent().unwrap(), store.dir());
    }

    #[test]
    fn test_dump_failure_leaves_slot_resident() {
        let dir = tempdir().unwrap();
        let store = DumpStore::open(Some(dir.path()), false).unwrap();
        let id = BufferId::new(1);
        fs::create_dir(store.path_for(id)).unwrap();

        let mut slot = resident(b"abc");
        let err = store.dump(id, &mut slot).unwrap_err();
        assert!(matches!(err, Error::DumpIo { .. }));
        assert_eq!(slot.state, BufferState::Resident);
        assert_eq!(slot.storage.as_slice(), b"abc");
        assert!(store.entry(id).is_none());
    }

    #[test]
    fn test_restore_detects_corruption() {
        let store = DumpStore::open(None, false).unwrap();
        let id = BufferId::new(2);
        let mut slot = resident(b"abcd");
        store.dump(id, &mut slot).unwrap();

        fs::write(store.path_for(id), b"abcx").unwrap();
        let err = store.restore(id, &mut slot).unwrap_err();
        assert!(err.is_data_loss());
        assert_eq!(slot.state, BufferState::Dumped);

        fs::write(store.path_for(id), b"abc").unwrap();
        assert!(matches!(
            store.restore(id, &mut slot),
            Err(Error::RestoreIo { ref source, .. }) if source.kind() == io::ErrorKind::InvalidData
        ));

        fs::remove_file(store.path_for(id)).unwrap();
        assert!(matches!(
            store.restore(id, &mut slot),
            Err(Error::RestoreIo { ref source, .. }) if source.kind() == io::ErrorKind::NotFound
        ));
    }

    #[test]
    fn test_forget_is_idempotent() {
        let store = DumpStore::open(None, false).unwrap();
        let id = BufferId::new(3);
        store.forget(id);

        let mut slot = resident(b"xyz");
        store.dump(id, &mut slot).unwrap();
        let path = store.path_for(id);
        assert!(path.exists());

        store.forget(id);
        store.forget(id);
        assert!(!path.exists());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_redump_overwrites() {
        let store = DumpStore::open(None, false).unwrap();
        let id = BufferId::new(4);
        let mut slot = resident(b"first");
        store.dump(id, &mut slot).unwrap();
        store.restore(id, &mut slot).unwrap();
        slot.storage.as_mut_slice().copy_from_slice(b"again");
        store.dump(id, &mut slot).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(fs::read(store.path_for(id)).unwrap(), b"again");
    }

    #[test]
    fn test_clear_removes_files() {
        let dir = tempdir().unwrap();
        let store = DumpStore::open(Some(dir.path()), false).unwrap();
        for raw in 0..3 {
            let mut slot = resident(b"data");
            store.dump(BufferId::new(raw), &mut slot).unwrap();
        }
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 3);

        store.clear();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_external_cannot_be_dumped() {
        let store = DumpStore::open(None, false).unwrap();
        let mut slot = Slot {
            storage: Storage::External(Box::new(vec![1u8, 2, 3])),
            policy: AllocationPolicy::External,
            state: BufferState::Resident,
            size: 3,
            source: None,
        };
        assert!(matches!(
            store.dump(BufferId::new(5), &mut slot),
            Err(Error::UnsupportedOperation { .. })
        ));
        assert_eq!(slot.state, BufferState::Resident);
    }

    #[test]
    fn test_restore_from_source_writes_no_file() {
        let dir = tempdir().unwrap();
        let raw = dir.path().join("input.raw");
        fs::write(&raw, [4u8; 64]).unwrap();
        let store = DumpStore::open(Some(&dir.path().join("dumps")), false).unwrap();
        let id = BufferId::new(11);
        let mut slot = Slot {
            storage: Storage::Empty,
            policy: AllocationPolicy::PageAligned,
            state: BufferState::Dumped,
            size: 64,
            source: Some(crate::buffer::BufferSource::raw_file(&raw)),
        };

        assert_eq!(store.restore(id, &mut slot).unwrap(), 64);
        assert_eq!(slot.state, BufferState::Resident);
        assert!(slot.source.is_none());
        assert!(slot.storage.as_slice().iter().all(|&b| b == 4));
        assert!(store.entry(id).is_none());

        // Once loaded, a dump goes to the store like any other buffer.
        store.dump(id, &mut slot).unwrap();
        assert!(store.path_for(id).exists());
    }

    #[test]
    fn test_short_source_stays_dumped() {
        let store = DumpStore::open(None, false).unwrap();
        let mut slot = Slot {
            storage: Storage::Empty,
            policy: AllocationPolicy::Heap,
            state: BufferState::Dumped,
            size: 16,
            source: Some(crate::buffer::BufferSource::new(
                || -> io::Result<Box<dyn Read + Send>> { Ok(Box::new(io::Cursor::new(vec![0u8; 8]))) },
            )),
        };
        assert!(matches!(
            store.restore(BufferId::new(12), &mut slot),
            Err(Error::RestoreIo { .. })
        ));
        assert_eq!(slot.state, BufferState::Dumped);
        assert!(slot.source.is_some());
        assert!(slot.storage.is_empty());
    }
}
