//! Registry of live buffers and resident-byte accounting.

use std::sync::{Arc, Weak};

use hashbrown::HashMap;
use outcore_common::types::BufferId;

use crate::buffer::BufferShared;

struct Entry {
    shared: Weak<BufferShared>,
    resident: u64,
    dumped: u64,
}

/// Non-owning map of buffers plus running byte totals.
///
/// Only mutated under the manager mutex.
#[derive(Default)]
pub(crate) struct Registry {
    entries: HashMap<BufferId, Entry>,
    resident_total: u64,
    dumped_total: u64,
}

impl Registry {
    pub(crate) fn register(&mut self, shared: &Arc<BufferShared>) {
        self.entries.insert(
            shared.id,
            Entry {
                shared: Arc::downgrade(shared),
                resident: 0,
                dumped: 0,
            },
        );
    }

    pub(crate) fn unregister(&mut self, id: BufferId) {
        if let Some(entry) = self.entries.remove(&id) {
            self.resident_total -= entry.resident;
            self.dumped_total -= entry.dumped;
        }
    }

    /// Records a buffer's new byte counts; returns `true` if its resident
    /// share grew.
    pub(crate) fn update(&mut self, id: BufferId, resident: u64, dumped: u64) -> bool {
        let Some(entry) = self.entries.get_mut(&id) else {
            tracing::error!("Size report for unregistered buffer {}", id);
            return false;
        };
        let grew = resident > entry.resident;
        self.resident_total = self.resident_total - entry.resident + resident;
        self.dumped_total = self.dumped_total - entry.dumped + dumped;
        entry.resident = resident;
        entry.dumped = dumped;
        grew
    }

    pub(crate) fn resident_total(&self) -> u64 {
        self.resident_total
    }

    pub(crate) fn dumped_total(&self) -> u64 {
        self.dumped_total
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Number of buffers holding memory, resident or dumped.
    pub(crate) fn allocated(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.resident > 0 || e.dumped > 0)
            .count()
    }

    /// Live buffers, in id order.
    pub(crate) fn live(&self) -> Vec<Arc<BufferShared>> {
        let mut live: Vec<_> = self
            .entries
            .values()
            .filter_map(|e| e.shared.upgrade())
            .collect();
        live.sort_by_key(|shared| shared.id);
        live
    }
}
