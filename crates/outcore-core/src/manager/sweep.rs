//! Eviction sweeps.

use std::sync::Arc;

use outcore_common::types::BufferId;
use serde::Serialize;

use super::{BufferManager, ManagerState};
use crate::buffer::{BufferShared, BufferState};
use crate::eviction::{EvictionTarget, MemoryState, Trigger};

/// Outcome of one eviction sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// What caused the sweep.
    pub trigger: Trigger,
    /// What the policy asked for; `None` if it asked for nothing.
    pub target: Option<EvictionTarget>,
    /// Candidates examined.
    pub considered: usize,
    /// Buffers dumped, in dump order.
    pub dumped: Vec<BufferId>,
    /// Bytes freed.
    pub freed_bytes: u64,
    /// Dumps that failed, with the error message.
    pub failures: Vec<(BufferId, String)>,
    /// Whether the target was reached.
    pub satisfied: bool,
}

impl SweepReport {
    pub(crate) fn idle(trigger: Trigger) -> Self {
        Self {
            trigger,
            target: None,
            considered: 0,
            dumped: Vec::new(),
            freed_bytes: 0,
            failures: Vec::new(),
            satisfied: true,
        }
    }

    /// Returns `true` if some dumps failed.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

impl BufferManager {
    /// Consults the policy and dumps candidates until its target is met.
    ///
    /// Runs with the manager mutex held. Candidate slots are only ever
    /// try-locked: a buffer somebody is acquiring is skipped, never waited
    /// for. Returns `None` if the policy does not react to `trigger`.
    pub(super) fn sweep_locked(
        &self,
        state: &mut ManagerState,
        trigger: Trigger,
        exclude: Option<BufferId>,
    ) -> Option<SweepReport> {
        let target = {
            let policy = self.policy.read();
            let consulted = matches!(trigger, Trigger::Manual | Trigger::Refresh)
                || policy.reacts_to(trigger);
            if !consulted {
                return None;
            }
            let resident_bytes = state.registry.resident_total();
            let memory = MemoryState {
                resident_bytes,
                free_bytes: self.monitor.free_memory(resident_bytes),
                total_bytes: self.monitor.total_memory(),
            };
            policy.plan(trigger, &memory)
        };

        let mut report = SweepReport::idle(trigger);
        let Some(target) = target else {
            return Some(report);
        };
        report.target = Some(target);

        let min_dump_size = self.min_dump_size();
        let mut candidates: Vec<Arc<BufferShared>> = state
            .registry
            .live()
            .into_iter()
            .filter(|shared| Some(shared.id) != exclude && shared.is_dump_candidate(min_dump_size))
            .collect();
        // Largest first; least recently used first among equal sizes.
        candidates.sort_by(|a, b| {
            b.size()
                .cmp(&a.size())
                .then_with(|| a.last_access().cmp(&b.last_access()))
        });

        for shared in candidates {
            if target.is_met(report.freed_bytes) {
                break;
            }
            report.considered += 1;
            if shared.lock_count() > 0 {
                continue;
            }
            let Some(mut slot) = shared.slot.try_write() else {
                continue;
            };
            if slot.state != BufferState::Resident || shared.lock_count() > 0 {
                continue;
            }
            match self.dumps.dump(shared.id, &mut slot) {
                Ok(bytes) => {
                    shared.publish(&slot);
                    state.registry.update(shared.id, 0, bytes);
                    self.counters.record_dump();
                    report.dumped.push(shared.id);
                    report.freed_bytes += bytes;
                }
                Err(e) => {
                    tracing::warn!("Eviction sweep skipped buffer {}: {}", shared.id, e);
                    self.counters.record_dump_failure();
                    report.failures.push((shared.id, e.to_string()));
                }
            }
        }

        report.satisfied = match target {
            EvictionTarget::Bytes(needed) => report.freed_bytes >= needed,
            EvictionTarget::Everything => report.failures.is_empty(),
        };
        if report.dumped.is_empty() && report.failures.is_empty() {
            tracing::debug!("Sweep ({}) found nothing to dump", trigger);
        } else {
            tracing::debug!(
                "Sweep ({}) dumped {} buffer(s), freed {} bytes, {} failure(s)",
                trigger,
                report.dumped.len(),
                report.freed_bytes,
                report.failures.len()
            );
        }
        if !report.satisfied {
            tracing::debug!("Sweep ({}) could not reach {:?}", trigger, target);
        }
        state.last_report = Some(report.clone());
        Some(report)
    }
}
