use super::{EvictionPolicy, EvictionTarget, MemoryState, Trigger};

/// Dumps every eligible buffer at every opportunity.
///
/// Keeps RAM usage minimal at the cost of constant I/O; mostly useful to
/// exercise the dump path.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysDump;

impl EvictionPolicy for AlwaysDump {
    fn name(&self) -> &'static str {
        "always"
    }

    fn reacts_to(&self, _trigger: Trigger) -> bool {
        true
    }

    fn plan(&self, _trigger: Trigger, _memory: &MemoryState) -> Option<EvictionTarget> {
        Some(EvictionTarget::Everything)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_always_plans_everything() {
        let memory = MemoryState {
            resident_bytes: 0,
            free_bytes: u64::MAX,
            total_bytes: u64::MAX,
        };
        assert_eq!(
            AlwaysDump.plan(Trigger::Unlock, &memory),
            Some(EvictionTarget::Everything)
        );
        assert!(AlwaysDump.reacts_to(Trigger::Unlock));
    }
}
