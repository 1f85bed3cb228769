use super::{EvictionPolicy, EvictionTarget, MemoryState, Trigger};

/// Never dumps anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverDump;

impl EvictionPolicy for NeverDump {
    fn name(&self) -> &'static str {
        "never"
    }

    fn reacts_to(&self, _trigger: Trigger) -> bool {
        false
    }

    fn plan(&self, _trigger: Trigger, _memory: &MemoryState) -> Option<EvictionTarget> {
        None
    }
}
