use outcore_common::utils::bytesize::ByteSize;
use outcore_common::utils::error::Result;

use super::{EvictionPolicy, EvictionTarget, MemoryState, Trigger, unknown_param};

/// Keeps managed resident bytes at or below a fixed barrier.
#[derive(Debug, Clone, Copy)]
pub struct BarrierDump {
    barrier: u64,
}

impl BarrierDump {
    /// Creates a barrier policy with a limit of `barrier` bytes.
    #[must_use]
    pub fn new(barrier: u64) -> Self {
        Self { barrier }
    }

    /// Returns the barrier in bytes.
    #[must_use]
    pub fn barrier(&self) -> u64 {
        self.barrier
    }
}

impl EvictionPolicy for BarrierDump {
    fn name(&self) -> &'static str {
        "barrier"
    }

    fn reacts_to(&self, trigger: Trigger) -> bool {
        !matches!(trigger, Trigger::Unlock)
    }

    fn plan(&self, _trigger: Trigger, memory: &MemoryState) -> Option<EvictionTarget> {
        (memory.resident_bytes > self.barrier)
            .then(|| EvictionTarget::Bytes(memory.resident_bytes - self.barrier))
    }

    fn param_names(&self) -> &'static [&'static str] {
        &["barrier"]
    }

    fn param(&self, name: &str) -> Option<String> {
        (name == "barrier").then(|| ByteSize(self.barrier).to_string())
    }

    fn set_param(&mut self, name: &str, value: &str) -> Result<()> {
        if name != "barrier" {
            return Err(unknown_param(name, value));
        }
        self.barrier = ByteSize::parse_param(name, value)?.as_u64();
        Ok(())
    }
}
