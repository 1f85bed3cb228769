use outcore_common::utils::bytesize::ByteSize;
use outcore_common::utils::error::Result;

use super::{EvictionPolicy, EvictionTarget, MemoryState, Trigger, unknown_param};

const MIN_FREE: &str = "min_free_mem";
const HYSTERESIS: &str = "hysteresis_offset";

/// Low-watermark policy with hysteresis.
///
/// When free memory drops below `min_free`, asks for the deficit plus
/// `hysteresis` bytes, so the next small allocation does not immediately
/// trigger another sweep.
#[derive(Debug, Clone, Copy)]
pub struct ValveDump {
    min_free: u64,
    hysteresis: u64,
}

impl ValveDump {
    /// Creates a valve policy.
    #[must_use]
    pub fn new(min_free: u64, hysteresis: u64) -> Self {
        Self {
            min_free,
            hysteresis,
        }
    }

    /// Returns the free-memory watermark in bytes.
    #[must_use]
    pub fn min_free(&self) -> u64 {
        self.min_free
    }

    /// Returns the hysteresis margin in bytes.
    #[must_use]
    pub fn hysteresis(&self) -> u64 {
        self.hysteresis
    }
}

impl EvictionPolicy for ValveDump {
    fn name(&self) -> &'static str {
        "valve"
    }

    fn reacts_to(&self, trigger: Trigger) -> bool {
        !matches!(trigger, Trigger::Unlock)
    }

    fn plan(&self, _trigger: Trigger, memory: &MemoryState) -> Option<EvictionTarget> {
        if memory.free_bytes >= self.min_free {
            return None;
        }
        let deficit = self.min_free - memory.free_bytes;
        Some(EvictionTarget::Bytes(deficit.saturating_add(self.hysteresis)))
    }

    fn param_names(&self) -> &'static [&'static str] {
        &[MIN_FREE, HYSTERESIS]
    }

    fn param(&self, name: &str) -> Option<String> {
        match name {
            MIN_FREE => Some(ByteSize(self.min_free).to_string()),
            HYSTERESIS => Some(ByteSize(self.hysteresis).to_string()),
            _ => None,
        }
    }

    fn set_param(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            MIN_FREE => self.min_free = ByteSize::parse_param(name, value)?.as_u64(),
            HYSTERESIS => self.hysteresis = ByteSize::parse_param(name, value)?.as_u64(),
            _ => return Err(unknown_param(name, value)),
        }
        Ok(())
    }
}
