//! Eviction policies.
//!
//! A policy decides *whether* and *how much* to dump; the manager's sweep
//! decides *which* buffers (largest first, least recently used among equal
//! sizes) and performs the I/O. Policies never fail a sweep: the worst they
//! can do is ask for nothing.
//!
//! | Name | Dumps when | Target |
//! |------|-----------|--------|
//! | `never` | never | - |
//! | `always` | any allocation, restore, resize or unlock | everything eligible |
//! | `barrier` | managed resident bytes exceed `barrier` | the excess |
//! | `valve` | free memory drops below `min_free_mem` | deficit + `hysteresis_offset` |

mod always;
mod barrier;
mod never;
mod valve;

use std::fmt;

use outcore_common::utils::error::{Error, Result};
use serde::Serialize;

pub use always::AlwaysDump;
pub use barrier::BarrierDump;
pub use never::NeverDump;
pub use valve::ValveDump;

use crate::manager::{BufferManagerConfig, PolicyKind};

/// Names accepted by [`policy_from_name`].
pub const POLICY_NAMES: [&str; 4] = ["never", "always", "barrier", "valve"];

/// Event that caused the manager to consult its policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// A buffer was allocated or adopted memory.
    Allocate,
    /// A buffer grew.
    Reallocate,
    /// A dumped buffer was read back.
    Restore,
    /// A buffer's last lock was released.
    Unlock,
    /// The policy or its parameters changed.
    Refresh,
    /// Explicit [`BufferManager::sweep`](crate::manager::BufferManager::sweep).
    Manual,
}

impl Trigger {
    /// Returns the trigger name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allocate => "allocate",
            Self::Reallocate => "reallocate",
            Self::Restore => "restore",
            Self::Unlock => "unlock",
            Self::Refresh => "refresh",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Memory figures a policy plans against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryState {
    /// Bytes resident in managed buffers.
    pub resident_bytes: u64,
    /// Estimated free system memory.
    pub free_bytes: u64,
    /// Total system memory, or `u64::MAX` if unknown.
    pub total_bytes: u64,
}

/// How much a sweep should free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionTarget {
    /// Free at least this many bytes.
    Bytes(u64),
    /// Dump every eligible buffer.
    Everything,
}

impl EvictionTarget {
    /// Returns `true` once `freed` bytes satisfy the target.
    #[must_use]
    pub fn is_met(self, freed: u64) -> bool {
        match self {
            Self::Bytes(needed) => freed >= needed,
            Self::Everything => false,
        }
    }
}

/// Decides when the manager should dump buffers, and how much.
pub trait EvictionPolicy: Send + Sync + fmt::Debug {
    /// Returns the policy name (one of [`POLICY_NAMES`] for built-ins).
    fn name(&self) -> &'static str;

    /// Returns `true` if the policy wants to be consulted on `trigger`.
    ///
    /// Manual and refresh sweeps always consult the policy.
    fn reacts_to(&self, trigger: Trigger) -> bool;

    /// Returns what to free, or `None` to leave memory alone.
    fn plan(&self, trigger: Trigger, memory: &MemoryState) -> Option<EvictionTarget>;

    /// Returns the names of the runtime parameters.
    fn param_names(&self) -> &'static [&'static str] {
        &[]
    }

    /// Returns a parameter's current value.
    fn param(&self, _name: &str) -> Option<String> {
        None
    }

    /// Sets a parameter from its string form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for unknown names or malformed
    /// values.
    fn set_param(&mut self, name: &str, value: &str) -> Result<()> {
        Err(unknown_param(name, value))
    }
}

pub(crate) fn unknown_param(name: &str, value: &str) -> Error {
    Error::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
    }
}

/// Builds the policy selected by `config`.
#[must_use]
pub fn policy_from_config(config: &BufferManagerConfig) -> Box<dyn EvictionPolicy> {
    match config.policy {
        PolicyKind::Never => Box::new(NeverDump),
        PolicyKind::Always => Box::new(AlwaysDump),
        PolicyKind::Barrier => Box::new(BarrierDump::new(config.barrier_bytes)),
        PolicyKind::Valve => Box::new(ValveDump::new(
            config.min_free_bytes,
            config.hysteresis_bytes,
        )),
    }
}

/// Builds a policy by name, with parameters taken from `config`.
///
/// # Errors
///
/// Returns [`Error::InvalidParameter`] if the name is unknown.
pub fn policy_from_name(name: &str, config: &BufferManagerConfig) -> Result<Box<dyn EvictionPolicy>> {
    let kind: PolicyKind = name.parse()?;
    let config = config.clone().with_policy(kind);
    Ok(policy_from_config(&config))
}
