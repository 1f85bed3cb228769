//! Buffer manager configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use outcore_common::utils::bytesize::ByteSize;
use outcore_common::utils::error::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::buffer::LoadingMode;

/// Built-in eviction policy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// Never dump.
    Never,
    /// Dump everything eligible whenever possible.
    Always,
    /// Keep managed resident bytes under a barrier.
    Barrier,
    /// Keep free memory above a watermark, with hysteresis.
    #[default]
    Valve,
}

impl PolicyKind {
    /// Returns the policy name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::Always => "always",
            Self::Barrier => "barrier",
            Self::Valve => "valve",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "never" | "never_dump" => Ok(Self::Never),
            "always" | "always_dump" => Ok(Self::Always),
            "barrier" | "barrier_dump" => Ok(Self::Barrier),
            "valve" | "valve_dump" => Ok(Self::Valve),
            _ => Err(Error::InvalidParameter {
                name: "policy".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Configuration for a [`BufferManager`](super::BufferManager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferManagerConfig {
    /// Active eviction policy.
    pub policy: PolicyKind,
    /// Whether allocations trigger eviction sweeps.
    pub enabled: bool,
    /// Free-memory watermark for the valve policy.
    pub min_free_bytes: u64,
    /// Extra bytes the valve policy frees past the watermark.
    pub hysteresis_bytes: u64,
    /// Resident-bytes limit for the barrier policy.
    pub barrier_bytes: u64,
    /// Buffers smaller than this are never dumped.
    pub min_dump_size: usize,
    /// Dump directory; a private temporary directory if `None`.
    pub dump_dir: Option<PathBuf>,
    /// Sync every dump file to disk before freeing memory.
    pub sync_dumps: bool,
    /// When source-backed buffers are loaded.
    pub loading_mode: LoadingMode,
}

impl Default for BufferManagerConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::default(),
            enabled: true,
            min_free_bytes: ByteSize::mib(512).as_u64(),
            hysteresis_bytes: ByteSize::mib(32).as_u64(),
            barrier_bytes: ByteSize::gib(1).as_u64(),
            min_dump_size: 4096,
            dump_dir: None,
            sync_dumps: false,
            loading_mode: LoadingMode::Direct,
        }
    }
}

impl BufferManagerConfig {
    /// Sets the eviction policy.
    pub fn with_policy(mut self, policy: PolicyKind) -> Self {
        self.policy = policy;
        self
    }

    /// Enables or disables automatic sweeps.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the valve watermark.
    pub fn with_min_free_bytes(mut self, bytes: u64) -> Self {
        self.min_free_bytes = bytes;
        self
    }

    /// Sets the valve hysteresis.
    pub fn with_hysteresis_bytes(mut self, bytes: u64) -> Self {
        self.hysteresis_bytes = bytes;
        self
    }

    /// Sets the barrier limit.
    pub fn with_barrier_bytes(mut self, bytes: u64) -> Self {
        self.barrier_bytes = bytes;
        self
    }

    /// Sets the small-buffer exemption threshold.
    pub fn with_min_dump_size(mut self, bytes: usize) -> Self {
        self.min_dump_size = bytes;
        self
    }

    /// Sets the dump directory.
    pub fn with_dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dump_dir = Some(dir.into());
        self
    }

    /// Syncs dump files before freeing memory.
    pub fn with_sync_dumps(mut self, sync: bool) -> Self {
        self.sync_dumps = sync;
        self
    }

    /// Stores a built-in policy parameter in its configuration field.
    ///
    /// Returns `false` for names no built-in policy uses.
    pub(crate) fn record_policy_param(&mut self, name: &str, value: &str) -> Result<bool> {
        let field = match name {
            "barrier" => &mut self.barrier_bytes,
            "min_free_mem" => &mut self.min_free_bytes,
            "hysteresis_offset" => &mut self.hysteresis_bytes,
            _ => return Ok(false),
        };
        *field = ByteSize::parse_param(name, value)?.as_u64();
        Ok(true)
    }

    /// Sets when source-backed buffers are loaded.
    pub fn with_loading_mode(mut self, mode: LoadingMode) -> Self {
        self.loading_mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BufferManagerConfig::default();
        assert_eq!(config.policy, PolicyKind::Valve);
        assert!(config.enabled);
        assert_eq!(config.min_free_bytes, 512 << 20);
        assert_eq!(config.hysteresis_bytes, 32 << 20);
        assert_eq!(config.min_dump_size, 4096);
        assert!(config.dump_dir.is_none());
        assert_eq!(config.loading_mode, LoadingMode::Direct);
    }

    #[test]
    fn test_policy_kind_parse() {
        assert_eq!("Valve".parse::<PolicyKind>().unwrap(), PolicyKind::Valve);
        assert_eq!("barrier_dump".parse::<PolicyKind>().unwrap(), PolicyKind::Barrier);
        assert!("sometimes".parse::<PolicyKind>().is_err());
    }

    #[test]
    fn test_record_policy_param() {
        let mut config = BufferManagerConfig::default();
        assert!(config.record_policy_param("barrier", "2MiB").unwrap());
        assert!(config.record_policy_param("min_free_mem", "1KiB").unwrap());
        assert_eq!(config.barrier_bytes, 2 << 20);
        assert_eq!(config.min_free_bytes, 1024);
        assert!(!config.record_policy_param("custom", "x").unwrap());
        assert!(config.record_policy_param("barrier", "lots").is_err());
        assert_eq!(config.barrier_bytes, 2 << 20);
    }

    #[test]
    fn test_json_partial_config() {
        let config: BufferManagerConfig =
            serde_json::from_str(r#"{"policy": "barrier", "barrier_bytes": 1024, "loading_mode": "lazy"}"#)
                .unwrap();
        assert_eq!(config.policy, PolicyKind::Barrier);
        assert_eq!(config.loading_mode, LoadingMode::Lazy);
        assert_eq!(config.barrier_bytes, 1024);
        assert_eq!(config.min_dump_size, 4096);

        let text = serde_json::to_string(&config).unwrap();
        assert!(text.contains(r#""policy":"barrier""#));
    }
}
