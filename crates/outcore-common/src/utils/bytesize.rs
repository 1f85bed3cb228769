//! Human-readable byte sizes.
//!
//! Runtime policy parameters arrive as strings such as `"512MB"` or
//! `"2 GiB"`. [`ByteSize`] parses them into a byte count and formats byte
//! counts back into the largest binary unit that keeps the value readable.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::Error;

const UNITS: &[(&str, u64)] = &[
    ("b", 1),
    ("kb", 1_000),
    ("kib", 1 << 10),
    ("mb", 1_000_000),
    ("mib", 1 << 20),
    ("gb", 1_000_000_000),
    ("gib", 1 << 30),
    ("tb", 1_000_000_000_000),
    ("tib", 1 << 40),
];

/// A byte count with unit-aware parsing and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ByteSize(pub u64);

impl ByteSize {
    /// One kibibyte.
    pub const KIB: u64 = 1 << 10;
    /// One mebibyte.
    pub const MIB: u64 = 1 << 20;
    /// One gibibyte.
    pub const GIB: u64 = 1 << 30;

    /// Creates a size of `bytes`.
    #[must_use]
    pub const fn b(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Creates a size of `n` mebibytes.
    #[must_use]
    pub const fn mib(n: u64) -> Self {
        Self(n * Self::MIB)
    }

    /// Creates a size of `n` gibibytes.
    #[must_use]
    pub const fn gib(n: u64) -> Self {
        Self(n * Self::GIB)
    }

    /// Returns the byte count.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Parses a size string, reporting failures against parameter `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for negative, malformed, or
    /// overflowing values.
    pub fn parse_param(name: &str, value: &str) -> Result<Self, Error> {
        parse(value).ok_or_else(|| Error::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
        })
    }
}

fn parse(value: &str) -> Option<ByteSize> {
    let trimmed = value.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    if digits.is_empty() {
        return None;
    }
    let count: u64 = digits.parse().ok()?;
    let unit = unit.trim().to_ascii_lowercase();
    let multiplier = if unit.is_empty() {
        1
    } else {
        UNITS.iter().find(|(name, _)| *name == unit)?.1
    };
    count.checked_mul(multiplier).map(ByteSize)
}

impl FromStr for ByteSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_param("size", s)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SUFFIXES: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
        let mut value = self.0;
        let mut idx = 0;
        // Only step up while the value stays exact.
        while idx + 1 < SUFFIXES.len() && value >= 1024 && value % 1024 == 0 {
            value /= 1024;
            idx += 1;
        }
        write!(f, "{value}{}", SUFFIXES[idx])
    }
}

impl From<u64> for ByteSize {
    fn from(bytes: u64) -> Self {
        Self(bytes)
    }
}

impl From<ByteSize> for u64 {
    fn from(size: ByteSize) -> Self {
        size.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!("2B".parse::<ByteSize>().unwrap().as_u64(), 2);
        assert_eq!("2".parse::<ByteSize>().unwrap().as_u64(), 2);
        assert_eq!("3KB".parse::<ByteSize>().unwrap().as_u64(), 3_000);
        assert_eq!("3KiB".parse::<ByteSize>().unwrap().as_u64(), 3 * 1024);
        assert_eq!("512 mib".parse::<ByteSize>().unwrap(), ByteSize::mib(512));
        assert_eq!(" 1GiB ".parse::<ByteSize>().unwrap(), ByteSize::gib(1));
        assert_eq!("1tb".parse::<ByteSize>().unwrap().as_u64(), 1_000_000_000_000);
    }

    #[test]
    fn test_parse_rejects_invalid() {
        for bad in ["-1B", "", "MB", "1.5MB", "12XB", "1 2MB"] {
            let err = ByteSize::parse_param("min_free_mem", bad).unwrap_err();
            assert!(
                matches!(err, Error::InvalidParameter { ref name, .. } if name == "min_free_mem"),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_overflow() {
        assert!("18446744073709551615TiB".parse::<ByteSize>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(ByteSize(0).to_string(), "0B");
        assert_eq!(ByteSize(1000).to_string(), "1000B");
        assert_eq!(ByteSize(4096).to_string(), "4KiB");
        assert_eq!(ByteSize::mib(32).to_string(), "32MiB");
        assert_eq!(ByteSize::gib(1).to_string(), "1GiB");
        assert_eq!(ByteSize(1536).to_string(), "1536B");
    }

    #[test]
    fn test_display_parses_back() {
        for size in [ByteSize(7), ByteSize::mib(3), ByteSize::gib(2)] {
            assert_eq!(size.to_string().parse::<ByteSize>().unwrap(), size);
        }
    }

    proptest::proptest! {
        #[test]
        fn test_display_parses_back_any(bytes in 0u64..(1 << 50)) {
            let size = ByteSize(bytes);
            proptest::prop_assert_eq!(size.to_string().parse::<ByteSize>().unwrap(), size);
        }
    }
}
