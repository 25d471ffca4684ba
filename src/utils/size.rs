//! Byte sizes with binary-unit parsing, formatting and alignment helpers

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};
use std::str::FromStr;
use thiserror::Error;

pub const KIB: u64 = 1024;
pub const MIB: u64 = KIB * 1024;
pub const GIB: u64 = MIB * 1024;
pub const TIB: u64 = GIB * 1024;

static SIZE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*([0-9]+(?:\.[0-9]+)?)\s*([KMGTP]i?B?|B)?\s*$").expect("valid size regex")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid size: {0:?}")]
pub struct SizeParseError(pub String);

/// A size in bytes. `DiskSize::unlimited()` is used for open upper bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DiskSize(u64);

impl DiskSize {
    pub const fn zero() -> Self {
        DiskSize(0)
    }

    pub const fn unlimited() -> Self {
        DiskSize(u64::MAX)
    }

    pub const fn b(bytes: u64) -> Self {
        DiskSize(bytes)
    }

    pub const fn kib(n: u64) -> Self {
        DiskSize(n * KIB)
    }

    pub const fn mib(n: u64) -> Self {
        DiskSize(n * MIB)
    }

    pub const fn gib(n: u64) -> Self {
        DiskSize(n * GIB)
    }

    pub const fn tib(n: u64) -> Self {
        DiskSize(n * TIB)
    }

    pub const fn bytes(self) -> u64 {
        self.0
    }

    pub fn is_unlimited(self) -> bool {
        self.0 == u64::MAX
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn saturating_sub(self, other: DiskSize) -> DiskSize {
        if self.is_unlimited() {
            return self;
        }
        DiskSize(self.0.saturating_sub(other.0))
    }

    /// Round down to a multiple of `align`
    pub fn floor(self, align: DiskSize) -> DiskSize {
        if align.0 == 0 || self.is_unlimited() {
            return self;
        }
        DiskSize((self.0 / align.0) * align.0)
    }

    /// Round up to a multiple of `align`
    pub fn ceil(self, align: DiskSize) -> DiskSize {
        if align.0 == 0 || self.is_unlimited() {
            return self;
        }
        DiskSize(self.0.div_ceil(align.0).saturating_mul(align.0))
    }

    /// Multiply by a ratio without overflowing
    pub fn scale(self, numerator: u64, denominator: u64) -> DiskSize {
        if denominator == 0 || self.is_unlimited() {
            return self;
        }
        let value = (self.0 as u128 * numerator as u128) / denominator as u128;
        DiskSize(value.min(u64::MAX as u128 - 1) as u64)
    }

    /// Human-readable representation, e.g. `500.00 MiB`
    pub fn human(self) -> String {
        if self.is_unlimited() {
            return "unlimited".to_string();
        }
        let bytes = self.0;
        if bytes >= TIB {
            format!("{:.2} TiB", bytes as f64 / TIB as f64)
        } else if bytes >= GIB {
            format!("{:.2} GiB", bytes as f64 / GIB as f64)
        } else if bytes >= MIB {
            format!("{:.2} MiB", bytes as f64 / MIB as f64)
        } else if bytes >= KIB {
            format!("{:.2} KiB", bytes as f64 / KIB as f64)
        } else {
            format!("{} B", bytes)
        }
    }

    /// Exact representation that parses back to the same value
    pub fn exact(self) -> String {
        if self.is_unlimited() {
            return "unlimited".to_string();
        }
        let bytes = self.0;
        for (unit, name) in [(TIB, "TiB"), (GIB, "GiB"), (MIB, "MiB"), (KIB, "KiB")] {
            if bytes >= unit && bytes % unit == 0 {
                return format!("{} {}", bytes / unit, name);
            }
        }
        format!("{} B", bytes)
    }
}

impl Add for DiskSize {
    type Output = DiskSize;

    fn add(self, other: DiskSize) -> DiskSize {
        DiskSize(self.0.saturating_add(other.0))
    }
}

impl AddAssign for DiskSize {
    fn add_assign(&mut self, other: DiskSize) {
        *self = *self + other;
    }
}

impl Sub for DiskSize {
    type Output = DiskSize;

    fn sub(self, other: DiskSize) -> DiskSize {
        self.saturating_sub(other)
    }
}

impl Sum for DiskSize {
    fn sum<I: Iterator<Item = DiskSize>>(iter: I) -> DiskSize {
        iter.fold(DiskSize::zero(), |acc, s| acc + s)
    }
}

impl fmt::Display for DiskSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.human())
    }
}

impl FromStr for DiskSize {
    type Err = SizeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("unlimited") || trimmed.eq_ignore_ascii_case("max") {
            return Ok(DiskSize::unlimited());
        }

        let caps = SIZE_RE
            .captures(trimmed)
            .ok_or_else(|| SizeParseError(s.to_string()))?;
        let number: f64 = caps[1].parse().map_err(|_| SizeParseError(s.to_string()))?;
        let unit = caps
            .get(2)
            .map(|m| m.as_str().to_ascii_uppercase())
            .unwrap_or_else(|| "B".to_string());

        let multiplier = match unit.chars().next() {
            Some('K') => KIB,
            Some('M') => MIB,
            Some('G') => GIB,
            Some('T') => TIB,
            Some('P') => TIB * 1024,
            _ => 1,
        };

        Ok(DiskSize((number * multiplier as f64).round() as u64))
    }
}

impl Serialize for DiskSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.exact())
    }
}

impl<'de> Deserialize<'de> for DiskSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
