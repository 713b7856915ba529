//! Byte-count conversion used to size the destination block volume.
//!
//! Conversions use binary multiples (1 KiB = 1024 bytes) and perform no
//! rounding; [`block_volume_size_gb`] applies the ceiling used when requesting
//! a volume from the provider.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const BLOCK_SIZE: u64 = 1024;
const BYTES_PER_GIB: u64 = BLOCK_SIZE * BLOCK_SIZE * BLOCK_SIZE;

/// Target unit for a byte-count conversion.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum SizeUnit {
    /// 1024 bytes.
    Kilo,
    /// 1024² bytes.
    Mega,
    /// 1024³ bytes.
    Giga,
    /// 1024⁴ bytes.
    Tera,
    /// 1024⁵ bytes.
    Peta,
    /// 1024⁶ bytes.
    Exa,
}

impl SizeUnit {
    /// Number of divisions by 1024 needed to reach this unit.
    #[must_use]
    pub const fn steps(self) -> u32 {
        match self {
            Self::Kilo => 1,
            Self::Mega => 2,
            Self::Giga => 3,
            Self::Tera => 4,
            Self::Peta => 5,
            Self::Exa => 6,
        }
    }

    /// Short suffix used when rendering sizes.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Kilo => "KiB",
            Self::Mega => "MiB",
            Self::Giga => "GiB",
            Self::Tera => "TiB",
            Self::Peta => "PiB",
            Self::Exa => "EiB",
        }
    }
}

impl fmt::Display for SizeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

impl FromStr for SizeUnit {
    type Err = UnitError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "k" | "kb" | "kib" | "kilo" => Ok(Self::Kilo),
            "m" | "mb" | "mib" | "mega" => Ok(Self::Mega),
            "g" | "gb" | "gib" | "giga" => Ok(Self::Giga),
            "t" | "tb" | "tib" | "tera" => Ok(Self::Tera),
            "p" | "pb" | "pib" | "peta" => Ok(Self::Peta),
            "e" | "eb" | "eib" | "exa" => Ok(Self::Exa),
            _ => Err(UnitError::InvalidUnit(value.to_owned())),
        }
    }
}

/// Errors raised by unit conversion.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum UnitError {
    /// Raised when a unit label is not one of the supported multiples.
    #[error("unrecognised size unit '{0}' (expected one of k, m, g, t, p, e)")]
    InvalidUnit(String),
}

/// Converts `bytes` into `unit`, dividing by 1024 once per step.
#[expect(
    clippy::float_arithmetic,
    clippy::cast_precision_loss,
    reason = "the conversion is defined over floating point values"
)]
#[must_use]
pub fn bytes_to(bytes: u64, unit: SizeUnit) -> f64 {
    let mut value = bytes as f64;
    for _ in 0..unit.steps() {
        value /= BLOCK_SIZE as f64;
    }
    value
}

/// Converts `bytes` into the unit named by `unit`.
///
/// # Errors
///
/// Returns [`UnitError::InvalidUnit`] when `unit` is not recognised.
pub fn convert(bytes: u64, unit: &str) -> Result<f64, UnitError> {
    let parsed = SizeUnit::from_str(unit)?;
    Ok(bytes_to(bytes, parsed))
}

/// Size in whole GiB of the block volume needed to hold `bytes`.
///
/// The result is the ceiling of the GiB value, never less than one because
/// providers reject empty volumes.
#[must_use]
pub const fn block_volume_size_gb(bytes: u64) -> u64 {
    let rounded = bytes.div_ceil(BYTES_PER_GIB);
    if rounded == 0 { 1 } else { rounded }
}

/// Converts a whole number of GiB back into bytes, saturating on overflow.
#[must_use]
pub const fn gib_to_bytes(gib: u64) -> u64 {
    gib.saturating_mul(BYTES_PER_GIB)
}
