//! Validated VM setting values used by assignment workflows.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// MMIO gap sizes, in MiB, reserved for directly assigned devices.
///
/// Devices with large BARs need the VM's low and high MMIO gaps widened
/// before they can map their registers into guest address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MmioGap {
    /// Gap below 4 GiB, in MiB.
    pub low_mb: u64,
    /// Gap above 4 GiB, in MiB.
    pub high_mb: u64,
}

impl MmioGap {
    /// Smallest accepted low gap, in MiB.
    pub const LOW_MIN_MB: u64 = 128;
    /// Largest accepted low gap, in MiB.
    pub const LOW_MAX_MB: u64 = 3584;
    /// Smallest accepted high gap, in MiB.
    pub const HIGH_MIN_MB: u64 = 4096;

    /// Create a gap pair, validating the ranges.
    pub fn new(low_mb: u64, high_mb: u64) -> Result<Self> {
        let gap = Self { low_mb, high_mb };
        gap.validate()?;
        Ok(gap)
    }

    /// Check the gap sizes against the platform's accepted ranges.
    pub fn validate(&self) -> Result<()> {
        if self.low_mb < Self::LOW_MIN_MB || self.low_mb > Self::LOW_MAX_MB {
            return Err(Error::Validation {
                field: "low_mb",
                message: format!(
                    "low MMIO gap must be within {}..={} MiB, got {}",
                    Self::LOW_MIN_MB,
                    Self::LOW_MAX_MB,
                    self.low_mb
                ),
            });
        }
        if self.high_mb < Self::HIGH_MIN_MB {
            return Err(Error::Validation {
                field: "high_mb",
                message: format!(
                    "high MMIO gap must be at least {} MiB, got {}",
                    Self::HIGH_MIN_MB,
                    self.high_mb
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_in_range_gaps() {
        assert!(MmioGap::new(128, 4096).is_ok());
        assert!(MmioGap::new(3584, 33554432).is_ok());
        assert!(MmioGap::new(1024, 32768).is_ok());
    }

    #[test]
    fn test_rejects_low_gap_out_of_range() {
        assert!(MmioGap::new(127, 4096).is_err());
        assert!(MmioGap::new(3585, 4096).is_err());
        assert!(MmioGap::new(0, 4096).is_err());
    }

    #[test]
    fn test_rejects_small_high_gap() {
        assert!(MmioGap::new(128, 4095).is_err());
        assert!(MmioGap::new(128, 0).is_err());
    }
}
