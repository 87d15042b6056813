// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::{fmt, str::FromStr, time::Duration};

/// A data rate in bits per second.
///
/// The topology files describe link capacities with the usual unit suffixes
/// (`1Gbps`, `100Mbps`, ...), so the type parses and prints those forms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataRate(u64);

impl DataRate {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub const fn from_bps(bits_per_sec: u64) -> Self {
        Self(bits_per_sec)
    }

    /// Converts a fractional bits/s value, as produced by bandwidth-function
    /// arithmetic, into a rate. Negative and non-finite values collapse to
    /// zero.
    #[inline]
    pub fn from_bps_f64(bits_per_sec: f64) -> Self {
        if bits_per_sec.is_finite() && bits_per_sec > 0.0 {
            Self(bits_per_sec as u64)
        } else {
            Self::ZERO
        }
    }

    #[inline]
    pub const fn bits_per_sec(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn as_f64(self) -> f64 {
        self.0 as f64
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Returns the time needed to serialise `bytes` onto a link of this rate.
    ///
    /// A zero rate never transmits; callers are expected to gate on
    /// [`DataRate::is_zero`] first, so this saturates to the maximum duration.
    #[inline]
    pub fn transmission_time(self, bytes: usize) -> Duration {
        if self.0 == 0 {
            return Duration::MAX;
        }
        let bits = bytes as u128 * 8;
        let nanos = (bits * 1_000_000_000) / self.0 as u128;
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParseRateError;

impl fmt::Display for ParseRateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid data rate (expected e.g. `1Gbps` or `500000bps`)")
    }
}

impl std::error::Error for ParseRateError {}

impl FromStr for DataRate {
    type Err = ParseRateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (value, multiplier) = if let Some(v) = s.strip_suffix("Gbps") {
            (v, 1_000_000_000)
        } else if let Some(v) = s.strip_suffix("Mbps") {
            (v, 1_000_000)
        } else if let Some(v) = s.strip_suffix("Kbps") {
            (v, 1_000)
        } else if let Some(v) = s.strip_suffix("bps") {
            (v, 1)
        } else {
            (s, 1)
        };

        let value: f64 = value.trim().parse().map_err(|_| ParseRateError)?;
        if !value.is_finite() || value < 0.0 {
            return Err(ParseRateError);
        }

        Ok(Self((value * multiplier as f64) as u64))
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            bps if bps >= 1_000_000_000 && bps % 1_000_000_000 == 0 => {
                write!(f, "{}Gbps", bps / 1_000_000_000)
            }
            bps if bps >= 1_000_000 && bps % 1_000_000 == 0 => {
                write!(f, "{}Mbps", bps / 1_000_000)
            }
            bps if bps >= 1_000 && bps % 1_000 == 0 => write!(f, "{}Kbps", bps / 1_000),
            bps => write!(f, "{bps}bps"),
        }
    }
}
