// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use crate::astro_util::{azimuth_distance, normalize_degrees};
use crate::site::OperationalLimits;
use crate::weather::Wind;

#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum WindSeverity {
    Nominal,
    Warn,
    Limit,
}

/// Azimuths the telescope should not point at, given the current wind.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindEnvelope {
    pub severity: WindSeverity,

    // Direction the wind blows from, degrees 0..360 clockwise from true
    // north.
    pub center_azimuth: f64,

    // Degrees. 0 when nominal (no wedge); 180 at the limit (whole sky).
    pub half_width: f64,
}

impl WindEnvelope {
    /// Both thresholds are inclusive: a speed equal to `wind_warn` is a
    /// warning and a speed equal to `wind_limit` is at the limit.
    pub fn from_wind(wind: &Wind, limits: &OperationalLimits) -> Self {
        let center_azimuth = normalize_degrees(wind.direction);
        if wind.speed >= limits.wind_limit {
            WindEnvelope{severity: WindSeverity::Limit, center_azimuth,
                         half_width: 180.0}
        } else if wind.speed >= limits.wind_warn {
            WindEnvelope{severity: WindSeverity::Warn, center_azimuth,
                         half_width: limits.warn_half_width}
        } else {
            WindEnvelope{severity: WindSeverity::Nominal, center_azimuth,
                         half_width: 0.0}
        }
    }

    /// Whether the given true-north azimuth lies inside the wedge.
    pub fn contains(&self, azimuth: f64) -> bool {
        match self.severity {
            WindSeverity::Nominal => false,
            WindSeverity::Limit => true,
            WindSeverity::Warn =>
                azimuth_distance(azimuth, self.center_azimuth) <= self.half_width,
        }
    }

    /// Whether pointing at `azimuth` is unsafe. The limit wedge always
    /// blocks; the warn wedge blocks only if `warn_blocks`.
    pub fn blocks(&self, azimuth: f64, warn_blocks: bool) -> bool {
        match self.severity {
            WindSeverity::Nominal => false,
            WindSeverity::Limit => true,
            WindSeverity::Warn => warn_blocks && self.contains(azimuth),
        }
    }
}

// mod tests.
