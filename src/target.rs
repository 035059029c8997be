// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::sync::Arc;

use canonical_error::{CanonicalError, invalid_argument_error};

use crate::astro_util::EquatorialCoord;
use crate::site::OperationalLimits;

/// Per-program overrides of the site's limits. Unset fields defer to the
/// site. Shared read-only between all targets of a program.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Constraints {
    pub max_airmass: Option<f64>,
    pub min_moon_angle: Option<f64>,
}

impl Constraints {
    pub fn validate(&self) -> Result<(), CanonicalError> {
        if let Some(max_airmass) = self.max_airmass {
            if !(max_airmass > 1.0) {
                return Err(invalid_argument_error(
                    format!("max_airmass must be > 1.0, got {}", max_airmass).as_str()));
            }
        }
        if let Some(min_moon_angle) = self.min_moon_angle {
            if !(0.0..=180.0).contains(&min_moon_angle) {
                return Err(invalid_argument_error(
                    format!("min_moon_angle must be in 0..180, got {}",
                            min_moon_angle).as_str()));
            }
        }
        Ok(())
    }
}

/// A catalogued sidereal object. Immutable once created.
#[derive(Clone, Debug, PartialEq)]
pub struct Target {
    pub name: String,
    pub coord: EquatorialCoord,
    pub constraints: Arc<Constraints>,
    pub program: Option<String>,
}

impl Target {
    pub fn new(name: &str, coord: EquatorialCoord, constraints: Arc<Constraints>,
               program: Option<String>) -> Result<Self, CanonicalError> {
        if name.trim().is_empty() {
            return Err(invalid_argument_error("Target name is empty"));
        }
        if !(0.0..24.0).contains(&coord.ra) {
            return Err(invalid_argument_error(
                format!("Target {}: right ascension {}h outside 0..24",
                        name, coord.ra).as_str()));
        }
        if !(-90.0..=90.0).contains(&coord.dec) {
            return Err(invalid_argument_error(
                format!("Target {}: declination {} outside -90..90",
                        name, coord.dec).as_str()));
        }
        constraints.validate()?;
        Ok(Target{name: name.trim().to_string(), coord, constraints, program})
    }
}

/// The thresholds that actually apply to one target at one site.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EffectiveConstraints {
    pub max_airmass: f64,
    pub min_moon_angle: f64,
}

/// A target can only tighten the site's limits: the lower airmass ceiling
/// and the higher moon-angle floor win.
pub fn effective_constraints(limits: &OperationalLimits, constraints: &Constraints)
                             -> EffectiveConstraints {
    let max_airmass = match constraints.max_airmass {
        Some(a) => a.min(limits.max_airmass),
        None => limits.max_airmass,
    };
    let min_moon_angle = match constraints.min_moon_angle {
        Some(m) => m.max(limits.min_moon_angle),
        None => limits.min_moon_angle,
    };
    EffectiveConstraints{max_airmass, min_moon_angle}
}

// mod tests.
