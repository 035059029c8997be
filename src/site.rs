// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::sync::{Arc, Mutex};

use canonical_error::{CanonicalError, invalid_argument_error};
use log::info;

/// Static site geometry. Immutable once loaded.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Site {
    pub name: String,
    pub latitude: f64,  // -90..90
    pub longitude: f64,  // -180..180, positive east.
    pub elevation: f64,  // Metres.

    // Azimuth zero point, degrees clockwise from true north. Reported
    // azimuths are relative to this direction; 0 means true north. Some
    // sites report azimuth relative to an instrument mounting axis instead.
    pub azimuth_reference: f64,
}

impl Site {
    pub fn validate(&self) -> Result<(), CanonicalError> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(invalid_argument_error(
                format!("Site {}: latitude {} outside -90..90",
                        self.name, self.latitude).as_str()));
        }
        if !(-180.0..360.0).contains(&self.longitude) {
            return Err(invalid_argument_error(
                format!("Site {}: longitude {} outside -180..360",
                        self.name, self.longitude).as_str()));
        }
        if !self.elevation.is_finite() || !self.azimuth_reference.is_finite() {
            return Err(invalid_argument_error(
                format!("Site {}: elevation and azimuth_reference must be finite",
                        self.name).as_str()));
        }
        Ok(())
    }
}

/// The operational thresholds of a site. Replaced as a whole, never field
/// by field.
#[derive(Clone, Debug, PartialEq)]
pub struct OperationalLimits {
    // Default airmass ceiling. A target may only tighten this.
    pub max_airmass: f64,

    // Default minimum angle to the Moon, degrees. A target may only raise
    // this.
    pub min_moon_angle: f64,

    // Wind speeds (m/s) at which pointing becomes restricted.
    pub wind_warn: f64,
    pub wind_limit: f64,

    // Whether a target inside the warn wedge is considered unsafe. The limit
    // wedge always blocks.
    pub warn_blocks: bool,

    // Half-width of the warn wedge around the wind direction, degrees.
    pub warn_half_width: f64,
}

impl Default for OperationalLimits {
    fn default() -> Self {
        OperationalLimits{max_airmass: 1.5,
                          min_moon_angle: 30.0,
                          wind_warn: 15.0,
                          wind_limit: 20.0,
                          warn_blocks: false,
                          warn_half_width: 90.0}
    }
}

impl OperationalLimits {
    pub fn validate(&self) -> Result<(), CanonicalError> {
        if !(self.max_airmass > 1.0) {
            return Err(invalid_argument_error(
                format!("max_airmass must be > 1.0, got {}",
                        self.max_airmass).as_str()));
        }
        if !(self.min_moon_angle >= 0.0 && self.min_moon_angle <= 180.0) {
            return Err(invalid_argument_error(
                format!("min_moon_angle must be in 0..180, got {}",
                        self.min_moon_angle).as_str()));
        }
        if !(self.wind_warn >= 0.0 && self.wind_warn <= self.wind_limit) ||
            !self.wind_limit.is_finite()
        {
            return Err(invalid_argument_error(
                format!("Need 0 <= wind_warn <= wind_limit, got {} and {}",
                        self.wind_warn, self.wind_limit).as_str()));
        }
        if !(self.warn_half_width > 0.0 && self.warn_half_width <= 180.0) {
            return Err(invalid_argument_error(
                format!("warn_half_width must be in (0, 180], got {}",
                        self.warn_half_width).as_str()));
        }
        Ok(())
    }
}

/// A site together with its current operational limits. The limits can be
/// swapped at runtime by `reconfigure()`; readers always see either the old
/// or the new set in full.
#[derive(Debug)]
pub struct SiteModel {
    site: Site,
    limits: Mutex<Arc<OperationalLimits>>,
}

impl SiteModel {
    pub fn new(site: Site, limits: OperationalLimits)
               -> Result<Self, CanonicalError> {
        site.validate()?;
        limits.validate()?;
        Ok(SiteModel{site, limits: Mutex::new(Arc::new(limits))})
    }

    pub fn site(&self) -> &Site {
        &self.site
    }

    /// Snapshot of the current limits. Holding on to the returned value is
    /// fine; a concurrent `reconfigure()` does not alter it.
    pub fn limits(&self) -> Arc<OperationalLimits> {
        self.limits.lock().unwrap().clone()
    }

    pub fn reconfigure(&self, limits: OperationalLimits)
                       -> Result<(), CanonicalError> {
        limits.validate()?;
        info!("Site {} limits reconfigured: {:?}", self.site.name, limits);
        *self.limits.lock().unwrap() = Arc::new(limits);
        Ok(())
    }
}

// mod tests.
