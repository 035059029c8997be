// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::time::{Duration, SystemTime};

use log::{debug, info};

use crate::astro_util::{HorizonCoord, MOON_ANGULAR_RADIUS, airmass,
                        angular_separation, equatorial_to_horizontal,
                        normalize_degrees};
use crate::environment::EnvironmentalSnapshot;
use crate::site::{OperationalLimits, Site, SiteModel};
use crate::target::{EffectiveConstraints, Target, effective_constraints};
use crate::wind_envelope::{WindEnvelope, WindSeverity};

/// Default maximum age of the weather for wind safety to be evaluated.
pub const DEFAULT_WEATHER_STALENESS: Duration = Duration::from_secs(10 * 60);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WindSafety {
    Safe,
    Unsafe,

    // Weather never refreshed, last refresh failed, too old relative to the
    // evaluation time, or the stations gave no valid wind. Never treated as
    // safe.
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ObservabilityPolicy {
    // Wind is Unknown when the last successful weather refresh is further
    // than this from the evaluation time, in either direction.
    pub weather_staleness: Duration,
}

impl Default for ObservabilityPolicy {
    fn default() -> Self {
        ObservabilityPolicy{weather_staleness: DEFAULT_WEATHER_STALENESS}
    }
}

/// Why a target is or is not observable at one instant. Every field is
/// computed even when an earlier check already fails.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ObservabilityVerdict {
    pub horizon: HorizonCoord,

    // None when the target is on or below the horizon.
    pub airmass: Option<f64>,

    // Degrees between the target and the Moon's center.
    pub moon_separation: f64,

    pub constraints: EffectiveConstraints,
    pub within_airmass: bool,
    pub within_moon_separation: bool,

    pub wind_safety: WindSafety,
    // None when wind safety is Unknown.
    pub wind_severity: Option<WindSeverity>,

    // None when there is no cloud mask or the target is outside its range.
    pub cloud_free: Option<bool>,

    pub observable: bool,
}

/// Decides whether `target` can be observed from `site_model` at `time`,
/// using the Moon position and weather of `snapshot`.
pub fn evaluate(target: &Target, snapshot: &EnvironmentalSnapshot,
                site_model: &SiteModel, time: &SystemTime,
                policy: &ObservabilityPolicy) -> ObservabilityVerdict {
    let site = site_model.site();
    let limits = site_model.limits();
    let constraints = effective_constraints(&limits, &target.constraints);

    let horizon = equatorial_to_horizontal(&target.coord, time, site);
    let airmass = airmass(horizon.altitude);
    let within_airmass = airmass.is_some_and(|a| a <= constraints.max_airmass);

    let moon_separation = angular_separation(&target.coord, &snapshot.moon.equatorial);
    let within_moon_separation =
        moon_clear(moon_separation, constraints.min_moon_angle);

    let true_azimuth = true_north_azimuth(&horizon, site);
    let (wind_safety, wind_severity) =
        match current_wind_envelope(snapshot, &limits, time, policy) {
            None => (WindSafety::Unknown, None),
            Some(envelope) => {
                let safety = if envelope.blocks(true_azimuth, limits.warn_blocks) {
                    WindSafety::Unsafe
                } else {
                    WindSafety::Safe
                };
                (safety, Some(envelope.severity))
            }
        };

    let cloud_free = snapshot.clouds.as_ref().and_then(|mask| {
        mask.is_occluded(&HorizonCoord{altitude: horizon.altitude,
                                       azimuth: true_azimuth})
    }).map(|occluded| !occluded);

    let observable = within_airmass && within_moon_separation &&
        wind_safety == WindSafety::Safe && horizon.altitude > 0.0 &&
        cloud_free != Some(false);
    debug!("{}: alt {:.2} az {:.2} airmass {:?} moon {:.1} wind {:?} clouds {:?} -> {}",
           target.name, horizon.altitude, horizon.azimuth, airmass,
           moon_separation, wind_safety, cloud_free, observable);

    ObservabilityVerdict{horizon, airmass, moon_separation, constraints,
                         within_airmass, within_moon_separation, wind_safety,
                         wind_severity, cloud_free, observable}
}

/// The separation must clear the lunar disk regardless of the configured
/// floor, and also meet the floor.
pub(crate) fn moon_clear(separation: f64, min_moon_angle: f64) -> bool {
    separation > MOON_ANGULAR_RADIUS && separation >= min_moon_angle
}

/// Undoes the site's azimuth reference rotation. Wind direction and cloud
/// masks are in true-north azimuth.
pub(crate) fn true_north_azimuth(horizon: &HorizonCoord, site: &Site) -> f64 {
    normalize_degrees(horizon.azimuth + site.azimuth_reference)
}

/// The wind envelope in effect at `time`, or None if the wind is unknown
/// there.
pub(crate) fn current_wind_envelope(snapshot: &EnvironmentalSnapshot,
                                    limits: &OperationalLimits,
                                    time: &SystemTime,
                                    policy: &ObservabilityPolicy)
                                    -> Option<WindEnvelope> {
    if snapshot.weather.refresh_failed {
        info!("Last weather refresh failed, not evaluating wind");
        return None;
    }
    let updated = snapshot.weather.updated?;
    let age = match time.duration_since(updated) {
        Ok(age) => age,
        Err(e) => e.duration(),  // Weather is newer than `time`.
    };
    if age > policy.weather_staleness {
        info!("Weather is {:?} away from evaluation time, not evaluating wind",
              age);
        return None;
    }
    let wind = snapshot.weather.wind?;
    Some(WindEnvelope::from_wind(&wind, limits))
}

// mod tests.
