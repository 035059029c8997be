// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::time::{Duration, SystemTime};

use canonical_error::{CanonicalError, failed_precondition_error, invalid_argument_error};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use log::info;

use crate::astro_util::{equatorial_to_horizontal, julian_day_from_system_time,
                        sun_position};
use crate::site::Site;

const SCAN_STEP: Duration = Duration::from_secs(120);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Twilight {
    Civil,
    Nautical,
    Astronomical,
}

impl Twilight {
    /// Sun altitude, degrees, below which it is night.
    pub fn horizon(&self) -> f64 {
        match self {
            Twilight::Civil => -6.0,
            Twilight::Nautical => -12.0,
            Twilight::Astronomical => -18.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Night {
    pub start: SystemTime,
    pub end: SystemTime,
}

impl Night {
    pub fn duration(&self) -> Duration {
        self.end.duration_since(self.start).unwrap_or_default()
    }
}

/// Mean solar midnight at the site, at the end of the local evening of
/// `date`.
pub fn local_midnight(site: &Site, date: NaiveDate) -> Result<SystemTime, CanonicalError> {
    let next_day = date.succ_opt().ok_or_else(|| invalid_argument_error(
        format!("No day after {}", date).as_str()))?;
    let utc_midnight = Utc.from_utc_datetime(&next_day.and_hms_opt(0, 0, 0).ok_or_else(
        || invalid_argument_error(format!("Bad date {}", date).as_str()))?);
    // East of Greenwich is earlier.
    let local = utc_midnight - solar_offset(site);
    Ok(local.into())
}

/// Local mean solar time minus UTC: four minutes of time per degree of
/// longitude, east positive.
pub fn solar_offset(site: &Site) -> chrono::Duration {
    let longitude = if site.longitude > 180.0 { site.longitude - 360.0 } else { site.longitude };
    chrono::Duration::seconds((longitude * 240.0).round() as i64)
}

/// The date whose evening starts the night in progress (or most recently
/// begun) at `time`. Local noon is the boundary between nights.
pub fn night_date(site: &Site, time: &SystemTime) -> NaiveDate {
    let utc: DateTime<Utc> = (*time).into();
    (utc + solar_offset(site) - chrono::Duration::hours(12)).date_naive()
}

pub fn sun_altitude(site: &Site, time: &SystemTime) -> f64 {
    let sun = sun_position(julian_day_from_system_time(time));
    equatorial_to_horizontal(&sun, time, site).altitude
}

/// Finds the night that contains the local midnight following `date`, as
/// the span during which the Sun is below the twilight horizon. During
/// polar night the whole day around midnight is returned.
pub fn find_night(site: &Site, date: NaiveDate, twilight: Twilight)
                  -> Result<Night, CanonicalError> {
    let midnight = local_midnight(site, date)?;
    let horizon = twilight.horizon();
    if sun_altitude(site, &midnight) >= horizon {
        return Err(failed_precondition_error(
            format!("Sun stays above {} degrees at {} on the night of {}",
                    horizon, site.name, date).as_str()));
    }
    let half_day = Duration::from_secs(12 * 3600);
    let start = scan_for_crossing(site, midnight, midnight - half_day, horizon);
    let end = scan_for_crossing(site, midnight, midnight + half_day, horizon);
    let (start, end) = match (start, end) {
        (Some(start), Some(end)) => (start, end),
        _ => {
            info!("Polar night at {} on {}", site.name, date);
            (midnight - half_day, midnight + half_day)
        }
    };
    Ok(Night{start, end})
}

/// `samples` evenly spaced times from the start to the end of the night,
/// inclusive.
pub fn night_hours(site: &Site, date: NaiveDate, twilight: Twilight, samples: usize)
                   -> Result<Vec<SystemTime>, CanonicalError> {
    if samples < 2 {
        return Err(invalid_argument_error(
            format!("Need at least 2 samples, got {}", samples).as_str()));
    }
    let night = find_night(site, date, twilight)?;
    let step = night.duration().div_f64((samples - 1) as f64);
    Ok((0..samples).map(|i| {
        if i == samples - 1 { night.end } else { night.start + step * i as u32 }
    }).collect())
}

// Steps from `from` (Sun below `horizon`) towards `limit` until the Sun
// rises above `horizon`, then interpolates the crossing. None if the Sun
// stays below up to `limit`.
fn scan_for_crossing(site: &Site, from: SystemTime, limit: SystemTime, horizon: f64)
                     -> Option<SystemTime> {
    let forward = limit > from;
    let span = if forward {
        limit.duration_since(from).ok()?
    } else {
        from.duration_since(limit).ok()?
    };
    let steps = (span.as_secs() / SCAN_STEP.as_secs()) as u32;
    let at = |i: u32| if forward { from + SCAN_STEP * i } else { from - SCAN_STEP * i };

    let mut prev_time = from;
    let mut prev_alt = sun_altitude(site, &from);
    for i in 1..=steps {
        let time = at(i);
        let alt = sun_altitude(site, &time);
        if alt >= horizon {
            let fraction = (horizon - prev_alt) / (alt - prev_alt);
            let offset = SCAN_STEP.mul_f64(fraction.clamp(0.0, 1.0));
            return Some(if forward { prev_time + offset } else { prev_time - offset });
        }
        prev_time = time;
        prev_alt = alt;
    }
    None
}

// mod tests.
