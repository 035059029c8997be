// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::time::SystemTime;

use astro::angle::{deg_frm_dms, limit_to_two_PI};
use astro::coords::{asc_frm_ecl, dec_frm_ecl};
use astro::ecliptic::mn_oblq_IAU;
use astro::time::{julian_day, CalType, Date};
use canonical_error::{CanonicalError, invalid_argument_error};
use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::site::Site;

/// Julian date of the J2000.0 epoch.
pub const J2000_JD: f64 = 2451545.0;

/// Apparent angular radius of the Moon, degrees. Anything closer to the
/// Moon's center than this is on the lunar disk.
pub const MOON_ANGULAR_RADIUS: f64 = 0.5;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EquatorialCoord {
    pub ra: f64,  // Hours, 0..24.
    pub dec: f64,  // Degrees, -90..90.
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HorizonCoord {
    pub altitude: f64,  // Degrees, -90..90.
    pub azimuth: f64,  // Degrees, 0..360, relative to the site's reference direction.
}

/// Wraps the given angle (degrees) into [0, 360).
pub fn normalize_degrees(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid() can round up to exactly 360 for tiny negative inputs.
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Returns the unsigned angular distance (degrees, 0..180) between two
/// azimuths, correct across the 0/360 boundary.
pub fn azimuth_distance(az0: f64, az1: f64) -> f64 {
    let diff = normalize_degrees(az0 - az1);
    diff.min(360.0 - diff)
}

/// Returns the separation, in degrees, between the given celestial
/// coordinates. Uses the haversine form, which stays well conditioned for
/// small separations and yields exactly zero for identical points.
pub fn angular_separation(p0: &EquatorialCoord, p1: &EquatorialCoord) -> f64 {
    let p0_ra = (p0.ra * 15.0).to_radians();
    let p1_ra = (p1.ra * 15.0).to_radians();
    let p0_dec = p0.dec.to_radians();
    let p1_dec = p1.dec.to_radians();

    let sin_half_dec = (0.5 * (p1_dec - p0_dec)).sin();
    let sin_half_ra = (0.5 * (p1_ra - p0_ra)).sin();
    let h = sin_half_dec * sin_half_dec +
        p0_dec.cos() * p1_dec.cos() * sin_half_ra * sin_half_ra;
    (2.0 * h.sqrt().min(1.0).asin()).to_degrees()
}

/// Julian date (UT) of the given time.
pub fn julian_day_from_system_time(time: &SystemTime) -> f64 {
    let dt_utc: DateTime<Utc> = (*time).into();
    let seconds_of_day = dt_utc.time().num_seconds_from_midnight() as f64 +
        dt_utc.time().nanosecond() as f64 / 1.0e9;
    let date = Date{year: dt_utc.year() as i16,
                    month: dt_utc.month() as u8,
                    decimal_day: dt_utc.day() as f64 + seconds_of_day / 86400.0,
                    cal_type: CalType::Gregorian};
    julian_day(&date)
}

/// Greenwich apparent sidereal time, in hours 0..24, for the given Julian
/// date. Mean sidereal time comes from the linear sidereal-rate expression
/// counted from J2000; the equation of the equinoxes adds the dominant
/// nutation terms.
pub fn greenwich_apparent_sidereal_time(jd: f64) -> f64 {
    let d = jd - J2000_JD;
    let gmst = 18.697374558 + 24.06570982441908 * d;

    let obliquity = (23.4393 - 0.0000004 * d).to_radians();
    let moon_node = (125.04 - 0.052954 * d).to_radians();
    let sun_mean_long = (280.47 + 0.98565 * d).to_radians();
    let equation_of_equinoxes = -0.000319 * moon_node.sin() -
        0.000024 * (2.0 * sun_mean_long).sin() * obliquity.cos();

    let gast = (gmst + equation_of_equinoxes).rem_euclid(24.0);
    if gast >= 24.0 { 0.0 } else { gast }
}

/// Local sidereal time, hours 0..24, at the given east longitude (degrees).
pub fn local_sidereal_time(time: &SystemTime, longitude: f64) -> f64 {
    let gast = greenwich_apparent_sidereal_time(julian_day_from_system_time(time));
    normalize_degrees(gast * 15.0 + longitude) / 15.0
}

/// Local hour angle, degrees 0..360, of the given right ascension (hours).
pub fn local_hour_angle(ra: f64, time: &SystemTime, longitude: f64) -> f64 {
    let gast = greenwich_apparent_sidereal_time(julian_day_from_system_time(time));
    normalize_degrees((gast - ra) * 15.0 + longitude)
}

/// Converts equatorial coordinates to the site's horizontal frame at the
/// given time. Altitude below the horizon is returned as-is; deciding what
/// that means is up to the caller.
///
/// Azimuth is measured from north through east and then rotated by the
/// site's `azimuth_reference`.
pub fn equatorial_to_horizontal(coord: &EquatorialCoord, time: &SystemTime,
                                site: &Site) -> HorizonCoord {
    let lha = local_hour_angle(coord.ra, time, site.longitude).to_radians();
    horizontal_from_hour_angle(lha, coord.dec.to_radians(),
                               site.latitude.to_radians(),
                               site.azimuth_reference)
}

// lha, dec, lat in radians. Returns degrees.
fn horizontal_from_hour_angle(lha: f64, dec: f64, lat: f64,
                              azimuth_reference: f64) -> HorizonCoord {
    let sin_alt = lha.cos() * dec.cos() * lat.cos() + dec.sin() * lat.sin();
    let altitude = sin_alt.clamp(-1.0, 1.0).asin().to_degrees();

    // The textbook form is atan2(-sin(H), tan(dec)cos(lat) - sin(lat)cos(H)).
    // Scaling both terms by cos(dec) >= 0 keeps the quadrant and removes the
    // tan() pole at dec = +/-90.
    let num = -lha.sin() * dec.cos();
    let den = dec.sin() * lat.cos() - lat.sin() * lha.cos() * dec.cos();
    let azimuth = if num == 0.0 && den == 0.0 {
        0.0  // Target at the zenith or nadir; azimuth is arbitrary.
    } else {
        num.atan2(den).to_degrees()
    };

    HorizonCoord{altitude: altitude.clamp(-90.0, 90.0),
                 azimuth: normalize_degrees(azimuth - azimuth_reference)}
}

/// Plane-parallel airmass for the given altitude (degrees). Returns None
/// when the target is on or below the horizon, where airmass is undefined.
pub fn airmass(altitude: f64) -> Option<f64> {
    if !(altitude > 0.0) {
        return None;  // Also catches NaN.
    }
    let sin_alt = altitude.min(90.0).to_radians().sin();
    if sin_alt <= 0.0 {
        return None;
    }
    Some(1.0 / sin_alt)
}

/// Geocentric equatorial position of the Sun at the given Julian date.
pub fn sun_position(jd: f64) -> EquatorialCoord {
    let (ecl_point, _distance_au) = astro::sun::geocent_ecl_pos(jd);
    equatorial_from_ecliptic(ecl_point.long, ecl_point.lat, jd)
}

/// Geocentric equatorial position of the Moon at the given Julian date.
/// Topocentric parallax (up to ~1 degree) is not applied.
pub fn moon_position(jd: f64) -> EquatorialCoord {
    let (ecl_point, _distance_km) = astro::lunar::geocent_ecl_pos(jd);
    equatorial_from_ecliptic(ecl_point.long, ecl_point.lat, jd)
}

// Ecliptic longitude/latitude in radians.
fn equatorial_from_ecliptic(long: f64, lat: f64, jd: f64) -> EquatorialCoord {
    let obliquity = mn_oblq_IAU(jd);
    let ra = limit_to_two_PI(asc_frm_ecl(long, lat, obliquity));
    let dec = dec_frm_ecl(long, lat, obliquity);
    let mut ra_hours = ra.to_degrees() / 15.0;
    if ra_hours >= 24.0 {
        ra_hours = 0.0;
    }
    EquatorialCoord{ra: ra_hours, dec: dec.to_degrees()}
}

/// Parses "DD:MM:SS.s", "DDdMMmSS.ss", "HHhMMmSSs" or a plain decimal number.
/// The result is in the unit of the leading field (degrees or hours), signed.
pub fn parse_sexagesimal(text: &str) -> Result<f64, CanonicalError> {
    let trimmed = text.trim();
    let (sign, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let fields: Vec<&str> = body
        .split(|c: char| matches!(c, ':' | 'd' | 'h' | 'm' | 's') || c.is_whitespace())
        .filter(|f| !f.is_empty())
        .collect();
    let bad_value = || invalid_argument_error(
        format!("Cannot parse angle '{}'", text).as_str());

    let magnitude = match fields.as_slice() {
        [value] => value.parse::<f64>().map_err(|_| bad_value())?,
        [whole, minutes] => {
            let whole = whole.parse::<i64>().map_err(|_| bad_value())?;
            let minutes = minutes.parse::<f64>().map_err(|_| bad_value())?;
            if !(0.0..60.0).contains(&minutes) {
                return Err(bad_value());
            }
            deg_frm_dms(whole, 0, minutes * 60.0)
        },
        [whole, minutes, seconds] => {
            let whole = whole.parse::<i64>().map_err(|_| bad_value())?;
            let minutes = minutes.parse::<i64>().map_err(|_| bad_value())?;
            let seconds = seconds.parse::<f64>().map_err(|_| bad_value())?;
            if !(0..60).contains(&minutes) || !(0.0..60.0).contains(&seconds) {
                return Err(bad_value());
            }
            deg_frm_dms(whole, minutes, seconds)
        },
        _ => { return Err(bad_value()); }
    };
    if !magnitude.is_finite() || magnitude < 0.0 {
        return Err(bad_value());
    }
    Ok(sign * magnitude)
}

/// Parses a right ascension in hours, sexagesimal or decimal. Range 0..24.
pub fn parse_hours(text: &str) -> Result<f64, CanonicalError> {
    let hours = parse_sexagesimal(text)?;
    if !(0.0..24.0).contains(&hours) {
        return Err(invalid_argument_error(
            format!("Right ascension '{}' outside 0..24h", text).as_str()));
    }
    Ok(hours)
}

/// Parses a declination or latitude in degrees. Range -90..90.
pub fn parse_degrees(text: &str) -> Result<f64, CanonicalError> {
    let degrees = parse_sexagesimal(text)?;
    if !(-90.0..=90.0).contains(&degrees) {
        return Err(invalid_argument_error(
            format!("Angle '{}' outside -90..90 degrees", text).as_str()));
    }
    Ok(degrees)
}

#[cfg(test)]
mod tests {
    extern crate approx;
    use approx::assert_abs_diff_eq;
    use astro::angle::deg_frm_hms;
    use chrono::{FixedOffset, TimeZone};
    use std::time::Duration;
    use super::*;

    fn site_at(latitude: f64, longitude: f64) -> Site {
        Site{name: "test".to_string(), latitude, longitude,
             elevation: 0.0, azimuth_reference: 0.0}
    }

    fn utc(year: i32, month: u32, day: u32, hour: u32, min: u32) -> SystemTime {
        Utc.with_ymd_and_hms(year, month, day, hour, min, 0).unwrap().into()
    }

    #[test]
    fn test_normalize_degrees() {
        assert_eq!(normalize_degrees(0.0), 0.0);
        assert_eq!(normalize_degrees(360.0), 0.0);
        assert_eq!(normalize_degrees(-1e-18), 0.0);
        assert_abs_diff_eq!(normalize_degrees(-90.0), 270.0);
        assert_abs_diff_eq!(normalize_degrees(725.0), 5.0);
    }

    #[test]
    fn test_azimuth_distance_wraps() {
        assert_abs_diff_eq!(azimuth_distance(359.0, 1.0), 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(azimuth_distance(1.0, 359.0), 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(azimuth_distance(90.0, 270.0), 180.0, epsilon = 1e-9);
        assert_eq!(azimuth_distance(42.0, 42.0), 0.0);
    }

    #[test]
    fn test_angular_separation() {
        let p0 = EquatorialCoord{ra: 12.0, dec: 0.0};
        let p1 = EquatorialCoord{ra: 12.0 + 1.0_f64.to_degrees() / 15.0,
                                 dec: 1.0_f64.to_degrees()};
        assert_abs_diff_eq!(angular_separation(&p0, &p1), 73.03, epsilon = 0.01);

        // Same RA, differing only in Dec.
        let p2 = EquatorialCoord{ra: 12.0, dec: 30.0};
        assert_abs_diff_eq!(angular_separation(&p0, &p2), 30.0, epsilon = 1e-9);

        // Pole to equator.
        let pole = EquatorialCoord{ra: 3.0, dec: 90.0};
        assert_abs_diff_eq!(angular_separation(&pole, &p0), 90.0, epsilon = 1e-9);
    }

    #[test]
    fn test_angular_separation_symmetric_and_zero() {
        let a = EquatorialCoord{ra: 5.5, dec: -23.4};
        let b = EquatorialCoord{ra: 17.25, dec: 61.0};
        assert_abs_diff_eq!(angular_separation(&a, &b),
                            angular_separation(&b, &a), epsilon = 1e-12);
        assert_eq!(angular_separation(&a, &a), 0.0);
        assert_eq!(angular_separation(&b, &b), 0.0);
    }

    #[test]
    fn test_sidereal_time_at_j2000() {
        // 2000-01-01 12:00 UT. GMST is 18.697374558h; the equation of the
        // equinoxes adds under a second.
        let gast = greenwich_apparent_sidereal_time(J2000_JD);
        assert_abs_diff_eq!(gast, 18.697374558, epsilon = 0.001);

        let jd = julian_day_from_system_time(&utc(2000, 1, 1, 12, 0));
        assert_abs_diff_eq!(jd, J2000_JD, epsilon = 1e-6);
    }

    #[test]
    fn test_equatorial_to_horizontal() {
        let mizar = EquatorialCoord{ra: deg_frm_hms(13, 23, 55.5) / 15.0,
                                    dec: deg_frm_dms(54, 55, 30.7)};

        let dt = FixedOffset::west_opt(8 * 3600).unwrap().with_ymd_and_hms(
            2024, 3, 7, 23, 56, 0).unwrap();
        let time = SystemTime::UNIX_EPOCH.checked_add(Duration::from_secs_f64(
            dt.timestamp_millis() as f64 / 1000.0)).unwrap();

        let horizon = equatorial_to_horizontal(&mizar, &time, &site_at(37.0, -122.0));

        // Expected values obtained from SkySafari.
        assert_abs_diff_eq!(horizon.altitude, deg_frm_dms(59, 3, 54.3),
                            epsilon = 1.0);
        assert_abs_diff_eq!(horizon.azimuth, deg_frm_dms(43, 20, 36.7),
                            epsilon = 1.0);
    }

    #[test]
    fn test_azimuth_reference_rotates_azimuth() {
        let mizar = EquatorialCoord{ra: 13.4, dec: 54.9};
        let time = utc(2024, 3, 8, 7, 56);
        let mut site = site_at(37.0, -122.0);
        let base = equatorial_to_horizontal(&mizar, &time, &site);

        site.azimuth_reference = 180.0;
        let rotated = equatorial_to_horizontal(&mizar, &time, &site);
        assert_abs_diff_eq!(rotated.altitude, base.altitude);
        assert_abs_diff_eq!(azimuth_distance(rotated.azimuth, base.azimuth),
                            180.0, epsilon = 1e-9);

        site.azimuth_reference = base.azimuth + 10.0;
        let rotated = equatorial_to_horizontal(&mizar, &time, &site);
        assert_abs_diff_eq!(rotated.azimuth, 350.0, epsilon = 1e-9);
    }

    #[test]
    fn test_zenith_target() {
        let time = utc(2023, 11, 14, 3, 17);
        let site = site_at(-29.2594, -70.7313);
        let lst = local_sidereal_time(&time, site.longitude);
        let zenith = EquatorialCoord{ra: lst, dec: site.latitude};
        let horizon = equatorial_to_horizontal(&zenith, &time, &site);
        assert_abs_diff_eq!(horizon.altitude, 90.0, epsilon = 1e-4);
        assert!(horizon.azimuth >= 0.0 && horizon.azimuth < 360.0);
    }

    #[test]
    fn test_east_and_west_of_meridian() {
        let time = utc(2023, 11, 14, 3, 17);
        let site = site_at(40.0, 10.0);
        let lst = local_sidereal_time(&time, site.longitude);
        // Rising: RA later than LST.
        let east = equatorial_to_horizontal(
            &EquatorialCoord{ra: (lst + 3.0) % 24.0, dec: 0.0}, &time, &site);
        assert!(east.azimuth > 0.0 && east.azimuth < 180.0);
        let west = equatorial_to_horizontal(
            &EquatorialCoord{ra: (lst + 21.0) % 24.0, dec: 0.0}, &time, &site);
        assert!(west.azimuth > 180.0 && west.azimuth < 360.0);
    }

    #[test]
    fn test_pole_and_wrap_boundaries_are_finite() {
        let time = utc(2022, 6, 1, 0, 0);
        for lat in [-90.0, -45.0, 0.0, 45.0, 90.0] {
            let site = site_at(lat, 0.0);
            let lst = local_sidereal_time(&time, 0.0);
            for dec in [-90.0, -30.0, 0.0, 30.0, 90.0] {
                // Hour angles of 0, 180 and 360 degrees.
                for offset in [0.0, 12.0, 24.0] {
                    let ra = (lst - offset).rem_euclid(24.0);
                    let horizon = equatorial_to_horizontal(
                        &EquatorialCoord{ra, dec}, &time, &site);
                    assert!(horizon.altitude.is_finite());
                    assert!(horizon.azimuth.is_finite());
                    assert!((-90.0..=90.0).contains(&horizon.altitude));
                    assert!((0.0..360.0).contains(&horizon.azimuth));
                }
            }
        }
    }

    #[test]
    fn test_output_ranges_over_sky() {
        let site = site_at(-29.2594, -70.7313);
        let mut time = utc(2021, 1, 1, 0, 0);
        for _ in 0..24 {
            for ra_step in 0..24 {
                for dec_step in 0..=18 {
                    let coord = EquatorialCoord{ra: ra_step as f64,
                                                dec: -90.0 + 10.0 * dec_step as f64};
                    let horizon = equatorial_to_horizontal(&coord, &time, &site);
                    assert!((-90.0..=90.0).contains(&horizon.altitude));
                    assert!((0.0..360.0).contains(&horizon.azimuth));
                }
            }
            time += Duration::from_secs(3600 * 7 + 13);
        }
    }

    #[test]
    fn test_airmass() {
        assert_abs_diff_eq!(airmass(90.0).unwrap(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(airmass(30.0).unwrap(), 2.0, epsilon = 1e-9);
        assert_eq!(airmass(0.0), None);
        assert_eq!(airmass(-12.0), None);
        assert_eq!(airmass(f64::NAN), None);

        // Monotonically decreasing over (0, 90].
        let mut previous = f64::INFINITY;
        for tenth in 1..=900 {
            let am = airmass(tenth as f64 / 10.0).unwrap();
            assert!(am < previous);
            previous = am;
        }
    }

    #[test]
    fn test_sun_position_at_solstice() {
        let jd = julian_day_from_system_time(&utc(2024, 6, 20, 20, 51));
        let sun = sun_position(jd);
        assert_abs_diff_eq!(sun.dec, 23.44, epsilon = 0.05);
        assert_abs_diff_eq!(sun.ra, 6.0, epsilon = 0.05);
    }

    #[test]
    fn test_sun_position_at_equinox() {
        let jd = julian_day_from_system_time(&utc(2024, 3, 20, 3, 6));
        let sun = sun_position(jd);
        assert_abs_diff_eq!(sun.dec, 0.0, epsilon = 0.05);
        assert!(sun.ra < 0.05 || sun.ra > 23.95);
    }

    #[test]
    fn test_moon_position_in_range() {
        let mut jd = julian_day_from_system_time(&utc(2024, 1, 1, 0, 0));
        for _ in 0..60 {
            let moon = moon_position(jd);
            assert!((0.0..24.0).contains(&moon.ra));
            assert!(moon.dec.abs() < 29.0);
            jd += 0.5;
        }
    }

    #[test]
    fn test_parse_sexagesimal() {
        assert_abs_diff_eq!(parse_sexagesimal("-29:15:33.7").unwrap(),
                            -(29.0 + 15.0 / 60.0 + 33.7 / 3600.0), epsilon = 1e-9);
        assert_abs_diff_eq!(parse_sexagesimal("-29d15m33.7s").unwrap(),
                            -(29.0 + 15.0 / 60.0 + 33.7 / 3600.0), epsilon = 1e-9);
        assert_abs_diff_eq!(parse_sexagesimal("-70.7313d").unwrap(), -70.7313,
                            epsilon = 1e-9);
        assert_abs_diff_eq!(parse_sexagesimal("-00:30:00").unwrap(), -0.5,
                            epsilon = 1e-9);
        assert_abs_diff_eq!(parse_sexagesimal("+12 30").unwrap(), 12.5,
                            epsilon = 1e-9);
        assert_abs_diff_eq!(parse_hours("13h23m55.5s").unwrap(),
                            13.0 + 23.0 / 60.0 + 55.5 / 3600.0, epsilon = 1e-9);

        assert!(parse_sexagesimal("").is_err());
        assert!(parse_sexagesimal("12:61:00").is_err());
        assert!(parse_sexagesimal("ab:cd:ef").is_err());
        assert!(parse_hours("24:00:00").is_err());
        assert!(parse_degrees("91:00:00").is_err());
    }

}  // mod tests.
