// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fs;
use std::path::PathBuf;

use canonical_error::{CanonicalError, invalid_argument_error, unavailable_error};
use log::{debug, warn};

/// Station readings at or above this speed (m/s) indicate a faulty sensor.
pub const WIND_SPEED_FAULT: f64 = 99.0;

/// Temperature readings at or above this (Celsius) indicate a faulty sensor.
pub const TEMPERATURE_FAULT: f64 = 100.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Wind {
    pub speed: f64,  // m/s, >= 0.
    pub direction: f64,  // Degrees 0..360, direction the wind blows from.
}

/// Raw values as reported by the weather stations, before validation. A
/// site may have several redundant stations for each quantity.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StationReadings {
    pub wind_directions: Vec<f64>,
    pub wind_speeds: Vec<f64>,
    pub temperatures: Vec<f64>,
    pub humidity: Option<f64>,
}

/// Validated, combined weather. `wind` carries speed and direction
/// together; if either cannot be determined, neither is reported.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WeatherReading {
    pub wind: Option<Wind>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

/// Provides raw weather readings. Implementations may block for the
/// duration of a network round trip or file read; there is no retry.
pub trait WeatherSource {
    fn fetch(&self) -> Result<StationReadings, CanonicalError>;
}

/// Discards out-of-band readings and averages the rest.
///
/// * direction: kept if strictly inside (0, 360).
/// * speed: kept if in 0..WIND_SPEED_FAULT; calm (0) is a valid reading.
///   If `preferred_speed_station` names a station whose reading is valid,
///   that reading is used instead of the average.
/// * temperature: kept if below TEMPERATURE_FAULT.
/// * humidity: kept if in 0..100.
pub fn combine_station_readings(readings: &StationReadings,
                                preferred_speed_station: Option<usize>)
                                -> WeatherReading {
    let directions: Vec<f64> = readings.wind_directions.iter().copied()
        .filter(|d| *d > 0.0 && *d < 360.0).collect();
    let speed_valid = |s: &f64| (0.0..WIND_SPEED_FAULT).contains(s);
    let speeds: Vec<f64> = readings.wind_speeds.iter().copied()
        .filter(speed_valid).collect();
    let temperatures: Vec<f64> = readings.temperatures.iter().copied()
        .filter(|t| t.is_finite() && *t < TEMPERATURE_FAULT).collect();

    let speed = match preferred_speed_station
        .and_then(|i| readings.wind_speeds.get(i).copied())
    {
        Some(s) if speed_valid(&s) => Some(s),
        Some(s) => {
            warn!("Preferred wind station reads {} m/s, using other stations", s);
            mean(&speeds)
        },
        None => mean(&speeds),
    };
    let direction = mean(&directions);
    let wind = match (speed, direction) {
        (Some(speed), Some(direction)) => Some(Wind{speed, direction}),
        _ => {
            warn!("No valid wind reading among {} speeds and {} directions",
                  readings.wind_speeds.len(), readings.wind_directions.len());
            None
        },
    };

    WeatherReading{
        wind,
        temperature: mean(&temperatures),
        humidity: readings.humidity.filter(|h| (0.0..=100.0).contains(h)),
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(statistical::mean(values))
    }
}

/// Parses a fixed-column station report. Relevant lines start with `WD`
/// (wind direction), `WS` (wind speed), `RH` (relative humidity) or `T `
/// (temperature); the averaged value occupies columns 20..25.
pub fn parse_station_report(report: &str) -> Result<StationReadings, CanonicalError> {
    if report.contains("404 Not Found") {
        return Err(unavailable_error("Weather report not found on server"));
    }
    let mut readings = StationReadings::default();
    for line in report.lines() {
        let upper_prefix = line.get(0..2).map(|p| p.to_ascii_uppercase());
        let target = match upper_prefix.as_deref() {
            Some("WD") => &mut readings.wind_directions,
            Some("WS") => &mut readings.wind_speeds,
            Some("T ") => &mut readings.temperatures,
            Some("RH") => {
                if let Some(value) = average_column(line) {
                    readings.humidity = Some(value);
                }
                continue;
            },
            _ => { continue; }
        };
        if let Some(value) = average_column(line) {
            target.push(value);
        }
    }
    if readings.wind_directions.is_empty() && readings.wind_speeds.is_empty() &&
        readings.temperatures.is_empty() && readings.humidity.is_none()
    {
        return Err(invalid_argument_error("Weather report contains no readings"));
    }
    Ok(readings)
}

fn average_column(line: &str) -> Option<f64> {
    let field = line.get(20..25).or_else(|| line.get(20..))?;
    match field.trim().parse::<f64>() {
        Ok(value) => Some(value),
        Err(_) => {
            debug!("Skipping unparsable weather line: {:?}", line);
            None
        }
    }
}

/// Reads a station report from a file. In debug mode a canned report is read
/// instead of the live one.
pub struct ReportFileWeatherSource {
    path: PathBuf,
}

impl ReportFileWeatherSource {
    pub fn new(report_path: PathBuf, debug_report_path: Option<PathBuf>,
               debug_mode: bool) -> Self {
        let path = match (debug_mode, debug_report_path) {
            (true, Some(debug_path)) => debug_path,
            _ => report_path,
        };
        ReportFileWeatherSource{path}
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl WeatherSource for ReportFileWeatherSource {
    fn fetch(&self) -> Result<StationReadings, CanonicalError> {
        let report = fs::read_to_string(&self.path).map_err(|e| {
            unavailable_error(format!("Cannot read weather report {:?}: {:?}",
                                      self.path, e).as_str())
        })?;
        parse_station_report(&report)
    }
}

#[cfg(test)]
mod tests {
    extern crate approx;
    use approx::assert_abs_diff_eq;
    use super::*;

    const REPORT: &str = "\
Date                2024-01-01T03:00:00
WD 1 [deg]          140   138   145
WD 2 [deg]          150   148   152
WS 1 [m/s]          10.0  9.50  11.0
WS 2 [m/s]          12.0  11.0  13.0
WS 3 [m/s]          14.0  13.5  15.0
T  1 [C]            12.5  12.0  13.0
T  2 [C]            999.  999.  999.
RH 1 [%]            35.0  33.0  37.0
";

    #[test]
    fn test_parse_station_report() {
        let readings = parse_station_report(REPORT).unwrap();
        assert_eq!(readings.wind_directions, vec![140.0, 150.0]);
        assert_eq!(readings.wind_speeds, vec![10.0, 12.0, 14.0]);
        assert_eq!(readings.temperatures, vec![12.5, 999.0]);
        assert_eq!(readings.humidity, Some(35.0));
    }

    #[test]
    fn test_parse_rejects_empty_and_missing() {
        assert!(parse_station_report("").is_err());
        assert!(parse_station_report("<html>404 Not Found</html>").is_err());
    }

    #[test]
    fn test_combine_averages_and_discards() {
        let readings = parse_station_report(REPORT).unwrap();
        let reading = combine_station_readings(&readings, None);
        let wind = reading.wind.unwrap();
        assert_abs_diff_eq!(wind.direction, 145.0);
        assert_abs_diff_eq!(wind.speed, 12.0);
        assert_eq!(reading.temperature, Some(12.5));
        assert_eq!(reading.humidity, Some(35.0));
    }

    #[test]
    fn test_preferred_station() {
        let readings = parse_station_report(REPORT).unwrap();
        let reading = combine_station_readings(&readings, Some(2));
        assert_eq!(reading.wind.unwrap().speed, 14.0);

        // Faulty preferred station falls back to the average of the others.
        let faulty = StationReadings{wind_speeds: vec![10.0, 12.0, 99.0],
                                     ..readings};
        let reading = combine_station_readings(&faulty, Some(2));
        assert_abs_diff_eq!(reading.wind.unwrap().speed, 11.0);
    }

    #[test]
    fn test_calm_wind_is_a_reading() {
        let calm = StationReadings{wind_directions: vec![200.0, 210.0],
                                   wind_speeds: vec![0.0, 0.0, 0.0],
                                   ..Default::default()};
        let wind = combine_station_readings(&calm, None).wind.unwrap();
        assert_eq!(wind.speed, 0.0);
        assert_abs_diff_eq!(wind.direction, 205.0);
        assert_eq!(combine_station_readings(&calm, Some(2)).wind.unwrap().speed, 0.0);

        // Negative and NaN speeds are still discarded.
        let bad = StationReadings{wind_speeds: vec![-1.0, f64::NAN], ..calm};
        assert_eq!(combine_station_readings(&bad, None).wind, None);
    }

    #[test]
    fn test_wind_absent_as_a_pair() {
        // Valid speed but all directions out of band.
        let readings = StationReadings{wind_directions: vec![0.0, 360.0, 400.0],
                                       wind_speeds: vec![5.0],
                                       ..Default::default()};
        let reading = combine_station_readings(&readings, None);
        assert_eq!(reading.wind, None);

        // Valid direction but all speeds faulty.
        let readings = StationReadings{wind_directions: vec![90.0],
                                       wind_speeds: vec![99.0, 120.0],
                                       temperatures: vec![8.0],
                                       ..Default::default()};
        let reading = combine_station_readings(&readings, None);
        assert_eq!(reading.wind, None);
        assert_eq!(reading.temperature, Some(8.0));
    }

    #[test]
    fn test_report_file_source_missing_file() {
        let source = ReportFileWeatherSource::new(
            PathBuf::from("/nonexistent/meteo.last"), None, false);
        assert!(source.fetch().is_err());
    }
}  // mod tests.
