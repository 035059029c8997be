// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use canonical_error::CanonicalError;
use log::{debug, info, warn};

use crate::astro_util::{EquatorialCoord, HorizonCoord, equatorial_to_horizontal,
                        julian_day_from_system_time, moon_position, sun_position};
use crate::clouds::{CloudMask, CloudSource};
use crate::site::Site;
use crate::weather::{Wind, WeatherSource, combine_station_readings};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BodyPosition {
    pub equatorial: EquatorialCoord,
    pub horizon: HorizonCoord,
}

/// Last known weather. All None until the first successful refresh.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WeatherState {
    pub wind: Option<Wind>,
    pub temperature: Option<f64>,  // Celsius.
    pub humidity: Option<f64>,  // Percent.

    // Time of the last successful refresh.
    pub updated: Option<SystemTime>,

    // The most recent refresh attempt failed. The values above are then
    // the last good ones, not current ones.
    pub refresh_failed: bool,
}

/// Everything known about the sky and weather at a site, as of `time`.
/// Snapshots are immutable; refreshing produces a new one.
#[derive(Clone, Debug)]
pub struct EnvironmentalSnapshot {
    // Time at which the Sun and Moon positions were computed.
    pub time: SystemTime,
    pub sun: BodyPosition,
    pub moon: BodyPosition,
    pub weather: WeatherState,

    // Absent when cloud checking is disabled or the last refresh failed.
    pub clouds: Option<Arc<CloudMask>>,
    pub clouds_updated: Option<SystemTime>,
}

/// Outcome of a refresh.
#[derive(Debug)]
pub enum RefreshStatus {
    Updated,

    // The collaborator could not supply data. For weather, prior values are
    // retained but the caller must treat the current state as unknown.
    Failed(CanonicalError),

    // The refresh was not attempted because the feature is turned off.
    Disabled,
}

impl RefreshStatus {
    pub fn is_updated(&self) -> bool {
        matches!(self, RefreshStatus::Updated)
    }
}

/// Owns the latest `EnvironmentalSnapshot` for one site. Each refresh swaps
/// in a complete new snapshot, so concurrent readers never observe a mix of
/// old and new fields.
#[derive(Debug)]
pub struct Environment {
    site: Site,
    preferred_speed_station: Option<usize>,
    snapshot: Mutex<Arc<EnvironmentalSnapshot>>,
}

impl Environment {
    /// Creates an environment with unknown weather, no cloud mask, and Sun
    /// and Moon positions computed for `time`.
    pub fn new(site: Site, time: SystemTime) -> Self {
        let (sun, moon) = body_positions(&site, &time);
        let snapshot = EnvironmentalSnapshot{
            time,
            sun,
            moon,
            weather: WeatherState::default(),
            clouds: None,
            clouds_updated: None,
        };
        Environment{site, preferred_speed_station: None,
                    snapshot: Mutex::new(Arc::new(snapshot))}
    }

    /// Index of the station whose wind speed is trusted over the average of
    /// all stations, when it reads a valid value.
    pub fn set_preferred_speed_station(&mut self, station: Option<usize>) {
        self.preferred_speed_station = station;
    }

    pub fn site(&self) -> &Site {
        &self.site
    }

    pub fn snapshot(&self) -> Arc<EnvironmentalSnapshot> {
        self.snapshot.lock().unwrap().clone()
    }

    /// The current snapshot with the Sun and Moon moved to `time`. The
    /// stored snapshot is not changed.
    pub fn snapshot_at(&self, time: SystemTime) -> EnvironmentalSnapshot {
        let (sun, moon) = body_positions(&self.site, &time);
        let mut snapshot = EnvironmentalSnapshot::clone(&self.snapshot());
        snapshot.time = time;
        snapshot.sun = sun;
        snapshot.moon = moon;
        snapshot
    }

    /// Recomputes the Sun and Moon positions for `time`.
    pub fn refresh_positions(&self, time: SystemTime) {
        let (sun, moon) = body_positions(&self.site, &time);
        self.update(|s| {
            s.time = time;
            s.sun = sun;
            s.moon = moon;
        });
        debug!("Sun alt {:.1} az {:.1}; Moon alt {:.1} az {:.1}",
               sun.horizon.altitude, sun.horizon.azimuth,
               moon.horizon.altitude, moon.horizon.azimuth);
    }

    /// Fetches and validates weather. On failure the prior weather values
    /// and their `updated` time are left untouched, and `refresh_failed` is
    /// set until the next successful refresh.
    pub fn refresh_weather(&self, source: &dyn WeatherSource) -> RefreshStatus {
        self.refresh_weather_at(source, SystemTime::now())
    }

    /// As `refresh_weather()`, stamping a successful refresh with
    /// `refreshed_at` instead of the current time. Used when replaying
    /// archived reports.
    pub fn refresh_weather_at(&self, source: &dyn WeatherSource,
                              refreshed_at: SystemTime) -> RefreshStatus {
        let readings = match source.fetch() {
            Ok(r) => r,
            Err(e) => {
                warn!("Cannot refresh weather for {}: {:?}", self.site.name, e);
                self.update(|s| s.weather.refresh_failed = true);
                return RefreshStatus::Failed(e);
            }
        };
        let reading = combine_station_readings(&readings, self.preferred_speed_station);
        self.update(|s| {
            s.weather = WeatherState{wind: reading.wind,
                                     temperature: reading.temperature,
                                     humidity: reading.humidity,
                                     updated: Some(refreshed_at),
                                     refresh_failed: false};
        });
        info!("Weather for {}: {:?}", self.site.name, reading);
        RefreshStatus::Updated
    }

    /// Fetches the cloud mask. On failure the mask is dropped rather than
    /// kept stale. Passing None (cloud checking disabled) also clears it.
    pub fn refresh_clouds(&self, source: Option<&dyn CloudSource>) -> RefreshStatus {
        let Some(source) = source else {
            self.update(|s| {
                s.clouds = None;
                s.clouds_updated = None;
            });
            return RefreshStatus::Disabled;
        };
        match source.fetch(&self.site.name) {
            Ok(mask) => {
                let now = SystemTime::now();
                let mask = Arc::new(mask);
                self.update(|s| {
                    s.clouds = Some(mask.clone());
                    s.clouds_updated = Some(now);
                });
                debug!("Cloud mask for {} refreshed", self.site.name);
                RefreshStatus::Updated
            },
            Err(e) => {
                warn!("Could not retrieve cloud map for {}: {:?}", self.site.name, e);
                self.update(|s| {
                    s.clouds = None;
                    s.clouds_updated = None;
                });
                RefreshStatus::Failed(e)
            }
        }
    }

    // Copy-modify-swap under the lock, so that concurrent refreshes of
    // different fields do not lose each other's updates.
    fn update(&self, modify: impl FnOnce(&mut EnvironmentalSnapshot)) {
        let mut locked_snapshot = self.snapshot.lock().unwrap();
        let mut next = EnvironmentalSnapshot::clone(&locked_snapshot);
        modify(&mut next);
        *locked_snapshot = Arc::new(next);
    }
}

fn body_positions(site: &Site, time: &SystemTime) -> (BodyPosition, BodyPosition) {
    let jd = julian_day_from_system_time(time);
    let sun_eq = sun_position(jd);
    let moon_eq = moon_position(jd);
    (BodyPosition{equatorial: sun_eq,
                  horizon: equatorial_to_horizontal(&sun_eq, time, site)},
     BodyPosition{equatorial: moon_eq,
                  horizon: equatorial_to_horizontal(&moon_eq, time, site)})
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use canonical_error::unavailable_error;
    use super::*;
    use crate::astro_util::angular_separation;
    use crate::weather::StationReadings;

    struct FixedWeather(StationReadings);
    impl WeatherSource for FixedWeather {
        fn fetch(&self) -> Result<StationReadings, CanonicalError> {
            Ok(self.0.clone())
        }
    }

    struct OfflineWeather;
    impl WeatherSource for OfflineWeather {
        fn fetch(&self) -> Result<StationReadings, CanonicalError> {
            Err(unavailable_error("network unreachable"))
        }
    }

    struct FixedClouds;
    impl CloudSource for FixedClouds {
        fn fetch(&self, _site_name: &str) -> Result<CloudMask, CanonicalError> {
            CloudMask::new(vec![vec![0.0, 1.0]], 0.0, 90.0, 0.5)
        }
    }

    struct BrokenCamera;
    impl CloudSource for BrokenCamera {
        fn fetch(&self, _site_name: &str) -> Result<CloudMask, CanonicalError> {
            Err(unavailable_error("camera offline"))
        }
    }

    fn environment() -> Environment {
        let site = Site{name: "LaSilla".to_string(), latitude: -29.2594,
                        longitude: -70.7313, elevation: 2400.0,
                        azimuth_reference: 0.0};
        Environment::new(site, SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000))
    }

    fn readings(speed: f64, direction: f64) -> StationReadings {
        StationReadings{wind_directions: vec![direction],
                        wind_speeds: vec![speed],
                        temperatures: vec![10.0],
                        humidity: Some(20.0)}
    }

    #[test]
    fn test_initial_state_is_unknown() {
        let env = environment();
        let snapshot = env.snapshot();
        assert_eq!(snapshot.weather, WeatherState::default());
        assert!(snapshot.clouds.is_none());
        assert!(snapshot.sun.horizon.altitude.is_finite());
        assert!(snapshot.moon.horizon.altitude.is_finite());
    }

    #[test]
    fn test_refresh_weather() {
        let env = environment();
        let status = env.refresh_weather(&FixedWeather(readings(12.0, 200.0)));
        assert!(status.is_updated());
        let weather = env.snapshot().weather;
        assert_eq!(weather.wind, Some(Wind{speed: 12.0, direction: 200.0}));
        assert_eq!(weather.temperature, Some(10.0));
        assert!(weather.updated.is_some());
    }

    #[test]
    fn test_failed_weather_refresh_keeps_prior_state() {
        let env = environment();
        env.refresh_weather(&FixedWeather(readings(12.0, 200.0)));
        let before = env.snapshot().weather;

        let status = env.refresh_weather(&OfflineWeather);
        assert!(matches!(status, RefreshStatus::Failed(_)));
        let after = env.snapshot().weather;
        assert_eq!(after.wind, before.wind);
        assert_eq!(after.temperature, before.temperature);
        assert_eq!(after.updated, before.updated);
        assert!(after.refresh_failed);

        assert!(env.refresh_weather(&FixedWeather(readings(5.0, 90.0))).is_updated());
        assert!(!env.snapshot().weather.refresh_failed);
    }

    #[test]
    fn test_refresh_positions() {
        let env = environment();
        let old = env.snapshot();
        let later = old.time + Duration::from_secs(6 * 3600);
        env.refresh_positions(later);
        let new = env.snapshot();
        assert_eq!(new.time, later);
        assert_ne!(new.sun.horizon, old.sun.horizon);
        // The old snapshot is untouched.
        assert_ne!(old.time, later);
    }

    #[test]
    fn test_snapshot_at() {
        let env = environment();
        let now = env.snapshot();
        let later = now.time + Duration::from_secs(10 * 3600);
        let projected = env.snapshot_at(later);
        assert_eq!(projected.time, later);
        assert_eq!(projected.weather, now.weather);
        // The Moon moves about half a degree per hour.
        let moved = angular_separation(&now.moon.equatorial, &projected.moon.equatorial);
        assert!(moved > 3.0 && moved < 8.0, "{}", moved);
        // The stored snapshot is untouched.
        assert_eq!(env.snapshot().time, now.time);
    }

    #[test]
    fn test_refresh_clouds() {
        let env = environment();
        assert!(env.refresh_clouds(Some(&FixedClouds)).is_updated());
        assert!(env.snapshot().clouds.is_some());

        // A failed refresh drops the mask instead of keeping it stale.
        let status = env.refresh_clouds(Some(&BrokenCamera));
        assert!(matches!(status, RefreshStatus::Failed(_)));
        assert!(env.snapshot().clouds.is_none());

        env.refresh_clouds(Some(&FixedClouds));
        assert!(matches!(env.refresh_clouds(None), RefreshStatus::Disabled));
        assert!(env.snapshot().clouds.is_none());
    }

    #[test]
    fn test_concurrent_readers_see_whole_snapshots() {
        let env = Arc::new(environment());
        let writer_env = env.clone();
        let writer = std::thread::spawn(move || {
            for i in 0..200 {
                let speed = 1.0 + (i % 90) as f64;
                // Direction always tracks speed, so a torn read would show.
                writer_env.refresh_weather(&FixedWeather(readings(speed, speed)));
            }
        });
        for _ in 0..200 {
            if let Some(wind) = env.snapshot().weather.wind {
                assert_eq!(wind.speed, wind.direction);
            }
        }
        writer.join().unwrap();
    }
}  // mod tests.
