// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Site configuration, read from a TOML file:
//!
//! ```toml
//! weather_staleness_minutes = 10
//!
//! [sites.LaSilla]
//! latitude = "-29:15:33.7"
//! longitude = -70.7313
//! elevation = 2400.0
//!
//! [sites.LaSilla.limits]
//! max_airmass = 1.5
//! min_moon_angle = 30.0
//! wind_warn = 15.0
//! wind_limit = 20.0
//!
//! [sites.LaSilla.weather]
//! report_path = "/var/run/meteo.last"
//! ```
//!
//! A configuration error is fatal for the site it concerns.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use canonical_error::{CanonicalError, invalid_argument_error, not_found_error};
use serde::Deserialize;

use crate::astro_util::parse_sexagesimal;
use crate::clouds::MaskFileCloudSource;
use crate::observability::ObservabilityPolicy;
use crate::site::{OperationalLimits, Site};
use crate::weather::ReportFileWeatherSource;

#[derive(Debug, Clone, Deserialize)]
pub struct ObservatoryConfig {
    #[serde(default = "default_weather_staleness_minutes")]
    pub weather_staleness_minutes: f64,
    pub sites: BTreeMap<String, SiteEntry>,
}

/// Decimal degrees or a sexagesimal string such as "-29:15:33.7".
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AngleValue {
    Degrees(f64),
    Text(String),
}

impl AngleValue {
    fn degrees(&self) -> Result<f64, CanonicalError> {
        match self {
            AngleValue::Degrees(d) => Ok(*d),
            AngleValue::Text(text) => parse_sexagesimal(text),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteEntry {
    pub latitude: AngleValue,
    pub longitude: AngleValue,
    pub elevation: f64,
    #[serde(default)]
    pub azimuth_reference: f64,
    pub limits: LimitsEntry,
    pub weather: Option<WeatherSettings>,
    pub clouds: Option<CloudSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsEntry {
    pub max_airmass: f64,
    pub min_moon_angle: f64,
    pub wind_warn: f64,
    pub wind_limit: f64,
    #[serde(default)]
    pub warn_blocks: bool,
    #[serde(default = "default_warn_half_width")]
    pub warn_half_width: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WeatherSettings {
    pub report_path: PathBuf,
    pub debug_report_path: Option<PathBuf>,
    pub preferred_speed_station: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CloudSettings {
    pub mask_path: PathBuf,
    #[serde(default)]
    pub min_elevation: f64,
    #[serde(default = "default_max_elevation")]
    pub max_elevation: f64,
    #[serde(default = "default_cloud_threshold")]
    pub threshold: f64,
}

fn default_weather_staleness_minutes() -> f64 {
    10.0
}

fn default_warn_half_width() -> f64 {
    90.0
}

fn default_max_elevation() -> f64 {
    90.0
}

fn default_cloud_threshold() -> f64 {
    0.5
}

/// Everything needed to run the engine for one site, validated.
#[derive(Debug, Clone)]
pub struct SiteSettings {
    pub site: Site,
    pub limits: OperationalLimits,
    pub weather: Option<WeatherSettings>,
    pub clouds: Option<CloudSettings>,
}

impl SiteSettings {
    pub fn weather_source(&self, debug_mode: bool) -> Option<ReportFileWeatherSource> {
        self.weather.as_ref().map(|w| {
            ReportFileWeatherSource::new(w.report_path.clone(),
                                         w.debug_report_path.clone(), debug_mode)
        })
    }

    pub fn cloud_source(&self) -> Option<MaskFileCloudSource> {
        self.clouds.as_ref().map(|c| {
            MaskFileCloudSource{path: c.mask_path.clone(),
                                min_elevation: c.min_elevation,
                                max_elevation: c.max_elevation,
                                threshold: c.threshold}
        })
    }
}

impl ObservatoryConfig {
    pub fn load(path: &Path) -> Result<Self, CanonicalError> {
        let content = fs::read_to_string(path).map_err(|e| {
            not_found_error(format!("Cannot read config file {:?}: {:?}", path, e).as_str())
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, CanonicalError> {
        let config: ObservatoryConfig = toml::from_str(content).map_err(|e| {
            invalid_argument_error(format!("Cannot parse config: {}", e).as_str())
        })?;
        if !(config.weather_staleness_minutes > 0.0 &&
             config.weather_staleness_minutes.is_finite()) {
            return Err(invalid_argument_error(
                format!("weather_staleness_minutes must be positive, got {}",
                        config.weather_staleness_minutes).as_str()));
        }
        Ok(config)
    }

    pub fn policy(&self) -> ObservabilityPolicy {
        ObservabilityPolicy{
            weather_staleness: Duration::from_secs_f64(self.weather_staleness_minutes * 60.0)
        }
    }

    pub fn site_names(&self) -> Vec<&str> {
        self.sites.keys().map(String::as_str).collect()
    }

    /// Resolves and validates the named site.
    pub fn site(&self, name: &str) -> Result<SiteSettings, CanonicalError> {
        let entry = self.sites.get(name).ok_or_else(|| not_found_error(
            format!("No site '{}' in config; have {:?}", name, self.site_names()).as_str()))?;
        let site = Site{name: name.to_string(),
                        latitude: entry.latitude.degrees()?,
                        longitude: entry.longitude.degrees()?,
                        elevation: entry.elevation,
                        azimuth_reference: entry.azimuth_reference};
        site.validate()?;
        let l = &entry.limits;
        let limits = OperationalLimits{max_airmass: l.max_airmass,
                                       min_moon_angle: l.min_moon_angle,
                                       wind_warn: l.wind_warn,
                                       wind_limit: l.wind_limit,
                                       warn_blocks: l.warn_blocks,
                                       warn_half_width: l.warn_half_width};
        limits.validate().map_err(|e| invalid_argument_error(
            format!("Site {}: {}", name, e.message).as_str()))?;
        if let Some(clouds) = &entry.clouds {
            if !(0.0..=1.0).contains(&clouds.threshold) {
                return Err(invalid_argument_error(
                    format!("Site {}: cloud threshold {} outside 0..1",
                            name, clouds.threshold).as_str()));
            }
        }
        Ok(SiteSettings{site, limits,
                        weather: entry.weather.clone(),
                        clouds: entry.clouds.clone()})
    }
}

// mod tests.
