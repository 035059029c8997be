// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::time::SystemTime;

use canonical_error::{CanonicalError, invalid_argument_error};
use log::debug;

use crate::astro_util::{EquatorialCoord, HorizonCoord, airmass,
                        angular_separation, equatorial_to_horizontal};
use crate::environment::EnvironmentalSnapshot;
use crate::observability::{ObservabilityPolicy, current_wind_envelope,
                           moon_clear, true_north_azimuth};
use crate::site::SiteModel;
use crate::wind_envelope::WindSeverity;

/// Largest number of cells a single sweep will evaluate.
pub const MAX_GRID_CELLS: usize = 1_000_000;

/// Sample points of a visibility grid. Right ascension runs 0 up to (not
/// including) 24h; declination runs from `dec_min` to `dec_max` inclusive.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridSpec {
    pub ra_step_hours: f64,
    pub dec_step: f64,
    pub dec_min: f64,
    pub dec_max: f64,
}

impl Default for GridSpec {
    // 15 degrees in RA by 10 degrees in Dec, whole sphere.
    fn default() -> Self {
        GridSpec{ra_step_hours: 1.0, dec_step: 10.0, dec_min: -90.0, dec_max: 90.0}
    }
}

impl GridSpec {
    pub fn validate(&self) -> Result<(), CanonicalError> {
        if !(self.ra_step_hours > 0.0 && self.ra_step_hours <= 24.0) {
            return Err(invalid_argument_error(
                format!("RA step {}h must be in (0, 24]", self.ra_step_hours).as_str()));
        }
        if !(self.dec_step > 0.0) {
            return Err(invalid_argument_error(
                format!("Dec step {} must be positive", self.dec_step).as_str()));
        }
        if !(-90.0 <= self.dec_min && self.dec_min <= self.dec_max &&
             self.dec_max <= 90.0) {
            return Err(invalid_argument_error(
                format!("Bad declination range {}..{}",
                        self.dec_min, self.dec_max).as_str()));
        }
        let cells = self.ra_count() * (self.dec_count() + 1.0);
        if cells > MAX_GRID_CELLS as f64 {
            return Err(invalid_argument_error(
                format!("Grid of {:.0} cells exceeds the maximum of {}",
                        cells, MAX_GRID_CELLS).as_str()));
        }
        Ok(())
    }

    fn ra_count(&self) -> f64 {
        (24.0 / self.ra_step_hours).ceil()
    }

    // Number of steps after `dec_min`.
    fn dec_count(&self) -> f64 {
        ((self.dec_max - self.dec_min) / self.dec_step + 1e-9).floor()
    }

    fn ra_values(&self) -> Vec<f64> {
        let count = self.ra_count() as usize;
        (0..count).map(|i| i as f64 * self.ra_step_hours)
            .filter(|ra| *ra < 24.0).collect()
    }

    fn dec_values(&self) -> Vec<f64> {
        let count = self.dec_count() as usize;
        (0..=count).map(|i| (self.dec_min + i as f64 * self.dec_step).min(self.dec_max))
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SkyCell {
    pub coord: EquatorialCoord,
    pub horizon: HorizonCoord,
    pub airmass: Option<f64>,

    // Above the horizon and at or below the airmass ceiling.
    pub visible: bool,

    // None when the cell is not visible, or is too close to the Moon.
    pub moon_separation: Option<f64>,

    // Inside a wedge that blocks pointing. Always false when the wind is
    // unknown; see `VisibilityGrid::wind_checked`.
    pub wind_unsafe: bool,

    pub cloud_free: Option<bool>,
}

/// Cells are stored by declination row, then right ascension column.
#[derive(Clone, Debug)]
pub struct VisibilityGrid {
    pub spec: GridSpec,
    pub time: SystemTime,
    ra_cells: usize,
    cells: Vec<SkyCell>,

    // False when the weather was unknown or stale, in which case no cell is
    // marked wind-unsafe even though none is known to be safe.
    pub wind_checked: bool,
    pub wind_severity: Option<WindSeverity>,
}

impl VisibilityGrid {
    /// (rows, cols): number of declination rows and right ascension columns.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.cells.len() / self.ra_cells, self.ra_cells)
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&SkyCell> {
        if col >= self.ra_cells {
            return None;
        }
        self.cells.get(row * self.ra_cells + col)
    }

    pub fn cells(&self) -> &[SkyCell] {
        &self.cells
    }

    pub fn visible_count(&self) -> usize {
        self.cells.iter().filter(|c| c.visible).count()
    }

    /// Cells passing every check. Zero whenever the wind was not checked.
    pub fn observable_count(&self) -> usize {
        if !self.wind_checked {
            return 0;
        }
        self.cells.iter().filter(|c| {
            c.visible && c.moon_separation.is_some() && !c.wind_unsafe &&
                c.cloud_free != Some(false)
        }).count()
    }
}

/// Computes per-cell visibility over a regular RA/Dec grid. A sky with no
/// cell under `airmass_ceiling` (daytime, say) is a valid all-not-visible
/// result; only bad arguments are errors.
pub fn sweep_visibility_grid(snapshot: &EnvironmentalSnapshot,
                             site_model: &SiteModel,
                             time: &SystemTime,
                             airmass_ceiling: f64,
                             moon_angle_floor: f64,
                             grid: &GridSpec,
                             policy: &ObservabilityPolicy)
                             -> Result<VisibilityGrid, CanonicalError> {
    grid.validate()?;
    if !(airmass_ceiling > 1.0) {
        return Err(invalid_argument_error(
            format!("Airmass ceiling must be > 1.0, got {}", airmass_ceiling).as_str()));
    }
    if !(moon_angle_floor >= 0.0) {
        return Err(invalid_argument_error(
            format!("Moon angle floor must be >= 0, got {}", moon_angle_floor).as_str()));
    }
    let site = site_model.site();
    let limits = site_model.limits();
    let envelope = current_wind_envelope(snapshot, &limits, time, policy);

    let ra_values = grid.ra_values();
    let dec_values = grid.dec_values();
    let mut cells = Vec::with_capacity(ra_values.len() * dec_values.len());
    for dec in &dec_values {
        for ra in &ra_values {
            let coord = EquatorialCoord{ra: *ra, dec: *dec};
            let horizon = equatorial_to_horizontal(&coord, time, site);
            let airmass = airmass(horizon.altitude);
            let visible = airmass.is_some_and(|a| a <= airmass_ceiling);
            let moon_separation = if visible {
                let separation = angular_separation(&coord, &snapshot.moon.equatorial);
                moon_clear(separation, moon_angle_floor).then_some(separation)
            } else {
                None
            };
            let true_azimuth = true_north_azimuth(&horizon, site);
            let wind_unsafe = envelope.is_some_and(
                |e| e.blocks(true_azimuth, limits.warn_blocks));
            let cloud_free = snapshot.clouds.as_ref().and_then(|mask| {
                mask.is_occluded(&HorizonCoord{altitude: horizon.altitude,
                                               azimuth: true_azimuth})
            }).map(|occluded| !occluded);
            cells.push(SkyCell{coord, horizon, airmass, visible, moon_separation,
                               wind_unsafe, cloud_free});
        }
    }
    let result = VisibilityGrid{spec: *grid, time: *time, ra_cells: ra_values.len(),
                                cells, wind_checked: envelope.is_some(),
                                wind_severity: envelope.map(|e| e.severity)};
    debug!("Visibility grid {:?}: {} of {} cells visible",
           result.dimensions(), result.visible_count(), result.cells.len());
    Ok(result)
}

// mod tests.
