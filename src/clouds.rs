// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fs;
use std::path::PathBuf;

use canonical_error::{CanonicalError, invalid_argument_error, unavailable_error};

use crate::astro_util::{HorizonCoord, normalize_degrees};

/// Cloud occlusion over the sky, as a regular grid of (elevation, azimuth)
/// cells. Each cell holds the occluded fraction 0..1.
#[derive(Clone, Debug, PartialEq)]
pub struct CloudMask {
    // Row-major: `cells[row * azimuth_cells + col]`, row 0 at
    // `min_elevation`, col 0 at azimuth 0.
    cells: Vec<f64>,
    azimuth_cells: usize,
    elevation_cells: usize,
    min_elevation: f64,
    max_elevation: f64,

    // Cells with occlusion at or above this are considered cloudy.
    threshold: f64,
}

impl CloudMask {
    /// `rows` are ordered from `min_elevation` upwards; every row must have
    /// the same number of azimuth cells spanning 0..360.
    pub fn new(rows: Vec<Vec<f64>>, min_elevation: f64, max_elevation: f64,
               threshold: f64) -> Result<Self, CanonicalError> {
        if rows.is_empty() || rows[0].is_empty() {
            return Err(invalid_argument_error("Cloud mask has no cells"));
        }
        if !(min_elevation < max_elevation) || min_elevation < -90.0 ||
            max_elevation > 90.0
        {
            return Err(invalid_argument_error(
                format!("Bad cloud mask elevation range {}..{}",
                        min_elevation, max_elevation).as_str()));
        }
        if !(0.0..=1.0).contains(&threshold) {
            return Err(invalid_argument_error(
                format!("Cloud threshold {} outside 0..1", threshold).as_str()));
        }
        let azimuth_cells = rows[0].len();
        let elevation_cells = rows.len();
        let mut cells = Vec::with_capacity(azimuth_cells * elevation_cells);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != azimuth_cells {
                return Err(invalid_argument_error(
                    format!("Cloud mask row {} has {} cells, expected {}",
                            i, row.len(), azimuth_cells).as_str()));
            }
            if row.iter().any(|v| !(0.0..=1.0).contains(v)) {
                return Err(invalid_argument_error(
                    format!("Cloud mask row {} has values outside 0..1", i).as_str()));
            }
            cells.extend(row);
        }
        Ok(CloudMask{cells, azimuth_cells, elevation_cells,
                     min_elevation, max_elevation, threshold})
    }

    /// Occluded fraction in the cell containing `coord`, or None if `coord`
    /// is outside the elevation range covered by the mask.
    pub fn occlusion(&self, coord: &HorizonCoord) -> Option<f64> {
        if !(coord.altitude >= self.min_elevation &&
             coord.altitude <= self.max_elevation) {
            return None;
        }
        let elevation_step =
            (self.max_elevation - self.min_elevation) / self.elevation_cells as f64;
        let row = (((coord.altitude - self.min_elevation) / elevation_step) as usize)
            .min(self.elevation_cells - 1);
        let azimuth_step = 360.0 / self.azimuth_cells as f64;
        let col = ((normalize_degrees(coord.azimuth) / azimuth_step) as usize)
            .min(self.azimuth_cells - 1);
        Some(self.cells[row * self.azimuth_cells + col])
    }

    /// Whether `coord` is behind cloud. None outside the covered range.
    pub fn is_occluded(&self, coord: &HorizonCoord) -> Option<bool> {
        self.occlusion(coord).map(|o| o >= self.threshold)
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.elevation_cells, self.azimuth_cells)
    }

    /// Parses a whitespace separated grid, one elevation row per line, lowest
    /// elevation first. Blank lines and lines starting with '#' are ignored.
    pub fn parse(text: &str, min_elevation: f64, max_elevation: f64,
                 threshold: f64) -> Result<Self, CanonicalError> {
        let mut rows = Vec::new();
        for (line_number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let row = line.split_whitespace()
                .map(|v| v.parse::<f64>())
                .collect::<Result<Vec<f64>, _>>()
                .map_err(|e| invalid_argument_error(
                    format!("Cloud mask line {}: {:?}", line_number + 1, e).as_str()))?;
            rows.push(row);
        }
        Self::new(rows, min_elevation, max_elevation, threshold)
    }
}

/// Provides the current cloud occlusion for a site. May block on file or
/// camera I/O.
pub trait CloudSource {
    fn fetch(&self, site_name: &str) -> Result<CloudMask, CanonicalError>;
}

/// Reads a pre-computed occlusion grid written by the all-sky camera
/// pipeline.
pub struct MaskFileCloudSource {
    pub path: PathBuf,
    pub min_elevation: f64,
    pub max_elevation: f64,
    pub threshold: f64,
}

impl CloudSource for MaskFileCloudSource {
    fn fetch(&self, site_name: &str) -> Result<CloudMask, CanonicalError> {
        let text = fs::read_to_string(&self.path).map_err(|e| {
            unavailable_error(format!("Cannot read cloud mask {:?} for {}: {:?}",
                                      self.path, site_name, e).as_str())
        })?;
        CloudMask::parse(&text, self.min_elevation, self.max_elevation,
                         self.threshold)
    }
}

// mod tests.
