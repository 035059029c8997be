// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::collections::HashMap;
use std::io::BufRead;
use std::sync::Arc;

use canonical_error::{CanonicalError, invalid_argument_error, not_found_error};
use log::{info, warn};

use crate::astro_util::{EquatorialCoord, parse_degrees, parse_hours};
use crate::target::{Constraints, Target};

/// Which columns of a catalogue hold which target fields.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnMapping {
    pub name: String,
    pub ra: String,
    pub dec: String,
    pub max_airmass: Option<String>,
    pub min_moon_angle: Option<String>,
}

impl Default for ColumnMapping {
    // Column names of the observatory's rdb catalogues.
    fn default() -> Self {
        ColumnMapping{name: "code".to_string(),
                      ra: "alphacat".to_string(),
                      dec: "deltacat".to_string(),
                      max_airmass: None,
                      min_moon_angle: None}
    }
}

#[derive(Debug)]
pub struct CatalogImport {
    pub targets: Vec<Target>,

    // One-based line number and reason, for each row that was skipped.
    pub rejected: Vec<(usize, CanonicalError)>,
}

struct ColumnIndices {
    name: usize,
    ra: usize,
    dec: usize,
    max_airmass: Option<usize>,
    min_moon_angle: Option<usize>,
}

/// Reads a tab-separated "rdb" catalogue: a header row of column names, a
/// row of dashes, then one target per row. A malformed row is rejected on
/// its own; the rest of the catalogue is still imported. Errors are returned
/// only for I/O failure or a header lacking a mapped column.
pub fn import_rdb(reader: impl BufRead, program: Option<&str>,
                  columns: &ColumnMapping) -> Result<CatalogImport, CanonicalError> {
    let mut lines = reader.lines().enumerate();
    let header = loop {
        match lines.next() {
            None => return Err(invalid_argument_error("Catalogue has no header row")),
            Some((_, line)) => {
                let line = line.map_err(|e| invalid_argument_error(
                    format!("Cannot read catalogue: {:?}", e).as_str()))?;
                if !line.trim().is_empty() {
                    break line;
                }
            }
        }
    };
    let headers: Vec<&str> = header.split('\t').map(|h| h.trim()).collect();
    let find = |column: &str| -> Result<usize, CanonicalError> {
        headers.iter().position(|h| *h == column).ok_or_else(|| not_found_error(
            format!("Catalogue has no column '{}'", column).as_str()))
    };
    let indices = ColumnIndices{
        name: find(columns.name.as_str())?,
        ra: find(columns.ra.as_str())?,
        dec: find(columns.dec.as_str())?,
        max_airmass: columns.max_airmass.as_deref().map(&find).transpose()?,
        min_moon_angle: columns.min_moon_angle.as_deref().map(&find).transpose()?,
    };

    // Rows with the same overrides share one Constraints.
    let mut shared: HashMap<(Option<u64>, Option<u64>), Arc<Constraints>> = HashMap::new();
    let mut targets = Vec::new();
    let mut rejected = Vec::new();
    for (index, line) in lines {
        let line_number = index + 1;
        let line = line.map_err(|e| invalid_argument_error(
            format!("Cannot read catalogue line {}: {:?}", line_number, e).as_str()))?;
        if line.trim().is_empty() || line.starts_with("--") {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        match parse_row(&fields, &indices, program, &mut shared) {
            Ok(target) => targets.push(target),
            Err(e) => {
                warn!("Catalogue line {} rejected: {:?}", line_number, e);
                rejected.push((line_number, e));
            }
        }
    }
    info!("Imported {} targets, rejected {}", targets.len(), rejected.len());
    Ok(CatalogImport{targets, rejected})
}

fn parse_row(fields: &[&str], indices: &ColumnIndices, program: Option<&str>,
             shared: &mut HashMap<(Option<u64>, Option<u64>), Arc<Constraints>>)
             -> Result<Target, CanonicalError> {
    let optional = |i: Option<usize>| -> Result<Option<f64>, CanonicalError> {
        let Some(i) = i else { return Ok(None) };
        match fields.get(i).map(|f| f.trim()) {
            None | Some("") => Ok(None),
            Some(text) => text.parse::<f64>().map(Some).map_err(|_| invalid_argument_error(
                format!("Cannot parse constraint '{}'", text).as_str())),
        }
    };

    let name = required_field(fields, indices.name)?;
    let coord = EquatorialCoord{ra: parse_hours(required_field(fields, indices.ra)?)?,
                                dec: parse_degrees(required_field(fields, indices.dec)?)?};
    let max_airmass = optional(indices.max_airmass)?;
    let min_moon_angle = optional(indices.min_moon_angle)?;
    let constraints = shared
        .entry((max_airmass.map(f64::to_bits), min_moon_angle.map(f64::to_bits)))
        .or_insert_with(|| Arc::new(Constraints{max_airmass, min_moon_angle}))
        .clone();
    Target::new(name, coord, constraints, program.map(str::to_string))
}

fn required_field<'a>(fields: &[&'a str], i: usize) -> Result<&'a str, CanonicalError> {
    fields.get(i).map(|f| f.trim()).ok_or_else(|| invalid_argument_error(
        format!("Row has {} fields, need at least {}", fields.len(), i + 1).as_str()))
}

// mod tests.
