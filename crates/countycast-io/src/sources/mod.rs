//! Readers for the external source tables.
//!
//! Each reader consumes one already-enumerated file (see
//! [`crate::manifest::SourceManifest`]) and returns typed rows. Joining,
//! grouping and validation across rows happen downstream in `countycast-ts`.
//!
//! | Table | Key | Reader |
//! |-------|-----|--------|
//! | place → county | `safegraph_place_id` | [`places::read_place_counties`] |
//! | place → category | `safegraph_place_id` | [`places::read_place_categories`] |
//! | census block groups | `census_block_group` | [`census::read_census_table`] |
//! | visit patterns | `safegraph_place_id` | [`patterns::read_visit_patterns`] |
//! | county universe | `FIPS` | [`counties::read_counties`] |
//! | cumulative cases | `FIPS`, `date` | [`cases::read_cases`] |
//! | policy indices | `region`, `date` | [`policy::read_policy_table`] |

pub mod cases;
pub mod census;
pub mod counties;
pub mod patterns;
pub mod places;
pub mod policy;

use std::fs::File;
use std::path::Path;

use countycast_core::{PipelineError, PipelineResult};

/// Open a headered CSV file, failing with `MissingData` when it is absent.
pub(crate) fn open_csv(path: &Path, what: &str) -> PipelineResult<csv::Reader<File>> {
    if !path.is_file() {
        return Err(PipelineError::MissingData(format!(
            "{what} file not found: {}",
            path.display()
        )));
    }
    let file = File::open(path)?;
    Ok(csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(file))
}

/// Ensure every required column is present in the header row.
pub(crate) fn require_columns(
    reader: &mut csv::Reader<File>,
    path: &Path,
    required: &[&str],
) -> PipelineResult<csv::StringRecord> {
    let headers = reader
        .headers()
        .map_err(|err| csv_error(path, err))?
        .clone();
    for column in required {
        if !headers.iter().any(|h| h == *column) {
            return Err(PipelineError::MissingData(format!(
                "column '{column}' not found in {}",
                path.display()
            )));
        }
    }
    Ok(headers)
}

pub(crate) fn csv_error(path: &Path, err: csv::Error) -> PipelineError {
    PipelineError::Parse(format!("{}: {err}", path.display()))
}

/// Parse an optional numeric cell; empty cells are `None`.
pub(crate) fn parse_number(raw: &str, column: &str, path: &Path) -> PipelineResult<Option<f64>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<f64>().map(Some).map_err(|_| {
        PipelineError::Parse(format!(
            "{}: column '{column}' holds non-numeric value '{raw}'",
            path.display()
        ))
    })
}
