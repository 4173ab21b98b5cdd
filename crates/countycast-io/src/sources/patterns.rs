//! Weekly (or arbitrary-range) visit pattern files.
//!
//! Each row carries the place identifier, the date range it covers, the raw
//! visit total and a `visits_by_day` array such as `"[3,0,12,4,5,9,1]"`.
//! Range consistency across rows is checked by the aggregator, not here.

use std::path::Path;

use chrono::{DateTime, NaiveDate};
use serde::Deserialize;

use super::{csv_error, open_csv, require_columns};
use countycast_core::{PipelineError, PipelineResult};

pub const PATTERN_COLUMNS: [&str; 5] = [
    "safegraph_place_id",
    "date_range_start",
    "date_range_end",
    "raw_visit_counts",
    "visits_by_day",
];

/// One place's visits over the file's date range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitPatternRow {
    pub place_id: String,
    pub range_start: NaiveDate,
    pub range_end: NaiveDate,
    pub raw_visit_counts: u64,
    pub visits_by_day: Vec<u64>,
}

#[derive(Debug, Deserialize)]
struct RawPatternRow {
    safegraph_place_id: String,
    date_range_start: String,
    date_range_end: String,
    raw_visit_counts: u64,
    visits_by_day: String,
}

/// Read every row of a visit pattern file.
pub fn read_visit_patterns(path: impl AsRef<Path>) -> PipelineResult<Vec<VisitPatternRow>> {
    let path = path.as_ref();
    let mut reader = open_csv(path, "visit pattern")?;
    require_columns(&mut reader, path, &PATTERN_COLUMNS)?;

    let mut rows = Vec::new();
    for (line, result) in reader.deserialize().enumerate() {
        let raw: RawPatternRow = result.map_err(|err| csv_error(path, err))?;
        let context = || format!("{} row {}", path.display(), line + 1);
        rows.push(VisitPatternRow {
            place_id: raw.safegraph_place_id,
            range_start: parse_range_date(&raw.date_range_start)
                .map_err(|err| PipelineError::Parse(format!("{}: {err}", context())))?,
            range_end: parse_range_date(&raw.date_range_end)
                .map_err(|err| PipelineError::Parse(format!("{}: {err}", context())))?,
            raw_visit_counts: raw.raw_visit_counts,
            visits_by_day: parse_visits_by_day(&raw.visits_by_day)
                .map_err(|err| PipelineError::Parse(format!("{}: {err}", context())))?,
        });
    }
    Ok(rows)
}

/// Parse a range boundary: an RFC 3339 timestamp (its local date is used)
/// or a bare `YYYY-MM-DD` date.
pub fn parse_range_date(raw: &str) -> Result<NaiveDate, String> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.date_naive())
        .map_err(|err| format!("invalid date range boundary '{raw}': {err}"))
}

/// Parse a bracketed list of per-day counts separated by commas and/or
/// whitespace. `"[]"` yields an empty vector.
pub fn parse_visits_by_day(raw: &str) -> Result<Vec<u64>, String> {
    raw.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .map(|token| {
            token
                .parse::<u64>()
                .map_err(|_| format!("invalid visits_by_day entry '{token}'"))
        })
        .collect()
}
