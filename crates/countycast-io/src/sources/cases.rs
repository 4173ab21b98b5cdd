//! Cumulative confirmed case counts (`FIPS,date,cases`).

use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;

use super::{csv_error, open_csv, require_columns};
use countycast_core::{CountyFips, PipelineResult};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CaseRow {
    #[serde(rename = "FIPS")]
    pub fips: CountyFips,
    pub date: NaiveDate,
    /// Cumulative count as of `date`.
    pub cases: f64,
}

pub fn read_cases(path: impl AsRef<Path>) -> PipelineResult<Vec<CaseRow>> {
    let path = path.as_ref();
    let mut reader = open_csv(path, "case count")?;
    require_columns(&mut reader, path, &["FIPS", "date", "cases"])?;
    let mut rows = Vec::new();
    for result in reader.deserialize() {
        let row: CaseRow = result.map_err(|err| csv_error(path, err))?;
        rows.push(row);
    }
    Ok(rows)
}
