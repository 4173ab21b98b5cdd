//! Policy-response index table (`region,date,<index columns…>`).
//!
//! `region` is either a 5-digit county code or a 2-digit state prefix;
//! county rows take precedence over state rows when features are assembled.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use super::{csv_error, open_csv, parse_number, require_columns};
use countycast_core::{PipelineError, PipelineResult};

pub const REGION_COLUMN: &str = "region";
pub const DATE_COLUMN: &str = "date";

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyRow {
    pub region: String,
    pub date: NaiveDate,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyTable {
    pub path: PathBuf,
    /// Index column names in header order.
    pub columns: Vec<String>,
    pub rows: Vec<PolicyRow>,
}

pub fn read_policy_table(path: impl AsRef<Path>) -> PipelineResult<PolicyTable> {
    let path = path.as_ref();
    let mut reader = open_csv(path, "policy index")?;
    let headers = require_columns(&mut reader, path, &[REGION_COLUMN, DATE_COLUMN])?;

    let region_idx = headers.iter().position(|h| h == REGION_COLUMN).unwrap_or_default();
    let date_idx = headers.iter().position(|h| h == DATE_COLUMN).unwrap_or_default();
    let columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != region_idx && *idx != date_idx)
        .map(|(idx, name)| (idx, name.to_string()))
        .collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|err| csv_error(path, err))?;
        let region = record.get(region_idx).unwrap_or_default().to_string();
        if !(region.len() == 2 || region.len() == 5) || !region.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PipelineError::Parse(format!(
                "{}: region '{region}' is neither a state nor a county code",
                path.display()
            )));
        }
        let raw_date = record.get(date_idx).unwrap_or_default();
        let date = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d").map_err(|err| {
            PipelineError::Parse(format!("{}: invalid date '{raw_date}': {err}", path.display()))
        })?;
        let mut values = Vec::with_capacity(columns.len());
        for (idx, name) in &columns {
            values.push(parse_number(record.get(*idx).unwrap_or_default(), name, path)?);
        }
        rows.push(PolicyRow {
            region,
            date,
            values,
        });
    }

    Ok(PolicyTable {
        path: path.to_path_buf(),
        columns: columns.into_iter().map(|(_, name)| name).collect(),
        rows,
    })
}
