//! Census block-group tables.
//!
//! Every column except the block-group identifier is numeric. The identifier
//! is read as raw text and never converted to a number, so leading zeros are
//! preserved for county derivation.

use std::path::{Path, PathBuf};

use super::{csv_error, open_csv, parse_number, require_columns};
use countycast_core::PipelineResult;

pub const BLOCK_GROUP_COLUMN: &str = "census_block_group";

/// One block-group row; `values` line up with [`CensusTable::columns`].
#[derive(Debug, Clone, PartialEq)]
pub struct CensusRow {
    pub block_group: String,
    pub values: Vec<Option<f64>>,
}

/// A single census batch file.
#[derive(Debug, Clone, PartialEq)]
pub struct CensusTable {
    pub path: PathBuf,
    pub columns: Vec<String>,
    pub rows: Vec<CensusRow>,
}

pub fn read_census_table(path: impl AsRef<Path>) -> PipelineResult<CensusTable> {
    let path = path.as_ref();
    let mut reader = open_csv(path, "census")?;
    let headers = require_columns(&mut reader, path, &[BLOCK_GROUP_COLUMN])?;

    let id_idx = headers
        .iter()
        .position(|h| h == BLOCK_GROUP_COLUMN)
        .unwrap_or_default();
    let columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != id_idx)
        .map(|(idx, name)| (idx, name.to_string()))
        .collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|err| csv_error(path, err))?;
        let block_group = record.get(id_idx).unwrap_or_default().to_string();
        let mut values = Vec::with_capacity(columns.len());
        for (idx, name) in &columns {
            values.push(parse_number(record.get(*idx).unwrap_or_default(), name, path)?);
        }
        rows.push(CensusRow {
            block_group,
            values,
        });
    }

    Ok(CensusTable {
        path: path.to_path_buf(),
        columns: columns.into_iter().map(|(_, name)| name).collect(),
        rows,
    })
}
