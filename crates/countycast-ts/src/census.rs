//! Sub-county census aggregation.
//!
//! Block-group rows are rolled up to counties by summing every numeric
//! column, then the per-file results are outer-joined on county code.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::Context;
use polars::prelude::*;
use tracing::info;

use countycast_core::{CountyFips, PipelineError, PipelineResult};
use countycast_io::sources::census::{read_census_table, CensusTable};

const COUNTY: &str = "county";
const RIGHT_SUFFIX: &str = "_right";

/// County-level census attributes. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountyCensus {
    columns: Vec<String>,
    values: BTreeMap<CountyFips, BTreeMap<String, f64>>,
}

impl CountyCensus {
    /// Union of all column names, sorted.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn counties(&self) -> impl Iterator<Item = &CountyFips> {
        self.values.keys()
    }

    pub fn contains(&self, county: &CountyFips) -> bool {
        self.values.contains_key(county)
    }

    pub fn get(&self, county: &CountyFips) -> Option<&BTreeMap<String, f64>> {
        self.values.get(county)
    }

    /// Value of `column` for `county`; `None` if either is absent.
    pub fn value(&self, county: &CountyFips, column: &str) -> Option<f64> {
        self.values.get(county)?.get(column).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Build from a frame with a `county` column and one `f64` column per
    /// attribute. Null cells mean the county never appeared in a file that
    /// carries the column.
    fn from_frame(frame: &DataFrame) -> PipelineResult<Self> {
        let counties = frame
            .column(COUNTY)
            .and_then(|s| s.utf8().cloned())
            .context("reading county column of census frame")?;
        let columns: BTreeSet<String> = frame
            .get_column_names()
            .into_iter()
            .filter(|name| *name != COUNTY)
            .map(str::to_string)
            .collect();

        let mut counties_in_order = Vec::with_capacity(counties.len());
        for county in &counties {
            counties_in_order.push(county.map(CountyFips::parse).transpose()?);
        }
        let mut values: BTreeMap<CountyFips, BTreeMap<String, f64>> = counties_in_order
            .iter()
            .flatten()
            .map(|county| (county.clone(), BTreeMap::new()))
            .collect();
        for name in &columns {
            let series = frame
                .column(name)
                .and_then(|s| s.f64().cloned())
                .with_context(|| format!("census column '{name}' is not numeric"))?;
            for (county, value) in counties_in_order.iter().zip(&series) {
                if let (Some(county), Some(value)) = (county, value) {
                    if let Some(row) = values.get_mut(county) {
                        row.insert(name.clone(), value);
                    }
                }
            }
        }
        Ok(Self {
            columns: columns.into_iter().collect(),
            values,
        })
    }
}

pub struct CensusAggregator;

impl CensusAggregator {
    /// Read and aggregate every census batch file.
    pub fn build(census_files: &[PathBuf]) -> PipelineResult<CountyCensus> {
        if census_files.is_empty() {
            return Err(PipelineError::MissingData(
                "at least one census file is required".into(),
            ));
        }
        let mut tables = Vec::with_capacity(census_files.len());
        for path in census_files {
            tables.push(read_census_table(path)?);
        }
        Self::build_from_tables(&tables)
    }

    pub fn build_from_tables(tables: &[CensusTable]) -> PipelineResult<CountyCensus> {
        let mut merged: Option<DataFrame> = None;
        for table in tables {
            let per_county = Self::aggregate_table(table)?;
            info!(
                file = %table.path.display(),
                block_groups = table.rows.len(),
                counties = per_county.height(),
                "aggregated census file"
            );
            merged = Some(match merged {
                Some(left) => Self::outer_merge(&left, &per_county)?,
                None => per_county,
            });
        }
        match merged {
            Some(frame) => CountyCensus::from_frame(&frame),
            None => Ok(CountyCensus::default()),
        }
    }

    /// Sum one file's block-group rows per derived county code.
    ///
    /// Blank cells contribute nothing, but the column is still recorded for
    /// the county (as 0 if every cell was blank).
    pub fn aggregate_table(table: &CensusTable) -> PipelineResult<DataFrame> {
        let mut counties = Vec::with_capacity(table.rows.len());
        for row in &table.rows {
            let county = CountyFips::from_block_group(&row.block_group).map_err(|err| {
                PipelineError::Parse(format!("{}: {err}", table.path.display()))
            })?;
            counties.push(county.as_str().to_string());
        }

        let mut series = Vec::with_capacity(table.columns.len() + 1);
        series.push(Series::new(COUNTY, counties));
        for (idx, column) in table.columns.iter().enumerate() {
            let cells: Vec<Option<f64>> = table
                .rows
                .iter()
                .map(|row| row.values.get(idx).copied().flatten())
                .collect();
            series.push(Series::new(column, cells));
        }
        let frame = DataFrame::new(series)
            .with_context(|| format!("building census frame for {}", table.path.display()))?;

        let sums: Vec<Expr> = table
            .columns
            .iter()
            .map(|column| col(column).fill_null(lit(0.0)).sum())
            .collect();
        let aggregated = frame
            .lazy()
            .group_by([col(COUNTY)])
            .agg(sums)
            .collect()
            .context("running census groupby aggregation")?;
        Ok(aggregated)
    }

    /// Outer join on county code. Counties from either side are kept; a
    /// column present on both sides is summed where both sides have a value.
    pub fn outer_merge(left: &DataFrame, right: &DataFrame) -> PipelineResult<DataFrame> {
        let overlap: Vec<String> = right
            .get_column_names()
            .into_iter()
            .filter(|name| *name != COUNTY && left.get_column_names().contains(name))
            .map(str::to_string)
            .collect();

        let joined = left
            .outer_join(right, [COUNTY], [COUNTY])
            .context("joining census frames on county")?;
        if overlap.is_empty() {
            return Ok(joined);
        }

        let coalesced: Vec<Expr> = overlap
            .iter()
            .map(|name| {
                let ours = col(name);
                let theirs = col(&format!("{name}{RIGHT_SUFFIX}"));
                when(ours.clone().is_null())
                    .then(theirs.clone())
                    .otherwise(
                        when(theirs.clone().is_null())
                            .then(ours.clone())
                            .otherwise(ours + theirs),
                    )
                    .alias(name)
            })
            .collect();
        let suffixed: Vec<String> = overlap
            .iter()
            .map(|name| format!("{name}{RIGHT_SUFFIX}"))
            .collect();
        let merged = joined
            .lazy()
            .with_columns(coalesced)
            .drop_columns(suffixed)
            .collect()
            .context("summing overlapping census columns")?;
        Ok(merged)
    }
}
