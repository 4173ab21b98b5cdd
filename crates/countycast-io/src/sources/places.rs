//! Point-of-interest lookup tables: place → county and place → category.

use std::path::Path;

use serde::Deserialize;

use super::{csv_error, open_csv, require_columns};
use countycast_core::PipelineResult;

pub const PLACE_ID_COLUMN: &str = "safegraph_place_id";
pub const COUNTY_COLUMN: &str = "countyFIPS";
pub const CATEGORY_COLUMN: &str = "top_category";

/// One row of the place → county mapping. The county code may be blank.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlaceCountyRow {
    #[serde(rename = "safegraph_place_id")]
    pub place_id: String,
    #[serde(rename = "countyFIPS")]
    pub county_fips: Option<String>,
}

/// One row of a place → top-level category table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlaceCategoryRow {
    #[serde(rename = "safegraph_place_id")]
    pub place_id: String,
    pub top_category: Option<String>,
}

/// Read the place → county mapping table.
pub fn read_place_counties(path: impl AsRef<Path>) -> PipelineResult<Vec<PlaceCountyRow>> {
    let path = path.as_ref();
    let mut reader = open_csv(path, "place county mapping")?;
    require_columns(&mut reader, path, &[PLACE_ID_COLUMN, COUNTY_COLUMN])?;
    let mut rows = Vec::new();
    for result in reader.deserialize() {
        let row: PlaceCountyRow = result.map_err(|err| csv_error(path, err))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Read one place → category table.
pub fn read_place_categories(path: impl AsRef<Path>) -> PipelineResult<Vec<PlaceCategoryRow>> {
    let path = path.as_ref();
    let mut reader = open_csv(path, "place category")?;
    require_columns(&mut reader, path, &[PLACE_ID_COLUMN, CATEGORY_COLUMN])?;
    let mut rows = Vec::new();
    for result in reader.deserialize() {
        let row: PlaceCategoryRow = result.map_err(|err| csv_error(path, err))?;
        rows.push(row);
    }
    Ok(rows)
}
