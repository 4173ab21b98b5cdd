//! County universe table (`FIPS,Name,State`).

use std::path::Path;

use serde::Deserialize;

use super::{csv_error, open_csv, require_columns};
use countycast_core::{CountyFips, PipelineResult};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CountyInfo {
    #[serde(rename = "FIPS")]
    pub fips: CountyFips,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "State")]
    pub state: String,
}

/// Read the county universe in file order.
pub fn read_counties(path: impl AsRef<Path>) -> PipelineResult<Vec<CountyInfo>> {
    let path = path.as_ref();
    let mut reader = open_csv(path, "county info")?;
    require_columns(&mut reader, path, &["FIPS", "Name", "State"])?;
    let mut rows = Vec::new();
    for result in reader.deserialize() {
        let row: CountyInfo = result.map_err(|err| csv_error(path, err))?;
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn reads_counties_with_leading_zeros() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("counties.csv");
        fs::write(&path, "FIPS,Name,State\n01001,Autauga,AL\n06001,Alameda,CA\n").unwrap();
        let rows = read_counties(&path).unwrap();
        assert_eq!(rows[0].fips.as_str(), "01001");
        assert_eq!(rows[1].name, "Alameda");
    }

    #[test]
    fn truncated_fips_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("counties.csv");
        fs::write(&path, "FIPS,Name,State\n1001,Autauga,AL\n").unwrap();
        assert!(read_counties(&path).is_err());
    }
}
