//! Policy-response indices keyed by region and day.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;

use countycast_core::{CountyFips, PipelineError, PipelineResult};
use countycast_io::sources::policy::PolicyTable;

#[derive(Debug, Clone, Default)]
pub struct PolicyIndex {
    columns: Vec<String>,
    by_region: HashMap<String, BTreeMap<NaiveDate, Vec<f64>>>,
}

impl PolicyIndex {
    /// Blank cells become 0.0. Duplicate `(region, date)` rows are a
    /// `DataIntegrity` error.
    pub fn from_table(table: PolicyTable) -> PipelineResult<Self> {
        let mut by_region: HashMap<String, BTreeMap<NaiveDate, Vec<f64>>> = HashMap::new();
        for row in table.rows {
            let values = row.values.iter().map(|v| v.unwrap_or(0.0)).collect();
            let series = by_region.entry(row.region.clone()).or_default();
            if series.insert(row.date, values).is_some() {
                return Err(PipelineError::DataIntegrity(format!(
                    "{}: duplicate policy row for region {} on {}",
                    table.path.display(),
                    row.region,
                    row.date
                )));
            }
        }
        Ok(Self {
            columns: table.columns,
            by_region,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Index values for `county` on `date`: the county's own row, else its
    /// state's row, else zeros.
    pub fn lookup(&self, county: &CountyFips, date: NaiveDate) -> Vec<f64> {
        [county.as_str(), county.state()]
            .iter()
            .find_map(|region| self.by_region.get(*region)?.get(&date).cloned())
            .unwrap_or_else(|| vec![0.0; self.columns.len()])
    }
}
