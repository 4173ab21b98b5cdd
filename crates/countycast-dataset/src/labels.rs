//! Ordinal case-growth labels.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::{Duration, NaiveDate};

use countycast_core::{CountyFips, PipelineError, PipelineResult};
use countycast_io::sources::cases::{read_cases, CaseRow};

/// Maps a daily new-case count onto ordinal classes.
///
/// With boundaries `b_0 < b_1 < … < b_{K-1}` the class is the number of
/// boundaries `b_i <= value`, so values below `b_0` are class 0 and values at
/// or above `b_{K-1}` are class K.
#[derive(Debug, Clone, PartialEq)]
pub struct OrdinalLabeler {
    boundaries: Vec<f64>,
}

impl OrdinalLabeler {
    pub fn new(boundaries: Vec<f64>) -> PipelineResult<Self> {
        if boundaries.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(PipelineError::Config(format!(
                "class boundaries must be strictly increasing, got {boundaries:?}"
            )));
        }
        Ok(Self { boundaries })
    }

    pub fn num_classes(&self) -> usize {
        self.boundaries.len() + 1
    }

    pub fn classify(&self, value: f64) -> usize {
        self.boundaries.partition_point(|b| *b <= value)
    }
}

/// Cumulative confirmed cases per county and day.
#[derive(Debug, Clone, Default)]
pub struct CaseTable {
    cumulative: HashMap<CountyFips, BTreeMap<NaiveDate, f64>>,
}

impl CaseTable {
    pub fn load(path: &Path) -> PipelineResult<Self> {
        Self::from_rows(read_cases(path)?)
    }

    /// Duplicate `(county, date)` rows are a `DataIntegrity` error.
    pub fn from_rows(rows: Vec<CaseRow>) -> PipelineResult<Self> {
        let mut cumulative: HashMap<CountyFips, BTreeMap<NaiveDate, f64>> = HashMap::new();
        for row in rows {
            let series = cumulative.entry(row.fips.clone()).or_default();
            if series.insert(row.date, row.cases).is_some() {
                return Err(PipelineError::DataIntegrity(format!(
                    "duplicate case count for county {} on {}",
                    row.fips, row.date
                )));
            }
        }
        Ok(Self { cumulative })
    }

    pub fn cumulative(&self, county: &CountyFips, date: NaiveDate) -> Option<f64> {
        self.cumulative.get(county)?.get(&date).copied()
    }

    /// New cases reported on `date`: the day-over-day difference of the
    /// cumulative series, clamped at zero to absorb downward revisions.
    pub fn new_cases(&self, county: &CountyFips, date: NaiveDate) -> PipelineResult<f64> {
        let previous = date - Duration::days(1);
        let today = self.cumulative(county, date).ok_or_else(|| missing(county, date))?;
        let yesterday = self
            .cumulative(county, previous)
            .ok_or_else(|| missing(county, previous))?;
        Ok((today - yesterday).max(0.0))
    }

    pub fn len(&self) -> usize {
        self.cumulative.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cumulative.is_empty()
    }
}

fn missing(county: &CountyFips, date: NaiveDate) -> PipelineError {
    PipelineError::MissingData(format!("no case count for county {county} on {date}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 3, d).unwrap()
    }

    fn county() -> CountyFips {
        CountyFips::parse("06001").unwrap()
    }

    #[test]
    fn classify_counts_boundaries_at_or_below_value() {
        let labeler = OrdinalLabeler::new(vec![2.0, 11.0, 80.0]).unwrap();
        assert_eq!(labeler.num_classes(), 4);
        assert_eq!(labeler.classify(0.0), 0);
        assert_eq!(labeler.classify(1.9), 0);
        assert_eq!(labeler.classify(2.0), 1);
        assert_eq!(labeler.classify(10.0), 1);
        assert_eq!(labeler.classify(11.0), 2);
        assert_eq!(labeler.classify(79.0), 2);
        assert_eq!(labeler.classify(80.0), 3);
        assert_eq!(labeler.classify(1e6), 3);
    }

    #[test]
    fn labeler_rejects_unsorted_boundaries() {
        assert!(OrdinalLabeler::new(vec![5.0, 5.0]).is_err());
    }

    #[test]
    fn new_cases_differences_and_clamps() {
        let table = CaseTable::from_rows(vec![
            CaseRow { fips: county(), date: date(1), cases: 10.0 },
            CaseRow { fips: county(), date: date(2), cases: 25.0 },
            CaseRow { fips: county(), date: date(3), cases: 20.0 },
        ])
        .unwrap();
        assert_eq!(table.new_cases(&county(), date(2)).unwrap(), 15.0);
        assert_eq!(table.new_cases(&county(), date(3)).unwrap(), 0.0);
        let err = table.new_cases(&county(), date(1)).unwrap_err();
        assert!(matches!(err, PipelineError::MissingData(_)));
    }

    #[test]
    fn duplicate_case_rows_are_rejected() {
        let err = CaseTable::from_rows(vec![
            CaseRow { fips: county(), date: date(1), cases: 1.0 },
            CaseRow { fips: county(), date: date(1), cases: 2.0 },
        ])
        .unwrap_err();
        assert!(matches!(err, PipelineError::DataIntegrity(_)));
    }
}
