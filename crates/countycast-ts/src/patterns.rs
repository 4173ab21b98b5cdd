//! Per-place visit patterns → per-county daily series.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use tracing::info;

use crate::geo::GeoKeyResolver;
use countycast_core::{CountyKey, DateWindow, PipelineError, PipelineResult};
use countycast_io::sources::patterns::{read_visit_patterns, VisitPatternRow};

/// Summed visits of every place resolving to one county over one file's range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedCountyDay {
    pub county: CountyKey,
    pub window: DateWindow,
    pub raw_visit_counts: u64,
    /// One entry per day of `window`.
    pub visits_by_day: Vec<u64>,
}

impl AggregatedCountyDay {
    /// Visits on `date`, if it falls inside the window.
    pub fn visits_on(&self, date: NaiveDate) -> Option<u64> {
        self.window
            .offset_of(date)
            .and_then(|offset| self.visits_by_day.get(offset).copied())
    }
}

/// Result of aggregating one pattern file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternAggregate {
    pub window: DateWindow,
    pub counties: BTreeMap<CountyKey, AggregatedCountyDay>,
    /// Rows whose place did not resolve to a county.
    pub unassigned_rows: usize,
}

impl PatternAggregate {
    pub fn get(&self, county: &CountyKey) -> Option<&AggregatedCountyDay> {
        self.counties.get(county)
    }

    pub fn into_map(self) -> BTreeMap<CountyKey, AggregatedCountyDay> {
        self.counties
    }
}

/// Re-aggregates visit pattern files by county using a shared resolver.
#[derive(Debug, Clone, Copy)]
pub struct PatternAggregator<'a> {
    resolver: &'a GeoKeyResolver,
}

impl<'a> PatternAggregator<'a> {
    pub fn new(resolver: &'a GeoKeyResolver) -> Self {
        Self { resolver }
    }

    pub fn aggregate(&self, pattern_file: &Path) -> PipelineResult<PatternAggregate> {
        let rows = read_visit_patterns(pattern_file)?;
        let aggregate = self.aggregate_rows(&rows, &pattern_file.display().to_string())?;
        info!(
            file = %pattern_file.display(),
            window = %aggregate.window,
            rows = rows.len(),
            counties = aggregate.counties.len(),
            unassigned_rows = aggregate.unassigned_rows,
            "aggregated visit patterns"
        );
        Ok(aggregate)
    }

    /// Aggregate already-parsed rows. `source` names the file in errors.
    ///
    /// The whole batch is rejected if any row's date range differs from the
    /// first row's, or if any visit vector's length disagrees with the range.
    pub fn aggregate_rows(
        &self,
        rows: &[VisitPatternRow],
        source: &str,
    ) -> PipelineResult<PatternAggregate> {
        let first = rows.first().ok_or_else(|| {
            PipelineError::MissingData(format!("visit pattern file {source} has no rows"))
        })?;
        let (start, end) = (first.range_start, first.range_end);
        if let Some(row) = rows
            .iter()
            .find(|row| row.range_start != start || row.range_end != end)
        {
            return Err(PipelineError::InconsistentWindow(format!(
                "{source}: place {} covers {}..{} but the file covers {start}..{end}",
                row.place_id, row.range_start, row.range_end
            )));
        }
        let window = DateWindow::new(start, end).map_err(|_| {
            PipelineError::InconsistentWindow(format!("{source}: empty date range {start}..{end}"))
        })?;
        let span = window.num_days();

        let mut counties: BTreeMap<CountyKey, AggregatedCountyDay> = BTreeMap::new();
        let mut unassigned_rows = 0;
        for row in rows {
            let county = self.resolver.resolve(&row.place_id).county.clone();
            if county.is_unassigned() {
                unassigned_rows += 1;
            }
            let entry = counties
                .entry(county.clone())
                .or_insert_with(|| AggregatedCountyDay {
                    county: county.clone(),
                    window,
                    raw_visit_counts: 0,
                    visits_by_day: vec![0; row.visits_by_day.len()],
                });
            if entry.visits_by_day.len() != row.visits_by_day.len() {
                return Err(PipelineError::Shape(format!(
                    "{source}: place {} has {} daily counts, other places in county {county} have {}",
                    row.place_id,
                    row.visits_by_day.len(),
                    entry.visits_by_day.len()
                )));
            }
            if row.visits_by_day.len() != span {
                return Err(PipelineError::Shape(format!(
                    "{source}: place {} has {} daily counts for a {span}-day range",
                    row.place_id,
                    row.visits_by_day.len()
                )));
            }
            entry.raw_visit_counts += row.raw_visit_counts;
            for (total, visits) in entry.visits_by_day.iter_mut().zip(&row.visits_by_day) {
                *total += visits;
            }
        }

        Ok(PatternAggregate {
            window,
            counties,
            unassigned_rows,
        })
    }
}
