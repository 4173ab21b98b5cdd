//! Raw (unnormalized) feature tensor assembly for one window.

use std::collections::HashMap;
use std::path::PathBuf;

use ndarray::{Array2, Array3};
use tracing::{debug, info};

use countycast_core::{
    CountyKey, DateWindow, FeatureTensor, PipelineError, PipelineResult, TensorMeta,
};
use countycast_ts::{PatternAggregate, PatternAggregator};

use crate::tables::StaticTables;

pub struct TensorAssembler<'a> {
    tables: &'a StaticTables,
}

impl<'a> TensorAssembler<'a> {
    pub fn new(tables: &'a StaticTables) -> Self {
        Self { tables }
    }

    /// Build the `[county, day, feature]` and `[county, feature]` arrays for
    /// `window`. Each pattern file overlapping the window is aggregated once.
    pub fn assemble(&self, window: DateWindow) -> PipelineResult<FeatureTensor> {
        let schema = self.tables.schema();
        let meta = TensorMeta {
            window,
            counties: schema.counties().to_vec(),
            dynamic_features: schema.dynamic_features(),
            static_features: schema.static_features(),
            schema_token: schema.token(),
            normalization: None,
        };
        let dynamic = self.dynamic_features(window)?;
        let statics = self.static_features();
        FeatureTensor::new(meta, dynamic, statics)
    }

    fn static_features(&self) -> Array2<f64> {
        let schema = self.tables.schema();
        let census = self.tables.census();
        let roster = self.tables.roster();
        let n_census = schema.census_columns().len();
        let mut statics = Array2::zeros((roster.len(), n_census + 1 + schema.categories().len()));

        for (c, county) in roster.counties().iter().enumerate() {
            if roster.imputed().contains(county) {
                continue;
            }
            for (f, column) in schema.census_columns().iter().enumerate() {
                statics[[c, f]] = census.value(county, column).unwrap_or(0.0);
            }
            if let Some(counts) = self.tables.poi_counts(county) {
                statics[[c, n_census]] = counts.values().sum::<u64>() as f64;
                for (k, category) in schema.categories().iter().enumerate() {
                    statics[[c, n_census + 1 + k]] =
                        counts.get(category).copied().unwrap_or(0) as f64;
                }
            }
        }
        statics
    }

    fn dynamic_features(&self, window: DateWindow) -> PipelineResult<Array3<f64>> {
        let schema = self.tables.schema();
        let counties = schema.counties();
        let n_policy = schema.policy_columns().len();
        let mut dynamic = Array3::zeros((counties.len(), window.num_days(), 2 + n_policy));

        let aggregator = PatternAggregator::new(self.tables.resolver());
        let mut aggregates: HashMap<PathBuf, PatternAggregate> = HashMap::new();

        for (d, day) in window.days().enumerate() {
            let source = self.tables.manifest().pattern_for(day)?;
            if !aggregates.contains_key(&source.path) {
                let aggregate = aggregator.aggregate(&source.path)?;
                let declared = source.window()?;
                if aggregate.window != declared {
                    return Err(PipelineError::InconsistentWindow(format!(
                        "{} declares {declared} but its rows cover {}",
                        source.path.display(),
                        aggregate.window
                    )));
                }
                aggregates.insert(source.path.clone(), aggregate);
            }
            let Some(aggregate) = aggregates.get(&source.path) else {
                continue;
            };

            for (c, county) in counties.iter().enumerate() {
                if let Some(series) = aggregate.get(&CountyKey::County(county.clone())) {
                    dynamic[[c, d, 0]] = series.visits_on(day).unwrap_or(0) as f64;
                    dynamic[[c, d, 1]] = series.raw_visit_counts as f64;
                }
                for (p, value) in self.tables.policy().lookup(county, day).into_iter().enumerate() {
                    dynamic[[c, d, 2 + p]] = value;
                }
            }
        }

        info!(
            window = %window,
            counties = counties.len(),
            pattern_files = aggregates.len(),
            "assembled dynamic features"
        );
        debug!(shape = ?dynamic.dim(), "dynamic tensor");
        Ok(dynamic)
    }
}
