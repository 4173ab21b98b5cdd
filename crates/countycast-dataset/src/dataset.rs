//! Indexed county/day samples over one window.
//!
//! A dataset owns one normalized [`FeatureTensor`] plus the ordinal labels of
//! every valid `(county, target day)` pair. A pair is valid when its full
//! trailing history lies inside the window. Datasets are read-only once
//! built and can be shared across threads.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use ndarray::{s, Array1, Array2};
use tracing::{info, warn};

use countycast_core::{
    CountyFips, DateWindow, FeatureTensor, NormalizationStats, PipelineError, PipelineResult,
};

use crate::assemble::TensorAssembler;
use crate::cache::{CacheKey, FeatureTensorCache};
use crate::schema::FeatureBreakdown;
use crate::tables::StaticTables;

/// Length plus indexed access; the contract a [`crate::BatchLoader`] needs.
pub trait CountyDataset {
    fn len(&self) -> usize;

    fn get(&self, idx: usize) -> PipelineResult<CountySample>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One training example.
#[derive(Debug, Clone, PartialEq)]
pub struct CountySample {
    pub county: CountyFips,
    pub target_date: NaiveDate,
    /// `[history_days, dynamic features]`, oldest day first, ending on
    /// `target_date`.
    pub history: Array2<f64>,
    pub statics: Array1<f64>,
    pub label: usize,
}

/// Where the raw tensor came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TensorOrigin {
    Cache { tier: String, path: PathBuf },
    Computed { path: PathBuf },
}

/// Where the normalization statistics came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsSource {
    Computed,
    External,
}

/// Builds datasets for arbitrary windows over shared static tables.
#[derive(Debug, Clone)]
pub struct DatasetBuilder {
    tables: Arc<StaticTables>,
    cache: Arc<FeatureTensorCache>,
}

impl DatasetBuilder {
    pub fn new(tables: Arc<StaticTables>, cache: Arc<FeatureTensorCache>) -> Self {
        Self { tables, cache }
    }

    /// Use the cache tiers named in the tables' own configuration.
    pub fn from_tables(tables: Arc<StaticTables>) -> Self {
        let cache = FeatureTensorCache::from_config(&tables.config().cache);
        Self::new(tables, Arc::new(cache))
    }

    pub fn tables(&self) -> &StaticTables {
        &self.tables
    }

    pub fn cache(&self) -> &FeatureTensorCache {
        &self.cache
    }

    /// Build the dataset for `[start, end)`.
    ///
    /// With `external_stats` the tensor is normalized with exactly those
    /// statistics; otherwise they are computed from this window. With
    /// `use_cache` a cached raw tensor is loaded when present. A computed
    /// tensor is always committed to the cache.
    pub fn build(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        external_stats: Option<&NormalizationStats>,
        use_cache: bool,
        load_feature_breakdown: bool,
    ) -> PipelineResult<CountyFeatureDataset> {
        let window = DateWindow::new(start, end)?;
        let schema = self.tables.schema();
        let key = CacheKey::new(window, schema.token());

        let (raw, origin) = self.raw_tensor(&key, use_cache)?;
        if raw.counties() != schema.counties() {
            return Err(PipelineError::CacheCorruption(format!(
                "tensor for {key} has a different county ordering than the loaded tables"
            )));
        }

        let (stats, stats_source) = match external_stats {
            Some(stats) => (stats.clone(), StatsSource::External),
            None => (NormalizationStats::compute(&raw), StatsSource::Computed),
        };
        info!(window = %window, source = ?stats_source, "normalizing features");
        let tensor = raw.normalized(&stats)?;

        let config = self.tables.config();
        let labels = self.labels(&tensor, config.history_days, config.projection_days)?;

        Ok(CountyFeatureDataset {
            tensor,
            raw: load_feature_breakdown.then_some(raw),
            stats,
            stats_source,
            labels,
            history_days: config.history_days,
            projection_days: config.projection_days,
            origin,
            imputed: self.tables.roster().imputed().clone(),
            breakdown: load_feature_breakdown.then(|| schema.breakdown()),
        })
    }

    fn raw_tensor(
        &self,
        key: &CacheKey,
        use_cache: bool,
    ) -> PipelineResult<(FeatureTensor, TensorOrigin)> {
        if use_cache {
            let location = self.cache.locate(key)?;
            if location.hit {
                info!(key = %key, tier = %location.tier, "feature tensor cache hit");
                let tensor = self.cache.load(&location)?;
                return Ok((
                    tensor,
                    TensorOrigin::Cache {
                        tier: location.tier,
                        path: location.path,
                    },
                ));
            }
            info!(key = %key, "feature tensor cache miss");
        }
        let tensor = TensorAssembler::new(&self.tables).assemble(key.window)?;
        let location = self.cache.commit(key, &tensor)?;
        Ok((tensor, TensorOrigin::Computed { path: location.path }))
    }

    /// Labels of every valid pair, `[county, target day - (history_days - 1)]`.
    fn labels(
        &self,
        tensor: &FeatureTensor,
        history_days: usize,
        projection_days: usize,
    ) -> PipelineResult<Array2<usize>> {
        let window = tensor.window();
        let valid = window.num_days().saturating_sub(history_days - 1);
        if valid == 0 {
            warn!(
                window = %window,
                history_days,
                "window is shorter than the history length; dataset is empty"
            );
        }
        let cases = self.tables.cases();
        let labeler = self.tables.labeler();
        let mut labels = Array2::zeros((tensor.counties().len(), valid));
        for (c, county) in tensor.counties().iter().enumerate() {
            for v in 0..valid {
                let target = window.day(history_days - 1 + v);
                let label_day = target + Duration::days(projection_days as i64);
                labels[[c, v]] = labeler.classify(cases.new_cases(county, label_day)?);
            }
        }
        Ok(labels)
    }
}

#[derive(Debug, Clone)]
pub struct CountyFeatureDataset {
    tensor: FeatureTensor,
    raw: Option<FeatureTensor>,
    stats: NormalizationStats,
    stats_source: StatsSource,
    labels: Array2<usize>,
    history_days: usize,
    projection_days: usize,
    origin: TensorOrigin,
    imputed: BTreeSet<CountyFips>,
    breakdown: Option<FeatureBreakdown>,
}

impl CountyFeatureDataset {
    pub fn window(&self) -> DateWindow {
        self.tensor.window()
    }

    pub fn counties(&self) -> &[CountyFips] {
        self.tensor.counties()
    }

    /// Statistics this dataset was normalized with; hand these to the
    /// validation and test windows.
    pub fn norm_stats(&self) -> &NormalizationStats {
        &self.stats
    }

    pub fn stats_source(&self) -> StatsSource {
        self.stats_source
    }

    pub fn origin(&self) -> &TensorOrigin {
        &self.origin
    }

    pub fn imputed_counties(&self) -> &BTreeSet<CountyFips> {
        &self.imputed
    }

    pub fn feature_breakdown(&self) -> Option<&FeatureBreakdown> {
        self.breakdown.as_ref()
    }

    /// The normalized tensor.
    pub fn tensor(&self) -> &FeatureTensor {
        &self.tensor
    }

    /// The unnormalized tensor, kept only when built with the feature
    /// breakdown.
    pub fn raw_tensor(&self) -> Option<&FeatureTensor> {
        self.raw.as_ref()
    }

    pub fn history_days(&self) -> usize {
        self.history_days
    }

    pub fn projection_days(&self) -> usize {
        self.projection_days
    }

    fn valid_days(&self) -> usize {
        self.labels.ncols()
    }

    /// Sample for `county` whose history ends on `target_date`.
    pub fn item_at(&self, county: &CountyFips, target_date: NaiveDate) -> PipelineResult<CountySample> {
        let c = self.tensor.county_index(county).ok_or_else(|| {
            PipelineError::OutOfRange(format!("county {county} is not part of this dataset"))
        })?;
        let window = self.window();
        let d = window.offset_of(target_date).ok_or_else(|| {
            PipelineError::OutOfRange(format!("{target_date} lies outside {window}"))
        })?;
        if d + 1 < self.history_days {
            return Err(PipelineError::OutOfRange(format!(
                "history of {} days ending {target_date} starts before {}",
                self.history_days, window.start
            )));
        }
        Ok(self.sample(c, d))
    }

    fn sample(&self, c: usize, d: usize) -> CountySample {
        let first = d + 1 - self.history_days;
        CountySample {
            county: self.tensor.counties()[c].clone(),
            target_date: self.window().day(d),
            history: self.tensor.dynamic().slice(s![c, first..=d, ..]).to_owned(),
            statics: self.tensor.statics().row(c).to_owned(),
            label: self.labels[[c, first]],
        }
    }
}

impl CountyDataset for CountyFeatureDataset {
    fn len(&self) -> usize {
        self.counties().len() * self.valid_days()
    }

    fn get(&self, idx: usize) -> PipelineResult<CountySample> {
        let len = self.len();
        if idx >= len {
            return Err(PipelineError::OutOfRange(format!(
                "index {idx} out of range for dataset of length {len}"
            )));
        }
        let valid = self.valid_days();
        Ok(self.sample(idx / valid, self.history_days - 1 + idx % valid))
    }
}
