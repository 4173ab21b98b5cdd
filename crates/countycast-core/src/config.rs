//! Explicit configuration values passed into each pipeline component.
//!
//! Nothing here is global: a [`DatasetConfig`] is loaded (or defaulted) once
//! by the caller and handed to the components that need it.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::window::{DatasetSplit, DateWindow, SplitKind};

/// Default class boundaries on daily case growth (roughly the 0.33, 0.67 and
/// 0.9 percentiles of the observed distribution).
pub const DEFAULT_CLASS_BOUNDARIES: [f64; 3] = [2.0, 11.0, 80.0];

/// What to do with a county that has no census row or no resolvable POI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingCountyPolicy {
    /// Abort the build with `MissingCountyData`.
    #[default]
    Fail,
    /// Zero-fill the county's static features and flag it.
    ImputeZero,
    /// Drop the county from the feature ordering and the index space.
    Exclude,
}

/// Storage locations and retention limits for cached feature tensors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Durable tier; every committed tensor lands here.
    pub durable_dir: PathBuf,
    /// Optional fast, ephemeral tier (e.g. a tmpfs mount), checked first.
    pub fast_dir: Option<PathBuf>,
    /// Copy freshly committed (or durable-hit) tensors into the fast tier.
    pub mirror_to_fast: bool,
    /// Maximum number of tensors kept per tier.
    pub max_entries: Option<usize>,
    /// Entries older than this many seconds are treated as misses and removed.
    pub ttl_secs: Option<u64>,
}

impl CacheConfig {
    pub fn durable_only(dir: impl Into<PathBuf>) -> Self {
        Self {
            durable_dir: dir.into(),
            fast_dir: None,
            ..Self::default()
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            durable_dir: PathBuf::from("saved_data/tensors"),
            fast_dir: None,
            mirror_to_fast: true,
            max_entries: None,
            ttl_secs: None,
        }
    }
}

/// Parameters that shape every dataset built in one experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Days of trailing history returned with each sample (target day included).
    pub history_days: usize,
    /// Days between the target day and the day its label is read from.
    pub projection_days: usize,
    /// Strictly increasing cut points; K boundaries define K+1 classes.
    pub class_boundaries: Vec<f64>,
    /// Restrict census features to these columns (all numeric columns when unset).
    pub census_columns: Option<Vec<String>>,
    pub missing_county_policy: MissingCountyPolicy,
    pub cache: CacheConfig,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            history_days: 13,
            projection_days: 7,
            class_boundaries: DEFAULT_CLASS_BOUNDARIES.to_vec(),
            census_columns: None,
            missing_county_policy: MissingCountyPolicy::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl DatasetConfig {
    /// Load a configuration from a JSON file and validate it.
    pub fn from_json_file(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| {
            PipelineError::Config(format!("opening config '{}': {err}", path.display()))
        })?;
        let config: Self = serde_json::from_reader(file).map_err(|err| {
            PipelineError::Config(format!("parsing config '{}': {err}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.history_days == 0 {
            return Err(PipelineError::Config("history_days must be at least 1".into()));
        }
        if self.class_boundaries.iter().any(|b| !b.is_finite()) {
            return Err(PipelineError::Config(
                "class_boundaries must be finite".into(),
            ));
        }
        if self.class_boundaries.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(PipelineError::Config(format!(
                "class_boundaries must be strictly increasing, got {:?}",
                self.class_boundaries
            )));
        }
        if self.cache.max_entries == Some(0) {
            return Err(PipelineError::Config(
                "cache.max_entries must be positive when set".into(),
            ));
        }
        Ok(())
    }

    /// Number of ordinal classes produced by the label boundaries.
    pub fn num_classes(&self) -> usize {
        self.class_boundaries.len() + 1
    }
}

/// Boundaries of the train/val/test windows.
///
/// The windows are `[data_start, train_end)`, `[train_end, val_end)` and
/// `[val_end, data_end)`; they are contiguous and never overlap. The test
/// window may be empty (`val_end == data_end`) for plans that only train.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPlan {
    pub data_start: NaiveDate,
    pub train_end: NaiveDate,
    pub val_end: NaiveDate,
    pub data_end: NaiveDate,
}

impl Default for SplitPlan {
    fn default() -> Self {
        Self {
            data_start: NaiveDate::from_ymd_opt(2020, 1, 21).unwrap_or_default(),
            train_end: NaiveDate::from_ymd_opt(2020, 7, 1).unwrap_or_default(),
            val_end: NaiveDate::from_ymd_opt(2020, 8, 1).unwrap_or_default(),
            data_end: NaiveDate::from_ymd_opt(2020, 9, 11).unwrap_or_default(),
        }
    }
}

impl SplitPlan {
    pub fn validate(&self) -> PipelineResult<()> {
        if !(self.data_start < self.train_end
            && self.train_end < self.val_end
            && self.val_end <= self.data_end)
        {
            return Err(PipelineError::Config(format!(
                "split boundaries must satisfy {} < {} < {} <= {}",
                self.data_start, self.train_end, self.val_end, self.data_end
            )));
        }
        Ok(())
    }

    /// Whether the plan leaves any days for testing.
    pub fn has_test_window(&self) -> bool {
        self.val_end < self.data_end
    }

    pub fn window(&self, kind: SplitKind) -> PipelineResult<DateWindow> {
        if kind == SplitKind::Test && !self.has_test_window() {
            return Err(PipelineError::Config(format!(
                "split plan has no test window: val_end {} equals data_end",
                self.val_end
            )));
        }
        match kind {
            SplitKind::Train => DateWindow::new(self.data_start, self.train_end),
            SplitKind::Val => DateWindow::new(self.train_end, self.val_end),
            SplitKind::Test => DateWindow::new(self.val_end, self.data_end),
        }
    }

    pub fn split(&self, kind: SplitKind) -> PipelineResult<DatasetSplit> {
        Ok(DatasetSplit {
            kind,
            window: self.window(kind)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = DatasetConfig::default();
        config.validate().unwrap();
        assert_eq!(config.num_classes(), 4);
    }

    #[test]
    fn non_monotonic_boundaries_are_rejected() {
        let config = DatasetConfig {
            class_boundaries: vec![2.0, 2.0, 80.0],
            ..DatasetConfig::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn config_loads_from_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.json");
        std::fs::write(
            &path,
            r#"{"history_days": 5, "missing_county_policy": "exclude",
                "cache": {"durable_dir": "/tmp/tensors", "max_entries": 4}}"#,
        )
        .unwrap();
        let config = DatasetConfig::from_json_file(&path).unwrap();
        assert_eq!(config.history_days, 5);
        assert_eq!(config.projection_days, 7);
        assert_eq!(config.missing_county_policy, MissingCountyPolicy::Exclude);
        assert_eq!(config.cache.max_entries, Some(4));
        assert!(config.cache.mirror_to_fast);
    }

    #[test]
    fn split_windows_are_contiguous() {
        let plan = SplitPlan::default();
        plan.validate().unwrap();
        let train = plan.window(SplitKind::Train).unwrap();
        let val = plan.window(SplitKind::Val).unwrap();
        let test = plan.window(SplitKind::Test).unwrap();
        assert_eq!(train.end, val.start);
        assert_eq!(val.end, test.start);
        assert!(!train.overlaps(&val));
    }

    #[test]
    fn overlapping_split_plan_is_rejected() {
        let plan = SplitPlan {
            val_end: NaiveDate::from_ymd_opt(2020, 6, 1).unwrap(),
            ..SplitPlan::default()
        };
        assert!(plan.validate().is_err());
    }

    #[test]
    fn plan_without_test_span_is_valid_for_training() {
        let plan = SplitPlan {
            data_end: NaiveDate::from_ymd_opt(2020, 8, 1).unwrap(),
            ..SplitPlan::default()
        };
        plan.validate().unwrap();
        assert!(!plan.has_test_window());
        assert!(plan.window(SplitKind::Val).is_ok());
        assert!(matches!(
            plan.window(SplitKind::Test),
            Err(PipelineError::Config(_))
        ));
    }
}
