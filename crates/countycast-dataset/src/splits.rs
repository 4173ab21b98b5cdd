//! Train/validation/test dataset construction.

use std::str::FromStr;

use tracing::info;

use countycast_core::{NormalizationStats, PipelineError, PipelineResult, SplitKind, SplitPlan};

use crate::dataset::{CountyFeatureDataset, DatasetBuilder};

/// Which datasets to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMode {
    /// Train, validation and test.
    All,
    /// Train and validation.
    Train,
    /// Train only.
    TrainNoVal,
    /// Test only, normalized with the train window's statistics.
    Test,
}

impl FromStr for SplitMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "train" => Ok(Self::Train),
            "train_no_val" => Ok(Self::TrainNoVal),
            "test" => Ok(Self::Test),
            other => Err(PipelineError::Config(format!("unknown split mode '{other}'"))),
        }
    }
}

#[derive(Debug, Default)]
pub struct SplitDatasets {
    pub train: Option<CountyFeatureDataset>,
    pub val: Option<CountyFeatureDataset>,
    pub test: Option<CountyFeatureDataset>,
}

/// Build the datasets `mode` asks for. The train window always owns the
/// normalization statistics; validation and test reuse them unchanged.
pub fn build_splits(
    builder: &DatasetBuilder,
    plan: &SplitPlan,
    mode: SplitMode,
    use_cache: bool,
    load_feature_breakdown: bool,
) -> PipelineResult<SplitDatasets> {
    plan.validate()?;
    let build = |kind: SplitKind, stats: Option<&NormalizationStats>, breakdown: bool| {
        let window = plan.window(kind)?;
        info!(split = kind.as_str(), window = %window, "building dataset");
        builder.build(window.start, window.end, stats, use_cache, breakdown)
    };

    // Test mode only needs the train statistics
    let train = build(
        SplitKind::Train,
        None,
        load_feature_breakdown && mode != SplitMode::Test,
    )?;
    let stats = train.norm_stats().clone();

    let mut splits = SplitDatasets::default();
    if matches!(mode, SplitMode::All | SplitMode::Train) {
        splits.val = Some(build(SplitKind::Val, Some(&stats), load_feature_breakdown)?);
    }
    if matches!(mode, SplitMode::All | SplitMode::Test) {
        splits.test = Some(build(SplitKind::Test, Some(&stats), load_feature_breakdown)?);
    }
    if mode != SplitMode::Test {
        splits.train = Some(train);
    }
    Ok(splits)
}
