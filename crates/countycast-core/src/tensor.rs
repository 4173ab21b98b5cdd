//! Feature tensors and their normalization statistics.
//!
//! A [`FeatureTensor`] covers one `[start, end)` window. Dynamic features are
//! stored as `counties × days × features`; static county attributes are kept
//! once per county as `counties × features` rather than repeated every day.
//! Tensors are never mutated after construction: normalizing one produces a
//! new tensor.

use ndarray::{Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::county::CountyFips;
use crate::error::{PipelineError, PipelineResult};
use crate::window::DateWindow;

/// Standard deviations below this are replaced by 1.0 so constant features
/// pass through centred but unscaled.
pub const MIN_STD: f64 = 1e-12;

/// Per-feature mean and standard deviation.
///
/// Computed once on the train window and applied verbatim everywhere else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStats {
    pub features: Vec<String>,
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl NormalizationStats {
    pub fn new(features: Vec<String>, mean: Vec<f64>, std: Vec<f64>) -> PipelineResult<Self> {
        if features.len() != mean.len() || features.len() != std.len() {
            return Err(PipelineError::Shape(format!(
                "normalization stats for {} features carry {} means and {} stds",
                features.len(),
                mean.len(),
                std.len()
            )));
        }
        if let Some(idx) = std.iter().position(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(PipelineError::Config(format!(
                "standard deviation of '{}' must be positive, got {}",
                features[idx], std[idx]
            )));
        }
        Ok(Self {
            features,
            mean,
            std,
        })
    }

    /// Compute statistics from a raw tensor: dynamic features over every
    /// county-day, static features over every county.
    pub fn compute(tensor: &FeatureTensor) -> Self {
        let mut features = Vec::with_capacity(tensor.meta.feature_count());
        let mut mean = Vec::with_capacity(features.capacity());
        let mut std = Vec::with_capacity(features.capacity());

        for (f, name) in tensor.meta.dynamic_features.iter().enumerate() {
            let column = tensor.dynamic.index_axis(Axis(2), f);
            let (m, s) = mean_std(column.iter().copied());
            features.push(name.clone());
            mean.push(m);
            std.push(s);
        }
        for (f, name) in tensor.meta.static_features.iter().enumerate() {
            let column = tensor.statics.index_axis(Axis(1), f);
            let (m, s) = mean_std(column.iter().copied());
            features.push(name.clone());
            mean.push(m);
            std.push(s);
        }

        Self {
            features,
            mean,
            std,
        }
    }

    /// Mean and standard deviation of a named feature.
    pub fn get(&self, feature: &str) -> Option<(f64, f64)> {
        self.features
            .iter()
            .position(|name| name == feature)
            .map(|idx| (self.mean[idx], self.std[idx]))
    }

    fn ensure_matches(&self, meta: &TensorMeta) -> PipelineResult<()> {
        let expected = meta.feature_names();
        if self.features != expected {
            return Err(PipelineError::DataIntegrity(format!(
                "normalization stats cover features {:?} but the tensor has {:?}",
                self.features, expected
            )));
        }
        Ok(())
    }
}

fn mean_std(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let values: Vec<f64> = values.collect();
    if values.is_empty() {
        return (0.0, 1.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();
    if std.is_finite() && std > MIN_STD {
        (mean, std)
    } else {
        (mean, 1.0)
    }
}

/// Everything about a tensor except its values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorMeta {
    pub window: DateWindow,
    /// County ordering along the first axis.
    pub counties: Vec<CountyFips>,
    pub dynamic_features: Vec<String>,
    pub static_features: Vec<String>,
    /// Hash of the feature schema the tensor was built with.
    pub schema_token: String,
    /// Stats applied to the values, `None` for a raw tensor.
    pub normalization: Option<NormalizationStats>,
}

impl TensorMeta {
    /// Dynamic feature names followed by static feature names.
    pub fn feature_names(&self) -> Vec<String> {
        self.dynamic_features
            .iter()
            .chain(self.static_features.iter())
            .cloned()
            .collect()
    }

    pub fn feature_count(&self) -> usize {
        self.dynamic_features.len() + self.static_features.len()
    }
}

/// Per-county, per-day features for one date window.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTensor {
    meta: TensorMeta,
    dynamic: Array3<f64>,
    statics: Array2<f64>,
}

impl FeatureTensor {
    pub fn new(meta: TensorMeta, dynamic: Array3<f64>, statics: Array2<f64>) -> PipelineResult<Self> {
        let expected_dynamic = (
            meta.counties.len(),
            meta.window.num_days(),
            meta.dynamic_features.len(),
        );
        if dynamic.dim() != expected_dynamic {
            return Err(PipelineError::Shape(format!(
                "dynamic features have shape {:?}, expected {:?}",
                dynamic.dim(),
                expected_dynamic
            )));
        }
        let expected_static = (meta.counties.len(), meta.static_features.len());
        if statics.dim() != expected_static {
            return Err(PipelineError::Shape(format!(
                "static features have shape {:?}, expected {:?}",
                statics.dim(),
                expected_static
            )));
        }
        Ok(Self {
            meta,
            dynamic,
            statics,
        })
    }

    pub fn meta(&self) -> &TensorMeta {
        &self.meta
    }

    pub fn window(&self) -> DateWindow {
        self.meta.window
    }

    pub fn counties(&self) -> &[CountyFips] {
        &self.meta.counties
    }

    /// `counties × days × dynamic features`.
    pub fn dynamic(&self) -> &Array3<f64> {
        &self.dynamic
    }

    /// `counties × static features`.
    pub fn statics(&self) -> &Array2<f64> {
        &self.statics
    }

    pub fn county_index(&self, county: &CountyFips) -> Option<usize> {
        self.meta.counties.iter().position(|c| c == county)
    }

    pub fn is_normalized(&self) -> bool {
        self.meta.normalization.is_some()
    }

    /// Apply `stats` to a raw tensor, producing a new normalized tensor.
    ///
    /// Every value becomes `(x - mean) / std` using exactly the supplied
    /// statistics; nothing is re-derived from this tensor's own data.
    pub fn normalized(&self, stats: &NormalizationStats) -> PipelineResult<Self> {
        if self.is_normalized() {
            return Err(PipelineError::DataIntegrity(format!(
                "tensor for {} is already normalized",
                self.meta.window
            )));
        }
        stats.ensure_matches(&self.meta)?;

        let n_dynamic = self.meta.dynamic_features.len();
        let mut dynamic = self.dynamic.clone();
        for (f, mut column) in dynamic.axis_iter_mut(Axis(2)).enumerate() {
            let (mean, std) = (stats.mean[f], stats.std[f]);
            column.mapv_inplace(|x| (x - mean) / std);
        }
        let mut statics = self.statics.clone();
        for (f, mut column) in statics.axis_iter_mut(Axis(1)).enumerate() {
            let (mean, std) = (stats.mean[n_dynamic + f], stats.std[n_dynamic + f]);
            column.mapv_inplace(|x| (x - mean) / std);
        }

        let mut meta = self.meta.clone();
        meta.normalization = Some(stats.clone());
        Self::new(meta, dynamic, statics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ndarray::{array, Array3};

    fn meta(days: u32) -> TensorMeta {
        let start = NaiveDate::from_ymd_opt(2020, 3, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2020, 3, 1 + days).unwrap();
        TensorMeta {
            window: DateWindow::new(start, end).unwrap(),
            counties: vec![
                CountyFips::parse("01001").unwrap(),
                CountyFips::parse("06001").unwrap(),
            ],
            dynamic_features: vec!["visits".into()],
            static_features: vec!["poi_count".into()],
            schema_token: "test".into(),
            normalization: None,
        }
    }

    fn tensor() -> FeatureTensor {
        let dynamic = Array3::from_shape_vec((2, 2, 1), vec![8.0, 12.0, 10.0, 14.0]).unwrap();
        let statics = array![[3.0], [5.0]];
        FeatureTensor::new(meta(2), dynamic, statics).unwrap()
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let dynamic = Array3::zeros((2, 3, 1));
        let statics = Array2::zeros((2, 1));
        let err = FeatureTensor::new(meta(2), dynamic, statics).unwrap_err();
        assert!(matches!(err, PipelineError::Shape(_)));
    }

    #[test]
    fn computed_stats_use_population_std() {
        let stats = NormalizationStats::compute(&tensor());
        assert_eq!(stats.features, vec!["visits", "poi_count"]);
        let (mean, std) = stats.get("visits").unwrap();
        assert_eq!(mean, 11.0);
        assert!((std - 5.0_f64.sqrt()).abs() < 1e-12);
        assert_eq!(stats.get("poi_count"), Some((4.0, 1.0)));
    }

    #[test]
    fn external_stats_are_applied_verbatim() {
        let stats = NormalizationStats::new(
            vec!["visits".into(), "poi_count".into()],
            vec![10.0, 0.0],
            vec![2.0, 1.0],
        )
        .unwrap();
        let normalized = tensor().normalized(&stats).unwrap();
        assert_eq!(normalized.dynamic()[[0, 0, 0]], -1.0);
        assert_eq!(normalized.dynamic()[[1, 1, 0]], 2.0);
        assert_eq!(normalized.statics()[[1, 0]], 5.0);
        assert_eq!(normalized.meta().normalization.as_ref(), Some(&stats));
    }

    #[test]
    fn normalizing_twice_is_an_error() {
        let t = tensor();
        let stats = NormalizationStats::compute(&t);
        let once = t.normalized(&stats).unwrap();
        assert!(once.normalized(&stats).is_err());
    }

    #[test]
    fn stats_for_other_features_are_rejected() {
        let stats =
            NormalizationStats::new(vec!["visits".into()], vec![0.0], vec![1.0]).unwrap();
        let err = tensor().normalized(&stats).unwrap_err();
        assert!(matches!(err, PipelineError::DataIntegrity(_)));
    }

    #[test]
    fn constant_feature_gets_unit_std() {
        let dynamic = Array3::from_elem((2, 2, 1), 4.0);
        let statics = array![[1.0], [1.0]];
        let t = FeatureTensor::new(meta(2), dynamic, statics).unwrap();
        let stats = NormalizationStats::compute(&t);
        assert_eq!(stats.std, vec![1.0, 1.0]);
    }
}
