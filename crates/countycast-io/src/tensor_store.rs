//! Feature tensor directories with atomic writes.
//!
//! Layout of one cached tensor:
//! - `dynamic.arrow`: one row per (county, day), columns `county`, `date`,
//!   then one column per dynamic feature
//! - `static.arrow`: one row per county, columns `county` then one column per
//!   static feature
//! - `manifest.json`: [`TensorManifest`], written last
//!
//! The directory is staged under a unique `*.tmp-*` name and published with a
//! rename, so a reader never observes a half-written tensor.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use ndarray::{Array2, Array3, Axis};
use polars::io::ipc::{IpcReader, IpcWriter};
use polars::prelude::{DataFrame, NamedFrom, PolarsError, SerReader, SerWriter, Series};
use tracing::debug;

use crate::tensor_manifest::{
    compute_sha256, TableInfo, TensorManifest, DYNAMIC_TABLE, MANIFEST_FILE, STATIC_TABLE,
};
use countycast_core::{FeatureTensor, PipelineError, PipelineResult};

const COUNTY_COLUMN: &str = "county";
const DATE_COLUMN: &str = "date";

/// Marker inside staging directory names; such entries are never served.
pub const STAGING_MARKER: &str = ".tmp-";
/// Marker inside the name a replaced tensor is moved to before removal.
pub const STALE_MARKER: &str = ".stale-";

static SUFFIX_COUNTER: AtomicU64 = AtomicU64::new(0);

/// `<pid>-<nanos>-<counter>`; unique across threads of one process.
fn unique_suffix() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seq = SUFFIX_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{nanos}-{seq}", std::process::id())
}

fn sibling(path: &Path, marker: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tensor".to_string());
    path.with_file_name(format!("{name}{marker}{}", unique_suffix()))
}

fn write_error(context: &str) -> impl Fn(PolarsError) -> PipelineError + '_ {
    move |err| PipelineError::Other(format!("{context}: {err}"))
}

fn corrupt(context: &str) -> impl Fn(PolarsError) -> PipelineError + '_ {
    move |err| PipelineError::CacheCorruption(format!("{context}: {err}"))
}

/// Tensor directory writer with atomic commit
pub struct TensorArtifactWriter {
    temp_dir: PathBuf,
    final_dir: PathBuf,
}

impl TensorArtifactWriter {
    pub fn new(output_path: impl AsRef<Path>) -> PipelineResult<Self> {
        let final_dir = output_path.as_ref().to_path_buf();
        let temp_dir = sibling(&final_dir, STAGING_MARKER);
        if let Some(parent) = temp_dir.parent() {
            fs::create_dir_all(parent)?;
        }
        // Fails rather than adopting a directory another writer owns
        fs::create_dir(&temp_dir)?;

        Ok(Self {
            temp_dir,
            final_dir,
        })
    }

    /// Write `tensor` and publish it at the final path.
    ///
    /// On failure the staging directory is removed and the previously
    /// published tensor (if any) is left untouched.
    pub fn write_tensor(&self, tensor: &FeatureTensor) -> PipelineResult<()> {
        let result = (|| -> PipelineResult<()> {
            let mut manifest = TensorManifest::new(tensor.meta());
            let mut dynamic = dynamic_frame(tensor)?;
            self.write_table(DYNAMIC_TABLE, &mut dynamic, &mut manifest)?;
            let mut statics = static_frame(tensor)?;
            self.write_table(STATIC_TABLE, &mut statics, &mut manifest)?;
            // Manifest last: its presence marks a complete directory
            self.write_manifest(&manifest)?;
            self.commit()
        })();
        if result.is_err() {
            self.cleanup()?;
        }
        result
    }

    fn write_table(
        &self,
        name: &str,
        df: &mut DataFrame,
        manifest: &mut TensorManifest,
    ) -> PipelineResult<()> {
        let path = self.temp_dir.join(format!("{name}.arrow"));
        {
            let mut file = fs::File::create(&path)?;
            IpcWriter::new(&mut file)
                .finish(df)
                .map_err(write_error(name))?;
        }
        let sha256 = compute_sha256(&path)?;
        let file_size_bytes = fs::metadata(&path)?.len();
        manifest.add_table(
            name,
            TableInfo {
                sha256,
                row_count: df.height() as u64,
                file_size_bytes,
            },
        );
        Ok(())
    }

    fn write_manifest(&self, manifest: &TensorManifest) -> PipelineResult<()> {
        let json = serde_json::to_string_pretty(manifest)?;
        fs::write(self.temp_dir.join(MANIFEST_FILE), json)?;
        Ok(())
    }

    fn commit(&self) -> PipelineResult<()> {
        if let Some(parent) = self.final_dir.parent() {
            fs::create_dir_all(parent)?;
        }
        if self.final_dir.exists() {
            // Move the old tensor aside first; rename cannot replace a non-empty directory
            let stale = sibling(&self.final_dir, STALE_MARKER);
            fs::rename(&self.final_dir, &stale)?;
            fs::rename(&self.temp_dir, &self.final_dir)?;
            fs::remove_dir_all(&stale)?;
        } else {
            fs::rename(&self.temp_dir, &self.final_dir)?;
        }
        debug!(path = %self.final_dir.display(), "published tensor directory");
        Ok(())
    }

    pub fn cleanup(&self) -> PipelineResult<()> {
        if self.temp_dir.exists() {
            fs::remove_dir_all(&self.temp_dir)?;
        }
        Ok(())
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn final_dir(&self) -> &Path {
        &self.final_dir
    }
}

fn dynamic_frame(tensor: &FeatureTensor) -> PipelineResult<DataFrame> {
    let meta = tensor.meta();
    let (n_counties, n_days, _) = tensor.dynamic().dim();
    let mut counties = Vec::with_capacity(n_counties * n_days);
    let mut dates = Vec::with_capacity(n_counties * n_days);
    for county in &meta.counties {
        for day in meta.window.days() {
            counties.push(county.to_string());
            dates.push(day.to_string());
        }
    }

    let mut columns = vec![
        Series::new(COUNTY_COLUMN, counties),
        Series::new(DATE_COLUMN, dates),
    ];
    for (f, name) in meta.dynamic_features.iter().enumerate() {
        // Row-major over (county, day) matches the row order above
        let values: Vec<f64> = tensor.dynamic().index_axis(Axis(2), f).iter().copied().collect();
        columns.push(Series::new(name.as_str(), values));
    }
    DataFrame::new(columns).map_err(write_error("building dynamic table"))
}

fn static_frame(tensor: &FeatureTensor) -> PipelineResult<DataFrame> {
    let meta = tensor.meta();
    let counties: Vec<String> = meta.counties.iter().map(|c| c.to_string()).collect();
    let mut columns = vec![Series::new(COUNTY_COLUMN, counties)];
    for (f, name) in meta.static_features.iter().enumerate() {
        let values: Vec<f64> = tensor.statics().column(f).iter().copied().collect();
        columns.push(Series::new(name.as_str(), values));
    }
    DataFrame::new(columns).map_err(write_error("building static table"))
}

/// Validating reader for one tensor directory
#[derive(Debug)]
pub struct TensorArtifactReader {
    base_path: PathBuf,
    manifest: TensorManifest,
}

impl TensorArtifactReader {
    /// Open a tensor directory, checking manifest, layout version and
    /// checksums. Any failure is reported as `CacheCorruption`.
    pub fn open(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let base_path = path.as_ref().to_path_buf();
        if !base_path.is_dir() {
            return Err(PipelineError::CacheCorruption(format!(
                "tensor directory not found: {}",
                base_path.display()
            )));
        }

        let manifest_path = base_path.join(MANIFEST_FILE);
        let file = fs::File::open(&manifest_path).map_err(|err| {
            PipelineError::CacheCorruption(format!(
                "{} unreadable (incomplete write?): {err}",
                manifest_path.display()
            ))
        })?;
        let manifest: TensorManifest = serde_json::from_reader(file).map_err(|err| {
            PipelineError::CacheCorruption(format!("parsing {}: {err}", manifest_path.display()))
        })?;

        manifest.is_compatible()?;
        manifest.verify_all_tables()?;
        manifest.validate_checksums(&base_path)?;

        Ok(Self {
            base_path,
            manifest,
        })
    }

    pub fn manifest(&self) -> &TensorManifest {
        &self.manifest
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Load and shape-check the tensor.
    pub fn load_tensor(&self) -> PipelineResult<FeatureTensor> {
        let meta = self.manifest.meta();
        let n_counties = meta.counties.len();
        let n_days = meta.window.num_days();

        let dynamic_df = self.read_table(DYNAMIC_TABLE)?;
        if dynamic_df.height() != n_counties * n_days {
            return Err(PipelineError::CacheCorruption(format!(
                "dynamic table has {} rows, expected {} counties × {} days",
                dynamic_df.height(),
                n_counties,
                n_days
            )));
        }
        let expected_counties: Vec<String> = meta
            .counties
            .iter()
            .flat_map(|c| std::iter::repeat(c.to_string()).take(n_days))
            .collect();
        let expected_dates: Vec<String> = (0..n_counties)
            .flat_map(|_| meta.window.days().map(|d| d.to_string()))
            .collect();
        if string_column(&dynamic_df, COUNTY_COLUMN)? != expected_counties
            || string_column(&dynamic_df, DATE_COLUMN)? != expected_dates
        {
            return Err(PipelineError::CacheCorruption(
                "dynamic table rows do not follow the manifest's county/day ordering".into(),
            ));
        }
        let mut dynamic = Array3::zeros((n_counties, n_days, meta.dynamic_features.len()));
        for (f, name) in meta.dynamic_features.iter().enumerate() {
            let values = float_column(&dynamic_df, name)?;
            for (row, value) in values.into_iter().enumerate() {
                dynamic[[row / n_days, row % n_days, f]] = value;
            }
        }

        let static_df = self.read_table(STATIC_TABLE)?;
        let county_names: Vec<String> = meta.counties.iter().map(|c| c.to_string()).collect();
        if string_column(&static_df, COUNTY_COLUMN)? != county_names {
            return Err(PipelineError::CacheCorruption(
                "static table rows do not follow the manifest's county ordering".into(),
            ));
        }
        let mut statics = Array2::zeros((n_counties, meta.static_features.len()));
        for (f, name) in meta.static_features.iter().enumerate() {
            let values = float_column(&static_df, name)?;
            for (row, value) in values.into_iter().enumerate() {
                statics[[row, f]] = value;
            }
        }

        FeatureTensor::new(meta, dynamic, statics)
            .map_err(|err| PipelineError::CacheCorruption(err.to_string()))
    }

    fn read_table(&self, name: &str) -> PipelineResult<DataFrame> {
        let path = self.base_path.join(format!("{name}.arrow"));
        let file = fs::File::open(&path)?;
        IpcReader::new(file).finish().map_err(corrupt(name))
    }
}

fn string_column(df: &DataFrame, name: &str) -> PipelineResult<Vec<String>> {
    let series = df.column(name).map_err(corrupt(name))?;
    let values = series.utf8().map_err(corrupt(name))?;
    values
        .into_iter()
        .map(|v| {
            v.map(str::to_string).ok_or_else(|| {
                PipelineError::CacheCorruption(format!("null entry in column '{name}'"))
            })
        })
        .collect()
}

fn float_column(df: &DataFrame, name: &str) -> PipelineResult<Vec<f64>> {
    let series = df.column(name).map_err(corrupt(name))?;
    let values = series.f64().map_err(corrupt(name))?;
    values
        .into_iter()
        .map(|v| {
            v.ok_or_else(|| {
                PipelineError::CacheCorruption(format!("null entry in column '{name}'"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use countycast_core::{CountyFips, DateWindow, TensorMeta};
    use ndarray::array;
    use tempfile::TempDir;

    fn tensor() -> FeatureTensor {
        let meta = TensorMeta {
            window: DateWindow::new(
                NaiveDate::from_ymd_opt(2020, 3, 1).unwrap(),
                NaiveDate::from_ymd_opt(2020, 3, 4).unwrap(),
            )
            .unwrap(),
            counties: vec![
                CountyFips::parse("01001").unwrap(),
                CountyFips::parse("06001").unwrap(),
            ],
            dynamic_features: vec!["visits".into(), "raw_visit_counts".into()],
            static_features: vec!["census:B01001e1".into()],
            schema_token: "token".into(),
            normalization: None,
        };
        let dynamic = Array3::from_shape_fn((2, 3, 2), |(c, d, f)| (c * 100 + d * 10 + f) as f64);
        FeatureTensor::new(meta, dynamic, array![[800.0], [55.5]]).unwrap()
    }

    #[test]
    fn written_tensor_reads_back_identically() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tensors_2020-03-01_2020-03-04_token");
        TensorArtifactWriter::new(&path)
            .unwrap()
            .write_tensor(&tensor())
            .unwrap();

        let reader = TensorArtifactReader::open(&path).unwrap();
        assert_eq!(reader.manifest().schema_token, "token");
        assert_eq!(reader.load_tensor().unwrap(), tensor());
    }

    #[test]
    fn no_staging_directory_survives_a_commit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tensor");
        let writer = TensorArtifactWriter::new(&path).unwrap();
        assert!(writer.temp_dir().exists());
        writer.write_tensor(&tensor()).unwrap();
        assert!(!writer.temp_dir().exists());
        // Overwrite an existing publication
        TensorArtifactWriter::new(&path)
            .unwrap()
            .write_tensor(&tensor())
            .unwrap();
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn concurrent_writers_get_distinct_staging_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tensor");
        let writers: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| TensorArtifactWriter::new(&path).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        let mut staging: Vec<_> = writers.iter().map(|w| w.temp_dir().to_path_buf()).collect();
        staging.sort();
        staging.dedup();
        assert_eq!(staging.len(), 8);
        assert!(staging.iter().all(|p| p.exists()));
        for writer in &writers {
            writer.write_tensor(&tensor()).unwrap();
        }
        assert_eq!(TensorArtifactReader::open(&path).unwrap().load_tensor().unwrap(), tensor());
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn tampered_table_is_cache_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tensor");
        TensorArtifactWriter::new(&path)
            .unwrap()
            .write_tensor(&tensor())
            .unwrap();
        fs::write(path.join("static.arrow"), b"garbage").unwrap();
        let err = TensorArtifactReader::open(&path).unwrap_err();
        assert!(matches!(err, PipelineError::CacheCorruption(_)));
    }

    #[test]
    fn directory_without_manifest_is_cache_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tensor");
        fs::create_dir_all(&path).unwrap();
        let err = TensorArtifactReader::open(&path).unwrap_err();
        assert!(matches!(err, PipelineError::CacheCorruption(_)));
    }
}
