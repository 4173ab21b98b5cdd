//! Explicit manifest of the source files feeding one experiment.
//!
//! Nothing in the pipeline scans directories: the caller enumerates every
//! input file here, and each pattern file declares the date range it covers
//! so a day can be mapped to its file without opening anything.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use countycast_core::{DateWindow, PipelineError, PipelineResult};

/// A visit pattern file and the `[start, end)` range it declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSource {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub path: PathBuf,
}

impl PatternSource {
    pub fn window(&self) -> PipelineResult<DateWindow> {
        DateWindow::new(self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceManifest {
    /// Place → county mapping table.
    pub place_counties: PathBuf,
    /// Place → category tables; their key sets must be disjoint.
    pub place_categories: Vec<PathBuf>,
    /// Census block-group batch files.
    pub census: Vec<PathBuf>,
    pub patterns: Vec<PatternSource>,
    /// County universe (`FIPS,Name,State`).
    pub counties: PathBuf,
    /// Cumulative case counts used for labels.
    pub cases: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PathBuf>,
}

impl SourceManifest {
    /// Load a manifest; relative paths are resolved against its directory.
    pub fn load(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("opening source manifest '{}'", path.display()))?;
        let manifest: Self = serde_json::from_reader(file)
            .with_context(|| format!("parsing source manifest '{}'", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let manifest = manifest.resolved_against(base);
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> PipelineResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("creating manifest directory '{}'", parent.display())
            })?;
        }
        let json = serde_json::to_string_pretty(self).context("serializing source manifest")?;
        fs::write(path, json)
            .with_context(|| format!("writing source manifest '{}'", path.display()))?;
        Ok(())
    }

    /// Prefix every relative path with `base`.
    pub fn resolved_against(mut self, base: &Path) -> Self {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.place_counties);
        self.place_categories.iter_mut().for_each(resolve);
        self.census.iter_mut().for_each(resolve);
        self.patterns.iter_mut().for_each(|p| resolve(&mut p.path));
        resolve(&mut self.counties);
        resolve(&mut self.cases);
        if let Some(policy) = self.policy.as_mut() {
            resolve(policy);
        }
        self
    }

    /// Check declared pattern ranges are non-empty and never overlap.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.place_categories.is_empty() {
            return Err(PipelineError::MissingData(
                "manifest lists no place category tables".into(),
            ));
        }
        let mut windows = self
            .patterns
            .iter()
            .map(|source| {
                source
                    .window()
                    .map(|window| (window, source.path.as_path()))
                    .map_err(|_| {
                        PipelineError::Config(format!(
                            "pattern source {} declares empty range {}..{}",
                            source.path.display(),
                            source.start,
                            source.end
                        ))
                    })
            })
            .collect::<PipelineResult<Vec<_>>>()?;
        windows.sort_by_key(|(window, _)| *window);
        for pair in windows.windows(2) {
            let ((a, a_path), (b, b_path)) = (pair[0], pair[1]);
            if a.overlaps(&b) {
                return Err(PipelineError::DataIntegrity(format!(
                    "pattern sources {} ({a}) and {} ({b}) overlap",
                    a_path.display(),
                    b_path.display()
                )));
            }
        }
        Ok(())
    }

    /// The pattern source whose declared range covers `date`.
    pub fn pattern_for(&self, date: NaiveDate) -> PipelineResult<&PatternSource> {
        self.patterns
            .iter()
            .find(|source| source.start <= date && date < source.end)
            .ok_or_else(|| {
                PipelineError::MissingData(format!("no visit pattern file covers {date}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn manifest() -> SourceManifest {
        SourceManifest {
            place_counties: "places.csv".into(),
            place_categories: vec!["core_poi-part1.csv".into()],
            census: vec!["cbg_b01.csv".into()],
            patterns: vec![
                PatternSource {
                    start: date("2020-03-02"),
                    end: date("2020-03-09"),
                    path: "patterns/2020-03-02.csv".into(),
                },
                PatternSource {
                    start: date("2020-03-09"),
                    end: date("2020-03-16"),
                    path: "patterns/2020-03-09.csv".into(),
                },
            ],
            counties: "counties.csv".into(),
            cases: "cases.csv".into(),
            policy: None,
        }
    }

    #[test]
    fn load_resolves_relative_paths() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sources.json");
        manifest().write(&path).unwrap();
        let loaded = SourceManifest::load(&path).unwrap();
        assert_eq!(loaded.counties, dir.path().join("counties.csv"));
        assert_eq!(
            loaded.patterns[1].path,
            dir.path().join("patterns/2020-03-09.csv")
        );
    }

    #[test]
    fn pattern_lookup_uses_declared_ranges() {
        let m = manifest();
        assert_eq!(
            m.pattern_for(date("2020-03-09")).unwrap().path,
            PathBuf::from("patterns/2020-03-09.csv")
        );
        assert!(matches!(
            m.pattern_for(date("2020-03-16")),
            Err(PipelineError::MissingData(_))
        ));
    }

    #[test]
    fn overlapping_pattern_ranges_are_rejected() {
        let mut m = manifest();
        m.patterns[1].start = date("2020-03-08");
        assert!(matches!(m.validate(), Err(PipelineError::DataIntegrity(_))));
    }
}
