//! Manifest schema for cached feature tensor directories.
//!
//! Each cached tensor directory contains a `manifest.json` that:
//! - Tracks the artifact layout version for compatibility checks
//! - Carries the feature schema token the tensor was built with
//! - Records window, county ordering and feature names
//! - Stores SHA256 checksums of every table file

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use countycast_core::{
    CountyFips, DateWindow, NormalizationStats, PipelineError, PipelineResult, TensorMeta,
};

/// Current artifact layout version (semver)
pub const CURRENT_LAYOUT_VERSION: &str = "1.0.0";

pub const MANIFEST_FILE: &str = "manifest.json";
pub const DYNAMIC_TABLE: &str = "dynamic";
pub const STATIC_TABLE: &str = "static";

/// Complete manifest for one cached feature tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorManifest {
    /// Layout version for migration support (e.g., "1.0.0")
    pub layout_version: String,

    pub created_at: DateTime<Utc>,

    /// countycast version that wrote the artifact
    pub countycast_version: String,

    /// Feature schema token; must match the cache key it was stored under
    pub schema_token: String,

    pub window: DateWindow,
    pub counties: Vec<CountyFips>,
    pub dynamic_features: Vec<String>,
    pub static_features: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalization: Option<NormalizationStats>,

    /// Metadata for each table file
    pub tables: BTreeMap<String, TableInfo>,
}

/// Metadata for a single table file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    /// SHA256 checksum of the .arrow file
    pub sha256: String,
    pub row_count: u64,
    pub file_size_bytes: u64,
}

impl TensorManifest {
    pub fn new(meta: &TensorMeta) -> Self {
        Self {
            layout_version: CURRENT_LAYOUT_VERSION.to_string(),
            created_at: Utc::now(),
            countycast_version: env!("CARGO_PKG_VERSION").to_string(),
            schema_token: meta.schema_token.clone(),
            window: meta.window,
            counties: meta.counties.clone(),
            dynamic_features: meta.dynamic_features.clone(),
            static_features: meta.static_features.clone(),
            normalization: meta.normalization.clone(),
            tables: BTreeMap::new(),
        }
    }

    pub fn add_table(&mut self, name: impl Into<String>, info: TableInfo) {
        self.tables.insert(name.into(), info);
    }

    pub fn meta(&self) -> TensorMeta {
        TensorMeta {
            window: self.window,
            counties: self.counties.clone(),
            dynamic_features: self.dynamic_features.clone(),
            static_features: self.static_features.clone(),
            schema_token: self.schema_token.clone(),
            normalization: self.normalization.clone(),
        }
    }

    /// Check if this manifest's layout version is readable by this build
    pub fn is_compatible(&self) -> PipelineResult<()> {
        use semver::Version;

        let manifest_version = Version::parse(&self.layout_version).map_err(|e| {
            PipelineError::CacheCorruption(format!("invalid layout version in manifest: {e}"))
        })?;
        let current_version = Version::parse(CURRENT_LAYOUT_VERSION)
            .map_err(|e| PipelineError::Other(e.to_string()))?;

        // Same major version is readable; anything newer is not
        if manifest_version.major != current_version.major {
            return Err(PipelineError::CacheCorruption(format!(
                "layout v{} is not readable (this build supports v{}.x)",
                self.layout_version, current_version.major
            )));
        }
        Ok(())
    }

    pub fn required_tables() -> &'static [&'static str] {
        &[DYNAMIC_TABLE, STATIC_TABLE]
    }

    pub fn verify_all_tables(&self) -> PipelineResult<()> {
        for required in Self::required_tables() {
            if !self.tables.contains_key(*required) {
                return Err(PipelineError::CacheCorruption(format!(
                    "missing required table: {required}"
                )));
            }
        }
        Ok(())
    }

    /// Validate checksums of all table files
    pub fn validate_checksums(&self, base_path: &Path) -> PipelineResult<()> {
        for (table_name, info) in &self.tables {
            let file_path = base_path.join(format!("{table_name}.arrow"));
            if !file_path.is_file() {
                return Err(PipelineError::CacheCorruption(format!(
                    "table file not found: {}",
                    file_path.display()
                )));
            }
            let actual_hash = compute_sha256(&file_path)?;
            if actual_hash != info.sha256 {
                return Err(PipelineError::CacheCorruption(format!(
                    "checksum mismatch for table '{table_name}': expected {}, got {actual_hash}",
                    info.sha256
                )));
            }
        }
        Ok(())
    }
}

/// Compute SHA256 hash of a file
pub fn compute_sha256(path: &Path) -> PipelineResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0; 8192];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
