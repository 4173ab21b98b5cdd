//! Two-tier location policy for cached feature tensors.
//!
//! A tensor is keyed by its window and schema token. Lookup checks the fast
//! tier (typically a RAM-backed directory such as `/dev/shm`) before the
//! durable tier. Commits always land in the durable tier and are mirrored to
//! the fast tier when enabled. The cache only locates, loads and stores; it
//! never decides to recompute.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use countycast_core::{
    CacheConfig, DateWindow, FeatureTensor, PipelineError, PipelineResult,
};
use countycast_io::{TensorArtifactReader, TensorArtifactWriter, STAGING_MARKER, STALE_MARKER};

const ENTRY_PREFIX: &str = "tensors_";

/// Staging and stale directories younger than this may belong to a live
/// writer and are left alone.
pub const DEFAULT_STAGING_GRACE: Duration = Duration::from_secs(60 * 60);

/// Remove a tensor directory. A directory that is already gone counts as
/// removed by someone else and returns `Ok(false)`.
fn remove_entry(path: &Path) -> PipelineResult<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

fn age_of(modified: SystemTime) -> Duration {
    SystemTime::now()
        .duration_since(modified)
        .unwrap_or_default()
}

/// Directory listing of one tier, oldest first.
#[derive(Debug, Default)]
struct TierListing {
    published: Vec<(SystemTime, PathBuf)>,
    /// Staging or stale directories left behind by writers.
    leftovers: Vec<(SystemTime, PathBuf)>,
}

/// Identity of one cached tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub window: DateWindow,
    pub schema_token: String,
}

impl CacheKey {
    pub fn new(window: DateWindow, schema_token: impl Into<String>) -> Self {
        Self {
            window,
            schema_token: schema_token.into(),
        }
    }

    /// Directory name, e.g. `tensors_2020-03-01_2020-03-15_1a2b3c4d5e6f7a8b`.
    pub fn dir_name(&self) -> String {
        format!(
            "{ENTRY_PREFIX}{}_{}_{}",
            self.window.start, self.window.end, self.schema_token
        )
    }

    fn matches(&self, tensor: &FeatureTensor) -> bool {
        tensor.window() == self.window && tensor.meta().schema_token == self.schema_token
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dir_name())
    }
}

/// One storage location for tensor directories.
pub trait StorageTier: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn path_for(&self, key: &CacheKey) -> PathBuf;

    /// Whether a servable entry exists. Expired entries are removed and
    /// reported as absent.
    fn contains(&self, key: &CacheKey) -> PipelineResult<bool>;

    /// Write `tensor` under `key` and return its final path.
    fn store(&self, key: &CacheKey, tensor: &FeatureTensor) -> PipelineResult<PathBuf>;

    /// Remove expired entries and enforce the entry limit.
    fn evict(&self) -> PipelineResult<usize>;
}

/// A tier backed by one directory on disk.
#[derive(Debug, Clone)]
pub struct DirectoryTier {
    name: String,
    root: PathBuf,
    max_entries: Option<usize>,
    ttl: Option<Duration>,
    staging_grace: Duration,
}

impl DirectoryTier {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            max_entries: None,
            ttl: None,
            staging_grace: DEFAULT_STAGING_GRACE,
        }
    }

    pub fn with_limits(mut self, max_entries: Option<usize>, ttl: Option<Duration>) -> Self {
        self.max_entries = max_entries;
        self.ttl = ttl;
        self
    }

    pub fn with_staging_grace(mut self, grace: Duration) -> Self {
        self.staging_grace = grace;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_expired(&self, modified: SystemTime) -> bool {
        self.ttl.is_some_and(|ttl| age_of(modified) > ttl)
    }

    /// Entries that vanish while being listed were removed by a concurrent
    /// writer or evictor and are skipped.
    fn listing(&self) -> PipelineResult<TierListing> {
        let mut listing = TierListing::default();
        let dir = match fs::read_dir(&self.root) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(listing),
            Err(err) => return Err(err.into()),
        };
        for entry in dir {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(ENTRY_PREFIX) {
                continue;
            }
            let metadata = match entry.metadata().and_then(|m| Ok((m.is_dir(), m.modified()?))) {
                Ok(found) => found,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            let (is_dir, modified) = metadata;
            if !is_dir {
                continue;
            }
            if name.contains(STAGING_MARKER) || name.contains(STALE_MARKER) {
                listing.leftovers.push((modified, entry.path()));
            } else {
                listing.published.push((modified, entry.path()));
            }
        }
        listing.published.sort();
        listing.leftovers.sort();
        Ok(listing)
    }

    /// Remove leftovers older than the grace period. Returns how many went.
    fn sweep_leftovers(&self, leftovers: Vec<(SystemTime, PathBuf)>) -> PipelineResult<usize> {
        let mut swept = 0;
        for (modified, path) in leftovers {
            if age_of(modified) > self.staging_grace && remove_entry(&path)? {
                debug!(
                    tier = %self.name,
                    path = %path.display(),
                    "removed abandoned staging directory"
                );
                swept += 1;
            }
        }
        Ok(swept)
    }
}

impl StorageTier for DirectoryTier {
    fn name(&self) -> &str {
        &self.name
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.dir_name())
    }

    fn contains(&self, key: &CacheKey) -> PipelineResult<bool> {
        let path = self.path_for(key);
        let modified = match fs::metadata(&path) {
            Ok(metadata) if metadata.is_dir() => metadata.modified()?,
            Ok(_) => return Ok(false),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        if self.is_expired(modified) {
            info!(tier = %self.name, path = %path.display(), "removing expired tensor");
            remove_entry(&path)?;
            return Ok(false);
        }
        Ok(true)
    }

    fn store(&self, key: &CacheKey, tensor: &FeatureTensor) -> PipelineResult<PathBuf> {
        let path = self.path_for(key);
        TensorArtifactWriter::new(&path)?.write_tensor(tensor)?;
        debug!(tier = %self.name, path = %path.display(), "stored tensor");
        // The tensor is already published; a failed sweep must not undo that
        if let Err(err) = self.evict() {
            warn!(tier = %self.name, error = %err, "eviction after store failed");
        }
        Ok(path)
    }

    fn evict(&self) -> PipelineResult<usize> {
        let TierListing {
            published,
            leftovers,
        } = self.listing()?;
        let swept = self.sweep_leftovers(leftovers)?;

        let mut removed = 0;
        let mut live = Vec::new();
        for (modified, path) in published {
            if self.is_expired(modified) {
                removed += usize::from(remove_entry(&path)?);
            } else {
                live.push((modified, path));
            }
        }
        if let Some(max) = self.max_entries {
            let excess = live.len().saturating_sub(max);
            for (_, path) in live.drain(..excess) {
                removed += usize::from(remove_entry(&path)?);
            }
        }
        if removed > 0 || swept > 0 {
            info!(tier = %self.name, removed, swept, "evicted cached tensors");
        }
        Ok(removed)
    }
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLocation {
    pub key: CacheKey,
    pub hit: bool,
    /// Where the tensor is (on a hit) or would be written (on a miss).
    pub path: PathBuf,
    pub tier: String,
}

#[derive(Debug)]
pub struct FeatureTensorCache {
    fast: Option<Box<dyn StorageTier>>,
    durable: Box<dyn StorageTier>,
    mirror_to_fast: bool,
}

impl FeatureTensorCache {
    pub fn new(
        fast: Option<Box<dyn StorageTier>>,
        durable: Box<dyn StorageTier>,
        mirror_to_fast: bool,
    ) -> Self {
        Self {
            fast,
            durable,
            mirror_to_fast,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        let tier = |name: &str, root: &Path| -> Box<dyn StorageTier> {
            Box::new(DirectoryTier::new(name, root).with_limits(config.max_entries, config.ttl()))
        };
        Self::new(
            config.fast_dir.as_deref().map(|dir| tier("fast", dir)),
            tier("durable", &config.durable_dir),
            config.mirror_to_fast,
        )
    }

    /// Find `key`, preferring the fast tier. On a miss the returned path is
    /// the durable location a commit would write to.
    pub fn locate(&self, key: &CacheKey) -> PipelineResult<CacheLocation> {
        for tier in self.fast.iter().chain(std::iter::once(&self.durable)) {
            if tier.contains(key)? {
                return Ok(CacheLocation {
                    key: key.clone(),
                    hit: true,
                    path: tier.path_for(key),
                    tier: tier.name().to_string(),
                });
            }
        }
        Ok(CacheLocation {
            key: key.clone(),
            hit: false,
            path: self.durable.path_for(key),
            tier: self.durable.name().to_string(),
        })
    }

    /// Load the tensor at a hit location. A durable hit is mirrored into
    /// the fast tier when mirroring is enabled.
    pub fn load(&self, location: &CacheLocation) -> PipelineResult<FeatureTensor> {
        if !location.hit {
            return Err(PipelineError::MissingData(format!(
                "no cached tensor for {}",
                location.key
            )));
        }
        let tensor = TensorArtifactReader::open(&location.path)?.load_tensor()?;
        if !location.key.matches(&tensor) || tensor.is_normalized() {
            return Err(PipelineError::CacheCorruption(format!(
                "{} does not hold the raw tensor for {}",
                location.path.display(),
                location.key
            )));
        }
        if location.tier == self.durable.name() {
            self.mirror(&location.key, &tensor);
        }
        Ok(tensor)
    }

    /// Write `tensor` to the durable tier, then mirror it.
    pub fn commit(&self, key: &CacheKey, tensor: &FeatureTensor) -> PipelineResult<CacheLocation> {
        if !key.matches(tensor) {
            return Err(PipelineError::DataIntegrity(format!(
                "tensor for {} cannot be committed under {key}",
                tensor.window()
            )));
        }
        let path = self.durable.store(key, tensor)?;
        self.mirror(key, tensor);
        Ok(CacheLocation {
            key: key.clone(),
            hit: true,
            path,
            tier: self.durable.name().to_string(),
        })
    }

    /// Mirror failures only cost speed, so they are logged and dropped.
    fn mirror(&self, key: &CacheKey, tensor: &FeatureTensor) {
        if !self.mirror_to_fast {
            return;
        }
        if let Some(fast) = &self.fast {
            if let Err(err) = fast.store(key, tensor) {
                warn!(tier = fast.name(), key = %key, error = %err, "mirroring tensor failed");
            }
        }
    }

    /// Run eviction on every tier.
    pub fn evict(&self) -> PipelineResult<usize> {
        let mut removed = self.durable.evict()?;
        if let Some(fast) = &self.fast {
            removed += fast.evict()?;
        }
        Ok(removed)
    }
}
