//! # countycast-dataset: feature tensors, labels and batches
//!
//! Turns the shared static tables and per-window visit patterns into
//! normalized county/day samples.
//!
//! ## Flow
//!
//! 1. [`StaticTables::load`] reads every window-independent source once and
//!    fixes the county ordering ([`CountyRoster`]) and feature schema
//!    ([`FeatureSchema`]).
//! 2. [`DatasetBuilder::build`] looks the window up in the
//!    [`FeatureTensorCache`]; on a miss [`TensorAssembler`] builds the raw
//!    tensor and the cache stores it.
//! 3. The raw tensor is normalized with either its own statistics or the
//!    statistics handed in by the caller, and labelled with
//!    [`OrdinalLabeler`].
//! 4. [`BatchLoader`] iterates any [`CountyDataset`] in mini-batches.
//!
//! [`build_splits`] wires the train, validation and test windows together so
//! only the train window ever computes normalization statistics.
//!
//! The cache stores raw tensors; normalization is applied after loading, so
//! one cached window serves every set of statistics.

pub mod assemble;
pub mod cache;
pub mod dataset;
pub mod labels;
pub mod loader;
pub mod policy;
pub mod schema;
pub mod splits;
pub mod tables;

pub use assemble::TensorAssembler;
pub use cache::{CacheKey, CacheLocation, DirectoryTier, FeatureTensorCache, StorageTier};
pub use dataset::{
    CountyDataset, CountyFeatureDataset, CountySample, DatasetBuilder, StatsSource, TensorOrigin,
};
pub use labels::{CaseTable, OrdinalLabeler};
pub use loader::{Batch, BatchLoader, Batches};
pub use policy::PolicyIndex;
pub use schema::{FeatureBreakdown, FeatureGroup, FeatureSchema, SCHEMA_VERSION};
pub use splits::{build_splits, SplitDatasets, SplitMode};
pub use tables::{CountyRoster, StaticTables};
