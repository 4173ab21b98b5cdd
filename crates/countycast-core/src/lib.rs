//! # countycast-core: shared types for the county feature pipeline
//!
//! Types every other countycast crate builds on:
//!
//! - [`CountyFips`] / [`CountyKey`] - validated county codes and the
//!   unassigned aggregation bucket
//! - [`DateWindow`] / [`DatasetSplit`] - half-open date spans and their roles
//! - [`DatasetConfig`] / [`CacheConfig`] / [`SplitPlan`] - explicit
//!   configuration passed into each component
//! - [`FeatureTensor`] / [`NormalizationStats`] - assembled window tensors
//! - [`PipelineError`] - the error taxonomy shared by all stages

pub mod config;
pub mod county;
pub mod error;
pub mod tensor;
pub mod window;

pub use config::{CacheConfig, DatasetConfig, MissingCountyPolicy, SplitPlan};
pub use county::{CountyFips, CountyKey};
pub use error::{PipelineError, PipelineResult};
pub use tensor::{FeatureTensor, NormalizationStats, TensorMeta};
pub use window::{DatasetSplit, DateWindow, SplitKind};
