//! # countycast-ts: key resolution and time-series aggregation
//!
//! - [`GeoKeyResolver`] maps POI identifiers to county codes and categories
//! - [`CensusAggregator`] rolls census block groups up to [`CountyCensus`]
//! - [`PatternAggregator`] re-aggregates per-place visit patterns into
//!   per-county daily series ([`AggregatedCountyDay`])
//!
//! The resolver and census table are built once and shared read-only by
//! every window; pattern aggregation runs once per source file.

pub mod census;
pub mod geo;
pub mod patterns;

pub use census::{CensusAggregator, CountyCensus};
pub use geo::{GeoKeyResolver, PlaceRecord};
pub use patterns::{AggregatedCountyDay, PatternAggregate, PatternAggregator};
