//! # countycast-io: source tables and cached tensor artifacts
//!
//! File-level input/output for the county feature pipeline.
//!
//! ## Module Overview
//!
//! ### Sources ([`sources`])
//! CSV readers for the external inputs: place → county and place → category
//! tables, census block-group batches, visit patterns, the county universe,
//! cumulative case counts and policy-response indices. Readers return typed
//! rows; joining and aggregation live in `countycast-ts`.
//!
//! ### Manifest ([`manifest`])
//! [`SourceManifest`] enumerates every input file explicitly. Nothing in the
//! pipeline scans directories.
//!
//! ### Tensor artifacts ([`tensor_store`], [`tensor_manifest`])
//! A cached feature tensor is a directory of Arrow IPC tables plus a
//! `manifest.json` with checksums, staged under a temporary name and
//! published with an atomic rename.
//!
//! ## Error Handling
//!
//! All public APIs return [`countycast_core::PipelineResult`]. An absent file
//! or column is `MissingData`; a malformed cell is `Parse`; any defect found
//! while reading a cached tensor is `CacheCorruption`.

pub mod manifest;
pub mod sources;
pub mod tensor_manifest;
pub mod tensor_store;

pub use manifest::{PatternSource, SourceManifest};
pub use tensor_manifest::{compute_sha256, TableInfo, TensorManifest, CURRENT_LAYOUT_VERSION};
pub use tensor_store::{TensorArtifactReader, TensorArtifactWriter, STAGING_MARKER, STALE_MARKER};
