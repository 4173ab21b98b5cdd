//! Fixed, deterministic feature ordering and the cache token derived from it.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use countycast_core::{CountyFips, PipelineError, PipelineResult};

/// Bump whenever the meaning of an existing feature changes; every cached
/// tensor built under the old definition then misses.
pub const SCHEMA_VERSION: &str = "countycast-features/1";

pub const VISITS_FEATURE: &str = "visits";
pub const RAW_VISITS_FEATURE: &str = "raw_visit_counts";
pub const POI_COUNT_FEATURE: &str = "poi_count";

const TOKEN_LEN: usize = 16;

/// Named slice of the feature space, used for feature analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureGroup {
    pub name: String,
    /// Indices into the dynamic feature axis.
    pub dynamic: Range<usize>,
    /// Indices into the static feature axis.
    pub statics: Range<usize>,
}

/// Feature groups of one schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureBreakdown {
    pub groups: Vec<FeatureGroup>,
}

impl FeatureBreakdown {
    pub fn group(&self, name: &str) -> Option<&FeatureGroup> {
        self.groups.iter().find(|g| g.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSchema {
    census_columns: Vec<String>,
    categories: Vec<String>,
    policy_columns: Vec<String>,
    counties: Vec<CountyFips>,
}

impl FeatureSchema {
    /// `census_columns` are filtered by `whitelist` when one is given; a
    /// whitelisted column absent from the census data is `MissingData`.
    pub fn new(
        census_columns: &[String],
        whitelist: Option<&[String]>,
        categories: Vec<String>,
        policy_columns: Vec<String>,
        counties: Vec<CountyFips>,
    ) -> PipelineResult<Self> {
        let mut census: Vec<String> = match whitelist {
            Some(wanted) => {
                if let Some(missing) = wanted.iter().find(|c| !census_columns.contains(c)) {
                    return Err(PipelineError::MissingData(format!(
                        "census column '{missing}' is not present in any census file"
                    )));
                }
                wanted.to_vec()
            }
            None => census_columns.to_vec(),
        };
        census.sort();
        census.dedup();
        let mut categories = categories;
        categories.retain(|c| !c.is_empty());
        categories.sort();
        categories.dedup();

        Ok(Self {
            census_columns: census,
            categories,
            policy_columns,
            counties,
        })
    }

    pub fn census_columns(&self) -> &[String] {
        &self.census_columns
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn policy_columns(&self) -> &[String] {
        &self.policy_columns
    }

    /// County ordering along the tensor's first axis.
    pub fn counties(&self) -> &[CountyFips] {
        &self.counties
    }

    /// `visits`, `raw_visit_counts`, then `policy:*` in source order.
    pub fn dynamic_features(&self) -> Vec<String> {
        [VISITS_FEATURE.to_string(), RAW_VISITS_FEATURE.to_string()]
            .into_iter()
            .chain(self.policy_columns.iter().map(|c| format!("policy:{c}")))
            .collect()
    }

    /// `census:*` sorted, `poi_count`, then `poi_category:*` sorted.
    pub fn static_features(&self) -> Vec<String> {
        self.census_columns
            .iter()
            .map(|c| format!("census:{c}"))
            .chain(std::iter::once(POI_COUNT_FEATURE.to_string()))
            .chain(self.categories.iter().map(|c| format!("poi_category:{c}")))
            .collect()
    }

    pub fn breakdown(&self) -> FeatureBreakdown {
        let n_policy = self.policy_columns.len();
        let n_census = self.census_columns.len();
        let n_static = n_census + 1 + self.categories.len();
        FeatureBreakdown {
            groups: vec![
                FeatureGroup {
                    name: "visits".into(),
                    dynamic: 0..2,
                    statics: 0..0,
                },
                FeatureGroup {
                    name: "policy".into(),
                    dynamic: 2..2 + n_policy,
                    statics: 0..0,
                },
                FeatureGroup {
                    name: "census".into(),
                    dynamic: 0..0,
                    statics: 0..n_census,
                },
                FeatureGroup {
                    name: "poi".into(),
                    dynamic: 0..0,
                    statics: n_census..n_static,
                },
            ],
        }
    }

    /// Hash over the schema version, every feature name in order and the
    /// county ordering. Any change yields a different token.
    pub fn token(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(SCHEMA_VERSION.as_bytes());
        for (tag, names) in [("d", self.dynamic_features()), ("s", self.static_features())] {
            for name in names {
                hasher.update(format!("\n{tag}:{name}").as_bytes());
            }
        }
        for county in &self.counties {
            hasher.update(format!("\nc:{county}").as_bytes());
        }
        let digest = format!("{:x}", hasher.finalize());
        digest[..TOKEN_LEN].to_string()
    }
}
