//! Window-independent inputs, loaded once and shared by every dataset.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{info, warn};

use countycast_core::{
    CountyFips, DatasetConfig, MissingCountyPolicy, PipelineError, PipelineResult,
};
use countycast_io::sources::counties::{read_counties, CountyInfo};
use countycast_io::sources::policy::read_policy_table;
use countycast_io::SourceManifest;
use countycast_ts::{CensusAggregator, CountyCensus, GeoKeyResolver};

use crate::labels::{CaseTable, OrdinalLabeler};
use crate::policy::PolicyIndex;
use crate::schema::FeatureSchema;

/// Counties that make up the tensor's county axis, after the missing-data
/// policy has been applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountyRoster {
    counties: Vec<CountyFips>,
    positions: HashMap<CountyFips, usize>,
    imputed: BTreeSet<CountyFips>,
    excluded: Vec<CountyFips>,
}

impl CountyRoster {
    /// `universe` must already be sorted by code. A county lacking census
    /// or POI data is handled according to `policy`.
    pub fn resolve(
        universe: &[CountyFips],
        census: &CountyCensus,
        poi_counts: &BTreeMap<CountyFips, BTreeMap<String, u64>>,
        policy: MissingCountyPolicy,
    ) -> PipelineResult<Self> {
        let mut roster = Self::default();
        for county in universe {
            let mut lacking = Vec::new();
            if !census.contains(county) {
                lacking.push("census");
            }
            if !poi_counts.contains_key(county) {
                lacking.push("POI");
            }
            if lacking.is_empty() {
                roster.push(county.clone());
                continue;
            }
            match policy {
                MissingCountyPolicy::Fail => {
                    return Err(PipelineError::MissingCountyData(format!(
                        "county {county} has no {} data",
                        lacking.join(" or ")
                    )));
                }
                MissingCountyPolicy::ImputeZero => {
                    warn!(county = %county, lacking = ?lacking, "imputing zeros for county");
                    roster.imputed.insert(county.clone());
                    roster.push(county.clone());
                }
                MissingCountyPolicy::Exclude => {
                    warn!(county = %county, lacking = ?lacking, "excluding county");
                    roster.excluded.push(county.clone());
                }
            }
        }
        Ok(roster)
    }

    fn push(&mut self, county: CountyFips) {
        self.positions.insert(county.clone(), self.counties.len());
        self.counties.push(county);
    }

    pub fn counties(&self) -> &[CountyFips] {
        &self.counties
    }

    pub fn iloc_to_county(&self, iloc: usize) -> Option<&CountyFips> {
        self.counties.get(iloc)
    }

    pub fn county_to_iloc(&self, county: &CountyFips) -> Option<usize> {
        self.positions.get(county).copied()
    }

    pub fn imputed(&self) -> &BTreeSet<CountyFips> {
        &self.imputed
    }

    pub fn excluded(&self) -> &[CountyFips] {
        &self.excluded
    }

    pub fn len(&self) -> usize {
        self.counties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counties.is_empty()
    }
}

/// Inputs shared read-only by every window: the place resolver, county
/// census, POI counts, the county universe, case counts and policy indices.
#[derive(Debug)]
pub struct StaticTables {
    manifest: SourceManifest,
    resolver: GeoKeyResolver,
    census: CountyCensus,
    poi_counts: BTreeMap<CountyFips, BTreeMap<String, u64>>,
    universe: Vec<CountyInfo>,
    roster: CountyRoster,
    cases: CaseTable,
    policy: PolicyIndex,
    schema: FeatureSchema,
    labeler: OrdinalLabeler,
    config: DatasetConfig,
}

impl StaticTables {
    /// Read every window-independent source listed in `manifest`.
    pub fn load(manifest: SourceManifest, config: &DatasetConfig) -> PipelineResult<Arc<Self>> {
        config.validate()?;
        manifest.validate()?;

        let resolver = GeoKeyResolver::load(&manifest.place_counties, &manifest.place_categories)?;
        let census = CensusAggregator::build(&manifest.census)?;
        let universe = read_counties(&manifest.counties)?;
        let cases = CaseTable::load(&manifest.cases)?;
        let policy = match &manifest.policy {
            Some(path) => PolicyIndex::from_table(read_policy_table(path)?)?,
            None => PolicyIndex::default(),
        };

        Self::from_parts(manifest, resolver, census, universe, cases, policy, config).map(Arc::new)
    }

    /// Assemble from already-loaded parts.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        manifest: SourceManifest,
        resolver: GeoKeyResolver,
        census: CountyCensus,
        mut universe: Vec<CountyInfo>,
        cases: CaseTable,
        policy: PolicyIndex,
        config: &DatasetConfig,
    ) -> PipelineResult<Self> {
        universe.sort_by(|a, b| a.fips.cmp(&b.fips));
        if let Some(pair) = universe.windows(2).find(|pair| pair[0].fips == pair[1].fips) {
            return Err(PipelineError::DataIntegrity(format!(
                "county {} appears more than once in the county universe",
                pair[0].fips
            )));
        }

        let poi_counts = resolver.category_counts();
        let codes: Vec<CountyFips> = universe.iter().map(|c| c.fips.clone()).collect();
        let roster =
            CountyRoster::resolve(&codes, &census, &poi_counts, config.missing_county_policy)?;
        let categories = resolver.categories().into_iter().map(str::to_string).collect();
        let schema = FeatureSchema::new(
            census.columns(),
            config.census_columns.as_deref(),
            categories,
            policy.columns().to_vec(),
            roster.counties().to_vec(),
        )?;
        let labeler = OrdinalLabeler::new(config.class_boundaries.clone())?;

        info!(
            counties = roster.len(),
            imputed = roster.imputed().len(),
            excluded = roster.excluded().len(),
            places = resolver.len(),
            census_columns = schema.census_columns().len(),
            "static tables loaded"
        );

        Ok(Self {
            manifest,
            resolver,
            census,
            poi_counts,
            universe,
            roster,
            cases,
            policy,
            schema,
            labeler,
            config: config.clone(),
        })
    }

    pub fn manifest(&self) -> &SourceManifest {
        &self.manifest
    }

    pub fn resolver(&self) -> &GeoKeyResolver {
        &self.resolver
    }

    pub fn census(&self) -> &CountyCensus {
        &self.census
    }

    /// POI counts per category for `county`; `None` when it has no places.
    pub fn poi_counts(&self, county: &CountyFips) -> Option<&BTreeMap<String, u64>> {
        self.poi_counts.get(county)
    }

    /// Every county listed in the county info table, sorted by code.
    pub fn universe(&self) -> &[CountyInfo] {
        &self.universe
    }

    pub fn roster(&self) -> &CountyRoster {
        &self.roster
    }

    pub fn cases(&self) -> &CaseTable {
        &self.cases
    }

    pub fn policy(&self) -> &PolicyIndex {
        &self.policy
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn labeler(&self) -> &OrdinalLabeler {
        &self.labeler
    }

    /// Configuration the tables were loaded with.
    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }
}
