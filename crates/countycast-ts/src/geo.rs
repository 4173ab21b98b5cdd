//! Place identifier → (county, category) resolution.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use countycast_core::{CountyFips, CountyKey, PipelineError, PipelineResult};
use countycast_io::sources::places::{
    read_place_categories, read_place_counties, PlaceCategoryRow, PlaceCountyRow,
};

/// What a place identifier resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceRecord {
    pub county: CountyKey,
    pub category: Option<String>,
}

static UNKNOWN_PLACE: PlaceRecord = PlaceRecord {
    county: CountyKey::Unassigned,
    category: None,
};

/// Read-only lookup from POI identifier to county and top-level category.
///
/// Built once at startup. Resolution never fails: an unknown place, or a
/// known place without a county code, lands in [`CountyKey::Unassigned`].
#[derive(Debug, Clone, Default)]
pub struct GeoKeyResolver {
    places: HashMap<String, PlaceRecord>,
}

impl GeoKeyResolver {
    /// Load the county mapping table and every category table.
    ///
    /// Fails with `MissingData` when no category table is supplied or a file
    /// is absent, and with `DataIntegrity` when two category tables share a
    /// place identifier.
    pub fn load(county_table: &Path, category_tables: &[PathBuf]) -> PipelineResult<Self> {
        if category_tables.is_empty() {
            return Err(PipelineError::MissingData(
                "at least one place category table is required".into(),
            ));
        }
        let county_rows = read_place_counties(county_table)?;
        let mut categories = Vec::with_capacity(category_tables.len());
        for path in category_tables {
            categories.push((path.display().to_string(), read_place_categories(path)?));
        }
        Self::from_rows(county_rows, categories)
    }

    /// Build from already-parsed rows. Each category table is paired with a
    /// label used in error messages.
    pub fn from_rows(
        county_rows: Vec<PlaceCountyRow>,
        category_tables: Vec<(String, Vec<PlaceCategoryRow>)>,
    ) -> PipelineResult<Self> {
        let mut counties: HashMap<String, CountyFips> = HashMap::new();
        for row in county_rows {
            let Some(code) = row.county_fips.filter(|c| !c.trim().is_empty()) else {
                continue;
            };
            let fips = CountyFips::parse(&code)?;
            match counties.get(&row.place_id) {
                Some(existing) if *existing != fips => {
                    return Err(PipelineError::DataIntegrity(format!(
                        "place {} maps to both county {existing} and {fips}",
                        row.place_id
                    )));
                }
                Some(_) => {}
                None => {
                    counties.insert(row.place_id, fips);
                }
            }
        }

        // Category source of truth must be unambiguous across tables
        let mut categories: HashMap<String, (String, usize)> = HashMap::new();
        for (table_idx, (label, rows)) in category_tables.iter().enumerate() {
            for row in rows {
                let Some(category) = row.top_category.as_deref().filter(|c| !c.is_empty()) else {
                    continue;
                };
                match categories.get(&row.place_id) {
                    Some((_, owner)) if *owner != table_idx => {
                        return Err(PipelineError::DataIntegrity(format!(
                            "place {} appears in category tables {} and {label}",
                            row.place_id, category_tables[*owner].0
                        )));
                    }
                    Some((existing, _)) if existing != category => {
                        return Err(PipelineError::DataIntegrity(format!(
                            "place {} has categories '{existing}' and '{category}' in {label}",
                            row.place_id
                        )));
                    }
                    Some(_) => {}
                    None => {
                        categories.insert(row.place_id.clone(), (category.to_string(), table_idx));
                    }
                }
            }
        }

        let mut places: HashMap<String, PlaceRecord> = HashMap::new();
        for (place_id, fips) in counties {
            places.insert(
                place_id,
                PlaceRecord {
                    county: CountyKey::County(fips),
                    category: None,
                },
            );
        }
        for (place_id, (category, _)) in categories {
            places
                .entry(place_id)
                .or_insert_with(|| PlaceRecord {
                    county: CountyKey::Unassigned,
                    category: None,
                })
                .category = Some(category);
        }

        let unassigned = places.values().filter(|p| p.county.is_unassigned()).count();
        info!(
            places = places.len(),
            unassigned,
            category_tables = category_tables.len(),
            "built place resolver"
        );
        Ok(Self { places })
    }

    /// Resolve a place identifier; unknown identifiers map to the unassigned bucket.
    pub fn resolve(&self, place_id: &str) -> &PlaceRecord {
        match self.places.get(place_id) {
            Some(record) => record,
            None => {
                debug!(place_id, "unknown place resolved to unassigned bucket");
                &UNKNOWN_PLACE
            }
        }
    }

    pub fn len(&self) -> usize {
        self.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }

    /// Every known top-level category, sorted.
    pub fn categories(&self) -> BTreeSet<&str> {
        self.places
            .values()
            .filter_map(|p| p.category.as_deref())
            .collect()
    }

    /// Per-county count of places, broken down by category.
    ///
    /// Places without a category are counted under the empty string so the
    /// per-county totals still equal the number of places.
    pub fn category_counts(&self) -> BTreeMap<CountyFips, BTreeMap<String, u64>> {
        let mut counts: BTreeMap<CountyFips, BTreeMap<String, u64>> = BTreeMap::new();
        for record in self.places.values() {
            if let CountyKey::County(fips) = &record.county {
                *counts
                    .entry(fips.clone())
                    .or_default()
                    .entry(record.category.clone().unwrap_or_default())
                    .or_default() += 1;
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn county_row(place: &str, county: Option<&str>) -> PlaceCountyRow {
        PlaceCountyRow {
            place_id: place.into(),
            county_fips: county.map(str::to_string),
        }
    }

    fn category_row(place: &str, category: &str) -> PlaceCategoryRow {
        PlaceCategoryRow {
            place_id: place.into(),
            top_category: Some(category.into()),
        }
    }

    fn resolver() -> GeoKeyResolver {
        GeoKeyResolver::from_rows(
            vec![
                county_row("sg:a", Some("01001")),
                county_row("sg:b", None),
                county_row("sg:c", Some("06001")),
            ],
            vec![
                ("part1".into(), vec![category_row("sg:a", "Restaurants")]),
                ("part2".into(), vec![category_row("sg:b", "Grocery Stores")]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn known_place_resolves_to_county_and_category() {
        let r = resolver();
        let place = r.resolve("sg:a");
        assert_eq!(place.county.to_string(), "01001");
        assert_eq!(place.category.as_deref(), Some("Restaurants"));
    }

    #[test]
    fn unknown_or_null_county_resolves_to_unassigned() {
        let r = resolver();
        assert!(r.resolve("sg:zzz").county.is_unassigned());
        assert!(r.resolve("sg:zzz").category.is_none());
        let b = r.resolve("sg:b");
        assert!(b.county.is_unassigned());
        assert_eq!(b.category.as_deref(), Some("Grocery Stores"));
    }

    #[test]
    fn shared_place_across_category_tables_is_integrity_error() {
        let err = GeoKeyResolver::from_rows(
            vec![county_row("sg:a", Some("01001"))],
            vec![
                ("part1".into(), vec![category_row("sg:a", "Restaurants")]),
                ("part2".into(), vec![category_row("sg:a", "Restaurants")]),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::DataIntegrity(_)));
        assert!(err.to_string().contains("part1"));
    }

    #[test]
    fn conflicting_county_codes_are_integrity_error() {
        let err = GeoKeyResolver::from_rows(
            vec![county_row("sg:a", Some("01001")), county_row("sg:a", Some("01003"))],
            vec![("part1".into(), vec![])],
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::DataIntegrity(_)));
    }

    #[test]
    fn category_counts_group_by_county() {
        let counts = resolver().category_counts();
        let alameda = &counts[&CountyFips::parse("06001").unwrap()];
        assert_eq!(alameda.get(""), Some(&1));
        let autauga = &counts[&CountyFips::parse("01001").unwrap()];
        assert_eq!(autauga.get("Restaurants"), Some(&1));
        assert!(!counts.keys().any(|k| k.as_str() == "00000"));
    }

    #[test]
    fn load_requires_category_tables_and_files() {
        let dir = TempDir::new().unwrap();
        let county_path = dir.path().join("places.csv");
        fs::write(&county_path, "safegraph_place_id,countyFIPS\nsg:a,01001\n").unwrap();
        let err = GeoKeyResolver::load(&county_path, &[]).unwrap_err();
        assert!(matches!(err, PipelineError::MissingData(_)));

        let err = GeoKeyResolver::load(&county_path, &[dir.path().join("absent.csv")])
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingData(_)));

        let cat_path = dir.path().join("core_poi-part1.csv");
        fs::write(&cat_path, "safegraph_place_id,top_category\nsg:a,Restaurants\n").unwrap();
        let r = GeoKeyResolver::load(&county_path, &[cat_path]).unwrap();
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn building_from_two_files_sharing_an_identifier_fails() {
        let dir = TempDir::new().unwrap();
        let county_path = dir.path().join("places.csv");
        fs::write(&county_path, "safegraph_place_id,countyFIPS\nsg:a,01001\n").unwrap();
        let a = dir.path().join("core_poi-part1.csv");
        let b = dir.path().join("core_poi-part2.csv");
        fs::write(&a, "safegraph_place_id,top_category\nsg:a,Restaurants\n").unwrap();
        fs::write(&b, "safegraph_place_id,top_category\nsg:x,Bakeries\nsg:a,Museums\n").unwrap();
        let err = GeoKeyResolver::load(&county_path, &[a, b]).unwrap_err();
        assert!(matches!(err, PipelineError::DataIntegrity(_)));
    }
}
