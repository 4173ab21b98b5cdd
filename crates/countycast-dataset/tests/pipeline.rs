//! End-to-end pipeline tests over small CSV fixtures.
//!
//! Fixture layout: Alameda (06001) has places p1 and p2, Fresno (06019) has
//! p3, and p4 has no county. Week one runs 2020-03-02..2020-03-09 and week
//! two 2020-03-09..2020-03-16. Alameda reports `d` new cases on March `d`,
//! Fresno none.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use tempfile::TempDir;

use countycast_core::{
    CacheConfig, CountyFips, DatasetConfig, MissingCountyPolicy, PipelineError, SplitPlan,
};
use countycast_dataset::{
    build_splits, BatchLoader, CountyDataset, DatasetBuilder, SplitMode, StaticTables,
    StatsSource, TensorOrigin,
};
use countycast_io::{PatternSource, SourceManifest};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 3, day).unwrap()
}

fn fips(s: &str) -> CountyFips {
    CountyFips::parse(s).unwrap()
}

fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn pattern_csv<const N: usize>(start: &str, end: &str, rows: &[(&str, u64, [u64; N])]) -> String {
    let mut csv =
        String::from("safegraph_place_id,date_range_start,date_range_end,raw_visit_counts,visits_by_day\n");
    for (place, raw, visits) in rows {
        let visits: Vec<String> = visits.iter().map(|v| v.to_string()).collect();
        csv.push_str(&format!(
            "{place},{start}T00:00:00-05:00,{end}T00:00:00-05:00,{raw},\"[{}]\"\n",
            visits.join(",")
        ));
    }
    csv
}

struct Fixture {
    dir: TempDir,
    manifest: SourceManifest,
}

impl Fixture {
    fn new() -> Self {
        Self::with_counties(&[("06001", "Alameda"), ("06019", "Fresno")])
    }

    fn with_counties(counties: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("sources");

        write(
            &src.join("places.csv"),
            "safegraph_place_id,countyFIPS\np1,06001\np2,06001\np3,06019\np4,\n",
        );
        write(
            &src.join("categories_1.csv"),
            "safegraph_place_id,top_category\np1,Restaurants\np2,Bakeries\n",
        );
        write(
            &src.join("categories_2.csv"),
            "safegraph_place_id,top_category\np3,Restaurants\np4,Gyms\n",
        );
        write(
            &src.join("cbg_b01.csv"),
            "census_block_group,pop\n060010001001,100\n060010002001,50\n060190001001,70\n",
        );
        write(
            &src.join("cbg_b02.csv"),
            "census_block_group,households\n060010001001,40\n060190001001,30\n",
        );
        write(
            &src.join("patterns/week1.csv"),
            &pattern_csv(
                "2020-03-02",
                "2020-03-09",
                &[
                    ("p1", 28, [1, 2, 3, 4, 5, 6, 7]),
                    ("p2", 7, [1; 7]),
                    ("p3", 14, [2; 7]),
                    ("p4", 35, [5; 7]),
                ],
            ),
        );
        write(
            &src.join("patterns/week2.csv"),
            &pattern_csv(
                "2020-03-09",
                "2020-03-16",
                &[
                    ("p1", 70, [10; 7]),
                    ("p2", 0, [0; 7]),
                    ("p3", 28, [4; 7]),
                    ("p4", 7, [1; 7]),
                ],
            ),
        );

        let mut county_csv = String::from("FIPS,Name,State\n");
        let mut cases_csv = String::from("FIPS,date,cases\n");
        for (code, name) in counties {
            county_csv.push_str(&format!("{code},{name},CA\n"));
            for day in 1..=20u32 {
                let cumulative = match *code {
                    "06001" => day * (day + 1) / 2,
                    "06019" => 10,
                    _ => 0,
                };
                cases_csv.push_str(&format!("{code},{},{cumulative}\n", date(day)));
            }
        }
        write(&src.join("counties.csv"), &county_csv);
        write(&src.join("cases.csv"), &cases_csv);

        let mut policy_csv = String::from("region,date,C1\n");
        for day in 1..=20u32 {
            policy_csv.push_str(&format!("06,{},1\n", date(day)));
        }
        policy_csv.push_str("06001,2020-03-03,3\n");
        write(&src.join("policy.csv"), &policy_csv);

        let manifest = SourceManifest {
            place_counties: src.join("places.csv"),
            place_categories: vec![src.join("categories_1.csv"), src.join("categories_2.csv")],
            census: vec![src.join("cbg_b01.csv"), src.join("cbg_b02.csv")],
            patterns: vec![
                PatternSource {
                    start: date(2),
                    end: date(9),
                    path: src.join("patterns/week1.csv"),
                },
                PatternSource {
                    start: date(9),
                    end: date(16),
                    path: src.join("patterns/week2.csv"),
                },
            ],
            counties: src.join("counties.csv"),
            cases: src.join("cases.csv"),
            policy: Some(src.join("policy.csv")),
        };
        Self { dir, manifest }
    }

    fn cache_dir(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    fn config(&self) -> DatasetConfig {
        DatasetConfig {
            history_days: 3,
            projection_days: 2,
            cache: CacheConfig::durable_only(self.cache_dir()),
            ..Default::default()
        }
    }

    fn builder(&self, config: &DatasetConfig) -> DatasetBuilder {
        DatasetBuilder::from_tables(StaticTables::load(self.manifest.clone(), config).unwrap())
    }
}

fn plan() -> SplitPlan {
    SplitPlan {
        data_start: date(2),
        train_end: date(9),
        val_end: date(13),
        data_end: date(16),
    }
}

#[test]
fn train_window_has_expected_samples_and_labels() {
    init_tracing();
    let fx = Fixture::new();
    let builder = fx.builder(&fx.config());
    let train = builder.build(date(2), date(9), None, true, true).unwrap();

    // 2 counties × (7 days − 2 days of warm-up)
    assert_eq!(train.len(), 10);
    assert_eq!(train.counties(), [fips("06001"), fips("06019")]);
    assert!(matches!(train.origin(), TensorOrigin::Computed { .. }));
    assert_eq!(train.stats_source(), StatsSource::Computed);

    let first = train.get(0).unwrap();
    assert_eq!(first.county, fips("06001"));
    assert_eq!(first.target_date, date(4));
    assert_eq!(first.history.dim(), (3, 3));
    // 6 new cases on March 6 falls in [2, 11)
    assert_eq!(first.label, 1);

    let fresno = train.get(5).unwrap();
    assert_eq!(fresno.county, fips("06019"));
    assert_eq!(fresno.label, 0);
    assert_eq!(train.item_at(&fips("06001"), date(8)).unwrap(), train.get(4).unwrap());

    let raw = train.raw_tensor().unwrap();
    assert_eq!(
        raw.meta().dynamic_features,
        vec!["visits", "raw_visit_counts", "policy:C1"]
    );
    assert_eq!(
        raw.meta().static_features,
        vec![
            "census:households",
            "census:pop",
            "poi_count",
            "poi_category:Bakeries",
            "poi_category:Gyms",
            "poi_category:Restaurants"
        ]
    );
    let dynamic = raw.dynamic();
    assert_eq!(dynamic[[0, 0, 0]], 2.0);
    assert_eq!(dynamic[[0, 6, 0]], 8.0);
    assert_eq!(dynamic[[0, 3, 1]], 35.0);
    assert_eq!(dynamic[[1, 3, 1]], 14.0);
    // County-level policy row beats the state row on March 3 only
    assert_eq!(dynamic[[0, 1, 2]], 3.0);
    assert_eq!(dynamic[[0, 2, 2]], 1.0);
    assert_eq!(dynamic[[1, 1, 2]], 1.0);
    assert_eq!(raw.statics().row(0).to_vec(), vec![40.0, 150.0, 2.0, 1.0, 0.0, 1.0]);
    assert_eq!(raw.statics().row(1).to_vec(), vec![30.0, 70.0, 1.0, 0.0, 0.0, 1.0]);

    let breakdown = train.feature_breakdown().unwrap();
    assert_eq!(breakdown.group("poi").unwrap().statics, 2..6);
}

#[test]
fn indexing_outside_valid_pairs_is_out_of_range() {
    let fx = Fixture::new();
    let builder = fx.builder(&fx.config());
    let train = builder.build(date(2), date(9), None, true, false).unwrap();

    assert!(matches!(train.get(10), Err(PipelineError::OutOfRange(_))));
    // History would start on March 1, before the window
    assert!(matches!(
        train.item_at(&fips("06001"), date(3)),
        Err(PipelineError::OutOfRange(_))
    ));
    assert!(matches!(
        train.item_at(&fips("06001"), date(9)),
        Err(PipelineError::OutOfRange(_))
    ));
    assert!(matches!(
        train.item_at(&fips("06037"), date(5)),
        Err(PipelineError::OutOfRange(_))
    ));
    assert!(train.raw_tensor().is_none());
    assert!(train.feature_breakdown().is_none());
}

#[test]
fn cached_tensor_is_served_after_sources_are_deleted() {
    let fx = Fixture::new();
    let builder = fx.builder(&fx.config());
    let computed = builder.build(date(2), date(9), None, true, false).unwrap();

    fs::remove_dir_all(fx.dir.path().join("sources/patterns")).unwrap();

    let cached = builder.build(date(2), date(9), None, true, false).unwrap();
    assert!(matches!(cached.origin(), TensorOrigin::Cache { tier, .. } if tier == "durable"));
    assert_eq!(cached.tensor(), computed.tensor());
    assert_eq!(cached.norm_stats(), computed.norm_stats());

    let err = builder.build(date(2), date(9), None, false, false).unwrap_err();
    assert!(matches!(err, PipelineError::MissingData(_)));
}

#[test]
fn validation_and_test_reuse_train_statistics() {
    let fx = Fixture::new();
    let builder = fx.builder(&fx.config());
    let splits = build_splits(&builder, &plan(), SplitMode::All, true, true).unwrap();
    let train = splits.train.unwrap();
    let val = splits.val.unwrap();
    let test = splits.test.unwrap();

    assert_eq!(train.stats_source(), StatsSource::Computed);
    assert_eq!(val.stats_source(), StatsSource::External);
    assert_eq!(val.norm_stats(), train.norm_stats());
    assert_eq!(test.norm_stats(), train.norm_stats());

    let (mean, std) = train.norm_stats().get("visits").unwrap();
    let raw = val.raw_tensor().unwrap().dynamic()[[0, 0, 0]];
    assert_eq!(raw, 10.0);
    let normalized = val.tensor().dynamic()[[0, 0, 0]];
    assert!((normalized - (raw - mean) / std).abs() < 1e-12);

    // 4-day window leaves 2 targets per county; 3-day window leaves 1
    assert_eq!(val.len(), 4);
    assert_eq!(test.len(), 2);
    // 13 new cases on March 13
    assert_eq!(val.get(0).unwrap().label, 2);
}

#[test]
fn test_mode_builds_only_test_with_train_statistics() {
    let fx = Fixture::new();
    let builder = fx.builder(&fx.config());
    let splits = build_splits(&builder, &plan(), SplitMode::Test, true, false).unwrap();
    assert!(splits.train.is_none());
    assert!(splits.val.is_none());
    let test = splits.test.unwrap();

    let train = builder.build(date(2), date(9), None, true, false).unwrap();
    assert_eq!(test.norm_stats(), train.norm_stats());
    assert_eq!(test.stats_source(), StatsSource::External);

    let train_only = build_splits(&builder, &plan(), SplitMode::TrainNoVal, true, false).unwrap();
    assert!(train_only.train.is_some());
    assert!(train_only.val.is_none() && train_only.test.is_none());
}

#[test]
fn plan_ending_at_validation_trains_without_a_test_split() {
    let fx = Fixture::new();
    let builder = fx.builder(&fx.config());
    let plan = SplitPlan {
        data_end: date(13),
        ..plan()
    };
    let splits = build_splits(&builder, &plan, SplitMode::Train, true, false).unwrap();
    assert!(splits.train.is_some() && splits.val.is_some());
    assert!(splits.test.is_none());

    let err = build_splits(&builder, &plan, SplitMode::Test, true, false).unwrap_err();
    assert!(matches!(err, PipelineError::Config(_)));
}

#[test]
fn schema_change_misses_the_cache() {
    let fx = Fixture::new();
    let config = fx.config();
    fx.builder(&config).build(date(2), date(9), None, true, false).unwrap();

    let narrowed = DatasetConfig {
        census_columns: Some(vec!["pop".into()]),
        ..config
    };
    let builder = fx.builder(&narrowed);
    let ds = builder.build(date(2), date(9), None, true, true).unwrap();
    assert!(matches!(ds.origin(), TensorOrigin::Computed { .. }));
    assert_eq!(ds.raw_tensor().unwrap().statics().ncols(), 5);
}

#[test]
fn missing_county_policies() {
    let fx = Fixture::with_counties(&[
        ("06001", "Alameda"),
        ("06019", "Fresno"),
        ("06037", "Los Angeles"),
    ]);
    let config = fx.config();
    let err = StaticTables::load(fx.manifest.clone(), &config).unwrap_err();
    assert!(matches!(err, PipelineError::MissingCountyData(msg) if msg.contains("06037")));

    let impute = DatasetConfig {
        missing_county_policy: MissingCountyPolicy::ImputeZero,
        ..config.clone()
    };
    let ds = fx.builder(&impute).build(date(2), date(9), None, true, true).unwrap();
    assert_eq!(ds.counties().len(), 3);
    assert!(ds.imputed_counties().contains(&fips("06037")));
    let la = ds.counties().iter().position(|c| *c == fips("06037")).unwrap();
    assert!(ds.raw_tensor().unwrap().statics().row(la).iter().all(|v| *v == 0.0));

    let exclude = DatasetConfig {
        missing_county_policy: MissingCountyPolicy::Exclude,
        ..config
    };
    let ds = fx.builder(&exclude).build(date(2), date(9), None, true, false).unwrap();
    assert_eq!(ds.counties(), [fips("06001"), fips("06019")]);
    assert_eq!(ds.len(), 10);
}

#[test]
fn missing_case_counts_fail_the_build() {
    let fx = Fixture::new();
    let config = DatasetConfig {
        projection_days: 10,
        ..fx.config()
    };
    let err = fx
        .builder(&config)
        .build(date(9), date(16), None, true, false)
        .unwrap_err();
    assert!(matches!(err, PipelineError::MissingData(_)));
}

#[test]
fn pattern_file_disagreeing_with_manifest_is_rejected() {
    let fx = Fixture::new();
    write(
        &fx.dir.path().join("sources/patterns/week1.csv"),
        &pattern_csv("2020-03-02", "2020-03-08", &[("p1", 6, [1; 6])]),
    );
    let err = fx
        .builder(&fx.config())
        .build(date(2), date(9), None, true, false)
        .unwrap_err();
    assert!(matches!(err, PipelineError::InconsistentWindow(_)));
}

#[test]
fn batches_over_a_built_dataset() {
    let fx = Fixture::new();
    let builder = fx.builder(&fx.config());
    let train = builder.build(date(2), date(9), None, true, false).unwrap();
    let loader = BatchLoader::new(&train, 4).unwrap().shuffled(11);
    let batches: Vec<_> = loader.iter().collect::<Result<_, _>>().unwrap();
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[0].history.dim(), (4, 3, 3));
    assert_eq!(batches[0].statics.dim(), (4, 6));
    assert_eq!(batches.iter().map(|b| b.len()).sum::<usize>(), 10);
}

#[test]
fn builder_is_shareable_across_threads() {
    let fx = Fixture::new();
    let builder = Arc::new(fx.builder(&fx.config()));
    builder.build(date(2), date(9), None, true, false).unwrap();
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let builder = Arc::clone(&builder);
            std::thread::spawn(move || {
                builder
                    .build(date(2), date(9), None, true, false)
                    .map(|ds| ds.len())
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap(), 10);
    }
}
