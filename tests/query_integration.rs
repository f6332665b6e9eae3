//! Integration tests for dimension and dataset queries.
//!
//! Each test populates an in-memory catalog with a small observing campaign
//! and checks the result sets of queries constrained by dataset
//! availability, predicates, spatial overlaps and validity ranges.

use std::collections::{BTreeSet, HashSet};

use chrono::{NaiveDate, NaiveDateTime};
use dimcat::core::config::RegistryConfig;
use dimcat::core::datasets::DatasetType;
use dimcat::core::storage_class::{StorageClass, StorageClassRegistry};
use dimcat::core::types::DataValue;
use dimcat::query::QuerySpec;
use dimcat::registry::{Registry, RegistryError};
use dimcat::{data_id, record, DataCoordinate};

// =============================================================================
// Test Helpers
// =============================================================================

fn registry() -> Registry {
    let mut storage_classes = StorageClassRegistry::new();
    for name in ["testDataset", "ImageU"] {
        storage_classes
            .register(StorageClass::new(name))
            .expect("register storage class");
    }
    Registry::open(&RegistryConfig::default(), storage_classes).expect("open registry")
}

fn dataset_type(registry: &Registry, name: &str, dimensions: &[&str], storage: &str) -> DatasetType {
    let graph = registry.universe().extract(dimensions).expect("extract");
    let dataset_type = DatasetType::new(name, graph, storage).expect("dataset type");
    registry
        .register_dataset_type(&dataset_type)
        .expect("register dataset type");
    dataset_type
}

fn at(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2005, 12, day)
        .and_then(|d| d.and_hms_opt(hour, 0, 0))
        .expect("valid date")
}

fn run_query(registry: &Registry, spec: &QuerySpec) -> Vec<DataCoordinate> {
    registry
        .query_dimensions(spec)
        .expect("plan query")
        .collect::<Result<Vec<_>, _>>()
        .expect("run query")
}

fn ints(rows: &[DataCoordinate], dimension: &str) -> BTreeSet<i64> {
    rows.iter()
        .filter_map(|r| r.get(dimension).and_then(DataValue::as_int))
        .collect()
}

fn strs(rows: &[DataCoordinate], dimension: &str) -> BTreeSet<String> {
    rows.iter()
        .filter_map(|r| r.get(dimension).and_then(DataValue::as_str))
        .map(str::to_string)
        .collect()
}

fn set<T: Ord + Clone>(values: &[T]) -> BTreeSet<T> {
    values.iter().cloned().collect()
}

// =============================================================================
// Instrument dimensions
// =============================================================================

/// DummyCam with two filters, five detectors, three visits and six exposures.
fn insert_instrument_data(registry: &Registry) {
    registry
        .insert_dimension_data(
            "instrument",
            &[record! {
                "name" => "DummyCam",
                "visit_max" => 25,
                "exposure_max" => 300,
                "detector_max" => 6,
            }],
        )
        .unwrap();
    registry
        .insert_dimension_data(
            "physical_filter",
            &[
                record! {"instrument" => "DummyCam", "name" => "dummy_r", "abstract_filter" => "r"},
                record! {"instrument" => "DummyCam", "name" => "dummy_i", "abstract_filter" => "i"},
            ],
        )
        .unwrap();
    let detectors: Vec<_> = (1..6)
        .map(|i| record! {"instrument" => "DummyCam", "id" => i, "full_name" => i.to_string()})
        .collect();
    registry.insert_dimension_data("detector", &detectors).unwrap();
    registry
        .insert_dimension_data(
            "visit",
            &[
                record! {"instrument" => "DummyCam", "id" => 10, "name" => "ten", "physical_filter" => "dummy_i"},
                record! {"instrument" => "DummyCam", "id" => 11, "name" => "eleven", "physical_filter" => "dummy_r"},
                record! {"instrument" => "DummyCam", "id" => 20, "name" => "twelve", "physical_filter" => "dummy_r"},
            ],
        )
        .unwrap();
    let exposures: Vec<_> = [
        (100, 10, "dummy_i"),
        (101, 10, "dummy_i"),
        (110, 11, "dummy_r"),
        (111, 11, "dummy_r"),
        (200, 20, "dummy_r"),
        (201, 20, "dummy_r"),
    ]
    .into_iter()
    .map(|(id, visit, filter)| {
        record! {
            "instrument" => "DummyCam",
            "id" => id,
            "name" => id.to_string(),
            "visit" => visit,
            "physical_filter" => filter,
        }
    })
    .collect();
    registry.insert_dimension_data("exposure", &exposures).unwrap();
}

/// RAW datasets in "test" (exposures 100-111, detectors 1-3) and "test2"
/// (exposures 100, 101, 200, 201).
fn insert_raw_datasets(registry: &Registry) -> (DatasetType, DatasetType) {
    registry.register_run("test").unwrap();
    registry.register_run("test2").unwrap();
    let raw = dataset_type(registry, "RAW", &["instrument", "exposure", "detector"], "testDataset");
    let calexp = dataset_type(registry, "CALEXP", &["instrument", "visit", "detector"], "testDataset");

    for exposure in [100, 101, 110, 111] {
        for detector in [1, 2, 3] {
            let id = data_id! {"instrument" => "DummyCam", "exposure" => exposure, "detector" => detector};
            let refs = registry.insert_datasets(&raw, &[id.clone()], "test").unwrap();
            // 100 gets a distinct dataset in test2, 101 shares the same one
            if exposure == 100 {
                registry.insert_datasets(&raw, &[id], "test2").unwrap();
            }
            if exposure == 101 {
                registry.associate("test2", &refs).unwrap();
            }
        }
    }
    for exposure in [200, 201] {
        for detector in [3, 4, 5] {
            let id = data_id! {"instrument" => "DummyCam", "exposure" => exposure, "detector" => detector};
            registry.insert_datasets(&raw, &[id], "test2").unwrap();
        }
    }
    (raw, calexp)
}

fn raw_dimensions(raw: &DatasetType, calexp: &DatasetType) -> Vec<String> {
    raw.dimensions()
        .required()
        .iter()
        .chain(calexp.dimensions().required())
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[test]
fn instrument_queries() {
    let registry = registry();
    insert_instrument_data(&registry);
    let (raw, calexp) = insert_raw_datasets(&registry);
    let dimensions = raw_dimensions(&raw, &calexp);

    // Single dimension
    let visits = run_query(
        &registry,
        &QuerySpec::new(["visit"]).with_dataset(&raw, ["test"]).expanded(),
    );
    assert_eq!(ints(&visits, "visit"), set(&[10, 11]));

    // No predicate
    let rows = run_query(
        &registry,
        &QuerySpec::new(dimensions.clone())
            .with_dataset(&raw, ["test"])
            .expanded(),
    );
    assert_eq!(rows.len(), 4 * 3);
    for row in &rows {
        let keys: Vec<&str> = row.values().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["detector", "exposure", "instrument"]);

        let visit_packer = registry.universe().make_packer("visit_detector", row).unwrap();
        let exposure_packer = registry.universe().make_packer("exposure_detector", row).unwrap();
        let packed_visit = visit_packer.pack(row).unwrap();
        let packed_exposure = exposure_packer.pack(row).unwrap();
        assert_eq!(
            visit_packer.unpack(packed_visit).unwrap(),
            row.subset(visit_packer.graph()).unwrap()
        );
        assert_eq!(
            exposure_packer.unpack(packed_exposure).unwrap(),
            row.subset(exposure_packer.graph()).unwrap()
        );
        assert_ne!(packed_visit, packed_exposure);
    }
    assert_eq!(ints(&rows, "exposure"), set(&[100, 101, 110, 111]));
    assert_eq!(ints(&rows, "visit"), set(&[10, 11]));
    assert_eq!(ints(&rows, "detector"), set(&[1, 2, 3]));

    // Second collection
    let rows = run_query(
        &registry,
        &QuerySpec::new(dimensions.clone())
            .with_dataset(&raw, ["test2"])
            .expanded(),
    );
    assert_eq!(rows.len(), 4 * 3);
    assert_eq!(ints(&rows, "exposure"), set(&[100, 101, 200, 201]));
    assert_eq!(ints(&rows, "visit"), set(&[10, 20]));
    assert_eq!(ints(&rows, "detector"), set(&[1, 2, 3, 4, 5]));

    // Both collections; results are distinct
    let rows = run_query(
        &registry,
        &QuerySpec::new(dimensions.clone()).with_dataset(&raw, ["test", "test2"]),
    );
    assert_eq!(rows.len(), 6 * 3);
    assert_eq!(rows.iter().collect::<HashSet<_>>().len(), rows.len());
    assert_eq!(ints(&rows, "exposure"), set(&[100, 101, 110, 111, 200, 201]));
    assert_eq!(ints(&rows, "detector"), set(&[1, 2, 3, 4, 5]));
}

#[test]
fn instrument_predicates() {
    let registry = registry();
    insert_instrument_data(&registry);
    let (raw, calexp) = insert_raw_datasets(&registry);
    let base = QuerySpec::new(raw_dimensions(&raw, &calexp))
        .with_dataset(&raw, ["test"])
        .expanded();

    let rows = run_query(&registry, &base.clone().with_predicate("visit = 10"));
    assert_eq!(rows.len(), 2 * 3);
    assert_eq!(ints(&rows, "exposure"), set(&[100, 101]));
    assert_eq!(ints(&rows, "visit"), set(&[10]));
    assert_eq!(ints(&rows, "detector"), set(&[1, 2, 3]));

    let rows = run_query(
        &registry,
        &base.clone().with_predicate("visit = 10 and detector > 1"),
    );
    assert_eq!(rows.len(), 2 * 2);
    assert_eq!(ints(&rows, "exposure"), set(&[100, 101]));
    assert_eq!(ints(&rows, "detector"), set(&[2, 3]));

    let rows = run_query(&registry, &base.clone().with_predicate("visit > 1000"));
    assert!(rows.is_empty());

    // physical_filter is implied, not a result dimension
    let rows = run_query(
        &registry,
        &base.clone().with_predicate("physical_filter = 'dummy_r'"),
    );
    assert_eq!(rows.len(), 2 * 3);
    assert_eq!(ints(&rows, "exposure"), set(&[110, 111]));
    assert_eq!(ints(&rows, "visit"), set(&[11]));

    // Record fields through qualified names
    let rows = run_query(
        &registry,
        &base.clone().with_predicate("visit.name = 'eleven' OR exposure IN (100, 200..202)"),
    );
    assert_eq!(ints(&rows, "exposure"), set(&[100, 110, 111]));

    let rows = run_query(
        &registry,
        &base.clone().with_predicate("NOT (detector IN (1..2))"),
    );
    assert_eq!(ints(&rows, "detector"), set(&[3]));
}

#[test]
fn in_list_order_does_not_matter() {
    let registry = registry();
    insert_instrument_data(&registry);
    let detectors = |predicate: &str| {
        ints(
            &run_query(&registry, &QuerySpec::new(["detector"]).with_predicate(predicate)),
            "detector",
        )
    };

    let expected = detectors("detector IN (1, 4, 5)");
    assert_eq!(expected, set(&[1, 4, 5]));
    for predicate in [
        "detector IN (1, 4..5)",
        "detector IN (4..5, 1)",
        "detector IN (4..4, 1, 5..5)",
        "detector + 0 IN (1, 4..5)",
        "detector + 0 IN (4..5, 1)",
        "detector * 1 IN (5, 4..4, 1)",
    ] {
        assert_eq!(detectors(predicate), expected, "{predicate}");
    }

    // Strided ranges against an expression target
    assert_eq!(detectors("detector IN (1..5:2)"), set(&[1, 3, 5]));
    assert_eq!(detectors("detector - 1 IN (2..4:2, 1)"), set(&[2, 3, 5]));

    assert_eq!(detectors("detector NOT IN (4..5, 1)"), set(&[2, 3]));
    assert_eq!(detectors("detector + 0 NOT IN (1, 4..5)"), set(&[2, 3]));
}

#[test]
fn fixed_data_id_constrains_results() {
    let registry = registry();
    insert_instrument_data(&registry);
    let (raw, _) = insert_raw_datasets(&registry);

    let rows = run_query(
        &registry,
        &QuerySpec::new(["exposure", "detector"])
            .with_dataset(&raw, ["test", "test2"])
            .with_data_id(data_id! {"instrument" => "DummyCam", "detector" => 3}),
    );
    assert_eq!(rows.len(), 6);
    assert_eq!(ints(&rows, "detector"), set(&[3]));
}

#[test]
fn query_errors_surface_at_planning() {
    let registry = registry();
    insert_instrument_data(&registry);
    let (raw, _) = insert_raw_datasets(&registry);

    let err = registry
        .query_dimensions(&QuerySpec::new(["visit"]).with_predicate("visit = = 10"))
        .unwrap_err();
    assert!(matches!(err, RegistryError::Query(_)), "{err}");

    let err = registry
        .query_dimensions(&QuerySpec::new(["visit"]).with_predicate("telescope = 'big'"))
        .unwrap_err();
    assert!(matches!(err, RegistryError::Query(_)), "{err}");

    let err = registry
        .query_dimensions(&QuerySpec::new(["visit"]).with_dataset(&raw, Vec::<String>::new()))
        .unwrap_err();
    assert!(matches!(err, RegistryError::Query(_)), "{err}");

    let err = registry
        .query_datasets("NOT_A_TYPE", &["test"], &QuerySpec::default())
        .unwrap_err();
    assert!(err.is_unknown_name());
}

#[test]
fn paging_returns_every_row() {
    let mut storage_classes = StorageClassRegistry::new();
    storage_classes
        .register(StorageClass::new("testDataset"))
        .unwrap();
    let config = RegistryConfig::from_toml_str(
        r#"
        [registry]
        query_page_size = 5
        "#,
    )
    .unwrap();
    let registry = Registry::open(&config, storage_classes).unwrap();
    insert_instrument_data(&registry);
    let (raw, _) = insert_raw_datasets(&registry);

    let rows = run_query(
        &registry,
        &QuerySpec::new(["exposure", "detector"]).with_dataset(&raw, ["test", "test2"]),
    );
    assert_eq!(rows.len(), 18);
    assert_eq!(rows.iter().collect::<HashSet<_>>().len(), 18);

    // Partial consumption is fine
    let first: Vec<_> = registry
        .query_dimensions(&QuerySpec::new(["detector"]))
        .unwrap()
        .take(2)
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(first.len(), 2);
}

#[test]
fn paging_tolerates_inserts_between_pages() {
    let config = RegistryConfig::from_toml_str(
        r#"
        [registry]
        query_page_size = 2
        "#,
    )
    .unwrap();
    let registry = Registry::open(&config, StorageClassRegistry::new()).unwrap();
    registry
        .insert_dimension_data("instrument", &[record! {"name" => "DummyCam"}])
        .unwrap();
    let detectors: Vec<_> = (1..6)
        .map(|i| record! {"instrument" => "DummyCam", "id" => i})
        .collect();
    registry.insert_dimension_data("detector", &detectors).unwrap();

    let mut rows = registry
        .query_dimensions(&QuerySpec::new(["detector"]))
        .unwrap();
    let mut seen = Vec::new();
    for _ in 0..2 {
        let row = rows.next().unwrap().unwrap();
        seen.extend(row.get("detector").and_then(DataValue::as_int));
    }
    // One row sorts before the consumed page, one after everything
    registry
        .insert_dimension_data(
            "detector",
            &[
                record! {"instrument" => "DummyCam", "id" => 0},
                record! {"instrument" => "DummyCam", "id" => 9},
            ],
        )
        .unwrap();
    for row in rows {
        seen.extend(row.unwrap().get("detector").and_then(DataValue::as_int));
    }
    assert_eq!(seen, vec![1, 2, 3, 4, 5, 9]);
}

#[test]
fn query_datasets_returns_refs() {
    let registry = registry();
    insert_instrument_data(&registry);
    insert_raw_datasets(&registry);

    let refs: Vec<_> = registry
        .query_datasets(
            "RAW",
            &["test2"],
            &QuerySpec::default().with_predicate("exposure = 101"),
        )
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(refs.len(), 3);
    for dataset in &refs {
        // 101 was associated from the first run
        assert_eq!(dataset.run(), Some("test"));
        assert!(dataset.data_id().is_expanded());
    }
}

// =============================================================================
// Sky map dimensions
// =============================================================================

#[test]
fn skymap_queries() {
    let registry = registry();
    registry
        .insert_dimension_data("instrument", &[record! {"instrument" => "DummyCam"}])
        .unwrap();
    registry
        .insert_dimension_data(
            "physical_filter",
            &[
                record! {"instrument" => "DummyCam", "name" => "dummy_r", "abstract_filter" => "r"},
                record! {"instrument" => "DummyCam", "name" => "dummy_i", "abstract_filter" => "i"},
            ],
        )
        .unwrap();
    registry
        .insert_dimension_data(
            "skymap",
            &[record! {"name" => "DummyMap", "hash" => b"sha!".to_vec()}],
        )
        .unwrap();
    for tract in 0..10 {
        registry
            .insert_dimension_data("tract", &[record! {"skymap" => "DummyMap", "id" => tract}])
            .unwrap();
        let patches: Vec<_> = (0..10)
            .map(|patch| {
                record! {
                    "skymap" => "DummyMap",
                    "tract" => tract,
                    "id" => patch,
                    "cell_x" => 0,
                    "cell_y" => 0,
                }
            })
            .collect();
        registry.insert_dimension_data("patch", &patches).unwrap();
    }

    registry.register_run("test").unwrap();
    let coadd_dims = ["skymap", "tract", "patch", "abstract_filter"];
    let calexp = dataset_type(&registry, "deepCoadd_calexp", &coadd_dims, "testDataset");
    let merge = dataset_type(&registry, "deepCoadd_mergeDet", &["skymap", "tract", "patch"], "testDataset");
    dataset_type(&registry, "deepCoadd_meas", &coadd_dims, "testDataset");

    for tract in [1, 3, 5] {
        for patch in [2, 4, 6, 7] {
            let id = data_id! {"skymap" => "DummyMap", "tract" => tract, "patch" => patch};
            registry.insert_datasets(&merge, &[id], "test").unwrap();
            for filter in ["i", "r"] {
                let id = data_id! {
                    "skymap" => "DummyMap",
                    "tract" => tract,
                    "patch" => patch,
                    "abstract_filter" => filter,
                };
                registry.insert_datasets(&calexp, &[id], "test").unwrap();
            }
        }
    }

    let base = QuerySpec::new(coadd_dims)
        .with_dataset(&calexp, ["test"])
        .with_dataset(&merge, ["test"]);

    let rows = run_query(&registry, &base);
    assert_eq!(rows.len(), 3 * 4 * 2);
    for row in &rows {
        let keys: Vec<&str> = row.values().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["abstract_filter", "patch", "skymap", "tract"]);
    }
    assert_eq!(ints(&rows, "tract"), set(&[1, 3, 5]));
    assert_eq!(ints(&rows, "patch"), set(&[2, 4, 6, 7]));
    assert_eq!(strs(&rows, "abstract_filter"), set(&["i".to_string(), "r".to_string()]));

    let rows = run_query(
        &registry,
        &base.clone().with_predicate("tract IN (1, 5) AND patch IN (2, 7)"),
    );
    assert_eq!(rows.len(), 2 * 2 * 2);
    assert_eq!(ints(&rows, "tract"), set(&[1, 5]));
    assert_eq!(ints(&rows, "patch"), set(&[2, 7]));

    let rows = run_query(&registry, &base.clone().with_predicate("abstract_filter = 'i'"));
    assert_eq!(rows.len(), 3 * 4);
    assert_eq!(strs(&rows, "abstract_filter"), set(&["i".to_string()]));

    // Unknown values are not an error
    let rows = run_query(&registry, &base.clone().with_predicate("skymap = 'Mars'"));
    assert!(rows.is_empty());
}

// =============================================================================
// Spatial joins
// =============================================================================

#[test]
fn spatial_join_without_data_is_empty() {
    let registry = registry();
    registry.register_run("test").unwrap();
    let calexp = dataset_type(&registry, "CALEXP", &["instrument", "visit", "detector"], "testDataset");
    let coadd = dataset_type(
        &registry,
        "deepCoadd_calexp",
        &["skymap", "tract", "patch", "abstract_filter"],
        "testDataset",
    );
    let dimensions = raw_dimensions(&calexp, &coadd);

    let rows = run_query(
        &registry,
        &QuerySpec::new(dimensions).with_dataset(&calexp, ["test"]),
    );
    assert!(rows.is_empty());
}

#[test]
fn spatial_join_matches_overlapping_regions() {
    let registry = registry();
    insert_instrument_data(&registry);
    registry
        .insert_dimension_data("skymap", &[record! {"name" => "DummyMap"}])
        .unwrap();
    registry
        .insert_dimension_data("tract", &[record! {"skymap" => "DummyMap", "id" => 0}])
        .unwrap();
    let patches: Vec<_> = (0..3)
        .map(|patch| record! {"skymap" => "DummyMap", "tract" => 0, "id" => patch})
        .collect();
    registry.insert_dimension_data("patch", &patches).unwrap();

    let visit = |id: i64| data_id! {"instrument" => "DummyCam", "visit" => id};
    let patch = |id: i64| data_id! {"skymap" => "DummyMap", "tract" => 0, "patch" => id};
    registry.insert_skypix_overlaps("visit", &visit(10), &[1, 2]).unwrap();
    registry.insert_skypix_overlaps("visit", &visit(11), &[5]).unwrap();
    registry.insert_skypix_overlaps("patch", &patch(0), &[2, 3]).unwrap();
    registry.insert_skypix_overlaps("patch", &patch(1), &[5]).unwrap();
    registry.insert_skypix_overlaps("patch", &patch(2), &[9]).unwrap();

    let rows = run_query(&registry, &QuerySpec::new(["visit", "patch"]));
    let pairs: BTreeSet<(i64, i64)> = rows
        .iter()
        .filter_map(|r| {
            let visit = r.get("visit").and_then(DataValue::as_int)?;
            let patch = r.get("patch").and_then(DataValue::as_int)?;
            Some((visit, patch))
        })
        .collect();
    assert_eq!(pairs, set(&[(10, 0), (11, 1)]));

    // Detectors have no regions
    let err = registry.insert_skypix_overlaps("detector", &data_id! {"instrument" => "DummyCam", "detector" => 1}, &[1]);
    assert!(err.unwrap_err().is_unknown_name());
}

// =============================================================================
// Validity ranges
// =============================================================================

#[test]
fn calibration_label_indirection() {
    let registry = registry();
    let flat = dataset_type(
        &registry,
        "flat",
        &["instrument", "detector", "physical_filter", "calibration_label"],
        "ImageU",
    );
    registry
        .insert_dimension_data("instrument", &[record! {"name" => "DummyCam"}])
        .unwrap();
    registry
        .insert_dimension_data(
            "physical_filter",
            &[record! {"instrument" => "DummyCam", "name" => "dummy_i", "abstract_filter" => "i"}],
        )
        .unwrap();
    let detectors: Vec<_> = (1..6)
        .map(|i| record! {"instrument" => "DummyCam", "id" => i, "full_name" => i.to_string()})
        .collect();
    registry.insert_dimension_data("detector", &detectors).unwrap();
    registry
        .insert_dimension_data(
            "visit",
            &[
                record! {"instrument" => "DummyCam", "id" => 10, "name" => "ten", "physical_filter" => "dummy_i"},
                record! {"instrument" => "DummyCam", "id" => 11, "name" => "eleven", "physical_filter" => "dummy_i"},
            ],
        )
        .unwrap();
    registry
        .insert_dimension_data(
            "exposure",
            &[
                record! {
                    "instrument" => "DummyCam", "id" => 100, "name" => "100", "visit" => 10,
                    "physical_filter" => "dummy_i",
                    "datetime_begin" => at(15, 2), "datetime_end" => at(15, 3),
                },
                record! {
                    "instrument" => "DummyCam", "id" => 101, "name" => "101", "visit" => 11,
                    "physical_filter" => "dummy_i",
                    "datetime_begin" => at(16, 2), "datetime_end" => at(16, 3),
                },
            ],
        )
        .unwrap();
    registry
        .insert_dimension_data(
            "calibration_label",
            &[
                record! {
                    "instrument" => "DummyCam", "name" => "first_night",
                    "datetime_begin" => at(15, 1), "datetime_end" => at(15, 4),
                },
                record! {
                    "instrument" => "DummyCam", "name" => "second_night",
                    "datetime_begin" => at(16, 1), "datetime_end" => at(16, 4),
                },
                record! {
                    "instrument" => "DummyCam", "name" => "both_nights",
                    "datetime_begin" => at(15, 1), "datetime_end" => at(16, 4),
                },
            ],
        )
        .unwrap();

    // Per-night flats for detectors 1-3 in calibs1
    registry.register_run("calibs1").unwrap();
    for detector in [1, 2, 3] {
        for label in ["first_night", "second_night"] {
            let id = data_id! {
                "instrument" => "DummyCam",
                "calibration_label" => label,
                "physical_filter" => "dummy_i",
                "detector" => detector,
            };
            registry.insert_datasets(&flat, &[id], "calibs1").unwrap();
        }
    }
    // One flat for both nights for detectors 3-5 in calib2
    registry.register_run("calib2").unwrap();
    for detector in [3, 4, 5] {
        let id = data_id! {
            "instrument" => "DummyCam",
            "calibration_label" => "both_nights",
            "physical_filter" => "dummy_i",
            "detector" => detector,
        };
        registry.insert_datasets(&flat, &[id], "calib2").unwrap();
    }

    let flats = |collections: &[&str], exposure: i64, detector: i64| {
        let spec = QuerySpec::default().with_data_id(data_id! {
            "instrument" => "DummyCam",
            "exposure" => exposure,
            "detector" => detector,
        });
        registry
            .query_datasets("flat", collections, &spec)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    };

    for exposure in [100, 101] {
        for detector in [1, 2, 3] {
            let found = flats(&["calibs1"], exposure, detector);
            assert_eq!(found.len(), 1, "exposure {exposure}, detector {detector}");
            let label = found[0].data_id().get("calibration_label").and_then(DataValue::as_str);
            let expected = if exposure == 100 { "first_night" } else { "second_night" };
            assert_eq!(label, Some(expected));
        }
        for detector in [3, 4, 5] {
            let found = flats(&["calib2"], exposure, detector);
            assert_eq!(found.len(), 1, "exposure {exposure}, detector {detector}");
        }
        for detector in [1, 2, 4, 5] {
            let found = flats(&["calibs1", "calib2"], exposure, detector);
            assert_eq!(found.len(), 1, "exposure {exposure}, detector {detector}");
        }
        // Both collections hold a valid flat for detector 3
        let found = flats(&["calibs1", "calib2"], exposure, 3);
        assert_eq!(found.len(), 2, "exposure {exposure}");
    }

    // Time literals compare against record bounds
    let rows = run_query(
        &registry,
        &QuerySpec::new(["exposure"])
            .with_predicate("exposure.datetime_begin > T'2005-12-16 00:00:00'"),
    );
    assert_eq!(ints(&rows, "exposure"), set(&[101]));
}

#[test]
fn calibration_lookup_for_exposure_without_visit() {
    let registry = registry();
    let flat = dataset_type(
        &registry,
        "flat",
        &["instrument", "detector", "physical_filter", "calibration_label"],
        "ImageU",
    );
    registry
        .insert_dimension_data("instrument", &[record! {"name" => "DummyCam"}])
        .unwrap();
    registry
        .insert_dimension_data(
            "physical_filter",
            &[record! {"instrument" => "DummyCam", "name" => "dummy_i", "abstract_filter" => "i"}],
        )
        .unwrap();
    registry
        .insert_dimension_data("detector", &[record! {"instrument" => "DummyCam", "id" => 1}])
        .unwrap();
    registry
        .insert_dimension_data(
            "calibration_label",
            &[record! {
                "instrument" => "DummyCam", "name" => "first_night",
                "datetime_begin" => at(15, 1), "datetime_end" => at(15, 4),
            }],
        )
        .unwrap();
    // No visit record and no visit link
    registry
        .insert_dimension_data(
            "exposure",
            &[record! {
                "instrument" => "DummyCam", "id" => 100, "name" => "100",
                "physical_filter" => "dummy_i",
                "datetime_begin" => at(15, 2), "datetime_end" => at(15, 3),
            }],
        )
        .unwrap();
    registry.register_run("calibs").unwrap();
    registry
        .insert_datasets(
            &flat,
            &[data_id! {
                "instrument" => "DummyCam",
                "detector" => 1,
                "physical_filter" => "dummy_i",
                "calibration_label" => "first_night",
            }],
            "calibs",
        )
        .unwrap();

    let rows = run_query(&registry, &QuerySpec::new(["exposure"]));
    assert_eq!(ints(&rows, "exposure"), set(&[100]));
    let rows = run_query(&registry, &QuerySpec::new(["exposure"]).expanded());
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("physical_filter").and_then(DataValue::as_str),
        Some("dummy_i")
    );

    let spec = QuerySpec::default().with_data_id(data_id! {
        "instrument" => "DummyCam",
        "exposure" => 100,
        "detector" => 1,
    });
    let found = registry
        .query_datasets("flat", &["calibs"], &spec)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(
        found[0].data_id().get("calibration_label").and_then(DataValue::as_str),
        Some("first_night")
    );

    // Naming the visit still requires the exposure to have one
    registry
        .insert_dimension_data(
            "visit",
            &[record! {"instrument" => "DummyCam", "id" => 10, "name" => "ten", "physical_filter" => "dummy_i"}],
        )
        .unwrap();
    let rows = run_query(&registry, &QuerySpec::new(["exposure"]).with_predicate("visit = 10"));
    assert!(rows.is_empty());
    let rows = run_query(&registry, &QuerySpec::new(["visit"]));
    assert_eq!(ints(&rows, "visit"), set(&[10]));
}
