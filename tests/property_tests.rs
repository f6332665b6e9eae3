//! Property-based tests for core domain types.
//!
//! These tests use proptest to verify invariants hold across
//! randomly generated inputs.

use std::collections::BTreeMap;

use proptest::prelude::*;

use dimcat::core::datasets::{DatasetRef, DatasetType};
use dimcat::core::dimensions::{
    DataCoordinate, DimensionRecord, DimensionUniverse, Expansion, RawDataId, RawRecord,
};
use dimcat::core::types::{
    micros_to_timestamp, timestamp_to_micros, validate_dataset_type_name, DatasetId, FieldValue,
};
use dimcat::db::NameShrinker;
use dimcat::query::{parse_expression, BinaryOp, Expr, Identifier, Literal};

fn universe() -> DimensionUniverse {
    DimensionUniverse::observational().expect("observational universe")
}

/// An instrument coordinate expanded with the packing bounds.
fn instrument(universe: &DimensionUniverse, visit_max: i64, detector_max: i64) -> DataCoordinate {
    let raw: RawRecord = [
        ("name", FieldValue::from("DummyCam")),
        ("visit_max", visit_max.into()),
        ("exposure_max", 1.into()),
        ("detector_max", detector_max.into()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    let record = DimensionRecord::new(universe.get("instrument").unwrap(), &raw).unwrap();
    let graph = universe.extract(["instrument"]).unwrap();
    DataCoordinate::standardize(&RawDataId::new().with("instrument", "DummyCam"), &graph)
        .unwrap()
        .with_expansion(Expansion {
            implied: BTreeMap::new(),
            records: [("instrument".to_string(), record)].into_iter().collect(),
        })
        .unwrap()
}

/// Strategy for identifier-like names, some longer than any limit used below.
fn identifier() -> impl Strategy<Value = String> {
    "[a-z_][a-z0-9_]{0,80}"
}

/// Strategy for bare dimension names used in predicates.
fn dimension_name() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("instrument"),
        Just("visit"),
        Just("detector"),
        Just("exposure"),
        Just("tract"),
        Just("patch"),
    ]
}

// =============================================================================
// Identifier shrinking
// =============================================================================

proptest! {
    /// Shrunk names fit the limit and expand back to the original.
    #[test]
    fn shrink_is_reversible(name in identifier(), limit in 18usize..64) {
        let mut shrinker = NameShrinker::new(limit);
        let short = shrinker.shrink(&name);
        prop_assert!(short.len() <= shrinker.max_length());
        prop_assert_eq!(shrinker.expand(&short), name.clone());
        // Stable across calls
        prop_assert_eq!(shrinker.shrink(&name), short);
    }

    /// Distinct names never collide after shrinking.
    #[test]
    fn shrink_is_injective(a in identifier(), b in identifier()) {
        prop_assume!(a != b);
        let mut shrinker = NameShrinker::new(24);
        prop_assert_ne!(shrinker.shrink(&a), shrinker.shrink(&b));
    }
}

// =============================================================================
// Data coordinates and packers
// =============================================================================

proptest! {
    /// Packing then unpacking recovers the coordinate.
    #[test]
    fn packer_round_trip(
        visit_max in 1i64..5000,
        detector_max in 1i64..300,
        seed in any::<(u32, u32)>(),
    ) {
        let universe = universe();
        let packer = universe
            .make_packer("visit_detector", &instrument(&universe, visit_max, detector_max))
            .unwrap();
        let visit = i64::from(seed.0) % visit_max;
        let detector = i64::from(seed.1) % detector_max;

        let raw = RawDataId::new()
            .with("instrument", "DummyCam")
            .with("visit", visit)
            .with("detector", detector);
        let coordinate = DataCoordinate::standardize(&raw, packer.graph()).unwrap();
        let packed = packer.pack(&coordinate).unwrap();

        prop_assert!((0..packer.max_value()).contains(&packed));
        prop_assert!(packed < 1i64 << packer.max_bits());
        prop_assert_eq!(packer.unpack(packed).unwrap(), coordinate);
    }

    /// Extra keys and insertion order do not change a standardized coordinate.
    #[test]
    fn standardize_ignores_extra_keys(detector in 0i64..1000, visit in 0i64..1000, extra in 0i64..10) {
        let universe = universe();
        let graph = universe.extract(["instrument", "detector"]).unwrap();
        let plain = RawDataId::new()
            .with("detector", detector)
            .with("instrument", "DummyCam");
        let noisy = RawDataId::new()
            .with("visit", visit)
            .with("instrument", "DummyCam")
            .with("tract", extra)
            .with("detector", detector);

        let a = DataCoordinate::standardize(&plain, &graph).unwrap();
        let b = DataCoordinate::standardize(&noisy, &graph).unwrap();
        prop_assert_eq!(a.fingerprint(), b.fingerprint());
        prop_assert_eq!(a, b);
    }
}

// =============================================================================
// Dataset refs
// =============================================================================

proptest! {
    /// The content hash depends only on type and data id.
    #[test]
    fn hash_ignores_resolution(
        detector in 0i64..1000,
        id in 1i64..i64::MAX,
        run in "[a-z]{1,12}",
    ) {
        let universe = universe();
        let graph = universe.extract(["instrument", "detector"]).unwrap();
        let dataset_type = DatasetType::new("bias", graph, "Exposure").unwrap();
        let raw = RawDataId::new()
            .with("instrument", "DummyCam")
            .with("detector", detector);

        let unresolved = DatasetRef::from_raw(dataset_type, &raw).unwrap();
        let resolved = unresolved.resolved(DatasetId::new(id), run, None);

        prop_assert_eq!(resolved.content_hash(), unresolved.content_hash());
        prop_assert_eq!(resolved.unresolved().content_hash(), unresolved.content_hash());
        prop_assert_eq!(resolved.unresolved(), unresolved.clone());
        prop_assert_ne!(resolved, unresolved);
    }

    /// Different data ids give different hashes.
    #[test]
    fn hash_distinguishes_data_ids(a in 0i64..10_000, b in 0i64..10_000) {
        prop_assume!(a != b);
        let universe = universe();
        let graph = universe.extract(["instrument", "detector"]).unwrap();
        let dataset_type = DatasetType::new("bias", graph, "Exposure").unwrap();
        let make = |d: i64| {
            DatasetRef::from_raw(
                dataset_type.clone(),
                &RawDataId::new().with("instrument", "DummyCam").with("detector", d),
            )
            .unwrap()
        };
        prop_assert_ne!(make(a).content_hash(), make(b).content_hash());
    }

    /// Generated dotted names validate.
    #[test]
    fn dotted_names_validate(parts in prop::collection::vec("[A-Za-z_][A-Za-z0-9_]{0,10}", 1..4)) {
        prop_assert!(validate_dataset_type_name(&parts.join(".")).is_ok());
    }
}

// =============================================================================
// Predicates and timestamps
// =============================================================================

proptest! {
    /// Simple comparisons parse to one binary node.
    #[test]
    fn comparison_parses(name in dimension_name(), value in 0i64..1_000_000, spaces in 0usize..3) {
        let pad = " ".repeat(spaces);
        let text = format!("{pad}{name}{pad}>={pad}{value}{pad}");
        let expr = parse_expression(&text).unwrap();
        prop_assert_eq!(
            expr,
            Expr::Binary {
                op: BinaryOp::Ge,
                left: Box::new(Expr::Identifier(Identifier::bare(name))),
                right: Box::new(Expr::Literal(Literal::Int(value))),
            }
        );
    }

    /// Arbitrary input is either parsed or rejected, never a panic.
    #[test]
    fn parser_total(text in "\\PC{0,40}") {
        let _ = parse_expression(&text);
    }

    /// Timestamps survive the integer storage encoding.
    #[test]
    fn timestamp_micros_round_trip(micros in -2_000_000_000_000_000i64..4_000_000_000_000_000) {
        let t = micros_to_timestamp(micros).unwrap();
        prop_assert_eq!(timestamp_to_micros(&t), micros);
    }
}
