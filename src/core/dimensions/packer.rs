//! core::dimensions::packer
//!
//! Reversible integer encodings of data coordinates.
//!
//! A packer holds one dimension (the fixed element, e.g. `instrument`)
//! constant and packs the integer keys of the others as mixed-radix digits,
//! outermost first. Bounds come from fields of the fixed element's record,
//! so packers for different instruments may use different radices.

use std::collections::BTreeMap;

use super::element::PackerSpec;
use super::graph::DimensionGraph;
use super::universe::DimensionUniverse;
use super::{DataCoordinate, DimensionError};
use crate::core::types::DataValue;

/// A packer bound to one value of its fixed dimension.
#[derive(Debug, Clone)]
pub struct DimensionPacker {
    spec: PackerSpec,
    fixed_value: DataValue,
    /// Exclusive upper bound of each packed dimension, outermost first.
    bounds: Vec<i64>,
    /// Graph of the fixed and packed dimensions.
    graph: DimensionGraph,
    max_value: i64,
}

impl DimensionPacker {
    pub(crate) fn new(
        universe: &DimensionUniverse,
        spec: PackerSpec,
        data_id: &DataCoordinate,
    ) -> Result<Self, DimensionError> {
        let fixed_value = data_id
            .get(&spec.fixed)
            .cloned()
            .ok_or_else(|| DimensionError::MissingValue {
                dimension: spec.fixed.clone(),
                required: spec.name.clone(),
            })?;
        let record = data_id.record(&spec.fixed)?;

        let mut bounds = Vec::with_capacity(spec.packed.len());
        let mut max_value: i64 = 1;
        for packed in &spec.packed {
            let bound = record
                .get(&packed.max_field)
                .and_then(|v| v.as_int())
                .filter(|b| *b > 0)
                .ok_or_else(|| DimensionError::MissingValue {
                    dimension: packed.max_field.clone(),
                    required: spec.fixed.clone(),
                })?;
            max_value = max_value.checked_mul(bound).ok_or_else(|| {
                DimensionError::InvalidDefinition(format!(
                    "packer '{}' bounds overflow a 64-bit integer",
                    spec.name
                ))
            })?;
            bounds.push(bound);
        }

        let graph = universe.extract(
            std::iter::once(spec.fixed.as_str())
                .chain(spec.packed.iter().map(|p| p.dimension.as_str())),
        )?;

        Ok(Self {
            spec,
            fixed_value,
            bounds,
            graph,
            max_value,
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Graph of the coordinates this packer produces.
    pub fn graph(&self) -> &DimensionGraph {
        &self.graph
    }

    /// One past the largest packed value.
    pub fn max_value(&self) -> i64 {
        self.max_value
    }

    /// Number of bits needed to hold any packed value.
    pub fn max_bits(&self) -> u32 {
        64 - (self.max_value - 1).max(0).leading_zeros()
    }

    /// Pack a coordinate's values into one integer.
    ///
    /// # Errors
    ///
    /// - [`DimensionError::FixedMismatch`] if the fixed value differs
    /// - [`DimensionError::MissingValue`] if a packed value is absent
    /// - [`DimensionError::PackOutOfRange`] if a value exceeds its bound
    pub fn pack(&self, data_id: &DataCoordinate) -> Result<i64, DimensionError> {
        if data_id.get(&self.spec.fixed) != Some(&self.fixed_value) {
            return Err(DimensionError::FixedMismatch(self.spec.fixed.clone()));
        }
        let mut packed = 0i64;
        for (dimension, &max) in self.spec.packed.iter().zip(&self.bounds) {
            let value = data_id
                .get(&dimension.dimension)
                .and_then(DataValue::as_int)
                .ok_or_else(|| DimensionError::MissingValue {
                    dimension: dimension.dimension.clone(),
                    required: self.spec.name.clone(),
                })?;
            if !(0..max).contains(&value) {
                return Err(DimensionError::PackOutOfRange {
                    dimension: dimension.dimension.clone(),
                    value,
                    max,
                });
            }
            packed = packed * max + value;
        }
        Ok(packed)
    }

    /// Recover the coordinate a value was packed from.
    ///
    /// # Errors
    ///
    /// Returns [`DimensionError::UnpackOutOfRange`] for values outside
    /// `[0, max_value)`.
    pub fn unpack(&self, packed: i64) -> Result<DataCoordinate, DimensionError> {
        if !(0..self.max_value).contains(&packed) {
            return Err(DimensionError::UnpackOutOfRange(packed));
        }
        let mut values = BTreeMap::new();
        values.insert(self.spec.fixed.clone(), self.fixed_value.clone());

        let mut rest = packed;
        for (dimension, &max) in self.spec.packed.iter().zip(&self.bounds).rev() {
            values.insert(dimension.dimension.clone(), DataValue::Int(rest % max));
            rest /= max;
        }
        DataCoordinate::from_parts(self.graph.clone(), values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dimensions::coordinate::{Expansion, RawDataId};
    use crate::core::dimensions::record::{DimensionRecord, RawRecord};
    use crate::core::types::FieldValue;

    fn instrument_id(universe: &DimensionUniverse, name: &str) -> DataCoordinate {
        let raw: RawRecord = [
            ("name", FieldValue::from(name)),
            ("visit_max", 10.into()),
            ("exposure_max", 8.into()),
            ("detector_max", 4.into()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        let record = DimensionRecord::new(universe.get("instrument").unwrap(), &raw).unwrap();
        let graph = universe.extract(["instrument"]).unwrap();
        DataCoordinate::standardize(&RawDataId::new().with("instrument", name), &graph)
            .unwrap()
            .with_expansion(Expansion {
                implied: BTreeMap::new(),
                records: [("instrument".to_string(), record)].into_iter().collect(),
            })
            .unwrap()
    }

    fn visit_detector(universe: &DimensionUniverse, visit: i64, detector: i64) -> DataCoordinate {
        let graph = universe.extract(["visit", "detector"]).unwrap();
        DataCoordinate::standardize(
            &RawDataId::new()
                .with("instrument", "DummyCam")
                .with("visit", visit)
                .with("detector", detector),
            &graph,
        )
        .unwrap()
    }

    #[test]
    fn pack_unpack_round_trip() {
        let universe = DimensionUniverse::observational().unwrap();
        let packer = universe
            .make_packer("visit_detector", &instrument_id(&universe, "DummyCam"))
            .unwrap();
        assert_eq!(packer.max_value(), 40);
        assert_eq!(packer.max_bits(), 6);

        let data_id = visit_detector(&universe, 7, 3);
        let packed = packer.pack(&data_id).unwrap();
        assert_eq!(packed, 7 * 4 + 3);
        assert_eq!(packer.unpack(packed).unwrap(), data_id);
    }

    #[test]
    fn out_of_range_values_rejected() {
        let universe = DimensionUniverse::observational().unwrap();
        let packer = universe
            .make_packer("visit_detector", &instrument_id(&universe, "DummyCam"))
            .unwrap();
        assert!(matches!(
            packer.pack(&visit_detector(&universe, 10, 0)),
            Err(DimensionError::PackOutOfRange { .. })
        ));
        assert_eq!(packer.unpack(40), Err(DimensionError::UnpackOutOfRange(40)));
        assert_eq!(packer.unpack(-1), Err(DimensionError::UnpackOutOfRange(-1)));
    }

    #[test]
    fn other_instrument_rejected() {
        let universe = DimensionUniverse::observational().unwrap();
        let packer = universe
            .make_packer("visit_detector", &instrument_id(&universe, "OtherCam"))
            .unwrap();
        assert_eq!(
            packer.pack(&visit_detector(&universe, 1, 1)),
            Err(DimensionError::FixedMismatch("instrument".into()))
        );
    }

    #[test]
    fn unknown_packer() {
        let universe = DimensionUniverse::observational().unwrap();
        let err = universe
            .make_packer("bogus", &instrument_id(&universe, "DummyCam"))
            .unwrap_err();
        assert_eq!(err, DimensionError::UnknownPacker("bogus".into()));
    }

    #[test]
    fn minimal_data_id_cannot_build_packer() {
        let universe = DimensionUniverse::observational().unwrap();
        let graph = universe.extract(["instrument"]).unwrap();
        let minimal =
            DataCoordinate::standardize(&RawDataId::new().with("instrument", "DummyCam"), &graph)
                .unwrap();
        let err = universe.make_packer("visit_detector", &minimal).unwrap_err();
        assert_eq!(err, DimensionError::MissingRecord("instrument".into()));
    }
}
