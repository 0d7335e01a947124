use std::fmt;

use thiserror::Error;

/// Packed covariate key. Every schema lays its fields out in these 32 bits.
pub type CovariateKey = u32;

/// Width of [`CovariateKey`] in bits.
pub const KEY_BITS: u32 = CovariateKey::BITS;

/// Errors raised when a value does not fit its schema.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// A value needs more bits than its field provides.
    #[error("{field} value {value} does not fit in {bits} bits of the {schema} key")]
    ValueOutOfRange {
        /// Schema name.
        schema: &'static str,
        /// Field being encoded.
        field: CovariateField,
        /// Offending value.
        value: u32,
        /// Field width.
        bits: u32,
    },
    /// Wrong number of values for the schema.
    #[error("{schema} key expects {expected} values, got {got}")]
    Arity {
        /// Schema name.
        schema: &'static str,
        /// Number of fields in the schema.
        expected: usize,
        /// Number of values supplied.
        got: usize,
    },
}

/// One recalibration dimension that can appear in a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CovariateField {
    /// Interned read-group id.
    ReadGroup,
    /// Reported (or indel default) quality score.
    QualityScore,
    /// Packed sequence context preceding the base.
    Context,
    /// Encoded machine cycle.
    Cycle,
    /// Event type (mismatch / insertion / deletion).
    EventType,
}

impl fmt::Display for CovariateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadGroup => "ReadGroup",
            Self::QualityScore => "QualityScore",
            Self::Context => "Context",
            Self::Cycle => "Cycle",
            Self::EventType => "EventType",
        };
        f.write_str(name)
    }
}

/// A field and its width in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field.
    pub field: CovariateField,
    /// Width in bits.
    pub bits: u32,
}

impl FieldSpec {
    /// Field of `bits` width.
    pub const fn new(field: CovariateField, bits: u32) -> Self {
        Self { field, bits }
    }
}

/// Ordered field list describing one covariate table's key layout.
///
/// The first field occupies the most significant bits, so sorting keys
/// numerically sorts rows by the fields in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CovariateSchema {
    name: &'static str,
    fields: &'static [FieldSpec],
}

impl CovariateSchema {
    /// Schema named `name` over `fields`, most significant first.
    pub const fn new(name: &'static str, fields: &'static [FieldSpec]) -> Self {
        let mut total = 0;
        let mut i = 0;
        while i < fields.len() {
            total += fields[i].bits;
            i += 1;
        }
        assert!(total <= KEY_BITS, "schema does not fit in a covariate key");
        Self { name, fields }
    }

    /// Schema name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Field layout, most significant first.
    pub fn fields(&self) -> &'static [FieldSpec] {
        self.fields
    }

    /// Bits used by all fields together.
    pub fn total_bits(&self) -> u32 {
        self.fields.iter().map(|f| f.bits).sum()
    }

    /// Whether `field` is part of this layout.
    pub fn contains(&self, field: CovariateField) -> bool {
        self.fields.iter().any(|f| f.field == field)
    }

    /// `(shift, bits)` of `field`.
    fn placement(&self, field: CovariateField) -> Option<(u32, u32)> {
        let mut shift = self.total_bits();
        for slot in self.fields {
            shift -= slot.bits;
            if slot.field == field {
                return Some((shift, slot.bits));
            }
        }
        None
    }

    /// Pack `values` (parallel to [`fields`](Self::fields)) into a key.
    pub fn encode(&self, values: &[u32]) -> Result<CovariateKey, SchemaError> {
        if values.len() != self.fields.len() {
            return Err(SchemaError::Arity {
                schema: self.name,
                expected: self.fields.len(),
                got: values.len(),
            });
        }
        let mut key: CovariateKey = 0;
        for (slot, &value) in self.fields.iter().zip(values) {
            if value > mask(slot.bits) {
                return Err(SchemaError::ValueOutOfRange {
                    schema: self.name,
                    field: slot.field,
                    value,
                    bits: slot.bits,
                });
            }
            key = (key << slot.bits) | value;
        }
        Ok(key)
    }

    /// Extract `field` from `key`; `None` if the schema has no such field.
    pub fn decode(&self, key: CovariateKey, field: CovariateField) -> Option<u32> {
        let (shift, bits) = self.placement(field)?;
        Some((key >> shift) & mask(bits))
    }

    /// Replace `field` in `key` with `value`.
    pub fn encode_field(
        &self,
        key: CovariateKey,
        field: CovariateField,
        value: u32,
    ) -> Result<CovariateKey, SchemaError> {
        let Some((shift, bits)) = self.placement(field) else {
            return Ok(key);
        };
        if value > mask(bits) {
            return Err(SchemaError::ValueOutOfRange {
                schema: self.name,
                field,
                value,
                bits,
            });
        }
        Ok((key & !(mask(bits) << shift)) | (value << shift))
    }

    /// Decode every field, in layout order.
    pub fn decode_all(&self, key: CovariateKey) -> Vec<u32> {
        self.fields
            .iter()
            .filter_map(|slot| self.decode(key, slot.field))
            .collect()
    }
}

fn mask(bits: u32) -> u32 {
    if bits >= 32 {
        u32::MAX
    } else {
        (1u32 << bits) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CovariateField::*;

    const TEST_SCHEMA: CovariateSchema = CovariateSchema::new(
        "test",
        &[
            FieldSpec::new(ReadGroup, 8),
            FieldSpec::new(QualityScore, 8),
            FieldSpec::new(EventType, 2),
        ],
    );

    #[test]
    fn first_field_is_most_significant() {
        let key = TEST_SCHEMA.encode(&[3, 30, 1]).unwrap();
        assert_eq!(key, (3 << 10) | (30 << 2) | 1);
        assert_eq!(TEST_SCHEMA.decode(key, ReadGroup), Some(3));
        assert_eq!(TEST_SCHEMA.decode(key, QualityScore), Some(30));
        assert_eq!(TEST_SCHEMA.decode(key, EventType), Some(1));
        assert_eq!(TEST_SCHEMA.decode(key, Cycle), None);
        assert_eq!(TEST_SCHEMA.decode_all(key), vec![3, 30, 1]);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(matches!(
            TEST_SCHEMA.encode(&[256, 0, 0]),
            Err(SchemaError::ValueOutOfRange { field: ReadGroup, .. })
        ));
        assert!(matches!(
            TEST_SCHEMA.encode(&[1, 2]),
            Err(SchemaError::Arity { expected: 3, got: 2, .. })
        ));
    }

    #[test]
    fn encode_field_replaces_only_that_field() {
        let key = TEST_SCHEMA.encode(&[7, 20, 2]).unwrap();
        let key = TEST_SCHEMA.encode_field(key, QualityScore, 41).unwrap();
        assert_eq!(TEST_SCHEMA.decode_all(key), vec![7, 41, 2]);
    }
}
