//! Persistent empirical tables keyed by packed covariates.

use std::ops::{Add, AddAssign};

use super::schema::{CovariateKey, CovariateSchema};

/// Non-negative count with 32 fractional bits.
///
/// Sums are plain integer additions, so a table holds the same bits no
/// matter how reads were split into batches or in which order chunks merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct FixedCount(u64);

impl FixedCount {
    const FRACTION_BITS: u32 = 32;
    const SCALE: f64 = (1u64 << Self::FRACTION_BITS) as f64;

    /// Zero.
    pub const ZERO: Self = Self(0);

    /// Nearest representable count; negative and NaN inputs clamp to zero.
    pub fn from_f64(value: f64) -> Self {
        if value.is_nan() || value <= 0.0 {
            return Self::ZERO;
        }
        Self((value * Self::SCALE).round() as u64)
    }

    /// Whole-number count.
    pub const fn whole(count: u64) -> Self {
        Self(count << Self::FRACTION_BITS)
    }

    /// Value as a float, for reporting and quality math.
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / Self::SCALE
    }

    /// Underlying fixed-point bits.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl Add for FixedCount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for FixedCount {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Accumulated counts for one covariate bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct EmpiricalValue {
    /// Bases observed.
    pub observations: u64,
    /// Errors observed; fractional when BAQ spreads an error over a block.
    pub mismatches: FixedCount,
    /// Errors predicted by the reported qualities.
    pub expected_errors: FixedCount,
}

impl EmpiricalValue {
    /// A single observation.
    pub fn observation(mismatch: f64, error_probability: f64) -> Self {
        Self {
            observations: 1,
            mismatches: FixedCount::from_f64(mismatch),
            expected_errors: FixedCount::from_f64(error_probability),
        }
    }

    /// Sum of two values.
    pub fn combine(self, other: Self) -> Self {
        Self {
            observations: self.observations + other.observations,
            mismatches: self.mismatches + other.mismatches,
            expected_errors: self.expected_errors + other.expected_errors,
        }
    }
}

impl AddAssign for EmpiricalValue {
    fn add_assign(&mut self, rhs: Self) {
        *self = self.combine(rhs);
    }
}

/// Sorted key/value table for one covariate schema.
///
/// Keys are unique and ascending; values hold cumulative counts over all
/// merged batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmpiricalTable {
    schema: CovariateSchema,
    keys: Vec<CovariateKey>,
    values: Vec<EmpiricalValue>,
}

impl EmpiricalTable {
    /// Empty table over `schema`.
    pub fn new(schema: CovariateSchema) -> Self {
        Self {
            schema,
            keys: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Key layout.
    pub fn schema(&self) -> &CovariateSchema {
        &self.schema
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether nothing has been merged yet.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Sorted keys.
    pub fn keys(&self) -> &[CovariateKey] {
        &self.keys
    }

    /// Values, parallel to [`keys`](Self::keys).
    pub fn values(&self) -> &[EmpiricalValue] {
        &self.values
    }

    /// Value stored under `key`.
    pub fn get(&self, key: CovariateKey) -> Option<&EmpiricalValue> {
        self.keys
            .binary_search(&key)
            .ok()
            .map(|idx| &self.values[idx])
    }

    /// Iterate `(key, value)` in key order.
    pub fn iter(&self) -> impl Iterator<Item = (CovariateKey, &EmpiricalValue)> + '_ {
        self.keys.iter().copied().zip(self.values.iter())
    }

    /// Merge key-sorted, key-unique pairs into the table.
    pub fn merge_sorted(&mut self, batch: &[(CovariateKey, EmpiricalValue)]) {
        if batch.is_empty() {
            return;
        }
        debug_assert!(batch.windows(2).all(|w| w[0].0 < w[1].0));

        let mut keys = Vec::with_capacity(self.keys.len() + batch.len());
        let mut values = Vec::with_capacity(keys.capacity());
        let (mut i, mut j) = (0, 0);
        while i < self.keys.len() && j < batch.len() {
            let (key, value) = batch[j];
            match self.keys[i].cmp(&key) {
                std::cmp::Ordering::Less => {
                    keys.push(self.keys[i]);
                    values.push(self.values[i]);
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    keys.push(key);
                    values.push(value);
                    j += 1;
                }
                std::cmp::Ordering::Equal => {
                    keys.push(key);
                    values.push(self.values[i].combine(value));
                    i += 1;
                    j += 1;
                }
            }
        }
        keys.extend_from_slice(&self.keys[i..]);
        values.extend_from_slice(&self.values[i..]);
        for &(key, value) in &batch[j..] {
            keys.push(key);
            values.push(value);
        }
        self.keys = keys;
        self.values = values;
    }

    /// Merge another table over the same schema.
    pub fn merge_table(&mut self, other: &EmpiricalTable) {
        let pairs: Vec<_> = other.iter().map(|(k, v)| (k, *v)).collect();
        self.merge_sorted(&pairs);
    }

    /// Sum of all observations.
    pub fn total_observations(&self) -> u64 {
        self.values.iter().map(|v| v.observations).sum()
    }
}
