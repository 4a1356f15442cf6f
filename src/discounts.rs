//! Precomputed Kneser-Ney discount parameters
//!
//! Discounts are estimated upstream and shipped with the index; this module
//! only validates and clamps them.
//!
//! - A discount must be positive and finite. With `D = 0` a seen context
//!   keeps no backoff mass and every unseen continuation gets probability 0.
//! - A discount larger than the smallest count of its bucket would make the
//!   direct term negative, so it is clamped to that count and the clamp is
//!   logged as an anomaly.

use crate::{KnmError, Result};
use log::warn;
use serde::{Deserialize, Serialize};

/// Discounts for one order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Discounts {
    /// Plain Kneser-Ney discount
    pub d: f64,
    /// Modified Kneser-Ney discount for count 1
    pub d1: f64,
    /// Modified Kneser-Ney discount for count 2
    pub d2: f64,
    /// Modified Kneser-Ney discount for counts >= 3
    pub d3_plus: f64,
}

impl Discounts {
    pub fn new(d: f64, d1: f64, d2: f64, d3_plus: f64) -> Self {
        Self { d, d1, d2, d3_plus }
    }

    /// Discount subtracted from `count` (plain KN: a single constant)
    #[inline]
    pub fn for_count(&self, count: f64, modified: bool) -> f64 {
        if count <= 0.0 {
            0.0
        } else if !modified {
            self.d
        } else if count < 1.5 {
            self.d1
        } else if count < 2.5 {
            self.d2
        } else {
            self.d3_plus
        }
    }

    /// Discount mass removed from a context whose extensions fall into the
    /// count buckets `n1`, `n2`, `n3_plus`
    #[inline]
    pub fn backoff_mass(&self, n1: f64, n2: f64, n3_plus: f64, modified: bool) -> f64 {
        if modified {
            self.d1 * n1 + self.d2 * n2 + self.d3_plus * n3_plus
        } else {
            self.d * (n1 + n2 + n3_plus)
        }
    }

    fn clamped(self, order: usize, variant: &str) -> Result<Self> {
        Ok(Self {
            d: clamp_discount(self.d, 1.0, order, variant, "D")?,
            d1: clamp_discount(self.d1, 1.0, order, variant, "D1")?,
            d2: clamp_discount(self.d2, 2.0, order, variant, "D2")?,
            d3_plus: clamp_discount(self.d3_plus, 3.0, order, variant, "D3+")?,
        })
    }
}

fn clamp_discount(value: f64, max: f64, order: usize, variant: &str, name: &str) -> Result<f64> {
    if !value.is_finite() || value <= 0.0 {
        return Err(KnmError::Configuration(format!(
            "order {} {} discount {} = {} must be positive",
            order, variant, name, value
        )));
    }
    if value > max {
        warn!(
            "discount anomaly: order {} {} {} = {} clamped to {}",
            order, variant, name, value, max
        );
        return Ok(max);
    }
    Ok(value)
}

/// Per-order discounts for raw counts (highest order) and continuation
/// counts (lower orders). Index 0 is order 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountTable {
    raw: Vec<Discounts>,
    continuation: Vec<Discounts>,
}

impl DiscountTable {
    /// Validate and clamp a table
    pub fn new(raw: Vec<Discounts>, continuation: Vec<Discounts>) -> Result<Self> {
        if raw.is_empty() {
            return Err(KnmError::Configuration(
                "discount table must cover at least order 1".to_string(),
            ));
        }
        if raw.len() != continuation.len() {
            return Err(KnmError::Configuration(format!(
                "discount table has {} raw orders but {} continuation orders",
                raw.len(),
                continuation.len()
            )));
        }
        Ok(Self {
            raw: raw
                .into_iter()
                .enumerate()
                .map(|(i, d)| d.clamped(i + 1, "raw"))
                .collect::<Result<_>>()?,
            continuation: continuation
                .into_iter()
                .enumerate()
                .map(|(i, d)| d.clamped(i + 1, "continuation"))
                .collect::<Result<_>>()?,
        })
    }

    /// Same discount `d` for every bucket, order and variant
    pub fn uniform(max_order: usize, d: f64) -> Result<Self> {
        let discounts = Discounts::new(d, d, d, d);
        Self::new(vec![discounts; max_order], vec![discounts; max_order])
    }

    /// Parse from JSON and re-apply validation
    pub fn from_json(json: &str) -> Result<Self> {
        let table: DiscountTable = serde_json::from_str(json)?;
        Self::new(table.raw, table.continuation)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Re-apply validation after deserialization
    pub(crate) fn validated(self) -> Result<Self> {
        Self::new(self.raw, self.continuation)
    }

    /// Highest order with discounts
    #[inline]
    pub fn max_order(&self) -> usize {
        self.raw.len()
    }

    /// Discounts applied at `order` for a model of size `ngram_size`:
    /// continuation discounts unless this is the highest order of a
    /// model larger than a unigram.
    pub fn for_order(&self, order: usize, ngram_size: usize) -> &Discounts {
        debug_assert!(order >= 1 && order <= self.max_order());
        if order == 1 || order != ngram_size {
            &self.continuation[order - 1]
        } else {
            &self.raw[order - 1]
        }
    }

    pub fn raw(&self, order: usize) -> &Discounts {
        &self.raw[order - 1]
    }

    pub fn continuation(&self, order: usize) -> &Discounts {
        &self.continuation[order - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::capture;
    use log::Level;

    #[test]
    fn test_clamps_to_bucket_minimum() {
        let table = DiscountTable::new(
            vec![Discounts::new(1.5, 1.2, 2.7, 4.0)],
            vec![Discounts::new(0.2, 0.5, 1.0, 1.5)],
        )
        .unwrap();

        assert_eq!(*table.raw(1), Discounts::new(1.0, 1.0, 2.0, 3.0));
        assert_eq!(*table.continuation(1), Discounts::new(0.2, 0.5, 1.0, 1.5));
    }

    #[test]
    fn test_clamp_is_logged() {
        capture::install();
        DiscountTable::new(
            vec![Discounts::new(0.5, 0.5, 2.5, 1.5)],
            vec![Discounts::new(0.5, 0.5, 1.0, 1.5)],
        )
        .unwrap();

        let warnings = capture::messages(Level::Warn);
        assert_eq!(warnings.len(), 1, "{:?}", warnings);
        assert!(warnings[0].contains("order 1 raw D2 = 2.5 clamped to 2"));
    }

    #[test]
    fn test_rejects_non_positive_discounts() {
        let ok = Discounts::new(0.5, 0.5, 1.0, 1.5);
        for bad in [
            Discounts::new(0.0, 0.5, 1.0, 1.5),
            Discounts::new(0.5, -0.2, 1.0, 1.5),
            Discounts::new(0.5, 0.5, f64::NAN, 1.5),
            Discounts::new(0.5, 0.5, 1.0, f64::INFINITY),
        ] {
            assert!(matches!(
                DiscountTable::new(vec![ok], vec![bad]),
                Err(KnmError::Configuration(_))
            ));
        }
        assert!(DiscountTable::uniform(2, 0.0).is_err());
    }

    #[test]
    fn test_rejects_mismatched_orders() {
        let d = Discounts::new(0.5, 0.5, 1.0, 1.5);
        assert!(DiscountTable::new(vec![d, d], vec![d]).is_err());
        assert!(DiscountTable::new(vec![], vec![]).is_err());
    }

    #[test]
    fn test_for_order_selects_variant() {
        let raw = Discounts::new(0.9, 0.9, 0.9, 0.9);
        let cont = Discounts::new(0.1, 0.1, 0.1, 0.1);
        let table = DiscountTable::new(vec![raw; 3], vec![cont; 3]).unwrap();

        assert_eq!(*table.for_order(1, 1), cont);
        assert_eq!(*table.for_order(1, 3), cont);
        assert_eq!(*table.for_order(2, 3), cont);
        assert_eq!(*table.for_order(3, 3), raw);
        assert_eq!(*table.for_order(2, 2), raw);
    }

    #[test]
    fn test_discount_buckets() {
        let d = Discounts::new(0.5, 0.6, 1.1, 1.7);
        assert_eq!(d.for_count(0.0, true), 0.0);
        assert_eq!(d.for_count(1.0, true), 0.6);
        assert_eq!(d.for_count(2.0, true), 1.1);
        assert_eq!(d.for_count(7.0, true), 1.7);
        assert_eq!(d.for_count(7.0, false), 0.5);
        assert!((d.backoff_mass(2.0, 1.0, 1.0, true) - (1.2 + 1.1 + 1.7)).abs() < 1e-12);
        assert!((d.backoff_mass(2.0, 1.0, 1.0, false) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_json_roundtrip_revalidates() {
        let json = r#"{
            "raw": [{"d": 0.5, "d1": 0.5, "d2": 1.0, "d3_plus": 1.5}],
            "continuation": [{"d": 2.0, "d1": 0.4, "d2": 0.8, "d3_plus": 1.2}]
        }"#;
        let table = DiscountTable::from_json(json).unwrap();
        assert_eq!(table.max_order(), 1);
        assert_eq!(table.continuation(1).d, 1.0);

        let again = DiscountTable::from_json(&table.to_json().unwrap()).unwrap();
        assert_eq!(again, table);
    }
}
