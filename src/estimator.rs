//! Interpolated Kneser-Ney estimation over a count ladder
//!
//! ```text
//! p_0        = 1 / |V|
//! p_i(w | u) = (max(0, c - D(c)) + gamma_mass(u) * p_{i-1}) / d(u)
//! ```
//!
//! The recursion runs as a loop from order 1 upward. An order whose
//! denominator is zero contributes nothing and passes `p_{i-1}` through
//! unchanged (its whole mass is deferred to the lower order).

use crate::discounts::DiscountTable;
use crate::oracle::OrderCounts;
use log::debug;

/// Plain or Modified Kneser-Ney over precomputed discounts
#[derive(Debug, Clone, Copy)]
pub struct KneserNeyEstimator<'a> {
    discounts: &'a DiscountTable,
    vocab_size: usize,
    ngram_size: usize,
    modified: bool,
}

impl<'a> KneserNeyEstimator<'a> {
    pub fn new(
        discounts: &'a DiscountTable,
        vocab_size: usize,
        ngram_size: usize,
        modified: bool,
    ) -> Self {
        debug_assert!(ngram_size >= 1 && ngram_size <= discounts.max_order());
        Self {
            discounts,
            vocab_size: vocab_size.max(1),
            ngram_size,
            modified,
        }
    }

    #[inline]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    #[inline]
    pub fn ngram_size(&self) -> usize {
        self.ngram_size
    }

    /// Order-0 distribution
    #[inline]
    pub fn uniform(&self) -> f64 {
        1.0 / self.vocab_size as f64
    }

    /// `p_i` from `p_{i-1}` and the counts of order `order`
    pub fn interpolate(&self, order: usize, counts: &OrderCounts, lower: f64) -> f64 {
        if counts.denominator == 0 {
            if counts.numerator > 0 {
                debug!(
                    "count anomaly: order {} numerator {} with zero denominator, backing off",
                    order, counts.numerator
                );
            }
            return lower;
        }

        let discounts = self.discounts.for_order(order, self.ngram_size);
        let c = counts.numerator as f64;
        let direct = (c - discounts.for_count(c, self.modified)).max(0.0);
        let mass = discounts.backoff_mass(
            counts.n1 as f64,
            counts.n2 as f64,
            counts.n3_plus as f64,
            self.modified,
        );
        (direct + mass * lower) / counts.denominator as f64
    }

    /// Probability of the ladder's target; `ladder[i]` holds order `i + 1`
    pub fn probability(&self, ladder: &[OrderCounts]) -> f64 {
        ladder
            .iter()
            .enumerate()
            .fold(self.uniform(), |p, (i, counts)| {
                self.interpolate(i + 1, counts, p)
            })
    }

    /// Backoff weight `gamma(u)` of an order, 1 when the context is unseen
    pub fn gamma(&self, order: usize, counts: &OrderCounts) -> f64 {
        if counts.denominator == 0 {
            return 1.0;
        }
        let discounts = self.discounts.for_order(order, self.ngram_size);
        discounts.backoff_mass(
            counts.n1 as f64,
            counts.n2 as f64,
            counts.n3_plus as f64,
            self.modified,
        ) / counts.denominator as f64
    }
}
