//! Count oracles: the statistics Kneser-Ney needs, read from suffix indexes
//!
//! For a context `u` and target `w` an oracle produces either
//!
//! - **raw** counts: `c(u·w)` over `Σ c(u·w')`, or
//! - **continuation** counts: `N1+(·u·w)` over the front-back count
//!   `N1+(·u·) = Σ N1+(·u·w')`,
//!
//! plus how many extensions `w'` fall into the count buckets 1, 2 and 3+.
//!
//! Two strategies answer the left-extension question `N1+(· P)`:
//! [`SingleIndexOracle`] reads it from the BWT of the forward index alone,
//! [`DualIndexOracle`] descends the reverse index and takes its degree.
//! Both must return identical counts.

use crate::suffix_index::{IndexNode, SuccinctIndexAdapter};
use crate::{Token, PAT_START_SYM};
use smallvec::SmallVec;
use std::sync::OnceLock;

/// Which statistic an order is estimated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountKind {
    #[default]
    Raw,
    Continuation,
}

impl CountKind {
    /// Raw counts at the highest order of a model larger than a unigram, and
    /// for any context anchored at the sequence start; continuation counts
    /// everywhere else.
    pub fn select(order: usize, ngram_size: usize, context: &[Token]) -> Self {
        if (order == ngram_size && ngram_size != 1) || context.first() == Some(&PAT_START_SYM) {
            Self::Raw
        } else {
            Self::Continuation
        }
    }
}

/// Counts for one order of the ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrderCounts {
    pub kind: CountKind,
    /// Count of `u·w`
    pub numerator: u64,
    /// Sum of the counts of every `u·w'`
    pub denominator: u64,
    /// Extensions `w'` with count exactly 1
    pub n1: u64,
    /// Extensions `w'` with count exactly 2
    pub n2: u64,
    /// Extensions `w'` with count 3 or more
    pub n3_plus: u64,
}

impl OrderCounts {
    pub fn empty(kind: CountKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    #[inline]
    fn add_extension(&mut self, count: u64) {
        self.denominator += count;
        match count {
            0 => {}
            1 => self.n1 += 1,
            2 => self.n2 += 1,
            _ => self.n3_plus += 1,
        }
    }

    /// Number of extensions with a nonzero count
    #[inline]
    pub fn n1_plus(&self) -> u64 {
        self.n1 + self.n2 + self.n3_plus
    }
}

type PatternBuf = SmallVec<[Token; 8]>;

/// Source of exact and continuation counts over a corpus
pub trait ContinuationCountOracle: Send + Sync {
    type Index: SuccinctIndexAdapter;

    /// The forward index every strategy navigates
    fn forward(&self) -> &Self::Index;

    /// `N1+(· pattern)`: distinct tokens preceding `pattern`, whose forward
    /// node is `node`
    fn left_extensions(&self, pattern: &[Token], node: &IndexNode) -> u64;

    /// Continuation summary of the empty context, computed once
    fn root_continuation(&self) -> &OrderCounts;

    fn locate(&self, pattern: &[Token]) -> Option<IndexNode> {
        self.forward().locate(pattern)
    }

    /// Exact occurrence count of `pattern`
    fn count(&self, pattern: &[Token]) -> u64 {
        self.locate(pattern).map_or(0, |n| n.count())
    }

    /// `N1+(· pattern)`
    fn continuation_count(&self, pattern: &[Token]) -> u64 {
        self.locate(pattern)
            .map_or(0, |n| self.left_extensions(pattern, &n))
    }

    /// `N1+(· pattern ·)`
    fn front_back_count(&self, pattern: &[Token]) -> u64 {
        let node = self.locate(pattern);
        self.continuation_summary(pattern, node.as_ref(), None)
            .denominator
    }

    /// Raw counts of every extension of the context at `context_node`
    fn raw_counts(&self, context_node: Option<&IndexNode>, target: Token) -> OrderCounts {
        let mut counts = OrderCounts::empty(CountKind::Raw);
        let Some(node) = context_node else {
            return counts;
        };
        self.forward().for_each_child(node, |w, child| {
            let c = child.count();
            if w == target {
                counts.numerator = c;
            }
            counts.add_extension(c);
        });
        counts
    }

    /// Continuation counts of every extension of `context`, enumerated from
    /// the forward node. `target`'s count becomes the numerator.
    fn continuation_summary(
        &self,
        context: &[Token],
        context_node: Option<&IndexNode>,
        target: Option<Token>,
    ) -> OrderCounts {
        let mut counts = OrderCounts::empty(CountKind::Continuation);
        let Some(node) = context_node else {
            return counts;
        };
        let mut pattern: PatternBuf = context.iter().copied().collect();
        pattern.push(0);
        let last = pattern.len() - 1;
        self.forward().for_each_child(node, |w, child| {
            pattern[last] = w;
            let k = self.left_extensions(&pattern, &child);
            if Some(w) == target {
                counts.numerator = k;
            }
            counts.add_extension(k);
        });
        counts
    }

    /// Continuation counts for `context · target`; the empty context reuses
    /// the cached root summary
    fn continuation_counts(
        &self,
        context: &[Token],
        context_node: Option<&IndexNode>,
        target: Token,
    ) -> OrderCounts {
        if context.is_empty() {
            let mut counts = *self.root_continuation();
            counts.numerator = self.continuation_count(&[target]);
            return counts;
        }
        self.continuation_summary(context, context_node, Some(target))
    }

    fn order_counts(
        &self,
        kind: CountKind,
        context: &[Token],
        context_node: Option<&IndexNode>,
        target: Token,
    ) -> OrderCounts {
        match kind {
            CountKind::Raw => self.raw_counts(context_node, target),
            CountKind::Continuation => self.continuation_counts(context, context_node, target),
        }
    }
}

/// Fill `ladder` with the counts of orders `1..=window.len()`, where the last
/// token of `window` is the target. Every context is located from the root.
pub fn count_ladder<O: ContinuationCountOracle + ?Sized>(
    oracle: &O,
    window: &[Token],
    ngram_size: usize,
    ladder: &mut Vec<OrderCounts>,
) {
    ladder.clear();
    let Some((&target, history)) = window.split_last() else {
        return;
    };
    for order in 1..=window.len() {
        let context = &history[history.len() + 1 - order..];
        let node = oracle.locate(context);
        let kind = CountKind::select(order, ngram_size, context);
        ladder.push(oracle.order_counts(kind, context, node.as_ref(), target));
    }
}

/// Forward index only: left extensions are the distinct BWT symbols inside
/// the matched suffix-array range
pub struct SingleIndexOracle<'a, A: SuccinctIndexAdapter> {
    forward: &'a A,
    root: OnceLock<OrderCounts>,
}

impl<'a, A: SuccinctIndexAdapter> SingleIndexOracle<'a, A> {
    pub fn new(forward: &'a A) -> Self {
        Self {
            forward,
            root: OnceLock::new(),
        }
    }
}

impl<'a, A: SuccinctIndexAdapter> ContinuationCountOracle for SingleIndexOracle<'a, A> {
    type Index = A;

    fn forward(&self) -> &A {
        self.forward
    }

    #[inline]
    fn left_extensions(&self, _pattern: &[Token], node: &IndexNode) -> u64 {
        self.forward.left_degree(node)
    }

    fn root_continuation(&self) -> &OrderCounts {
        self.root.get_or_init(|| {
            let root = self.forward.root();
            self.continuation_summary(&[], Some(&root), None)
        })
    }
}

/// Forward + reverse index: a left extension of `P` is a right extension of
/// `reverse(P)` in the reverse index
pub struct DualIndexOracle<'a, A: SuccinctIndexAdapter> {
    forward: &'a A,
    reverse: &'a A,
    root: OnceLock<OrderCounts>,
}

impl<'a, A: SuccinctIndexAdapter> DualIndexOracle<'a, A> {
    pub fn new(forward: &'a A, reverse: &'a A) -> Self {
        Self {
            forward,
            reverse,
            root: OnceLock::new(),
        }
    }

    /// Node of `reverse(pattern)` in the reverse index
    pub fn locate_reverse(&self, pattern: &[Token]) -> Option<IndexNode> {
        pattern
            .iter()
            .rev()
            .try_fold(self.reverse.root(), |node, &t| self.reverse.extend(&node, t))
    }
}

impl<'a, A: SuccinctIndexAdapter> ContinuationCountOracle for DualIndexOracle<'a, A> {
    type Index = A;

    fn forward(&self) -> &A {
        self.forward
    }

    fn left_extensions(&self, pattern: &[Token], node: &IndexNode) -> u64 {
        match self.locate_reverse(pattern) {
            Some(rev) => {
                debug_assert_eq!(rev.count(), node.count());
                self.reverse.degree(&rev)
            }
            None => 0,
        }
    }

    fn root_continuation(&self) -> &OrderCounts {
        self.root.get_or_init(|| {
            let root = self.forward.root();
            self.continuation_summary(&[], Some(&root), None)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suffix_index::SuffixIndex;
    use crate::PAT_END_SYM;

    const A: Token = 3;
    const B: Token = 4;
    const C: Token = 5;

    fn abab() -> (SuffixIndex, SuffixIndex) {
        let text = vec![A, B, A, B, C];
        let reverse: Vec<Token> = text.iter().rev().copied().collect();
        (
            SuffixIndex::build(text).unwrap(),
            SuffixIndex::build(reverse).unwrap(),
        )
    }

    #[test]
    fn test_count_kind_selection() {
        assert_eq!(CountKind::select(3, 3, &[A, B]), CountKind::Raw);
        assert_eq!(CountKind::select(2, 3, &[A]), CountKind::Continuation);
        assert_eq!(CountKind::select(2, 3, &[PAT_START_SYM]), CountKind::Raw);
        assert_eq!(CountKind::select(1, 1, &[]), CountKind::Continuation);
        assert_eq!(CountKind::select(1, 3, &[]), CountKind::Continuation);
    }

    #[test]
    fn test_single_index_counts() {
        let (fwd, _) = abab();
        let oracle = SingleIndexOracle::new(&fwd);

        assert_eq!(oracle.count(&[A, B]), 2);
        assert_eq!(oracle.count(&[B, C]), 1);
        assert_eq!(oracle.count(&[C, A]), 0);
        // A is preceded only by B; the corpus-initial A has no predecessor
        assert_eq!(oracle.continuation_count(&[A]), 1);
        assert_eq!(oracle.continuation_count(&[B]), 1);
        // distinct bigrams AB, BA, BC
        assert_eq!(oracle.front_back_count(&[]), 3);
        // x B y: A B A, A B C
        assert_eq!(oracle.front_back_count(&[B]), 2);
    }

    #[test]
    fn test_dual_matches_single() {
        let (fwd, rev) = abab();
        let single = SingleIndexOracle::new(&fwd);
        let dual = DualIndexOracle::new(&fwd, &rev);

        for pattern in [
            vec![],
            vec![A],
            vec![B],
            vec![C],
            vec![A, B],
            vec![B, A],
            vec![B, C],
            vec![A, B, A],
        ] {
            assert_eq!(
                single.continuation_count(&pattern),
                dual.continuation_count(&pattern),
                "N1+(· {:?})",
                pattern
            );
            assert_eq!(
                single.front_back_count(&pattern),
                dual.front_back_count(&pattern),
                "N1+(· {:?} ·)",
                pattern
            );
        }
    }

    #[test]
    fn test_raw_counts_buckets() {
        let (fwd, _) = abab();
        let oracle = SingleIndexOracle::new(&fwd);

        let node = oracle.locate(&[A]);
        let counts = oracle.raw_counts(node.as_ref(), B);
        assert_eq!(counts.numerator, 2);
        assert_eq!(counts.denominator, 2);
        assert_eq!((counts.n1, counts.n2, counts.n3_plus), (0, 1, 0));

        let node = oracle.locate(&[B]);
        let counts = oracle.raw_counts(node.as_ref(), PAT_END_SYM);
        assert_eq!(counts.numerator, 0);
        assert_eq!(counts.denominator, 2);
        assert_eq!(counts.n1_plus(), 2);
    }

    #[test]
    fn test_unseen_context_is_empty() {
        let (fwd, rev) = abab();
        let oracle = DualIndexOracle::new(&fwd, &rev);
        let node = oracle.locate(&[C, C]);
        assert!(node.is_none());
        assert_eq!(
            oracle.continuation_counts(&[C, C], node.as_ref(), A),
            OrderCounts::empty(CountKind::Continuation)
        );
        assert_eq!(oracle.raw_counts(None, A), OrderCounts::empty(CountKind::Raw));
    }

    #[test]
    fn test_count_ladder_orders() {
        let (fwd, _) = abab();
        let oracle = SingleIndexOracle::new(&fwd);
        let mut ladder = Vec::new();

        count_ladder(&oracle, &[A, B], 2, &mut ladder);
        assert_eq!(ladder.len(), 2);
        assert_eq!(ladder[0].kind, CountKind::Continuation);
        assert_eq!(ladder[0].numerator, 1);
        assert_eq!(ladder[0].denominator, 3);
        assert_eq!(ladder[1].kind, CountKind::Raw);
        assert_eq!(ladder[1].numerator, 2);

        count_ladder(&oracle, &[], 2, &mut ladder);
        assert!(ladder.is_empty());
    }
}
