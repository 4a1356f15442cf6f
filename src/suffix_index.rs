//! Suffix index over one token sequence
//!
//! A node is a half-open range `[lb, rb)` of the suffix array together with
//! the length of the matched pattern. Every suffix in the range starts with
//! that pattern, so
//!
//! ```text
//! count  = rb - lb
//! degree = distinct T[SA[k] + depth]  for k in [lb, rb)
//! left   = distinct T[SA[k] - 1]      for k in [lb, rb)   (BWT, wavelet matrix)
//! ```
//!
//! The same type serves the forward and the reverse corpus; a right extension
//! on the reverse index is a left extension on the forward one.

use crate::succinct::WaveletMatrix;
use crate::{KnmError, Result, Token};

/// BWT marker for the suffix that starts at text position 0
const NO_PREDECESSOR: u32 = 0;

/// BWT symbols are shifted by one, so the top id has no encoding
const MAX_TOKEN: Token = u32::MAX - 1;

/// Suffix-array range matched by a pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexNode {
    lb: usize,
    rb: usize,
    depth: usize,
}

impl IndexNode {
    /// Left bound (inclusive)
    #[inline]
    pub fn lb(&self) -> usize {
        self.lb
    }

    /// Right bound (exclusive)
    #[inline]
    pub fn rb(&self) -> usize {
        self.rb
    }

    /// Length of the matched pattern
    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Occurrences of the matched pattern
    #[inline]
    pub fn count(&self) -> u64 {
        (self.rb - self.lb) as u64
    }
}

/// Read-only navigation over one compressed full-text index.
///
/// Pattern absence is `None`, never an error: most high-order n-grams of
/// held-out text are unseen.
pub trait SuccinctIndexAdapter: Send + Sync {
    /// Node of the empty pattern
    fn root(&self) -> IndexNode;

    /// Node of `pattern · token`, or `None` if that never occurs
    fn extend(&self, node: &IndexNode, token: Token) -> Option<IndexNode>;

    /// Visit each distinct one-token right extension in token order
    fn for_each_child<F: FnMut(Token, IndexNode)>(&self, node: &IndexNode, visit: F);

    /// Number of distinct tokens preceding the matched pattern
    fn left_degree(&self, node: &IndexNode) -> u64;

    #[inline]
    fn count(&self, node: &IndexNode) -> u64 {
        node.count()
    }

    /// Number of distinct one-token right extensions
    fn degree(&self, node: &IndexNode) -> u64 {
        let mut n = 0;
        self.for_each_child(node, |_, _| n += 1);
        n
    }

    fn children(&self, node: &IndexNode) -> Vec<(Token, IndexNode)> {
        let mut out = Vec::new();
        self.for_each_child(node, |t, child| out.push((t, child)));
        out
    }

    /// Top-down descent from the root
    fn locate(&self, pattern: &[Token]) -> Option<IndexNode> {
        pattern
            .iter()
            .try_fold(self.root(), |node, &t| self.extend(&node, t))
    }
}

/// Suffix array + BWT wavelet matrix over a token sequence
#[derive(Debug, Clone)]
pub struct SuffixIndex {
    text: Vec<Token>,
    sa: Vec<u32>,
    bwt: WaveletMatrix,
}

impl SuffixIndex {
    /// Build the suffix array and BWT for `text`
    pub fn build(text: Vec<Token>) -> Result<Self> {
        if text.len() >= u32::MAX as usize {
            return Err(KnmError::Configuration(format!(
                "corpus of {} tokens exceeds the 32-bit suffix array limit",
                text.len()
            )));
        }
        if let Some(pos) = text.iter().position(|&t| t > MAX_TOKEN) {
            return Err(KnmError::Configuration(format!(
                "token id {} at position {} is reserved",
                text[pos], pos
            )));
        }
        let sa = build_suffix_array(&text);
        Ok(Self::assemble(text, sa))
    }

    /// Reassemble from persisted parts, validating the suffix array
    pub fn from_parts(text: Vec<Token>, sa: Vec<u32>) -> Result<Self> {
        if text.len() != sa.len() {
            return Err(KnmError::Load(format!(
                "suffix array length {} does not match text length {}",
                sa.len(),
                text.len()
            )));
        }
        let mut seen = vec![false; sa.len()];
        for &p in &sa {
            match seen.get_mut(p as usize) {
                Some(slot) if !*slot => *slot = true,
                _ => {
                    return Err(KnmError::Load(
                        "suffix array is not a permutation of text positions".to_string(),
                    ))
                }
            }
        }
        if text.iter().any(|&t| t > MAX_TOKEN) {
            return Err(KnmError::Load("text holds a reserved token id".to_string()));
        }
        // Suffixes must at least be grouped by their first token
        if let Some(k) = sa
            .windows(2)
            .position(|w| text[w[0] as usize] > text[w[1] as usize])
        {
            return Err(KnmError::Load(format!(
                "suffix array out of order at rank {}",
                k + 1
            )));
        }
        Ok(Self::assemble(text, sa))
    }

    fn assemble(text: Vec<Token>, sa: Vec<u32>) -> Self {
        let bwt_symbols: Vec<u32> = sa
            .iter()
            .map(|&p| match p {
                0 => NO_PREDECESSOR,
                p => text[p as usize - 1] + 1,
            })
            .collect();
        let bwt = WaveletMatrix::new(&bwt_symbols);
        Self { text, sa, bwt }
    }

    /// Corpus length in tokens
    #[inline]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn text(&self) -> &[Token] {
        &self.text
    }

    pub fn suffix_array(&self) -> &[u32] {
        &self.sa
    }

    /// Token following the first `depth` tokens of suffix `pos`
    #[inline]
    fn symbol_after(&self, pos: u32, depth: usize) -> Option<Token> {
        self.text.get(pos as usize + depth).copied()
    }

    /// End of the run of suffixes in `[from, rb)` whose symbol at `depth` is
    /// at most `bound`
    #[inline]
    fn run_end(&self, from: usize, rb: usize, depth: usize, bound: Option<Token>) -> usize {
        from + self.sa[from..rb].partition_point(|&p| self.symbol_after(p, depth) <= bound)
    }
}

impl SuccinctIndexAdapter for SuffixIndex {
    fn root(&self) -> IndexNode {
        IndexNode {
            lb: 0,
            rb: self.sa.len(),
            depth: 0,
        }
    }

    fn extend(&self, node: &IndexNode, token: Token) -> Option<IndexNode> {
        let depth = node.depth;
        let range = &self.sa[node.lb..node.rb];
        let lo = node.lb + range.partition_point(|&p| self.symbol_after(p, depth) < Some(token));
        let hi = self.run_end(lo, node.rb, depth, Some(token));
        (lo < hi).then_some(IndexNode {
            lb: lo,
            rb: hi,
            depth: depth + 1,
        })
    }

    fn for_each_child<F: FnMut(Token, IndexNode)>(&self, node: &IndexNode, mut visit: F) {
        let depth = node.depth;
        let mut k = node.lb;
        // The suffix equal to the pattern itself (if any) sorts first
        if k < node.rb && self.symbol_after(self.sa[k], depth).is_none() {
            k += 1;
        }
        while k < node.rb {
            let Some(symbol) = self.symbol_after(self.sa[k], depth) else {
                break;
            };
            let end = self.run_end(k, node.rb, depth, Some(symbol));
            visit(
                symbol,
                IndexNode {
                    lb: k,
                    rb: end,
                    depth: depth + 1,
                },
            );
            k = end;
        }
    }

    fn left_degree(&self, node: &IndexNode) -> u64 {
        self.bwt.distinct_in_range(node.lb, node.rb, NO_PREDECESSOR) as u64
    }
}

/// Prefix-doubling suffix array construction, O(n log² n).
///
/// Ranks are 1-based so that 0 marks "past the end"; a suffix that is a
/// proper prefix of another therefore sorts first.
fn build_suffix_array(text: &[Token]) -> Vec<u32> {
    let n = text.len();
    if n == 0 {
        return Vec::new();
    }

    let mut sa: Vec<usize> = (0..n).collect();
    let mut rank: Vec<usize> = text.iter().map(|&t| t as usize + 1).collect();
    let mut next = vec![0usize; n];
    let mut gap = 1usize;

    loop {
        let key = |rank: &[usize], i: usize| (rank[i], rank.get(i + gap).copied().unwrap_or(0));
        sa.sort_unstable_by_key(|&i| key(&rank, i));

        next[sa[0]] = 1;
        for w in 1..n {
            let differs = key(&rank, sa[w - 1]) != key(&rank, sa[w]);
            next[sa[w]] = next[sa[w - 1]] + differs as usize;
        }
        std::mem::swap(&mut rank, &mut next);

        if rank[sa[n - 1]] == n || gap >= n {
            break;
        }
        gap *= 2;
    }

    sa.into_iter().map(|i| i as u32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn naive_count(text: &[Token], pattern: &[Token]) -> u64 {
        if pattern.is_empty() {
            return text.len() as u64;
        }
        text.windows(pattern.len()).filter(|w| *w == pattern).count() as u64
    }

    #[test]
    fn test_suffix_array_sorted() {
        let text = vec![3, 4, 3, 4, 5];
        let idx = SuffixIndex::build(text.clone()).unwrap();
        let sa = idx.suffix_array();
        for w in sa.windows(2) {
            assert!(text[w[0] as usize..] < text[w[1] as usize..]);
        }
        assert_eq!(sa, &[0, 2, 1, 3, 4]);
    }

    #[test]
    fn test_extend_counts() {
        let text = vec![3, 4, 3, 4, 5];
        let idx = SuffixIndex::build(text.clone()).unwrap();

        for pattern in [vec![3], vec![3, 4], vec![4, 3], vec![4, 5], vec![3, 4, 3, 4, 5]] {
            let node = idx.locate(&pattern).unwrap();
            assert_eq!(idx.count(&node), naive_count(&text, &pattern), "{:?}", pattern);
            assert_eq!(node.depth(), pattern.len());
        }
        assert!(idx.locate(&[5, 3]).is_none());
        assert!(idx.locate(&[9]).is_none());
    }

    #[test]
    fn test_root_node() {
        let idx = SuffixIndex::build(vec![7, 7, 7]).unwrap();
        let root = idx.root();
        assert_eq!(root.depth(), 0);
        assert_eq!(idx.count(&root), 3);
        assert_eq!(idx.degree(&root), 1);
    }

    #[test]
    fn test_degree_and_children() {
        let text = vec![3, 4, 3, 4, 5];
        let idx = SuffixIndex::build(text).unwrap();

        let b = idx.locate(&[4]).unwrap();
        let children = idx.children(&b);
        let tokens: Vec<Token> = children.iter().map(|(t, _)| *t).collect();
        assert_eq!(tokens, vec![3, 5]);
        assert_eq!(idx.degree(&b), 2);

        // Pattern at the corpus end has no continuation there
        let c = idx.locate(&[5]).unwrap();
        assert_eq!(idx.degree(&c), 0);
        assert!(idx.children(&c).is_empty());
    }

    #[test]
    fn test_left_degree_matches_brute_force() {
        let text = vec![3, 4, 3, 4, 5, 4, 4];
        let idx = SuffixIndex::build(text.clone()).unwrap();

        for pattern in [vec![4], vec![3], vec![3, 4], vec![4, 4], vec![5]] {
            let node = idx.locate(&pattern).unwrap();
            let expected: HashSet<Token> = (1..text.len())
                .filter(|&i| text[i..].starts_with(&pattern))
                .map(|i| text[i - 1])
                .collect();
            assert_eq!(idx.left_degree(&node), expected.len() as u64, "{:?}", pattern);
        }
    }

    #[test]
    fn test_from_parts_rejects_bad_suffix_array() {
        assert!(SuffixIndex::from_parts(vec![3, 4], vec![0]).is_err());
        assert!(SuffixIndex::from_parts(vec![3, 4], vec![0, 0]).is_err());
        assert!(SuffixIndex::from_parts(vec![3, 4], vec![0, 5]).is_err());

        let built = SuffixIndex::build(vec![3, 4, 3]).unwrap();
        let restored =
            SuffixIndex::from_parts(built.text().to_vec(), built.suffix_array().to_vec()).unwrap();
        assert_eq!(restored.locate(&[3]).map(|n| n.count()), Some(2));
    }

    #[test]
    fn test_rejects_reserved_token() {
        assert!(matches!(
            SuffixIndex::build(vec![u32::MAX, 3, u32::MAX]),
            Err(KnmError::Configuration(_))
        ));
        assert!(matches!(
            SuffixIndex::from_parts(vec![u32::MAX, 3], vec![1, 0]),
            Err(KnmError::Load(_))
        ));

        let idx = SuffixIndex::build(vec![MAX_TOKEN, 3, MAX_TOKEN]).unwrap();
        let node = idx.locate(&[MAX_TOKEN]).unwrap();
        assert_eq!(idx.left_degree(&node), 1);
    }

    #[test]
    fn test_from_parts_rejects_unsorted_suffix_array() {
        let built = SuffixIndex::build(vec![3, 4, 3, 4, 5]).unwrap();
        let mut sa = built.suffix_array().to_vec();
        sa.reverse();
        assert!(matches!(
            SuffixIndex::from_parts(built.text().to_vec(), sa),
            Err(KnmError::Load(_))
        ));
    }

    #[test]
    fn test_empty_text() {
        let idx = SuffixIndex::build(Vec::new()).unwrap();
        assert!(idx.is_empty());
        assert_eq!(idx.count(&idx.root()), 0);
        assert!(idx.extend(&idx.root(), 3).is_none());
    }
}
