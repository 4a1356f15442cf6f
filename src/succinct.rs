//! Succinct building blocks for the suffix index
//!
//! - **RankBitVector**: plain bit vector with a per-word cumulative popcount
//!   directory, giving O(1) `rank1`/`rank0`
//! - **WaveletMatrix**: rank/access over an integer alphabet, plus enumeration
//!   of the distinct symbols inside a position range in O(d log σ)
//!
//! The wavelet matrix is what lets a single suffix array answer left-extension
//! questions: built over the BWT, the distinct symbols inside a suffix-array
//! range are exactly the distinct tokens that precede the matched pattern.

/// Bit vector with constant-time rank support
#[derive(Debug, Clone, Default)]
pub struct RankBitVector {
    words: Vec<u64>,
    /// `ranks[w]` = number of set bits in `words[..w]`
    ranks: Vec<u32>,
    len: usize,
}

impl RankBitVector {
    /// Build from a bit iterator
    pub fn from_bits<I: IntoIterator<Item = bool>>(bits: I) -> Self {
        let mut words: Vec<u64> = Vec::new();
        let mut len = 0usize;
        for bit in bits {
            if len % 64 == 0 {
                words.push(0);
            }
            if bit {
                let last = words.len() - 1;
                words[last] |= 1u64 << (len % 64);
            }
            len += 1;
        }

        let mut ranks = Vec::with_capacity(words.len() + 1);
        let mut acc = 0u32;
        ranks.push(0);
        for w in &words {
            acc += w.count_ones();
            ranks.push(acc);
        }

        Self { words, ranks, len }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bit at position `i`
    #[inline]
    pub fn get(&self, i: usize) -> bool {
        debug_assert!(i < self.len);
        (self.words[i / 64] >> (i % 64)) & 1 == 1
    }

    /// Number of set bits in `[0, i)`
    #[inline]
    pub fn rank1(&self, i: usize) -> usize {
        debug_assert!(i <= self.len);
        let word = i / 64;
        let offset = i % 64;
        let mut r = self.ranks[word] as usize;
        if offset > 0 {
            let mask = (1u64 << offset) - 1;
            r += (self.words[word] & mask).count_ones() as usize;
        }
        r
    }

    /// Number of clear bits in `[0, i)`
    #[inline]
    pub fn rank0(&self, i: usize) -> usize {
        i - self.rank1(i)
    }

    /// Total number of set bits
    pub fn count_ones(&self) -> usize {
        self.ranks.last().copied().unwrap_or(0) as usize
    }
}

/// Wavelet matrix over `u32` symbols
#[derive(Debug, Clone, Default)]
pub struct WaveletMatrix {
    len: usize,
    bits: u32,
    levels: Vec<RankBitVector>,
    /// Number of zero bits per level (start of the "ones" half)
    zeros: Vec<usize>,
}

impl WaveletMatrix {
    /// Build from a symbol sequence
    pub fn new(values: &[u32]) -> Self {
        let max = values.iter().copied().max().unwrap_or(0);
        let bits = (u32::BITS - max.leading_zeros()).max(1);

        let mut levels = Vec::with_capacity(bits as usize);
        let mut zeros = Vec::with_capacity(bits as usize);
        let mut current = values.to_vec();
        let mut next_zeros = Vec::with_capacity(values.len());
        let mut next_ones = Vec::with_capacity(values.len());

        for level in 0..bits {
            let shift = bits - 1 - level;
            let bv = RankBitVector::from_bits(current.iter().map(|&v| (v >> shift) & 1 == 1));

            next_zeros.clear();
            next_ones.clear();
            for &v in &current {
                if (v >> shift) & 1 == 1 {
                    next_ones.push(v);
                } else {
                    next_zeros.push(v);
                }
            }
            zeros.push(next_zeros.len());
            levels.push(bv);

            current.clear();
            current.extend_from_slice(&next_zeros);
            current.extend_from_slice(&next_ones);
        }

        Self {
            len: values.len(),
            bits,
            levels,
            zeros,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Symbol at position `i`
    pub fn access(&self, mut i: usize) -> u32 {
        let mut value = 0u32;
        for (level, bv) in self.levels.iter().enumerate() {
            let shift = self.bits - 1 - level as u32;
            if bv.get(i) {
                value |= 1 << shift;
                i = self.zeros[level] + bv.rank1(i);
            } else {
                i = bv.rank0(i);
            }
        }
        value
    }

    /// Occurrences of `symbol` in `[0, i)`
    pub fn rank(&self, symbol: u32, i: usize) -> usize {
        if self.bits < u32::BITS && symbol >> self.bits != 0 {
            return 0;
        }
        let (mut s, mut e) = (0usize, i);
        for (level, bv) in self.levels.iter().enumerate() {
            let shift = self.bits - 1 - level as u32;
            if (symbol >> shift) & 1 == 1 {
                s = self.zeros[level] + bv.rank1(s);
                e = self.zeros[level] + bv.rank1(e);
            } else {
                s = bv.rank0(s);
                e = bv.rank0(e);
            }
        }
        e - s
    }

    /// Visit every distinct symbol in `[lb, rb)` with its frequency, in
    /// ascending symbol order.
    pub fn for_each_symbol<F: FnMut(u32, usize)>(&self, lb: usize, rb: usize, mut visit: F) {
        debug_assert!(lb <= rb && rb <= self.len);
        if lb < rb {
            self.descend(0, lb, rb, 0, &mut visit);
        }
    }

    fn descend<F: FnMut(u32, usize)>(&self, level: usize, s: usize, e: usize, prefix: u32, visit: &mut F) {
        if level == self.levels.len() {
            visit(prefix, e - s);
            return;
        }
        let bv = &self.levels[level];
        let shift = self.bits - 1 - level as u32;

        let (s0, e0) = (bv.rank0(s), bv.rank0(e));
        if s0 < e0 {
            self.descend(level + 1, s0, e0, prefix, visit);
        }
        let z = self.zeros[level];
        let (s1, e1) = (z + bv.rank1(s), z + bv.rank1(e));
        if s1 < e1 {
            self.descend(level + 1, s1, e1, prefix | (1 << shift), visit);
        }
    }

    /// Number of distinct symbols in `[lb, rb)`, not counting `skip`
    pub fn distinct_in_range(&self, lb: usize, rb: usize, skip: u32) -> usize {
        let mut n = 0;
        self.for_each_symbol(lb, rb, |symbol, _| {
            if symbol != skip {
                n += 1;
            }
        });
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_bitvector_basic() {
        let bits: Vec<bool> = (0..200).map(|i| i % 3 == 0).collect();
        let bv = RankBitVector::from_bits(bits.iter().copied());

        assert_eq!(bv.len(), 200);
        for i in 0..=200 {
            let expected = bits[..i].iter().filter(|&&b| b).count();
            assert_eq!(bv.rank1(i), expected, "rank1({})", i);
            assert_eq!(bv.rank0(i), i - expected);
        }
        assert_eq!(bv.count_ones(), bits.iter().filter(|&&b| b).count());
    }

    #[test]
    fn test_rank_bitvector_word_boundary() {
        let bv = RankBitVector::from_bits(std::iter::repeat(true).take(128));
        assert_eq!(bv.rank1(64), 64);
        assert_eq!(bv.rank1(128), 128);
        assert!(bv.get(127));
    }

    #[test]
    fn test_rank_bitvector_empty() {
        let bv = RankBitVector::from_bits(std::iter::empty());
        assert!(bv.is_empty());
        assert_eq!(bv.rank1(0), 0);
    }

    #[test]
    fn test_wavelet_access_and_rank() {
        let values = vec![3u32, 0, 7, 3, 1, 0, 5, 3, 2, 7];
        let wm = WaveletMatrix::new(&values);

        for (i, &v) in values.iter().enumerate() {
            assert_eq!(wm.access(i), v);
        }
        for symbol in 0..9u32 {
            for i in 0..=values.len() {
                let expected = values[..i].iter().filter(|&&v| v == symbol).count();
                assert_eq!(wm.rank(symbol, i), expected, "rank({}, {})", symbol, i);
            }
        }
    }

    #[test]
    fn test_wavelet_distinct_symbols() {
        let values = vec![4u32, 4, 1, 0, 9, 1, 4, 0];
        let wm = WaveletMatrix::new(&values);

        let mut seen = Vec::new();
        wm.for_each_symbol(1, 7, |s, c| seen.push((s, c)));
        assert_eq!(seen, vec![(0, 1), (1, 2), (4, 2), (9, 1)]);

        assert_eq!(wm.distinct_in_range(0, 8, u32::MAX), 4);
        assert_eq!(wm.distinct_in_range(0, 8, 0), 3);
        assert_eq!(wm.distinct_in_range(3, 3, 0), 0);
    }
}
