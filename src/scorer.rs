//! Sentence scoring and corpus perplexity
//!
//! Three strategies compute the same probabilities:
//!
//! | Strategy | Indexes | Per token |
//! |---|---|---|
//! | `Incremental` | forward | extend the stored context nodes by one step |
//! | `SingleIndex` | forward | re-descend every context of the window |
//! | `DualIndex` | forward + reverse | re-descend, left extensions from the reverse index |
//!
//! Batch scoring fans sentences out over rayon workers; each owns its query
//! state and the per-sentence totals are reduced afterwards.

use crate::estimator::KneserNeyEstimator;
use crate::model_index::LanguageModelIndex;
use crate::oracle::{count_ladder, ContinuationCountOracle, DualIndexOracle, SingleIndexOracle};
use crate::query_state::IncrementalQueryState;
use crate::suffix_index::SuffixIndex;
use crate::{KnmError, Result, Token, PAT_END_SYM, PAT_START_SYM};
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// How counts are obtained while scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryStrategy {
    /// Forward index, context nodes carried from token to token
    Incremental,
    /// Forward index, every window recomputed from the root
    SingleIndex,
    /// Forward and reverse index, every window recomputed from the root
    DualIndex,
}

impl QueryStrategy {
    /// `fast_index` selects the forward-only strategies; the incremental one
    /// is used with Modified Kneser-Ney.
    pub fn select(fast_index: bool, modified_kn: bool) -> Self {
        match (fast_index, modified_kn) {
            (true, true) => Self::Incremental,
            (true, false) => Self::SingleIndex,
            (false, _) => Self::DualIndex,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Incremental => "incremental",
            Self::SingleIndex => "single-index",
            Self::DualIndex => "dual-index",
        }
    }
}

/// Scoring session parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Model order
    pub ngram_size: usize,
    /// Modified Kneser-Ney instead of plain Kneser-Ney
    pub modified_kn: bool,
    /// Forward index only
    pub fast_index: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            ngram_size: 1,
            modified_kn: false,
            fast_index: false,
        }
    }
}

impl ScoringConfig {
    pub fn strategy(&self) -> QueryStrategy {
        QueryStrategy::select(self.fast_index, self.modified_kn)
    }

    /// Check the config against what `index` can answer
    pub fn validate(&self, index: &LanguageModelIndex) -> Result<()> {
        self.validate_with(index, self.strategy())
    }

    fn validate_with(&self, index: &LanguageModelIndex, strategy: QueryStrategy) -> Result<()> {
        if self.ngram_size == 0 {
            return Err(KnmError::Configuration(
                "ngram size must be at least 1".to_string(),
            ));
        }
        let max_order = index.discounts().max_order();
        if self.ngram_size > max_order {
            return Err(KnmError::Configuration(format!(
                "ngram size {} exceeds the {} orders with discounts",
                self.ngram_size, max_order
            )));
        }
        if strategy == QueryStrategy::DualIndex && index.reverse().is_none() {
            return Err(KnmError::Configuration(
                "dual-index strategy needs a reverse index, rebuild with reverse or use the fast index"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Perplexity of a batch of sentences
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerplexityReport {
    pub sentences: usize,
    /// Tokens scored, one end sentinel per sentence included
    pub scored_tokens: usize,
    /// Total log10 probability
    pub log10_prob: f64,
    pub perplexity: f64,
    pub elapsed: Duration,
}

impl PerplexityReport {
    fn new(sentences: usize, scored_tokens: usize, log10_prob: f64, elapsed: Duration) -> Self {
        let perplexity = if scored_tokens == 0 {
            1.0
        } else {
            10f64.powf(-log10_prob / scored_tokens as f64)
        };
        Self {
            sentences,
            scored_tokens,
            log10_prob,
            perplexity,
            elapsed,
        }
    }
}

enum Backend<'a> {
    Incremental(SingleIndexOracle<'a, SuffixIndex>),
    Single(SingleIndexOracle<'a, SuffixIndex>),
    Dual(DualIndexOracle<'a, SuffixIndex>),
}

/// Scores token sequences against a shared index
pub struct SentenceScorer<'a> {
    index: &'a LanguageModelIndex,
    config: ScoringConfig,
    backend: Backend<'a>,
}

impl<'a> SentenceScorer<'a> {
    /// Scorer using the strategy implied by `config`
    pub fn new(index: &'a LanguageModelIndex, config: ScoringConfig) -> Result<Self> {
        Self::with_strategy(index, config, config.strategy())
    }

    /// Scorer with an explicit strategy
    pub fn with_strategy(
        index: &'a LanguageModelIndex,
        config: ScoringConfig,
        strategy: QueryStrategy,
    ) -> Result<Self> {
        config.validate_with(index, strategy)?;
        let forward = index.forward();
        let backend = match (strategy, index.reverse()) {
            (QueryStrategy::Incremental, _) => Backend::Incremental(SingleIndexOracle::new(forward)),
            (QueryStrategy::SingleIndex, _) => Backend::Single(SingleIndexOracle::new(forward)),
            (QueryStrategy::DualIndex, Some(reverse)) => {
                Backend::Dual(DualIndexOracle::new(forward, reverse))
            }
            (QueryStrategy::DualIndex, None) => {
                return Err(KnmError::Configuration(
                    "dual-index strategy needs a reverse index".to_string(),
                ))
            }
        };
        debug!(
            "scorer: order {} {} {}",
            config.ngram_size,
            if config.modified_kn { "MKN" } else { "KN" },
            strategy.name()
        );
        Ok(Self {
            index,
            config,
            backend,
        })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn strategy(&self) -> QueryStrategy {
        match self.backend {
            Backend::Incremental(_) => QueryStrategy::Incremental,
            Backend::Single(_) => QueryStrategy::SingleIndex,
            Backend::Dual(_) => QueryStrategy::DualIndex,
        }
    }

    pub fn estimator(&self) -> KneserNeyEstimator<'a> {
        KneserNeyEstimator::new(
            self.index.discounts(),
            self.index.vocab_size(),
            self.config.ngram_size,
            self.config.modified_kn,
        )
    }

    /// Log10 probability of a token sequence that already carries its
    /// sentinels. Start symbols are context only.
    pub fn score_sentence(&self, tokens: &[Token]) -> f64 {
        match &self.backend {
            Backend::Incremental(oracle) => {
                IncrementalQueryState::new(oracle, self.estimator()).score(tokens.iter().copied())
            }
            Backend::Single(oracle) => self.score_windows(oracle, tokens),
            Backend::Dual(oracle) => self.score_windows(oracle, tokens),
        }
    }

    /// Log10 probability of `<s> words </s>`
    pub fn score_words(&self, words: &[Token]) -> f64 {
        let mut bounded = Vec::with_capacity(words.len() + 2);
        bounded.push(PAT_START_SYM);
        bounded.extend_from_slice(words);
        bounded.push(PAT_END_SYM);
        self.score_sentence(&bounded)
    }

    /// Perplexity of one sentence over its words plus the end sentinel
    pub fn sentence_perplexity(&self, words: &[Token]) -> f64 {
        let m = (words.len() + 1) as f64;
        10f64.powf(-self.score_words(words) / m)
    }

    /// Score every sentence in parallel and reduce to a corpus perplexity
    pub fn corpus_perplexity(&self, sentences: &[Vec<Token>]) -> PerplexityReport {
        let start = Instant::now();
        let (log10_prob, scored_tokens) = sentences
            .par_iter()
            .map(|words| (self.score_words(words), words.len() + 1))
            .reduce(|| (0.0, 0), |a, b| (a.0 + b.0, a.1 + b.1));
        PerplexityReport::new(sentences.len(), scored_tokens, log10_prob, start.elapsed())
    }

    fn score_windows<O: ContinuationCountOracle>(&self, oracle: &O, tokens: &[Token]) -> f64 {
        let n = self.config.ngram_size;
        let estimator = self.estimator();
        let mut window: Vec<Token> = Vec::with_capacity(n + 1);
        let mut ladder = Vec::with_capacity(n);
        let mut total = 0.0;

        for &token in tokens {
            if token == PAT_START_SYM {
                window.clear();
                window.push(token);
                continue;
            }
            window.push(token);
            if window.len() > n {
                window.remove(0);
            }
            count_ladder(oracle, &window, n, &mut ladder);
            total += estimator.probability(&ladder).log10();
        }
        total
    }
}

/// Log10 probability of one bounded token sequence
pub fn score_sentence(
    index: &LanguageModelIndex,
    tokens: &[Token],
    ngram_size: usize,
    strategy: QueryStrategy,
    modified_kn: bool,
) -> Result<f64> {
    let config = ScoringConfig {
        ngram_size,
        modified_kn,
        fast_index: strategy != QueryStrategy::DualIndex,
    };
    let scorer = SentenceScorer::with_strategy(index, config, strategy)?;
    Ok(scorer.score_sentence(tokens))
}

/// Perplexity of sentences given as words without sentinels
pub fn corpus_perplexity(
    index: &LanguageModelIndex,
    sentences: &[Vec<Token>],
    config: ScoringConfig,
) -> Result<PerplexityReport> {
    let scorer = SentenceScorer::new(index, config)?;
    Ok(scorer.corpus_perplexity(sentences))
}
