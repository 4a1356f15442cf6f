//! # knm-index
//!
//! Kneser-Ney language model queries answered from a suffix index.
//!
//! Instead of materialising an n-gram count table, every statistic the
//! smoothing needs (occurrence counts, distinct left and right extension
//! counts) is read off a suffix array built over the token corpus, and
//! optionally one over the reversed corpus.
//!
//! ## Pipeline
//!
//! ```text
//! Sentence tokens
//!     ↓
//! SentenceScorer ──▶ IncrementalQueryState (single index + MKN)
//!     │                        │
//!     └──▶ sliding window ─────┴──▶ ContinuationCountOracle ──▶ SuffixIndex
//!                                          ↓
//!                                 KneserNeyEstimator ──▶ P(w | context)
//! ```
//!
//! ## Example
//!
//! ```rust
//! use knm_index::{DiscountTable, LanguageModelIndex, ScoringConfig, SentenceScorer, Vocabulary};
//!
//! let vocab = Vocabulary::from_words(["a", "b", "c"]);
//! let corpus = vocab.tokenize("a b a b c", Default::default());
//! let index = LanguageModelIndex::from_tokens(
//!     vocab,
//!     corpus,
//!     DiscountTable::uniform(2, 0.5).unwrap(),
//!     true,
//! )
//! .unwrap();
//!
//! let config = ScoringConfig { ngram_size: 2, ..Default::default() };
//! let scorer = SentenceScorer::new(&index, config).unwrap();
//! let words = index.vocabulary().tokenize("a b", Default::default());
//! let perplexity = scorer.sentence_perplexity(&words);
//! assert!(perplexity > 1.0);
//! ```

// --- Global Allocator: mimalloc (Microsoft's high-performance allocator) ---
#[cfg(not(target_env = "msvc"))]
use mimalloc::MiMalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub mod discounts;
pub mod estimator;
pub mod model_index;
pub mod oracle;
pub mod query_state;
pub mod scorer;
pub mod succinct;
pub mod suffix_index;
pub mod vocabulary;

pub use discounts::{DiscountTable, Discounts};
pub use estimator::KneserNeyEstimator;
pub use model_index::{IndexBuilder, LanguageModelIndex, INDEX_FILE_NAME, INDEX_FORMAT_VERSION};
pub use oracle::{
    ContinuationCountOracle, CountKind, DualIndexOracle, OrderCounts, SingleIndexOracle,
};
pub use query_state::IncrementalQueryState;
pub use scorer::{
    corpus_perplexity, score_sentence, PerplexityReport, QueryStrategy, ScoringConfig,
    SentenceScorer,
};
pub use succinct::{RankBitVector, WaveletMatrix};
pub use suffix_index::{IndexNode, SuccinctIndexAdapter, SuffixIndex};
pub use vocabulary::{Tokenization, Vocabulary};

use thiserror::Error;

/// Token identifier
pub type Token = u32;

/// Unknown / out-of-vocabulary token
pub const UNKNOWN_SYM: Token = 0;

/// Sequence start sentinel `<s>`
pub const PAT_START_SYM: Token = 1;

/// Sequence end sentinel `</s>`
pub const PAT_END_SYM: Token = 2;

/// Index file magic bytes
pub const KNM_INDEX_MAGIC: &[u8; 8] = b"KNMINDEX";

/// Error types for index loading and querying
#[derive(Error, Debug)]
pub enum KnmError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid magic: expected KNMINDEX")]
    InvalidMagic,

    #[error("Invalid version: {0}.{1}")]
    InvalidVersion(u8, u8),

    #[error("Load error: {0}")]
    Load(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, KnmError>;

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Log records kept in memory, split by the thread that emitted them
    pub mod capture {
        use log::{Level, LevelFilter, Log, Metadata, Record};
        use std::sync::{Mutex, Once};
        use std::thread::{self, ThreadId};

        struct CaptureLogger {
            records: Mutex<Vec<(ThreadId, Level, String)>>,
        }

        impl Log for CaptureLogger {
            fn enabled(&self, _metadata: &Metadata) -> bool {
                true
            }

            fn log(&self, record: &Record) {
                if let Ok(mut records) = self.records.lock() {
                    records.push((
                        thread::current().id(),
                        record.level(),
                        record.args().to_string(),
                    ));
                }
            }

            fn flush(&self) {}
        }

        static LOGGER: CaptureLogger = CaptureLogger {
            records: Mutex::new(Vec::new()),
        };
        static INIT: Once = Once::new();

        /// Install the logger and forget what this thread logged before
        pub fn install() {
            INIT.call_once(|| {
                log::set_logger(&LOGGER).expect("no other logger in unit tests");
                log::set_max_level(LevelFilter::Trace);
            });
            let me = thread::current().id();
            if let Ok(mut records) = LOGGER.records.lock() {
                records.retain(|(id, _, _)| *id != me);
            }
        }

        /// Messages at `level` logged so far by the calling thread
        pub fn messages(level: Level) -> Vec<String> {
            let me = thread::current().id();
            LOGGER
                .records
                .lock()
                .map(|records| {
                    records
                        .iter()
                        .filter(|(id, l, _)| *id == me && *l == level)
                        .map(|(_, _, msg)| msg.clone())
                        .collect()
                })
                .unwrap_or_default()
        }
    }

    /// The `[A B A B C]` corpus with the closed vocabulary {A, B, C} plus the
    /// three reserved symbols.
    pub fn abab_index(discount: f64, with_reverse: bool) -> LanguageModelIndex {
        let vocab = Vocabulary::from_words(["A", "B", "C"]);
        let corpus = vocab.tokenize("A B A B C", Tokenization::Whitespace);
        LanguageModelIndex::from_tokens(
            vocab,
            corpus,
            DiscountTable::uniform(3, discount).unwrap(),
            with_reverse,
        )
        .unwrap()
    }

    /// A handful of sentences with repeated n-grams and sentinels.
    pub fn sentence_index(max_order: usize) -> LanguageModelIndex {
        let lines = [
            "the cat sat on the mat",
            "the dog sat on the log",
            "a cat and a dog sat",
            "the cat ate the fish",
            "on the mat the cat sat",
        ];
        IndexBuilder::new(DiscountTable::new(
            vec![Discounts::new(0.7, 0.6, 1.1, 1.4); max_order],
            vec![Discounts::new(0.5, 0.4, 0.9, 1.2); max_order],
        )
        .unwrap())
        .build_from_lines(lines.iter().copied())
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_symbols_distinct() {
        assert_ne!(UNKNOWN_SYM, PAT_START_SYM);
        assert_ne!(PAT_START_SYM, PAT_END_SYM);
        assert_ne!(UNKNOWN_SYM, PAT_END_SYM);
    }

    #[test]
    fn test_magic_constant() {
        assert_eq!(KNM_INDEX_MAGIC, b"KNMINDEX");
    }

    #[test]
    fn test_error_display() {
        let e = KnmError::InvalidVersion(9, 1);
        assert_eq!(e.to_string(), "Invalid version: 9.1");
        let e = KnmError::Configuration("missing pattern file".to_string());
        assert!(e.to_string().contains("missing pattern file"));
    }
}
