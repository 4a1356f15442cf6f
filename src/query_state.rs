//! Incremental per-stream query state
//!
//! Keeps, for every context length `k < ngram_size`, the forward-index node of
//! the last `k` tokens consumed. Appending a token extends each stored node by
//! one step instead of re-descending from the root:
//!
//! ```text
//! contexts'[k] = extend(contexts[k - 1], token)      k = 1..=min(len + 1, n - 1)
//! ```
//!
//! A failed extension only invalidates the lengths built on top of it; shorter
//! contexts are derived from their own shorter suffix.

use crate::estimator::KneserNeyEstimator;
use crate::oracle::{ContinuationCountOracle, CountKind, OrderCounts};
use crate::suffix_index::{IndexNode, SuccinctIndexAdapter};
use crate::{Token, PAT_START_SYM};

/// State machine scoring one token stream
pub struct IncrementalQueryState<'a, O: ContinuationCountOracle> {
    oracle: &'a O,
    estimator: KneserNeyEstimator<'a>,
    /// Last `ngram_size - 1` tokens at most
    history: Vec<Token>,
    /// `contexts[k]` is the node of the last `k` history tokens
    contexts: Vec<Option<IndexNode>>,
    ladder: Vec<OrderCounts>,
    scratch: Vec<Option<IndexNode>>,
}

impl<'a, O: ContinuationCountOracle> IncrementalQueryState<'a, O> {
    pub fn new(oracle: &'a O, estimator: KneserNeyEstimator<'a>) -> Self {
        let n = estimator.ngram_size();
        let mut state = Self {
            oracle,
            estimator,
            history: Vec::with_capacity(n),
            contexts: Vec::with_capacity(n),
            ladder: Vec::with_capacity(n),
            scratch: Vec::with_capacity(n),
        };
        state.reset();
        state
    }

    /// Back to the empty context
    pub fn reset(&mut self) {
        self.history.clear();
        self.contexts.clear();
        self.contexts.push(Some(self.oracle.forward().root()));
    }

    /// Tokens the next prediction is conditioned on
    pub fn history(&self) -> &[Token] {
        &self.history
    }

    /// Node of the last `len` history tokens, `None` when unseen
    pub fn context_node(&self, len: usize) -> Option<IndexNode> {
        self.contexts.get(len).copied().flatten()
    }

    /// Consume `token` and return `P(token | history)`.
    ///
    /// The start symbol is never predicted: it resets the stream, becomes the
    /// only context token and yields probability 1.
    pub fn append_symbol(&mut self, token: Token) -> f64 {
        if token == PAT_START_SYM {
            self.reset();
            self.advance(token);
            return 1.0;
        }

        let n = self.estimator.ngram_size();
        self.ladder.clear();
        for order in 1..=self.history.len() + 1 {
            let context = &self.history[self.history.len() + 1 - order..];
            let kind = CountKind::select(order, n, context);
            let counts = self.oracle.order_counts(
                kind,
                context,
                self.contexts[order - 1].as_ref(),
                token,
            );
            self.ladder.push(counts);
        }
        let p = self.estimator.probability(&self.ladder);

        self.advance(token);
        p
    }

    /// Log10 probability of a whole stream from the current state
    pub fn score<I: IntoIterator<Item = Token>>(&mut self, tokens: I) -> f64 {
        tokens
            .into_iter()
            .map(|t| self.append_symbol(t).log10())
            .sum()
    }

    fn advance(&mut self, token: Token) {
        let keep = (self.history.len() + 1).min(self.estimator.ngram_size() - 1);
        let forward = self.oracle.forward();

        self.scratch.clear();
        self.scratch.push(Some(forward.root()));
        for k in 1..=keep {
            let extended = self.contexts[k - 1].and_then(|node| forward.extend(&node, token));
            self.scratch.push(extended);
        }
        std::mem::swap(&mut self.contexts, &mut self.scratch);

        self.history.push(token);
        if self.history.len() > keep {
            let excess = self.history.len() - keep;
            self.history.drain(..excess);
        }
    }
}
