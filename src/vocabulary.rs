//! Vocabulary and line tokenization
//!
//! Maps surface strings to [`Token`] ids. Ids 0..=2 are reserved for the
//! unknown symbol and the sequence sentinels; ordinary words follow.

use crate::{Token, PAT_END_SYM, PAT_START_SYM, UNKNOWN_SYM};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const RESERVED: [(&str, Token); 3] = [
    ("<unk>", UNKNOWN_SYM),
    ("<s>", PAT_START_SYM),
    ("</s>", PAT_END_SYM),
];

/// How a text line is split into tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Tokenization {
    /// Split on runs of whitespace
    #[default]
    Whitespace,
    /// One token per character
    Byte,
}

impl Tokenization {
    pub fn from_flag(byte_alphabet: bool) -> Self {
        if byte_alphabet {
            Self::Byte
        } else {
            Self::Whitespace
        }
    }

    /// Split a line into its surface pieces
    pub fn split<'a>(self, line: &'a str) -> Vec<&'a str> {
        match self {
            Self::Whitespace => line.split_whitespace().collect(),
            Self::Byte => line
                .char_indices()
                .map(|(i, c)| &line[i..i + c.len_utf8()])
                .collect(),
        }
    }
}

/// Bidirectional string <-> token id map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vocabulary {
    words: Vec<String>,
    #[serde(skip)]
    ids: HashMap<String, Token>,
}

impl Vocabulary {
    /// Closed vocabulary: reserved symbols followed by `words` in order.
    /// Duplicates keep their first id.
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vocab = Self {
            words: Vec::new(),
            ids: HashMap::new(),
        };
        for (word, _) in RESERVED {
            vocab.insert(word);
        }
        for word in words {
            vocab.insert(word.as_ref());
        }
        vocab
    }

    /// Build from corpus lines. Ids are assigned by descending frequency,
    /// ties broken lexicographically.
    pub fn from_corpus<'a, I>(lines: I, tokenization: Tokenization) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut freq: HashMap<&'a str, usize> = HashMap::new();
        for line in lines {
            for piece in tokenization.split(line) {
                if RESERVED.iter().any(|(w, _)| *w == piece) {
                    continue;
                }
                *freq.entry(piece).or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<(&str, usize)> = freq.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        Self::from_words(ranked.into_iter().map(|(w, _)| w))
    }

    /// Append `word` unless already present
    fn insert(&mut self, word: &str) {
        if self.ids.contains_key(word) {
            return;
        }
        self.ids.insert(word.to_string(), self.words.len() as Token);
        self.words.push(word.to_string());
    }

    /// Restore the lookup table after deserialization
    pub fn rebuild_index(&mut self) {
        self.ids = self
            .words
            .iter()
            .enumerate()
            .map(|(i, w)| (w.clone(), i as Token))
            .collect();
    }

    /// Number of ids, reserved symbols included
    #[inline]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Id of `word`, or [`UNKNOWN_SYM`] when absent
    pub fn token2id(&self, word: &str) -> Token {
        self.ids.get(word).copied().unwrap_or(UNKNOWN_SYM)
    }

    pub fn id2token(&self, id: Token) -> Option<&str> {
        self.words.get(id as usize).map(|s| s.as_str())
    }

    /// Tokenize a line and resolve every piece to its id
    pub fn tokenize(&self, line: &str, tokenization: Tokenization) -> Vec<Token> {
        tokenization
            .split(line)
            .into_iter()
            .map(|piece| self.token2id(piece))
            .collect()
    }

    /// Render ids back to a space separated string
    pub fn render(&self, tokens: &[Token]) -> String {
        tokens
            .iter()
            .map(|&t| self.id2token(t).unwrap_or("<unk>"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
