//! Persisted language model index
//!
//! ## File Layout
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ Magic "KNMINDEX" (8 bytes)               │
//! ├──────────────────────────────────────────┤
//! │ Version major, minor (2 bytes)           │
//! ├──────────────────────────────────────────┤
//! │ Flags (1) │ Reserved (1)                 │
//! ├──────────────────────────────────────────┤
//! │ Payload length, u64 LE (8 bytes)         │
//! ├──────────────────────────────────────────┤
//! │ zstd(bincode(payload))                   │
//! │  vocabulary, discounts, forward text,    │
//! │  forward SA, reverse SA (optional)       │
//! └──────────────────────────────────────────┘
//! ```
//!
//! The BWT wavelet matrices are not stored; they are rebuilt from the text and
//! suffix arrays on load.

use crate::discounts::DiscountTable;
use crate::suffix_index::SuffixIndex;
use crate::vocabulary::{Tokenization, Vocabulary};
use crate::{KnmError, Result, Token, KNM_INDEX_MAGIC, PAT_END_SYM, PAT_START_SYM};
use log::info;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};

/// Index file name inside `<collection>/index/`
pub const INDEX_FILE_NAME: &str = "index.knm";

/// Persisted format version (major, minor)
pub const INDEX_FORMAT_VERSION: [u8; 2] = [1, 0];

const FLAG_REVERSE: u8 = 0b0000_0001;

const ZSTD_LEVEL: i32 = 3;

/// Fixed-size prefix of the index file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IndexHeader {
    version: [u8; 2],
    flags: u8,
    payload_len: u64,
}

impl IndexHeader {
    /// 8 magic + 2 version + 1 flags + 1 reserved + 8 length
    const SIZE: usize = 20;

    fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..8].copy_from_slice(KNM_INDEX_MAGIC);
        bytes[8..10].copy_from_slice(&self.version);
        bytes[10] = self.flags;
        bytes[12..20].copy_from_slice(&self.payload_len.to_le_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 || &bytes[0..8] != KNM_INDEX_MAGIC {
            return Err(KnmError::InvalidMagic);
        }
        if bytes.len() < Self::SIZE {
            return Err(KnmError::Load(format!(
                "header truncated: {} of {} bytes",
                bytes.len(),
                Self::SIZE
            )));
        }
        let version = [bytes[8], bytes[9]];
        if version[0] != INDEX_FORMAT_VERSION[0] {
            return Err(KnmError::InvalidVersion(version[0], version[1]));
        }
        let mut len = [0u8; 8];
        len.copy_from_slice(&bytes[12..20]);
        Ok(Self {
            version,
            flags: bytes[10],
            payload_len: u64::from_le_bytes(len),
        })
    }
}

#[derive(Serialize)]
struct PayloadRef<'a> {
    vocabulary: &'a Vocabulary,
    discounts: &'a DiscountTable,
    text: &'a [Token],
    forward_sa: &'a [u32],
    reverse_sa: Option<&'a [u32]>,
}

#[derive(Deserialize)]
struct Payload {
    vocabulary: Vocabulary,
    discounts: DiscountTable,
    text: Vec<Token>,
    forward_sa: Vec<u32>,
    reverse_sa: Option<Vec<u32>>,
}

/// Forward index, optional reverse index, vocabulary and discounts.
///
/// Immutable once built or loaded; share it by reference across scoring
/// threads.
#[derive(Debug)]
pub struct LanguageModelIndex {
    vocabulary: Vocabulary,
    forward: SuffixIndex,
    reverse: Option<SuffixIndex>,
    discounts: DiscountTable,
}

impl LanguageModelIndex {
    /// Index an already tokenized corpus
    pub fn from_tokens(
        vocabulary: Vocabulary,
        corpus: Vec<Token>,
        discounts: DiscountTable,
        with_reverse: bool,
    ) -> Result<Self> {
        check_tokens(&corpus, vocabulary.len())
            .map_err(KnmError::Configuration)?;

        let reverse = if with_reverse {
            let reversed: Vec<Token> = corpus.iter().rev().copied().collect();
            Some(SuffixIndex::build(reversed)?)
        } else {
            None
        };
        let forward = SuffixIndex::build(corpus)?;

        Ok(Self {
            vocabulary,
            forward,
            reverse,
            discounts,
        })
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn forward(&self) -> &SuffixIndex {
        &self.forward
    }

    pub fn reverse(&self) -> Option<&SuffixIndex> {
        self.reverse.as_ref()
    }

    pub fn discounts(&self) -> &DiscountTable {
        &self.discounts
    }

    /// Size of the order-0 uniform distribution
    pub fn vocab_size(&self) -> usize {
        self.vocabulary.len()
    }

    /// `<collection>/index/index.knm`
    pub fn index_path<P: AsRef<Path>>(collection: P) -> PathBuf {
        collection.as_ref().join("index").join(INDEX_FILE_NAME)
    }

    /// Load the index of a collection directory
    pub fn open_collection<P: AsRef<Path>>(collection: P) -> Result<Self> {
        let path = Self::index_path(&collection);
        if !path.is_file() {
            return Err(KnmError::Configuration(format!(
                "index {} does not exist, build it first",
                path.display()
            )));
        }
        Self::load(path)
    }

    /// Write the index into a collection directory, creating `index/`
    pub fn save_collection<P: AsRef<Path>>(&self, collection: P) -> Result<PathBuf> {
        let path = Self::index_path(&collection);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        self.save(&path)?;
        Ok(path)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let payload = PayloadRef {
            vocabulary: &self.vocabulary,
            discounts: &self.discounts,
            text: self.forward.text(),
            forward_sa: self.forward.suffix_array(),
            reverse_sa: self.reverse.as_ref().map(|r| r.suffix_array()),
        };
        let raw = bincode::serialize(&payload).map_err(|e| KnmError::Encoding(e.to_string()))?;
        let compressed = zstd::stream::encode_all(Cursor::new(raw), ZSTD_LEVEL)
            .map_err(|e| KnmError::Encoding(e.to_string()))?;

        let header = IndexHeader {
            version: INDEX_FORMAT_VERSION,
            flags: if self.reverse.is_some() { FLAG_REVERSE } else { 0 },
            payload_len: compressed.len() as u64,
        };

        let mut out = BufWriter::new(File::create(path.as_ref())?);
        out.write_all(&header.to_bytes())?;
        out.write_all(&compressed)?;
        out.flush()?;

        info!(
            "wrote index {} ({} tokens, {} compressed bytes)",
            path.as_ref().display(),
            self.forward.len(),
            compressed.len()
        );
        Ok(())
    }

    /// Map and validate a persisted index
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mmap = unsafe { Mmap::map(&file)? };

        let header = IndexHeader::from_bytes(&mmap[..])?;
        let body = &mmap[IndexHeader::SIZE..];
        if body.len() as u64 != header.payload_len {
            return Err(KnmError::Load(format!(
                "payload is {} bytes, header declares {}",
                body.len(),
                header.payload_len
            )));
        }

        let raw = zstd::stream::decode_all(Cursor::new(body))
            .map_err(|e| KnmError::Load(format!("decompression failed: {}", e)))?;
        let payload: Payload =
            bincode::deserialize(&raw).map_err(|e| KnmError::Load(e.to_string()))?;

        let index = Self::from_payload(payload, header.flags)?;
        info!(
            "loaded index {} (format {}.{}, {} tokens, vocabulary {})",
            path.as_ref().display(),
            header.version[0],
            header.version[1],
            index.forward.len(),
            index.vocab_size()
        );
        Ok(index)
    }

    fn from_payload(payload: Payload, flags: u8) -> Result<Self> {
        let Payload {
            mut vocabulary,
            discounts,
            text,
            forward_sa,
            reverse_sa,
        } = payload;

        if (flags & FLAG_REVERSE != 0) != reverse_sa.is_some() {
            return Err(KnmError::Load(
                "reverse flag does not match payload".to_string(),
            ));
        }
        vocabulary.rebuild_index();
        check_tokens(&text, vocabulary.len()).map_err(KnmError::Load)?;
        let discounts = discounts
            .validated()
            .map_err(|e| KnmError::Load(e.to_string()))?;

        let reverse = match reverse_sa {
            Some(sa) => {
                let reversed: Vec<Token> = text.iter().rev().copied().collect();
                Some(SuffixIndex::from_parts(reversed, sa)?)
            }
            None => None,
        };
        let forward = SuffixIndex::from_parts(text, forward_sa)?;

        Ok(Self {
            vocabulary,
            forward,
            reverse,
            discounts,
        })
    }

    /// Log corpus statistics and the discounts of orders `1..=ngram_size`
    pub fn print_params(&self, modified_kn: bool, ngram_size: usize) {
        info!("------------------------------------------------");
        info!("corpus tokens     = {}", self.forward.len());
        info!("vocabulary size   = {}", self.vocab_size());
        info!("reverse index     = {}", self.reverse.is_some());
        info!("smoothing         = {}", if modified_kn { "MKN" } else { "KN" });
        info!("ngram size        = {}", ngram_size);
        for order in 1..=ngram_size.min(self.discounts.max_order()) {
            let raw = self.discounts.raw(order);
            let cont = self.discounts.continuation(order);
            if modified_kn {
                info!(
                    "n = {}  D1 = {:.4}  D2 = {:.4}  D3+ = {:.4}  |  D1' = {:.4}  D2' = {:.4}  D3+' = {:.4}",
                    order, raw.d1, raw.d2, raw.d3_plus, cont.d1, cont.d2, cont.d3_plus
                );
            } else {
                info!("n = {}  D = {:.4}  |  D' = {:.4}", order, raw.d, cont.d);
            }
        }
        info!("------------------------------------------------");
    }
}

fn check_tokens(text: &[Token], vocab_size: usize) -> std::result::Result<(), String> {
    match text.iter().find(|&&t| t as usize >= vocab_size) {
        Some(t) => Err(format!(
            "token id {} outside vocabulary of {} entries",
            t, vocab_size
        )),
        None => Ok(()),
    }
}

/// Builds a [`LanguageModelIndex`] from raw corpus lines
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    discounts: DiscountTable,
    tokenization: Tokenization,
    reverse: bool,
}

impl IndexBuilder {
    pub fn new(discounts: DiscountTable) -> Self {
        Self {
            discounts,
            tokenization: Tokenization::Whitespace,
            reverse: true,
        }
    }

    pub fn tokenization(mut self, tokenization: Tokenization) -> Self {
        self.tokenization = tokenization;
        self
    }

    /// Whether to build the reverse index (needed by the dual-index strategy)
    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    /// Each non-blank line becomes `<s> w1 .. wk </s>`
    pub fn build_from_lines<'a, I>(self, lines: I) -> Result<LanguageModelIndex>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let lines: Vec<&str> = lines
            .into_iter()
            .filter(|l| !l.trim().is_empty())
            .collect();
        let vocabulary = Vocabulary::from_corpus(lines.iter().copied(), self.tokenization);

        let mut corpus = Vec::new();
        for line in &lines {
            corpus.push(PAT_START_SYM);
            corpus.extend(vocabulary.tokenize(line, self.tokenization));
            corpus.push(PAT_END_SYM);
        }
        info!(
            "indexing {} lines, {} tokens, vocabulary {}",
            lines.len(),
            corpus.len(),
            vocabulary.len()
        );

        LanguageModelIndex::from_tokens(vocabulary, corpus, self.discounts, self.reverse)
    }
}
