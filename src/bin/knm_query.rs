//! knm-query CLI
//!
//! Builds suffix-indexed language models and measures test corpus perplexity
//! under Kneser-Ney or Modified Kneser-Ney smoothing.

use clap::{Parser, Subcommand};
use knm_index::{
    DiscountTable, IndexBuilder, KnmError, LanguageModelIndex, ScoringConfig, SentenceScorer,
    Tokenization, Token,
};
use log::{error, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "knm-query")]
#[command(version)]
#[command(about = "Kneser-Ney language model queries over a suffix index")]
#[command(long_about = r#"
knm-query: n-gram language model queries without an n-gram table

  Corpus → suffix array (+ reverse) → index/index.knm
  Pattern file → P(w | context) from counts read off the index
    → Test Corpus Perplexity

Set RUST_LOG=debug for count anomalies.
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a pattern file against a collection's index
    Query {
        /// Collection directory
        #[arg(short, long)]
        collection: PathBuf,

        /// Pattern file, one sentence per line
        #[arg(short, long)]
        patterns: PathBuf,

        /// N-gram size
        #[arg(short = 'n', long, default_value_t = 1)]
        ngram_size: usize,

        /// Use Modified Kneser-Ney (default: Kneser-Ney)
        #[arg(short = 'm', long)]
        modified_kn: bool,

        /// Forward index only (default: forward + reverse)
        #[arg(short = 'b', long)]
        fast_index: bool,

        /// One token per character
        #[arg(short = '1', long)]
        byte: bool,
    },

    /// Index a corpus file into a collection directory
    Build {
        /// Collection directory
        #[arg(short, long)]
        collection: PathBuf,

        /// Corpus file, one sentence per line
        #[arg(short, long)]
        input: PathBuf,

        /// Precomputed discounts (JSON)
        #[arg(short, long)]
        discounts: PathBuf,

        /// Skip the reverse index (dual-index queries become unavailable)
        #[arg(long)]
        no_reverse: bool,

        /// One token per character
        #[arg(short = '1', long)]
        byte: bool,
    },

    /// Show the parameters of a collection's index
    Info {
        /// Collection directory
        #[arg(short, long)]
        collection: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Query {
            collection,
            patterns,
            ngram_size,
            modified_kn,
            fast_index,
            byte,
        } => {
            let config = ScoringConfig {
                ngram_size,
                modified_kn,
                fast_index,
            };
            query(&collection, &patterns, config, Tokenization::from_flag(byte))?;
        }
        Commands::Build {
            collection,
            input,
            discounts,
            no_reverse,
            byte,
        } => {
            build(&collection, &input, &discounts, !no_reverse, Tokenization::from_flag(byte))?;
        }
        Commands::Info { collection } => {
            show_info(&collection)?;
        }
    }
    Ok(())
}

fn read_text(path: &Path, what: &str) -> Result<String, KnmError> {
    fs::read_to_string(path).map_err(|e| {
        KnmError::Configuration(format!("{} {} cannot be opened: {}", what, path.display(), e))
    })
}

fn query(
    collection: &Path,
    patterns: &Path,
    config: ScoringConfig,
    tokenization: Tokenization,
) -> Result<(), Box<dyn std::error::Error>> {
    let index = LanguageModelIndex::open_collection(collection)?;
    let scorer = SentenceScorer::new(&index, config)?;
    index.print_params(config.modified_kn, config.ngram_size);

    let text = read_text(patterns, "pattern file")?;
    let sentences: Vec<Vec<Token>> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| index.vocabulary().tokenize(l, tokenization))
        .collect();
    info!(
        "scoring {} patterns with {} strategy",
        sentences.len(),
        scorer.strategy().name()
    );

    let report = scorer.corpus_perplexity(&sentences);
    println!("Time = {:.3} ms", report.elapsed.as_secs_f64() * 1000.0);
    println!("Test Corpus Perplexity is: {:.10}", report.perplexity);
    Ok(())
}

fn build(
    collection: &Path,
    input: &Path,
    discounts: &Path,
    reverse: bool,
    tokenization: Tokenization,
) -> Result<(), Box<dyn std::error::Error>> {
    let discounts = DiscountTable::from_json(&read_text(discounts, "discount file")?)?;
    let corpus = read_text(input, "corpus file")?;

    let index = IndexBuilder::new(discounts)
        .tokenization(tokenization)
        .reverse(reverse)
        .build_from_lines(corpus.lines())?;
    let path = index.save_collection(collection)?;

    println!("Index:       {}", path.display());
    println!("Tokens:      {}", index.forward().len());
    println!("Vocabulary:  {}", index.vocab_size());
    println!("Reverse:     {}", index.reverse().is_some());
    Ok(())
}

fn show_info(collection: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let index = LanguageModelIndex::open_collection(collection)?;
    let max_order = index.discounts().max_order();

    println!("Index:       {}", LanguageModelIndex::index_path(collection).display());
    println!("Tokens:      {}", index.forward().len());
    println!("Vocabulary:  {}", index.vocab_size());
    println!("Reverse:     {}", index.reverse().is_some());
    println!("Max order:   {}", max_order);

    index.print_params(false, max_order);
    index.print_params(true, max_order);
    Ok(())
}
