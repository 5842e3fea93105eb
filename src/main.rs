use std::path::PathBuf;

use anyhow::anyhow;
use clap::Parser;

use chess_corpus::classify::DEFAULT_MAX_RATING_GAP;
use chess_corpus::pipeline::{self, CancelToken, IngestConfig};
use chess_corpus::reader::Compression;
use chess_corpus::sampler::{DEFAULT_BATCH_SIZE, DEFAULT_BUCKET_TARGET};

/// One-shot batch job: samples PGN archives into a rating-balanced
/// SQLite corpus of games and per-move clock timings.
#[derive(Parser, Debug)]
#[command(name = "corpus-ingest")]
struct Args {
    /// Input PGN file or glob pattern
    input: String,

    /// SQLite database receiving the sampled corpus
    #[arg(long, value_name = "FILE", default_value = "corpus.db")]
    db: PathBuf,

    /// Accepted-game cap per rating bucket
    #[arg(long, default_value_t = DEFAULT_BUCKET_TARGET)]
    bucket_target: u32,

    /// Largest allowed rating difference between the two players
    #[arg(long, default_value_t = DEFAULT_MAX_RATING_GAP)]
    max_rating_gap: i32,

    /// Games per storage batch
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Input compression ('zstd'); plain when omitted
    #[arg(long)]
    compression: Option<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let compression = match args.compression.as_deref() {
        None => Compression::Plain,
        Some(raw) => Compression::parse(raw).map_err(|msg| anyhow!(msg))?,
    };

    let mut config = IngestConfig::new(args.input, args.db);
    config.compression = compression;
    config.bucket_target = args.bucket_target;
    config.max_rating_gap = args.max_rating_gap;
    config.batch_size = args.batch_size;

    let summary = pipeline::run(&config, &CancelToken::new())?;
    println!("{summary}");
    Ok(())
}
