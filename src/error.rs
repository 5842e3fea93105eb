use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Fatal and per-batch errors surfaced by the ingestion pipeline.
///
/// Per-record problems (undecodable games, malformed clock comments,
/// rating rejects) never take this form: they are counted and the run
/// continues.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to open input '{}': {source}", path.display())]
    OpenInput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no input files matched '{0}'")]
    NoInput(String),

    #[error("store at '{}' unavailable after {attempts} attempts: {source}", path.display())]
    StoreUnavailable {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("batch write failed ({len} games, {first}..{last}): {source}")]
    BatchWrite {
        len: usize,
        first: Uuid,
        last: Uuid,
        #[source]
        source: rusqlite::Error,
    },

    #[error("pipeline stalled: no {stage} progress within {timeout:?}")]
    Stalled {
        stage: &'static str,
        timeout: Duration,
    },

    #[error("writer thread exited unexpectedly")]
    WriterGone,
}
