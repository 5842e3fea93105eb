use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::classify::{self, BUCKET_COUNT, DEFAULT_MAX_RATING_GAP};
use crate::clock::extract_move_times;
use crate::error::IngestError;
use crate::reader::{Compression, GameStream, ReadOutcome};
use crate::sampler::{
    AcceptedGame, Batch, DEFAULT_BATCH_SIZE, DEFAULT_BUCKET_TARGET, SamplingState,
};
use crate::store::Store;
use crate::types::GameRecord;

const RECORD_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Input PGN path or glob pattern.
    pub input: String,
    pub db_path: PathBuf,
    pub compression: Compression,
    pub bucket_target: u32,
    pub max_rating_gap: i32,
    pub batch_size: usize,
    /// Bound on waiting for stream reads and batch-write acknowledgements;
    /// the run aborts rather than hangs on expiry.
    pub io_timeout: Duration,
    pub store_retry_attempts: u32,
    pub store_retry_delay: Duration,
}

impl IngestConfig {
    pub fn new(input: impl Into<String>, db_path: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            db_path: db_path.into(),
            compression: Compression::Plain,
            bucket_target: DEFAULT_BUCKET_TARGET,
            max_rating_gap: DEFAULT_MAX_RATING_GAP,
            batch_size: DEFAULT_BATCH_SIZE,
            io_timeout: Duration::from_secs(30),
            store_retry_attempts: 3,
            store_retry_delay: Duration::from_millis(500),
        }
    }
}

/// Cooperative stop signal, checked between records. On cancellation the
/// orchestrator flushes in-flight batches before exiting instead of
/// discarding accepted work.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct IngestSummary {
    pub bucket_counts: [u32; BUCKET_COUNT],
    pub accepted: u64,
    pub rejected: u64,
    pub skipped: u64,
    /// Records that were accepted but belonged to a batch whose write
    /// failed; they are not retried within the run.
    pub lost: u64,
    pub batches_written: u64,
    pub elapsed: Duration,
}

impl fmt::Display for IngestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "accepted {} games ({} rejected, {} skipped, {} lost) in {:.2?}; buckets:",
            self.accepted, self.rejected, self.skipped, self.lost, self.elapsed
        )?;
        for (idx, count) in self.bucket_counts.iter().enumerate() {
            write!(f, " {}:{}", idx + 1, count)?;
        }
        Ok(())
    }
}

struct WriteAck {
    len: usize,
    result: Result<(), IngestError>,
}

/// Runs the full ingestion pipeline to completion.
///
/// One reader thread feeds parsed records through a bounded channel; this
/// thread extracts timing samples, classifies and samples; a single
/// writer thread commits batches, so two writes can never interleave. The
/// sampling state is owned here and is the only shared-progress
/// serialization point.
pub fn run(config: &IngestConfig, cancel: &CancelToken) -> Result<IngestSummary, IngestError> {
    let started = Instant::now();

    // Fatal before any processing: store unreachable or input unopenable.
    let store = Store::open_with_retry(
        &config.db_path,
        config.store_retry_attempts,
        config.store_retry_delay,
    )?;
    let stream = GameStream::open(&config.input, config.compression)?;
    info!(
        "ingesting {} input file(s) into '{}'",
        stream.paths().len(),
        config.db_path.display()
    );

    let (record_tx, record_rx) = mpsc::sync_channel::<ReadOutcome>(RECORD_CHANNEL_CAPACITY);
    let reader_handle = thread::spawn(move || {
        for outcome in stream {
            // A closed channel means the orchestrator stopped listening.
            if record_tx.send(outcome).is_err() {
                break;
            }
        }
    });

    let (batch_tx, batch_rx) = mpsc::channel::<Batch>();
    let (ack_tx, ack_rx) = mpsc::channel::<WriteAck>();
    let writer_handle = thread::spawn(move || {
        let mut store = store;
        for batch in batch_rx {
            let len = batch.len();
            let result = store.write_batch(&batch);
            if ack_tx.send(WriteAck { len, result }).is_err() {
                break;
            }
        }
    });

    let mut state = SamplingState::new(config.bucket_target, config.batch_size);
    let mut skipped = 0u64;
    let mut rejected = 0u64;
    let mut lost = 0u64;
    let mut batches_written = 0u64;
    let mut run_error: Option<IngestError> = None;

    loop {
        if cancel.is_cancelled() {
            info!("stop requested; flushing in-flight work");
            break;
        }

        // Fold in completed write acknowledgements so failures surface
        // while the stream is still being read.
        drain_ready_acks(&ack_rx, &mut lost, &mut batches_written);

        match record_rx.recv_timeout(config.io_timeout) {
            Ok(ReadOutcome::Game(game)) => {
                let samples = extract_move_times(&game);
                let (bucket, accepted) =
                    classify::classify(game.white_elo, game.black_elo, config.max_rating_gap);

                if !accepted || !state.is_open(bucket) {
                    rejected += 1;
                    continue;
                }

                // classify only accepts when both ratings are present.
                let (Some(white_elo), Some(black_elo)) = (game.white_elo, game.black_elo) else {
                    rejected += 1;
                    continue;
                };

                let record = GameRecord::accept(game, white_elo, black_elo);
                if let Some(batch) = state.push(bucket, AcceptedGame { record, samples }) {
                    debug!("flushing batch of {} games", batch.len());
                    if batch_tx.send(batch).is_err() {
                        run_error = Some(IngestError::WriterGone);
                        break;
                    }
                }
            }
            Ok(ReadOutcome::Skip { reason }) => {
                warn!("skipping record: {}", reason);
                skipped += 1;
            }
            // End of stream: the reader thread dropped its sender.
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                run_error = Some(IngestError::Stalled {
                    stage: "read",
                    timeout: config.io_timeout,
                });
                break;
            }
        }
    }

    // Residual flush happens on normal completion, cancellation, and
    // unrecoverable error alike.
    if let Some(batch) = state.drain()
        && batch_tx.send(batch).is_err()
        && run_error.is_none()
    {
        run_error = Some(IngestError::WriterGone);
    }

    drop(batch_tx);
    drop(record_rx);

    // Wait for outstanding write acknowledgements, bounded per batch.
    loop {
        match ack_rx.recv_timeout(config.io_timeout) {
            Ok(ack) => record_ack(ack, &mut lost, &mut batches_written),
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                if run_error.is_none() {
                    run_error = Some(IngestError::Stalled {
                        stage: "write",
                        timeout: config.io_timeout,
                    });
                }
                break;
            }
        }
    }

    let _ = reader_handle.join();
    let _ = writer_handle.join();

    if let Some(err) = run_error {
        return Err(err);
    }

    let summary = IngestSummary {
        bucket_counts: *state.counts(),
        accepted: state.total_accepted(),
        rejected,
        skipped,
        lost,
        batches_written,
        elapsed: started.elapsed(),
    };
    info!("{}", summary);
    Ok(summary)
}

fn drain_ready_acks(ack_rx: &Receiver<WriteAck>, lost: &mut u64, batches_written: &mut u64) {
    while let Ok(ack) = ack_rx.try_recv() {
        record_ack(ack, lost, batches_written);
    }
}

fn record_ack(ack: WriteAck, lost: &mut u64, batches_written: &mut u64) {
    match ack.result {
        Ok(()) => {
            *batches_written += 1;
            debug!("committed batch of {} games", ack.len);
        }
        Err(err) => {
            warn!("{}", err);
            *lost += ack.len as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write as _;

    fn write_input(dir: &tempfile::TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("games.pgn");
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    fn config_for(dir: &tempfile::TempDir, input: &PathBuf) -> IngestConfig {
        let mut config = IngestConfig::new(
            input.to_str().unwrap(),
            dir.path().join("corpus.db"),
        );
        config.io_timeout = Duration::from_secs(5);
        config.store_retry_delay = Duration::from_millis(1);
        config
    }

    const THREE_GAMES: &str = r#"[Event "Low"]
[WhiteElo "1000"]
[BlackElo "1050"]

1. e4 { [%clk 0:04:55] } e5 { [%clk 0:04:58] } 1-0

[Event "Mismatched"]
[WhiteElo "1000"]
[BlackElo "1400"]

1. d4 d5 1/2-1/2

[Event "High"]
[WhiteElo "2450"]
[BlackElo "2480"]

1. c4 e5 0-1
"#;

    #[test]
    fn test_end_to_end_balanced_sampling() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&dir, THREE_GAMES);
        let mut config = config_for(&dir, &input);
        config.batch_size = 10;

        let summary = run(&config, &CancelToken::new()).unwrap();

        assert_eq!(summary.accepted, 2);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.lost, 0);
        // Batch size 10 over 3 records: exactly one end-of-stream flush.
        assert_eq!(summary.batches_written, 1);
        assert_eq!(summary.bucket_counts[0], 1);
        assert_eq!(summary.bucket_counts[7], 1);
        assert!(summary.bucket_counts[1..7].iter().all(|&c| c == 0));

        let store = Store::open(&config.db_path).unwrap();
        assert_eq!(store.game_count().unwrap(), 2);
        // Only the first game carried clock annotations.
        assert_eq!(store.sample_count().unwrap(), 2);
    }

    #[test]
    fn test_bucket_cap_closes_bucket_for_rest_of_run() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(
            &dir,
            r#"[Event "A"]
[WhiteElo "1000"]
[BlackElo "1000"]

1. e4 1-0

[Event "B"]
[WhiteElo "1010"]
[BlackElo "1010"]

1. d4 0-1

[Event "C"]
[WhiteElo "2450"]
[BlackElo "2450"]

1. c4 1-0
"#,
        );
        let mut config = config_for(&dir, &input);
        config.bucket_target = 1;

        let summary = run(&config, &CancelToken::new()).unwrap();

        // Second bucket-1 game bounced off the closed bucket; bucket 8
        // was unaffected.
        assert_eq!(summary.accepted, 2);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.bucket_counts[0], 1);
        assert_eq!(summary.bucket_counts[7], 1);
    }

    #[test]
    fn test_multiple_batches_sum_to_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = String::new();
        for i in 0..5 {
            content.push_str(&format!(
                "[Event \"G{i}\"]\n[WhiteElo \"1500\"]\n[BlackElo \"1500\"]\n\n1. e4 1-0\n\n"
            ));
        }
        let input = write_input(&dir, &content);
        let mut config = config_for(&dir, &input);
        config.batch_size = 2;

        let summary = run(&config, &CancelToken::new()).unwrap();

        assert_eq!(summary.accepted, 5);
        // Two full batches plus the residual flush.
        assert_eq!(summary.batches_written, 3);

        let store = Store::open(&config.db_path).unwrap();
        assert_eq!(store.game_count().unwrap(), summary.accepted);
    }

    #[test]
    fn test_undecodable_input_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();

        let good = zstd::stream::encode_all(
            &b"[Event \"Good\"]\n[WhiteElo \"1500\"]\n[BlackElo \"1500\"]\n\n1. e4 1-0\n"[..],
            0,
        )
        .unwrap();
        std::fs::write(dir.path().join("a.pgn.zst"), &good).unwrap();

        // Truncated frame with no result marker: the read fails before
        // the game can complete.
        let mut broken = zstd::stream::encode_all(
            &b"[Event \"Broken\"]\n\n1. e4 e5 2. Nf3 Nc6 3. Bb5 a6\n"[..],
            0,
        )
        .unwrap();
        broken.truncate(broken.len() - 6);
        std::fs::write(dir.path().join("b.pgn.zst"), &broken).unwrap();

        let pattern = dir.path().join("*.pgn.zst");
        let mut config = config_for(&dir, &pattern);
        config.compression = Compression::Zstd;

        let summary = run(&config, &CancelToken::new()).unwrap();

        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn test_cancellation_before_first_record_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&dir, THREE_GAMES);
        let config = config_for(&dir, &input);

        let cancel = CancelToken::new();
        cancel.cancel();

        let summary = run(&config, &cancel).unwrap();
        assert_eq!(summary.accepted, 0);
        assert_eq!(summary.batches_written, 0);
    }

    #[test]
    fn test_cancellation_mid_stream_flushes_accepted_work() {
        let dir = tempfile::tempdir().unwrap();
        let total = 100_000u64;
        let mut content = String::new();
        for i in 0..total {
            content.push_str(&format!(
                "[Event \"G{i}\"]\n[WhiteElo \"1500\"]\n[BlackElo \"1500\"]\n\n1. e4 1-0\n\n"
            ));
        }
        let input = write_input(&dir, &content);
        let mut config = config_for(&dir, &input);
        config.batch_size = 1;

        // Stop the run as soon as the first batch has landed.
        let cancel = CancelToken::new();
        let watcher = {
            let cancel = cancel.clone();
            let db_path = config.db_path.clone();
            thread::spawn(move || {
                loop {
                    if let Ok(store) = Store::open(&db_path)
                        && let Ok(count) = store.game_count()
                        && count > 0
                    {
                        cancel.cancel();
                        return;
                    }
                    thread::sleep(Duration::from_millis(1));
                }
            })
        };

        let summary = run(&config, &cancel).unwrap();
        watcher.join().unwrap();

        assert!(summary.accepted >= 1);
        assert!(summary.accepted < total);
        assert_eq!(summary.lost, 0);

        // Everything accepted before the stop was flushed, not discarded.
        let store = Store::open(&config.db_path).unwrap();
        assert_eq!(store.game_count().unwrap(), summary.accepted);
    }

    #[test]
    fn test_failed_batch_is_counted_lost_and_run_continues() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(
            &dir,
            r#"[Event "One"]
[WhiteElo "1500"]
[BlackElo "1500"]

1. e4 1-0

[Event "Rejected By Store"]
[WhiteElo "1500"]
[BlackElo "1500"]

1. d4 0-1

[Event "Three"]
[WhiteElo "1500"]
[BlackElo "1500"]

1. c4 1-0
"#,
        );
        let mut config = config_for(&dir, &input);
        config.batch_size = 1;

        // Pre-create the schema and arm a trigger that fails the middle
        // game's batch at commit time.
        drop(Store::open(&config.db_path).unwrap());
        let conn = rusqlite::Connection::open(&config.db_path).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER reject_marked BEFORE INSERT ON games
             WHEN NEW.event = 'Rejected By Store'
             BEGIN SELECT RAISE(ABORT, 'marked row'); END;",
        )
        .unwrap();
        drop(conn);

        let summary = run(&config, &CancelToken::new()).unwrap();

        // The failed batch is lost, not retried; later batches still land.
        assert_eq!(summary.accepted, 3);
        assert_eq!(summary.lost, 1);
        assert_eq!(summary.batches_written, 2);

        let store = Store::open(&config.db_path).unwrap();
        assert_eq!(store.game_count().unwrap(), 2);
    }

    #[test]
    fn test_missing_input_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = IngestConfig::new(
            dir.path().join("absent.pgn").to_str().unwrap(),
            dir.path().join("corpus.db"),
        );

        let err = run(&config, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, IngestError::OpenInput { .. }));
    }

    #[test]
    fn test_summary_display_lists_buckets() {
        let summary = IngestSummary {
            bucket_counts: [1, 0, 0, 0, 0, 0, 0, 2],
            accepted: 3,
            rejected: 1,
            skipped: 0,
            lost: 0,
            batches_written: 1,
            elapsed: Duration::from_millis(1500),
        };
        let rendered = summary.to_string();
        assert!(rendered.contains("accepted 3 games"));
        assert!(rendered.contains("1:1"));
        assert!(rendered.contains("8:2"));
    }
}
