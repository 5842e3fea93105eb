use crate::classify::BUCKET_COUNT;
use crate::types::{GameRecord, MoveTimeSample};

pub const DEFAULT_BUCKET_TARGET: u32 = 10_000;
pub const DEFAULT_BATCH_SIZE: usize = 1_000;

/// An accepted game together with its derived timing rows, buffered until
/// the batch is handed to the writer.
#[derive(Debug)]
pub struct AcceptedGame {
    pub record: GameRecord,
    pub samples: Vec<MoveTimeSample>,
}

/// A bounded group of accepted games flushed to storage as one atomic
/// write.
#[derive(Debug)]
pub struct Batch {
    pub games: Vec<AcceptedGame>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketState {
    Open,
    Closed,
}

/// Per-run sampling state: bucket counters plus the in-memory batch
/// buffer. Owned by the orchestrator, mutated nowhere else, discarded at
/// run end.
///
/// A bucket is Open while its accepted count is below the target cap and
/// Closed for the rest of the run once it reaches it; other buckets keep
/// filling independently.
pub struct SamplingState {
    counts: [u32; BUCKET_COUNT],
    bucket_target: u32,
    batch: Vec<AcceptedGame>,
    batch_size: usize,
}

impl SamplingState {
    pub fn new(bucket_target: u32, batch_size: usize) -> Self {
        Self {
            counts: [0; BUCKET_COUNT],
            bucket_target,
            batch: Vec::with_capacity(batch_size.max(1)),
            batch_size: batch_size.max(1),
        }
    }

    pub fn bucket_state(&self, bucket: u8) -> BucketState {
        if self.count(bucket) < self.bucket_target {
            BucketState::Open
        } else {
            BucketState::Closed
        }
    }

    pub fn is_open(&self, bucket: u8) -> bool {
        self.bucket_state(bucket) == BucketState::Open
    }

    fn count(&self, bucket: u8) -> u32 {
        debug_assert!((1..=BUCKET_COUNT as u8).contains(&bucket));
        self.counts[(bucket - 1) as usize]
    }

    /// Buffers an accepted game in its bucket. Returns a full batch when
    /// the buffer reaches the configured size. Ownership of the returned
    /// batch passes to the writer; a failed write is counted as lost,
    /// never re-enqueued here.
    ///
    /// Callers must check `is_open` first; pushing into a Closed bucket is
    /// a logic error.
    pub fn push(&mut self, bucket: u8, game: AcceptedGame) -> Option<Batch> {
        debug_assert!(self.is_open(bucket));
        self.counts[(bucket - 1) as usize] += 1;
        self.batch.push(game);

        if self.batch.len() >= self.batch_size {
            Some(self.take_batch())
        } else {
            None
        }
    }

    /// Residual batch at end-of-stream (or cancellation), flushed
    /// regardless of size.
    pub fn drain(&mut self) -> Option<Batch> {
        if self.batch.is_empty() {
            None
        } else {
            Some(self.take_batch())
        }
    }

    fn take_batch(&mut self) -> Batch {
        let games = std::mem::replace(&mut self.batch, Vec::with_capacity(self.batch_size));
        Batch { games }
    }

    pub fn counts(&self) -> &[u32; BUCKET_COUNT] {
        &self.counts
    }

    pub fn total_accepted(&self) -> u64 {
        self.counts.iter().map(|&c| c as u64).sum()
    }
}
