use std::path::Path;
use std::thread;
use std::time::Duration;

use log::warn;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::error::IngestError;
use crate::sampler::Batch;
use crate::types::{GameRecord, MoveTimeSample, Side};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS games (
    game_uuid    TEXT PRIMARY KEY,
    pgn          TEXT NOT NULL,
    white_elo    INTEGER NOT NULL,
    black_elo    INTEGER NOT NULL,
    event        TEXT,
    site         TEXT,
    game_date    TEXT NOT NULL,
    white_player TEXT,
    black_player TEXT,
    result       TEXT,
    eco          TEXT,
    termination  TEXT
);
CREATE INDEX IF NOT EXISTS idx_games_white_elo ON games (white_elo);
CREATE INDEX IF NOT EXISTS idx_games_black_elo ON games (black_elo);

CREATE TABLE IF NOT EXISTS move_times (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    game_uuid      TEXT NOT NULL REFERENCES games (game_uuid),
    move_number    INTEGER NOT NULL,
    side           TEXT NOT NULL,
    remaining_secs INTEGER NOT NULL,
    think_secs     INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_move_times_game ON move_times (game_uuid);
";

/// SQLite-backed corpus store: the `games` relation (one row per accepted
/// record, verbatim movetext included) and the `move_times` relation
/// (per-annotated-move timing rows, foreign-keyed to the game).
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        // WAL keeps concurrent readers from blocking batch commits.
        if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
            warn!("failed to enable WAL mode: {err}");
        }
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Bounded startup connectivity check: fixed delay between attempts.
    /// This is the only retried store operation; batch writes never retry.
    pub fn open_with_retry(
        path: &Path,
        attempts: u32,
        delay: Duration,
    ) -> Result<Self, IngestError> {
        let attempts = attempts.max(1);

        for attempt in 1..attempts {
            match Self::open(path) {
                Ok(store) => return Ok(store),
                Err(err) => {
                    warn!("store open attempt {attempt}/{attempts} failed: {err}");
                    thread::sleep(delay);
                }
            }
        }

        Self::open(path).map_err(|source| IngestError::StoreUnavailable {
            path: path.to_path_buf(),
            attempts,
            source,
        })
    }

    /// Persists a batch as a single transaction: either every game and
    /// every timing row lands, or none do. On failure the error carries
    /// the batch boundaries so the caller can log and move on.
    pub fn write_batch(&mut self, batch: &Batch) -> Result<(), IngestError> {
        let first = batch.games.first().map(|g| g.record.id).unwrap_or(Uuid::nil());
        let last = batch.games.last().map(|g| g.record.id).unwrap_or(Uuid::nil());

        self.write_batch_tx(batch).map_err(|source| IngestError::BatchWrite {
            len: batch.len(),
            first,
            last,
            source,
        })
    }

    fn write_batch_tx(&mut self, batch: &Batch) -> Result<(), rusqlite::Error> {
        let tx = self.conn.transaction()?;

        {
            let mut insert_game = tx.prepare_cached(
                "INSERT INTO games (
                    game_uuid, pgn, white_elo, black_elo, event, site,
                    game_date, white_player, black_player, result, eco, termination
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            let mut insert_sample = tx.prepare_cached(
                "INSERT INTO move_times (
                    game_uuid, move_number, side, remaining_secs, think_secs
                 ) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;

            for game in &batch.games {
                let record = &game.record;
                let id = record.id.to_string();

                insert_game.execute(params![
                    id,
                    record.raw_movetext,
                    record.white_elo,
                    record.black_elo,
                    record.event,
                    record.site,
                    record.game_date,
                    record.white_player,
                    record.black_player,
                    record.result,
                    record.eco,
                    record.termination,
                ])?;

                for sample in &game.samples {
                    insert_sample.execute(params![
                        id,
                        sample.move_number,
                        sample.side.as_str(),
                        sample.remaining_secs,
                        sample.think_secs,
                    ])?;
                }
            }
        }

        tx.commit()
    }

    /// Read-side collaborator surface: the stored record and its timing
    /// rows, unmodified, for a given game identity.
    pub fn fetch_game(
        &self,
        id: Uuid,
    ) -> Result<Option<(GameRecord, Vec<MoveTimeSample>)>, IngestError> {
        let record = self
            .conn
            .query_row(
                "SELECT pgn, white_elo, black_elo, event, site, game_date,
                        white_player, black_player, result, eco, termination
                 FROM games WHERE game_uuid = ?1",
                params![id.to_string()],
                |row| {
                    Ok(GameRecord {
                        id,
                        raw_movetext: row.get(0)?,
                        white_elo: row.get(1)?,
                        black_elo: row.get(2)?,
                        event: row.get(3)?,
                        site: row.get(4)?,
                        game_date: row.get(5)?,
                        white_player: row.get(6)?,
                        black_player: row.get(7)?,
                        result: row.get(8)?,
                        eco: row.get(9)?,
                        termination: row.get(10)?,
                    })
                },
            )
            .optional()?;

        let Some(record) = record else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            "SELECT move_number, side, remaining_secs, think_secs
             FROM move_times WHERE game_uuid = ?1
             ORDER BY move_number ASC",
        )?;

        let samples = stmt
            .query_map(params![id.to_string()], |row| {
                let side_str: String = row.get(1)?;
                let side = Side::from_str(&side_str).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        1,
                        rusqlite::types::Type::Text,
                        format!("unknown side '{side_str}'").into(),
                    )
                })?;

                Ok(MoveTimeSample {
                    move_number: row.get(0)?,
                    side,
                    remaining_secs: row.get(2)?,
                    think_secs: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some((record, samples)))
    }

    pub fn game_count(&self) -> Result<u64, IngestError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM games", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn sample_count(&self) -> Result<u64, IngestError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM move_times", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
