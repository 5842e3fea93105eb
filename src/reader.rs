use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use log::warn;
use pgn_reader::Reader;
use zstd::stream::read::Decoder as ZstdDecoder;

use crate::error::IngestError;
use crate::types::ParsedGame;
use crate::visitor::GameVisitor;

pub type PgnInput = Box<dyn Read + Send>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Compression {
    Plain,
    Zstd,
}

impl Compression {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let normalized = raw.trim();
        if normalized.is_empty() {
            return Err(
                "Invalid compression value ''. Supported values: 'zstd' or omitted.".to_string(),
            );
        }

        if normalized.eq_ignore_ascii_case("zstd") {
            Ok(Self::Zstd)
        } else {
            Err(format!(
                "Invalid compression value '{}'. Supported values: 'zstd' or omitted.",
                normalized
            ))
        }
    }
}

/// One pull from the stream: either the next decoded game or a skip signal
/// carrying the reason a read failed. Read failures here are stream-level
/// (truncated or corrupt input), so a skip also abandons the remainder of
/// that file; the stream continues with the next input.
#[derive(Debug)]
pub enum ReadOutcome {
    Game(ParsedGame),
    Skip { reason: String },
}

struct CurrentReader {
    // pgn-reader buffers the underlying reader itself, so no extra
    // BufReader layer is added here.
    reader: Reader<PgnInput>,
    visitor: GameVisitor,
    path_idx: usize,
    next_game_index: usize,
}

/// Sequential game stream over one file or a glob of files. Record
/// boundaries in PGN are self-delimiting only when read in order, so
/// there is exactly one of these per run.
pub struct GameStream {
    paths: Vec<PathBuf>,
    compression: Compression,
    next_path_idx: usize,
    current: Option<CurrentReader>,
}

impl GameStream {
    /// Expands the pattern and opens the first readable input. A single
    /// input that cannot be opened is fatal; with multiple inputs,
    /// unopenable files are logged and skipped.
    pub fn open(pattern: &str, compression: Compression) -> Result<Self, IngestError> {
        let paths = expand_paths(pattern)?;

        let mut stream = Self {
            paths,
            compression,
            next_path_idx: 0,
            current: None,
        };

        if !stream.advance_reader()? {
            return Err(IngestError::NoInput(pattern.to_string()));
        }

        Ok(stream)
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Moves to the next openable input file. Returns false when the path
    /// list is exhausted. Open failures are fatal only for a single-file
    /// run.
    fn advance_reader(&mut self) -> Result<bool, IngestError> {
        while self.next_path_idx < self.paths.len() {
            let path_idx = self.next_path_idx;
            self.next_path_idx += 1;

            let path = self.paths[path_idx].clone();
            match open_input_stream(&path, self.compression) {
                Ok(input) => {
                    self.current = Some(CurrentReader {
                        reader: Reader::new(input),
                        visitor: GameVisitor::new(),
                        path_idx,
                        next_game_index: 1,
                    });
                    return Ok(true);
                }
                Err(source) => {
                    if self.paths.len() == 1 {
                        return Err(IngestError::OpenInput { path, source });
                    }
                    warn!("skipping input '{}': {}", path.display(), source);
                }
            }
        }

        self.current = None;
        Ok(false)
    }
}

impl Iterator for GameStream {
    type Item = ReadOutcome;

    fn next(&mut self) -> Option<ReadOutcome> {
        loop {
            if self.current.is_none() {
                match self.advance_reader() {
                    Ok(true) => {}
                    Ok(false) => return None,
                    Err(err) => {
                        // Only reachable for a single-file run, which was
                        // opened eagerly in open(); treat defensively.
                        return Some(ReadOutcome::Skip {
                            reason: err.to_string(),
                        });
                    }
                }
            }

            let current = self.current.as_mut()?;
            let game_index = current.next_game_index;
            let path = &self.paths[current.path_idx];

            match current.reader.read_game(&mut current.visitor) {
                Ok(Some(_)) => {
                    current.next_game_index += 1;
                    match current.visitor.current_game.take() {
                        Some(game) => return Some(ReadOutcome::Game(game)),
                        None => {
                            self.current = None;
                        }
                    }
                }
                Ok(None) => {
                    self.current = None;
                }
                Err(error) => {
                    let reason = format!(
                        "failed to decode game {} in '{}': {}",
                        game_index,
                        path.display(),
                        error
                    );
                    // The underlying stream is broken; retrying the same
                    // reader would fail forever. Move on to the next file.
                    self.current = None;
                    return Some(ReadOutcome::Skip { reason });
                }
            }
        }
    }
}

fn expand_paths(pattern: &str) -> Result<Vec<PathBuf>, IngestError> {
    if pattern.contains('*') || pattern.contains('?') {
        let paths: Vec<PathBuf> = glob::glob(pattern)
            .map_err(|_| IngestError::NoInput(pattern.to_string()))?
            .filter_map(|entry| entry.ok())
            .collect();
        Ok(paths)
    } else {
        Ok(vec![PathBuf::from(pattern)])
    }
}

fn open_input_stream(path: &Path, compression: Compression) -> std::io::Result<PgnInput> {
    let file = File::open(path)?;

    match compression {
        Compression::Plain => Ok(Box::new(file)),
        Compression::Zstd => Ok(Box::new(ZstdDecoder::new(file)?)),
    }
}
