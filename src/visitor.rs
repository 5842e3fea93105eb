use std::fmt::Write;
use std::mem;
use std::ops::ControlFlow;

use pgn_reader::{Outcome, RawComment, RawTag, SanPlus, Skip, Visitor};

use crate::types::{ParsedGame, Ply};

/// Streaming PGN visitor (pgn-reader).
///
/// Accumulates the mainline movetext into a `String` verbatim, `{ ... }`
/// comments included (whitespace-normalized), and in parallel builds an
/// ordered `Vec<Ply>` with each comment attached to the move it follows.
/// The result marker is captured separately via `outcome()` (or the
/// `Result` tag as fallback). Variations are skipped.
pub struct GameVisitor {
    headers: HeaderFields,
    movetext_buffer: String,
    plies: Vec<Ply>,
    move_count: u32,
    result_marker: Option<String>,
    pub current_game: Option<ParsedGame>,
}

#[derive(Default)]
struct HeaderFields {
    event: String,
    site: String,
    date: String,
    white: String,
    black: String,
    result: String,
    white_elo: String,
    black_elo: String,
    eco: String,
    termination: String,
    time_control: String,
}

impl HeaderFields {
    fn clear(&mut self) {
        *self = Self::default();
    }

    fn opt_take(field: &mut String) -> Option<String> {
        if field.is_empty() {
            None
        } else {
            Some(mem::take(field))
        }
    }

    fn set_known_tag(&mut self, key: &[u8], value: RawTag<'_>) {
        let slot: &mut String = match key {
            b"Event" => &mut self.event,
            b"Site" => &mut self.site,
            b"Date" => &mut self.date,
            b"White" => &mut self.white,
            b"Black" => &mut self.black,
            b"Result" => &mut self.result,
            b"WhiteElo" => &mut self.white_elo,
            b"BlackElo" => &mut self.black_elo,
            b"ECO" => &mut self.eco,
            b"Termination" => &mut self.termination,
            b"TimeControl" => &mut self.time_control,
            _ => return,
        };

        if !slot.is_empty() {
            return;
        }

        let bytes = value.as_bytes();
        if bytes.is_empty() {
            return;
        }

        *slot = String::from_utf8_lossy(bytes).into_owned();
    }
}

impl GameVisitor {
    pub fn new() -> Self {
        Self {
            headers: HeaderFields::default(),
            movetext_buffer: String::new(),
            plies: Vec::new(),
            move_count: 0,
            result_marker: None,
            current_game: None,
        }
    }

    /// Missing or non-numeric ratings stay `None`; the sampling stage
    /// rejects them, so no diagnostic is recorded here.
    fn parse_elo(raw: &str) -> Option<i32> {
        let s = raw.trim();
        if s.is_empty() {
            return None;
        }
        s.parse::<i32>().ok()
    }

    fn build_game(&mut self) {
        let white_elo = Self::parse_elo(&self.headers.white_elo);
        let black_elo = Self::parse_elo(&self.headers.black_elo);

        let movetext = {
            let needs_trim = {
                let trimmed = self.movetext_buffer.trim();
                trimmed.len() != self.movetext_buffer.len()
            };

            if needs_trim {
                let trimmed = self.movetext_buffer.trim().to_string();
                let _ = mem::take(&mut self.movetext_buffer);
                trimmed
            } else {
                mem::take(&mut self.movetext_buffer)
            }
        };

        self.current_game = Some(ParsedGame {
            event: HeaderFields::opt_take(&mut self.headers.event),
            site: HeaderFields::opt_take(&mut self.headers.site),
            date: HeaderFields::opt_take(&mut self.headers.date),
            white: HeaderFields::opt_take(&mut self.headers.white),
            black: HeaderFields::opt_take(&mut self.headers.black),
            result: HeaderFields::opt_take(&mut self.headers.result)
                .or_else(|| self.result_marker.take()),
            white_elo,
            black_elo,
            eco: HeaderFields::opt_take(&mut self.headers.eco),
            termination: HeaderFields::opt_take(&mut self.headers.termination),
            time_control: HeaderFields::opt_take(&mut self.headers.time_control),
            movetext,
            plies: mem::take(&mut self.plies),
        });
    }
}

impl Default for GameVisitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Visitor for GameVisitor {
    type Tags = ();
    type Movetext = String;
    type Output = ();

    fn begin_tags(&mut self) -> ControlFlow<Self::Output, Self::Tags> {
        self.headers.clear();
        self.movetext_buffer.clear();
        self.plies.clear();
        self.move_count = 0;
        self.result_marker = None;
        self.current_game = None;
        ControlFlow::Continue(())
    }

    fn tag(
        &mut self,
        _: &mut Self::Tags,
        key: &[u8],
        value: RawTag<'_>,
    ) -> ControlFlow<Self::Output> {
        self.headers.set_known_tag(key, value);
        ControlFlow::Continue(())
    }

    fn begin_movetext(&mut self, _: Self::Tags) -> ControlFlow<Self::Output, Self::Movetext> {
        ControlFlow::Continue(String::with_capacity(256))
    }

    fn begin_variation(&mut self, _: &mut Self::Movetext) -> ControlFlow<Self::Output, Skip> {
        ControlFlow::Continue(Skip(true))
    }

    fn san(&mut self, movetext: &mut Self::Movetext, san: SanPlus) -> ControlFlow<Self::Output> {
        if !movetext.is_empty() {
            movetext.push(' ');
        }

        if self.move_count.is_multiple_of(2) {
            let _ = write!(movetext, "{}. ", (self.move_count / 2) + 1);
        }

        let _ = write!(movetext, "{}", san);
        self.move_count += 1;

        self.plies.push(Ply {
            san: san.to_string(),
            comment: None,
        });

        ControlFlow::Continue(())
    }

    fn comment(
        &mut self,
        movetext: &mut Self::Movetext,
        comment: RawComment<'_>,
    ) -> ControlFlow<Self::Output> {
        let comment_str = String::from_utf8_lossy(comment.as_bytes());
        let trimmed = comment_str.trim();

        if !movetext.is_empty() {
            movetext.push(' ');
        }
        movetext.push('{');
        movetext.push(' ');
        movetext.push_str(trimmed);
        movetext.push(' ');
        movetext.push('}');

        // A comment before the first move has no ply to attach to; it is
        // still preserved in the verbatim movetext above.
        if let Some(ply) = self.plies.last_mut() {
            match &mut ply.comment {
                Some(existing) => {
                    existing.push(' ');
                    existing.push_str(trimmed);
                }
                None => ply.comment = Some(trimmed.to_string()),
            }
        }

        ControlFlow::Continue(())
    }

    fn outcome(
        &mut self,
        _movetext: &mut Self::Movetext,
        outcome: Outcome,
    ) -> ControlFlow<Self::Output> {
        self.result_marker = Some(outcome.to_string());
        ControlFlow::Continue(())
    }

    fn end_game(&mut self, movetext: Self::Movetext) -> Self::Output {
        let marker = self
            .result_marker
            .take()
            .or_else(|| HeaderFields::opt_take(&mut self.headers.result));
        self.result_marker = marker;

        self.movetext_buffer = movetext;
        self.build_game();
    }
}
