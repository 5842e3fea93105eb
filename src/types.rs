use chrono::NaiveDate;
use uuid::Uuid;

/// The side to move, derived from the shared 1-based ply counter:
/// odd plies are White moves, even plies are Black moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub fn from_move_number(move_number: u32) -> Self {
        if move_number % 2 == 1 {
            Self::White
        } else {
            Self::Black
        }
    }

    pub fn index(self) -> usize {
        match self {
            Self::White => 0,
            Self::Black => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::White => "white",
            Self::Black => "black",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "white" => Some(Self::White),
            "black" => Some(Self::Black),
            _ => None,
        }
    }
}

/// One mainline half-move with the trailing `{ ... }` comment text, if any.
#[derive(Debug, Clone)]
pub struct Ply {
    pub san: String,
    pub comment: Option<String>,
}

/// One game as parsed off the stream, before any sampling decision.
/// Header values stay optional here; missing or non-numeric ratings are
/// a rejection at the sampling stage, never a zero default.
#[derive(Debug, Clone, Default)]
pub struct ParsedGame {
    pub event: Option<String>,
    pub site: Option<String>,
    pub date: Option<String>,
    pub white: Option<String>,
    pub black: Option<String>,
    pub result: Option<String>,
    pub white_elo: Option<i32>,
    pub black_elo: Option<i32>,
    pub eco: Option<String>,
    pub termination: Option<String>,
    pub time_control: Option<String>,

    /// Full movetext, comments included, stored verbatim for later replay.
    pub movetext: String,

    /// Ordered mainline plies with attached comment text.
    pub plies: Vec<Ply>,
}

/// An accepted game. The identity is generated at acceptance time and is
/// never taken from the source stream. Immutable once built.
#[derive(Debug, Clone)]
pub struct GameRecord {
    pub id: Uuid,
    pub white_elo: i32,
    pub black_elo: i32,
    pub event: Option<String>,
    pub site: Option<String>,
    pub game_date: String,
    pub white_player: Option<String>,
    pub black_player: Option<String>,
    pub result: Option<String>,
    pub eco: Option<String>,
    pub termination: Option<String>,
    pub raw_movetext: String,
}

impl GameRecord {
    /// Builds an accepted record from a parsed game whose ratings have
    /// already passed classification.
    pub fn accept(game: ParsedGame, white_elo: i32, black_elo: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            white_elo,
            black_elo,
            game_date: normalize_game_date(game.date.as_deref()),
            event: game.event,
            site: game.site,
            white_player: game.white,
            black_player: game.black,
            result: game.result,
            eco: game.eco,
            termination: game.termination,
            raw_movetext: game.movetext,
        }
    }
}

/// Remaining/think time for one annotated move, owned by exactly one game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveTimeSample {
    pub move_number: u32,
    pub side: Side,
    pub remaining_secs: i64,
    pub think_secs: i64,
}

pub const UNKNOWN_DATE: &str = "unknown";

/// Best-effort parse of a `Date` header (`YYYY.MM.DD`). Placeholder values
/// like `????.??.??` and anything unparsable become "unknown" rather than
/// an error.
pub fn normalize_game_date(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return UNKNOWN_DATE.to_string();
    };

    match NaiveDate::parse_from_str(raw.trim(), "%Y.%m.%d") {
        Ok(date) => date.format("%Y-%m-%d").to_string(),
        Err(_) => UNKNOWN_DATE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_from_move_number_alternates_by_parity() {
        assert_eq!(Side::from_move_number(1), Side::White);
        assert_eq!(Side::from_move_number(2), Side::Black);
        assert_eq!(Side::from_move_number(41), Side::White);
    }

    #[test]
    fn test_side_str_round_trip() {
        assert_eq!(Side::from_str(Side::White.as_str()), Some(Side::White));
        assert_eq!(Side::from_str(Side::Black.as_str()), Some(Side::Black));
        assert_eq!(Side::from_str("grey"), None);
    }

    #[test]
    fn test_normalize_game_date_valid() {
        assert_eq!(normalize_game_date(Some("2024.01.05")), "2024-01-05");
    }

    #[test]
    fn test_normalize_game_date_placeholder_becomes_unknown() {
        assert_eq!(normalize_game_date(Some("????.??.??")), UNKNOWN_DATE);
    }

    #[test]
    fn test_normalize_game_date_invalid_becomes_unknown() {
        assert_eq!(normalize_game_date(Some("2024.13.40")), UNKNOWN_DATE);
        assert_eq!(normalize_game_date(Some("not a date")), UNKNOWN_DATE);
        assert_eq!(normalize_game_date(None), UNKNOWN_DATE);
    }

    #[test]
    fn test_accept_generates_fresh_identity() {
        let game = ParsedGame {
            white_elo: Some(1500),
            black_elo: Some(1510),
            movetext: "1. e4 e5".to_string(),
            ..Default::default()
        };
        let a = GameRecord::accept(game.clone(), 1500, 1510);
        let b = GameRecord::accept(game, 1500, 1510);
        assert_ne!(a.id, b.id);
        assert_eq!(a.raw_movetext, "1. e4 e5");
        assert_eq!(a.game_date, UNKNOWN_DATE);
    }
}
