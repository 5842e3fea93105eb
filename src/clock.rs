use std::sync::LazyLock;

use log::debug;
use regex::Regex;

use crate::types::{MoveTimeSample, ParsedGame, Side};

/// Fallback budget when the `TimeControl` header is absent, `-`, `?`, or
/// unparsable: 300 seconds, no increment.
pub const DEFAULT_BUDGET_SECS: i64 = 300;

/// Declared starting time budget for both sides, from the `TimeControl`
/// header (`"<seconds>+<increment>"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBudget {
    pub base_secs: i64,
    pub increment_secs: i64,
}

impl TimeBudget {
    pub const DEFAULT: Self = Self {
        base_secs: DEFAULT_BUDGET_SECS,
        increment_secs: 0,
    };
}

static CLOCK_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[%clk\s+([^\]]*)\]").unwrap());

/// Parses a `TimeControl` header value. Only the `base+increment` form is
/// meaningful here; `-`, `?`, multi-stage controls and free text all fall
/// back to the default budget.
pub fn parse_time_budget(raw: Option<&str>) -> TimeBudget {
    let Some(raw) = raw else {
        return TimeBudget::DEFAULT;
    };

    let s = raw.trim();
    if s.is_empty() || s == "-" || s == "?" {
        return TimeBudget::DEFAULT;
    }

    let (base_part, inc_part) = match s.split_once('+') {
        Some((base, inc)) => (base, Some(inc)),
        None => (s, None),
    };

    let Ok(base_secs) = base_part.trim().parse::<i64>() else {
        return TimeBudget::DEFAULT;
    };

    let increment_secs = match inc_part {
        Some(inc) => match inc.trim().parse::<i64>() {
            Ok(v) => v,
            Err(_) => return TimeBudget::DEFAULT,
        },
        None => 0,
    };

    if base_secs < 0 || increment_secs < 0 {
        return TimeBudget::DEFAULT;
    }

    TimeBudget {
        base_secs,
        increment_secs,
    }
}

/// Parses a clock reading in `H:MM:SS` or `MM:SS` form into seconds.
/// Minute and second fields must stay below 60; anything else is rejected.
pub fn parse_clock_duration(raw: &str) -> Option<i64> {
    let parts: Vec<&str> = raw.trim().split(':').collect();

    let (hours, minutes, seconds) = match parts.as_slice() {
        [m, s] => (0i64, m.parse::<i64>().ok()?, s.parse::<i64>().ok()?),
        [h, m, s] => (
            h.parse::<i64>().ok()?,
            m.parse::<i64>().ok()?,
            s.parse::<i64>().ok()?,
        ),
        _ => return None,
    };

    if hours < 0 || !(0..60).contains(&minutes) || !(0..60).contains(&seconds) {
        return None;
    }

    Some(hours * 3600 + minutes * 60 + seconds)
}

/// Normalizes a duration in seconds to `HH:MM:SS`.
pub fn format_hms(secs: i64) -> String {
    let sign = if secs < 0 { "-" } else { "" };
    let secs = secs.abs();
    format!(
        "{}{:02}:{:02}:{:02}",
        sign,
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    )
}

/// Extracts the `[%clk ...]` reading from one move's comment text, if any.
fn find_clock_reading(comment: &str) -> Option<&str> {
    CLOCK_TAG
        .captures(comment)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Walks a game's plies in order and derives one `MoveTimeSample` per
/// annotated move.
///
/// Both sides start at the declared budget. Each clock reading becomes the
/// mover's new remaining value; think time is the drop since that side's
/// previous reading, zero for the first one. The increment is credited to
/// both trackers once per completed move pair, after Black's move. Think
/// time can go negative right after a credit.
pub fn extract_move_times(game: &ParsedGame) -> Vec<MoveTimeSample> {
    let budget = parse_time_budget(game.time_control.as_deref());

    let mut remaining = [budget.base_secs; 2];
    let mut seen = [false; 2];
    let mut samples = Vec::new();

    for (idx, ply) in game.plies.iter().enumerate() {
        let move_number = idx as u32 + 1;
        let side = Side::from_move_number(move_number);

        if let Some(comment) = ply.comment.as_deref()
            && let Some(reading) = find_clock_reading(comment)
        {
            match parse_clock_duration(reading) {
                Some(new_remaining) => {
                    let think_secs = if seen[side.index()] {
                        remaining[side.index()] - new_remaining
                    } else {
                        0
                    };

                    seen[side.index()] = true;
                    remaining[side.index()] = new_remaining;

                    samples.push(MoveTimeSample {
                        move_number,
                        side,
                        remaining_secs: new_remaining,
                        think_secs,
                    });
                }
                None => {
                    debug!(
                        "skipping malformed clock reading '{}' at move {}",
                        reading, move_number
                    );
                }
            }
        }

        if side == Side::Black && budget.increment_secs > 0 {
            remaining[0] += budget.increment_secs;
            remaining[1] += budget.increment_secs;
        }
    }

    samples
}
