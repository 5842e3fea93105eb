pub const BUCKET_COUNT: usize = 8;

/// Games whose players are further apart than this are not representative
/// of a skill band and are rejected.
pub const DEFAULT_MAX_RATING_GAP: i32 = 250;

/// Rating band for the average of the two ratings. Bucket 8 is unbounded
/// above.
pub fn bucket_for_average(avg: i64) -> u8 {
    match avg {
        ..=1200 => 1,
        ..=1400 => 2,
        ..=1600 => 3,
        ..=1800 => 4,
        ..=2000 => 5,
        ..=2200 => 6,
        ..=2400 => 7,
        _ => 8,
    }
}

/// Classifies a game by its players' ratings. Returns the bucket id (1..8)
/// and whether the game is accepted for sampling.
///
/// Not accepted when either rating is absent (missing or non-numeric in
/// the source) or when the ratings differ by more than `max_gap`. The
/// bucket id is 0 and meaningless when a rating is absent; callers only
/// read it for accepted games. Total, never panics.
pub fn classify(white_elo: Option<i32>, black_elo: Option<i32>, max_gap: i32) -> (u8, bool) {
    let (Some(white), Some(black)) = (white_elo, black_elo) else {
        return (0, false);
    };

    // Widened so pathological header values near i32::MAX cannot overflow.
    let (white, black) = (i64::from(white), i64::from(black));
    let bucket = bucket_for_average((white + black) / 2);
    let accepted = (white - black).abs() <= i64::from(max_gap);
    (bucket, accepted)
}
