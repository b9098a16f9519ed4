//! Ranks and points.
//!
//! A rank is derived from accumulated points:
//! `rank = min(19, floor(sqrt(points) / 10))`, so rank `r` starts at
//! `(10 r)^2` points.
//!
//! | rank | points from |
//! |------|-------------|
//! | 0    | 0           |
//! | 1    | 100         |
//! | 2    | 400         |
//! | 10   | 10 000      |
//! | 19   | 36 100      |

use echelon_protocol::MatchStatistics;

pub const MAX_RANK: u32 = 19;

const POINTS_PER_KILL: u64 = 10;
const POINTS_PER_ASSIST: u64 = 5;
const POINTS_PER_OBJECTIVE: u64 = 20;

pub fn rank_from_points(points: u64) -> u32 {
    let rank = points.isqrt() / 10;
    rank.min(u64::from(MAX_RANK)) as u32
}

pub fn points_required_for_rank(rank: u32) -> u64 {
    let base = 10 * u64::from(rank);
    base * base
}

/// Points still missing to the next rank. Zero once past the threshold of
/// the rank above the maximum.
pub fn points_to_next_rank(points: u64) -> u64 {
    points_required_for_rank(rank_from_points(points) + 1).saturating_sub(points)
}

/// Points a tank earns for one match. Deaths cost nothing.
pub fn match_points(stats: &MatchStatistics) -> u64 {
    u64::from(stats.kills) * POINTS_PER_KILL
        + u64::from(stats.assists) * POINTS_PER_ASSIST
        + u64::from(stats.objectives_completed) * POINTS_PER_OBJECTIVE
        + u64::from(stats.objectives_captured) * POINTS_PER_OBJECTIVE
}
