use tonearm_core::NodeStats;

use crate::health_tracker::MetricCounts;
use crate::node::Node;

/// Penalty of a node that must not be selected.
pub const PENALTY_BLOCK: i64 = 1 << 40;

/// Penalty of a node that may serve only when nothing better is healthy.
pub const PENALTY_SOFT_BLOCK: i64 = 1 << 36;

/// Frames a node is expected to send per minute (50 per second).
const EXPECTED_FRAMES_PER_MINUTE: f64 = 3000.0;

/// Extra penalty source summed into a node's total.
pub trait PenaltyProvider: Send + Sync + std::fmt::Debug {
    fn penalty(&self, node: &Node, region: Option<&str>) -> i64;
}

/// Prefers nodes whose region group matches the guild's voice region.
#[derive(Debug, Clone, Default)]
pub struct RegionPenalty;

impl PenaltyProvider for RegionPenalty {
    fn penalty(&self, node: &Node, region: Option<&str>) -> i64 {
        region_penalty(node.region(), region)
    }
}

pub(crate) fn region_penalty(node_region: Option<&str>, wanted: Option<&str>) -> i64 {
    match (node_region, wanted) {
        (Some(group), Some(wanted)) if !group.eq_ignore_ascii_case(wanted) => PENALTY_SOFT_BLOCK,
        _ => 0,
    }
}

/// Breakdown of the health/load penalty of one node. Lower is better.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Penalties {
    pub player: i64,
    pub cpu: i64,
    pub deficit_frame: i64,
    pub nulled_frame: i64,
    pub track_stuck: i64,
    pub track_exception: i64,
    pub load_failed: i64,
}

impl Penalties {
    /// Computes the penalty terms, or `None` when the node is blocked: it is
    /// unavailable, has not reported stats yet, or failed every load it tried.
    pub fn calculate(
        available: bool,
        stats: Option<&NodeStats>,
        playing_cached: usize,
        metrics: &MetricCounts,
    ) -> Option<Penalties> {
        if !available {
            return None;
        }
        let stats = stats?;

        if metrics.load_attempt > 0 && metrics.load_attempt == metrics.load_failed {
            return None;
        }

        let player = (playing_cached as i64).max(stats.playing_players as i64);

        let cpu = saturating_i64(1.05f64.powf(100.0 * stats.cpu.system_load) * 10.0 - 10.0);

        let (deficit_frame, nulled_frame) = match stats.frame_stats {
            Some(frames) => {
                let deficit_ratio = frames.deficit as f64 / EXPECTED_FRAMES_PER_MINUTE;
                let nulled_ratio = frames.nulled as f64 / EXPECTED_FRAMES_PER_MINUTE;
                (
                    saturating_i64(1.03f64.powf(500.0 * deficit_ratio) * 600.0 - 600.0),
                    saturating_i64((1.03f64.powf(500.0 * nulled_ratio) * 600.0 - 600.0) * 2.0),
                )
            }
            None => (0, 0),
        };

        let track_stuck = metrics.track_stuck as i64 * 100 - 100;
        let track_exception = metrics.track_exception as i64 * 10 - 10;
        // integer division: zero unless every attempt failed, which is blocked above
        let load_failed = if metrics.load_failed > 0 {
            (metrics.load_failed / metrics.load_attempt.max(1)) as i64
        } else {
            0
        };

        Some(Penalties {
            player,
            cpu,
            deficit_frame,
            nulled_frame,
            track_stuck,
            track_exception,
            load_failed,
        })
    }

    pub fn total(&self) -> i64 {
        [
            self.player,
            self.cpu,
            self.deficit_frame,
            self.nulled_frame,
            self.track_stuck,
            self.track_exception,
            self.load_failed,
        ]
        .into_iter()
        .fold(0i64, i64::saturating_add)
    }
}

/// Health/load total of `node` without any provider terms.
pub fn calculate_total(node: &Node, metrics: &MetricCounts) -> i64 {
    let stats = node.stats();
    Penalties::calculate(
        node.is_available(),
        stats.as_ref(),
        node.playing_player_count(),
        metrics,
    )
    .map(|penalties| penalties.total())
    .unwrap_or(PENALTY_BLOCK)
}

fn saturating_i64(value: f64) -> i64 {
    // `as` saturates on overflow and maps NaN to zero
    value as i64
}

#[cfg(test)]
#[path = "penalties_test.rs"]
mod penalties_test;
