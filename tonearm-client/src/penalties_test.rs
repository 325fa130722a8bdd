use super::*;
use tonearm_core::{Cpu, FrameStats, Memory};

fn stats(system_load: f64, playing_players: u32) -> NodeStats {
    NodeStats {
        players: playing_players,
        playing_players,
        uptime: 60_000,
        memory: Memory::default(),
        cpu: Cpu {
            cores: 4,
            system_load,
            process_load: system_load / 2.0,
        },
        frame_stats: None,
    }
}

#[test]
fn unavailable_node_is_blocked() {
    let stats = stats(0.1, 0);
    let penalties = Penalties::calculate(false, Some(&stats), 0, &MetricCounts::default());
    assert_eq!(penalties, None);
}

#[test]
fn node_without_stats_is_blocked() {
    let penalties = Penalties::calculate(true, None, 0, &MetricCounts::default());
    assert_eq!(penalties, None);
}

#[test]
fn node_failing_every_load_is_blocked() {
    let stats = stats(0.1, 0);
    let metrics = MetricCounts {
        load_attempt: 4,
        load_failed: 4,
        ..MetricCounts::default()
    };
    assert_eq!(Penalties::calculate(true, Some(&stats), 0, &metrics), None);
}

#[test]
fn partial_load_failures_contribute_nothing() {
    let stats = stats(0.0, 0);
    let metrics = MetricCounts {
        load_attempt: 4,
        load_failed: 3,
        ..MetricCounts::default()
    };
    let penalties = Penalties::calculate(true, Some(&stats), 0, &metrics).unwrap();
    assert_eq!(penalties.load_failed, 0);
}

#[test]
fn idle_node_penalty_is_offsets_only() {
    let stats = stats(0.0, 0);
    let penalties = Penalties::calculate(true, Some(&stats), 0, &MetricCounts::default()).unwrap();
    assert_eq!(penalties.cpu, 0);
    assert_eq!(penalties.player, 0);
    assert_eq!(penalties.track_stuck, -100);
    assert_eq!(penalties.track_exception, -10);
    assert_eq!(penalties.total(), -110);
}

#[test]
fn player_penalty_takes_larger_of_cache_and_stats() {
    let stats = stats(0.0, 3);
    let from_stats = Penalties::calculate(true, Some(&stats), 1, &MetricCounts::default()).unwrap();
    assert_eq!(from_stats.player, 3);

    let from_cache = Penalties::calculate(true, Some(&stats), 8, &MetricCounts::default()).unwrap();
    assert_eq!(from_cache.player, 8);
}

#[test]
fn cpu_penalty_ramps_exponentially() {
    let low = Penalties::calculate(true, Some(&stats(0.05, 0)), 0, &MetricCounts::default())
        .unwrap()
        .cpu;
    let high = Penalties::calculate(true, Some(&stats(0.9, 0)), 0, &MetricCounts::default())
        .unwrap()
        .cpu;
    // 1.05^5 * 10 - 10 and 1.05^90 * 10 - 10
    assert_eq!(low, 2);
    assert_eq!(high, 797);
}

#[test]
fn nulled_frames_weigh_twice_as_much_as_deficit() {
    let mut with_frames = stats(0.0, 0);
    with_frames.frame_stats = Some(FrameStats {
        sent: 3000,
        nulled: 60,
        deficit: 60,
    });
    let penalties =
        Penalties::calculate(true, Some(&with_frames), 0, &MetricCounts::default()).unwrap();
    assert!(penalties.deficit_frame > 0);
    let expected_nulled = ((1.03f64.powf(10.0) * 600.0 - 600.0) * 2.0) as i64;
    assert_eq!(penalties.nulled_frame, expected_nulled);
    assert!(penalties.nulled_frame >= 2 * penalties.deficit_frame);
}

#[test]
fn stuck_and_exception_counts_add_up() {
    let stats = stats(0.0, 0);
    let metrics = MetricCounts {
        track_stuck: 3,
        track_exception: 5,
        ..MetricCounts::default()
    };
    let penalties = Penalties::calculate(true, Some(&stats), 0, &metrics).unwrap();
    assert_eq!(penalties.track_stuck, 200);
    assert_eq!(penalties.track_exception, 40);
}

#[test]
fn region_penalty_only_applies_on_mismatch() {
    assert_eq!(region_penalty(None, Some("europe")), 0);
    assert_eq!(region_penalty(Some("europe"), None), 0);
    assert_eq!(region_penalty(Some("europe"), Some("EUROPE")), 0);
    assert_eq!(region_penalty(Some("us"), Some("europe")), PENALTY_SOFT_BLOCK);
    assert!(PENALTY_SOFT_BLOCK < PENALTY_BLOCK);
}
