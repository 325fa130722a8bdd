use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Number of minute buckets retained per node.
pub const MAX_BUCKETS: usize = 100;

/// Failure signals counted per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthMetric {
    TrackStuck,
    TrackException,
    LoadFailed,
    LoadAttempt,
}

/// Counter totals, either of one bucket or aggregated over all buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricCounts {
    pub track_stuck: u64,
    pub track_exception: u64,
    pub load_failed: u64,
    pub load_attempt: u64,
}

impl MetricCounts {
    fn increment(&mut self, metric: HealthMetric) {
        match metric {
            HealthMetric::TrackStuck => self.track_stuck += 1,
            HealthMetric::TrackException => self.track_exception += 1,
            HealthMetric::LoadFailed => self.load_failed += 1,
            HealthMetric::LoadAttempt => self.load_attempt += 1,
        }
    }

    fn add(&mut self, other: &MetricCounts) {
        self.track_stuck += other.track_stuck;
        self.track_exception += other.track_exception;
        self.load_failed += other.load_failed;
        self.load_attempt += other.load_attempt;
    }

    pub fn get(&self, metric: HealthMetric) -> u64 {
        match metric {
            HealthMetric::TrackStuck => self.track_stuck,
            HealthMetric::TrackException => self.track_exception,
            HealthMetric::LoadFailed => self.load_failed,
            HealthMetric::LoadAttempt => self.load_attempt,
        }
    }
}

/// Per-node failure counters bucketed by wall-clock minute.
///
/// Each node keeps at most [`MAX_BUCKETS`] minute buckets; when a new minute
/// overflows the store, the least recently touched bucket is evicted. There is
/// no other expiry.
#[derive(Debug)]
pub struct HealthTracker {
    nodes: DashMap<String, Mutex<LruCache<u64, MetricCounts>>>,
    capacity: NonZeroUsize,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::with_capacity(MAX_BUCKETS)
    }

    pub fn with_capacity(buckets: usize) -> Self {
        HealthTracker {
            nodes: DashMap::new(),
            capacity: NonZeroUsize::new(buckets).unwrap_or(NonZeroUsize::MIN),
        }
    }

    /// Counts `metric` for `node` in the current minute.
    pub fn track_metric(&self, node: &str, metric: HealthMetric) {
        self.track_metric_at(node, metric, current_minute());
    }

    /// Counts `metric` for `node` in the bucket of `minute` (minutes since the epoch).
    pub fn track_metric_at(&self, node: &str, metric: HealthMetric, minute: u64) {
        let buckets = self
            .nodes
            .entry(node.to_string())
            .or_insert_with(|| Mutex::new(LruCache::new(self.capacity)));
        let mut buckets = buckets.lock();
        buckets
            .get_or_insert_mut(minute, MetricCounts::default)
            .increment(metric);
    }

    /// Sums every retained bucket of `node`.
    pub fn aggregate(&self, node: &str) -> MetricCounts {
        let mut total = MetricCounts::default();
        if let Some(buckets) = self.nodes.get(node) {
            for (_, counts) in buckets.lock().iter() {
                total.add(counts);
            }
        }
        total
    }

    pub fn bucket_count(&self, node: &str) -> usize {
        self.nodes
            .get(node)
            .map(|buckets| buckets.lock().len())
            .unwrap_or(0)
    }

    /// Drops every bucket of `node`.
    pub fn reset(&self, node: &str) {
        if self.nodes.remove(node).is_some() {
            debug!(node = %node, "health metrics cleared");
        }
    }
}

fn current_minute() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() / 60)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate_in_the_same_minute() {
        let tracker = HealthTracker::new();
        tracker.track_metric_at("node-a", HealthMetric::LoadAttempt, 10);
        tracker.track_metric_at("node-a", HealthMetric::LoadAttempt, 10);
        tracker.track_metric_at("node-a", HealthMetric::LoadFailed, 10);

        assert_eq!(tracker.bucket_count("node-a"), 1);
        let counts = tracker.aggregate("node-a");
        assert_eq!(counts.load_attempt, 2);
        assert_eq!(counts.load_failed, 1);
        assert_eq!(counts.get(HealthMetric::TrackStuck), 0);
    }

    #[test]
    fn aggregate_spans_buckets_and_nodes_are_isolated() {
        let tracker = HealthTracker::new();
        tracker.track_metric_at("node-a", HealthMetric::TrackStuck, 1);
        tracker.track_metric_at("node-a", HealthMetric::TrackStuck, 2);
        tracker.track_metric_at("node-b", HealthMetric::TrackException, 2);

        assert_eq!(tracker.aggregate("node-a").track_stuck, 2);
        assert_eq!(tracker.aggregate("node-a").track_exception, 0);
        assert_eq!(tracker.aggregate("node-b").track_exception, 1);
        assert_eq!(tracker.aggregate("unknown"), MetricCounts::default());
    }

    #[test]
    fn retains_one_hundred_buckets() {
        let tracker = HealthTracker::new();
        for minute in 0..150 {
            tracker.track_metric_at("node-a", HealthMetric::LoadAttempt, minute);
        }

        assert_eq!(tracker.bucket_count("node-a"), MAX_BUCKETS);
        // minutes 0..50 were the least recently touched
        assert_eq!(tracker.aggregate("node-a").load_attempt, 100);
    }

    #[test]
    fn touching_a_bucket_protects_it_from_eviction() {
        let tracker = HealthTracker::with_capacity(3);
        tracker.track_metric_at("node-a", HealthMetric::TrackStuck, 1);
        tracker.track_metric_at("node-a", HealthMetric::LoadAttempt, 2);
        tracker.track_metric_at("node-a", HealthMetric::LoadAttempt, 3);
        // minute 1 becomes the most recently touched
        tracker.track_metric_at("node-a", HealthMetric::LoadAttempt, 1);
        tracker.track_metric_at("node-a", HealthMetric::LoadAttempt, 4);

        let counts = tracker.aggregate("node-a");
        assert_eq!(tracker.bucket_count("node-a"), 3);
        assert_eq!(counts.track_stuck, 1);
        assert_eq!(counts.load_attempt, 3);
    }

    #[test]
    fn reset_clears_node() {
        let tracker = HealthTracker::new();
        tracker.track_metric("node-a", HealthMetric::TrackException);
        assert_eq!(tracker.aggregate("node-a").track_exception, 1);

        tracker.reset("node-a");
        assert_eq!(tracker.bucket_count("node-a"), 0);
        assert_eq!(tracker.aggregate("node-a"), MetricCounts::default());
    }
}
