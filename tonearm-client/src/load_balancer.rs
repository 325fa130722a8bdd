use std::sync::Arc;

use crate::health_tracker::HealthTracker;
use crate::node::Node;
use crate::penalties::{self, PenaltyProvider, RegionPenalty, PENALTY_BLOCK};

/// Picks the least penalised node out of a candidate set.
#[derive(Debug)]
pub struct LoadBalancer {
    health: Arc<HealthTracker>,
    providers: Vec<Arc<dyn PenaltyProvider>>,
}

impl LoadBalancer {
    /// A balancer with the region provider only.
    pub fn new(health: Arc<HealthTracker>) -> Self {
        Self::with_providers(health, vec![Arc::new(RegionPenalty)])
    }

    pub fn with_providers(health: Arc<HealthTracker>, providers: Vec<Arc<dyn PenaltyProvider>>) -> Self {
        LoadBalancer { health, providers }
    }

    pub fn add_provider(&mut self, provider: Arc<dyn PenaltyProvider>) {
        self.providers.push(provider);
    }

    /// Total penalty of `node` for a guild hinting at `region`. Lower is better.
    pub fn calculate_total(&self, node: &Node, region: Option<&str>) -> i64 {
        let metrics = self.health.aggregate(node.name());
        let base = penalties::calculate_total(node, &metrics);
        if base >= PENALTY_BLOCK {
            return PENALTY_BLOCK;
        }
        self.providers
            .iter()
            .map(|provider| provider.penalty(node, region))
            .fold(base, i64::saturating_add)
    }

    /// Every candidate with its total penalty, lowest first. Ties keep the
    /// candidates' order.
    pub fn rankings(&self, candidates: &[Arc<Node>], region: Option<&str>) -> Vec<(String, i64)> {
        let mut ranked: Vec<(String, i64)> = candidates
            .iter()
            .map(|node| (node.name().to_string(), self.calculate_total(node, region)))
            .collect();
        ranked.sort_by_key(|&(_, total)| total);
        ranked
    }

    /// The candidate with the lowest penalty; the first one wins ties.
    pub fn select_node(&self, candidates: &[Arc<Node>], region: Option<&str>) -> Option<Arc<Node>> {
        let mut best: Option<(&Arc<Node>, i64)> = None;
        for node in candidates {
            let total = self.calculate_total(node, region);
            match best {
                Some((_, lowest)) if lowest <= total => {}
                _ => best = Some((node, total)),
            }
        }
        best.map(|(node, _)| Arc::clone(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health_tracker::HealthMetric;
    use crate::penalties::PENALTY_SOFT_BLOCK;
    use tonearm_core::{Cpu, NodeConfig, NodeStats};

    fn node(health: &Arc<HealthTracker>, name: &str, region: Option<&str>, load: f64) -> Arc<Node> {
        let mut config = NodeConfig::new(name, "127.0.0.1", 1, "secret", "queued");
        if let Some(region) = region {
            config = config.with_region(region);
        }
        let node = Node::detached(config, Arc::clone(health));
        node.set_available(true);
        node.set_stats(NodeStats {
            cpu: Cpu {
                cores: 2,
                system_load: load,
                process_load: load,
            },
            ..NodeStats::default()
        });
        node
    }

    #[test]
    fn lower_cpu_wins() {
        let health = Arc::new(HealthTracker::new());
        let balancer = LoadBalancer::new(Arc::clone(&health));
        let a = node(&health, "a", None, 0.05);
        let b = node(&health, "b", None, 0.9);

        let selected = balancer.select_node(&[Arc::clone(&b), Arc::clone(&a)], None).unwrap();
        assert_eq!(selected.name(), "a");
    }

    #[test]
    fn first_candidate_wins_ties() {
        let health = Arc::new(HealthTracker::new());
        let balancer = LoadBalancer::new(Arc::clone(&health));
        let a = node(&health, "a", None, 0.2);
        let b = node(&health, "b", None, 0.2);

        let selected = balancer.select_node(&[Arc::clone(&b), Arc::clone(&a)], None).unwrap();
        assert_eq!(selected.name(), "b");
    }

    #[test]
    fn blocked_nodes_lose_to_any_healthy_node() {
        let health = Arc::new(HealthTracker::new());
        let balancer = LoadBalancer::new(Arc::clone(&health));
        let busy = node(&health, "busy", None, 1.0);
        let down = node(&health, "down", None, 0.0);
        down.set_available(false);
        let fresh = Node::detached(
            NodeConfig::new("fresh", "127.0.0.1", 1, "secret", "queued"),
            Arc::clone(&health),
        );
        fresh.set_available(true);

        assert_eq!(balancer.calculate_total(&down, None), PENALTY_BLOCK);
        assert_eq!(balancer.calculate_total(&fresh, None), PENALTY_BLOCK);

        let candidates = [down, fresh, Arc::clone(&busy)];
        assert_eq!(balancer.select_node(&candidates, None).unwrap().name(), "busy");
    }

    #[test]
    fn node_failing_all_loads_is_blocked() {
        let health = Arc::new(HealthTracker::new());
        let balancer = LoadBalancer::new(Arc::clone(&health));
        let broken = node(&health, "broken", None, 0.0);
        health.track_metric("broken", HealthMetric::LoadAttempt);
        health.track_metric("broken", HealthMetric::LoadFailed);

        assert_eq!(balancer.calculate_total(&broken, None), PENALTY_BLOCK);
    }

    #[test]
    fn matching_region_is_preferred() {
        let health = Arc::new(HealthTracker::new());
        let balancer = LoadBalancer::new(Arc::clone(&health));
        let eu = node(&health, "eu", Some("europe"), 0.5);
        let us = node(&health, "us", Some("us"), 0.5);

        let eu_total = balancer.calculate_total(&eu, Some("europe"));
        let us_total = balancer.calculate_total(&us, Some("europe"));
        assert!(eu_total < us_total);
        assert_eq!(us_total - eu_total, PENALTY_SOFT_BLOCK);

        let candidates = [Arc::clone(&us), Arc::clone(&eu)];
        assert_eq!(balancer.select_node(&candidates, Some("europe")).unwrap().name(), "eu");
        // without a hint both are equal and order decides
        assert_eq!(balancer.select_node(&candidates, None).unwrap().name(), "us");
    }

    #[test]
    fn mismatched_region_still_beats_blocked() {
        let health = Arc::new(HealthTracker::new());
        let balancer = LoadBalancer::new(Arc::clone(&health));
        let eu = node(&health, "eu", Some("europe"), 0.1);
        eu.set_available(false);
        let us = node(&health, "us", Some("us"), 0.1);

        let selected = balancer.select_node(&[eu, us], Some("europe")).unwrap();
        assert_eq!(selected.name(), "us");
    }

    #[test]
    fn extra_providers_are_summed() {
        #[derive(Debug)]
        struct Flat(i64);

        impl PenaltyProvider for Flat {
            fn penalty(&self, _node: &Node, _region: Option<&str>) -> i64 {
                self.0
            }
        }

        let health = Arc::new(HealthTracker::new());
        let mut balancer = LoadBalancer::new(Arc::clone(&health));
        let a = node(&health, "a", None, 0.0);
        let before = balancer.calculate_total(&a, None);

        balancer.add_provider(Arc::new(Flat(25)));
        assert_eq!(balancer.calculate_total(&a, None), before + 25);
    }

    #[test]
    fn rankings_are_sorted_ascending() {
        let health = Arc::new(HealthTracker::new());
        let balancer = LoadBalancer::new(Arc::clone(&health));
        let candidates = [
            node(&health, "high", None, 0.9),
            node(&health, "low", None, 0.1),
            node(&health, "mid", None, 0.5),
        ];

        let names: Vec<String> = balancer
            .rankings(&candidates, None)
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["low", "mid", "high"]);
    }

    #[test]
    fn empty_candidates_select_nothing() {
        let balancer = LoadBalancer::new(Arc::new(HealthTracker::new()));
        assert!(balancer.select_node(&[], None).is_none());
    }
}
