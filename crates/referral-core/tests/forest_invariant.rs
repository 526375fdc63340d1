use std::cell::Cell;
use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use referral_core::store::StoreResult;
use referral_core::{
    ErrorKind, GraphConfig, GraphStore, InMemoryStore, InfluenceAnalyzer, ReferralEdge,
    ReferralGraph, StoreError, Timestamp, User, UserId,
};

/// Wraps the in-memory store and fails chosen reads on demand.
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryStore,
    broken_children: Option<UserId>,
    fail_reachability: Cell<bool>,
}

impl GraphStore for FlakyStore {
    fn upsert_user(&mut self, id: &str, created_at: Option<Timestamp>) -> StoreResult<()> {
        self.inner.upsert_user(id, created_at)
    }

    fn add_edge(
        &mut self,
        referrer: &str,
        candidate: &str,
        created_at: Option<Timestamp>,
    ) -> StoreResult<()> {
        self.inner.add_edge(referrer, candidate, created_at)
    }

    fn remove_edge(&mut self, referrer: &str, candidate: &str) -> StoreResult<bool> {
        self.inner.remove_edge(referrer, candidate)
    }

    fn remove_user(&mut self, id: &str) -> StoreResult<bool> {
        self.inner.remove_user(id)
    }

    fn user(&self, id: &str) -> StoreResult<Option<User>> {
        self.inner.user(id)
    }

    fn user_ids(&self) -> StoreResult<Vec<UserId>> {
        self.inner.user_ids()
    }

    fn edges(&self) -> StoreResult<Vec<ReferralEdge>> {
        self.inner.edges()
    }

    fn direct_children(&self, id: &str) -> StoreResult<Vec<UserId>> {
        if self.broken_children.as_deref() == Some(id) {
            return Err(StoreError::Unavailable(format!("children of {id}")));
        }
        self.inner.direct_children(id)
    }

    fn parent(&self, id: &str) -> StoreResult<Option<UserId>> {
        self.inner.parent(id)
    }

    fn reachable(&self, from: &str, to: &str) -> StoreResult<bool> {
        if self.fail_reachability.get() {
            return Err(StoreError::Unavailable("reachability".into()));
        }
        self.inner.reachable(from, to)
    }
}

fn assert_forest<S: GraphStore>(graph: &ReferralGraph<S>) {
    let users = graph.all_users().unwrap();
    let mut in_degree: HashMap<String, usize> = HashMap::new();
    for edge in graph.edges().unwrap() {
        assert_ne!(edge.referrer, edge.candidate, "self loop");
        *in_degree.entry(edge.candidate.clone()).or_default() += 1;
        assert!(users.contains(&edge.referrer), "dangling {}", edge.referrer);
        assert!(users.contains(&edge.candidate), "dangling {}", edge.candidate);
        assert_eq!(
            graph.referrer(&edge.candidate).unwrap().as_deref(),
            Some(edge.referrer.as_str())
        );
    }
    assert!(in_degree.values().all(|&d| d <= 1), "multiple referrers");
    for user in &users {
        // no user can reach itself through one or more edges
        for child in graph.direct_referrals(user).unwrap() {
            assert!(!graph.store().reachable(&child, user).unwrap(), "cycle via {user}");
        }
        if !in_degree.contains_key(user) {
            assert_eq!(graph.referrer(user).unwrap(), None);
        }
    }
}

#[test]
fn random_operations_keep_a_forest_and_failures_change_nothing() {
    let mut rng = StdRng::seed_from_u64(0x5EED_F0E5);
    let mut graph = ReferralGraph::new();
    let names: Vec<String> = (0..24).map(|i| format!("user-{i:02}")).collect();
    let mut accepted = 0;
    let mut rejected = 0;

    for step in 0..600u64 {
        let before = graph.snapshot().unwrap();
        let roll: f64 = rng.gen();
        if roll < 0.9 {
            let referrer = &names[rng.gen_range(0..names.len())];
            let candidate = &names[rng.gen_range(0..names.len())];
            match graph.add_referral_at(referrer, candidate, Some(step)) {
                Ok(()) => accepted += 1,
                Err(err) => {
                    rejected += 1;
                    assert!(matches!(
                        err.kind(),
                        ErrorKind::SelfReferral
                            | ErrorKind::MultipleReferrers
                            | ErrorKind::CycleDetected
                    ));
                    let after = graph.snapshot().unwrap();
                    assert_eq!(before.digest(), after.digest(), "step {step}: {err}");
                    assert_eq!(before, after);
                }
            }
        } else if roll < 0.95 {
            let victim = &names[rng.gen_range(0..names.len())];
            let _ = graph.remove_user(victim);
        } else if let Some(edge) = graph.edges().unwrap().first().cloned() {
            assert!(graph.remove_referral(&edge.referrer, &edge.candidate).unwrap());
        }
        assert_forest(&graph);
    }

    assert!(accepted > 0 && rejected > 0);

    let analyzer = InfluenceAnalyzer::snapshot(&graph).unwrap();
    for (user, reach) in analyzer.reach_scores() {
        assert_eq!(reach, graph.all_referrals(&user).unwrap().len());
        if graph.direct_referrals(&user).unwrap().is_empty() {
            assert_eq!(analyzer.flow_centrality(&user), Some(0));
        }
    }
}

#[test]
fn analytics_skip_users_whose_children_cannot_be_read() {
    let mut graph = ReferralGraph::with_store(FlakyStore::default(), GraphConfig::default());
    for (referrer, candidate) in [("a", "b"), ("b", "c"), ("c", "d"), ("x", "y")] {
        graph.add_referral(referrer, candidate).unwrap();
    }
    let mut store = graph.into_store();
    store.broken_children = Some("c".into());
    let graph = ReferralGraph::with_store(store, GraphConfig::default());

    let ranked = graph.top_k_by_reach(Some(10)).unwrap();
    assert_eq!(ranked.len(), 5);
    assert!(!ranked.iter().any(|id| id == "c"));
    // edges into the skipped user are dropped from the snapshot
    let analyzer = InfluenceAnalyzer::snapshot(&graph).unwrap();
    assert_eq!(analyzer.reach("a"), Some(1));
    assert_eq!(analyzer.reach("x"), Some(1));
    assert_eq!(analyzer.reach("c"), None);
}

#[test]
fn storage_failures_surface_and_leave_state_untouched() {
    let mut graph = ReferralGraph::with_store(FlakyStore::default(), GraphConfig::default());
    graph.add_referral("a", "b").unwrap();
    let before = graph.snapshot().unwrap();

    graph.store().fail_reachability.set(true);
    let err = graph.add_referral("b", "c").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageError);
    assert_eq!(graph.snapshot().unwrap(), before);

    graph.store().fail_reachability.set(false);
    graph.add_referral("b", "c").unwrap();
    assert_eq!(graph.all_referrals("a").unwrap(), vec!["b", "c"]);
}
