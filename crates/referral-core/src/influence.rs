//! Read-only influence metrics over a referral network.
//!
//! * **Reach** of a user is the number of distinct users below it.
//! * **Flow centrality** of a user counts the ordered pairs `(s, t)` of other
//!   users whose shortest directed path has the user strictly inside it.
//!
//! Both are computed on an [`InfluenceAnalyzer`], an owned copy of the
//! adjacency taken when the analyzer is built. Later mutations of the graph do
//! not affect it, and the analyzer is `Sync`, so several rankings can run
//! against one snapshot concurrently.
//!
//! Shortest paths come from one breadth-first search per source. When several
//! shortest paths of equal length exist, the one fixed by the BFS tree (children
//! visited in acceptance order) is the only one credited. Under the default
//! forest policy there is at most one path between any two users, so this
//! only matters when multiple referrers or cycles are allowed.
//!
//! Cost is O(U · (U + E)) for a full table, dominated by the per-source BFS.

use std::collections::{HashMap, VecDeque};
use std::sync::OnceLock;

use tracing::warn;

use crate::error::Result;
use crate::graph::ReferralGraph;
use crate::store::GraphStore;
use crate::types::UserId;

/// Ranking size used when the caller does not pick one.
pub const DEFAULT_TOP_K: usize = 5;

pub struct InfluenceAnalyzer {
    /// Sorted ascending; positions are the node indices below.
    ids: Vec<UserId>,
    children: Vec<Vec<usize>>,
    index: HashMap<UserId, usize>,
    reach: OnceLock<Vec<usize>>,
    flow: OnceLock<Vec<usize>>,
}

impl InfluenceAnalyzer {
    /// Copy the graph's adjacency.
    ///
    /// A user whose children cannot be read is logged and left out of the
    /// snapshot, along with edges pointing at it; the rest of the ranking
    /// still goes ahead. Failing to list the users at all is an error.
    pub fn snapshot<S: GraphStore>(graph: &ReferralGraph<S>) -> Result<Self> {
        let mut ids = Vec::new();
        let mut raw_children = Vec::new();
        for id in graph.all_users()? {
            match graph.direct_referrals(&id) {
                Ok(children) => {
                    ids.push(id);
                    raw_children.push(children);
                }
                Err(err) => warn!(user = %id, "skipping user in influence snapshot: {err}"),
            }
        }
        Ok(Self::from_adjacency(ids, raw_children))
    }

    fn from_adjacency(ids: Vec<UserId>, raw_children: Vec<Vec<UserId>>) -> Self {
        let index: HashMap<UserId, usize> = ids
            .iter()
            .enumerate()
            .map(|(idx, id)| (id.clone(), idx))
            .collect();
        let children = raw_children
            .iter()
            .map(|list| {
                list.iter()
                    .filter_map(|child| index.get(child).copied())
                    .collect()
            })
            .collect();
        Self {
            ids,
            children,
            index,
            reach: OnceLock::new(),
            flow: OnceLock::new(),
        }
    }

    pub fn user_count(&self) -> usize {
        self.ids.len()
    }

    /// `None` for users outside the snapshot.
    pub fn reach(&self, user: &str) -> Option<usize> {
        let idx = *self.index.get(user)?;
        Some(self.reach_table()[idx])
    }

    /// `None` for users outside the snapshot.
    pub fn flow_centrality(&self, user: &str) -> Option<usize> {
        let idx = *self.index.get(user)?;
        Some(self.flow_table()[idx])
    }

    /// Every user with its reach, ordered by id.
    pub fn reach_scores(&self) -> Vec<(UserId, usize)> {
        self.ids
            .iter()
            .cloned()
            .zip(self.reach_table().iter().copied())
            .collect()
    }

    /// Every user with its flow centrality, ordered by id.
    pub fn flow_centrality_scores(&self) -> Vec<(UserId, usize)> {
        self.ids
            .iter()
            .cloned()
            .zip(self.flow_table().iter().copied())
            .collect()
    }

    pub fn top_k_by_reach(&self, k: Option<usize>) -> Vec<UserId> {
        self.rank(self.reach_table(), k)
    }

    pub fn top_k_by_flow_centrality(&self, k: Option<usize>) -> Vec<UserId> {
        self.rank(self.flow_table(), k)
    }

    /// Highest score first, ties broken by ascending id.
    fn rank(&self, scores: &[usize], k: Option<usize>) -> Vec<UserId> {
        let k = k.unwrap_or(DEFAULT_TOP_K);
        let mut order: Vec<usize> = (0..self.ids.len()).collect();
        order.sort_by(|&a, &b| {
            scores[b]
                .cmp(&scores[a])
                .then_with(|| self.ids[a].cmp(&self.ids[b]))
        });
        order
            .into_iter()
            .take(k)
            .map(|idx| self.ids[idx].clone())
            .collect()
    }

    fn reach_table(&self) -> &[usize] {
        self.reach.get_or_init(|| self.compute_reach())
    }

    fn flow_table(&self) -> &[usize] {
        self.flow.get_or_init(|| self.compute_flow())
    }

    /// Distinct descendants per user. Counted by traversal rather than by
    /// summing child subtrees so users shared between branches are not
    /// counted twice when multiple referrers are allowed.
    fn compute_reach(&self) -> Vec<usize> {
        let n = self.ids.len();
        let mut reach = vec![0usize; n];
        let mut visited = vec![0u32; n];
        let mut stamp = 0u32;
        let mut stack = Vec::new();
        for start in 0..n {
            stamp += 1;
            visited[start] = stamp;
            stack.clear();
            stack.push(start);
            let mut count = 0;
            while let Some(current) = stack.pop() {
                for &child in &self.children[current] {
                    if visited[child] != stamp {
                        visited[child] = stamp;
                        count += 1;
                        stack.push(child);
                    }
                }
            }
            reach[start] = count;
        }
        reach
    }

    /// One BFS per source. In the BFS tree rooted at `s`, the interior nodes
    /// of the path to `t` are exactly the tree ancestors of `t` other than
    /// `s`, so each non-source node `v` is credited once per tree node below
    /// it.
    fn compute_flow(&self) -> Vec<usize> {
        let n = self.ids.len();
        let mut flow = vec![0usize; n];
        let mut tree_parent = vec![usize::MAX; n];
        let mut visited = vec![0u32; n];
        let mut below = vec![0usize; n];
        let mut order = Vec::with_capacity(n);
        let mut queue = VecDeque::new();
        let mut stamp = 0u32;

        for source in 0..n {
            stamp += 1;
            order.clear();
            visited[source] = stamp;
            tree_parent[source] = usize::MAX;
            queue.push_back(source);
            while let Some(current) = queue.pop_front() {
                order.push(current);
                for &child in &self.children[current] {
                    if visited[child] != stamp {
                        visited[child] = stamp;
                        tree_parent[child] = current;
                        queue.push_back(child);
                    }
                }
            }

            for &node in &order {
                below[node] = 0;
            }
            // reverse BFS order visits every node after all of its tree children
            for &node in order.iter().rev() {
                if node == source {
                    continue;
                }
                flow[node] += below[node];
                let parent = tree_parent[node];
                below[parent] += below[node] + 1;
            }
        }
        flow
    }
}

/// Convenience wrapper: snapshot `graph` and rank by reach.
pub fn top_k_by_reach<S: GraphStore>(
    graph: &ReferralGraph<S>,
    k: Option<usize>,
) -> Result<Vec<UserId>> {
    Ok(InfluenceAnalyzer::snapshot(graph)?.top_k_by_reach(k))
}

/// Convenience wrapper: snapshot `graph` and rank by flow centrality.
pub fn top_k_by_flow_centrality<S: GraphStore>(
    graph: &ReferralGraph<S>,
    k: Option<usize>,
) -> Result<Vec<UserId>> {
    Ok(InfluenceAnalyzer::snapshot(graph)?.top_k_by_flow_centrality(k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigPatch;

    fn build(edges: &[(&str, &str)]) -> ReferralGraph {
        let mut graph = ReferralGraph::new();
        for (referrer, candidate) in edges {
            graph.add_referral(referrer, candidate).unwrap();
        }
        graph
    }

    fn scenario() -> ReferralGraph {
        build(&[
            ("Alice", "Bob"),
            ("Alice", "Charlie"),
            ("Bob", "David"),
            ("Bob", "Eve"),
        ])
    }

    #[test]
    fn reach_matches_subtree_size() {
        let graph = scenario();
        let analyzer = InfluenceAnalyzer::snapshot(&graph).unwrap();
        assert_eq!(analyzer.reach("Alice"), Some(4));
        assert_eq!(analyzer.reach("Bob"), Some(2));
        assert_eq!(analyzer.reach("Eve"), Some(0));
        assert_eq!(analyzer.reach("Ghost"), None);

        for (user, reach) in analyzer.reach_scores() {
            assert_eq!(reach, graph.all_referrals(&user).unwrap().len());
            let from_children: usize = graph
                .direct_referrals(&user)
                .unwrap()
                .iter()
                .map(|child| 1 + analyzer.reach(child).unwrap())
                .sum();
            assert_eq!(reach, from_children);
        }
    }

    #[test]
    fn reach_ranking_breaks_ties_by_id() {
        let graph = scenario();
        assert_eq!(
            graph.top_k_by_reach(None).unwrap(),
            vec!["Alice", "Bob", "Charlie", "David", "Eve"]
        );
        assert_eq!(top_k_by_reach(&graph, Some(2)).unwrap(), vec!["Alice", "Bob"]);
        assert!(graph.top_k_by_reach(Some(0)).unwrap().is_empty());
        assert_eq!(graph.top_k_by_reach(Some(50)).unwrap().len(), 5);
    }

    #[test]
    fn flow_centrality_on_a_chain() {
        let graph = build(&[("a", "b"), ("b", "c"), ("c", "d")]);
        let analyzer = InfluenceAnalyzer::snapshot(&graph).unwrap();
        assert_eq!(
            analyzer.flow_centrality_scores(),
            vec![
                ("a".to_string(), 0),
                ("b".to_string(), 2),
                ("c".to_string(), 2),
                ("d".to_string(), 0),
            ]
        );
        assert_eq!(analyzer.top_k_by_flow_centrality(Some(2)), vec!["b", "c"]);
    }

    #[test]
    fn leaves_and_roots_carry_no_flow() {
        let graph = scenario();
        let analyzer = InfluenceAnalyzer::snapshot(&graph).unwrap();
        assert_eq!(analyzer.flow_centrality("Bob"), Some(2));
        for user in ["Alice", "Charlie", "David", "Eve"] {
            assert_eq!(analyzer.flow_centrality(user), Some(0), "{user}");
        }
        assert_eq!(
            top_k_by_flow_centrality(&graph, None).unwrap(),
            vec!["Bob", "Alice", "Charlie", "David", "Eve"]
        );
    }

    #[test]
    fn deeper_tree_counts_every_pair_through_a_node() {
        // r -> m -> {x, y}, x -> z
        let graph = build(&[("r", "m"), ("m", "x"), ("m", "y"), ("x", "z")]);
        let analyzer = InfluenceAnalyzer::snapshot(&graph).unwrap();
        // m: (r,x) (r,y) (r,z)
        assert_eq!(analyzer.flow_centrality("m"), Some(3));
        // x: (r,z) (m,z)
        assert_eq!(analyzer.flow_centrality("x"), Some(2));
        assert_eq!(analyzer.flow_centrality("y"), Some(0));
    }

    #[test]
    fn empty_network_ranks_nothing() {
        let graph = ReferralGraph::new();
        assert!(graph.top_k_by_reach(None).unwrap().is_empty());
        assert!(graph.top_k_by_flow_centrality(Some(5)).unwrap().is_empty());
    }

    #[test]
    fn rankings_are_deterministic() {
        let graph = build(&[
            ("p", "q"),
            ("p", "r"),
            ("q", "s"),
            ("r", "t"),
            ("u", "v"),
        ]);
        let first = graph.top_k_by_flow_centrality(Some(3)).unwrap();
        let reach = graph.top_k_by_reach(Some(3)).unwrap();
        for _ in 0..5 {
            assert_eq!(graph.top_k_by_flow_centrality(Some(3)).unwrap(), first);
            assert_eq!(graph.top_k_by_reach(Some(3)).unwrap(), reach);
        }
        assert_eq!(first, vec!["q", "r", "p"]);
        assert_eq!(reach, vec!["p", "q", "r"]);
    }

    #[test]
    fn equal_length_paths_credit_the_first_bfs_branch() {
        let mut graph = ReferralGraph::new();
        graph.update_config(&ConfigPatch {
            allow_multiple_referrers: Some(true),
            ..ConfigPatch::default()
        })
        .unwrap();
        for (referrer, candidate) in [("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")] {
            graph.add_referral(referrer, candidate).unwrap();
        }
        let analyzer = InfluenceAnalyzer::snapshot(&graph).unwrap();
        assert_eq!(analyzer.flow_centrality("b"), Some(1));
        assert_eq!(analyzer.flow_centrality("c"), Some(0));
        // d is shared by both branches but counted once
        assert_eq!(analyzer.reach("a"), Some(3));
    }

    #[test]
    fn snapshot_is_isolated_from_later_writes() {
        let mut graph = scenario();
        let analyzer = InfluenceAnalyzer::snapshot(&graph).unwrap();
        graph.add_referral("Eve", "Zoe").unwrap();
        assert_eq!(analyzer.reach("Alice"), Some(4));
        assert_eq!(analyzer.reach("Zoe"), None);
        assert_eq!(InfluenceAnalyzer::snapshot(&graph).unwrap().reach("Alice"), Some(5));
    }
}
