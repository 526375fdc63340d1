//! Referral validation and mutation.
//!
//! [`ReferralGraph`] is the only writer of a [`GraphStore`]. Every mutation is
//! fully validated against the current store state before the store is
//! touched, so a rejected call leaves the network exactly as it was.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::config::{ConfigPatch, GraphConfig};
use crate::error::{ReferralError, Result};
use crate::influence::InfluenceAnalyzer;
use crate::snapshot::NetworkSnapshot;
use crate::stats::{NetworkStats, StatsComputer};
use crate::store::{GraphStore, InMemoryStore};
use crate::types::{ReferralEdge, Timestamp, User, UserId};

pub struct ReferralGraph<S = InMemoryStore> {
    store: S,
    config: GraphConfig,
}

impl ReferralGraph<InMemoryStore> {
    /// Empty in-memory network with strict defaults.
    pub fn new() -> Self {
        Self::with_store(InMemoryStore::new(), GraphConfig::default())
    }

    /// Rebuild a network from an exported snapshot.
    ///
    /// Edges are replayed under the permissive policy in the order they were
    /// accepted, then the snapshot's own config is installed and checked
    /// against the rebuilt network. A hand-edited file that breaks an
    /// enforced invariant is rejected rather than loaded.
    pub fn import(snapshot: &NetworkSnapshot) -> Result<Self> {
        for user in &snapshot.users {
            validate_id(&user.id)?;
        }
        let mut graph = Self::with_store(InMemoryStore::new(), GraphConfig::permissive());
        for user in &snapshot.users {
            graph.store.upsert_user(&user.id, Some(user.created_at))?;
        }
        let edges = replay_order(snapshot);
        for edge in &edges {
            graph.add_referral_at(&edge.referrer, &edge.candidate, Some(edge.created_at))?;
        }
        graph.install_config(snapshot.config.clone())?;
        info!(
            users = snapshot.users.len(),
            edges = edges.len(),
            "imported referral network"
        );
        Ok(graph)
    }
}

/// Acceptance order recovered from a snapshot.
///
/// Each referrer's edges follow its child list, and a candidate's parent edge
/// precedes its other incoming edges. Among edges free to go next, the
/// earliest `(created_at, referrer, candidate)` wins.
fn replay_order(snapshot: &NetworkSnapshot) -> Vec<&ReferralEdge> {
    let edges = &snapshot.edges;
    let position: HashMap<(&str, &str), usize> = edges
        .iter()
        .enumerate()
        .map(|(idx, e)| ((e.referrer.as_str(), e.candidate.as_str()), idx))
        .collect();
    let mut incoming: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, edge) in edges.iter().enumerate() {
        incoming.entry(edge.candidate.as_str()).or_default().push(idx);
    }

    let mut blockers = vec![0usize; edges.len()];
    let mut unblocks: Vec<Vec<usize>> = vec![Vec::new(); edges.len()];
    let mut constrain = |before: usize, after: usize| {
        if before != after {
            unblocks[before].push(after);
            blockers[after] += 1;
        }
    };
    for user in &snapshot.users {
        let chain: Vec<usize> = user
            .children
            .iter()
            .filter_map(|child| position.get(&(user.id.as_str(), child.as_str())).copied())
            .collect();
        for pair in chain.windows(2) {
            constrain(pair[0], pair[1]);
        }
        let parent_edge = user
            .parent
            .as_deref()
            .and_then(|parent| position.get(&(parent, user.id.as_str())).copied());
        if let (Some(first), Some(others)) = (parent_edge, incoming.get(user.id.as_str())) {
            for &other in others {
                constrain(first, other);
            }
        }
    }

    let key = |idx: usize| {
        let e = &edges[idx];
        Reverse((e.created_at, e.referrer.as_str(), e.candidate.as_str(), idx))
    };
    let mut ready: BinaryHeap<_> = (0..edges.len())
        .filter(|&idx| blockers[idx] == 0)
        .map(key)
        .collect();
    let mut placed = vec![false; edges.len()];
    let mut order = Vec::with_capacity(edges.len());
    while let Some(Reverse((_, _, _, idx))) = ready.pop() {
        placed[idx] = true;
        order.push(&edges[idx]);
        for &next in &unblocks[idx] {
            blockers[next] -= 1;
            if blockers[next] == 0 {
                ready.push(key(next));
            }
        }
    }
    // contradictory orderings only come from edited files; keep the rest
    let mut rest: Vec<usize> = (0..edges.len()).filter(|&idx| !placed[idx]).collect();
    rest.sort_by_key(|&idx| key(idx).0);
    order.extend(rest.into_iter().map(|idx| &edges[idx]));
    order
}

impl Default for ReferralGraph<InMemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: GraphStore> ReferralGraph<S> {
    pub fn with_store(store: S, config: GraphConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Apply a partial config update.
    ///
    /// The merged policy must already hold for the current network; a patch
    /// that existing referrals violate is refused and the config is left
    /// unchanged.
    pub fn update_config(&mut self, patch: &ConfigPatch) -> Result<()> {
        self.install_config(self.config.merged(patch))
    }

    fn install_config(&mut self, config: GraphConfig) -> Result<()> {
        if let Err(err) = self.check_network(&config) {
            warn!(kind = %err.kind(), "config refused: {err}");
            return Err(err);
        }
        self.config = config;
        debug!(config = ?self.config, "referral config updated");
        Ok(())
    }

    /// Check the whole network against `config`, as if every edge had been
    /// added under it.
    fn check_network(&self, config: &GraphConfig) -> Result<()> {
        let users = self.store.user_ids()?;
        if let Some(limit) = config.max_network_size {
            if users.len() > limit {
                return Err(ReferralError::NetworkSizeLimit { limit });
            }
        }
        let mut referrer_of: HashMap<String, String> = HashMap::new();
        for edge in self.store.edges()? {
            if edge.referrer == edge.candidate && !config.allow_self_referrals {
                return Err(ReferralError::SelfReferral(edge.referrer));
            }
            if !config.allow_multiple_referrers {
                if let Some(existing) =
                    referrer_of.insert(edge.candidate.clone(), edge.referrer.clone())
                {
                    return Err(ReferralError::MultipleReferrers {
                        candidate: edge.candidate,
                        existing,
                    });
                }
            }
            if !config.allow_cycles && self.store.reachable(&edge.candidate, &edge.referrer)? {
                return Err(ReferralError::CycleDetected {
                    referrer: edge.referrer,
                    candidate: edge.candidate,
                });
            }
        }
        if let Some(limit) = config.max_referrals_per_user {
            for id in users {
                if self.store.direct_children(&id)?.len() > limit {
                    return Err(ReferralError::ReferralLimit { referrer: id, limit });
                }
            }
        }
        Ok(())
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Record that `referrer` recruited `candidate`.
    pub fn add_referral(&mut self, referrer: &str, candidate: &str) -> Result<()> {
        self.add_referral_at(referrer, candidate, None)
    }

    /// Like [`add_referral`](Self::add_referral) with an explicit creation
    /// time for the edge and any endpoint created alongside it.
    pub fn add_referral_at(
        &mut self,
        referrer: &str,
        candidate: &str,
        created_at: Option<Timestamp>,
    ) -> Result<()> {
        match self.check_referral(referrer, candidate) {
            Ok(true) => {
                self.store.add_edge(referrer, candidate, created_at)?;
                debug!(referrer, candidate, "referral accepted");
                Ok(())
            }
            Ok(false) => {
                debug!(referrer, candidate, "referral already recorded");
                Ok(())
            }
            Err(err) => {
                warn!(referrer, candidate, kind = %err.kind(), "referral rejected: {err}");
                Err(err)
            }
        }
    }

    /// Run every check without mutating. `Ok(false)` means the edge already
    /// exists and adding it again changes nothing.
    fn check_referral(&self, referrer: &str, candidate: &str) -> Result<bool> {
        validate_id(referrer)?;
        validate_id(candidate)?;

        if referrer == candidate && !self.config.allow_self_referrals {
            return Err(ReferralError::SelfReferral(referrer.to_string()));
        }

        if self.store.has_edge(referrer, candidate)? {
            return Ok(false);
        }

        if !self.config.allow_multiple_referrers {
            if let Some(existing) = self.store.parent(candidate)? {
                if existing != referrer {
                    return Err(ReferralError::MultipleReferrers {
                        candidate: candidate.to_string(),
                        existing,
                    });
                }
            }
        }

        if !self.config.allow_cycles && self.store.reachable(candidate, referrer)? {
            return Err(ReferralError::CycleDetected {
                referrer: referrer.to_string(),
                candidate: candidate.to_string(),
            });
        }

        if let Some(limit) = self.config.max_network_size {
            let mut new_users = 0;
            if !self.store.contains_user(referrer)? {
                new_users += 1;
            }
            if referrer != candidate && !self.store.contains_user(candidate)? {
                new_users += 1;
            }
            if new_users > 0 && self.store.user_count()? + new_users > limit {
                return Err(ReferralError::NetworkSizeLimit { limit });
            }
        }

        if let Some(limit) = self.config.max_referrals_per_user {
            if self.store.direct_children(referrer)?.len() >= limit {
                return Err(ReferralError::ReferralLimit {
                    referrer: referrer.to_string(),
                    limit,
                });
            }
        }

        Ok(true)
    }

    /// Remove one edge. The candidate becomes a root unless another referrer
    /// remains (only possible when multiple referrers are allowed).
    pub fn remove_referral(&mut self, referrer: &str, candidate: &str) -> Result<bool> {
        validate_id(referrer)?;
        validate_id(candidate)?;
        for id in [referrer, candidate] {
            if !self.store.contains_user(id)? {
                return Err(ReferralError::UserNotFound(id.to_string()));
            }
        }
        let removed = self.store.remove_edge(referrer, candidate)?;
        if removed {
            info!(referrer, candidate, "referral removed");
        }
        Ok(removed)
    }

    /// Remove a user and every edge touching it. Its direct referrals become
    /// roots; nothing is re-homed.
    pub fn remove_user(&mut self, id: &str) -> Result<()> {
        validate_id(id)?;
        if !self.store.remove_user(id)? {
            return Err(ReferralError::UserNotFound(id.to_string()));
        }
        info!(user = id, "user removed");
        Ok(())
    }

    pub fn user(&self, id: &str) -> Result<User> {
        self.store
            .user(id)?
            .ok_or_else(|| ReferralError::UserNotFound(id.to_string()))
    }

    pub fn all_users(&self) -> Result<Vec<UserId>> {
        Ok(self.store.user_ids()?)
    }

    pub fn edges(&self) -> Result<Vec<ReferralEdge>> {
        Ok(self.store.edges()?)
    }

    pub fn referrer(&self, id: &str) -> Result<Option<UserId>> {
        Ok(self.store.parent(id)?)
    }

    /// Users `id` referred directly; empty for unknown users.
    pub fn direct_referrals(&self, id: &str) -> Result<Vec<UserId>> {
        Ok(self.store.direct_children(id)?)
    }

    /// Every user in `id`'s subtree, pre-order; empty for unknown users.
    pub fn all_referrals(&self, id: &str) -> Result<Vec<UserId>> {
        Ok(self.store.all_descendants(id)?)
    }

    /// Referrers above `id`, nearest first, at most `limit` of them.
    pub fn upline(&self, id: &str, limit: usize) -> Result<Vec<UserId>> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(id.to_string());
        let mut node = id.to_string();
        while chain.len() < limit {
            let Some(parent) = self.store.parent(&node)? else {
                break;
            };
            if !visited.insert(parent.clone()) {
                break;
            }
            chain.push(parent.clone());
            node = parent;
        }
        Ok(chain)
    }

    pub fn network_stats(&self) -> Result<NetworkStats> {
        StatsComputer::new(&self.store).compute()
    }

    /// Top `k` users by subtree size; `None` means the default of 5.
    pub fn top_k_by_reach(&self, k: Option<usize>) -> Result<Vec<UserId>> {
        Ok(InfluenceAnalyzer::snapshot(self)?.top_k_by_reach(k))
    }

    /// Top `k` users by flow centrality; `None` means the default of 5.
    pub fn top_k_by_flow_centrality(&self, k: Option<usize>) -> Result<Vec<UserId>> {
        Ok(InfluenceAnalyzer::snapshot(self)?.top_k_by_flow_centrality(k))
    }

    pub fn snapshot(&self) -> Result<NetworkSnapshot> {
        let mut users = Vec::new();
        for id in self.store.user_ids()? {
            if let Some(user) = self.store.user(&id)? {
                users.push(user);
            }
        }
        Ok(NetworkSnapshot {
            config: self.config.clone(),
            users,
            edges: self.store.edges()?,
        })
    }
}

fn validate_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(ReferralError::InvalidInput(
            "user id must not be blank".into(),
        ));
    }
    if id.trim() != id {
        return Err(ReferralError::InvalidInput(format!(
            "user id {id:?} has surrounding whitespace"
        )));
    }
    Ok(())
}
