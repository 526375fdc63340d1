//! Storage seam for the referral graph.
//!
//! [`GraphStore`] is the only thing [`ReferralGraph`](crate::graph::ReferralGraph)
//! knows about persistence. Backends implement a handful of primitive record
//! operations; the traversal predicates (`all_descendants`, `reachable`,
//! `stats`) come with iterative default implementations built on
//! `direct_children`, so a backend only overrides them when it can answer
//! faster natively.
//!
//! Stores do not validate structure. `add_edge` records whatever it is given;
//! invariant checking is the caller's job.

pub mod memory;

use std::collections::{HashSet, VecDeque};

use crate::error::StoreError;
use crate::types::{ReferralEdge, StoreStats, Timestamp, User, UserId};

pub use memory::InMemoryStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub trait GraphStore {
    /// Create `id` if missing. Existing users are left untouched.
    fn upsert_user(&mut self, id: &str, created_at: Option<Timestamp>) -> StoreResult<()>;

    /// Record `referrer -> candidate`, creating missing endpoints first.
    /// Re-adding an existing edge is a no-op.
    fn add_edge(
        &mut self,
        referrer: &str,
        candidate: &str,
        created_at: Option<Timestamp>,
    ) -> StoreResult<()>;

    /// Returns whether an edge was removed.
    fn remove_edge(&mut self, referrer: &str, candidate: &str) -> StoreResult<bool>;

    /// Remove `id` and every edge touching it. Former children become roots.
    /// Returns whether the user existed.
    fn remove_user(&mut self, id: &str) -> StoreResult<bool>;

    fn user(&self, id: &str) -> StoreResult<Option<User>>;

    /// All user ids, sorted ascending.
    fn user_ids(&self) -> StoreResult<Vec<UserId>>;

    /// All edges, sorted by `(referrer, candidate)`.
    fn edges(&self) -> StoreResult<Vec<ReferralEdge>>;

    /// Direct referrals in acceptance order; empty for unknown users.
    fn direct_children(&self, id: &str) -> StoreResult<Vec<UserId>>;

    fn parent(&self, id: &str) -> StoreResult<Option<UserId>>;

    fn contains_user(&self, id: &str) -> StoreResult<bool> {
        Ok(self.user(id)?.is_some())
    }

    fn user_count(&self) -> StoreResult<usize> {
        Ok(self.user_ids()?.len())
    }

    fn has_edge(&self, referrer: &str, candidate: &str) -> StoreResult<bool> {
        Ok(self
            .direct_children(referrer)?
            .iter()
            .any(|child| child == candidate))
    }

    /// Every user reachable from `id` through child edges, each exactly once,
    /// in pre-order. `id` itself is never included, even when a cycle leads
    /// back to it.
    fn all_descendants(&self, id: &str) -> StoreResult<Vec<UserId>> {
        let mut seen: HashSet<UserId> = HashSet::new();
        seen.insert(id.to_string());
        let mut order = Vec::new();
        let mut stack: Vec<UserId> = self.direct_children(id)?.into_iter().rev().collect();
        while let Some(next) = stack.pop() {
            if !seen.insert(next.clone()) {
                continue;
            }
            let children = self.direct_children(&next)?;
            stack.extend(children.into_iter().rev());
            order.push(next);
        }
        Ok(order)
    }

    /// True iff a path of zero or more child edges leads from `from` to `to`.
    fn reachable(&self, from: &str, to: &str) -> StoreResult<bool> {
        if from == to {
            return Ok(true);
        }
        let mut seen: HashSet<UserId> = HashSet::new();
        seen.insert(from.to_string());
        let mut stack = vec![from.to_string()];
        while let Some(current) = stack.pop() {
            for child in self.direct_children(&current)? {
                if child == to {
                    return Ok(true);
                }
                if seen.insert(child.clone()) {
                    stack.push(child);
                }
            }
        }
        Ok(false)
    }

    fn stats(&self) -> StoreResult<StoreStats> {
        let users = self.user_ids()?;
        let total_edges = self.edges()?.len();
        let max_depth = max_depth(self, &users)?;
        let avg_children_per_user = if users.is_empty() {
            0.0
        } else {
            total_edges as f64 / users.len() as f64
        };
        Ok(StoreStats {
            total_users: users.len(),
            total_edges,
            max_depth,
            avg_children_per_user,
        })
    }
}

/// Breadth-first depth from the roots. Users only reachable through a cycle
/// are seeded at depth 0 in id order so every user gets a depth.
fn max_depth<S: GraphStore + ?Sized>(store: &S, users: &[UserId]) -> StoreResult<usize> {
    let mut seen: HashSet<UserId> = HashSet::with_capacity(users.len());
    let mut queue: VecDeque<(UserId, usize)> = VecDeque::new();
    let mut deepest = 0;

    let mut roots = Vec::new();
    for id in users {
        if store.parent(id)?.is_none() {
            roots.push(id.clone());
        }
    }
    let seeds = roots.into_iter().chain(users.iter().cloned());
    for seed in seeds {
        if !seen.insert(seed.clone()) {
            continue;
        }
        queue.push_back((seed, 0));
        while let Some((current, depth)) = queue.pop_front() {
            deepest = deepest.max(depth);
            for child in store.direct_children(&current)? {
                if seen.insert(child.clone()) {
                    queue.push_back((child, depth + 1));
                }
            }
        }
    }
    Ok(deepest)
}
