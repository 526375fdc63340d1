use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::GraphStore;

/// Aggregate view of the network returned by
/// [`ReferralGraph::network_stats`](crate::graph::ReferralGraph::network_stats).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct NetworkStats {
    pub total_users: usize,
    pub total_referrals: usize,
    pub max_depth: usize,
    pub average_referrals_per_user: f64,
    /// Users with no referrer.
    pub root_count: usize,
    /// Users who referred nobody.
    pub leaf_count: usize,
    /// Share of users that have a referrer, 0 for an empty network.
    pub referred_ratio: f64,
}

/// Derives [`NetworkStats`] from a store. Holds no state of its own.
pub struct StatsComputer<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: GraphStore + ?Sized> StatsComputer<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn compute(&self) -> Result<NetworkStats> {
        let base = self.store.stats()?;
        let mut root_count = 0;
        let mut leaf_count = 0;
        for id in self.store.user_ids()? {
            if self.store.parent(&id)?.is_none() {
                root_count += 1;
            }
            if self.store.direct_children(&id)?.is_empty() {
                leaf_count += 1;
            }
        }
        let referred_ratio = if base.total_users == 0 {
            0.0
        } else {
            (base.total_users - root_count) as f64 / base.total_users as f64
        };
        Ok(NetworkStats {
            total_users: base.total_users,
            total_referrals: base.total_edges,
            max_depth: base.max_depth,
            average_referrals_per_user: base.avg_children_per_user,
            root_count,
            leaf_count,
            referred_ratio,
        })
    }
}
