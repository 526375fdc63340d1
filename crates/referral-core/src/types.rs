use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub type UserId = String;
/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// A participant in the referral network.
///
/// `parent` is a back-reference to the referrer only; the store owns every
/// user and edge, so nothing here keeps another user alive.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub created_at: Timestamp,
    pub parent: Option<UserId>,
    /// Direct referrals in the order they were accepted.
    pub children: Vec<UserId>,
}

/// Directed `referrer -> candidate` relationship, keyed by the ordered pair.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReferralEdge {
    pub referrer: UserId,
    pub candidate: UserId,
    pub created_at: Timestamp,
}

/// Raw counters a store reports about its own contents.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct StoreStats {
    pub total_users: usize,
    pub total_edges: usize,
    /// Longest child chain, roots at depth 0.
    pub max_depth: usize,
    pub avg_children_per_user: f64,
}

pub fn now_ms() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
