use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::GraphConfig;
use crate::error::{ReferralError, Result};
use crate::types::{ReferralEdge, User};

/// Serializable copy of a whole network: policy, users and edges.
///
/// Produced by [`ReferralGraph::snapshot`](crate::graph::ReferralGraph::snapshot)
/// with users sorted by id and edges by `(referrer, candidate)`, and loaded
/// back with [`ReferralGraph::import`](crate::graph::ReferralGraph::import).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NetworkSnapshot {
    #[serde(default)]
    pub config: GraphConfig,
    pub users: Vec<User>,
    pub edges: Vec<ReferralEdge>,
}

impl NetworkSnapshot {
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|err| ReferralError::InvalidInput(format!("snapshot: {err}")))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|err| ReferralError::InvalidInput(format!("snapshot: {err}")))
    }

    /// Merkle root over users and edges. Two networks with the same users,
    /// timestamps, child order and edges have the same digest; the config is
    /// not part of it.
    pub fn digest(&self) -> [u8; 32] {
        let mut leaves: Vec<[u8; 32]> = Vec::with_capacity(self.users.len() + self.edges.len());
        for user in &self.users {
            let mut hasher = Sha256::new();
            hasher.update(b"user");
            hash_str(&mut hasher, &user.id);
            hasher.update(user.created_at.to_le_bytes());
            match &user.parent {
                Some(parent) => {
                    hasher.update([1u8]);
                    hash_str(&mut hasher, parent);
                }
                None => hasher.update([0u8]),
            }
            hasher.update((user.children.len() as u64).to_le_bytes());
            for child in &user.children {
                hash_str(&mut hasher, child);
            }
            leaves.push(hasher.finalize().into());
        }
        for edge in &self.edges {
            let mut hasher = Sha256::new();
            hasher.update(b"edge");
            hash_str(&mut hasher, &edge.referrer);
            hash_str(&mut hasher, &edge.candidate);
            hasher.update(edge.created_at.to_le_bytes());
            leaves.push(hasher.finalize().into());
        }
        build_merkle(leaves)
    }

    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest())
    }
}

/// Length-prefixed so `("ab", "c")` and `("a", "bc")` hash differently.
fn hash_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"refnet-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ReferralGraph;

    fn sample() -> NetworkSnapshot {
        let mut graph = ReferralGraph::new();
        graph.add_referral_at("alice", "bob", Some(10)).unwrap();
        graph.add_referral_at("bob", "carol", Some(20)).unwrap();
        graph.snapshot().unwrap()
    }

    #[test]
    fn digest_is_deterministic_and_sensitive() {
        let snapshot = sample();
        assert_eq!(snapshot.digest(), sample().digest());
        assert_eq!(snapshot.digest_hex().len(), 64);

        let mut moved = snapshot.clone();
        moved.edges[0].created_at += 1;
        assert_ne!(snapshot.digest(), moved.digest());

        assert_ne!(NetworkSnapshot::default().digest(), snapshot.digest());
    }

    #[test]
    fn json_round_trip_keeps_the_digest() {
        let snapshot = sample();
        let json = snapshot.to_json_pretty().unwrap();
        let parsed = NetworkSnapshot::from_json_slice(json.as_bytes()).unwrap();
        assert_eq!(parsed, snapshot);
        assert_eq!(parsed.digest(), snapshot.digest());
        assert!(NetworkSnapshot::from_json_slice(b"{").is_err());
    }

    #[test]
    fn snapshot_lists_are_sorted() {
        let snapshot = sample();
        let ids: Vec<&str> = snapshot.users.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["alice", "bob", "carol"]);
        assert_eq!(snapshot.edges[0].referrer, "alice");
        assert_eq!(snapshot.users[1].parent.as_deref(), Some("alice"));
    }
}
