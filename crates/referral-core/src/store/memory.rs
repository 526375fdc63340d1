use std::collections::HashMap;

use crate::store::{GraphStore, StoreResult};
use crate::types::{now_ms, ReferralEdge, StoreStats, Timestamp, User, UserId};

#[derive(Clone, Debug, Default)]
struct UserRecord {
    created_at: Timestamp,
    /// Incoming edges in acceptance order. The first entry is the parent.
    referrers: Vec<UserId>,
    children: Vec<UserId>,
}

/// Hash-map backed store with O(1) user and edge lookup.
#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    users: HashMap<UserId, UserRecord>,
    edges: HashMap<(UserId, UserId), Timestamp>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphStore for InMemoryStore {
    fn upsert_user(&mut self, id: &str, created_at: Option<Timestamp>) -> StoreResult<()> {
        self.users
            .entry(id.to_string())
            .or_insert_with(|| UserRecord {
                created_at: created_at.unwrap_or_else(now_ms),
                ..UserRecord::default()
            });
        Ok(())
    }

    fn add_edge(
        &mut self,
        referrer: &str,
        candidate: &str,
        created_at: Option<Timestamp>,
    ) -> StoreResult<()> {
        let created_at = created_at.unwrap_or_else(now_ms);
        self.upsert_user(referrer, Some(created_at))?;
        self.upsert_user(candidate, Some(created_at))?;

        let key = (referrer.to_string(), candidate.to_string());
        if self.edges.contains_key(&key) {
            return Ok(());
        }
        self.edges.insert(key, created_at);
        if let Some(record) = self.users.get_mut(referrer) {
            record.children.push(candidate.to_string());
        }
        if let Some(record) = self.users.get_mut(candidate) {
            record.referrers.push(referrer.to_string());
        }
        Ok(())
    }

    fn remove_edge(&mut self, referrer: &str, candidate: &str) -> StoreResult<bool> {
        let key = (referrer.to_string(), candidate.to_string());
        if self.edges.remove(&key).is_none() {
            return Ok(false);
        }
        if let Some(record) = self.users.get_mut(referrer) {
            record.children.retain(|child| child != candidate);
        }
        if let Some(record) = self.users.get_mut(candidate) {
            record.referrers.retain(|r| r != referrer);
        }
        Ok(true)
    }

    fn remove_user(&mut self, id: &str) -> StoreResult<bool> {
        let Some(record) = self.users.remove(id) else {
            return Ok(false);
        };
        for child in &record.children {
            self.edges.remove(&(id.to_string(), child.clone()));
            if let Some(child_record) = self.users.get_mut(child) {
                child_record.referrers.retain(|r| r != id);
            }
        }
        for referrer in &record.referrers {
            self.edges.remove(&(referrer.clone(), id.to_string()));
            if let Some(referrer_record) = self.users.get_mut(referrer) {
                referrer_record.children.retain(|child| child != id);
            }
        }
        Ok(true)
    }

    fn user(&self, id: &str) -> StoreResult<Option<User>> {
        Ok(self.users.get(id).map(|record| User {
            id: id.to_string(),
            created_at: record.created_at,
            parent: record.referrers.first().cloned(),
            children: record.children.clone(),
        }))
    }

    fn user_ids(&self) -> StoreResult<Vec<UserId>> {
        let mut ids: Vec<UserId> = self.users.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn edges(&self) -> StoreResult<Vec<ReferralEdge>> {
        let mut edges: Vec<ReferralEdge> = self
            .edges
            .iter()
            .map(|((referrer, candidate), created_at)| ReferralEdge {
                referrer: referrer.clone(),
                candidate: candidate.clone(),
                created_at: *created_at,
            })
            .collect();
        edges.sort();
        Ok(edges)
    }

    fn direct_children(&self, id: &str) -> StoreResult<Vec<UserId>> {
        Ok(self
            .users
            .get(id)
            .map(|record| record.children.clone())
            .unwrap_or_default())
    }

    fn parent(&self, id: &str) -> StoreResult<Option<UserId>> {
        Ok(self
            .users
            .get(id)
            .and_then(|record| record.referrers.first().cloned()))
    }

    fn contains_user(&self, id: &str) -> StoreResult<bool> {
        Ok(self.users.contains_key(id))
    }

    fn user_count(&self) -> StoreResult<usize> {
        Ok(self.users.len())
    }

    fn has_edge(&self, referrer: &str, candidate: &str) -> StoreResult<bool> {
        Ok(self
            .edges
            .contains_key(&(referrer.to_string(), candidate.to_string())))
    }
}
