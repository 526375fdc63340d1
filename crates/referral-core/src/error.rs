use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::UserId;

/// Failure reported by a [`GraphStore`](crate::store::GraphStore) backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not serve the request (connection lost, lock
    /// poisoned, injected fault, ...).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backend answered, but its records contradict each other.
    #[error("store corrupt: {0}")]
    Corrupt(String),
}

/// Canonical error type returned by the referral graph.
#[derive(Debug, Error)]
pub enum ReferralError {
    /// Blank or otherwise malformed user identifier.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Referrer and candidate are the same user while self-referrals are
    /// disallowed.
    #[error("user {0} cannot refer themselves")]
    SelfReferral(UserId),

    /// Candidate already has a referrer and multiple referrers are disallowed.
    #[error("user {candidate} already referred by {existing}")]
    MultipleReferrers { candidate: UserId, existing: UserId },

    /// Candidate can already reach the referrer, so the edge would close a
    /// loop.
    #[error("referral {referrer} -> {candidate} would close a cycle")]
    CycleDetected { referrer: UserId, candidate: UserId },

    /// Accepting the edge would push the user count past `max_network_size`.
    #[error("network size limit of {limit} users reached")]
    NetworkSizeLimit { limit: usize },

    /// Referrer already has `max_referrals_per_user` direct referrals.
    #[error("user {referrer} reached the limit of {limit} direct referrals")]
    ReferralLimit { referrer: UserId, limit: usize },

    /// The named user is not in the network.
    #[error("unknown user {0}")]
    UserNotFound(UserId),

    /// The storage backend failed; the graph was not modified.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl ReferralError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReferralError::InvalidInput(_) => ErrorKind::InvalidInput,
            ReferralError::SelfReferral(_) => ErrorKind::SelfReferral,
            ReferralError::MultipleReferrers { .. } => ErrorKind::MultipleReferrers,
            ReferralError::CycleDetected { .. } => ErrorKind::CycleDetected,
            ReferralError::NetworkSizeLimit { .. } => ErrorKind::NetworkSizeLimit,
            ReferralError::ReferralLimit { .. } => ErrorKind::ReferralLimit,
            ReferralError::UserNotFound(_) => ErrorKind::UserNotFound,
            ReferralError::Storage(_) => ErrorKind::StorageError,
        }
    }
}

/// Flat classification of [`ReferralError`], stable across releases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidInput,
    SelfReferral,
    MultipleReferrers,
    CycleDetected,
    NetworkSizeLimit,
    ReferralLimit,
    UserNotFound,
    StorageError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::SelfReferral => "SELF_REFERRAL",
            ErrorKind::MultipleReferrers => "MULTIPLE_REFERRERS",
            ErrorKind::CycleDetected => "CYCLE_DETECTED",
            ErrorKind::NetworkSizeLimit => "NETWORK_SIZE_LIMIT",
            ErrorKind::ReferralLimit => "REFERRAL_LIMIT",
            ErrorKind::UserNotFound => "USER_NOT_FOUND",
            ErrorKind::StorageError => "STORAGE_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Result<T> = std::result::Result<T, ReferralError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_convert_and_classify() {
        let err: ReferralError = StoreError::Unavailable("down".into()).into();
        assert_eq!(err.kind(), ErrorKind::StorageError);
        assert_eq!(err.to_string(), "storage error: store unavailable: down");
    }

    #[test]
    fn kinds_serialize_as_screaming_snake_names() {
        let json = serde_json::to_string(&ErrorKind::CycleDetected).unwrap();
        assert_eq!(json, "\"CYCLE_DETECTED\"");
        assert_eq!(ErrorKind::MultipleReferrers.to_string(), "MULTIPLE_REFERRERS");
    }
}
