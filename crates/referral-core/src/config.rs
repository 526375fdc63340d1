use serde::{Deserialize, Serialize};

use crate::error::{ReferralError, Result};

/// Policy toggles consulted by every referral check.
///
/// The defaults are strict and keep the network a forest of rooted trees.
/// Each `allow_*` flag, when set, skips exactly one structural check.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct GraphConfig {
    pub allow_self_referrals: bool,
    pub allow_multiple_referrers: bool,
    pub allow_cycles: bool,
    pub max_network_size: Option<usize>,
    pub max_referrals_per_user: Option<usize>,
}

impl GraphConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|err| ReferralError::InvalidInput(format!("config: {err}")))
    }

    /// Every check skipped and no limits.
    pub fn permissive() -> Self {
        Self {
            allow_self_referrals: true,
            allow_multiple_referrers: true,
            allow_cycles: true,
            max_network_size: None,
            max_referrals_per_user: None,
        }
    }

    /// True when all three structural checks are enforced.
    pub fn enforces_forest(&self) -> bool {
        !self.allow_self_referrals && !self.allow_multiple_referrers && !self.allow_cycles
    }

    /// Return a copy with `patch` applied on top.
    pub fn merged(&self, patch: &ConfigPatch) -> Self {
        Self {
            allow_self_referrals: patch
                .allow_self_referrals
                .unwrap_or(self.allow_self_referrals),
            allow_multiple_referrers: patch
                .allow_multiple_referrers
                .unwrap_or(self.allow_multiple_referrers),
            allow_cycles: patch.allow_cycles.unwrap_or(self.allow_cycles),
            max_network_size: patch.max_network_size.unwrap_or(self.max_network_size),
            max_referrals_per_user: patch
                .max_referrals_per_user
                .unwrap_or(self.max_referrals_per_user),
        }
    }
}

/// Partial update for [`GraphConfig`]; `None` leaves a field untouched.
///
/// The limits are doubly optional so a patch can clear a limit
/// (`Some(None)`) as well as set one.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ConfigPatch {
    pub allow_self_referrals: Option<bool>,
    pub allow_multiple_referrers: Option<bool>,
    pub allow_cycles: Option<bool>,
    pub max_network_size: Option<Option<usize>>,
    pub max_referrals_per_user: Option<Option<usize>>,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
