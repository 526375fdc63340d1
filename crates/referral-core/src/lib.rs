//! Core of the RefNet referral network.
//!
//! A referral network is a directed graph where `referrer -> candidate`
//! records that `referrer` recruited `candidate`. Under the default policy the
//! graph stays a forest of rooted trees: nobody refers themselves, nobody has
//! two referrers, and no referral closes a loop.
//!
//! * [`store`] — the [`GraphStore`] persistence seam and the in-memory
//!   backend.
//! * [`graph`] — [`ReferralGraph`], which validates every referral before it
//!   reaches the store.
//! * [`influence`] — reach and flow-centrality rankings over a snapshot.
//! * [`stats`] — aggregate counters and ratios.
//! * [`snapshot`] — JSON export/import and a state digest.
//!
//! Everything here is synchronous and single-threaded. Hosts that share a
//! graph between threads must serialise writers themselves (for example with
//! an `RwLock<ReferralGraph>`); an [`InfluenceAnalyzer`] owns its data and can
//! be read from many threads once built.

pub mod config;
pub mod error;
pub mod graph;
pub mod influence;
pub mod snapshot;
pub mod stats;
pub mod store;
pub mod types;

pub use config::{ConfigPatch, GraphConfig};
pub use error::{ErrorKind, ReferralError, StoreError};
pub use graph::ReferralGraph;
pub use influence::{InfluenceAnalyzer, DEFAULT_TOP_K};
pub use snapshot::NetworkSnapshot;
pub use stats::{NetworkStats, StatsComputer};
pub use store::{GraphStore, InMemoryStore};
pub use types::{ReferralEdge, StoreStats, Timestamp, User, UserId};
