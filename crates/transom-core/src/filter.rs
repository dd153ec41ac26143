//! Allow/deny policy over peer origins.
//!
//! The acceptor side of a handshake does not know who will knock, so it
//! carries a declarative filter evaluated exactly once, against the origin
//! the first valid handshake reply arrived from. The system is closed by
//! default: with no filter configured, every peer is rejected.

use serde::{Deserialize, Serialize};
use transom_proto::Origin;

/// Filter polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    /// Accept only origins on the list.
    Whitelist,
    /// Accept everything except origins on the list.
    Blacklist,
}

/// Allow/deny policy over peer origins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginFilter {
    kind: FilterKind,
    list: Vec<Origin>,
}

impl OriginFilter {
    /// Accept only the listed origins.
    pub fn whitelist(origins: impl IntoIterator<Item = Origin>) -> Self {
        Self { kind: FilterKind::Whitelist, list: origins.into_iter().collect() }
    }

    /// Accept everything except the listed origins.
    pub fn blacklist(origins: impl IntoIterator<Item = Origin>) -> Self {
        Self { kind: FilterKind::Blacklist, list: origins.into_iter().collect() }
    }

    /// Reject every origin (empty whitelist).
    #[must_use]
    pub fn deny_all() -> Self {
        Self::whitelist([])
    }

    /// Accept every origin (empty blacklist).
    #[must_use]
    pub fn allow_all() -> Self {
        Self::blacklist([])
    }

    /// Whether `origin` passes the filter.
    #[must_use]
    pub fn accepts(&self, origin: &Origin) -> bool {
        let listed = self.list.contains(origin);
        match self.kind {
            FilterKind::Whitelist => listed,
            FilterKind::Blacklist => !listed,
        }
    }
}

impl Default for OriginFilter {
    /// Closed by default: deny all.
    fn default() -> Self {
        Self::deny_all()
    }
}
