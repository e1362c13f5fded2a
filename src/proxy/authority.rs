//! Authority → upstream address mapping, swapped atomically on reload.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

/// Host authority (no port) to upstream `host:port`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorityMap {
    entries: HashMap<String, String>,
}

/// The map as shared by every proxy session.
pub type SharedAuthorities = Arc<ArcSwap<AuthorityMap>>;

impl AuthorityMap {
    pub fn new<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(authority, address)| (authority.into(), address.into()))
                .collect(),
        }
    }

    /// Upstream address for an authority; exact match only.
    pub fn resolve(&self, authority: &str) -> Option<&str> {
        self.entries.get(authority).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_shared(self) -> SharedAuthorities {
        Arc::new(ArcSwap::from_pointee(self))
    }
}
