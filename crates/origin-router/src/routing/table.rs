//! Concurrent route table keyed by origin identity.
//!
//! Reads (one per inbound request) vastly outnumber writes (administrative
//! actions only), so the map sits behind a reader-writer lock. Every critical
//! section is a single map operation; nothing performs I/O while holding it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// What the dispatcher does with a request whose peer matched a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteAction {
    /// Answer with a temporary redirect to the destination.
    Redirect,
    /// Forward the request to the destination and relay its response.
    Proxy,
    /// Any other action name found in stored data. Never written by the
    /// admin API; dispatching it is reported as a data-integrity defect.
    #[serde(other)]
    Unknown,
}

impl RouteAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteAction::Redirect => "redirect",
            RouteAction::Proxy => "proxy",
            RouteAction::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RouteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured destination. Replaced wholesale on update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    /// Destination as `host[:port]`.
    #[serde(alias = "To")]
    pub to: String,
    #[serde(rename = "type", alias = "Type")]
    pub action: RouteAction,
}

impl RouteEntry {
    pub fn new(to: impl Into<String>, action: RouteAction) -> Self {
        Self {
            to: to.into(),
            action,
        }
    }
}

/// Thread-safe mapping from origin key to [`RouteEntry`].
///
/// Constructed once at startup and shared as `Arc<RouteTable>` between the
/// dispatcher and the admin layer.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: RwLock<HashMap<String, RouteEntry>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table pre-populated from stored routes.
    pub fn from_routes<I>(routes: I) -> Self
    where
        I: IntoIterator<Item = (String, RouteEntry)>,
    {
        Self {
            routes: RwLock::new(routes.into_iter().collect()),
        }
    }

    /// Look up the route for `key`.
    pub fn get(&self, key: &str) -> Option<RouteEntry> {
        self.read().get(key).cloned()
    }

    /// Independent copy of every route; safe to keep and mutate.
    pub fn get_all(&self) -> HashMap<String, RouteEntry> {
        self.read().clone()
    }

    /// Insert or fully replace the route for `key`. Visible to every lookup
    /// that starts after this returns.
    pub fn set(&self, key: impl Into<String>, entry: RouteEntry) {
        self.write().insert(key.into(), entry);
    }

    /// Remove the route for `key`. Removing an absent key is a no-op.
    pub fn remove(&self, key: &str) {
        self.write().remove(key);
    }

    pub fn exists(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A writer can only panic between whole map operations, so a poisoned
    // lock still guards a consistent map.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, RouteEntry>> {
        self.routes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, RouteEntry>> {
        self.routes.write().unwrap_or_else(PoisonError::into_inner)
    }
}
