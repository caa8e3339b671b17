//! Navigation: the [`Navigator`] seam plus an in-process [`MemoryRouter`].

use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

/// Redirect chains longer than this are abandoned
const MAX_REDIRECTS: usize = 8;

/// Per-route metadata
pub type RouteMeta = Map<String, Value>;

/// Outcome of a guard
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Proceed,
    Redirect(String),
}

/// Evaluated on every navigation before it is committed
pub trait NavigationGuard: Send + Sync {
    fn check(&self, to: &str, meta: &RouteMeta) -> Navigation;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GuardId(u64);

pub trait Navigator: Send + Sync {
    /// Navigate to `path`, running guards; returns the location actually reached
    fn push(&self, path: &str) -> String;
    fn current_path(&self) -> String;
    fn route_meta(&self, path: &str) -> RouteMeta;
    fn add_guard(&self, guard: Arc<dyn NavigationGuard>) -> GuardId;
    fn remove_guard(&self, id: GuardId) -> bool;
}

/// Router keeping history in memory
pub struct MemoryRouter {
    routes: DashMap<String, RouteMeta>,
    history: Mutex<Vec<String>>,
    guards: Mutex<Vec<(GuardId, Arc<dyn NavigationGuard>)>>,
    next_guard_id: AtomicU64,
}

impl Default for MemoryRouter {
    fn default() -> Self {
        Self::new("/")
    }
}

impl MemoryRouter {
    /// Router whose current location is `initial`
    pub fn new(initial: &str) -> Self {
        Self {
            routes: DashMap::new(),
            history: Mutex::new(vec![initial.to_string()]),
            guards: Mutex::new(Vec::new()),
            next_guard_id: AtomicU64::new(1),
        }
    }

    pub fn with_route(self, path: &str, meta: Value) -> Self {
        self.add_route(path, meta);
        self
    }

    /// Declare metadata for `path`; non-object values are ignored
    pub fn add_route(&self, path: &str, meta: Value) {
        let meta = match meta {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.routes.insert(path.to_string(), meta);
    }

    /// Every committed location, oldest first (includes the initial one)
    pub fn history(&self) -> Vec<String> {
        self.history
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    /// Number of committed navigations, the initial location excluded
    pub fn navigation_count(&self) -> usize {
        self.history().len().saturating_sub(1)
    }

    fn resolve(&self, path: &str) -> Option<String> {
        let guards: Vec<Arc<dyn NavigationGuard>> = match self.guards.lock() {
            Ok(g) => g.iter().map(|(_, guard)| guard.clone()).collect(),
            Err(_) => Vec::new(),
        };

        let mut target = path.to_string();
        'hops: for _ in 0..=MAX_REDIRECTS {
            let meta = self.route_meta(&target);
            for guard in &guards {
                if let Navigation::Redirect(to) = guard.check(&target, &meta) {
                    if to != target {
                        tracing::debug!(from = %target, to = %to, "Navigation redirected");
                        target = to;
                        continue 'hops;
                    }
                }
            }
            return Some(target);
        }

        tracing::warn!(path = path, "Navigation abandoned: too many redirects");
        None
    }
}

/// Path without query string or fragment
pub(crate) fn route_path(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}

impl Navigator for MemoryRouter {
    fn push(&self, path: &str) -> String {
        let Some(target) = self.resolve(path) else {
            return self.current_path();
        };

        if let Ok(mut history) = self.history.lock() {
            history.push(target.clone());
        }
        tracing::debug!(path = %target, "Navigated");
        target
    }

    fn current_path(&self) -> String {
        self.history
            .lock()
            .ok()
            .and_then(|h| h.last().cloned())
            .unwrap_or_default()
    }

    fn route_meta(&self, path: &str) -> RouteMeta {
        self.routes
            .get(route_path(path))
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    fn add_guard(&self, guard: Arc<dyn NavigationGuard>) -> GuardId {
        let id = GuardId(self.next_guard_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut guards) = self.guards.lock() {
            guards.push((id, guard));
        }
        id
    }

    fn remove_guard(&self, id: GuardId) -> bool {
        match self.guards.lock() {
            Ok(mut guards) => {
                let before = guards.len();
                guards.retain(|(gid, _)| *gid != id);
                guards.len() != before
            }
            Err(_) => false,
        }
    }
}
