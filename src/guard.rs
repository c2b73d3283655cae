//! Stale-route guard: stops background revalidation loops for routes already
//! known not to exist.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use crate::routes::{RouteLookup, RouteTable, normalize};

/// Counts requests per exact path inside a sliding observation window.
#[derive(Debug)]
pub struct RequestCounter {
    window: Duration,
    hits: HashMap<String, VecDeque<Instant>>,
}

impl RequestCounter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            hits: HashMap::new(),
        }
    }

    pub fn record(&mut self, path: &str, at: Instant) {
        let hits = self.hits.entry(path.to_string()).or_default();
        hits.push_back(at);
        prune(hits, self.window, at);
    }

    /// Requests to exactly `path` within the window ending at `now`.
    pub fn count(&mut self, path: &str, now: Instant) -> usize {
        let Some(hits) = self.hits.get_mut(path) else {
            return 0;
        };
        prune(hits, self.window, now);
        hits.len()
    }

    #[cfg(test)]
    fn retained(&self, path: &str) -> usize {
        self.hits.get(path).map_or(0, VecDeque::len)
    }
}

fn prune(hits: &mut VecDeque<Instant>, window: Duration, now: Instant) {
    while let Some(&oldest) = hits.front() {
        if now.saturating_duration_since(oldest) > window {
            hits.pop_front();
        } else {
            break;
        }
    }
}

/// Why a request was or was not sent to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Forward the request; carries the lookup it produced.
    Forward(RouteLookup),
    /// The route is memoised as not-found; nothing is sent.
    Suppressed,
}

/// Tracks per-route outcomes so a not-found route is requested once per
/// navigation and never polled in the background.
#[derive(Debug)]
pub struct StaleRouteGuard {
    not_found: HashSet<String>,
    requests: RequestCounter,
}

impl StaleRouteGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            not_found: HashSet::new(),
            requests: RequestCounter::new(window),
        }
    }

    /// A user navigation. Always issues exactly one request, even for a route
    /// previously found missing, and refreshes the memo with the result.
    pub fn navigate(&mut self, table: &RouteTable, path: &str) -> RouteLookup {
        let key = normalize(path);
        self.requests.record(&key, Instant::now());
        let lookup = table.resolve(&key);
        match lookup {
            RouteLookup::NotFound => {
                self.not_found.insert(key);
            }
            RouteLookup::Found { .. } => {
                self.not_found.remove(&key);
            }
        }
        lookup
    }

    /// A background revalidation attempt. Suppressed for routes known missing.
    pub fn revalidate(&mut self, table: &RouteTable, path: &str) -> Decision {
        let key = normalize(path);
        if self.not_found.contains(&key) {
            tracing::debug!(route = %key, "revalidation suppressed for not-found route");
            return Decision::Suppressed;
        }
        self.requests.record(&key, Instant::now());
        let lookup = table.resolve(&key);
        if lookup == RouteLookup::NotFound {
            // Deleted or renamed since the last navigation: stop polling it.
            self.not_found.insert(key);
        }
        Decision::Forward(lookup)
    }

    /// Forget not-found memos after a successful rebuild: the tree may have changed.
    pub fn invalidate(&mut self) {
        self.not_found.clear();
    }

    pub fn is_known_missing(&self, path: &str) -> bool {
        self.not_found.contains(&normalize(path))
    }

    pub fn request_count(&mut self, path: &str) -> usize {
        self.requests.count(&normalize(path), Instant::now())
    }
}
