use crate::events::Timestamp;
use chrono::{Duration, Utc};
use log::debug;
use std::collections::{HashMap, VecDeque};

/// Default maximum admissions per identifier per window
pub const DEFAULT_MAX_REQUESTS: usize = 100;

/// Default number of identifiers tracked before idle ones are evicted
pub const DEFAULT_MAX_TRACKED_IDENTIFIERS: usize = 10_000;

/// Sliding-window admission controller keyed by client identifier
///
/// Each identifier owns the timestamps of its admitted requests. Entries older than
/// the window are pruned lazily whenever that identifier is checked, and the pruned
/// view is committed whether the request is admitted or denied.
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum admissions per identifier within `window`
    max_requests: usize,
    /// Length of the sliding window
    window: Duration,
    /// Upper bound on the number of identifiers held in `requests`
    max_tracked_identifiers: usize,
    /// Admission timestamps per identifier, oldest first
    requests: HashMap<String, VecDeque<Timestamp>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, Duration::minutes(15))
    }
}

impl RateLimiter {
    /// Create a new rate limiter
    ///
    /// # Arguments
    ///
    /// * `max_requests` - Maximum admissions per identifier within the window
    /// * `window` - Length of the sliding window
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self::with_identifier_cap(max_requests, window, DEFAULT_MAX_TRACKED_IDENTIFIERS)
    }

    /// Create a new rate limiter with an explicit cap on tracked identifiers
    ///
    /// A cap of 0 is treated as 1 so the identifier being checked always has a slot.
    pub fn with_identifier_cap(
        max_requests: usize,
        window: Duration,
        max_tracked_identifiers: usize,
    ) -> Self {
        Self {
            max_requests,
            window,
            max_tracked_identifiers: max_tracked_identifiers.max(1),
            requests: HashMap::new(),
        }
    }

    /// Check whether a request from `identifier` may proceed now
    ///
    /// Admitted requests are recorded against the identifier's quota.
    ///
    /// # Returns
    ///
    /// `true` if the request is admitted, `false` if the quota is exhausted
    pub fn is_allowed(&mut self, identifier: &str) -> bool {
        self.is_allowed_at(identifier, Utc::now())
    }

    /// Check whether a request from `identifier` may proceed at `now`
    ///
    /// This is primarily used for testing and for replaying recorded traffic.
    pub fn is_allowed_at(&mut self, identifier: &str, now: Timestamp) -> bool {
        let window = self.window;
        let count = match self.requests.get_mut(identifier) {
            Some(timestamps) => {
                timestamps.retain(|&t| now - t < window);
                timestamps.len()
            }
            None => 0,
        };

        if count >= self.max_requests {
            debug!(
                "Denied request for '{}': {} requests in window",
                identifier, count
            );
            return false;
        }

        // Only admissions may claim a slot for a new identifier
        if !self.requests.contains_key(identifier) {
            self.make_room(now);
        }

        self.requests
            .entry(identifier.to_string())
            .or_default()
            .push_back(now);
        true
    }

    /// Number of requests `identifier` may still make in the current window
    pub fn remaining_requests(&self, identifier: &str) -> usize {
        self.remaining_requests_at(identifier, Utc::now())
    }

    /// Number of requests `identifier` may still make in the window ending at `now`
    pub fn remaining_requests_at(&self, identifier: &str, now: Timestamp) -> usize {
        self.max_requests
            .saturating_sub(self.valid_count(identifier, now))
    }

    /// Instant at which the oldest counted request expires
    ///
    /// Returns the current time if nothing is counted against `identifier`.
    pub fn reset_time(&self, identifier: &str) -> Timestamp {
        self.reset_time_at(identifier, Utc::now())
    }

    /// Instant at which the oldest request counted at `now` expires
    pub fn reset_time_at(&self, identifier: &str, now: Timestamp) -> Timestamp {
        self.requests
            .get(identifier)
            .and_then(|timestamps| {
                timestamps
                    .iter()
                    .filter(|&&t| now - t < self.window)
                    .min()
                    .copied()
            })
            .map_or(now, |oldest| oldest + self.window)
    }

    /// Drop identifiers that have no requests left in the window
    ///
    /// # Returns
    ///
    /// Number of identifiers removed
    pub fn sweep_idle(&mut self) -> usize {
        self.sweep_idle_at(Utc::now())
    }

    /// Drop identifiers that have no requests left in the window ending at `now`
    pub fn sweep_idle_at(&mut self, now: Timestamp) -> usize {
        let window = self.window;
        let before = self.requests.len();
        self.requests.retain(|_, timestamps| {
            timestamps.retain(|&t| now - t < window);
            !timestamps.is_empty()
        });
        let removed = before - self.requests.len();
        if removed > 0 {
            debug!("Swept {} idle identifiers", removed);
        }
        removed
    }

    /// Number of identifiers currently held in memory
    pub fn tracked_identifiers(&self) -> usize {
        self.requests.len()
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn valid_count(&self, identifier: &str, now: Timestamp) -> usize {
        self.requests.get(identifier).map_or(0, |timestamps| {
            timestamps.iter().filter(|&&t| now - t < self.window).count()
        })
    }

    /// Free a slot for a new identifier if the map is full
    ///
    /// Idle identifiers go first; if none are idle, the identifier whose latest
    /// admission is oldest is evicted.
    fn make_room(&mut self, now: Timestamp) {
        if self.requests.len() < self.max_tracked_identifiers {
            return;
        }

        self.sweep_idle_at(now);
        if self.requests.len() < self.max_tracked_identifiers {
            return;
        }

        let stalest = self
            .requests
            .iter()
            .min_by_key(|(_, timestamps)| timestamps.back().copied())
            .map(|(identifier, _)| identifier.clone());

        if let Some(identifier) = stalest {
            debug!("Identifier cap reached, evicting '{}'", identifier);
            self.requests.remove(&identifier);
        }
    }
}
