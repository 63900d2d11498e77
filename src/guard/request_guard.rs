use crate::config::Config;
use crate::details;
use crate::events::{names, EventDetails, EventFilter, SecurityEvent, SecuritySummary, Timestamp};
use crate::guard::patterns::{client_identifier, SuspiciousPatternDetector};
use crate::limiter::RateLimiter;
use crate::monitor::SecurityEventMonitor;
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// An inbound request as seen by the guard
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RequestInfo {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl RequestInfo {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Outcome of the rate limit check
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Allowed,
    Limited,
}

/// Decision returned for each request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuardDecision {
    /// Identifier the request was counted against
    pub identifier: String,
    pub verdict: Verdict,
    /// Requests left for this identifier in the current window
    pub remaining: usize,
    /// When the oldest counted request expires
    pub reset_at: Timestamp,
    /// Seconds to advertise in `Retry-After` when limited
    retry_after_seconds: u64,
    /// Security events recorded while handling this request
    pub events: Vec<SecurityEvent>,
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        self.verdict == Verdict::Allowed
    }

    /// HTTP status the caller should respond with
    pub fn status_code(&self) -> u16 {
        match self.verdict {
            Verdict::Allowed => 200,
            Verdict::Limited => 429,
        }
    }

    /// Value of the `Retry-After` header, present only when limited
    pub fn retry_after(&self) -> Option<u64> {
        match self.verdict {
            Verdict::Allowed => None,
            Verdict::Limited => Some(self.retry_after_seconds),
        }
    }
}

/// Application context tying the rate limiter to the security monitor
///
/// Each component sits behind its own mutex so the guard can be shared across
/// threads. A request is screened for suspicious patterns, then checked against the
/// rate limiter; both findings are reported to the monitor.
pub struct RequestGuard {
    limiter: Mutex<RateLimiter>,
    monitor: Mutex<SecurityEventMonitor>,
    detector: Option<SuspiciousPatternDetector>,
    retry_after_seconds: u64,
}

impl RequestGuard {
    /// Create a guard from explicit components
    ///
    /// Passing `None` as the detector disables suspicious-request screening.
    pub fn new(
        limiter: RateLimiter,
        monitor: SecurityEventMonitor,
        detector: Option<SuspiciousPatternDetector>,
        retry_after_seconds: u64,
    ) -> Self {
        Self {
            limiter: Mutex::new(limiter),
            monitor: Mutex::new(monitor),
            detector,
            retry_after_seconds,
        }
    }

    /// Create a guard from configuration
    pub fn from_config(config: &Config) -> Self {
        info!(
            "Initializing request guard: {} requests per {}s, {} events retained",
            config.rate_limit.max_requests,
            config.rate_limit.window_seconds,
            config.monitor.max_events
        );

        let limiter = RateLimiter::with_identifier_cap(
            config.rate_limit.max_requests,
            config.window(),
            config.rate_limit.max_tracked_identifiers,
        );
        let monitor = SecurityEventMonitor::new(config.monitor.max_events);
        let detector = config
            .guard
            .detect_suspicious
            .then(SuspiciousPatternDetector::with_defaults);

        Self::new(limiter, monitor, detector, config.guard.retry_after_seconds)
    }

    /// Screen and rate limit a request at the current time
    pub fn check_request(&self, request: &RequestInfo) -> GuardDecision {
        self.check_request_at(request, Utc::now())
    }

    /// Screen and rate limit a request at `now`
    pub fn check_request_at(&self, request: &RequestInfo, now: Timestamp) -> GuardDecision {
        let identifier = client_identifier(&request.headers);
        let mut events = Vec::new();

        if let Some(ref detector) = self.detector {
            if let Some(reason) = detector.inspect(&request.path, &request.headers) {
                warn!("Suspicious request from '{}': {}", identifier, reason);
                events.extend(self.monitor().log_event_at(
                    names::SUSPICIOUS_REQUEST,
                    details! {
                        "identifier" => identifier,
                        "reason" => reason,
                        "path" => request.path,
                    },
                    now,
                ));
            }
        }

        let (allowed, remaining, reset_at) = {
            let mut limiter = self.limiter();
            let allowed = limiter.is_allowed_at(&identifier, now);
            (
                allowed,
                limiter.remaining_requests_at(&identifier, now),
                limiter.reset_time_at(&identifier, now),
            )
        };

        let verdict = if allowed {
            Verdict::Allowed
        } else {
            warn!(
                "Rate limit exceeded for '{}' on {} {}",
                identifier, request.method, request.path
            );
            events.extend(self.monitor().log_event_at(
                names::RATE_LIMIT_EXCEEDED,
                details! {
                    "identifier" => identifier,
                    "path" => request.path,
                },
                now,
            ));
            Verdict::Limited
        };

        GuardDecision {
            identifier,
            verdict,
            remaining,
            reset_at,
            retry_after_seconds: self.retry_after_seconds,
            events,
        }
    }

    /// Report a failed login for `identifier`
    ///
    /// # Returns
    ///
    /// The events recorded, including any brute force escalation
    pub fn record_login_failure(
        &self,
        identifier: &str,
        mut details: EventDetails,
    ) -> Vec<SecurityEvent> {
        details
            .entry("identifier")
            .or_insert_with(|| identifier.into());
        self.monitor().log_event(names::LOGIN_FAILED, details)
    }

    /// Report an arbitrary security event
    pub fn log_event(&self, event_name: &str, details: EventDetails) -> Vec<SecurityEvent> {
        self.monitor().log_event(event_name, details)
    }

    pub fn events(&self, filter: &EventFilter) -> Vec<SecurityEvent> {
        self.monitor().get_events(filter)
    }

    pub fn security_summary(&self) -> SecuritySummary {
        self.monitor().security_summary()
    }

    /// Drop rate limiter state for identifiers with no recent requests
    pub fn sweep_idle(&self) -> usize {
        self.limiter().sweep_idle()
    }

    pub fn tracked_identifiers(&self) -> usize {
        self.limiter().tracked_identifiers()
    }

    // Lock poisoning is ignored; callers always get the inner state.
    fn limiter(&self) -> MutexGuard<'_, RateLimiter> {
        self.limiter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn monitor(&self) -> MutexGuard<'_, SecurityEventMonitor> {
        self.monitor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::details;
    use chrono::Duration;
    use std::sync::Arc;

    fn test_guard(max_requests: usize) -> RequestGuard {
        RequestGuard::new(
            RateLimiter::new(max_requests, Duration::minutes(15)),
            SecurityEventMonitor::new(100),
            Some(SuspiciousPatternDetector::with_defaults()),
            60,
        )
    }

    fn browser_request(ip: &str) -> RequestInfo {
        RequestInfo::new("GET", "/api/teams")
            .with_header("X-Forwarded-For", ip)
            .with_header("User-Agent", "Mozilla/5.0")
    }

    #[test]
    fn test_allowed_request() {
        let guard = test_guard(3);
        let decision = guard.check_request(&browser_request("203.0.113.7"));

        assert!(decision.is_allowed());
        assert_eq!(decision.identifier, "203.0.113.7");
        assert_eq!(decision.status_code(), 200);
        assert_eq!(decision.retry_after(), None);
        assert_eq!(decision.remaining, 2);
        assert!(decision.events.is_empty());
    }

    #[test]
    fn test_limited_request_maps_to_429() {
        let guard = test_guard(2);
        let now = Utc::now();
        let request = browser_request("203.0.113.7");

        assert!(guard.check_request_at(&request, now).is_allowed());
        assert!(guard.check_request_at(&request, now).is_allowed());

        let decision = guard.check_request_at(&request, now);
        assert!(!decision.is_allowed());
        assert_eq!(decision.status_code(), 429);
        assert_eq!(decision.retry_after(), Some(60));
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.reset_at, now + Duration::minutes(15));

        assert_eq!(decision.events.len(), 1);
        assert_eq!(decision.events[0].event, names::RATE_LIMIT_EXCEEDED);
        assert_eq!(decision.events[0].details["identifier"], "203.0.113.7");
        assert_eq!(decision.events[0].details["path"], "/api/teams");
    }

    #[test]
    fn test_identifiers_isolated() {
        let guard = test_guard(1);

        assert!(guard.check_request(&browser_request("10.0.0.1")).is_allowed());
        assert!(!guard.check_request(&browser_request("10.0.0.1")).is_allowed());
        assert!(guard.check_request(&browser_request("10.0.0.2")).is_allowed());
        assert_eq!(guard.tracked_identifiers(), 2);
    }

    #[test]
    fn test_requests_without_forwarding_headers_share_unknown_bucket() {
        let guard = test_guard(1);
        let request = RequestInfo::new("GET", "/").with_header("User-Agent", "Mozilla/5.0");

        assert_eq!(guard.check_request(&request).identifier, "unknown");
        assert!(!guard.check_request(&request).is_allowed());
    }

    #[test]
    fn test_suspicious_request_logged() {
        let guard = test_guard(10);
        let request = RequestInfo::new("GET", "/static/../../etc/passwd")
            .with_header("X-Real-IP", "198.51.100.4")
            .with_header("User-Agent", "curl/8.4.0");

        let decision = guard.check_request(&request);
        assert!(decision.is_allowed());
        assert_eq!(decision.events.len(), 1);
        assert_eq!(decision.events[0].event, names::SUSPICIOUS_REQUEST);
        assert_eq!(decision.events[0].details["identifier"], "198.51.100.4");
        assert_eq!(decision.events[0].details["path"], "/static/../../etc/passwd");
    }

    #[test]
    fn test_detection_disabled() {
        let guard = RequestGuard::new(
            RateLimiter::default(),
            SecurityEventMonitor::default(),
            None,
            60,
        );
        let decision = guard.check_request(&RequestInfo::new("GET", "/.env"));

        assert!(decision.is_allowed());
        assert!(decision.events.is_empty());
    }

    #[test]
    fn test_suspicious_burst_escalates_to_potential_attack() {
        let guard = test_guard(100);
        let now = Utc::now();
        let request = RequestInfo::new("GET", "/wp-admin/setup.php")
            .with_header("X-Forwarded-For", "192.0.2.50")
            .with_header("User-Agent", "Mozilla/5.0");

        for _ in 0..10 {
            let decision = guard.check_request_at(&request, now);
            assert_eq!(decision.events.len(), 1);
        }

        let decision = guard.check_request_at(&request, now);
        assert_eq!(decision.events.len(), 2);
        assert_eq!(decision.events[1].event, names::POTENTIAL_ATTACK);
        assert_eq!(decision.events[1].details["suspiciousRequests"], 11);
    }

    #[test]
    fn test_login_failures_escalate_to_brute_force() {
        let guard = test_guard(100);

        for _ in 0..5 {
            assert_eq!(guard.record_login_failure("10.0.0.9", details!()).len(), 1);
        }
        let events = guard.record_login_failure("10.0.0.9", details! { "user" => "coach" });
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].details["identifier"], "10.0.0.9");
        assert_eq!(events[0].details["user"], "coach");
        assert_eq!(events[1].event, names::POTENTIAL_BRUTE_FORCE);
        assert_eq!(events[1].details["failures"], 6);

        let summary = guard.security_summary();
        assert_eq!(summary.events_by_type[names::LOGIN_FAILED], 6);
        assert_eq!(summary.events_by_type[names::POTENTIAL_BRUTE_FORCE], 1);
        assert_eq!(
            guard
                .events(&EventFilter::named(names::POTENTIAL_BRUTE_FORCE))
                .len(),
            1
        );
    }

    #[test]
    fn test_log_arbitrary_event() {
        let guard = test_guard(10);
        let events = guard.log_event("password-reset", details! { "user" => "coach" });

        assert_eq!(events.len(), 1);
        assert_eq!(guard.events(&EventFilter::named("password-reset")).len(), 1);
        assert_eq!(guard.security_summary().total_events, 1);
    }

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        config.rate_limit.max_requests = 1;
        config.guard.retry_after_seconds = 30;
        config.guard.detect_suspicious = false;
        let guard = RequestGuard::from_config(&config);

        let request = RequestInfo::new("GET", "/.git/config");
        let first = guard.check_request(&request);
        assert!(first.is_allowed());
        assert!(first.events.is_empty());

        let second = guard.check_request(&request);
        assert_eq!(second.retry_after(), Some(30));
    }

    #[test]
    fn test_sweep_idle() {
        let guard = test_guard(5);
        let long_ago = Utc::now() - Duration::hours(1);

        guard.check_request_at(&browser_request("10.0.0.1"), long_ago);
        guard.check_request(&browser_request("10.0.0.2"));

        assert_eq!(guard.sweep_idle(), 1);
        assert_eq!(guard.tracked_identifiers(), 1);
    }

    #[test]
    fn test_guard_shared_across_threads() {
        let guard = Arc::new(test_guard(50));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let guard = Arc::clone(&guard);
                std::thread::spawn(move || {
                    (0..25)
                        .filter(|_| guard.check_request(&browser_request("10.0.0.1")).is_allowed())
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
        assert_eq!(
            guard.security_summary().events_by_type[names::RATE_LIMIT_EXCEEDED],
            50
        );
    }

    #[test]
    fn test_decision_serialization() {
        let guard = test_guard(1);
        let request = browser_request("10.0.0.1");
        guard.check_request(&request);
        let decision = guard.check_request(&request);

        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["verdict"], "limited");
        assert_eq!(json["identifier"], "10.0.0.1");
        assert_eq!(json["events"][0]["event"], names::RATE_LIMIT_EXCEEDED);
    }
}
