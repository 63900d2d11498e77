//! Core event types shared by the rate limiter, security monitor and exporter
//!
//! This module defines the security event record, the filters used to query the
//! monitor, and the aggregate summary it produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Free-form key/value details attached to a security event
pub type EventDetails = Map<String, Value>;

/// Well-known event names
pub mod names {
    /// A failed authentication attempt
    pub const LOGIN_FAILED: &str = "login-failed";
    /// A request that matched a suspicious pattern
    pub const SUSPICIOUS_REQUEST: &str = "suspicious-request";
    /// A request denied by the rate limiter
    pub const RATE_LIMIT_EXCEEDED: &str = "rate-limit-exceeded";
    /// Escalation raised on repeated login failures
    pub const POTENTIAL_BRUTE_FORCE: &str = "potential-brute-force";
    /// Escalation raised on a burst of suspicious requests
    pub const POTENTIAL_ATTACK: &str = "potential-attack";
}

/// A single entry in the security audit trail
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityEvent {
    /// When the event was logged
    pub timestamp: Timestamp,
    /// Event name, e.g. `login-failed`
    pub event: String,
    /// Arbitrary details supplied by the caller or the escalation rule
    #[serde(default)]
    pub details: EventDetails,
    /// Set by the monitor on records derived by an escalation rule; not serialized
    #[serde(skip)]
    escalated: bool,
}

impl SecurityEvent {
    pub fn new(event: impl Into<String>, details: EventDetails, timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            event: event.into(),
            details,
            escalated: false,
        }
    }

    /// Mark this record as derived by an escalation rule
    pub(crate) fn into_escalation(mut self) -> Self {
        self.escalated = true;
        self
    }

    /// Whether this event was synthesized by an escalation rule
    ///
    /// Only records produced by a monitor carry the mark. Events rebuilt from JSON
    /// report `false` whatever their name.
    pub fn is_escalation(&self) -> bool {
        self.escalated
    }
}

/// Severity level assigned to escalation rules
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational, no action required
    Info,
    /// May require attention
    Warning,
    /// Requires immediate attention
    Critical,
}

/// Query filter for [`SecurityEventMonitor::get_events`](crate::monitor::SecurityEventMonitor::get_events)
///
/// Omitted fields impose no constraint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    /// Only events with exactly this name
    pub event_name: Option<String>,
    /// Only events with `timestamp >= since`
    pub since: Option<Timestamp>,
}

impl EventFilter {
    /// A filter that matches every event
    pub fn all() -> Self {
        Self::default()
    }

    pub fn named(event_name: impl Into<String>) -> Self {
        Self {
            event_name: Some(event_name.into()),
            since: None,
        }
    }

    pub fn since(mut self, since: Timestamp) -> Self {
        self.since = Some(since);
        self
    }

    pub fn matches(&self, event: &SecurityEvent) -> bool {
        if let Some(ref name) = self.event_name {
            if &event.event != name {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.timestamp < since {
                return false;
            }
        }
        true
    }
}

/// Aggregate view over the events currently retained by the monitor
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySummary {
    /// Number of retained events
    pub total_events: usize,
    /// Retained event count per event name
    pub events_by_type: BTreeMap<String, usize>,
    /// Retained events from the last 24 hours
    pub recent_events: usize,
}

/// Build an [`EventDetails`] map from `key => value` pairs
///
/// ```
/// use gatekeeper::details;
///
/// let d = details! { "identifier" => "10.0.0.1", "attempt" => 3 };
/// assert_eq!(d["attempt"], 3);
/// ```
#[macro_export]
macro_rules! details {
    () => { $crate::events::EventDetails::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::events::EventDetails::new();
        $( map.insert(($key).to_string(), $crate::__private::json!($value)); )+
        map
    }};
}
