//! Capacity-bounded security event log with escalation rules
//!
//! The monitor keeps a chronological audit trail of security events. When an event
//! is logged, the rules watching that event name are evaluated against the retained
//! trail, and any rule that fires has its derived event logged as well.

use crate::events::{EventDetails, EventFilter, SecurityEvent, SecuritySummary, Severity, Timestamp};
use crate::monitor::rules::{default_rules, EscalationRule};
use chrono::{Duration, Utc};
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, VecDeque};

/// Default number of events retained
pub const DEFAULT_MAX_EVENTS: usize = 1000;

/// Escalations deeper than this are not evaluated further
pub const MAX_ESCALATION_DEPTH: usize = 4;

/// Security event log with bounded capacity and automatic escalation
pub struct SecurityEventMonitor {
    /// Retained events, oldest first
    events: VecDeque<SecurityEvent>,
    /// Maximum number of retained events
    max_events: usize,
    /// Escalation rules evaluated on every logged event
    rules: Vec<Box<dyn EscalationRule>>,
}

impl Default for SecurityEventMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EVENTS)
    }
}

impl SecurityEventMonitor {
    /// Create a monitor with the built-in brute force and attack burst rules
    ///
    /// # Arguments
    ///
    /// * `max_events` - Maximum number of events to retain
    ///
    /// # Examples
    ///
    /// ```
    /// use gatekeeper::monitor::SecurityEventMonitor;
    /// use gatekeeper::details;
    ///
    /// let mut monitor = SecurityEventMonitor::new(100);
    /// monitor.log_event("login-failed", details! { "user" => "alice" });
    /// assert_eq!(monitor.len(), 1);
    /// ```
    pub fn new(max_events: usize) -> Self {
        Self::with_rules(max_events, default_rules())
    }

    /// Create a monitor with a custom rule set
    pub fn with_rules(max_events: usize, rules: Vec<Box<dyn EscalationRule>>) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events.min(DEFAULT_MAX_EVENTS)),
            max_events,
            rules,
        }
    }

    /// Add an escalation rule
    pub fn add_rule(&mut self, rule: Box<dyn EscalationRule>) {
        self.rules.push(rule);
    }

    /// Log a security event at the current time
    ///
    /// # Returns
    ///
    /// The records appended by this call: the event itself first, followed by any
    /// escalation events it caused
    pub fn log_event(&mut self, event_name: &str, details: EventDetails) -> Vec<SecurityEvent> {
        self.log_event_at(event_name, details, Utc::now())
    }

    /// Log a security event at `now`
    ///
    /// Each appended record is evaluated in turn: the record is stored, capacity is
    /// enforced, and every rule triggered by its name may queue a derived event.
    /// Derived events go through the same steps until none remain or
    /// [`MAX_ESCALATION_DEPTH`] is reached.
    pub fn log_event_at(
        &mut self,
        event_name: &str,
        details: EventDetails,
        now: Timestamp,
    ) -> Vec<SecurityEvent> {
        let mut logged = Vec::new();
        let mut pending = VecDeque::new();
        pending.push_back((event_name.to_string(), details, 0usize));

        while let Some((name, details, depth)) = pending.pop_front() {
            let mut record = SecurityEvent::new(name, details, now);
            if depth > 0 {
                record = record.into_escalation();
            }
            debug!("Security event: {}", record.event);
            self.events.push_back(record.clone());
            self.enforce_capacity();

            for rule in self.rules.iter().filter(|rule| rule.trigger() == record.event) {
                let Some(escalation_details) = rule.evaluate(&self.events, now) else {
                    continue;
                };

                if depth >= MAX_ESCALATION_DEPTH {
                    warn!(
                        "Escalation depth limit reached, not logging '{}' from rule '{}'",
                        rule.escalation(),
                        rule.name()
                    );
                    continue;
                }

                match rule.severity() {
                    Severity::Critical => error!(
                        "Rule '{}' escalated '{}' to '{}': {}",
                        rule.name(),
                        record.event,
                        rule.escalation(),
                        serde_json::Value::Object(escalation_details.clone())
                    ),
                    Severity::Warning => warn!(
                        "Rule '{}' escalated '{}' to '{}'",
                        rule.name(),
                        record.event,
                        rule.escalation()
                    ),
                    Severity::Info => info!(
                        "Rule '{}' escalated '{}' to '{}'",
                        rule.name(),
                        record.event,
                        rule.escalation()
                    ),
                }

                pending.push_back((rule.escalation().to_string(), escalation_details, depth + 1));
            }

            logged.push(record);
        }

        logged
    }

    /// Return retained events matching `filter`, in insertion order
    pub fn get_events(&self, filter: &EventFilter) -> Vec<SecurityEvent> {
        self.events
            .iter()
            .filter(|event| filter.matches(event))
            .cloned()
            .collect()
    }

    /// Summarize the retained events as of now
    pub fn security_summary(&self) -> SecuritySummary {
        self.security_summary_at(Utc::now())
    }

    /// Summarize the retained events as of `now`
    pub fn security_summary_at(&self, now: Timestamp) -> SecuritySummary {
        let cutoff = now - Duration::hours(24);
        let mut events_by_type: BTreeMap<String, usize> = BTreeMap::new();
        let mut recent_events = 0;

        for event in &self.events {
            *events_by_type.entry(event.event.clone()).or_default() += 1;
            if event.timestamp >= cutoff {
                recent_events += 1;
            }
        }

        SecuritySummary {
            total_events: self.events.len(),
            events_by_type,
            recent_events,
        }
    }

    /// Number of retained events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Maximum number of retained events
    pub fn capacity(&self) -> usize {
        self.max_events
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Drop the oldest events while the log exceeds its capacity
    fn enforce_capacity(&mut self) {
        while self.events.len() > self.max_events {
            self.events.pop_front();
        }
    }
}


// Property-based tests
#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::details;
    use quickcheck_macros::quickcheck;

    // Logging M + K distinct events leaves exactly the M most recent, in order.
    #[quickcheck]
    fn prop_monitor_enforces_capacity(capacity: u8, extra: u8) -> bool {
        let capacity = capacity as usize % 100 + 1;
        let total = capacity + extra as usize;
        let mut monitor = SecurityEventMonitor::new(capacity);
        let t0 = Utc::now();

        for i in 0..total {
            monitor.log_event_at(
                &format!("event-{}", i),
                details!(),
                t0 + Duration::milliseconds(i as i64),
            );
        }

        let events = monitor.get_events(&EventFilter::all());
        events.len() == capacity
            && events
                .iter()
                .enumerate()
                .all(|(i, e)| e.event == format!("event-{}", total - capacity + i))
    }
}
