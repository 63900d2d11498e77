//! Built-in escalation rules
//!
//! An escalation rule watches for one event name and, when that event recurs often
//! enough within a time window, produces the details of a derived event that the
//! monitor logs on its behalf.

use crate::events::{names, EventDetails, SecurityEvent, Severity, Timestamp};
use chrono::Duration;
use serde_json::Value;
use std::collections::VecDeque;

/// Trait for rules that synthesize escalation events from the retained event log
pub trait EscalationRule: Send + Sync {
    /// Event name that causes this rule to be evaluated
    fn trigger(&self) -> &str;

    /// Name of the derived event this rule logs
    fn escalation(&self) -> &str;

    /// Evaluate the rule against the retained events at `now`
    ///
    /// Returns the details for the derived event if the rule fires.
    fn evaluate(&self, events: &VecDeque<SecurityEvent>, now: Timestamp) -> Option<EventDetails>;

    /// Get a human-readable name for this rule
    fn name(&self) -> &str;

    /// Get the severity level if this rule fires
    fn severity(&self) -> Severity;
}

/// Rule that fires when an event occurs more than `threshold` times within `window`
///
/// The derived event carries the observed count under `count_field` and a
/// human-readable window description under `timeWindow`.
#[derive(Debug, Clone)]
pub struct FrequencyRule {
    name: String,
    trigger: String,
    escalation: String,
    /// Number of occurrences tolerated within the window
    pub threshold: usize,
    /// Time window to count occurrences within
    pub window: Duration,
    count_field: String,
    window_label: String,
    /// Severity level to assign when this rule fires
    pub severity: Severity,
}

impl FrequencyRule {
    /// Create a new frequency rule
    ///
    /// # Arguments
    ///
    /// * `name` - Rule name used in log output
    /// * `trigger` - Event name to count
    /// * `escalation` - Event name to log when the rule fires
    /// * `threshold` - Number of occurrences tolerated; one more fires the rule
    /// * `window` - Time window to count occurrences within
    /// * `count_field` - Detail key that receives the observed count
    /// * `window_label` - Value of the `timeWindow` detail
    /// * `severity` - Severity level to assign when this rule fires
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        trigger: impl Into<String>,
        escalation: impl Into<String>,
        threshold: usize,
        window: Duration,
        count_field: impl Into<String>,
        window_label: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            name: name.into(),
            trigger: trigger.into(),
            escalation: escalation.into(),
            threshold,
            window,
            count_field: count_field.into(),
            window_label: window_label.into(),
            severity,
        }
    }

    /// More than 5 failed logins within 15 minutes
    pub fn brute_force() -> Self {
        Self::new(
            "BruteForceRule",
            names::LOGIN_FAILED,
            names::POTENTIAL_BRUTE_FORCE,
            5,
            Duration::minutes(15),
            "failures",
            "15 minutes",
            Severity::Critical,
        )
    }

    /// More than 10 suspicious requests within 1 minute
    pub fn attack_burst() -> Self {
        Self::new(
            "AttackBurstRule",
            names::SUSPICIOUS_REQUEST,
            names::POTENTIAL_ATTACK,
            10,
            Duration::minutes(1),
            "suspiciousRequests",
            "1 minute",
            Severity::Critical,
        )
    }

    /// Number of trigger events within the window ending at `now`
    pub fn count_recent(&self, events: &VecDeque<SecurityEvent>, now: Timestamp) -> usize {
        events
            .iter()
            .filter(|event| event.event == self.trigger && now - event.timestamp < self.window)
            .count()
    }
}

impl EscalationRule for FrequencyRule {
    fn trigger(&self) -> &str {
        &self.trigger
    }

    fn escalation(&self) -> &str {
        &self.escalation
    }

    fn evaluate(&self, events: &VecDeque<SecurityEvent>, now: Timestamp) -> Option<EventDetails> {
        let count = self.count_recent(events, now);
        if count <= self.threshold {
            return None;
        }

        let mut details = EventDetails::new();
        details.insert(self.count_field.clone(), Value::from(count));
        details.insert(
            "timeWindow".to_string(),
            Value::from(self.window_label.clone()),
        );
        Some(details)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn severity(&self) -> Severity {
        self.severity
    }
}

/// The rule set every monitor starts with
pub fn default_rules() -> Vec<Box<dyn EscalationRule>> {
    vec![
        Box::new(FrequencyRule::brute_force()),
        Box::new(FrequencyRule::attack_burst()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::details;
    use chrono::Utc;

    fn events_at(name: &str, now: Timestamp, ages_seconds: &[i64]) -> VecDeque<SecurityEvent> {
        ages_seconds
            .iter()
            .map(|age| SecurityEvent::new(name, details!(), now - Duration::seconds(*age)))
            .collect()
    }

    #[test]
    fn test_brute_force_rule_no_trigger_at_threshold() {
        let rule = FrequencyRule::brute_force();
        let now = Utc::now();
        let events = events_at(names::LOGIN_FAILED, now, &[50, 40, 30, 20, 10]);

        assert!(rule.evaluate(&events, now).is_none());
    }

    #[test]
    fn test_brute_force_rule_trigger() {
        let rule = FrequencyRule::brute_force();
        let now = Utc::now();
        let events = events_at(names::LOGIN_FAILED, now, &[60, 50, 40, 30, 20, 10]);

        let details = rule.evaluate(&events, now).unwrap();
        assert_eq!(details["failures"], 6);
        assert_eq!(details["timeWindow"], "15 minutes");
    }

    #[test]
    fn test_brute_force_rule_time_window() {
        let rule = FrequencyRule::brute_force();
        let now = Utc::now();
        // Two failures are older than 15 minutes
        let events = events_at(names::LOGIN_FAILED, now, &[1000, 901, 60, 50, 40, 30, 20]);

        assert_eq!(rule.count_recent(&events, now), 5);
        assert!(rule.evaluate(&events, now).is_none());
    }

    #[test]
    fn test_rule_ignores_other_event_names() {
        let rule = FrequencyRule::brute_force();
        let now = Utc::now();
        let mut events = events_at(names::SUSPICIOUS_REQUEST, now, &[1, 2, 3, 4, 5, 6, 7]);
        events.extend(events_at(names::LOGIN_FAILED, now, &[1, 2]));

        assert_eq!(rule.count_recent(&events, now), 2);
        assert!(rule.evaluate(&events, now).is_none());
    }

    #[test]
    fn test_attack_burst_rule() {
        let rule = FrequencyRule::attack_burst();
        let now = Utc::now();

        let ten = events_at(names::SUSPICIOUS_REQUEST, now, &[9, 8, 7, 6, 5, 4, 3, 2, 1, 0]);
        assert!(rule.evaluate(&ten, now).is_none());

        let mut eleven = ten.clone();
        eleven.push_back(SecurityEvent::new(names::SUSPICIOUS_REQUEST, details!(), now));
        let details = rule.evaluate(&eleven, now).unwrap();
        assert_eq!(details["suspiciousRequests"], 11);
        assert_eq!(details["timeWindow"], "1 minute");
    }

    #[test]
    fn test_attack_burst_rule_time_window() {
        let rule = FrequencyRule::attack_burst();
        let now = Utc::now();
        // Exactly one minute old no longer counts
        let events = events_at(
            names::SUSPICIOUS_REQUEST,
            now,
            &[60, 59, 50, 40, 30, 20, 10, 5, 4, 3, 2],
        );

        assert_eq!(rule.count_recent(&events, now), 10);
        assert!(rule.evaluate(&events, now).is_none());
    }

    #[test]
    fn test_rule_names_and_severities() {
        let brute = FrequencyRule::brute_force();
        assert_eq!(brute.name(), "BruteForceRule");
        assert_eq!(brute.trigger(), names::LOGIN_FAILED);
        assert_eq!(brute.escalation(), names::POTENTIAL_BRUTE_FORCE);
        assert_eq!(brute.severity(), Severity::Critical);

        let burst = FrequencyRule::attack_burst();
        assert_eq!(burst.name(), "AttackBurstRule");
        assert_eq!(burst.trigger(), names::SUSPICIOUS_REQUEST);
        assert_eq!(burst.escalation(), names::POTENTIAL_ATTACK);
        assert_eq!(burst.threshold, 10);
        assert_eq!(burst.window, Duration::minutes(1));
    }

    #[test]
    fn test_custom_frequency_rule() {
        let rule = FrequencyRule::new(
            "RateLimitStormRule",
            names::RATE_LIMIT_EXCEEDED,
            "rate-limit-storm",
            2,
            Duration::seconds(30),
            "denials",
            "30 seconds",
            Severity::Warning,
        );
        let now = Utc::now();
        let events = events_at(names::RATE_LIMIT_EXCEEDED, now, &[3, 2, 1]);

        let details = rule.evaluate(&events, now).unwrap();
        assert_eq!(details["denials"], 3);
        assert_eq!(rule.severity(), Severity::Warning);
    }

    #[test]
    fn test_default_rules() {
        let rules = default_rules();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].trigger(), names::LOGIN_FAILED);
        assert_eq!(rules[1].trigger(), names::SUSPICIOUS_REQUEST);
    }
}
