/// Security event log and escalation rules
pub mod rules;
pub mod security_monitor;

pub use rules::{default_rules, EscalationRule, FrequencyRule};
pub use security_monitor::SecurityEventMonitor;
