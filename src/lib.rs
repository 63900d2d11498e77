/// Error types for configuration and event export
pub mod error;

/// Security event types shared across components
pub mod events;

/// Sliding-window rate limiter
pub mod limiter;

/// Security event monitor and escalation rules
pub mod monitor;

/// Request guard tying the limiter to the monitor
pub mod guard;

/// Event export to remote sinks
pub mod export;

/// Configuration management
pub mod config;

// Re-export commonly used types
pub use error::{ConfigError, ExportError};
pub use guard::{GuardDecision, RequestGuard, RequestInfo};
pub use limiter::RateLimiter;
pub use monitor::SecurityEventMonitor;

#[doc(hidden)]
pub mod __private {
    pub use serde_json::json;
}
