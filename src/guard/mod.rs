/// Request screening and admission control
pub mod patterns;
pub mod request_guard;

pub use patterns::{client_identifier, SuspiciousPatternDetector, UNKNOWN_CLIENT};
pub use request_guard::{GuardDecision, RequestGuard, RequestInfo, Verdict};
