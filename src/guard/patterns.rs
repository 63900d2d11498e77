//! Request inspection helpers
//!
//! Derives the client identifier from forwarding headers and screens requests for
//! patterns commonly seen in scanners and injection attempts.

use std::collections::HashMap;

/// Identifier used when no forwarding header is present
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Case-insensitive header lookup
pub fn header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

/// Derive the client identifier for rate limiting
///
/// Uses the first address in `X-Forwarded-For`, then `X-Real-IP`, and falls back
/// to [`UNKNOWN_CLIENT`].
pub fn client_identifier(headers: &HashMap<String, String>) -> String {
    if let Some(forwarded) = header(headers, "x-forwarded-for") {
        if let Some(first) = forwarded
            .split(',')
            .map(str::trim)
            .find(|entry| !entry.is_empty())
        {
            return first.to_string();
        }
    }

    header(headers, "x-real-ip")
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}

/// Heuristic screen for suspicious requests
///
/// Looks for known scanner user agents and for attack fragments in the request path.
/// Matching is case-insensitive.
#[derive(Debug, Clone)]
pub struct SuspiciousPatternDetector {
    /// Substrings of user agents belonging to scanning tools
    scanner_agents: Vec<String>,
    /// Substrings of paths that indicate traversal, injection or probing
    path_patterns: Vec<String>,
    /// Whether a request without a user agent is suspicious
    flag_missing_user_agent: bool,
}

impl SuspiciousPatternDetector {
    /// Create a detector with custom patterns
    ///
    /// Patterns are stored lowercased.
    pub fn new(
        scanner_agents: Vec<String>,
        path_patterns: Vec<String>,
        flag_missing_user_agent: bool,
    ) -> Self {
        Self {
            scanner_agents: scanner_agents.iter().map(|s| s.to_lowercase()).collect(),
            path_patterns: path_patterns.iter().map(|s| s.to_lowercase()).collect(),
            flag_missing_user_agent,
        }
    }

    /// Create a detector with common scanner and attack indicators
    pub fn with_defaults() -> Self {
        let agents = [
            "sqlmap", "nikto", "nmap", "masscan", "zgrab", "dirbuster", "gobuster", "acunetix",
            "nessus", "wpscan",
        ];
        let paths = [
            "../",
            "..%2f",
            "%2e%2e",
            "<script",
            "%3cscript",
            "javascript:",
            "union select",
            "union%20select",
            "' or '1'='1",
            "/etc/passwd",
            "/.env",
            "/.git",
            "/wp-admin",
            "/phpmyadmin",
        ];
        Self::new(
            agents.iter().map(|s| s.to_string()).collect(),
            paths.iter().map(|s| s.to_string()).collect(),
            true,
        )
    }

    /// Inspect a request
    ///
    /// # Returns
    ///
    /// The reason for the first pattern matched, or `None` if the request looks normal
    pub fn inspect(&self, path: &str, headers: &HashMap<String, String>) -> Option<String> {
        match header(headers, "user-agent") {
            None if self.flag_missing_user_agent => {
                return Some("missing user agent".to_string());
            }
            None => {}
            Some(agent) => {
                let agent = agent.to_lowercase();
                if let Some(scanner) = self.scanner_agents.iter().find(|s| agent.contains(*s)) {
                    return Some(format!("scanner user agent: {}", scanner));
                }
            }
        }

        let path = path.to_lowercase();
        self.path_patterns
            .iter()
            .find(|pattern| path.contains(pattern.as_str()))
            .map(|pattern| format!("path pattern: {}", pattern))
    }
}

impl Default for SuspiciousPatternDetector {
    fn default() -> Self {
        Self::with_defaults()
    }
}
