//! # Redaction
//!
//! Masks values that look like credentials before they reach logs or stdout. Key names are kept
//! so operators can still tell which setting was involved.

use once_cell::sync::Lazy;
use regex::Regex;

const REPLACEMENT: &str = "[REDACTED]";

/// Redacts values that look like secrets in a string.
///
/// # Example
/// ```rust
/// use provisioner_util::redact_sensitive;
///
/// let redacted = redact_sensitive("CLIENT_SECRET=abc123 region=westus");
/// assert_eq!(redacted, "CLIENT_SECRET=[REDACTED] region=westus");
///
/// let redacted = redact_sensitive("Authorization: Basic Zm9vOmJhcg==");
/// assert_eq!(redacted, "Authorization: [REDACTED]");
/// ```
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for pattern in redact_patterns().iter() {
        redacted = pattern
            .replace_all(&redacted, |captures: &regex::Captures| {
                let prefix = captures.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{prefix}{REPLACEMENT}")
            })
            .to_string();
    }
    redacted
}

/// Ordered redaction patterns; group 1 is the preserved prefix.
fn redact_patterns() -> &'static Vec<Regex> {
    static PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
        [
            r"(?i)(authorization:\s*)(?:basic|bearer)?\s*[\w\-\.=:/+]+",
            r"(?i)([A-Z0-9_]*?(?:KEY|TOKEN|SECRET|PASSWORD)\s*[=:]\s*)[^\s,]+",
            r#"(?i)("(?:admin_password|password|client_secret)"\s*:\s*)"[^"]*""#,
        ]
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
    });
    &PATTERNS
}
