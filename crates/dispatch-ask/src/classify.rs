//! Error classification by substring match (§4.4, §9 "Design Notes").
//!
//! The table below is a closed set — ordering matters, Fatal patterns are
//! checked before Retryable ones, exactly as the design notes require.
//! Matching is case-insensitive against the error's `Display` output.

/// Classification bucket for a lower-layer failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Fatal,
    Retryable,
    NonCritical,
}

const FATAL_PATTERNS: &[&str] = &[
    "401",
    "403",
    "unauthorized",
    "forbidden",
    "invalid api key",
    "insufficient quota",
];

const RETRYABLE_PATTERNS: &[&str] = &[
    "500",
    "502",
    "503",
    "504",
    "bad gateway",
    "gateway timeout",
    "upstream connect error",
    "connection reset",
    "connection refused",
    "connection termination",
    "timeout",
    "temporary failure",
];

/// Classify an error message into {Fatal, Retryable, NonCritical}.
///
/// Anything not matching a Fatal or Retryable pattern (400, 404, 429,
/// "context cancelled", malformed-but-parseable conditions, …) is
/// NonCritical.
pub fn classify(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();

    if FATAL_PATTERNS.iter().any(|p| lower.contains(p)) {
        return ErrorKind::Fatal;
    }
    if RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p)) {
        return ErrorKind::Retryable;
    }
    ErrorKind::NonCritical
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_patterns() {
        assert_eq!(classify("401 Unauthorized"), ErrorKind::Fatal);
        assert_eq!(classify("403 Forbidden"), ErrorKind::Fatal);
        assert_eq!(classify("invalid API key supplied"), ErrorKind::Fatal);
        assert_eq!(classify("insufficient quota for this plan"), ErrorKind::Fatal);
    }

    #[test]
    fn retryable_patterns() {
        assert_eq!(classify("503 Service Unavailable"), ErrorKind::Retryable);
        assert_eq!(classify("502 Bad Gateway"), ErrorKind::Retryable);
        assert_eq!(classify("upstream connect error or disconnect"), ErrorKind::Retryable);
        assert_eq!(classify("connection reset by peer"), ErrorKind::Retryable);
        assert_eq!(classify("request timeout"), ErrorKind::Retryable);
    }

    #[test]
    fn non_critical_fallthrough() {
        assert_eq!(classify("400 Bad Request"), ErrorKind::NonCritical);
        assert_eq!(classify("404 Not Found"), ErrorKind::NonCritical);
        assert_eq!(classify("429 Too Many Requests"), ErrorKind::NonCritical);
        assert_eq!(classify("context cancelled"), ErrorKind::NonCritical);
    }

    #[test]
    fn fatal_checked_before_retryable() {
        // "403" would also not match any retryable pattern, but this
        // exercises that a message matching both tables (hypothetically)
        // resolves Fatal first.
        assert_eq!(classify("403 Forbidden after 503 retries upstream"), ErrorKind::Fatal);
    }
}
