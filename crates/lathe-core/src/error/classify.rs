//! Message-based error classification.
//!
//! Providers surface failures as free-form strings more often than as typed
//! errors, so classification works on the rendered message. Permanent
//! markers are checked first: "403 forbidden: connection closed" must never
//! be retried.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::Display;

/// Retry class of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorClass {
    Transient,
    Permanent,
    Unknown,
}

const PERMANENT_MARKERS: &[&str] = &[
    "unauthorized",
    "forbidden",
    "not found",
    "invalid api key",
    "invalid_api_key",
    "authentication",
    "permission denied",
    "validation",
    "invalid request",
    "invalid_request",
    "bad request",
    "unprocessable",
    "context length exceeded",
    "context_length_exceeded",
    "insufficient quota",
    "insufficient_quota",
];

const TRANSIENT_MARKERS: &[&str] = &[
    "econnreset",
    "econnrefused",
    "econnaborted",
    "etimedout",
    "eai_again",
    "epipe",
    "socket hang up",
    "connection reset",
    "connection refused",
    "connection closed",
    "broken pipe",
    "network error",
    "timed out",
    "timeout",
    "rate limit",
    "rate_limit",
    "too many requests",
    "service unavailable",
    "gateway timeout",
    "bad gateway",
    "overloaded",
    "temporarily unavailable",
    "stream idle",
];

// Constant patterns; compiling them cannot fail at runtime.
static PERMANENT_STATUS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(400|401|403|404|422)\b").expect("permanent status regex must compile")
});
static TRANSIENT_STATUS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(429|502|503|504|529)\b").expect("transient status regex must compile")
});

/// Classify a failure message as transient, permanent or unknown.
pub fn classify(message: &str) -> ErrorClass {
    let lowered = message.to_ascii_lowercase();
    if PERMANENT_STATUS_RE.is_match(&lowered)
        || PERMANENT_MARKERS.iter().any(|m| lowered.contains(m))
    {
        return ErrorClass::Permanent;
    }
    if TRANSIENT_STATUS_RE.is_match(&lowered)
        || TRANSIENT_MARKERS.iter().any(|m| lowered.contains(m))
    {
        return ErrorClass::Transient;
    }
    ErrorClass::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_resets_are_transient() {
        assert_eq!(classify("ECONNRESET"), ErrorClass::Transient);
        assert_eq!(classify("socket hang up"), ErrorClass::Transient);
        assert_eq!(classify("request timed out"), ErrorClass::Transient);
    }

    #[test]
    fn gateway_and_rate_limit_codes_are_transient() {
        assert_eq!(classify("HTTP 429 Too Many Requests"), ErrorClass::Transient);
        assert_eq!(classify("status 503"), ErrorClass::Transient);
        assert_eq!(classify("upstream returned 504"), ErrorClass::Transient);
    }

    #[test]
    fn auth_and_validation_are_permanent() {
        assert_eq!(classify("403 forbidden"), ErrorClass::Permanent);
        assert_eq!(classify("401 Unauthorized"), ErrorClass::Permanent);
        assert_eq!(classify("model not found"), ErrorClass::Permanent);
        assert_eq!(classify("schema validation failed"), ErrorClass::Permanent);
    }

    #[test]
    fn permanent_markers_win_over_transient_ones() {
        assert_eq!(
            classify("403 forbidden: connection closed"),
            ErrorClass::Permanent
        );
    }

    #[test]
    fn status_codes_match_on_word_boundaries() {
        assert_eq!(classify("listening on port 14290"), ErrorClass::Unknown);
        assert_eq!(classify("request id 4035521"), ErrorClass::Unknown);
    }

    #[test]
    fn everything_else_is_unknown() {
        assert_eq!(classify("weird custom message"), ErrorClass::Unknown);
        assert_eq!(classify(""), ErrorClass::Unknown);
    }
}
