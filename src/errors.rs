//! Typed error hierarchy for the taskwire backend.
//!
//! Three top-level enums cover the notification/reminder core:
//! - `AuthError` — credential failures at connection or request time
//! - `ScheduleError` — reminder job registration failures
//! - `SweepError` — failures inside one sweep invocation

use thiserror::Error;

/// Credential verification failures.
///
/// Every variant rejects the connection (or request) before any room join
/// occurs. The distinct reasons exist for logging only; callers never
/// branch on them.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication error: Token required")]
    MissingToken,

    #[error("Authentication error: Token expired")]
    ExpiredToken,

    #[error("Authentication error: Invalid token ({0})")]
    InvalidToken(String),

    #[error("Admin role required")]
    AdminRequired,
}

/// Reminder job registration failures.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Invalid cron schedule '{expr}': {source}")]
    InvalidExpression {
        expr: String,
        #[source]
        source: cron::error::Error,
    },
}

/// Failures inside one sweep invocation. Caught and logged at the top of
/// the pipeline; the next scheduled firing is unaffected.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Staleness scan failed: {0}")]
    Scan(#[source] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn auth_error_variants_are_distinct() {
        let missing = AuthError::MissingToken;
        let expired = AuthError::ExpiredToken;
        assert!(matches!(missing, AuthError::MissingToken));
        assert!(matches!(expired, AuthError::ExpiredToken));
        assert!(!matches!(missing, AuthError::ExpiredToken));
    }

    #[test]
    fn auth_error_invalid_carries_reason() {
        let err = AuthError::InvalidToken("InvalidSignature".to_string());
        assert!(err.to_string().contains("InvalidSignature"));
    }

    #[test]
    fn schedule_error_carries_expression() {
        let source = cron::Schedule::from_str("not a schedule").unwrap_err();
        let err = ScheduleError::InvalidExpression {
            expr: "not a schedule".to_string(),
            source,
        };
        assert!(err.to_string().contains("not a schedule"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&AuthError::MissingToken);
        let source = cron::Schedule::from_str("bogus").unwrap_err();
        assert_std_error(&ScheduleError::InvalidExpression {
            expr: "bogus".into(),
            source,
        });
        assert_std_error(&SweepError::Scan(anyhow::anyhow!("store unreachable")));
    }
}
