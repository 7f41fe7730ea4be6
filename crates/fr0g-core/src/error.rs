//! Platform error taxonomy.
//!
//! Every error in the pipeline falls into one of a small set of classes, each
//! with a fixed propagation policy: validation errors surface immediately and
//! are never retried, transient errors are retried with exponential backoff,
//! permanent errors are recorded and dropped, internal invariant violations
//! are logged without crashing the process, and fatal errors only occur at
//! startup.

use thiserror::Error;

/// Process exit codes used by the service binaries.
pub mod exit {
    /// Normal shutdown.
    pub const OK: i32 = 0;
    /// Configuration or validation error.
    pub const CONFIG: i32 = 1;
    /// Unrecoverable runtime error (port in use, required peer unreachable
    /// in strict mode).
    pub const RUNTIME: i32 = 2;
}

/// Errors produced by the platform runtime.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Bad request, bad command, or bad input data. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Bad configuration. Aborts startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection refused, timeout, 5xx, downstream queue full. Retried with
    /// backoff up to the configured limit, then becomes permanent.
    #[error("transient failure: {0}")]
    Transient(String),

    /// 4xx other than 429, unknown channel type, authentication failure.
    /// Recorded and not retried.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// A bounded queue rejected an enqueue within the allowed wait.
    #[error("queue full")]
    QueueFull,

    /// An RPC client has no live connection to its peer.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// Invariant violation. Logged at error; the operation fails generically
    /// and the process continues.
    #[error("internal error: {0}")]
    Internal(String),

    /// Unrecoverable startup failure.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl PlatformError {
    /// Whether the retry policy applies to this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlatformError::Transient(_) | PlatformError::QueueFull | PlatformError::NotConnected(_)
        )
    }

    /// Short machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            PlatformError::Validation(_) => "validation_error",
            PlatformError::Config(_) => "config_error",
            PlatformError::Transient(_) => "transient_error",
            PlatformError::Permanent(_) => "permanent_error",
            PlatformError::QueueFull => "queue_full",
            PlatformError::NotConnected(_) => "not_connected",
            PlatformError::Internal(_) => "internal_error",
            PlatformError::Fatal(_) => "fatal_error",
        }
    }

    /// HTTP status the error maps to on user-facing surfaces.
    pub fn http_status(&self) -> u16 {
        match self {
            PlatformError::Validation(_) | PlatformError::Config(_) => 400,
            PlatformError::QueueFull => 429,
            PlatformError::Transient(_) | PlatformError::NotConnected(_) => 503,
            PlatformError::Permanent(_) => 400,
            PlatformError::Internal(_) | PlatformError::Fatal(_) => 500,
        }
    }

    /// Collapse a retry-exhausted transient error into its permanent form.
    pub fn into_permanent(self) -> PlatformError {
        match self {
            PlatformError::Transient(msg) => {
                PlatformError::Permanent(format!("retries exhausted: {msg}"))
            }
            PlatformError::QueueFull => {
                PlatformError::Permanent("retries exhausted: queue full".to_string())
            }
            PlatformError::NotConnected(peer) => {
                PlatformError::Permanent(format!("retries exhausted: not connected: {peer}"))
            }
            other => other,
        }
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            return PlatformError::Transient(err.to_string());
        }
        match err.status() {
            Some(status) if status.is_server_error() || status.as_u16() == 429 => {
                PlatformError::Transient(err.to_string())
            }
            Some(_) => PlatformError::Permanent(err.to_string()),
            None => PlatformError::Transient(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(PlatformError::Transient("refused".into()).is_transient());
        assert!(PlatformError::QueueFull.is_transient());
        assert!(PlatformError::NotConnected("analyzer".into()).is_transient());
        assert!(!PlatformError::Validation("bad".into()).is_transient());
        assert!(!PlatformError::Permanent("401".into()).is_transient());
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(PlatformError::Validation("x".into()).http_status(), 400);
        assert_eq!(PlatformError::QueueFull.http_status(), 429);
        assert_eq!(PlatformError::Transient("x".into()).http_status(), 503);
        assert_eq!(PlatformError::Internal("x".into()).http_status(), 500);
    }

    #[test]
    fn test_into_permanent() {
        let err = PlatformError::Transient("timeout".into()).into_permanent();
        assert!(matches!(err, PlatformError::Permanent(_)));
        assert!(err.to_string().contains("retries exhausted"));

        let err = PlatformError::Validation("bad".into()).into_permanent();
        assert!(matches!(err, PlatformError::Validation(_)));
    }
}
