//! Error handling and retry logic
//!
//! Every fallible operation in the crate returns [`HmrError`]. Errors are
//! grouped into an [`ErrorCategory`] so callers can decide between retrying,
//! ignoring a frame, or falling back to a full reload.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

/// Errors produced by the HMR server and client runtime.
#[derive(Debug, Error)]
pub enum HmrError {
    #[error("malformed protocol message: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("transport is closed")]
    TransportClosed,

    #[error("invalid module url `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to load module {id}: {reason}")]
    ModuleLoad { id: String, reason: String },

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("hot callback for {id} failed: {source}")]
    Callback {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid config: {0}")]
    Config(String),

    #[error("watcher error: {0}")]
    Watcher(#[from] notify::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HmrError>;

impl HmrError {
    pub fn invalid_url(url: impl Into<String>, source: url::ParseError) -> Self {
        HmrError::InvalidUrl {
            url: url.into(),
            source,
        }
    }

    pub fn module_load(id: impl Into<String>, reason: impl ToString) -> Self {
        HmrError::ModuleLoad {
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            HmrError::Protocol(_) => ErrorCategory::Protocol,
            HmrError::TransportClosed | HmrError::WebSocket(_) => ErrorCategory::Transport,
            HmrError::ModuleLoad { .. } | HmrError::Http(_) | HmrError::Callback { .. } => {
                ErrorCategory::UpdateApplication
            }
            HmrError::InvalidUrl { .. } | HmrError::Config(_) => ErrorCategory::Configuration,
            HmrError::Watcher(_) | HmrError::Io(_) => ErrorCategory::Io,
        }
    }
}

/// Categorized error types for better handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed or unknown frames (logged and ignored)
    Protocol,

    /// Socket closed or errored (retryable)
    Transport,

    /// A hot update could not be applied (recovered by a full reload)
    UpdateApplication,

    /// Bad urls or config values (not retryable)
    Configuration,

    /// File system and watcher failures
    Io,
}

impl ErrorCategory {
    /// Check if this error category is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Transport | ErrorCategory::Io)
    }
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,

    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }
}

/// Execute an async operation with retry logic.
///
/// Errors that are not retryable are returned immediately.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0;
    let mut delay = policy.initial_delay;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempts >= policy.max_attempts || !e.category().is_retryable() {
                    return Err(e);
                }

                warn!(
                    attempt = attempts,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "operation failed, retrying in {:?}",
                    delay
                );

                sleep(delay).await;

                // Exponential backoff
                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * policy.backoff_multiplier)
                        .min(policy.max_delay.as_secs_f64()),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_error_categorization() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(HmrError::from(err).category(), ErrorCategory::Protocol);

        assert_eq!(
            HmrError::TransportClosed.category(),
            ErrorCategory::Transport
        );
        assert_eq!(
            HmrError::module_load("/a.js", "404").category(),
            ErrorCategory::UpdateApplication
        );
        assert_eq!(
            HmrError::Config("bad port".into()).category(),
            ErrorCategory::Configuration
        );
    }

    #[test]
    fn test_retryable() {
        assert!(ErrorCategory::Transport.is_retryable());
        assert!(!ErrorCategory::Configuration.is_retryable());
        assert!(ErrorCategory::Io.is_retryable());
        assert!(!ErrorCategory::UpdateApplication.is_retryable());
    }

    #[test]
    fn test_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);

        assert_eq!(RetryPolicy::with_attempts(0).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_with_retry_recovers_transport_errors() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        };

        let value = with_retry(&policy, || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(HmrError::TransportClosed)
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_with_retry_stops_on_config_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&RetryPolicy::default(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(HmrError::Config("nope".into()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
