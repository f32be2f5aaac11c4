//! Result and error types for the wait engine.

use thiserror::Error;

/// Result type for engine operations
pub type WaitResult<T> = Result<T, WaitError>;

/// Errors reported by a remote session primitive.
///
/// These mirror the W3C WebDriver error codes the engine cares about; any
/// other remote failure is carried as [`RemoteError::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// No element matched the query
    #[error("no such element: {0}")]
    NoSuchElement(String),

    /// The referenced node was removed or replaced by the page
    #[error("stale element reference: {0}")]
    StaleElement(String),

    /// The window the session was driving is gone
    #[error("no such window: {0}")]
    NoSuchWindow(String),

    /// The session itself is no longer valid
    #[error("invalid session id: {0}")]
    InvalidSession(String),

    /// The element has no shadow root attached
    #[error("no such shadow root: {0}")]
    NoSuchShadowRoot(String),

    /// A script raised inside the page
    #[error("javascript error: {0}")]
    Javascript(String),

    /// The engine or driver does not implement the command
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Any other remote failure
    #[error("{0}")]
    Other(String),
}

impl RemoteError {
    /// Whether this error means the session can no longer be driven.
    ///
    /// Such errors abort any wait immediately instead of being polled away.
    #[must_use]
    pub const fn is_session_fatal(&self) -> bool {
        matches!(self, Self::NoSuchWindow(_) | Self::InvalidSession(_))
    }

    /// Whether the error reports a missing element
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NoSuchElement(_))
    }

    /// Whether the error reports a stale element reference
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        matches!(self, Self::StaleElement(_))
    }
}

/// Errors that can occur while resolving or waiting for elements
#[derive(Debug, Error)]
pub enum WaitError {
    /// A selector could not be translated between dialects
    #[error("Invalid or unsupported selector {selector:?}: {reason}")]
    Translation {
        /// The offending selector
        selector: String,
        /// Why translation failed
        reason: String,
    },

    /// A shadow selector chain is malformed
    #[error("Invalid shadow DOM selector {selector:?}: {reason}")]
    InvalidShadowSelector {
        /// The offending selector chain
        selector: String,
        /// Why the chain was rejected
        reason: String,
    },

    /// An element in a shadow chain never exposed a shadow root
    #[error("Element {{{chain}}} has no shadow root!")]
    NoShadowRoot {
        /// Accumulated selector chain up to the host element
        chain: String,
    },

    /// Shadow roots cannot be reached with this engine and driver combination
    #[error("Shadow DOM is not supported by this session: {message}")]
    ShadowUnsupported {
        /// Explanation including the detected versions
        message: String,
    },

    /// The session reported an unrecoverable failure
    #[error("Session failure: {0}")]
    Session(#[from] RemoteError),

    /// A wait ran out of its own timeout
    #[error("{diagnostic}")]
    TimedOut {
        /// Single-line diagnostic naming locator, page and reason
        diagnostic: String,
    },

    /// The test-wide deadline expired during a wait
    #[error("This test has exceeded the time limit of {limit}!")]
    Cancelled {
        /// Human readable test-wide limit, e.g. `"5 seconds"`
        limit: String,
    },

    /// A locator could not be constructed
    #[error("Invalid locator: {message}")]
    InvalidLocator {
        /// Error message
        message: String,
    },

    /// A retry policy could not be constructed
    #[error("Invalid retry policy: {message}")]
    InvalidPolicy {
        /// Error message
        message: String,
    },

    /// Engine configuration is invalid
    #[error("Invalid configuration: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl WaitError {
    /// Build a translation error for `selector`
    pub fn translation(selector: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Translation {
            selector: selector.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error is the test-wide cancellation
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Whether this error is a local timeout
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_fatal_classification() {
        assert!(RemoteError::NoSuchWindow("gone".into()).is_session_fatal());
        assert!(RemoteError::InvalidSession("x".into()).is_session_fatal());
        assert!(!RemoteError::StaleElement("x".into()).is_session_fatal());
        assert!(!RemoteError::NoSuchElement("x".into()).is_session_fatal());
        assert!(!RemoteError::Javascript("x".into()).is_session_fatal());
    }

    #[test]
    fn test_no_shadow_root_message() {
        let err = WaitError::NoShadowRoot {
            chain: "my-app::shadow my-panel".into(),
        };
        assert_eq!(
            err.to_string(),
            "Element {my-app::shadow my-panel} has no shadow root!"
        );
    }

    #[test]
    fn test_timed_out_renders_diagnostic_verbatim() {
        let err = WaitError::TimedOut {
            diagnostic: "Element css=\"#a\" on / was hidden after 1 second!".into(),
        };
        assert!(err.is_timeout());
        assert!(!err.is_cancelled());
        assert_eq!(err.to_string(), "Element css=\"#a\" on / was hidden after 1 second!");
    }

    #[test]
    fn test_cancelled_names_limit() {
        let err = WaitError::Cancelled {
            limit: "5 seconds".into(),
        };
        assert!(err.is_cancelled());
        assert!(err.to_string().contains("time limit of 5 seconds"));
    }

    #[test]
    fn test_remote_error_converts_to_session() {
        let err: WaitError = RemoteError::NoSuchWindow("closed".into()).into();
        assert!(matches!(err, WaitError::Session(RemoteError::NoSuchWindow(_))));
    }
}
