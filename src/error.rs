//! Error taxonomy for the SDK
//!
//! Nothing in here is ever returned from the public event API. Errors are
//! funneled into [`Analytics::report_internal_error`](crate::Analytics::report_internal_error),
//! which logs them and hands them to the host's error handler.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for SDK operations
pub type Result<T> = std::result::Result<T, AnalyticsError>;

/// Errors that can occur while emitting, storing or delivering events
#[derive(Debug, Error)]
pub enum AnalyticsError {
    // Serialization
    #[error("unable to serialize: {0}")]
    JsonUnableToSerialize(#[source] serde_json::Error),

    #[error("unable to deserialize: {0}")]
    JsonUnableToDeserialize(#[source] serde_json::Error),

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    // Storage
    #[error("storage I/O error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("unable to rename batch file {}", .0.display())]
    StorageUnableToRename(PathBuf),

    #[error("unable to open batch file {}", .0.display())]
    StorageUnableToOpen(PathBuf),

    #[error("{} is not a batch file of this queue", .0.display())]
    StorageNotABatch(PathBuf),

    // Network transport
    #[error("network request failed: {0}")]
    NetworkUnknown(String),

    #[error("network response carried no usable data")]
    NetworkInvalidData,

    // Protocol
    #[error("unexpected HTTP status {0}")]
    NetworkUnexpectedHttpCode(u16),

    #[error("rate limited by server (HTTP {0})")]
    NetworkServerLimited(u16),

    #[error("server rejected batch (HTTP {0})")]
    NetworkServerRejected(u16),

    // Configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),

    // Plugins
    #[error("plugin `{key}` failed: {source}")]
    Plugin {
        key: String,
        #[source]
        source: PluginError,
    },
}

impl AnalyticsError {
    /// Whether a failed upload that produced this error should be attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AnalyticsError::NetworkUnknown(_)
                | AnalyticsError::NetworkInvalidData
                | AnalyticsError::NetworkServerLimited(_)
                | AnalyticsError::NetworkServerRejected(_)
        )
    }
}

impl From<serde_json::Error> for AnalyticsError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            AnalyticsError::Storage(e.into())
        } else if e.is_data() || e.is_syntax() || e.is_eof() {
            AnalyticsError::JsonUnableToDeserialize(e)
        } else {
            AnalyticsError::JsonUnableToSerialize(e)
        }
    }
}

/// Error raised by a plugin while processing an event
///
/// Non-fatal errors are reported and the event continues through the stage
/// as it was before the failing plugin. Fatal errors abort the event.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PluginError {
    pub message: String,
    pub fatal: bool,
}

impl PluginError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(AnalyticsError::NetworkServerLimited(429).is_retryable());
        assert!(AnalyticsError::NetworkServerRejected(500).is_retryable());
        assert!(AnalyticsError::NetworkUnknown("timeout".into()).is_retryable());
        assert!(!AnalyticsError::NetworkUnexpectedHttpCode(301).is_retryable());
        assert!(!AnalyticsError::InvalidEvent("empty".into()).is_retryable());
    }

    #[test]
    fn test_json_error_conversion() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let converted: AnalyticsError = err.into();
        assert!(matches!(converted, AnalyticsError::JsonUnableToDeserialize(_)));
    }

    #[test]
    fn test_plugin_error_display() {
        let err = AnalyticsError::Plugin {
            key: "Ziggy".into(),
            source: PluginError::fatal("boom"),
        };
        assert_eq!(err.to_string(), "plugin `Ziggy` failed: boom");
    }
}
