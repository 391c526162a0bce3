//! SDK logging routed through `tracing`

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::PluginError;
use crate::timeline::{Plugin, PluginType, UpdateType};
use crate::types::{Event, Settings};

/// Severity of a message passed to [`Analytics::log`](crate::Analytics::log)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Error,
    Warning,
    Debug,
    None,
}

pub(crate) fn emit(message: &str, kind: LogKind) {
    match kind {
        LogKind::Error => tracing::error!(target: "journify", "{}", message),
        LogKind::Warning => tracing::warn!(target: "journify", "{}", message),
        LogKind::Debug => tracing::debug!(target: "journify", "{}", message),
        LogKind::None => tracing::info!(target: "journify", "{}", message),
    }
}

/// `After` plugin that logs every event that made it through the timeline
///
/// Toggled by `Configuration::debug_logging` and by
/// `middlewareSettings.logging.enabled` in remote settings.
pub struct EventLogger {
    enabled: AtomicBool,
}

impl EventLogger {
    pub const KEY: &'static str = "EventLogger";

    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

impl Plugin for EventLogger {
    fn plugin_type(&self) -> PluginType {
        PluginType::After
    }

    fn key(&self) -> &str {
        Self::KEY
    }

    fn update(&self, settings: &Settings, _update_type: UpdateType) {
        if let Some(enabled) = settings.logging_enabled() {
            self.set_enabled(enabled);
        }
    }

    fn execute(&self, event: Event) -> Result<Option<Event>, PluginError> {
        if self.is_enabled() {
            tracing::debug!(
                target: "journify",
                event_type = %event.event_type(),
                message_id = event.message_id.as_deref().unwrap_or_default(),
                user_id = event.user_id.as_deref().unwrap_or_default(),
                "event processed"
            );
        }
        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_toggle_logging() {
        let logger = EventLogger::new(false);
        let settings: Settings =
            serde_json::from_str(r#"{"middlewareSettings":{"logging":{"enabled":true}}}"#).unwrap();

        logger.update(&settings, UpdateType::Initial);
        assert!(logger.is_enabled());

        // documents without a logging section leave the flag alone
        logger.update(&Settings::default(), UpdateType::Refresh);
        assert!(logger.is_enabled());
    }

    #[test]
    fn test_never_filters() {
        let logger = EventLogger::new(true);
        assert!(logger.execute(Event::screen("Home", None, None)).unwrap().is_some());
    }
}
