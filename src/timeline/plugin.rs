//! Plugin contract

use std::any::Any;
use std::sync::Arc;

use crate::analytics::AnalyticsHandle;
use crate::error::PluginError;
use crate::types::{Event, Settings};

use super::Timeline;

/// Stage a plugin runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginType {
    /// Runs first; may filter or transform
    Before,
    /// Augments event data
    Enrichment,
    /// Delivers to a backend; each destination gets its own copy
    Destination,
    /// Observes events after delivery; cannot veto
    After,
    /// Never sees events, only configuration and settings
    Utility,
}

impl PluginType {
    /// Stages that receive events, in execution order
    pub const PROCESSING_ORDER: [PluginType; 4] = [
        PluginType::Before,
        PluginType::Enrichment,
        PluginType::Destination,
        PluginType::After,
    ];
}

/// Whether a settings update is the first one a plugin receives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateType {
    Initial,
    Refresh,
}

/// Upcast helper so `Timeline::find` can recover concrete plugin types
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A unit of work in the timeline
///
/// Plugins are shared (`Arc`) and called from any thread, so mutable state
/// lives behind interior mutability. The event handed to `execute` is owned
/// by the plugin for the duration of the call.
pub trait Plugin: AsAny {
    fn plugin_type(&self) -> PluginType;

    /// Identifier used by [`Timeline::remove`] and in error reports
    fn key(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Called once when the plugin is added. The handle is non-owning.
    fn configure(&self, _analytics: AnalyticsHandle) {}

    /// Transform the event, or return `Ok(None)` to drop it
    fn execute(&self, event: Event) -> Result<Option<Event>, PluginError> {
        Ok(Some(event))
    }

    fn update(&self, _settings: &Settings, _update_type: UpdateType) {}

    fn flush(&self) {}

    /// User logged out
    fn reset(&self) {}

    /// `Some` for destination plugins so the timeline can run their nested stages
    fn as_destination(&self) -> Option<&dyn DestinationPlugin> {
        None
    }
}

/// A plugin that delivers events to one backend
///
/// Owns a nested timeline with its own `Before`, `Enrichment` and `After`
/// stages. Its own `execute` is the delivery step, run between enrichment
/// and after.
pub trait DestinationPlugin: Plugin {
    fn timeline(&self) -> &Timeline;

    fn add(&self, plugin: Arc<dyn Plugin>) {
        self.timeline().add(plugin);
    }

    fn remove(&self, key: &str) -> bool {
        self.timeline().remove(key)
    }
}
