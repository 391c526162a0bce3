//! Context - library, referrer and device token enrichment

use parking_lot::RwLock;
use serde_json::{json, Map, Value};

use crate::analytics::AnalyticsHandle;
use crate::error::PluginError;
use crate::state::UserInfo;
use crate::timeline::{Plugin, PluginType};
use crate::types::Event;

/// `Before` plugin that fills in `event.context`
///
/// Keys already present on the incoming event win over the values set here.
/// Platform details (device model, os, screen, locale) belong to host
/// plugins and are not collected.
pub struct Context {
    analytics: RwLock<Option<AnalyticsHandle>>,
    static_context: Map<String, Value>,
    device_token: RwLock<Option<String>>,
}

impl Context {
    pub const KEY: &'static str = "Context";

    pub fn new() -> Self {
        let mut static_context = Map::new();
        static_context.insert(
            "library".to_string(),
            json!({ "name": crate::NAME, "version": crate::VERSION }),
        );

        Self {
            analytics: RwLock::new(None),
            static_context,
            device_token: RwLock::new(None),
        }
    }

    /// Push-notification token reported under `context.device.token`
    pub fn set_device_token(&self, token: impl Into<String>) {
        *self.device_token.write() = Some(token.into());
    }

    pub fn device_token(&self) -> Option<String> {
        self.device_token.read().clone()
    }

    fn referrer(&self) -> Option<String> {
        let analytics = self.analytics.read().clone()?.upgrade()?;
        analytics.store().current_state::<UserInfo>()?.referrer
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for Context {
    fn plugin_type(&self) -> PluginType {
        PluginType::Before
    }

    fn key(&self) -> &str {
        Self::KEY
    }

    fn configure(&self, analytics: AnalyticsHandle) {
        *self.analytics.write() = Some(analytics);
    }

    fn execute(&self, mut event: Event) -> Result<Option<Event>, PluginError> {
        let mut context = self.static_context.clone();

        if let Some(referrer) = self.referrer() {
            context.insert("referrer".to_string(), json!({ "url": referrer }));
        }
        if let Some(token) = self.device_token() {
            context.insert("device".to_string(), json!({ "token": token }));
        }

        for (key, value) in std::mem::take(&mut event.context) {
            context.insert(key, value);
        }
        event.context = context;

        Ok(Some(event))
    }
}
