//! Remote settings document
//!
//! The CDN serves destinations as a list under `syncs`:
//!
//! ```text
//! {"syncs": [{"destination_app": "collector",
//!             "settings": [{"key": "apiHost", "value": "t.example.io/v1"}],
//!             "event_mappings": [...]}]}
//! ```
//!
//! Before the document is stored it is normalized so `integrations` becomes
//! a direct map: `{"collector": {"apiHost": "t.example.io/v1", "event_mappings": [...]}}`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Settings for all destinations and middleware
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Per-destination settings keyed by destination name
    #[serde(rename = "syncs", default, skip_serializing_if = "Option::is_none")]
    pub integrations: Option<Value>,

    /// Tracking plan document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_function: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middleware_settings: Option<Value>,
}

impl Settings {
    /// Default document carrying only the collector destination's credentials
    ///
    /// Used when nothing is cached yet so the collector can start before
    /// the first fetch completes.
    pub fn with_write_key(write_key: &str, api_host: &str) -> Self {
        let mut collector = Map::new();
        collector.insert("apiKey".to_string(), Value::String(write_key.to_string()));
        collector.insert("apiHost".to_string(), Value::String(api_host.to_string()));

        let mut integrations = Map::new();
        integrations.insert(
            crate::plugins::CollectorDestination::KEY.to_string(),
            Value::Object(collector),
        );

        Self {
            integrations: Some(Value::Object(integrations)),
            ..Default::default()
        }
    }

    /// Parse a raw CDN response and normalize its integrations
    pub fn from_remote(body: &[u8]) -> Result<Self, serde_json::Error> {
        let mut settings: Settings = serde_json::from_slice(body)?;
        settings.integrations = settings.integrations.take().map(Self::normalize_integrations);
        Ok(settings)
    }

    /// Flatten the list-of-destinations form into a map keyed by destination
    ///
    /// Entries without a `destination_app` are skipped. A value that is
    /// already a map is returned unchanged.
    pub fn normalize_integrations(raw: Value) -> Value {
        let entries = match raw {
            Value::Array(entries) => entries,
            other => return other,
        };

        let mut integrations = Map::new();
        for entry in entries {
            let Some(name) = entry.get("destination_app").and_then(Value::as_str) else {
                continue;
            };

            let mut destination = Map::new();
            if let Some(pairs) = entry.get("settings").and_then(Value::as_array) {
                for pair in pairs {
                    if let Some(key) = pair.get("key").and_then(Value::as_str) {
                        let value = pair.get("value").cloned().unwrap_or(Value::Null);
                        destination.insert(key.to_string(), value);
                    }
                }
            }
            if let Some(mappings) = entry.get("event_mappings").filter(|m| m.is_array()) {
                destination.insert("event_mappings".to_string(), mappings.clone());
            }

            integrations.insert(name.to_string(), Value::Object(destination));
        }

        Value::Object(integrations)
    }

    /// Raw settings object for one destination
    pub fn integration_settings(&self, key: &str) -> Option<&Map<String, Value>> {
        self.integrations
            .as_ref()?
            .as_object()?
            .get(key)?
            .as_object()
    }

    /// Destination settings decoded into a typed struct
    pub fn integration_settings_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.integration_settings(key)?;
        serde_json::from_value(Value::Object(raw.clone())).ok()
    }

    pub fn has_integration_settings(&self, key: &str) -> bool {
        self.integration_settings(key).is_some()
    }

    /// `middlewareSettings.logging.enabled`, if the document says anything
    pub fn logging_enabled(&self) -> Option<bool> {
        self.middleware_settings
            .as_ref()?
            .get("logging")?
            .get("enabled")?
            .as_bool()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_list_of_pairs() {
        let raw = json!([
            {
                "destination_app": "collector",
                "settings": [
                    {"key": "apiHost", "value": "t.example.io/v1"},
                    {"key": "flushAt", "value": 5}
                ],
                "event_mappings": [{"from": "a", "to": "b"}]
            },
            {"settings": [{"key": "orphan", "value": true}]}
        ]);

        let normalized = Settings::normalize_integrations(raw);
        let collector = &normalized["collector"];

        assert_eq!(collector["apiHost"], "t.example.io/v1");
        assert_eq!(collector["flushAt"], 5);
        assert_eq!(collector["event_mappings"][0]["to"], "b");
        assert_eq!(normalized.as_object().unwrap().len(), 1);
    }

    #[test]
    fn test_from_remote_reads_syncs_key() {
        let body = br#"{"syncs":[{"destination_app":"amplitude","settings":[{"key":"apiKey","value":"k"}]}],"middlewareSettings":{"logging":{"enabled":true}}}"#;
        let settings = Settings::from_remote(body).unwrap();

        assert!(settings.has_integration_settings("amplitude"));
        assert_eq!(settings.integration_settings("amplitude").unwrap()["apiKey"], "k");
        assert_eq!(settings.logging_enabled(), Some(true));
    }

    #[test]
    fn test_typed_integration_settings() {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Collector {
            api_key: String,
        }

        let settings = Settings::with_write_key("wk", "t.example.io/v1");
        let typed: Collector = settings
            .integration_settings_as(crate::plugins::CollectorDestination::KEY)
            .unwrap();
        assert_eq!(typed.api_key, "wk");
        assert!(!settings.has_integration_settings("missing"));
    }

    #[test]
    fn test_malformed_document_is_an_error() {
        assert!(Settings::from_remote(b"<html>").is_err());
    }
}
