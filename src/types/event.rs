//! Event envelope and payloads
//!
//! Every event shares one envelope (identity, message id, timestamp, context,
//! metrics). The payload carries the kind-specific fields and the `type`
//! discriminator. Both are serialized flat, which is the wire format of the
//! batch endpoint.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::state::UserInfo;
use crate::utils::iso8601_now;

/// Kind of event, matches the `type` field on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Track,
    Identify,
    Screen,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Track => write!(f, "track"),
            EventType::Identify => write!(f, "identify"),
            EventType::Screen => write!(f, "screen"),
        }
    }
}

/// Payload for a track event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackEvent {
    /// Event name, never empty
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<Value>,
}

/// Payload for an identify event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentifyEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traits: Option<Value>,
}

/// Payload for a screen event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenEvent {
    /// Screen title
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
}

/// Kind-specific part of an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventPayload {
    Track(TrackEvent),
    Identify(IdentifyEvent),
    Screen(ScreenEvent),
}

/// An event flowing through the timeline
///
/// `message_id` and `timestamp` are assigned once, when the event enters
/// the pipeline, and are never rewritten afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default)]
    pub anonymous_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    /// ISO-8601 with fractional seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Opaque key/value tree filled in by enrichment plugins
    #[serde(default)]
    pub context: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Vec<Value>>,

    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    fn with_payload(payload: EventPayload) -> Self {
        Self {
            anonymous_id: String::new(),
            user_id: None,
            message_id: None,
            timestamp: None,
            context: Map::new(),
            metrics: None,
            payload,
        }
    }

    /// Create a track event
    pub fn track(name: impl Into<String>, properties: Option<Value>, external_id: Option<Value>) -> Self {
        Self::with_payload(EventPayload::Track(TrackEvent {
            event: name.into(),
            properties,
            external_id,
        }))
    }

    /// Create an identify event
    pub fn identify(user_id: Option<String>, traits: Option<Value>) -> Self {
        let mut event = Self::with_payload(EventPayload::Identify(IdentifyEvent { traits }));
        event.user_id = user_id;
        event
    }

    /// Create a screen event
    pub fn screen(title: impl Into<String>, category: Option<String>, properties: Option<Value>) -> Self {
        Self::with_payload(EventPayload::Screen(ScreenEvent {
            name: title.into(),
            category,
            properties,
        }))
    }

    /// Type discriminator of this event
    pub fn event_type(&self) -> EventType {
        match self.payload {
            EventPayload::Track(_) => EventType::Track,
            EventPayload::Identify(_) => EventType::Identify,
            EventPayload::Screen(_) => EventType::Screen,
        }
    }

    /// Stamp identity from the current user state plus a fresh message id
    /// and timestamp
    ///
    /// Called once when an event is emitted. Replayed events already carry
    /// their stamp and must not pass through here again.
    pub fn apply_raw_event_data(mut self, user_info: &UserInfo) -> Self {
        self.anonymous_id = user_info.anonymous_id.clone();
        self.user_id = user_info.user_id.clone();
        self.message_id = Some(Uuid::new_v4().to_string());
        self.timestamp = Some(iso8601_now());
        self
    }

    /// Append an entry to the metrics list
    pub fn add_metric(&mut self, name: impl Into<String>, value: f64) {
        let entry = serde_json::json!({ "name": name.into(), "value": value });
        self.metrics.get_or_insert_with(Vec::new).push(entry);
    }

    /// Track payload, if this is a track event
    pub fn as_track(&self) -> Option<&TrackEvent> {
        match &self.payload {
            EventPayload::Track(track) => Some(track),
            _ => None,
        }
    }

    /// Identify payload, if this is an identify event
    pub fn as_identify(&self) -> Option<&IdentifyEvent> {
        match &self.payload {
            EventPayload::Identify(identify) => Some(identify),
            _ => None,
        }
    }

    /// Screen payload, if this is a screen event
    pub fn as_screen(&self) -> Option<&ScreenEvent> {
        match &self.payload {
            EventPayload::Screen(screen) => Some(screen),
            _ => None,
        }
    }

    /// Serialize to the canonical single-line form stored in batch files
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from the canonical single-line form
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user() -> UserInfo {
        UserInfo {
            anonymous_id: "anon-1".to_string(),
            user_id: Some("brandon".to_string()),
            traits: None,
            referrer: None,
        }
    }

    #[test]
    fn test_track_wire_format() {
        let event = Event::track("Booya", Some(json!({"plan": "pro"})), None)
            .apply_raw_event_data(&user());

        let value: Value = serde_json::from_str(&event.to_json_line().unwrap()).unwrap();
        assert_eq!(value["type"], "track");
        assert_eq!(value["event"], "Booya");
        assert_eq!(value["anonymousId"], "anon-1");
        assert_eq!(value["userId"], "brandon");
        assert_eq!(value["properties"]["plan"], "pro");
        assert!(value.get("externalId").is_none());
        assert!(value["messageId"].is_string());
    }

    #[test]
    fn test_identify_and_screen_type_tags() {
        let identify = Event::identify(Some("u".into()), Some(json!({"email": "a@b.c"})));
        let screen = Event::screen("Home", Some("nav".into()), None);

        assert_eq!(identify.event_type(), EventType::Identify);
        assert_eq!(screen.event_type(), EventType::Screen);

        let screen_value: Value = serde_json::to_value(&screen).unwrap();
        assert_eq!(screen_value["type"], "screen");
        assert_eq!(screen_value["name"], "Home");
        assert_eq!(screen_value["category"], "nav");
    }

    #[test]
    fn test_parse_from_json_line() {
        let line = r#"{"type":"track","event":"Opened","anonymousId":"a","messageId":"m","timestamp":"2024-01-01T00:00:00.000Z","context":{"library":{"name":"x"}}}"#;
        let event = Event::from_json_line(line).unwrap();

        assert_eq!(event.as_track().unwrap().event, "Opened");
        assert_eq!(event.message_id.as_deref(), Some("m"));
        assert_eq!(event.context["library"]["name"], "x");
    }

    #[test]
    fn test_stamping_assigns_unique_message_ids() {
        let a = Event::track("a", None, None).apply_raw_event_data(&user());
        let b = Event::track("a", None, None).apply_raw_event_data(&user());

        assert_ne!(a.message_id, b.message_id);
        assert!(a.timestamp.is_some());
    }

    #[test]
    fn test_add_metric() {
        let mut event = Event::track("a", None, None);
        event.add_metric("latency", 12.5);

        let metrics = event.metrics.unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0]["name"], "latency");
    }
}
