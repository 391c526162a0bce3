//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tempfile::TempDir;

use journify::http::{HttpRequest, HttpResponse, Method, Transport};
use journify::storage::BatchState;
use journify::{Analytics, Configuration, Event, Plugin, PluginError, PluginType, Settings, UpdateType};

pub const WRITE_KEY: &str = "test-key";

static TRACING: Once = Once::new();

/// Route SDK logs to the test output; filter with `RUST_LOG=journify=debug`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Scripted stand-in for the network
///
/// Batch uploads answer with the next scripted status, then 200 once the
/// script runs out. Settings requests answer with `settings` or a 404.
#[derive(Default)]
pub struct MockTransport {
    statuses: Mutex<VecDeque<u16>>,
    settings: Mutex<Option<Value>>,
    pub uploads: Mutex<Vec<(u16, HttpRequest)>>,
    pub settings_requests: Mutex<usize>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_settings(settings: Value) -> Arc<Self> {
        let transport = Self::default();
        *transport.settings.lock() = Some(settings);
        Arc::new(transport)
    }

    pub fn script(&self, statuses: &[u16]) {
        self.statuses.lock().extend(statuses.iter().copied());
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().len()
    }

    /// Events from every batch the server accepted
    pub fn delivered(&self) -> Vec<Value> {
        self.uploads
            .lock()
            .iter()
            .filter(|(status, _)| *status < 300)
            .flat_map(|(_, request)| batch_events(request.body.as_deref().unwrap_or_default()))
            .collect()
    }

    pub fn last_upload(&self) -> Option<HttpRequest> {
        self.uploads.lock().last().map(|(_, request)| request.clone())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> journify::Result<HttpResponse> {
        if request.method == Method::GET {
            *self.settings_requests.lock() += 1;
            return Ok(match self.settings.lock().clone() {
                Some(settings) => HttpResponse {
                    status: 200,
                    body: serde_json::to_vec(&settings).unwrap_or_default(),
                },
                None => HttpResponse {
                    status: 404,
                    body: Vec::new(),
                },
            });
        }

        let status = self.statuses.lock().pop_front().unwrap_or(200);
        self.uploads.lock().push((status, request));
        Ok(HttpResponse {
            status,
            body: Vec::new(),
        })
    }
}

/// `After` plugin keeping everything it observes
#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<Event>>,
    pub updates: Mutex<Vec<UpdateType>>,
}

impl Recorder {
    pub fn track_names(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| e.as_track().map(|t| t.event.clone()))
            .collect()
    }

    pub fn last(&self) -> Option<Event> {
        self.events.lock().last().cloned()
    }
}

impl Plugin for Recorder {
    fn plugin_type(&self) -> PluginType {
        PluginType::After
    }

    fn key(&self) -> &str {
        "Recorder"
    }

    fn execute(&self, event: Event) -> Result<Option<Event>, PluginError> {
        self.events.lock().push(event.clone());
        Ok(Some(event))
    }

    fn update(&self, _settings: &Settings, update_type: UpdateType) {
        self.updates.lock().push(update_type);
    }
}

/// Error handler sink; stores the `Debug` form of each reported error
#[derive(Clone, Default)]
pub struct Errors(Arc<Mutex<Vec<String>>>);

impl Errors {
    pub fn all(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.0.lock().iter().any(|e| e.contains(needle))
    }
}

/// Offline configuration rooted in a fresh temp dir
///
/// Automatic flushing is off so tests decide when uploads happen.
pub fn offline_config(root: &TempDir, transport: Arc<MockTransport>, errors: &Errors) -> Configuration {
    base_config(root, transport, errors).with_offline(true)
}

pub fn base_config(root: &TempDir, transport: Arc<MockTransport>, errors: &Errors) -> Configuration {
    init_tracing();
    let sink = errors.clone();
    Configuration::new(WRITE_KEY)
        .with_storage_root(root.path())
        .with_flush_at(0)
        .with_flush_interval(Duration::from_secs(3600))
        .with_transport(transport)
        .with_error_handler(move |e| sink.0.lock().push(format!("{:?}", e)))
}

/// Events of every batch file still on disk, oldest file first
pub fn stored_events(analytics: &Analytics) -> Vec<Value> {
    let mut files: Vec<_> = analytics
        .storage()
        .pending_files(false)
        .unwrap()
        .into_iter()
        .filter(|f| f.state == BatchState::Finalized)
        .collect();
    files.sort_by_key(|f| f.index);

    files
        .iter()
        .flat_map(|f| batch_events(&std::fs::read(&f.path).unwrap()))
        .collect()
}

pub fn batch_events(body: &[u8]) -> Vec<Value> {
    let document: Value = serde_json::from_slice(body).unwrap();
    document["batch"].as_array().cloned().unwrap_or_default()
}

pub fn event_names(events: &[Value]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| e["event"].as_str().map(str::to_string))
        .collect()
}

/// Poll until `condition` holds, panicking after two seconds
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
