//! CollectorDestination - durable delivery to the batch endpoint
//!
//! ```text
//! execute(event) ──► mpsc ──► UploadWorker ──spawn_blocking──► Storage::append
//!                               │
//!                  flush_at / timer / flush()
//!                               │
//!                               ├──► Storage::list_finalized
//!                               └──► upload task per file (≤ N concurrent)
//!                                       200 → remove, else keep + report
//! ```
//!
//! The worker is the only writer for its storage stream. Commands are
//! handled one at a time in send order, so events land in the batch file in
//! the order `execute` was called.

mod worker;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::analytics::AnalyticsHandle;
use crate::error::PluginError;
use crate::http::HttpClient;
use crate::storage::Storage;
use crate::timeline::{DestinationPlugin, Plugin, PluginType, Timeline, UpdateType};
use crate::types::{Event, Settings};

use worker::{Command, Shared, UploadWorker};

/// Flush and connection tuning for [`CollectorDestination`]
#[derive(Debug, Clone)]
pub struct CollectorOptions {
    pub api_host: String,
    pub flush_at: usize,
    pub flush_interval: Duration,
    pub max_concurrent_uploads: usize,
}

/// Overrides the destination accepts from remote settings
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteOverrides {
    api_host: Option<String>,
    flush_at: Option<usize>,
    /// Seconds
    flush_interval: Option<f64>,
}

/// Destination writing events to durable batch files and uploading them
pub struct CollectorDestination {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    timeline: Timeline,
}

impl CollectorDestination {
    /// Settings key under `integrations`
    pub const KEY: &'static str = "collector";

    /// Create the destination and start its worker on `runtime`
    pub fn new(
        storage: Arc<Storage>,
        client: Arc<HttpClient>,
        options: CollectorOptions,
        runtime: &Handle,
    ) -> Self {
        let shared = Arc::new(Shared::new(
            storage,
            client,
            options.api_host,
            options.flush_at,
            options.max_concurrent_uploads,
        ));

        let (commands, rx) = mpsc::unbounded_channel();
        let worker = UploadWorker::new(Arc::clone(&shared), options.flush_interval);
        runtime.spawn(worker.run(rx));

        Self {
            shared,
            commands,
            timeline: Timeline::new(),
        }
    }

    pub fn flush_at(&self) -> usize {
        self.shared.flush_at.load(Ordering::Relaxed)
    }

    /// Event count that triggers an upload pass; 0 disables count flushing
    pub fn set_flush_at(&self, count: usize) {
        self.shared.flush_at.store(count, Ordering::Relaxed);
    }

    pub fn set_flush_interval(&self, interval: Duration) {
        self.send(Command::SetFlushInterval(interval));
    }

    pub fn api_host(&self) -> String {
        self.shared.api_host.read().clone()
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.shared.storage
    }

    /// Flush and wait until all uploads of this pass have settled
    ///
    /// Events sent before the call are on disk and part of the pass.
    pub async fn flush_and_wait(&self) {
        let (done, wait) = oneshot::channel();
        if self.send(Command::Flush(Some(done))) {
            let _ = wait.await;
        }
    }

    fn send(&self, command: Command) -> bool {
        if self.commands.send(command).is_err() {
            tracing::warn!("collector worker has stopped");
            return false;
        }
        true
    }
}

impl Plugin for CollectorDestination {
    fn plugin_type(&self) -> PluginType {
        PluginType::Destination
    }

    fn key(&self) -> &str {
        Self::KEY
    }

    fn configure(&self, analytics: AnalyticsHandle) {
        *self.shared.analytics.write() = Some(analytics);
    }

    fn execute(&self, event: Event) -> Result<Option<Event>, PluginError> {
        if self.commands.send(Command::Append(event.clone())).is_err() {
            return Err(PluginError::new("collector worker has stopped"));
        }
        Ok(Some(event))
    }

    fn update(&self, settings: &Settings, _update_type: UpdateType) {
        let Some(overrides) = settings.integration_settings_as::<RemoteOverrides>(Self::KEY) else {
            return;
        };

        if let Some(host) = overrides.api_host.filter(|h| !h.is_empty()) {
            *self.shared.api_host.write() = host;
        }
        if let Some(count) = overrides.flush_at {
            self.set_flush_at(count);
        }
        if let Some(seconds) = overrides.flush_interval.filter(|s| *s > 0.0) {
            self.set_flush_interval(Duration::from_secs_f64(seconds));
        }
    }

    fn flush(&self) {
        self.send(Command::Flush(None));
    }

    fn as_destination(&self) -> Option<&dyn DestinationPlugin> {
        Some(self)
    }
}

impl DestinationPlugin for CollectorDestination {
    fn timeline(&self) -> &Timeline {
        &self.timeline
    }
}
