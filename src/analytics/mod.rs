//! Analytics - the owner object tying store, storage and timeline together
//!
//! ```text
//! track / identify / screen
//!        │ stamp identity, message id, timestamp
//!        ▼
//!   Timeline: StartupQueue → Context → … → CollectorDestination → EventLogger
//!        ▲                                         │
//!   Store (System, UserInfo) ◄── settings sync     └─► Storage ─► HttpClient
//! ```

mod events;
mod persist;
mod settings;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::config::Configuration;
use crate::error::{AnalyticsError, Result};
use crate::http::{HttpClient, ReqwestTransport, Transport};
use crate::plugins::{self, CollectorDestination, CollectorOptions, Context, EventLogger, LogKind, StartupQueue};
use crate::state::{SetReferrerAction, Store, System, ToggleEnabledAction, ToggleRunningAction, UserInfo};
use crate::storage::Storage;
use crate::timeline::{Plugin, Timeline};
use crate::types::{Event, Settings};

use persist::{StateWrite, StateWriter};

pub(crate) struct Inner {
    configuration: Configuration,
    store: Store,
    storage: Arc<Storage>,
    timeline: Timeline,
    http: Arc<HttpClient>,
    runtime: Handle,
    state_writer: StateWriter,
    /// Highest settings revision already pushed to plugins
    applied_settings_revision: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

/// Non-owning reference from a plugin back to its `Analytics`
#[derive(Clone)]
pub struct AnalyticsHandle(Weak<Inner>);

impl AnalyticsHandle {
    pub fn upgrade(&self) -> Option<Analytics> {
        self.0.upgrade().map(|inner| Analytics { inner })
    }

    /// Current settings, if the owner is still alive
    pub fn settings(&self) -> Option<Settings> {
        self.upgrade()?.settings()
    }

    pub fn report_internal_error(&self, error: AnalyticsError) {
        match self.upgrade() {
            Some(analytics) => analytics.report_internal_error(error),
            None => tracing::error!(error = %error, "internal error after shutdown"),
        }
    }
}

/// Event tracking client
///
/// Cheap to clone; all clones share one pipeline. Must be created inside a
/// tokio runtime, which runs uploads and the settings refresh.
#[derive(Clone)]
pub struct Analytics {
    inner: Arc<Inner>,
}

impl Analytics {
    pub fn new(configuration: Configuration) -> Result<Self> {
        configuration.validate()?;
        let runtime = Handle::try_current().map_err(|e| AnalyticsError::NoRuntime(e.to_string()))?;

        let storage = Arc::new(Storage::open(
            &configuration.storage_root,
            &configuration.write_key,
            configuration.max_file_size,
        )?);

        let transport: Arc<dyn Transport> = match &configuration.transport {
            Some(transport) => Arc::clone(transport),
            None => Arc::new(ReqwestTransport::new(
                configuration.request_timeout,
                configuration.max_concurrent_uploads,
            )?),
        };
        let http = Arc::new(HttpClient::new(
            transport,
            configuration.write_key.clone(),
            configuration.cdn_host.clone(),
            configuration.request_factory.clone(),
        ));

        let store = Store::new();
        let settings = storage
            .cached_settings()
            .unwrap_or_else(|| Settings::with_write_key(&configuration.write_key, &configuration.api_host));
        store.provide(System::default_state(Some(settings)));
        store.provide(UserInfo::default_state(&storage));

        let (state_writer, state_writes) = StateWriter::new();
        let analytics = Self {
            inner: Arc::new(Inner {
                configuration,
                store,
                storage,
                timeline: Timeline::new(),
                http,
                runtime,
                state_writer,
                applied_settings_revision: AtomicU64::new(0),
                tasks: Mutex::new(Vec::new()),
            }),
        };
        analytics.startup(state_writes);
        Ok(analytics)
    }

    fn startup(&self, state_writes: tokio::sync::mpsc::UnboundedReceiver<StateWrite>) {
        persist::spawn(
            &self.inner.runtime,
            Arc::clone(&self.inner.storage),
            self.handle(),
            state_writes,
        );
        self.persist_state_changes();
        self.inner.timeline.bind(self.handle());

        let configuration = &self.inner.configuration;
        self.add(Arc::new(StartupQueue::new()));
        self.add(Arc::new(Context::new()));
        self.add(Arc::new(EventLogger::new(configuration.debug_logging)));

        if configuration.auto_add_collector {
            let options = CollectorOptions {
                api_host: configuration.api_host.clone(),
                flush_at: configuration.flush_at,
                flush_interval: configuration.flush_interval,
                max_concurrent_uploads: configuration.max_concurrent_uploads,
            };
            self.add(Arc::new(CollectorDestination::new(
                Arc::clone(&self.inner.storage),
                Arc::clone(&self.inner.http),
                options,
                &self.inner.runtime,
            )));
        }

        if configuration.offline {
            self.store().dispatch(ToggleRunningAction { running: true });
        } else {
            self.start_settings_sync();
        }

        tracing::debug!(write_key = %configuration.write_key, "analytics started");
    }

    /// Keep identity and settings on disk, and push new settings to plugins
    ///
    /// Writes are queued for the background writer; the dispatching thread
    /// never touches the disk.
    fn persist_state_changes(&self) {
        let handle = self.handle();
        self.store().subscribe(move |user: &UserInfo| {
            if let Some(analytics) = handle.upgrade() {
                analytics.inner.state_writer.send(StateWrite::UserInfo(user.clone()));
            }
        });

        let handle = self.handle();
        self.store().subscribe(move |system: &System| {
            if let Some(analytics) = handle.upgrade() {
                analytics.system_changed(system);
            }
        });
    }

    fn system_changed(&self, system: &System) {
        let previous = self
            .inner
            .applied_settings_revision
            .fetch_max(system.settings_revision, Ordering::SeqCst);
        if system.settings_revision <= previous {
            return;
        }

        if let Some(settings) = &system.settings {
            self.inner.state_writer.send(StateWrite::Settings(settings.clone()));
            self.inner.timeline.update(settings);
        }
    }

    pub fn handle(&self) -> AnalyticsHandle {
        AnalyticsHandle(Arc::downgrade(&self.inner))
    }

    pub fn configuration(&self) -> &Configuration {
        &self.inner.configuration
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.inner.storage
    }

    pub fn timeline(&self) -> &Timeline {
        &self.inner.timeline
    }

    /// Library version
    pub fn version() -> &'static str {
        crate::VERSION
    }

    /// Stamp an incoming event and run it through the timeline
    fn process_incoming(&self, event: Event) {
        if !self.enabled() {
            return;
        }
        let Some(user_info) = self.store().current_state::<UserInfo>() else {
            return;
        };
        self.process(event.apply_raw_event_data(&user_info));
    }

    /// Run an already stamped event through the timeline
    pub fn process(&self, event: Event) -> Option<Event> {
        self.inner.timeline.process(event)
    }

    // Plugins

    /// Add a plugin; it is configured and receives current settings first
    pub fn add<P: Plugin>(&self, plugin: Arc<P>) -> Arc<P> {
        self.inner.timeline.add(Arc::clone(&plugin) as Arc<dyn Plugin>);
        plugin
    }

    pub fn remove(&self, key: &str) -> bool {
        self.inner.timeline.remove(key)
    }

    pub fn find<T: Plugin>(&self) -> Option<Arc<T>> {
        self.inner.timeline.find::<T>()
    }

    // State

    pub fn settings(&self) -> Option<Settings> {
        self.store().current_state::<System>()?.settings
    }

    /// Whether the pipeline is past startup and not refreshing settings
    pub fn is_running(&self) -> bool {
        self.store()
            .current_state::<System>()
            .map(|s| s.running)
            .unwrap_or(false)
    }

    pub fn enabled(&self) -> bool {
        self.store()
            .current_state::<System>()
            .map(|s| s.enabled)
            .unwrap_or(false)
    }

    /// Disabled instances drop every event at the door
    pub fn set_enabled(&self, enabled: bool) {
        self.store().dispatch(ToggleEnabledAction { enabled });
    }

    pub fn anonymous_id(&self) -> String {
        self.store()
            .current_state::<UserInfo>()
            .map(|u| u.anonymous_id)
            .unwrap_or_default()
    }

    pub fn user_id(&self) -> Option<String> {
        self.store().current_state::<UserInfo>()?.user_id
    }

    pub fn traits(&self) -> Option<Value> {
        self.store().current_state::<UserInfo>()?.traits
    }

    /// Traits decoded into a typed struct
    pub fn traits_as<T: DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_value(self.traits()?).ok()
    }

    /// Remember the URL the app was opened with; sent as `context.referrer`
    pub fn open_url(&self, url: impl Into<String>) {
        self.store().dispatch(SetReferrerAction { url: url.into() });
    }

    pub fn set_device_token(&self, token: impl Into<String>) {
        let token = token.into();
        match self.find::<Context>() {
            Some(context) => context.set_device_token(token),
            None => {
                let context = Context::new();
                context.set_device_token(token);
                self.add(Arc::new(context));
            }
        }
    }

    // Delivery

    /// Start an upload pass in every destination; returns immediately
    pub fn flush(&self) {
        self.inner.timeline.apply(|plugin| plugin.flush());
    }

    /// Flush and wait for the collector's uploads and pending state writes
    /// to settle
    pub async fn flush_and_wait(&self) {
        match self.find::<CollectorDestination>() {
            Some(collector) => collector.flush_and_wait().await,
            None => self.flush(),
        }
        self.inner.state_writer.sync().await;
    }

    pub fn flush_at(&self) -> Option<usize> {
        self.find::<CollectorDestination>().map(|c| c.flush_at())
    }

    pub fn set_flush_at(&self, count: usize) {
        if let Some(collector) = self.find::<CollectorDestination>() {
            collector.set_flush_at(count);
        }
    }

    pub fn set_flush_interval(&self, interval: Duration) {
        if let Some(collector) = self.find::<CollectorDestination>() {
            collector.set_flush_interval(interval);
        }
    }

    /// Finalized batch files waiting for upload
    pub fn pending_uploads(&self) -> Vec<PathBuf> {
        match self.inner.storage.pending_files(false) {
            Ok(files) => files.into_iter().map(|f| f.path).collect(),
            Err(e) => {
                self.report_internal_error(e);
                Vec::new()
            }
        }
    }

    /// Delete every batch waiting for upload
    pub fn purge_storage(&self) {
        for path in self.pending_uploads() {
            self.purge_storage_file(&path);
        }
    }

    pub fn purge_storage_file(&self, path: &Path) {
        if let Err(e) = self.inner.storage.remove(path) {
            self.report_internal_error(e);
        }
    }

    // Errors and logging

    /// Log an internal error and hand it to the configured error handler
    pub fn report_internal_error(&self, error: AnalyticsError) {
        tracing::error!(error = %error, "internal error");
        if let Some(handler) = &self.inner.configuration.error_handler {
            handler(&error);
        }
    }

    pub fn log(&self, message: &str, kind: LogKind) {
        plugins::logger::emit(message, kind);
    }
}
