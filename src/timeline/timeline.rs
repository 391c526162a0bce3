//! Timeline - ordered, staged plugin execution

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::analytics::AnalyticsHandle;
use crate::error::{AnalyticsError, PluginError};
use crate::types::{Event, Settings};

use super::plugin::{AsAny, DestinationPlugin, Plugin, PluginType, UpdateType};

/// One added plugin plus its lifecycle flags
struct Registration {
    plugin: Arc<dyn Plugin>,
    configured: AtomicBool,
    /// Visible to processing and settings updates
    ready: AtomicBool,
    /// Set once the plugin received its `Initial` update
    initialized: AtomicBool,
}

impl Registration {
    fn new(plugin: Arc<dyn Plugin>, ready: bool) -> Self {
        Self {
            plugin,
            configured: AtomicBool::new(false),
            ready: AtomicBool::new(ready),
            initialized: AtomicBool::new(false),
        }
    }

    fn next_update_type(&self) -> UpdateType {
        if self.initialized.swap(true, Ordering::SeqCst) {
            UpdateType::Refresh
        } else {
            UpdateType::Initial
        }
    }
}

/// Ordered plugins of one stage
#[derive(Default)]
struct Mediator {
    plugins: RwLock<Vec<Arc<Registration>>>,
}

impl Mediator {
    /// Copy of the current list; additions and removals apply to later events
    fn snapshot(&self) -> Vec<Arc<Registration>> {
        self.plugins
            .read()
            .iter()
            .filter(|r| r.ready.load(Ordering::SeqCst))
            .cloned()
            .collect()
    }
}

/// Result of running one plugin or a whole stage
enum Flow {
    Continue(Event),
    /// Filtered out by a plugin
    Dropped,
    /// A plugin failed fatally
    Aborted,
}

/// Staged plugin pipeline
///
/// Events run through `Before` and `Enrichment` in insertion order, stopping
/// as soon as a plugin drops them. Every `Destination` then receives its own
/// copy, and `After` plugins observe the result. The same type backs the
/// nested timeline of each destination plugin.
pub struct Timeline {
    analytics: RwLock<Option<AnalyticsHandle>>,
    stages: HashMap<PluginType, Mediator>,
}

impl Timeline {
    pub fn new() -> Self {
        let stages = PluginType::PROCESSING_ORDER
            .iter()
            .chain(std::iter::once(&PluginType::Utility))
            .map(|stage| (*stage, Mediator::default()))
            .collect();

        Self {
            analytics: RwLock::new(None),
            stages,
        }
    }

    fn mediator(&self, stage: PluginType) -> &Mediator {
        // every PluginType gets a mediator in `new`
        &self.stages[&stage]
    }

    fn registrations(&self) -> Vec<Arc<Registration>> {
        PluginType::PROCESSING_ORDER
            .iter()
            .chain(std::iter::once(&PluginType::Utility))
            .flat_map(|stage| self.mediator(*stage).snapshot())
            .collect()
    }

    /// Attach the owning analytics instance
    ///
    /// Plugins added before binding are configured now; later ones are
    /// configured as they are added.
    pub fn bind(&self, analytics: AnalyticsHandle) {
        *self.analytics.write() = Some(analytics.clone());
        for registration in self.registrations() {
            self.attach(&registration, &analytics);
        }
    }

    fn attach(&self, registration: &Registration, analytics: &AnalyticsHandle) {
        if registration.configured.swap(true, Ordering::SeqCst) {
            return;
        }

        registration.plugin.configure(analytics.clone());
        if let Some(destination) = registration.plugin.as_destination() {
            destination.timeline().bind(analytics.clone());
        }
        // visible to `update` before settings are read: a concurrent update
        // either reaches the plugin or already shows in `analytics.settings()`
        registration.ready.store(true, Ordering::SeqCst);
        if let Some(settings) = analytics.settings() {
            self.deliver_update(registration, &settings);
        }
    }

    /// Add a plugin to the end of its stage
    ///
    /// On a bound timeline the plugin takes its place right away but sees
    /// no events or settings until it has been configured.
    pub fn add(&self, plugin: Arc<dyn Plugin>) {
        let analytics = self.analytics.read().clone();
        let registration = Arc::new(Registration::new(plugin, analytics.is_none()));

        tracing::debug!(plugin = registration.plugin.key(), "plugin added");
        self.mediator(registration.plugin.plugin_type())
            .plugins
            .write()
            .push(Arc::clone(&registration));

        if let Some(analytics) = analytics {
            self.attach(&registration, &analytics);
        }
    }

    /// Remove every plugin with `key`; returns whether any was removed
    pub fn remove(&self, key: &str) -> bool {
        let mut removed = false;
        for mediator in self.stages.values() {
            let mut plugins = mediator.plugins.write();
            let before = plugins.len();
            plugins.retain(|r| r.plugin.key() != key);
            removed |= plugins.len() != before;
        }
        removed
    }

    /// First plugin of concrete type `T`
    pub fn find<T: Plugin>(&self) -> Option<Arc<T>> {
        self.registrations()
            .into_iter()
            .find_map(|r| AsAny::as_any_arc(Arc::clone(&r.plugin)).downcast::<T>().ok())
    }

    pub fn find_key(&self, key: &str) -> Option<Arc<dyn Plugin>> {
        self.registrations()
            .into_iter()
            .find(|r| r.plugin.key() == key)
            .map(|r| r.plugin.clone())
    }

    pub fn plugins(&self, stage: PluginType) -> Vec<Arc<dyn Plugin>> {
        self.mediator(stage)
            .snapshot()
            .into_iter()
            .map(|r| r.plugin.clone())
            .collect()
    }

    /// Run `f` for every plugin in every stage
    pub fn apply<F: FnMut(&Arc<dyn Plugin>)>(&self, mut f: F) {
        for registration in self.registrations() {
            f(&registration.plugin);
        }
    }

    /// Push settings to every plugin, including those nested in destinations
    ///
    /// Each plugin receives `Initial` the first time and `Refresh` afterwards.
    pub fn update(&self, settings: &Settings) {
        for registration in self.registrations() {
            self.deliver_update(&registration, settings);
            if let Some(destination) = registration.plugin.as_destination() {
                destination.timeline().update(settings);
            }
        }
    }

    fn deliver_update(&self, registration: &Registration, settings: &Settings) {
        let update_type = registration.next_update_type();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            registration.plugin.update(settings, update_type)
        }));
        if let Err(payload) = result {
            self.report(registration.plugin.key(), PluginError::new(panic_message(payload)));
        }
    }

    /// Run an event through all stages
    ///
    /// Returns the event as it left enrichment, or `None` if it was dropped
    /// or aborted before reaching the destinations.
    pub fn process(&self, event: Event) -> Option<Event> {
        let Flow::Continue(event) = self.run_stage(PluginType::Before, event) else {
            return None;
        };
        let Flow::Continue(event) = self.run_stage(PluginType::Enrichment, event) else {
            return None;
        };

        for registration in self.mediator(PluginType::Destination).snapshot() {
            let copy = event.clone();
            match registration.plugin.as_destination() {
                Some(destination) => self.run_destination(destination, &registration.plugin, copy),
                None => {
                    self.run_plugin(&registration.plugin, copy);
                }
            }
        }

        self.observe(PluginType::After, &event);
        Some(event)
    }

    /// Nested stages of one destination; filters and failures stay local
    fn run_destination(&self, destination: &dyn DestinationPlugin, plugin: &Arc<dyn Plugin>, event: Event) {
        let nested = destination.timeline();

        let Flow::Continue(event) = nested.run_stage(PluginType::Before, event) else {
            return;
        };
        let Flow::Continue(event) = nested.run_stage(PluginType::Enrichment, event) else {
            return;
        };
        let Flow::Continue(event) = self.run_plugin(plugin, event) else {
            return;
        };
        nested.observe(PluginType::After, &event);
    }

    fn run_stage(&self, stage: PluginType, mut event: Event) -> Flow {
        for registration in self.mediator(stage).snapshot() {
            match self.run_plugin(&registration.plugin, event) {
                Flow::Continue(next) => event = next,
                stopped => return stopped,
            }
        }
        Flow::Continue(event)
    }

    /// Each plugin gets its own copy; results are ignored
    fn observe(&self, stage: PluginType, event: &Event) {
        for registration in self.mediator(stage).snapshot() {
            self.run_plugin(&registration.plugin, event.clone());
        }
    }

    fn run_plugin(&self, plugin: &Arc<dyn Plugin>, event: Event) -> Flow {
        let before = event.clone();
        let result = panic::catch_unwind(AssertUnwindSafe(|| plugin.execute(event)));

        match result {
            Ok(Ok(Some(next))) => Flow::Continue(next),
            Ok(Ok(None)) => Flow::Dropped,
            Ok(Err(err)) => {
                let fatal = err.fatal;
                self.report(plugin.key(), err);
                if fatal {
                    Flow::Aborted
                } else {
                    Flow::Continue(before)
                }
            }
            Err(payload) => {
                self.report(plugin.key(), PluginError::new(panic_message(payload)));
                Flow::Continue(before)
            }
        }
    }

    fn report(&self, key: &str, source: PluginError) {
        let error = AnalyticsError::Plugin {
            key: key.to_string(),
            source,
        };
        let analytics = self.analytics.read().clone();
        match analytics {
            Some(analytics) => analytics.report_internal_error(error),
            None => tracing::error!(error = %error, "plugin error"),
        }
    }
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    struct Recorder {
        key: String,
        stage: PluginType,
        seen: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn new(key: &str, stage: PluginType) -> Arc<Self> {
            Arc::new(Self {
                key: key.to_string(),
                stage,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn names(&self) -> Vec<String> {
            self.seen.lock().clone()
        }
    }

    impl Plugin for Recorder {
        fn plugin_type(&self) -> PluginType {
            self.stage
        }

        fn key(&self) -> &str {
            &self.key
        }

        fn execute(&self, event: Event) -> Result<Option<Event>, PluginError> {
            if let Some(track) = event.as_track() {
                self.seen.lock().push(track.event.clone());
            }
            Ok(Some(event))
        }
    }

    /// Drops events whose name matches
    struct Filter(&'static str);

    impl Plugin for Filter {
        fn plugin_type(&self) -> PluginType {
            PluginType::Before
        }

        fn execute(&self, event: Event) -> Result<Option<Event>, PluginError> {
            match event.as_track() {
                Some(track) if track.event == self.0 => Ok(None),
                _ => Ok(Some(event)),
            }
        }
    }

    struct Failing {
        fatal: bool,
    }

    impl Plugin for Failing {
        fn plugin_type(&self) -> PluginType {
            PluginType::Enrichment
        }

        fn execute(&self, mut event: Event) -> Result<Option<Event>, PluginError> {
            event.context.insert("mangled".into(), json!(true));
            if self.fatal {
                Err(PluginError::fatal("broken"))
            } else {
                Err(PluginError::new("broken"))
            }
        }
    }

    struct Panicking;

    impl Plugin for Panicking {
        fn plugin_type(&self) -> PluginType {
            PluginType::Enrichment
        }

        fn execute(&self, _event: Event) -> Result<Option<Event>, PluginError> {
            panic!("boom");
        }
    }

    struct Stamp(&'static str);

    impl Plugin for Stamp {
        fn plugin_type(&self) -> PluginType {
            PluginType::Enrichment
        }

        fn execute(&self, mut event: Event) -> Result<Option<Event>, PluginError> {
            event.context.insert(self.0.into(), json!(true));
            Ok(Some(event))
        }
    }

    /// Destination that records what reaches delivery
    struct Sink {
        key: String,
        timeline: Timeline,
        delivered: Mutex<Vec<Event>>,
    }

    impl Sink {
        fn new(key: &str) -> Arc<Self> {
            Arc::new(Self {
                key: key.to_string(),
                timeline: Timeline::new(),
                delivered: Mutex::new(Vec::new()),
            })
        }
    }

    impl Plugin for Sink {
        fn plugin_type(&self) -> PluginType {
            PluginType::Destination
        }

        fn key(&self) -> &str {
            &self.key
        }

        fn execute(&self, event: Event) -> Result<Option<Event>, PluginError> {
            self.delivered.lock().push(event.clone());
            Ok(Some(event))
        }

        fn as_destination(&self) -> Option<&dyn DestinationPlugin> {
            Some(self)
        }
    }

    impl DestinationPlugin for Sink {
        fn timeline(&self) -> &Timeline {
            &self.timeline
        }
    }

    struct Updates {
        seen: Mutex<Vec<UpdateType>>,
    }

    impl Plugin for Updates {
        fn plugin_type(&self) -> PluginType {
            PluginType::Utility
        }

        fn update(&self, _settings: &Settings, update_type: UpdateType) {
            self.seen.lock().push(update_type);
        }
    }

    fn track(name: &str) -> Event {
        Event::track(name, None, None)
    }

    #[test]
    fn test_stages_run_in_order_of_insertion() {
        let timeline = Timeline::new();
        let first = Recorder::new("first", PluginType::Before);
        let second = Recorder::new("second", PluginType::Before);
        timeline.add(first.clone());
        timeline.add(second.clone());
        timeline.add(Arc::new(Filter("skip")));

        timeline.process(track("a"));
        timeline.process(track("skip"));
        timeline.process(track("b"));

        assert_eq!(first.names(), vec!["a", "skip", "b"]);
        assert_eq!(second.names(), vec!["a", "skip", "b"]);
    }

    #[test]
    fn test_filter_short_circuits_later_stages() {
        let timeline = Timeline::new();
        let sink = Sink::new("sink");
        let after = Recorder::new("after", PluginType::After);
        timeline.add(Arc::new(Filter("secret")));
        timeline.add(sink.clone());
        timeline.add(after.clone());

        assert!(timeline.process(track("secret")).is_none());
        assert!(timeline.process(track("public")).is_some());

        assert_eq!(sink.delivered.lock().len(), 1);
        assert_eq!(after.names(), vec!["public"]);
    }

    #[test]
    fn test_destinations_are_isolated() {
        let timeline = Timeline::new();
        let filtered = Sink::new("filtered");
        filtered.add(Arc::new(Filter("a")));
        filtered.add(Arc::new(Stamp("only-filtered")));
        let open = Sink::new("open");
        timeline.add(filtered.clone());
        timeline.add(open.clone());

        timeline.process(track("a"));
        timeline.process(track("b"));

        assert_eq!(filtered.delivered.lock().len(), 1);
        let open_events = open.delivered.lock();
        assert_eq!(open_events.len(), 2);
        assert!(open_events.iter().all(|e| !e.context.contains_key("only-filtered")));
    }

    #[test]
    fn test_non_fatal_error_continues_with_unmodified_event() {
        let timeline = Timeline::new();
        let sink = Sink::new("sink");
        timeline.add(Arc::new(Failing { fatal: false }));
        timeline.add(Arc::new(Stamp("stamped")));
        timeline.add(sink.clone());

        timeline.process(track("a"));

        let delivered = sink.delivered.lock();
        assert_eq!(delivered.len(), 1);
        assert!(!delivered[0].context.contains_key("mangled"));
        assert!(delivered[0].context.contains_key("stamped"));
    }

    #[test]
    fn test_fatal_error_aborts_event() {
        let timeline = Timeline::new();
        let sink = Sink::new("sink");
        timeline.add(Arc::new(Failing { fatal: true }));
        timeline.add(sink.clone());

        assert!(timeline.process(track("a")).is_none());
        assert!(sink.delivered.lock().is_empty());
    }

    #[test]
    fn test_panicking_plugin_is_contained() {
        let timeline = Timeline::new();
        let sink = Sink::new("sink");
        timeline.add(Arc::new(Panicking));
        timeline.add(sink.clone());

        assert!(timeline.process(track("a")).is_some());
        assert_eq!(sink.delivered.lock().len(), 1);
    }

    #[test]
    fn test_remove_and_find() {
        let timeline = Timeline::new();
        let sink = Sink::new("sink");
        timeline.add(sink.clone());
        timeline.add(Recorder::new("rec", PluginType::After));

        assert!(timeline.find::<Sink>().is_some());
        assert!(timeline.find_key("rec").is_some());

        assert!(timeline.remove("sink"));
        assert!(!timeline.remove("sink"));
        assert!(timeline.find::<Sink>().is_none());

        timeline.process(track("a"));
        assert!(sink.delivered.lock().is_empty());
    }

    #[test]
    fn test_update_types_per_plugin() {
        let timeline = Timeline::new();
        let early = Arc::new(Updates { seen: Mutex::new(Vec::new()) });
        timeline.add(early.clone());

        let settings = Settings::default();
        timeline.update(&settings);

        let late = Arc::new(Updates { seen: Mutex::new(Vec::new()) });
        timeline.add(late.clone());
        timeline.update(&settings);

        assert_eq!(*early.seen.lock(), vec![UpdateType::Initial, UpdateType::Refresh]);
        assert_eq!(*late.seen.lock(), vec![UpdateType::Initial]);
    }

    #[test]
    fn test_update_reaches_nested_plugins() {
        let timeline = Timeline::new();
        let sink = Sink::new("sink");
        let nested = Arc::new(Updates { seen: Mutex::new(Vec::new()) });
        sink.add(nested.clone());
        timeline.add(sink);

        timeline.update(&Settings::default());
        timeline.update(&Settings::default());

        assert_eq!(*nested.seen.lock(), vec![UpdateType::Initial, UpdateType::Refresh]);
    }
}
