//! StartupQueue - holds events until the pipeline is running

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{ReentrantMutex, RwLock};

use crate::analytics::AnalyticsHandle;
use crate::error::PluginError;
use crate::state::System;
use crate::timeline::{Plugin, PluginType};
use crate::types::Event;

/// Maximum number of buffered events
pub const MAX_QUEUE_SIZE: usize = 1000;

struct QueueState {
    analytics: RwLock<Option<AnalyticsHandle>>,
    running: AtomicBool,
    queue: ReentrantMutex<RefCell<VecDeque<Event>>>,
    capacity: usize,
}

impl QueueState {
    fn running_changed(&self, running: bool) {
        let guard = self.queue.lock();
        if !running || guard.borrow().is_empty() {
            self.running.store(running, Ordering::SeqCst);
            return;
        }
        if self.running.load(Ordering::SeqCst) {
            return;
        }

        // stay closed until the buffer can be replayed, so later events
        // queue up behind it instead of overtaking it
        let analytics = self.analytics.read().clone().and_then(|h| h.upgrade());
        let Some(analytics) = analytics else {
            tracing::debug!(count = guard.borrow().len(), "startup queue not bound, holding events");
            return;
        };

        let replay: Vec<Event> = guard.borrow_mut().drain(..).collect();
        self.running.store(true, Ordering::SeqCst);
        tracing::debug!(count = replay.len(), "replaying buffered events");
        // still under the lock; replayed events re-enter `execute` on this
        // thread and pass straight through
        for event in replay {
            analytics.process(event);
        }
    }
}

/// `Before` plugin that buffers events while `System.running` is false
///
/// When running flips to true the buffer is replayed, in order, through the
/// timeline. Appends and the replay share one reentrant lock, so a
/// concurrent event waits for the replay instead of overtaking it.
pub struct StartupQueue {
    state: Arc<QueueState>,
}

impl StartupQueue {
    pub const KEY: &'static str = "StartupQueue";

    pub fn new() -> Self {
        Self::with_capacity(MAX_QUEUE_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(QueueState {
                analytics: RwLock::new(None),
                running: AtomicBool::new(false),
                queue: ReentrantMutex::new(RefCell::new(VecDeque::new())),
                capacity,
            }),
        }
    }

    /// Number of buffered events
    pub fn len(&self) -> usize {
        self.state.queue.lock().borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }
}

impl Default for StartupQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for StartupQueue {
    fn plugin_type(&self) -> PluginType {
        PluginType::Before
    }

    fn key(&self) -> &str {
        Self::KEY
    }

    fn configure(&self, analytics: AnalyticsHandle) {
        *self.state.analytics.write() = Some(analytics.clone());

        let Some(owner) = analytics.upgrade() else {
            return;
        };
        let state = Arc::clone(&self.state);
        owner
            .store()
            .subscribe(move |system: &System| state.running_changed(system.running));
    }

    fn execute(&self, event: Event) -> Result<Option<Event>, PluginError> {
        let guard = self.state.queue.lock();
        if self.state.running.load(Ordering::SeqCst) {
            return Ok(Some(event));
        }

        let mut queue = guard.borrow_mut();
        if queue.len() >= self.state.capacity {
            queue.pop_front();
            tracing::trace!("startup queue full, dropped oldest event");
        }
        queue.push_back(event);
        Ok(None)
    }
}
