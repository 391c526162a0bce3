//! Serial worker owning storage appends and upload scheduling

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot, Notify, Semaphore};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::analytics::AnalyticsHandle;
use crate::error::{AnalyticsError, Result};
use crate::http::{HttpClient, UploadOutcome};
use crate::storage::Storage;
use crate::types::Event;

const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// Work items, processed strictly in the order they were sent
pub(crate) enum Command {
    Append(Event),
    /// Upload everything finalized; the sender fires once those uploads settle
    Flush(Option<oneshot::Sender<()>>),
    SetFlushInterval(Duration),
}

/// Batch files with an upload in progress
#[derive(Default)]
struct InFlight {
    paths: Mutex<HashSet<PathBuf>>,
    released: Notify,
}

impl InFlight {
    /// Returns false if the file is already being uploaded
    fn claim(&self, path: &Path) -> bool {
        self.paths.lock().insert(path.to_path_buf())
    }

    fn release(&self, path: &Path) {
        self.paths.lock().remove(path);
        self.released.notify_waiters();
    }

    async fn wait_for(&self, paths: &[PathBuf]) {
        loop {
            let released = self.released.notified();
            let pending = {
                let in_flight = self.paths.lock();
                paths.iter().any(|p| in_flight.contains(p))
            };
            if !pending {
                return;
            }
            released.await;
        }
    }
}

/// State shared between the destination, its worker and upload tasks
pub(crate) struct Shared {
    pub storage: Arc<Storage>,
    pub client: Arc<HttpClient>,
    pub analytics: RwLock<Option<AnalyticsHandle>>,
    pub api_host: RwLock<String>,
    pub flush_at: AtomicUsize,
    in_flight: InFlight,
    uploads: Semaphore,
}

impl Shared {
    pub fn new(
        storage: Arc<Storage>,
        client: Arc<HttpClient>,
        api_host: String,
        flush_at: usize,
        max_concurrent_uploads: usize,
    ) -> Self {
        Self {
            storage,
            client,
            analytics: RwLock::new(None),
            api_host: RwLock::new(api_host),
            flush_at: AtomicUsize::new(flush_at),
            in_flight: InFlight::default(),
            uploads: Semaphore::new(max_concurrent_uploads.max(1)),
        }
    }

    fn report(&self, error: AnalyticsError) {
        let analytics = self.analytics.read().clone();
        match analytics {
            Some(analytics) => analytics.report_internal_error(error),
            None => tracing::error!(error = %error, "collector error"),
        }
    }

    /// Run a storage operation on the blocking pool
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Storage) -> Result<T> + Send + 'static,
    {
        let storage = Arc::clone(&self.storage);
        tokio::task::spawn_blocking(move || op(&storage))
            .await
            .map_err(|e| AnalyticsError::Storage(std::io::Error::other(e.to_string())))?
    }

    async fn upload(self: Arc<Self>, path: PathBuf) {
        let permit = self.uploads.acquire().await;
        let api_host = self.api_host.read().clone();
        let outcome = self.client.upload_batch(&api_host, &path).await;
        drop(permit);

        match outcome {
            UploadOutcome::Success => {
                tracing::debug!(batch = %path.display(), "batch uploaded");
                let target = path.clone();
                if let Err(e) = self.blocking(move |storage| storage.remove(&target)).await {
                    self.report(e);
                }
            }
            UploadOutcome::Retryable(e) => {
                tracing::warn!(batch = %path.display(), error = %e, "batch upload failed, will retry");
                self.report(e);
            }
            UploadOutcome::Fatal(e) => {
                tracing::error!(batch = %path.display(), error = %e, "batch upload failed");
                self.report(e);
            }
        }

        self.in_flight.release(&path);
    }
}

fn flush_timer(period: Duration) -> Interval {
    let period = period.max(MIN_FLUSH_INTERVAL);
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

/// Appends events, counts them and starts upload passes
pub(crate) struct UploadWorker {
    shared: Arc<Shared>,
    flush_interval: Duration,
    since_flush: usize,
}

impl UploadWorker {
    pub fn new(shared: Arc<Shared>, flush_interval: Duration) -> Self {
        Self {
            shared,
            flush_interval,
            since_flush: 0,
        }
    }

    /// Process commands until every sender is gone
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        let mut timer = flush_timer(self.flush_interval);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.flush(None).await;
                }

                command = rx.recv() => {
                    match command {
                        Some(Command::Append(event)) => self.append(event).await,
                        Some(Command::Flush(done)) => self.flush(done).await,
                        Some(Command::SetFlushInterval(period)) => {
                            self.flush_interval = period;
                            timer = flush_timer(period);
                        }
                        // Destination dropped; what is on disk stays for the next run
                        None => break,
                    }
                }
            }
        }
    }

    async fn append(&mut self, event: Event) {
        match self.shared.blocking(move |storage| storage.append(&event)).await {
            Ok(()) => self.since_flush += 1,
            Err(e) => self.shared.report(e),
        }

        let flush_at = self.shared.flush_at.load(Ordering::Relaxed);
        if flush_at > 0 && self.since_flush >= flush_at {
            self.flush(None).await;
        }
    }

    async fn flush(&mut self, done: Option<oneshot::Sender<()>>) {
        self.since_flush = 0;

        let files = match self.shared.blocking(|storage| storage.list_finalized()).await {
            Ok(files) => files,
            Err(e) => {
                self.shared.report(e);
                Vec::new()
            }
        };
        let paths: Vec<PathBuf> = files.into_iter().map(|f| f.path).collect();

        for path in &paths {
            if !self.shared.in_flight.claim(path) {
                continue;
            }
            tokio::spawn(Arc::clone(&self.shared).upload(path.clone()));
        }

        if let Some(done) = done {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                shared.in_flight.wait_for(&paths).await;
                let _ = done.send(());
            });
        }
    }
}
