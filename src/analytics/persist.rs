//! Background persistence of identity and settings
//!
//! State subscribers run on whatever thread dispatched the change, so they
//! only enqueue. A single task drains the queue in order and does the file
//! I/O on the blocking pool.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::error::{AnalyticsError, Result};
use crate::state::UserInfo;
use crate::storage::Storage;
use crate::types::Settings;

use super::AnalyticsHandle;

pub(crate) enum StateWrite {
    UserInfo(UserInfo),
    Settings(Settings),
    /// Fires once every earlier write has landed
    Sync(oneshot::Sender<()>),
}

/// Sending half kept by `Analytics`
pub(crate) struct StateWriter {
    writes: mpsc::UnboundedSender<StateWrite>,
}

impl StateWriter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StateWrite>) {
        let (writes, queue) = mpsc::unbounded_channel();
        (Self { writes }, queue)
    }

    pub fn send(&self, write: StateWrite) {
        if self.writes.send(write).is_err() {
            tracing::warn!("state writer has stopped");
        }
    }

    /// Wait until everything queued so far is on disk
    pub async fn sync(&self) {
        let (done, wait) = oneshot::channel();
        if self.writes.send(StateWrite::Sync(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

/// Start the writer task; it stops when the last `StateWriter` is dropped,
/// after draining what was already queued
pub(crate) fn spawn(
    runtime: &Handle,
    storage: Arc<Storage>,
    analytics: AnalyticsHandle,
    mut queue: mpsc::UnboundedReceiver<StateWrite>,
) {
    runtime.spawn(async move {
        while let Some(write) = queue.recv().await {
            let storage = Arc::clone(&storage);
            let result = match write {
                StateWrite::UserInfo(user) => blocking(move || storage.persist_user_info(&user)).await,
                StateWrite::Settings(settings) => blocking(move || storage.persist_settings(&settings)).await,
                StateWrite::Sync(done) => {
                    let _ = done.send(());
                    Ok(())
                }
            };
            if let Err(e) = result {
                analytics.report_internal_error(e);
            }
        }
        tracing::trace!("state writer stopped");
    });
}

async fn blocking<F>(op: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| AnalyticsError::Storage(std::io::Error::other(e.to_string())))?
}
