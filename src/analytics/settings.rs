//! Settings synchronizer

use std::sync::Arc;
use std::time::Duration;

use crate::state::{ToggleRunningAction, UpdateSettingsAction};

use super::Analytics;

const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

impl Analytics {
    /// Fetch remote settings and push them to every plugin
    ///
    /// `running` is false while the request is outstanding so new events wait
    /// in the startup queue; it goes back to true whatever the outcome. A
    /// failed fetch keeps the last known settings.
    pub async fn check_settings(&self) {
        let store = self.store();
        if self.configuration().offline {
            store.dispatch(ToggleRunningAction { running: true });
            return;
        }

        store.dispatch(ToggleRunningAction { running: false });

        match self.inner.http.settings_for().await {
            Ok(settings) => {
                tracing::debug!("settings refreshed");
                store.dispatch(UpdateSettingsAction { settings });
            }
            Err(e) => self.report_internal_error(e),
        }

        store.dispatch(ToggleRunningAction { running: true });
    }

    /// Host app returned to the foreground
    pub fn on_foreground(&self) {
        let analytics = self.clone();
        self.inner.runtime.spawn(async move {
            analytics.check_settings().await;
        });
    }

    /// Check now, then every `settings_refresh_interval`
    pub(super) fn start_settings_sync(&self) {
        let period = self
            .configuration()
            .settings_refresh_interval
            .max(MIN_REFRESH_INTERVAL);
        let owner = Arc::downgrade(&self.inner);

        let task = self.inner.runtime.spawn(async move {
            let mut timer = tokio::time::interval(period);
            loop {
                timer.tick().await;
                let Some(inner) = owner.upgrade() else {
                    break;
                };
                Analytics { inner }.check_settings().await;
            }
        });
        self.inner.tasks.lock().push(task);
    }
}
