//! System slice: settings plus the running/enabled switches

use crate::types::Settings;

use super::store::Action;

/// Overall pipeline state
///
/// Starts with `running = false`; flips to true once initial settings are in
/// (or immediately when offline) and drops back to false while settings are
/// being refreshed, so new events are buffered instead of processed with
/// stale configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct System {
    pub settings: Option<Settings>,
    /// Bumped by every [`UpdateSettingsAction`]
    pub settings_revision: u64,
    pub running: bool,
    pub enabled: bool,
}

impl System {
    /// Initial state, seeded with whatever settings were cached last run
    pub fn default_state(cached: Option<Settings>) -> Self {
        Self {
            settings: cached,
            settings_revision: 0,
            running: false,
            enabled: true,
        }
    }
}

pub struct ToggleRunningAction {
    pub running: bool,
}

impl Action for ToggleRunningAction {
    type State = System;

    fn reduce(&self, state: System) -> System {
        System {
            running: self.running,
            ..state
        }
    }
}

pub struct ToggleEnabledAction {
    pub enabled: bool,
}

impl Action for ToggleEnabledAction {
    type State = System;

    fn reduce(&self, state: System) -> System {
        System {
            enabled: self.enabled,
            ..state
        }
    }
}

pub struct UpdateSettingsAction {
    pub settings: Settings,
}

impl Action for UpdateSettingsAction {
    type State = System;

    fn reduce(&self, state: System) -> System {
        System {
            settings: Some(self.settings.clone()),
            settings_revision: state.settings_revision + 1,
            ..state
        }
    }
}
