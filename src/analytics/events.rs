//! Public event API
//!
//! None of these return errors. Problems go to the error handler and the
//! call returns normally.

use serde_json::Value;

use crate::error::AnalyticsError;
use crate::state::{ResetAction, SetTraitsAction, SetUserIdAction, SetUserIdAndTraitsAction};
use crate::types::Event;
use crate::utils::hash_traits;

use super::Analytics;

impl Analytics {
    /// Record an action the user performed
    pub fn track(&self, name: &str, properties: Option<Value>) {
        self.track_with(name, properties, None);
    }

    /// [`track`](Self::track) with an external id map
    pub fn track_with(&self, name: &str, properties: Option<Value>, external_id: Option<Value>) {
        if name.is_empty() {
            self.report_internal_error(AnalyticsError::InvalidEvent("track name is empty".into()));
            return;
        }
        self.process_incoming(Event::track(name, properties, external_id));
    }

    /// Associate the current user with `user_id`
    ///
    /// With traits, the stored traits are replaced; without, they are kept.
    pub fn identify(&self, user_id: &str, traits: Option<Value>) {
        let user_id = user_id.to_string();
        match traits {
            Some(traits) => {
                let traits = self.prepare_traits(traits);
                self.store().dispatch(SetUserIdAndTraitsAction {
                    user_id: user_id.clone(),
                    traits: Some(traits.clone()),
                });
                self.process_incoming(Event::identify(Some(user_id), Some(traits)));
            }
            None => {
                self.store().dispatch(SetUserIdAction { user_id: user_id.clone() });
                self.process_incoming(Event::identify(Some(user_id), None));
            }
        }
    }

    /// Record traits without changing the user id
    pub fn identify_traits(&self, traits: Value) {
        let traits = self.prepare_traits(traits);
        self.store().dispatch(SetTraitsAction {
            traits: Some(traits.clone()),
        });
        self.process_incoming(Event::identify(None, Some(traits)));
    }

    /// Record that the user viewed a screen
    pub fn screen(&self, title: &str, category: Option<&str>, properties: Option<Value>) {
        self.process_incoming(Event::screen(title, category.map(str::to_string), properties));
    }

    /// Forget the current user: new anonymous id, user id and traits cleared
    ///
    /// Uploads already in progress are not interrupted.
    pub fn reset(&self) {
        self.store().dispatch(ResetAction);
        self.timeline().apply(|plugin| plugin.reset());
    }

    fn prepare_traits(&self, traits: Value) -> Value {
        if self.configuration().hash_traits {
            hash_traits(traits)
        } else {
            traits
        }
    }
}
