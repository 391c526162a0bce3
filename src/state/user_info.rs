//! User slice: identity and traits

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::storage::{Storage, StorageKey};

use super::store::Action;

/// Who the current user is
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub anonymous_id: String,
    pub user_id: Option<String>,
    pub traits: Option<Value>,
    pub referrer: Option<String>,
}

impl UserInfo {
    /// Load identity from persisted storage, generating an anonymous id if
    /// none was stored
    pub fn default_state(storage: &Storage) -> Self {
        let anonymous_id = storage
            .read::<String>(StorageKey::AnonymousId)
            .unwrap_or_else(new_anonymous_id);

        Self {
            anonymous_id,
            user_id: storage.read(StorageKey::UserId),
            traits: storage.read(StorageKey::Traits),
            referrer: None,
        }
    }
}

fn new_anonymous_id() -> String {
    Uuid::new_v4().to_string().to_lowercase()
}

/// Logout: new anonymous id, everything else cleared
pub struct ResetAction;

impl Action for ResetAction {
    type State = UserInfo;

    fn reduce(&self, _state: UserInfo) -> UserInfo {
        UserInfo {
            anonymous_id: new_anonymous_id(),
            user_id: None,
            traits: None,
            referrer: None,
        }
    }
}

pub struct SetUserIdAction {
    pub user_id: String,
}

impl Action for SetUserIdAction {
    type State = UserInfo;

    fn reduce(&self, state: UserInfo) -> UserInfo {
        UserInfo {
            user_id: Some(self.user_id.clone()),
            ..state
        }
    }
}

pub struct SetTraitsAction {
    pub traits: Option<Value>,
}

impl Action for SetTraitsAction {
    type State = UserInfo;

    fn reduce(&self, state: UserInfo) -> UserInfo {
        UserInfo {
            traits: self.traits.clone(),
            ..state
        }
    }
}

pub struct SetUserIdAndTraitsAction {
    pub user_id: String,
    pub traits: Option<Value>,
}

impl Action for SetUserIdAndTraitsAction {
    type State = UserInfo;

    fn reduce(&self, state: UserInfo) -> UserInfo {
        UserInfo {
            user_id: Some(self.user_id.clone()),
            traits: self.traits.clone(),
            ..state
        }
    }
}

pub struct SetAnonymousIdAction {
    pub anonymous_id: String,
}

impl Action for SetAnonymousIdAction {
    type State = UserInfo;

    fn reduce(&self, state: UserInfo) -> UserInfo {
        UserInfo {
            anonymous_id: self.anonymous_id.clone(),
            ..state
        }
    }
}

pub struct SetReferrerAction {
    pub url: String,
}

impl Action for SetReferrerAction {
    type State = UserInfo;

    fn reduce(&self, state: UserInfo) -> UserInfo {
        UserInfo {
            referrer: Some(self.url.clone()),
            ..state
        }
    }
}
