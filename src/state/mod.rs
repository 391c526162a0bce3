//! State store and the slices the SDK keeps in it
//!
//! - `Store`: generic keyed container with actions, reducers and subscribers
//! - `System`: settings, running and enabled flags
//! - `UserInfo`: anonymous id, user id, traits, referrer

mod store;
mod system;
mod user_info;

pub use store::{Action, State, Store, SubscriptionId};
pub use system::{System, ToggleEnabledAction, ToggleRunningAction, UpdateSettingsAction};
pub use user_info::{
    ResetAction, SetAnonymousIdAction, SetReferrerAction, SetTraitsAction,
    SetUserIdAction, SetUserIdAndTraitsAction, UserInfo,
};
