//! Data types shared across the SDK
//!
//! Events as they travel through the timeline and the remote settings document.

mod event;
mod settings;

pub use event::{Event, EventPayload, EventType, IdentifyEvent, ScreenEvent, TrackEvent};
pub use settings::Settings;
