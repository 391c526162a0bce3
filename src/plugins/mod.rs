//! Built-in plugins
//!
//! - `StartupQueue`: buffers events until settings are loaded
//! - `Context`: library info, referrer, device token
//! - `CollectorDestination`: durable batching and upload
//! - `EventLogger`: debug log of processed events

mod collector;
mod context;
pub(crate) mod logger;
mod startup_queue;

pub use collector::{CollectorDestination, CollectorOptions};
pub use context::Context;
pub use logger::{EventLogger, LogKind};
pub use startup_queue::{StartupQueue, MAX_QUEUE_SIZE};
