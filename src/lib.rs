//! Journify SDK
//!
//! Client-side event tracking: the application calls `track`, `identify`
//! and `screen`, and the SDK enriches, orders, durably queues and uploads
//! the events in batches without blocking the caller.
//!
//! # Modules
//!
//! - `analytics`: the `Analytics` client and its public API
//! - `timeline`: staged plugin pipeline and the plugin traits
//! - `plugins`: startup queue, context enrichment, collector destination, logger
//! - `state`: reactive store with the `System` and `UserInfo` slices
//! - `storage`: size-bounded batch files and persisted key/value state
//! - `http`: batch upload, settings fetch, transport seam
//! - `types`: events and the remote settings document
//! - `config`: `Configuration` builder
//! - `utils`: atomic writes, timestamps, trait hashing
//!
//! # Example
//!
//! ```no_run
//! use journify::{Analytics, Configuration};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> journify::Result<()> {
//!     let analytics = Analytics::new(Configuration::new("WRITE_KEY"))?;
//!
//!     analytics.identify("user-42", Some(json!({ "plan": "pro" })));
//!     analytics.track("Checkout Started", Some(json!({ "total": 42.5 })));
//!     analytics.screen("Cart", None, None);
//!
//!     analytics.flush_and_wait().await;
//!     Ok(())
//! }
//! ```

pub mod analytics;
pub mod config;
pub mod error;
pub mod http;
pub mod plugins;
pub mod state;
pub mod storage;
pub mod timeline;
pub mod types;
pub mod utils;

// Re-export commonly used items at crate root
pub use analytics::{Analytics, AnalyticsHandle};
pub use config::Configuration;
pub use error::{AnalyticsError, PluginError, Result};
pub use plugins::{CollectorDestination, Context, EventLogger, LogKind, StartupQueue};
pub use timeline::{DestinationPlugin, Plugin, PluginType, Timeline, UpdateType};
pub use types::{Event, EventPayload, EventType, Settings};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
