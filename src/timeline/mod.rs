//! Plugin timeline
//!
//! ```text
//! event → Before → Enrichment → ┬→ Destination A (Before → Enrichment → deliver → After)
//!                               ├→ Destination B (...)
//!                               └→ After (observers)
//! ```

mod plugin;
#[allow(clippy::module_inception)]
mod timeline;

pub use plugin::{AsAny, DestinationPlugin, Plugin, PluginType, UpdateType};
pub use timeline::Timeline;
