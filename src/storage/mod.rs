//! Durable storage
//!
//! Append-only batch files plus a small key/value document, scoped per
//! write key:
//!
//! ```text
//! {storage_root}/{write_key}/
//! ├── state.json          # userId, traits, anonymousId, settings, events.index
//! ├── 3-events            # open batch, being appended to
//! ├── 2-events.batch      # finalized, waiting for upload
//! └── 1-events.batch
//! ```
//!
//! All transitions between the file states live in [`Storage`].

mod batch;
mod engine;
mod kv;

pub use batch::{BatchFile, BatchState, BATCH_FOOTER, BATCH_HEADER};
pub use engine::{Storage, DEFAULT_MAX_FILE_SIZE};
pub use kv::StorageKey;
