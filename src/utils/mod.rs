//! Utility functions and helpers
//!
//! Atomic file writes, timestamps and trait hashing.

pub mod atomic;
pub mod hashing;
pub mod time;

pub use atomic::{atomic_write, atomic_write_with, cleanup_temp_files};
pub use hashing::hash_traits;
pub use time::{iso8601_now, parse_iso8601};
