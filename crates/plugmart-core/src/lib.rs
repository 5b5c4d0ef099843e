//! Foundational low-level utilities shared across plugmart crates.
//!
//! Provides recursive filesystem helpers used by the installer's
//! backup/swap machinery and time utilities used for snapshot stamping and
//! catalog age display.

pub mod fs_ops;
pub mod time_utils;

pub use fs_ops::{copy_dir_recursive, move_dir, remove_dir_if_exists};
pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms, format_relative_secs};
