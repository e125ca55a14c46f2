//! Utility functions and helpers for platecache.
//!
//! # Submodules
//!
//! - `logging`: Tracing and logging initialization.
//!
//! Author: kelexine (<https://github.com/kelexine>)

pub mod logging;
