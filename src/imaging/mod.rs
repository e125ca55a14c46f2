//! Image format detection and decoding for the cache's fetch path.
//!
//! Fetched bytes are sniffed by their magic numbers, decoded with the `image`
//! crate and optionally scaled into a [`DownsampleTarget`] so each memory
//! entry has a bounded cost.
//!
//! # Submodules
//!
//! - `models`: Formats and downsample targets.
//! - `decode`: Decoding and downsampling, inline or on the blocking pool.
//!
//! Author: kelexine (<https://github.com/kelexine>)

pub mod decode;
pub mod models;

pub use decode::{decode, decode_blocking};
pub use models::{DownsampleTarget, ImageFormat};
