// Image cache module
// Author: kelexine (https://github.com/kelexine)

pub mod clock;
pub mod disk;
pub mod manager;
pub mod memory;
pub mod models;

pub use clock::{Clock, ManualClock, SystemClock};
pub use manager::{canonical_locator, CacheManager};
pub use models::{
    CacheConfig, CacheLimits, CacheStats, ImageHandle, Origin, PendingImage, Resolution,
    SweepReport,
};
pub use crate::imaging::DownsampleTarget;
