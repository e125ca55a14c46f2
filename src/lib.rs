// platecache - Two-tier remote image cache for the meal and workout tracker client
// Author: kelexine (https://github.com/kelexine)

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod fetch;
pub mod imaging;
pub mod metrics;
pub mod utils;
