//! Prioritized thumbnail loading and caching for media galleries
//!
//! This crate maintains a content-addressed on-disk cache of
//! reduced-resolution previews for local media files (images, video, PDF)
//! and serves them to a display client that requests previews in volume
//! while scrolling.
//!
//! # Features
//!
//! - **Canonical size ladder**: requests resolve to a small fixed set of
//!   stored edge lengths so nearby sizes share one disk entry
//! - **Content-addressed store**: stable SHA-1 derived keys, sharded
//!   directories, mtime-based freshness against the source file
//! - **Prioritized background loading**: one worker, six queues (disk
//!   lookup vs. generation × high/normal/low), cache hits first
//! - **Deduplication**: concurrent requests for the same key share one
//!   in-flight request with multiple subscribers
//! - **Bounded retention**: completed results are kept under a pixel-cost
//!   budget with least-recently-renewed eviction
//! - **Format dispatch**: in-process image decoding with EXIF
//!   reorientation; video and PDF handed to external generator binaries

pub mod cache;
pub mod error;
pub mod generate;
pub mod key;
pub mod loader;
pub mod reader;
pub mod size;
pub mod store;

pub use cache::{local_path, ThumbnailCache};
pub use error::ThumbnailError;
pub use generate::ThumbnailData;
pub use key::cache_key;
pub use loader::{
    Delivery, FillMode, ItemId, LoaderStats, Priority, Status, ThumbnailLoader,
};
pub use reader::{ImageFileReader, Orientation, ThumbnailReader};
pub use size::SizeLadder;
pub use store::DiskStore;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Environment variable overriding the default retained-pixel budget.
pub const CACHE_SIZE_ENV: &str = "NEMO_THUMBNAILER_CACHE_SIZE";

/// Default retained-pixel budget, in pixel units.
pub const DEFAULT_MAX_COST: u64 = 1360 * 768 * 3;

/// Configuration for a [`ThumbnailCache`] / [`ThumbnailLoader`] pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Root of the on-disk thumbnail store.
    pub cache_root: PathBuf,
    /// Shorter edge of the display, the second-largest ladder rung.
    pub screen_short: u32,
    /// Longer edge of the display, the largest ladder rung.
    pub screen_long: u32,
    /// Pixel-cost budget for retained completed requests.
    pub max_cost: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            screen_short: 540,
            screen_long: 960,
            max_cost: default_max_cost(),
        }
    }
}

/// `<user cache dir>/org.nemomobile/thumbnails`, the stable location
/// shared with external tools.
pub fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("org.nemomobile")
        .join("thumbnails")
}

/// The retained-pixel budget: [`CACHE_SIZE_ENV`] when set and parseable,
/// [`DEFAULT_MAX_COST`] otherwise.
pub fn default_max_cost() -> u64 {
    std::env::var(CACHE_SIZE_ENV)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(DEFAULT_MAX_COST)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_usable() {
        let config = LoaderConfig::default();
        assert!(config.screen_short <= config.screen_long);
        assert!(config.max_cost > 0);
        assert!(config
            .cache_root
            .to_string_lossy()
            .contains("org.nemomobile"));
    }

    #[test]
    fn cache_size_env_overrides_budget() {
        std::env::set_var(CACHE_SIZE_ENV, "12345");
        assert_eq!(default_max_cost(), 12345);
        std::env::set_var(CACHE_SIZE_ENV, "not a number");
        assert_eq!(default_max_cost(), DEFAULT_MAX_COST);
        std::env::remove_var(CACHE_SIZE_ENV);
        assert_eq!(default_max_cost(), DEFAULT_MAX_COST);
    }
}
