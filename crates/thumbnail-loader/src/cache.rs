//! Content-addressed thumbnail cache facade
//!
//! [`ThumbnailCache`] ties size selection, key derivation, the disk store
//! and the generators into the two operations the loader's worker runs:
//! serve an existing entry, or produce a new one. It is synchronous and
//! thread-safe by virtue of owning no mutable state.

use std::path::Path;

use crate::error::{Result, ThumbnailError};
use crate::generate::{
    generate_image_thumbnail, generate_pdf_thumbnail, generate_video_thumbnail, ThumbnailData,
};
use crate::key::cache_key;
use crate::size::SizeLadder;
use crate::store::DiskStore;
use crate::LoaderConfig;

/// Resolve a source URI to a local filesystem path.
///
/// `file://` URLs are stripped to their path; bare paths pass through;
/// anything with another scheme is treated as empty — only local files are
/// supported.
pub fn local_path(uri: &str) -> Option<String> {
    if uri.is_empty() {
        return None;
    }
    if let Some(stripped) = uri.strip_prefix("file://") {
        return (!stripped.is_empty()).then(|| stripped.to_string());
    }
    if uri.contains("://") {
        return None;
    }
    Some(uri.to_string())
}

pub struct ThumbnailCache {
    store: DiskStore,
    ladder: SizeLadder,
}

impl ThumbnailCache {
    pub fn new(config: &LoaderConfig) -> Self {
        Self {
            store: DiskStore::new(&config.cache_root),
            ladder: SizeLadder::new(config.screen_short, config.screen_long),
        }
    }

    pub fn store(&self) -> &DiskStore {
        &self.store
    }

    pub fn ladder(&self) -> &SizeLadder {
        &self.ladder
    }

    /// Serve a thumbnail for `uri`, generating one if no valid disk entry
    /// exists.
    pub fn request_thumbnail(
        &self,
        uri: &str,
        requested: (u32, u32),
        crop: bool,
        unbounded: bool,
        mime: Option<&str>,
    ) -> Result<ThumbnailData> {
        let path = local_path(uri)
            .ok_or_else(|| ThumbnailError::SourceUnreadable(uri.into()))?;

        if let Some(existing) = self.lookup_existing(&path, requested, crop, unbounded) {
            return Ok(existing);
        }

        let size = self.ladder.select(requested, crop, unbounded);
        if size == SizeLadder::NONE {
            log::warn!(
                "invalid thumbnail size {}x{} requested for {path}",
                requested.0,
                requested.1
            );
            return Err(ThumbnailError::InvalidSizeSelection {
                width: requested.0,
                height: requested.1,
            });
        }

        let key = cache_key(&path, size, crop);
        self.generate(&path, &key, size, crop, mime)
    }

    /// Look up an existing entry without generating, probing neighboring
    /// ladder sizes when the preferred one is missing.
    pub fn existing_thumbnail(
        &self,
        uri: &str,
        requested: (u32, u32),
        crop: bool,
        unbounded: bool,
    ) -> Option<ThumbnailData> {
        let path = local_path(uri)?;
        self.lookup_existing(&path, requested, crop, unbounded)
    }

    fn lookup_existing(
        &self,
        path: &str,
        requested: (u32, u32),
        crop: bool,
        unbounded: bool,
    ) -> Option<ThumbnailData> {
        let mut size = self.ladder.select(requested, crop, unbounded);
        while size != SizeLadder::NONE {
            let key = cache_key(path, size, crop);
            if let Some(entry) = self.store.lookup(Path::new(path), &key) {
                return Some(ThumbnailData::from_path(entry, size));
            }
            size = self.ladder.next_size(size, unbounded);
        }
        None
    }

    fn generate(
        &self,
        path: &str,
        key: &str,
        size: u32,
        crop: bool,
        mime: Option<&str>,
    ) -> Result<ThumbnailData> {
        let source = Path::new(path);
        match mime {
            Some("application/pdf") => generate_pdf_thumbnail(&self.store, source, key, size, crop),
            Some(m) if m.starts_with("video/") => {
                generate_video_thumbnail(&self.store, source, key, size, crop)
            }
            _ => generate_image_thumbnail(&self.store, source, key, size, crop),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn config(root: &Path) -> LoaderConfig {
        LoaderConfig {
            cache_root: root.to_path_buf(),
            ..LoaderConfig::default()
        }
    }

    fn write_png(path: &Path, width: u32, height: u32) {
        RgbImage::from_pixel(width, height, Rgb([64, 128, 192]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn local_path_accepts_only_local_sources() {
        assert_eq!(local_path("/a/b.png"), Some("/a/b.png".into()));
        assert_eq!(local_path("file:///a/b.png"), Some("/a/b.png".into()));
        assert_eq!(local_path("http://host/a.png"), None);
        assert_eq!(local_path(""), None);
        assert_eq!(local_path("file://"), None);
    }

    #[test]
    fn second_request_serves_from_disk() {
        let cache_dir = tempdir().unwrap();
        let sources = tempdir().unwrap();
        let source = sources.path().join("photo.png");
        write_png(&source, 400, 300);
        let uri = source.to_str().unwrap();

        let cache = ThumbnailCache::new(&config(cache_dir.path()));

        let first = cache
            .request_thumbnail(uri, (200, 200), true, true, None)
            .unwrap();
        assert!(first.valid_pixels());
        assert_eq!(first.size(), 256);

        let second = cache
            .request_thumbnail(uri, (200, 200), true, true, None)
            .unwrap();
        assert!(second.valid_path());
        assert!(!second.valid_pixels());
        assert_eq!(second.path(), first.path());
    }

    #[test]
    fn lookup_probes_neighboring_sizes() {
        let cache_dir = tempdir().unwrap();
        let sources = tempdir().unwrap();
        let source = sources.path().join("photo.png");
        write_png(&source, 1000, 1000);
        let uri = source.to_str().unwrap();

        let cache = ThumbnailCache::new(&config(cache_dir.path()));

        // Populate a 512 entry; a 200x200 request prefers 256 but should
        // fall forward to the 512 entry rather than regenerate.
        cache
            .request_thumbnail(uri, (500, 500), true, true, None)
            .unwrap();
        let found = cache.existing_thumbnail(uri, (200, 200), true, true).unwrap();
        assert_eq!(found.size(), 512);
    }

    #[test]
    fn crop_and_fit_use_distinct_entries() {
        let cache_dir = tempdir().unwrap();
        let sources = tempdir().unwrap();
        let source = sources.path().join("photo.png");
        write_png(&source, 600, 400);
        let uri = source.to_str().unwrap();

        let cache = ThumbnailCache::new(&config(cache_dir.path()));
        let cropped = cache
            .request_thumbnail(uri, (200, 200), true, true, None)
            .unwrap();
        let fitted = cache
            .request_thumbnail(uri, (200, 200), false, true, None)
            .unwrap();
        assert_ne!(cropped.path(), fitted.path());
    }

    #[test]
    fn bounded_degenerate_request_is_rejected() {
        let cache_dir = tempdir().unwrap();
        let cache = ThumbnailCache::new(&config(cache_dir.path()));
        let err = cache
            .request_thumbnail("/media/pic.jpg", (0, 0), false, false, None)
            .unwrap_err();
        assert!(matches!(err, ThumbnailError::InvalidSizeSelection { .. }));
    }

    #[test]
    fn remote_uri_is_unreadable() {
        let cache_dir = tempdir().unwrap();
        let cache = ThumbnailCache::new(&config(cache_dir.path()));
        let err = cache
            .request_thumbnail("http://host/pic.jpg", (128, 128), true, true, None)
            .unwrap_err();
        assert!(matches!(err, ThumbnailError::SourceUnreadable(_)));
    }

    #[test]
    fn stale_disk_entry_triggers_regeneration() {
        let cache_dir = tempdir().unwrap();
        let sources = tempdir().unwrap();
        let source: PathBuf = sources.path().join("photo.png");
        write_png(&source, 400, 300);
        let uri = source.to_str().unwrap();

        let cache = ThumbnailCache::new(&config(cache_dir.path()));
        let first = cache
            .request_thumbnail(uri, (200, 200), true, true, None)
            .unwrap();
        assert!(first.valid_pixels());

        // Bump the source past filesystem timestamp granularity.
        std::thread::sleep(std::time::Duration::from_millis(1100));
        write_png(&source, 400, 300);

        let regenerated = cache
            .request_thumbnail(uri, (200, 200), true, true, None)
            .unwrap();
        // A cache hit would have returned path-only data.
        assert!(regenerated.valid_pixels());
    }
}
