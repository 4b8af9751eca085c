//! Content-addressed on-disk thumbnail store
//!
//! Entries live at `<root>/<key[0..2]>/<key>` and are valid while they are
//! at least as fresh as their source file. The store never garbage-collects;
//! external cleaners may prune it using the same layout.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use image::DynamicImage;
use image::ImageFormat;

use crate::error::{Result, ThumbnailError};
use crate::key::cache_entry_path;

/// On-disk thumbnail store rooted at a single cache directory.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Open a store at `root`, creating the directory if necessary.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        if !root.exists() {
            let _ = fs::create_dir_all(&root);
        }
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The path an entry for `key` would occupy, optionally creating its
    /// shard directory.
    pub fn entry_path(&self, key: &str, create_shard: bool) -> PathBuf {
        cache_entry_path(&self.root, key, create_shard)
    }

    /// Look up a valid entry for `key`.
    ///
    /// An entry is valid when it exists and its modification time is no
    /// older than the source's. A source that cannot be stat'ed counts as
    /// older than any entry, so stale-looking thumbnails of deleted files
    /// still serve.
    pub fn lookup(&self, source_path: &Path, key: &str) -> Option<PathBuf> {
        let entry = self.entry_path(key, false);
        let entry_mtime = fs::metadata(&entry).and_then(|m| m.modified()).ok()?;

        let source_mtime = fs::metadata(source_path)
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);

        (entry_mtime >= source_mtime).then_some(entry)
    }

    /// Write generated pixels as the entry for `key`.
    ///
    /// Encodes as PNG when the pixels carry an alpha channel and JPEG
    /// otherwise, so the same input always produces an equivalent file and
    /// concurrent duplicate writes are harmless. An I/O failure is logged
    /// and reported as [`ThumbnailError::CacheWriteFailed`]; callers keep
    /// their pixels and treat the lost reuse as non-fatal.
    pub fn write(&self, key: &str, pixels: &DynamicImage) -> Result<PathBuf> {
        let path = self.entry_path(key, true);
        let format = if pixels.color().has_alpha() {
            ImageFormat::Png
        } else {
            ImageFormat::Jpeg
        };

        match pixels.save_with_format(&path, format) {
            Ok(()) => Ok(path),
            Err(err) => {
                log::warn!("couldn't cache thumbnail to {}: {err}", path.display());
                Err(ThumbnailError::CacheWriteFailed(path))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::cache_key;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use tempfile::tempdir;

    // Coarse filesystem timestamps make "newer" flaky; sleep past the
    // granularity before rewriting the source.
    fn touch_newer(path: &Path) {
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let contents = std::fs::read(path).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn opaque_pixels() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([10, 20, 30])))
    }

    fn alpha_pixels() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 128])))
    }

    #[test]
    fn write_then_lookup_round_trips() {
        let cache_dir = tempdir().unwrap();
        let source_dir = tempdir().unwrap();
        let source = source_dir.path().join("photo.jpg");
        std::fs::write(&source, b"source bytes").unwrap();

        let store = DiskStore::new(cache_dir.path());
        let key = cache_key(source.to_str().unwrap(), 128, true);

        assert!(store.lookup(&source, &key).is_none());

        let written = store.write(&key, &opaque_pixels()).unwrap();
        assert_eq!(store.lookup(&source, &key), Some(written));
    }

    #[test]
    fn stale_entries_fail_the_freshness_test() {
        let cache_dir = tempdir().unwrap();
        let source_dir = tempdir().unwrap();
        let source = source_dir.path().join("photo.jpg");
        std::fs::write(&source, b"v1").unwrap();

        let store = DiskStore::new(cache_dir.path());
        let key = cache_key(source.to_str().unwrap(), 128, true);
        store.write(&key, &opaque_pixels()).unwrap();
        assert!(store.lookup(&source, &key).is_some());

        touch_newer(&source);
        assert!(store.lookup(&source, &key).is_none());
    }

    #[test]
    fn missing_source_is_older_than_any_entry() {
        let cache_dir = tempdir().unwrap();
        let store = DiskStore::new(cache_dir.path());
        let key = cache_key("/nowhere/gone.jpg", 128, true);
        store.write(&key, &opaque_pixels()).unwrap();

        assert!(store
            .lookup(Path::new("/nowhere/gone.jpg"), &key)
            .is_some());
    }

    #[test]
    fn blocked_shard_reports_cache_write_failed() {
        let cache_dir = tempdir().unwrap();
        let store = DiskStore::new(cache_dir.path());
        let key = cache_key("/media/pic.jpg", 128, true);

        // Occupy the shard directory's name with a plain file so neither
        // the shard nor the entry can be created.
        std::fs::write(cache_dir.path().join(&key[..2]), b"not a directory").unwrap();

        let err = store.write(&key, &opaque_pixels()).unwrap_err();
        assert!(matches!(err, ThumbnailError::CacheWriteFailed(_)));
    }

    #[test]
    fn alpha_chooses_png_and_opaque_chooses_jpeg() {
        let cache_dir = tempdir().unwrap();
        let store = DiskStore::new(cache_dir.path());

        let png_path = store.write(&cache_key("/a", 128, true), &alpha_pixels()).unwrap();
        let jpeg_path = store.write(&cache_key("/b", 128, true), &opaque_pixels()).unwrap();

        // Entries carry no extension; the format lives in the magic bytes.
        let png_magic = std::fs::read(&png_path).unwrap();
        assert_eq!(&png_magic[..4], b"\x89PNG");
        let jpeg_magic = std::fs::read(&jpeg_path).unwrap();
        assert_eq!(&jpeg_magic[..2], b"\xff\xd8");
    }
}
