//! Thumbnail generation
//!
//! Generation is dispatched on the source's mime hint: PDFs and videos go
//! through external generator binaries that write straight into the disk
//! store, everything else is treated as image data and decoded in-process
//! via [`ImageFileReader`].

use std::path::{Path, PathBuf};
use std::process::Command;

use image::{DynamicImage, GenericImageView};

use crate::error::{Result, ThumbnailError};
use crate::reader::{read_thumbnail, scale_image, ImageFileReader, Orientation, ThumbnailReader};
use crate::size::SizeLadder;
use crate::store::DiskStore;

pub const VIDEO_GENERATOR: &str = "/usr/bin/thumbnaild-video";
pub const PDF_GENERATOR: &str = "/usr/bin/thumbnaild-pdf";

/// A produced or located thumbnail.
///
/// Carries a disk path, in-memory pixels, or both. Subprocess generators
/// and cache hits yield only a path; the in-process image branch yields
/// pixels plus the path its cache write landed at (no path when the write
/// failed). The pass-through shortcut yields the *source* path with no
/// pixels and no cache entry, so callers must be prepared to decode from
/// the path themselves — [`ThumbnailData::scaled_pixels`] does exactly
/// that.
#[derive(Debug)]
pub struct ThumbnailData {
    path: Option<PathBuf>,
    pixels: Option<DynamicImage>,
    size: u32,
}

impl ThumbnailData {
    pub(crate) fn new(path: Option<PathBuf>, pixels: Option<DynamicImage>, size: u32) -> Self {
        Self { path, pixels, size }
    }

    pub(crate) fn from_path(path: impl Into<PathBuf>, size: u32) -> Self {
        Self {
            path: Some(path.into()),
            pixels: None,
            size,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn pixels(&self) -> Option<&DynamicImage> {
        self.pixels.as_ref()
    }

    pub fn valid_path(&self) -> bool {
        self.path.is_some()
    }

    pub fn valid_pixels(&self) -> bool {
        self.pixels.is_some()
    }

    /// The ladder size this thumbnail was stored (or passed through) at.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Produce display pixels at `requested` size, scaling held pixels or
    /// decoding from the path when only a path is present.
    pub fn scaled_pixels(
        &self,
        requested: (u32, u32),
        crop: bool,
        fast: bool,
    ) -> Result<DynamicImage> {
        if let Some(pixels) = &self.pixels {
            Ok(scale_image(pixels, requested, crop, fast))
        } else if let Some(path) = &self.path {
            let mut reader = ImageFileReader::open(path)?;
            read_thumbnail(&mut reader, requested, crop, fast)
        } else {
            Err(ThumbnailError::DecodeFailed(PathBuf::new()))
        }
    }
}

/// Generate an image thumbnail at ladder size `size`, writing the result
/// into the store.
///
/// When the source is already within 10% of the target edge and needs no
/// reorientation (or the target is beyond the largest fixed rung), the
/// source path itself is returned and nothing is written — the original
/// file serves as its own thumbnail.
pub(crate) fn generate_image_thumbnail(
    store: &DiskStore,
    source: &Path,
    key: &str,
    size: u32,
    crop: bool,
) -> Result<ThumbnailData> {
    let mut reader = ImageFileReader::open(source)?;
    let original = reader.probe_size();
    let orientation = reader.probe_orientation();

    if let Some((ow, oh)) = original {
        let passthrough_allowed =
            orientation == Orientation::TopLeft || size > SizeLadder::EXTRA_LARGE;
        let close_enough = (ow as u64 * 9) < (size as u64 * 10) || (oh as u64 * 9) < (size as u64 * 10);
        if passthrough_allowed && close_enough {
            return Ok(ThumbnailData::from_path(source, size));
        }
    }

    let pixels = read_thumbnail(&mut reader, (size, size), crop, true)?;
    if pixels.width() == 0 || pixels.height() == 0 {
        return Err(ThumbnailError::DecodeFailed(source.to_path_buf()));
    }
    let pixels = flatten_opaque(pixels);

    // A cache write failure is logged by the store and tolerated here;
    // the pixels still serve this request, only reuse is lost.
    let written = store.write(key, &pixels).ok();

    Ok(ThumbnailData::new(written, Some(pixels), size))
}

pub(crate) fn generate_video_thumbnail(
    store: &DiskStore,
    source: &Path,
    key: &str,
    size: u32,
    crop: bool,
) -> Result<ThumbnailData> {
    let target = store.entry_path(key, true);
    run_generator(VIDEO_GENERATOR, source, &target, (size, size), crop)?;
    Ok(ThumbnailData::from_path(target, size))
}

pub(crate) fn generate_pdf_thumbnail(
    store: &DiskStore,
    source: &Path,
    key: &str,
    size: u32,
    crop: bool,
) -> Result<ThumbnailData> {
    let target = store.entry_path(key, true);
    run_generator(PDF_GENERATOR, source, &target, (size, size), crop)?;
    Ok(ThumbnailData::from_path(target, size))
}

fn run_generator(
    program: &str,
    source: &Path,
    target: &Path,
    requested: (u32, u32),
    crop: bool,
) -> Result<()> {
    let mut command = Command::new(program);
    command
        .arg(source)
        .arg("-w")
        .arg(requested.0.to_string())
        .arg("-h")
        .arg(requested.1.to_string())
        .arg("-o")
        .arg(target);
    if crop {
        command.arg("-c");
    }

    let status = command.status().map_err(|err| ThumbnailError::GeneratorFailed {
        path: source.to_path_buf(),
        reason: format!("{program}: {err}"),
    })?;
    if !status.success() {
        log::warn!("{program} failed for {}: {status}", source.display());
        return Err(ThumbnailError::GeneratorFailed {
            path: source.to_path_buf(),
            reason: format!("{program} exited with {status}"),
        });
    }
    if !target.exists() {
        return Err(ThumbnailError::GeneratorFailed {
            path: source.to_path_buf(),
            reason: format!("{program} produced no output"),
        });
    }
    Ok(())
}

/// Drop the alpha channel from images whose pixels are all opaque, so the
/// store encodes them as JPEG rather than PNG.
fn flatten_opaque(image: DynamicImage) -> DynamicImage {
    match &image {
        DynamicImage::ImageRgba8(buffer) => {
            if buffer.pixels().all(|p| p[3] == u8::MAX) {
                DynamicImage::ImageRgb8(image.to_rgb8())
            } else {
                image
            }
        }
        _ => image,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::cache_key;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use tempfile::tempdir;

    fn write_png(path: &Path, width: u32, height: u32) {
        RgbImage::from_pixel(width, height, Rgb([200, 40, 40]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn generates_pixels_and_disk_entry() {
        let sources = tempdir().unwrap();
        let cache = tempdir().unwrap();
        let source = sources.path().join("photo.png");
        write_png(&source, 400, 300);

        let store = DiskStore::new(cache.path());
        let key = cache_key(source.to_str().unwrap(), 256, true);
        let data = generate_image_thumbnail(&store, &source, &key, 256, true).unwrap();

        assert!(data.valid_pixels());
        assert_eq!(data.pixels().unwrap().dimensions(), (256, 256));
        assert_eq!(data.size(), 256);

        let entry = data.path().unwrap();
        assert!(entry.exists());
        assert_eq!(entry, store.entry_path(&key, false));
    }

    #[test]
    fn passthrough_returns_source_without_writing() {
        let sources = tempdir().unwrap();
        let cache = tempdir().unwrap();
        // Within 10% of the 128 target on the short edge.
        let source = sources.path().join("tiny.png");
        write_png(&source, 130, 120);

        let store = DiskStore::new(cache.path());
        let key = cache_key(source.to_str().unwrap(), 128, false);
        let data = generate_image_thumbnail(&store, &source, &key, 128, false).unwrap();

        assert_eq!(data.path(), Some(source.as_path()));
        assert!(!data.valid_pixels());
        assert!(!store.entry_path(&key, false).exists());

        // Passed-through data still decodes at the requested size.
        let pixels = data.scaled_pixels((65, 60), false, true).unwrap();
        assert_eq!(pixels.dimensions(), (65, 60));
    }

    #[test]
    fn large_sources_are_not_passed_through() {
        let sources = tempdir().unwrap();
        let cache = tempdir().unwrap();
        let source = sources.path().join("big.png");
        write_png(&source, 4000, 3000);

        let store = DiskStore::new(cache.path());
        let key = cache_key(source.to_str().unwrap(), 128, true);
        let data = generate_image_thumbnail(&store, &source, &key, 128, true).unwrap();
        assert!(data.valid_pixels());
        assert!(store.entry_path(&key, false).exists());
    }

    #[test]
    fn translucent_sources_keep_alpha_and_encode_as_png() {
        let sources = tempdir().unwrap();
        let cache = tempdir().unwrap();
        let source = sources.path().join("overlay.png");
        RgbaImage::from_pixel(400, 400, Rgba([10, 10, 10, 100]))
            .save(&source)
            .unwrap();

        let store = DiskStore::new(cache.path());
        let key = cache_key(source.to_str().unwrap(), 128, true);
        let data = generate_image_thumbnail(&store, &source, &key, 128, true).unwrap();

        let magic = std::fs::read(data.path().unwrap()).unwrap();
        assert_eq!(&magic[..4], b"\x89PNG");
    }

    #[test]
    fn failed_cache_write_still_delivers_pixels() {
        let sources = tempdir().unwrap();
        let cache = tempdir().unwrap();
        let source = sources.path().join("photo.png");
        write_png(&source, 400, 300);

        let store = DiskStore::new(cache.path());
        let key = cache_key(source.to_str().unwrap(), 256, true);
        // Block the shard directory so the write cannot land.
        std::fs::write(cache.path().join(&key[..2]), b"not a directory").unwrap();

        let data = generate_image_thumbnail(&store, &source, &key, 256, true).unwrap();
        assert!(data.valid_pixels());
        assert!(!data.valid_path());
        assert_eq!(data.pixels().unwrap().dimensions(), (256, 256));
    }

    #[test]
    fn missing_source_is_unreadable() {
        let cache = tempdir().unwrap();
        let store = DiskStore::new(cache.path());
        let err = generate_image_thumbnail(
            &store,
            Path::new("/nowhere/missing.png"),
            "00missing",
            128,
            true,
        )
        .unwrap_err();
        assert!(matches!(err, ThumbnailError::SourceUnreadable(_)));
    }

    #[test]
    fn corrupt_source_fails_decode() {
        let sources = tempdir().unwrap();
        let cache = tempdir().unwrap();
        let source = sources.path().join("broken.png");
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.extend_from_slice(&[0u8; 64]);
        std::fs::write(&source, bytes).unwrap();

        let store = DiskStore::new(cache.path());
        let err = generate_image_thumbnail(&store, &source, "00broken", 128, true).unwrap_err();
        assert!(matches!(err, ThumbnailError::DecodeFailed(_)));
    }

    #[test]
    fn missing_generator_binary_reports_failure() {
        let err = run_generator(
            "/nonexistent/thumbnaild-video",
            Path::new("/media/clip.mp4"),
            Path::new("/tmp/unused-target"),
            (256, 256),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, ThumbnailError::GeneratorFailed { .. }));
    }
}
