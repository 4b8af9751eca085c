//! Scaled thumbnail decoding
//!
//! [`read_thumbnail`] drives a [`ThumbnailReader`] through the decode of a
//! single thumbnail: probe the source dimensions and EXIF orientation,
//! compute the scaled size (and, when cropping, the centered clip
//! rectangle), decode, and reorient. The reader trait is narrow so the
//! algorithm can be exercised against a mock as well as the
//! [`ImageFileReader`] backed by the `image` and `exif` crates.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

use crate::error::{Result, ThumbnailError};

/// EXIF orientation tag values 1 through 8.
///
/// Orientations 5..8 involve a quarter rotation, so a decode targeting a
/// given display size reads a transposed rectangle from the stored pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    TopLeft = 1,
    TopRight,
    BottomRight,
    BottomLeft,
    LeftTop,
    RightTop,
    RightBottom,
    LeftBottom,
}

impl Orientation {
    /// Map a raw EXIF orientation value; anything out of range reads as
    /// the identity.
    pub fn from_exif(value: u32) -> Self {
        match value {
            2 => Orientation::TopRight,
            3 => Orientation::BottomRight,
            4 => Orientation::BottomLeft,
            5 => Orientation::LeftTop,
            6 => Orientation::RightTop,
            7 => Orientation::RightBottom,
            8 => Orientation::LeftBottom,
            _ => Orientation::TopLeft,
        }
    }

    /// Whether displaying the stored pixels involves a 90 degree rotation.
    pub fn rotates_90(self) -> bool {
        matches!(
            self,
            Orientation::LeftTop
                | Orientation::RightTop
                | Orientation::RightBottom
                | Orientation::LeftBottom
        )
    }

    /// Transform decoded pixels into display orientation.
    pub fn apply(self, image: DynamicImage) -> DynamicImage {
        match self {
            Orientation::TopLeft => image,
            Orientation::TopRight => image.fliph(),
            Orientation::BottomRight => image.rotate180(),
            Orientation::BottomLeft => image.flipv(),
            Orientation::LeftTop => image.rotate90().fliph(),
            Orientation::RightTop => image.rotate90(),
            Orientation::RightBottom => image.rotate270().fliph(),
            Orientation::LeftBottom => image.rotate270(),
        }
    }
}

/// A clip rectangle in scaled-image coordinates. The origin may be
/// negative; application intersects with the image bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl ClipRect {
    /// A rectangle of `size` whose integer center lands on `center`.
    pub fn centered(size: (u32, u32), center: (i32, i32)) -> Self {
        Self {
            x: center.0 - (size.0 as i32 - 1) / 2,
            y: center.1 - (size.1 as i32 - 1) / 2,
            width: size.0,
            height: size.1,
        }
    }

    /// Crop `image` to the intersection of this rectangle with its bounds.
    /// Returns `None` when the intersection is empty.
    pub fn apply(&self, image: &DynamicImage) -> Option<DynamicImage> {
        let (w, h) = image.dimensions();
        let x0 = self.x.max(0);
        let y0 = self.y.max(0);
        let x1 = (self.x + self.width as i32).min(w as i32);
        let y1 = (self.y + self.height as i32).min(h as i32);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(image.crop_imm(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

/// Uniform scale of `size` so that both edges fit inside `bounds`,
/// maximizing the result.
pub fn scale_keep_aspect(size: (u32, u32), bounds: (u32, u32)) -> (u32, u32) {
    scale_to_bounds(size, bounds, false)
}

/// Uniform scale of `size` so that both edges are at least `bounds`,
/// minimizing the result.
pub fn scale_expanding(size: (u32, u32), bounds: (u32, u32)) -> (u32, u32) {
    scale_to_bounds(size, bounds, true)
}

fn scale_to_bounds(size: (u32, u32), bounds: (u32, u32), expanding: bool) -> (u32, u32) {
    let (w, h) = size;
    let (bw, bh) = bounds;
    if w == 0 || h == 0 {
        return bounds;
    }
    // Width the image would have when scaled to the bounds height.
    let rw = (bh as u64 * w as u64 / h as u64) as u32;
    let use_height = if expanding { rw >= bw } else { rw <= bw };
    if use_height {
        (rw.max(1), bh.max(1))
    } else {
        let rh = (bw as u64 * h as u64 / w as u64) as u32;
        (bw.max(1), rh.max(1))
    }
}

/// Scale already-decoded pixels to the requested size, center-cropping when
/// `crop` is set. Used for sources whose dimensions could not be probed
/// before decoding, and for resizing cached thumbnails down to a request.
pub fn scale_image(
    image: &DynamicImage,
    requested: (u32, u32),
    crop: bool,
    fast: bool,
) -> DynamicImage {
    let dims = image.dimensions();
    let scaled = if dims != requested {
        let target = if crop {
            scale_expanding(dims, requested)
        } else {
            scale_keep_aspect(dims, requested)
        };
        if target == dims {
            image.clone()
        } else {
            image.resize_exact(target.0, target.1, resize_filter(fast))
        }
    } else {
        image.clone()
    };

    let (sw, sh) = scaled.dimensions();
    if crop && (sw, sh) != requested {
        let x = sw.saturating_sub(requested.0) / 2;
        let y = sh.saturating_sub(requested.1) / 2;
        scaled.crop_imm(x, y, requested.0.min(sw), requested.1.min(sh))
    } else {
        scaled
    }
}

fn resize_filter(fast: bool) -> FilterType {
    if fast {
        FilterType::Triangle
    } else {
        FilterType::Lanczos3
    }
}

/// The decoding surface [`read_thumbnail`] is written against.
pub trait ThumbnailReader {
    /// Source dimensions, if the codec can report them without a full
    /// decode.
    fn probe_size(&mut self) -> Option<(u32, u32)>;

    /// EXIF orientation of the source; identity when absent.
    fn probe_orientation(&mut self) -> Orientation;

    /// Ask the decoder to produce pixels at exactly this size.
    fn set_scaled_size(&mut self, size: (u32, u32));

    /// Clip the scaled output to this rectangle.
    fn set_scaled_clip(&mut self, rect: ClipRect);

    /// Trade decode quality for speed.
    fn set_fast_quality(&mut self, fast: bool);

    /// Decode, honoring the configured scaled size and clip.
    fn read_pixels(&mut self) -> Result<DynamicImage>;
}

/// Decode one thumbnail at `requested` display size.
///
/// When cropping, the source is scaled up just enough to cover the request
/// and a centered rectangle is clipped out; otherwise it is scaled to fit
/// and one edge may come up short. The clip rectangle is transposed for
/// quarter-rotated sources, and the orientation transform runs on the
/// decoded pixels last.
pub fn read_thumbnail<R: ThumbnailReader>(
    reader: &mut R,
    requested: (u32, u32),
    crop: bool,
    fast: bool,
) -> Result<DynamicImage> {
    if fast {
        reader.set_fast_quality(true);
    }

    let original = reader.probe_size();
    let orientation = reader.probe_orientation();
    let rotated = if orientation.rotates_90() {
        (requested.1, requested.0)
    } else {
        requested
    };

    if let Some(original) = original {
        if crop {
            let scaled = scale_expanding(original, requested);
            let center = ((scaled.0 as i32 - 1) / 2, (scaled.1 as i32 - 1) / 2);
            reader.set_scaled_clip(ClipRect::centered(rotated, center));
            reader.set_scaled_size(scaled);
        } else {
            reader.set_scaled_size(scale_keep_aspect(original, rotated));
        }
    }

    let mut pixels = reader.read_pixels()?;

    if original.is_none() {
        pixels = scale_image(&pixels, rotated, crop, fast);
    }

    Ok(orientation.apply(pixels))
}

/// [`ThumbnailReader`] over a local image file.
pub struct ImageFileReader {
    path: PathBuf,
    probed_size: Option<Option<(u32, u32)>>,
    probed_orientation: Option<Orientation>,
    scaled_size: Option<(u32, u32)>,
    clip: Option<ClipRect>,
    fast: bool,
}

impl ImageFileReader {
    /// Open `path`, verifying it exists and looks like a decodable image.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let reader = image::ImageReader::open(&path)
            .map_err(|_| ThumbnailError::SourceUnreadable(path.clone()))?
            .with_guessed_format()
            .map_err(|_| ThumbnailError::SourceUnreadable(path.clone()))?;
        if reader.format().is_none() {
            return Err(ThumbnailError::SourceUnreadable(path));
        }
        Ok(Self {
            path,
            probed_size: None,
            probed_orientation: None,
            scaled_size: None,
            clip: None,
            fast: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ThumbnailReader for ImageFileReader {
    fn probe_size(&mut self) -> Option<(u32, u32)> {
        if let Some(probed) = self.probed_size {
            return probed;
        }
        let dims = image::ImageReader::open(&self.path)
            .ok()
            .and_then(|r| r.with_guessed_format().ok())
            .and_then(|r| r.into_dimensions().ok());
        self.probed_size = Some(dims);
        dims
    }

    fn probe_orientation(&mut self) -> Orientation {
        if let Some(orientation) = self.probed_orientation {
            return orientation;
        }
        let orientation =
            read_exif_orientation(&self.path).unwrap_or(Orientation::TopLeft);
        self.probed_orientation = Some(orientation);
        orientation
    }

    fn set_scaled_size(&mut self, size: (u32, u32)) {
        self.scaled_size = Some(size);
    }

    fn set_scaled_clip(&mut self, rect: ClipRect) {
        self.clip = Some(rect);
    }

    fn set_fast_quality(&mut self, fast: bool) {
        self.fast = fast;
    }

    fn read_pixels(&mut self) -> Result<DynamicImage> {
        let reader = image::ImageReader::open(&self.path)
            .map_err(|_| ThumbnailError::SourceUnreadable(self.path.clone()))?
            .with_guessed_format()
            .map_err(|_| ThumbnailError::SourceUnreadable(self.path.clone()))?;
        let mut image = reader
            .decode()
            .map_err(|_| ThumbnailError::DecodeFailed(self.path.clone()))?;
        if image.width() == 0 || image.height() == 0 {
            return Err(ThumbnailError::DecodeFailed(self.path.clone()));
        }

        if let Some(scaled) = self.scaled_size {
            if scaled != image.dimensions() {
                image = image.resize_exact(scaled.0, scaled.1, resize_filter(self.fast));
            }
        }
        if let Some(clip) = self.clip {
            image = clip
                .apply(&image)
                .ok_or_else(|| ThumbnailError::DecodeFailed(self.path.clone()))?;
        }
        Ok(image)
    }
}

fn read_exif_orientation(path: &Path) -> Option<Orientation> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut reader).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    field.value.get_uint(0).map(Orientation::from_exif)
}
