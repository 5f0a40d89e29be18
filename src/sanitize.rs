//! Metadata-stripping image transform.
//!
//! Sanitizing works by decoding the image and re-encoding the raw pixels, so
//! nothing from the original container (EXIF, XMP, IPTC, thumbnails) carries
//! forward. The EXIF orientation is baked into the pixels first, otherwise a
//! rotated photo would display sideways once the tag is gone.

use anyhow::{Context, Result, bail};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ImageEncoder, ImageFormat, ImageReader};
use img_parts::jpeg::Jpeg;
use img_parts::{Bytes, ImageEXIF};
use nom_exif::{Exif, ExifIter, ExifTag, MediaParser, MediaSource};
use std::io::Cursor;

use crate::config::SanitizerConfig;

/// The image formats that are safe to sanitize by re-encoding.
///
/// Animated-capable containers (GIF, WebP) are deliberately absent: decoding
/// them yields only the first frame, so re-encoding would flatten the file.
/// Those uploads are refused and left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
}

impl ImageKind {
    /// Determine the image kind from a content type.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type.split(';').next().unwrap_or("").trim();
        match essence {
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            _ => None,
        }
    }

    fn from_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Jpeg => Some(Self::Jpeg),
            ImageFormat::Png => Some(Self::Png),
            _ => None,
        }
    }
}

/// A sanitized image: re-encoded bytes plus what they contain.
#[derive(Debug)]
pub struct SanitizedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub kind: ImageKind,
}

/// Strip all embedded metadata from an image by decoding and re-encoding it.
///
/// The declared content type gates entry; the actual format is sniffed from
/// the bytes and wins when the two disagree (the sanitized object keeps
/// whatever format its bytes really are). A header-only dimension check runs
/// before full decode so oversized images are refused cheaply.
///
/// # Example
///
/// ```rust,no_run
/// use exif_scrub::config::Config;
/// use exif_scrub::sanitize::strip_metadata;
///
/// let config = Config::default();
/// let original = std::fs::read("photo.jpg").unwrap();
/// let sanitized = strip_metadata(&original, "image/jpeg", &config.sanitizer).unwrap();
/// std::fs::write("photo.jpg", &sanitized.bytes).unwrap();
/// ```
pub fn strip_metadata(
    data: &[u8],
    content_type: &str,
    opts: &SanitizerConfig,
) -> Result<SanitizedImage> {
    let declared = ImageKind::from_content_type(content_type)
        .with_context(|| format!("Unsupported content type for sanitizing: {content_type}"))?;

    // Header-only read: dimensions and actual format, no pixel allocation yet
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .context("Failed to read image header")?;
    let sniffed = reader.format();
    let (width, height) = reader
        .into_dimensions()
        .context("Failed to read image dimensions")?;

    if let Some(max) = opts.max_dimension {
        if width > max || height > max {
            bail!("Image dimensions {width}x{height} exceed the {max}px limit");
        }
    }

    let kind = match sniffed.and_then(ImageKind::from_format) {
        Some(kind) => kind,
        None => bail!("Image content is not a supported raster format ({sniffed:?})"),
    };
    if kind != declared {
        log::warn!("Content type says {content_type} but bytes are {kind:?}; trusting the bytes");
    }

    let orientation = if opts.preserve_orientation {
        read_orientation(data)
    } else {
        None
    };

    let img = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .context("Failed to read image")?
        .decode()
        .context("Failed to decode image")?;

    let img = match orientation {
        Some(o) if o > 1 => {
            log::debug!("Applying EXIF orientation {o} before re-encode");
            apply_orientation(img, o)
        }
        _ => img,
    };

    let bytes = encode(&img, kind, opts.jpeg_quality)?;

    // The whole point of the re-encode; a JPEG coming out of the encoder
    // with an APP1 segment would mean the strip silently failed.
    if kind == ImageKind::Jpeg && exif_segment_present(&bytes) {
        bail!("Re-encoded JPEG still carries an EXIF segment");
    }

    Ok(SanitizedImage {
        bytes,
        width: img.width(),
        height: img.height(),
        kind,
    })
}

/// Re-encode a decoded image with no metadata.
fn encode(img: &DynamicImage, kind: ImageKind, jpeg_quality: u8) -> Result<Vec<u8>> {
    let mut output = Cursor::new(Vec::new());

    match kind {
        ImageKind::Jpeg => {
            // JPEG has no alpha channel
            let rgb;
            let img = if img.color().has_alpha() {
                rgb = DynamicImage::ImageRgb8(img.to_rgb8());
                &rgb
            } else {
                img
            };
            let mut encoder = JpegEncoder::new_with_quality(&mut output, jpeg_quality);
            encoder
                .encode(img.as_bytes(), img.width(), img.height(), img.color().into())
                .context("Failed to re-encode JPEG")?;
        }
        ImageKind::Png => {
            let encoder = PngEncoder::new(&mut output);
            encoder
                .write_image(img.as_bytes(), img.width(), img.height(), img.color().into())
                .context("Failed to re-encode PNG")?;
        }
    }

    Ok(output.into_inner())
}

/// Read the EXIF orientation value (1–8) from encoded image bytes.
pub fn read_orientation(data: &[u8]) -> Option<u16> {
    let mut parser = MediaParser::new();
    let ms = MediaSource::seekable(Cursor::new(data)).ok()?;
    let iter: ExifIter = parser.parse(ms).ok()?;
    let exif: Exif = iter.into();
    let value = exif.get(ExifTag::Orientation)?;
    value.to_string().trim().parse().ok()
}

/// Apply an EXIF orientation transform to a decoded image.
///
/// Orientation values: 1 normal, 2 flip horizontal, 3 rotate 180°,
/// 4 flip vertical, 5 flip horizontal + rotate 270° CW, 6 rotate 90° CW,
/// 7 flip horizontal + rotate 90° CW, 8 rotate 270° CW.
fn apply_orientation(img: DynamicImage, orientation: u16) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate270().fliph(),
        6 => img.rotate90(),
        7 => img.rotate90().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Whether any parseable EXIF data is embedded in the given image bytes.
pub fn has_metadata(data: &[u8]) -> bool {
    let mut parser = MediaParser::new();
    let Ok(ms) = MediaSource::seekable(Cursor::new(data)) else {
        return false;
    };
    let parsed: Result<ExifIter, nom_exif::Error> = parser.parse(ms);
    parsed.is_ok()
}

/// Whether a JPEG carries an APP1 EXIF segment.
/// Returns false for anything img-parts can't parse as a JPEG.
pub fn exif_segment_present(data: &[u8]) -> bool {
    match Jpeg::from_bytes(Bytes::copy_from_slice(data)) {
        Ok(jpeg) => jpeg.exif().is_some(),
        Err(_) => false,
    }
}

/// Summary of the embedded metadata found in an image, for inspection output.
#[derive(Debug, Default)]
pub struct MetadataReport {
    pub exif_present: bool,
    pub orientation: Option<u16>,
    pub camera_model: Option<String>,
    pub capture_time: Option<String>,
    pub has_gps: bool,
}

/// Read the interesting embedded metadata out of encoded image bytes.
pub fn describe_metadata(data: &[u8]) -> MetadataReport {
    let mut report = MetadataReport::default();

    let mut parser = MediaParser::new();
    let Ok(ms) = MediaSource::seekable(Cursor::new(data)) else {
        return report;
    };
    let iter: ExifIter = match parser.parse(ms) {
        Ok(iter) => iter,
        Err(_) => return report,
    };
    report.exif_present = true;

    // GPS must be parsed before the iterator is consumed
    let gps_info = iter.parse_gps_info().ok().flatten();
    report.has_gps = gps_info.is_some();

    let exif: Exif = iter.into();
    if let Some(value) = exif.get(ExifTag::Orientation) {
        report.orientation = value.to_string().trim().parse().ok();
    }
    if let Some(value) = exif.get(ExifTag::Model) {
        report.camera_model = entry_to_string(&value.to_string());
    }
    if let Some(value) = exif.get(ExifTag::DateTimeOriginal) {
        report.capture_time = entry_to_string(&value.to_string());
    }

    report
}

/// Trim quotes and whitespace from a rendered entry value.
fn entry_to_string(raw: &str) -> Option<String> {
    let s = raw.trim().trim_matches('"').to_string();
    if s.is_empty() { None } else { Some(s) }
}
