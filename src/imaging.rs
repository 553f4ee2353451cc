//! Board photo intake pipeline: decode (HEIC included when compiled with the
//! `heic` feature), apply EXIF orientation, bound the longest side and
//! re-encode as JPEG.
use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use thiserror::Error;
use tracing::debug;

use crate::config::AppConfig;

#[derive(Debug, Error)]
pub enum ImagingError {
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("decode: {0}")]
    Decode(String),
    #[error("encode: {0}")]
    Encode(String),
}

#[derive(Clone, Copy, Debug)]
pub struct PipelineSettings {
    pub max_dimension: u32,
    pub jpeg_quality: u8,
}

impl From<&AppConfig> for PipelineSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self { max_dimension: cfg.max_image_dimension, jpeg_quality: cfg.jpeg_quality }
    }
}

/// Raw upload as received from the client.
#[derive(Clone, Copy, Debug)]
pub struct Upload<'a> {
    pub bytes: &'a [u8],
    pub filename: Option<&'a str>,
    pub content_type: Option<&'a str>,
}

#[derive(Debug)]
pub struct ProcessedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub converted_from_heic: bool,
}

impl ProcessedImage {
    pub const MIME: &'static str = "image/jpeg";
}

/// HEIC is recognised by content sniffing, falling back to the extension or
/// declared type when the bytes are not recognised. Phones often label
/// converted JPEGs `.heic`, so a sniffed non-HEIC image wins.
pub fn is_heic(upload: &Upload<'_>) -> bool {
    if let Some(kind) = infer::get(upload.bytes) {
        if matches!(kind.mime_type(), "image/heif" | "image/heic") {
            return true;
        }
        if kind.matcher_type() == infer::MatcherType::Image {
            return false;
        }
    }
    let by_name = upload
        .filename
        .and_then(|n| n.rsplit_once('.'))
        .map(|(_, ext)| ext.eq_ignore_ascii_case("heic") || ext.eq_ignore_ascii_case("heif"))
        .unwrap_or(false);
    let by_type = upload
        .content_type
        .map(|t| {
            let t = t.to_ascii_lowercase();
            t.starts_with("image/heic") || t.starts_with("image/heif")
        })
        .unwrap_or(false);
    by_name || by_type
}

pub fn process(upload: Upload<'_>, settings: PipelineSettings) -> Result<ProcessedImage, ImagingError> {
    let heic = is_heic(&upload);
    let img = if heic {
        // libheif applies the container's rotation transforms while decoding
        decode_heic(upload.bytes)?
    } else {
        let img = decode_standard(upload.bytes)?;
        apply_orientation(img, exif_orientation(upload.bytes))
    };
    let img = bound_dimensions(img, settings.max_dimension);
    let (width, height) = img.dimensions();
    let bytes = encode_jpeg(&img, settings.jpeg_quality)?;
    debug!(width, height, heic, out_bytes = bytes.len(), "board photo processed");
    Ok(ProcessedImage { bytes, width, height, converted_from_heic: heic })
}

fn decode_standard(bytes: &[u8]) -> Result<DynamicImage, ImagingError> {
    match infer::get(bytes) {
        Some(kind) if kind.matcher_type() == infer::MatcherType::Image => {}
        Some(kind) => return Err(ImagingError::Unsupported(kind.mime_type().to_string())),
        None => return Err(ImagingError::Unsupported("unrecognised content".into())),
    }
    image::load_from_memory(bytes).map_err(|e| match e {
        image::ImageError::Unsupported(u) => ImagingError::Unsupported(u.to_string()),
        other => ImagingError::Decode(other.to_string()),
    })
}

#[cfg(feature = "heic")]
fn decode_heic(bytes: &[u8]) -> Result<DynamicImage, ImagingError> {
    use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

    let lib = LibHeif::new();
    let ctx = HeifContext::read_from_bytes(bytes).map_err(|e| ImagingError::Decode(e.to_string()))?;
    let handle = ctx.primary_image_handle().map_err(|e| ImagingError::Decode(e.to_string()))?;
    let decoded = lib
        .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)
        .map_err(|e| ImagingError::Decode(e.to_string()))?;
    let planes = decoded.planes();
    let plane = planes
        .interleaved
        .ok_or_else(|| ImagingError::Decode("heic: no interleaved plane".into()))?;
    let (w, h) = (plane.width, plane.height);
    let row_len = w as usize * 3;
    let mut raw = Vec::with_capacity(row_len * h as usize);
    for row in plane.data.chunks(plane.stride).take(h as usize) {
        raw.extend_from_slice(&row[..row_len]);
    }
    image::RgbImage::from_raw(w, h, raw)
        .map(DynamicImage::ImageRgb8)
        .ok_or_else(|| ImagingError::Decode("heic: short pixel buffer".into()))
}

#[cfg(not(feature = "heic"))]
fn decode_heic(_bytes: &[u8]) -> Result<DynamicImage, ImagingError> {
    Err(ImagingError::Unsupported("HEIC decoding is not enabled in this build".into()))
}

/// EXIF orientation tag (1..=8); 1 when absent or unreadable.
pub fn exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    exif::Reader::new()
        .read_from_container(&mut cursor)
        .ok()
        .and_then(|data| {
            data.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
                .and_then(|f| f.value.get_uint(0))
        })
        .filter(|o| (1..=8).contains(o))
        .unwrap_or(1)
}

pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Shrink so neither side exceeds `max`, keeping aspect ratio. Never upscales.
pub fn bound_dimensions(img: DynamicImage, max: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w <= max && h <= max {
        img
    } else {
        img.resize(max, max, FilterType::Lanczos3)
    }
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImagingError> {
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ColorType::Rgb8)
        .map_err(|e| ImagingError::Encode(e.to_string()))?;
    Ok(buf)
}
