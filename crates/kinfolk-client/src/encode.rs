//! Image payload encoding for uploads.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;

// Recognition models work on small crops anyway; shrinking before
// upload keeps request bodies well under typical proxy limits.
const MAX_UPLOAD_EDGE: u32 = 256;
const JPEG_QUALITY: u8 = 90;

/// Encode an image for the wire: downscale so the longest edge is at
/// most 256px (aspect preserved), JPEG at quality 90, then standard
/// base64 without line wrapping.
pub fn to_base64_jpeg(image: &DynamicImage) -> Result<String, image::ImageError> {
    let scaled;
    let source = if image.width().max(image.height()) > MAX_UPLOAD_EDGE {
        scaled = image.resize(MAX_UPLOAD_EDGE, MAX_UPLOAD_EDGE, FilterType::Triangle);
        &scaled
    } else {
        image
    };

    // JPEG has no alpha channel; flatten to RGB before encoding.
    let rgb = DynamicImage::ImageRgb8(source.to_rgb8());
    let mut bytes = Cursor::new(Vec::new());
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY))?;

    Ok(STANDARD.encode(bytes.into_inner()))
}
