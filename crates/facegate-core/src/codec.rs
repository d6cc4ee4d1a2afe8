//! Base64 image payload decoding.
//!
//! Accepts the raw base64 body of a camera capture, with or without a
//! browser-style data-URL header (`data:image/png;base64,...`), and
//! produces an RGB pixel buffer. RGB channel order is held throughout
//! the pipeline; grayscale and alpha-bearing sources are normalized here.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(#[from] image::ImageError),
}

/// Decode a base64 payload into an RGB image.
///
/// A leading data-URL header (everything up to and including the first
/// comma) is stripped when present. Pure: no logging, no side effects;
/// fails only with the declared error kinds.
pub fn decode_image(payload: &str) -> Result<RgbImage, DecodeError> {
    let body = if payload.starts_with("data:") {
        match payload.split_once(',') {
            Some((_, rest)) => rest,
            None => payload,
        }
    } else {
        payload
    };

    let bytes = BASE64.decode(body.trim())?;
    let img = image::load_from_memory(&bytes)?;
    Ok(img.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::io::Cursor;

    /// Encode a small image to PNG and wrap it in base64.
    fn png_base64(img: DynamicImage) -> String {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        BASE64.encode(buf.into_inner())
    }

    #[test]
    fn test_decode_plain_base64_png() {
        let img = DynamicImage::new_rgb8(8, 6);
        let decoded = decode_image(&png_base64(img)).unwrap();
        assert_eq!(decoded.width(), 8);
        assert_eq!(decoded.height(), 6);
    }

    #[test]
    fn test_decode_strips_data_url_header() {
        let img = DynamicImage::new_rgb8(4, 4);
        let payload = format!("data:image/png;base64,{}", png_base64(img));
        let decoded = decode_image(&payload).unwrap();
        assert_eq!(decoded.width(), 4);
    }

    #[test]
    fn test_decode_normalizes_alpha_to_rgb() {
        let mut rgba = RgbaImage::new(2, 2);
        rgba.put_pixel(0, 0, Rgba([10, 20, 30, 128]));
        let decoded = decode_image(&png_base64(DynamicImage::ImageRgba8(rgba))).unwrap();
        // 3 channels, alpha dropped
        assert_eq!(decoded.get_pixel(0, 0).0, [10, 20, 30]);
    }

    #[test]
    fn test_decode_normalizes_grayscale_to_rgb() {
        let img = DynamicImage::new_luma8(3, 3);
        let decoded = decode_image(&png_base64(img)).unwrap();
        assert_eq!(decoded.get_pixel(1, 1).0.len(), 3);
    }

    #[test]
    fn test_decode_invalid_base64() {
        let err = decode_image("not@valid@base64!!").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidBase64(_)));
    }

    #[test]
    fn test_decode_non_image_bytes() {
        let payload = BASE64.encode(b"these are not image bytes");
        let err = decode_image(&payload).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_decode_empty_payload() {
        let err = decode_image("").unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFormat(_)));
    }
}
