//! Frame encoder - serves rendered frames as PNG or JPEG
//!
//! PNG keeps the alpha channel and is lossless, so it is the default for
//! the camera surface and snapshots. JPEG drops alpha.

use crate::render::Frame;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use serde::Serialize;
use std::io::Cursor;
use std::path::Path;

/// Metadata for an encoded frame
#[derive(Debug, Clone, Serialize)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub content_type: &'static str,
}

/// Encoded frame with PNG/JPEG data and metadata
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub image_data: Bytes,
    pub metadata: ImageMetadata,
    pub format: ImageFormat,
}

/// Output image format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageFormat {
    Jpeg,
    #[default]
    Png,
}

impl ImageFormat {
    /// Pick a format from a file extension, `None` if unsupported
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "png" => Some(ImageFormat::Png),
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            _ => None,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }
}

/// Encoding errors
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Image encoding failed: {0}")]
    Image(#[from] image::ImageError),
}

/// JPEG quality for encoding (0-100)
const JPEG_QUALITY: u8 = 85;

/// Encode a rendered frame
pub fn encode_frame(frame: &Frame, format: ImageFormat) -> Result<EncodedImage, EncodeError> {
    let dynamic_image = DynamicImage::ImageRgba8(frame.image().clone());

    let mut buffer = Cursor::new(Vec::new());
    match format {
        ImageFormat::Png => {
            dynamic_image.write_to(&mut buffer, image::ImageFormat::Png)?;
        }
        ImageFormat::Jpeg => {
            // JPEG has no alpha channel
            let rgb = DynamicImage::ImageRgb8(dynamic_image.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY))?;
        }
    }

    Ok(EncodedImage {
        image_data: Bytes::from(buffer.into_inner()),
        metadata: ImageMetadata {
            width: frame.width(),
            height: frame.height(),
            content_type: format.content_type(),
        },
        format,
    })
}

/// Decode PNG/JPEG bytes back into a frame
pub fn decode_frame(data: &[u8]) -> Result<Frame, EncodeError> {
    let image = image::load_from_memory(data)?;
    Ok(Frame::new(image.to_rgba8()))
}

/// Check if data starts with JPEG magic bytes
pub fn is_jpeg(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0xFF && data[1] == 0xD8
}

/// Check if data starts with PNG magic bytes
pub fn is_png(data: &[u8]) -> bool {
    data.len() >= 4 && data[0..4] == [0x89, b'P', b'N', b'G']
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn sample_frame() -> Frame {
        let mut image = RgbaImage::from_pixel(4, 3, Rgba([0, 125, 255, 255]));
        image.put_pixel(1, 1, Rgba([255, 0, 0, 128]));
        Frame::new(image)
    }

    #[test]
    fn test_is_jpeg() {
        assert!(is_jpeg(&[0xFF, 0xD8, 0xFF, 0xE0]));
        assert!(!is_jpeg(&[0x89, b'P', b'N', b'G']));
        assert!(!is_jpeg(&[]));
    }

    #[test]
    fn test_is_png() {
        assert!(is_png(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A]));
        assert!(!is_png(&[0xFF, 0xD8]));
        assert!(!is_png(&[]));
    }

    #[test]
    fn test_png_is_lossless() {
        let frame = sample_frame();
        let encoded = encode_frame(&frame, ImageFormat::Png).unwrap();

        assert!(is_png(&encoded.image_data));
        assert_eq!(encoded.metadata.width, 4);
        assert_eq!(encoded.metadata.height, 3);
        assert_eq!(encoded.metadata.content_type, "image/png");
        assert_eq!(decode_frame(&encoded.image_data).unwrap(), frame);
    }

    #[test]
    fn test_encode_jpeg() {
        let encoded = encode_frame(&sample_frame(), ImageFormat::Jpeg).unwrap();
        assert_eq!(encoded.format, ImageFormat::Jpeg);
        assert!(is_jpeg(&encoded.image_data));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ImageFormat::from_path(Path::new("/tmp/a.PNG")), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::from_path(Path::new("snap.jpeg")), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_path(Path::new("snap.gif")), None);
        assert_eq!(ImageFormat::from_path(Path::new("snap")), None);
    }
}
