//! Pixel work for screenshots: downscaling, blank-frame detection, encoding
//! and content hashing.

use crate::capture::ScreenshotFormat;
use crate::error::CaptureError;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ExtendedColorType, ImageEncoder, RgbaImage};
use sha2::{Digest, Sha256};

const BLACK_SAMPLE_SIDE: u32 = 8;
const BLACK_CHANNEL_MAX: u8 = 6;

/// Scale `image` down to `target_width`, keeping the aspect ratio.
///
/// Images already at or below the target width, and a zero target, are
/// returned unchanged.
pub fn downscale(image: RgbaImage, target_width: u32) -> RgbaImage {
    let (width, height) = image.dimensions();
    if target_width == 0 || width <= target_width {
        return image;
    }
    let scale = f64::from(target_width) / f64::from(width);
    let target_height = ((f64::from(height) * scale).round() as u32).max(1);
    imageops::resize(&image, target_width, target_height, FilterType::Lanczos3)
}

/// Whether an 8x8 reduction of the frame is uniformly near black.
///
/// Display capture without Screen Recording permission yields such frames.
pub fn is_likely_black_frame(image: &RgbaImage) -> bool {
    if image.width() == 0 || image.height() == 0 {
        return true;
    }
    let sample = imageops::resize(image, BLACK_SAMPLE_SIDE, BLACK_SAMPLE_SIDE, FilterType::Triangle);
    sample.pixels().all(|p| {
        p.0[0] <= BLACK_CHANNEL_MAX && p.0[1] <= BLACK_CHANNEL_MAX && p.0[2] <= BLACK_CHANNEL_MAX
    })
}

/// Encode to bytes. `quality` in [0, 1] only affects JPEG.
pub fn encode(image: &RgbaImage, format: ScreenshotFormat, quality: f64) -> Result<Vec<u8>, CaptureError> {
    let mut bytes = Vec::new();
    match format {
        ScreenshotFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            let quality = (quality * 100.0).round().clamp(1.0, 100.0) as u8;
            JpegEncoder::new_with_quality(&mut bytes, quality).encode_image(&rgb)?;
        }
        ScreenshotFormat::Png => {
            PngEncoder::new(&mut bytes).write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                ExtendedColorType::Rgba8,
            )?;
        }
    }
    Ok(bytes)
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::scripted::StaticScreenSource;

    #[test]
    fn test_downscale_keeps_aspect_ratio() {
        let image = StaticScreenSource::gradient(2560, 1440);
        let scaled = downscale(image, 1280);
        assert_eq!(scaled.dimensions(), (1280, 720));
    }

    #[test]
    fn test_downscale_skips_narrow_images() {
        let image = StaticScreenSource::gradient(800, 600);
        assert_eq!(downscale(image, 1280).dimensions(), (800, 600));
    }

    #[test]
    fn test_downscale_never_yields_zero_height() {
        let image = StaticScreenSource::gradient(4000, 1);
        assert_eq!(downscale(image, 100).dimensions(), (100, 1));
    }

    #[test]
    fn test_black_frame_detection() {
        assert!(is_likely_black_frame(&StaticScreenSource::solid(64, 64, [0, 0, 0])));
        assert!(is_likely_black_frame(&StaticScreenSource::solid(64, 64, [6, 6, 6])));
        assert!(!is_likely_black_frame(&StaticScreenSource::solid(64, 64, [7, 0, 0])));
        assert!(!is_likely_black_frame(&StaticScreenSource::gradient(64, 64)));
    }

    #[test]
    fn test_encode_formats() {
        let image = StaticScreenSource::gradient(32, 16);

        let jpeg = encode(&image, ScreenshotFormat::Jpeg, 0.75).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let png = encode(&image, ScreenshotFormat::Png, 0.75).unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
