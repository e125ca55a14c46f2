// Decode and downsample fetched bytes
// Author: kelexine (https://github.com/kelexine)

use super::models::{DownsampleTarget, ImageFormat};
use crate::error::{CacheError, Result};
use bytes::Bytes;
use image::RgbaImage;
use tracing::debug;

/// Decode `data` to RGBA pixels, scaling it into `target` when it is larger.
pub fn decode(data: &[u8], target: Option<DownsampleTarget>) -> Result<RgbaImage> {
    let format = ImageFormat::sniff(data)
        .ok_or_else(|| CacheError::Decode("Could not detect image format from data".to_string()))?;

    let codec = format.codec().ok_or_else(|| {
        CacheError::Decode(format!("Unsupported image format: {}", format.mime_type()))
    })?;

    let decoded = image::load_from_memory_with_format(data, codec)?;

    let image = match target {
        Some(target) if !target.fits(decoded.width(), decoded.height()) => {
            let scaled = decoded.thumbnail(target.max_width, target.max_height);
            debug!(
                from_width = decoded.width(),
                from_height = decoded.height(),
                to_width = scaled.width(),
                to_height = scaled.height(),
                "Downsampled image"
            );
            scaled
        }
        _ => decoded,
    };

    Ok(image.to_rgba8())
}

/// [`decode`] on the blocking pool.
pub async fn decode_blocking(data: Bytes, target: Option<DownsampleTarget>) -> Result<RgbaImage> {
    tokio::task::spawn_blocking(move || decode(&data, target))
        .await
        .map_err(|e| CacheError::Internal(format!("decode task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat as Codec};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(RgbaImage::new(width, height))
            .write_to(&mut buf, Codec::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_decode_without_target_keeps_size() {
        let image = decode(&png(40, 20), None).unwrap();
        assert_eq!(image.dimensions(), (40, 20));
    }

    #[test]
    fn test_downsample_preserves_aspect_ratio() {
        let target = DownsampleTarget::square(10).unwrap();
        let image = decode(&png(40, 20), Some(target)).unwrap();
        assert_eq!(image.dimensions(), (10, 5));
    }

    #[test]
    fn test_small_image_is_not_upscaled() {
        let target = DownsampleTarget::square(100).unwrap();
        let image = decode(&png(8, 8), Some(target)).unwrap();
        assert_eq!(image.dimensions(), (8, 8));
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let err = decode(b"<html>not an image</html>", None).unwrap_err();
        assert!(matches!(err, CacheError::Decode(_)));
    }

    #[test]
    fn test_truncated_png_is_decode_error() {
        let data = png(16, 16);
        let err = decode(&data[..20], None).unwrap_err();
        assert!(matches!(err, CacheError::Decode(_)));
    }

    #[test]
    fn test_heic_is_unsupported() {
        let err = decode(b"\0\0\0\x18ftypheic0000", None).unwrap_err();
        assert!(format!("{}", err).contains("image/heic"));
    }

    #[tokio::test]
    async fn test_decode_blocking() {
        let image = decode_blocking(Bytes::from(png(3, 3)), None).await.unwrap();
        assert_eq!(image.dimensions(), (3, 3));
    }
}
