// Image formats and downsample targets
// Author: kelexine (https://github.com/kelexine)

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};

/// Supported image formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    WebP,
    Gif,
    Heic,
}

impl ImageFormat {
    /// Get MIME type for this format
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::WebP => "image/webp",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Heic => "image/heic",
        }
    }

    /// Detect format from magic bytes at start of image data
    pub fn sniff(data: &[u8]) -> Option<Self> {
        if data.starts_with(b"\xFF\xD8\xFF") {
            Some(ImageFormat::Jpeg)
        } else if data.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some(ImageFormat::Png)
        } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
            Some(ImageFormat::Gif)
        } else if data.len() >= 12 && data.starts_with(b"RIFF") && data[8..12] == *b"WEBP" {
            Some(ImageFormat::WebP)
        } else if data.len() >= 12 && (data[4..12] == *b"ftypheic" || data[4..12] == *b"ftypheix") {
            Some(ImageFormat::Heic)
        } else {
            None
        }
    }

    /// Codec used to decode this format, if one is available.
    pub(crate) fn codec(&self) -> Option<image::ImageFormat> {
        match self {
            ImageFormat::Jpeg => Some(image::ImageFormat::Jpeg),
            ImageFormat::Png => Some(image::ImageFormat::Png),
            ImageFormat::WebP => Some(image::ImageFormat::WebP),
            ImageFormat::Gif => Some(image::ImageFormat::Gif),
            ImageFormat::Heic => None,
        }
    }
}

/// Bounding box a decoded image is scaled into before it is cached in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownsampleTarget {
    pub max_width: u32,
    pub max_height: u32,
}

impl DownsampleTarget {
    pub fn new(max_width: u32, max_height: u32) -> Result<Self> {
        if max_width == 0 || max_height == 0 {
            return Err(CacheError::Configuration(format!(
                "downsample target must be positive, got {}x{}",
                max_width, max_height
            )));
        }
        Ok(Self {
            max_width,
            max_height,
        })
    }

    pub fn square(side: u32) -> Result<Self> {
        Self::new(side, side)
    }

    /// Whether an image of the given size already fits inside the box.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        width <= self.max_width && height <= self.max_height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_known_formats() {
        assert_eq!(ImageFormat::sniff(b"\x89PNG\r\n\x1a\n0000"), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::sniff(b"\xFF\xD8\xFF\xE0"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::sniff(b"GIF89a"), Some(ImageFormat::Gif));
        assert_eq!(ImageFormat::sniff(b"RIFF\0\0\0\0WEBPVP8 "), Some(ImageFormat::WebP));
        assert_eq!(ImageFormat::sniff(b"\0\0\0\x18ftypheic"), Some(ImageFormat::Heic));
        assert_eq!(ImageFormat::sniff(b"<html>"), None);
    }

    #[test]
    fn test_downsample_target_rejects_zero() {
        assert!(DownsampleTarget::new(0, 10).is_err());
        assert!(DownsampleTarget::square(64).unwrap().fits(64, 10));
        assert!(!DownsampleTarget::square(64).unwrap().fits(65, 10));
    }
}
