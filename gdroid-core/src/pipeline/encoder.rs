//! Downscale + lossy encode for pushed frames.

use bytes::Bytes;
use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};

use crate::error::{GatewayError, Result};
use crate::pipeline::frame::RawFrame;

/// Linear downscale factor applied before encoding.
pub const DEFAULT_SCALE: f64 = 0.52;

/// JPEG quality (0..=100).
pub const DEFAULT_QUALITY: u8 = 60;

/// Turns a raw frame into the bytes pushed to viewers.
pub trait FrameEncoder: Send {
    fn encode(&mut self, frame: &RawFrame) -> Result<Bytes>;
}

/// Scales each dimension by `scale` and encodes as baseline JPEG.
#[derive(Debug, Clone)]
pub struct JpegFrameEncoder {
    scale: f64,
    quality: u8,
    filter: FilterType,
}

impl JpegFrameEncoder {
    pub fn new(scale: f64, quality: u8) -> Self {
        Self {
            scale: if scale > 0.0 { scale.min(1.0) } else { DEFAULT_SCALE },
            quality: quality.clamp(1, 100),
            filter: FilterType::Triangle,
        }
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Output dimensions for a `width` x `height` input.
    pub fn scaled_size(&self, width: u32, height: u32) -> (u32, u32) {
        let w = ((width as f64 * self.scale) as u32).max(1);
        let h = ((height as f64 * self.scale) as u32).max(1);
        (w, h)
    }
}

impl Default for JpegFrameEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_SCALE, DEFAULT_QUALITY)
    }
}

impl FrameEncoder for JpegFrameEncoder {
    fn encode(&mut self, frame: &RawFrame) -> Result<Bytes> {
        let rgb = frame.to_rgb_image()?;
        let (w, h) = self.scaled_size(frame.width, frame.height);
        let scaled = if (w, h) == (frame.width, frame.height) {
            rgb
        } else {
            imageops::resize(&rgb, w, h, self.filter)
        };

        let mut out = Vec::with_capacity((w * h) as usize / 4);
        JpegEncoder::new_with_quality(&mut out, self.quality)
            .encode(scaled.as_raw(), w, h, ExtendedColorType::Rgb8)
            .map_err(|e| GatewayError::Encoding(format!("jpeg encode failed: {e}")))?;
        Ok(Bytes::from(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::frame::PixelFormat;
    use image::GenericImageView;

    fn gradient(width: u32, height: u32) -> RawFrame {
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[(x * 2) as u8, (y * 4) as u8, 128, 255]);
            }
        }
        RawFrame::packed(width, height, PixelFormat::Rgba8, data)
    }

    #[test]
    fn scaled_size_truncates() {
        let enc = JpegFrameEncoder::default();
        assert_eq!(enc.scaled_size(100, 50), (52, 26));
        assert_eq!(enc.scaled_size(1080, 1920), (561, 998));
        assert_eq!(enc.scaled_size(1, 1), (1, 1));
    }

    #[test]
    fn encodes_downscaled_jpeg() {
        let mut enc = JpegFrameEncoder::default();
        let bytes = enc.encode(&gradient(100, 50)).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (52, 26));
    }

    #[test]
    fn invalid_frame_is_encoding_error() {
        let mut enc = JpegFrameEncoder::default();
        let frame = RawFrame::packed(10, 10, PixelFormat::Bgra8, vec![0; 8]);
        assert!(matches!(enc.encode(&frame), Err(GatewayError::Encoding(_))));
    }
}
