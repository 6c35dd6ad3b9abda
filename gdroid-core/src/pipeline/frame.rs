//! Raw frames as handed over by a capture producer.

use std::time::Instant;

use image::RgbImage;

use crate::error::{GatewayError, Result};

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout for raw captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, Alpha.
    Bgra8,
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba8,
    /// 3 bytes per pixel: Red, Green, Blue.
    Rgb8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }
}

// ── RawFrame ─────────────────────────────────────────────────────

/// An uncompressed frame. `data` holds `height` rows of `stride` bytes;
/// `stride` may exceed `width * bytes_per_pixel` when rows are padded.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
    pub timestamp: Instant,
}

impl RawFrame {
    /// A tightly packed frame (`stride == width * bpp`).
    pub fn packed(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            stride: width * format.bytes_per_pixel() as u32,
            format,
            data,
            timestamp: Instant::now(),
        }
    }

    fn validate(&self) -> Result<()> {
        let bpp = self.format.bytes_per_pixel();
        if self.width == 0 || self.height == 0 {
            return Err(GatewayError::Encoding("empty frame".into()));
        }
        if (self.stride as usize) < self.width as usize * bpp {
            return Err(GatewayError::Encoding("stride shorter than a row".into()));
        }
        if self.data.len() < self.stride as usize * self.height as usize {
            return Err(GatewayError::Encoding(format!(
                "frame buffer holds {} bytes, expected {}",
                self.data.len(),
                self.stride as usize * self.height as usize
            )));
        }
        Ok(())
    }

    /// Convert to a packed RGB image, dropping alpha and row padding.
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        self.validate()?;
        let bpp = self.format.bytes_per_pixel();
        let row_bytes = self.width as usize * bpp;
        let mut rgb = Vec::with_capacity(self.width as usize * self.height as usize * 3);

        for row in self.data.chunks(self.stride as usize).take(self.height as usize) {
            for px in row[..row_bytes].chunks_exact(bpp) {
                match self.format {
                    PixelFormat::Bgra8 => rgb.extend_from_slice(&[px[2], px[1], px[0]]),
                    PixelFormat::Rgba8 | PixelFormat::Rgb8 => rgb.extend_from_slice(&px[..3]),
                }
            }
        }

        RgbImage::from_raw(self.width, self.height, rgb)
            .ok_or_else(|| GatewayError::Encoding("pixel buffer size mismatch".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgra_with_padding_converts_to_rgb() {
        // 2x1 frame, stride padded to 12 bytes.
        let data = vec![
            10, 20, 30, 255, // B G R A
            40, 50, 60, 255, //
            0, 0, 0, 0, // padding
        ];
        let frame = RawFrame {
            width: 2,
            height: 1,
            stride: 12,
            format: PixelFormat::Bgra8,
            data,
            timestamp: Instant::now(),
        };
        let img = frame.to_rgb_image().unwrap();
        assert_eq!(img.as_raw(), &vec![30, 20, 10, 60, 50, 40]);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let frame = RawFrame::packed(4, 4, PixelFormat::Rgba8, vec![0; 10]);
        assert!(matches!(
            frame.to_rgb_image(),
            Err(GatewayError::Encoding(_))
        ));
    }
}
