//! Pixel access to the mapped frame

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::Framebuffer;
use super::geometry::PixelFormat;
use super::region::Rect;
use crate::epdc::Epdc;
use crate::error::{FbError, Result};

/// A colour, converted to the native pixel format on write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Color {
    Black,
    #[default]
    White,
    /// 0 is white, 255 is black
    Gray(u8),
    Rgb(u8, u8, u8),
    /// Raw pixel value in the device format
    Native(u32),
}

impl Color {
    /// Bytes of this colour in `format`, little endian. Only the first
    /// `format.bytes_per_pixel()` entries are meaningful.
    pub fn to_native(self, format: PixelFormat) -> [u8; 4] {
        let (r, g, b) = match self {
            Color::Native(v) => return v.to_le_bytes(),
            Color::Black => (0, 0, 0),
            Color::White => (0xFF, 0xFF, 0xFF),
            Color::Gray(level) => (255 - level, 255 - level, 255 - level),
            Color::Rgb(r, g, b) => (r, g, b),
        };

        match format {
            PixelFormat::Gray8 => {
                // ITU-R BT.601 luma
                let y = (r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000;
                [y as u8, 0, 0, 0]
            }
            PixelFormat::Rgb565 => {
                let v = ((r as u16 >> 3) << 11) | ((g as u16 >> 2) << 5) | (b as u16 >> 3);
                let [lo, hi] = v.to_le_bytes();
                [lo, hi, 0, 0]
            }
            PixelFormat::Rgb888 | PixelFormat::Xrgb8888 => [b, g, r, 0],
        }
    }

    /// Native value as an integer, as returned by `read_pixel`.
    pub fn native_value(self, format: PixelFormat) -> u32 {
        let bytes = self.to_native(format);
        let mut value = [0u8; 4];
        let n = format.bytes_per_pixel();
        value[..n].copy_from_slice(&bytes[..n]);
        u32::from_le_bytes(value)
    }
}

/// Draw-path corrections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawCorrection {
    /// Each `set_pixel` also writes the following `pixel_repeat - 1` pixel
    /// slots on the same scanline. Compensates for panels whose horizontal
    /// density is a multiple of the drawing grid.
    pub pixel_repeat: u32,
    /// `draw_rect` multiplies the rectangle width by this factor.
    pub width_scale: u32,
}

impl Default for DrawCorrection {
    fn default() -> Self {
        Self {
            pixel_repeat: 1,
            width_scale: 1,
        }
    }
}

impl<D: Epdc> Framebuffer<D> {
    /// Write `color` at `(y, x)`.
    ///
    /// Returns `false` without touching memory when the pixel (or any of its
    /// repeated slots) falls outside the virtual area.
    pub fn set_pixel(&mut self, y: u32, x: u32, color: Color) -> bool {
        let bpp = self.geometry.bytes_per_pixel();
        let repeat = self.draw.pixel_repeat.max(1);

        let last_x = match x.checked_add(repeat - 1) {
            Some(v) => v,
            None => return false,
        };
        let (start, last) = match (self.geometry.offset_of(y, x), self.geometry.offset_of(y, last_x)) {
            (Some(start), Some(last)) => (start, last),
            _ => return false,
        };
        if last + bpp > self.frame.len() {
            return false;
        }

        let native = color.to_native(self.geometry.format);
        for pixel in self.frame[start..last + bpp].chunks_exact_mut(bpp) {
            pixel.copy_from_slice(&native[..bpp]);
        }
        true
    }

    /// Native value of the pixel at `(y, x)`.
    pub fn read_pixel(&self, y: u32, x: u32) -> Option<u32> {
        let bpp = self.geometry.bytes_per_pixel();
        let offset = self.geometry.offset_of(y, x)?;
        let bytes = self.frame.get(offset..offset + bpp)?;
        let mut value = [0u8; 4];
        value[..bpp].copy_from_slice(bytes);
        Some(u32::from_le_bytes(value))
    }

    /// Set the whole mapping to `color`.
    ///
    /// Colours whose native bytes are all equal (black and white in every
    /// format) become a plain byte fill. Any other colour is written pixel by
    /// pixel across the virtual area, so multi-byte colours are never
    /// truncated to a single byte.
    pub fn fill(&mut self, color: Color) {
        let bpp = self.geometry.bytes_per_pixel();
        let native = color.to_native(self.geometry.format);
        let pixel = &native[..bpp];

        if pixel.iter().all(|&b| b == pixel[0]) {
            self.frame.fill(pixel[0]);
            return;
        }

        let row_bytes = self.geometry.xres_virtual as usize * bpp;
        let stride = self.geometry.line_length as usize;
        for row in self.frame.chunks_mut(stride) {
            let end = row_bytes.min(row.len());
            for slot in row[..end].chunks_exact_mut(bpp) {
                slot.copy_from_slice(pixel);
            }
        }
    }

    /// Fill `rect` with `color`, one `set_pixel` per pixel.
    ///
    /// The width is multiplied by the draw-path width scale. Returns the number
    /// of pixels written; pixels outside the frame are skipped.
    pub fn draw_rect(&mut self, rect: Rect, color: Color) -> usize {
        if rect.is_empty() {
            return 0;
        }

        let width = rect.width.saturating_mul(self.draw.width_scale.max(1));
        // Nothing past the virtual area can be written.
        let bottom = rect.top.saturating_add(rect.height).min(self.geometry.yres_virtual);
        let right = rect.left.saturating_add(width).min(self.geometry.xres_virtual);
        let mut written = 0;
        for y in rect.top..bottom {
            for x in rect.left..right {
                if self.set_pixel(y, x, color) {
                    written += 1;
                }
            }
        }
        trace!("draw_rect {:?} wrote {} pixels", rect, written);
        written
    }

    /// Copy raw bytes into the mapping starting at byte `offset`.
    pub fn write_frame(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let mapped = self.frame.len();
        let end = offset.checked_add(bytes.len()).filter(|&end| end <= mapped);
        match end {
            Some(end) => {
                self.frame[offset..end].copy_from_slice(bytes);
                Ok(())
            }
            None => Err(FbError::OutOfBounds {
                offset,
                len: bytes.len(),
                mapped,
            }),
        }
    }

    /// Read-only view of the whole mapping.
    pub fn frame(&self) -> &[u8] {
        &self.frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epdc::sim::{SimGeometry, SimulatedEpdc};
    use crate::framebuffer::FramebufferOptions;

    fn small(bpp: u32) -> Framebuffer<SimulatedEpdc> {
        let sim = SimulatedEpdc::new(SimGeometry::new(16, 8, bpp));
        Framebuffer::with_device(sim, &FramebufferOptions::default()).unwrap()
    }

    #[test]
    fn test_rgb565_conversion() {
        assert_eq!(Color::White.to_native(PixelFormat::Rgb565)[..2], [0xFF, 0xFF]);
        assert_eq!(Color::Black.to_native(PixelFormat::Rgb565)[..2], [0x00, 0x00]);
        assert_eq!(Color::Rgb(0xFF, 0, 0).native_value(PixelFormat::Rgb565), 0xF800);
        assert_eq!(Color::Gray(0).native_value(PixelFormat::Rgb565), 0xFFFF);
        assert_eq!(Color::Native(0x1234).native_value(PixelFormat::Rgb565), 0x1234);
    }

    #[test]
    fn test_set_then_read() {
        for bpp in [8, 16, 24, 32] {
            let mut fb = small(bpp);
            let format = fb.geometry().format;
            let color = Color::Rgb(0x80, 0x40, 0x20);

            assert!(fb.set_pixel(3, 5, color));
            assert_eq!(fb.read_pixel(3, 5), Some(color.native_value(format)));
            assert_eq!(fb.read_pixel(3, 6), Some(0));
        }
    }

    #[test]
    fn test_out_of_bounds_leaves_frame_untouched() {
        let mut fb = small(16);
        let before = fb.frame().to_vec();

        assert!(!fb.set_pixel(8, 0, Color::Black));
        assert!(!fb.set_pixel(0, 16, Color::Black));
        assert!(!fb.set_pixel(u32::MAX, u32::MAX, Color::Black));
        assert_eq!(fb.frame(), &before[..]);
        assert_eq!(fb.read_pixel(8, 0), None);
    }

    #[test]
    fn test_pixel_repeat_is_all_or_nothing() {
        let sim = SimulatedEpdc::new(SimGeometry::new(16, 8, 16));
        let options = FramebufferOptions {
            draw: DrawCorrection {
                pixel_repeat: 2,
                width_scale: 1,
            },
            ..Default::default()
        };
        let mut fb = Framebuffer::with_device(sim, &options).unwrap();
        let black = Color::Black.native_value(PixelFormat::Rgb565);
        fb.fill(Color::White);

        assert!(fb.set_pixel(0, 4, Color::Black));
        assert_eq!(fb.read_pixel(0, 4), Some(black));
        assert_eq!(fb.read_pixel(0, 5), Some(black));
        assert_ne!(fb.read_pixel(0, 6), Some(black));

        // second slot would land past the scanline
        assert!(!fb.set_pixel(0, 15, Color::Black));
        assert_ne!(fb.read_pixel(0, 15), Some(black));
    }

    #[test]
    fn test_fill_non_uniform_color_is_exact() {
        let mut fb = small(16);
        let color = Color::Native(0x1234);
        fb.fill(color);

        for y in 0..8 {
            for x in 0..16 {
                assert_eq!(fb.read_pixel(y, x), Some(0x1234));
            }
        }
    }

    #[test]
    fn test_draw_rect_overwrites_fill() {
        let mut fb = small(16);
        let whole = Rect::new(0, 0, 16, 8);

        fb.fill(Color::White);
        let written = fb.draw_rect(whole, Color::Rgb(1, 2, 3));
        let expected = Color::Rgb(1, 2, 3).native_value(PixelFormat::Rgb565);

        assert_eq!(written, 16 * 8);
        for y in 0..8 {
            for x in 0..16 {
                assert_eq!(fb.read_pixel(y, x), Some(expected));
            }
        }
    }

    #[test]
    fn test_empty_rect_is_noop() {
        let mut fb = small(16);
        let before = fb.frame().to_vec();
        assert_eq!(fb.draw_rect(Rect::new(2, 2, 0, 0), Color::Black), 0);
        assert_eq!(fb.frame(), &before[..]);
    }

    #[test]
    fn test_draw_rect_clips_at_frame_edge() {
        let mut fb = small(8);
        assert_eq!(fb.draw_rect(Rect::new(6, 14, 4, 4), Color::Black), 4);
    }

    #[test]
    fn test_draw_rect_huge_rect_is_clipped() {
        let mut fb = small(16);
        assert_eq!(fb.draw_rect(Rect::new(0, 0, u32::MAX, 1), Color::Black), 16);
        assert_eq!(fb.draw_rect(Rect::new(0, 0, u32::MAX, u32::MAX), Color::Black), 16 * 8);
        assert_eq!(fb.draw_rect(Rect::new(u32::MAX, u32::MAX, u32::MAX, u32::MAX), Color::Black), 0);
    }

    #[test]
    fn test_write_frame_bounds() {
        let mut fb = small(8);
        let len = fb.frame().len();

        assert!(fb.write_frame(len - 2, &[1, 2]).is_ok());
        assert_eq!(&fb.frame()[len - 2..], &[1, 2]);
        assert!(matches!(
            fb.write_frame(len - 1, &[1, 2]),
            Err(FbError::OutOfBounds { .. })
        ));
        assert!(fb.write_frame(usize::MAX, &[1]).is_err());
    }
}
