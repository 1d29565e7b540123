//! Display geometry negotiated with the device at open time

use std::io;

use epdfb_proto::{FixScreeninfo, MxcfbRect, VarScreeninfo};
use serde::{Deserialize, Serialize};

use crate::error::{FbError, Result};

/// Memory layout of one pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8 bpp grayscale
    Gray8,
    /// 16 bpp, little endian (red 11..16, green 5..11, blue 0..5)
    Rgb565,
    /// 24 bpp
    Rgb888,
    /// 32 bpp, top byte unused
    Xrgb8888,
}

impl PixelFormat {
    pub fn from_bits_per_pixel(bpp: u32) -> Option<Self> {
        match bpp {
            8 => Some(PixelFormat::Gray8),
            16 => Some(PixelFormat::Rgb565),
            24 => Some(PixelFormat::Rgb888),
            32 => Some(PixelFormat::Xrgb8888),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb565 => 2,
            PixelFormat::Rgb888 => 3,
            PixelFormat::Xrgb8888 => 4,
        }
    }
}

/// Immutable screen geometry.
///
/// Invariants (checked by [`DisplayGeometry::from_screeninfo`]):
/// `xres_virtual >= xres`, `yres_virtual >= yres`,
/// `line_length >= xres_virtual * bytes_per_pixel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayGeometry {
    pub xres: u32,
    pub yres: u32,
    pub xres_virtual: u32,
    pub yres_virtual: u32,
    pub bits_per_pixel: u32,
    /// Bytes per scanline
    pub line_length: u32,
    pub rotate: u32,
    pub format: PixelFormat,
}

impl DisplayGeometry {
    pub fn from_screeninfo(var: &VarScreeninfo, fix: &FixScreeninfo) -> Result<Self> {
        let invalid = |msg: String| FbError::GeometryQuery {
            what: "validate",
            source: io::Error::new(io::ErrorKind::InvalidData, msg),
        };

        let format = PixelFormat::from_bits_per_pixel(var.bits_per_pixel)
            .ok_or_else(|| invalid(format!("unsupported depth {} bpp", var.bits_per_pixel)))?;

        if var.xres == 0 || var.yres == 0 {
            return Err(invalid(format!("empty resolution {}x{}", var.xres, var.yres)));
        }
        if var.xres_virtual < var.xres || var.yres_virtual < var.yres {
            return Err(invalid(format!(
                "virtual resolution {}x{} smaller than visible {}x{}",
                var.xres_virtual, var.yres_virtual, var.xres, var.yres
            )));
        }
        let min_stride = var.xres_virtual as u64 * format.bytes_per_pixel() as u64;
        if (fix.line_length as u64) < min_stride {
            return Err(invalid(format!(
                "line length {} shorter than {} bytes",
                fix.line_length, min_stride
            )));
        }

        Ok(Self {
            xres: var.xres,
            yres: var.yres,
            xres_virtual: var.xres_virtual,
            yres_virtual: var.yres_virtual,
            bits_per_pixel: var.bits_per_pixel,
            line_length: fix.line_length,
            rotate: var.rotate,
            format,
        })
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.format.bytes_per_pixel()
    }

    /// Length of the memory mapping: the whole virtual area.
    pub fn frame_len(&self) -> usize {
        self.line_length as usize * self.yres_virtual as usize
    }

    /// The visible screen, used for "whole screen" refreshes.
    pub fn full_region(&self) -> MxcfbRect {
        MxcfbRect {
            top: 0,
            left: 0,
            width: self.xres,
            height: self.yres,
        }
    }

    /// Byte offset of `(y, x)` inside the mapping, or `None` outside the
    /// virtual area.
    pub fn offset_of(&self, y: u32, x: u32) -> Option<usize> {
        if y >= self.yres_virtual || x >= self.xres_virtual {
            return None;
        }
        Some(y as usize * self.line_length as usize + x as usize * self.bytes_per_pixel())
    }
}
