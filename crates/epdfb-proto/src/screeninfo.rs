//! Linux framebuffer screen information, laid out as in `<linux/fb.h>`.
//!
//! These are filled by `FBIOGET_VSCREENINFO` / `FBIOGET_FSCREENINFO` and
//! written back by `FBIOPUT_VSCREENINFO` during a mode-set.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// `FBIOGET_VSCREENINFO` request number (legacy, not `_IOC` encoded).
pub const FBIOGET_VSCREENINFO: u32 = 0x4600;
/// `FBIOPUT_VSCREENINFO` request number.
pub const FBIOPUT_VSCREENINFO: u32 = 0x4601;
/// `FBIOGET_FSCREENINFO` request number.
pub const FBIOGET_FSCREENINFO: u32 = 0x4602;

/// `FB_VMODE_NONINTERLACED`
pub const FB_VMODE_NONINTERLACED: u32 = 0;

/// Position of one colour channel inside a pixel.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Bitfield {
    pub offset: u32,
    pub length: u32,
    pub msb_right: u32,
}

/// Variable screen information (`struct fb_var_screeninfo`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct VarScreeninfo {
    /// Visible resolution
    pub xres: u32,
    pub yres: u32,
    /// Virtual (pannable) resolution
    pub xres_virtual: u32,
    pub yres_virtual: u32,
    pub xoffset: u32,
    pub yoffset: u32,
    pub bits_per_pixel: u32,
    /// 0 = colour, 1 = grayscale, >1 = FOURCC
    pub grayscale: u32,
    pub red: Bitfield,
    pub green: Bitfield,
    pub blue: Bitfield,
    pub transp: Bitfield,
    pub nonstd: u32,
    pub activate: u32,
    /// Physical size in mm
    pub height: u32,
    pub width: u32,
    pub accel_flags: u32,
    /// Pixel clock in picoseconds
    pub pixclock: u32,
    pub left_margin: u32,
    pub right_margin: u32,
    pub upper_margin: u32,
    pub lower_margin: u32,
    pub hsync_len: u32,
    pub vsync_len: u32,
    pub sync: u32,
    pub vmode: u32,
    /// Counter-clockwise rotation
    pub rotate: u32,
    pub colorspace: u32,
    pub reserved: [u32; 4],
}

impl Default for VarScreeninfo {
    fn default() -> Self {
        Zeroable::zeroed()
    }
}

/// Fixed screen information (`struct fb_fix_screeninfo`).
///
/// `type` is a keyword, hence `fb_type`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Zeroable)]
pub struct FixScreeninfo {
    pub id: [u8; 16],
    pub smem_start: libc::c_ulong,
    pub smem_len: u32,
    pub fb_type: u32,
    pub type_aux: u32,
    pub visual: u32,
    pub xpanstep: u16,
    pub ypanstep: u16,
    pub ywrapstep: u16,
    /// Bytes per scanline
    pub line_length: u32,
    pub mmio_start: libc::c_ulong,
    pub mmio_len: u32,
    pub accel: u32,
    pub capabilities: u16,
    pub reserved: [u16; 2],
}

impl Default for FixScreeninfo {
    fn default() -> Self {
        Zeroable::zeroed()
    }
}

impl FixScreeninfo {
    /// Driver identification string, up to the first NUL.
    pub fn id_str(&self) -> String {
        let end = self.id.iter().position(|&b| b == 0).unwrap_or(self.id.len());
        String::from_utf8_lossy(&self.id[..end]).into_owned()
    }
}
