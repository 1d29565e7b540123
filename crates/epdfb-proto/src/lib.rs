//! EPDC wire protocol
//!
//! C-compatible structures exchanged with the i.MX electrophoretic display
//! controller driver (`mxc_epdc_fb`) through the framebuffer device, and a
//! serialisable trace record describing each controller call.
//!
//! # Protocol Overview
//!
//! 1. **Submit**: `MXCFB_SEND_UPDATE` with an update-data struct. The layout
//!    depends on the controller generation (see [`WireUpdate`]).
//! 2. **Wait**: `MXCFB_WAIT_FOR_UPDATE_COMPLETE` with [`MxcfbUpdateMarkerData`];
//!    the driver fills `collision_test` on return.

pub mod screeninfo;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::mem;

pub use screeninfo::{Bitfield, FixScreeninfo, VarScreeninfo};

/// ioctl type byte shared by every `MXCFB_*` request.
pub const MXCFB_MAGIC: u8 = b'F';

pub const NR_SET_AUTO_UPDATE_MODE: u8 = 0x2D;
pub const NR_SEND_UPDATE: u8 = 0x2E;
pub const NR_WAIT_FOR_UPDATE_COMPLETE: u8 = 0x2F;
pub const NR_SET_UPDATE_SCHEME: u8 = 0x32;
pub const NR_DISABLE_EPDC_ACCESS: u8 = 0x35;
pub const NR_ENABLE_EPDC_ACCESS: u8 = 0x36;

pub const UPDATE_MODE_PARTIAL: u32 = 0x0;
pub const UPDATE_MODE_FULL: u32 = 0x1;

pub const UPDATE_SCHEME_SNAPSHOT: u32 = 0;
pub const UPDATE_SCHEME_QUEUE: u32 = 1;
pub const UPDATE_SCHEME_QUEUE_AND_MERGE: u32 = 2;

pub const AUTO_UPDATE_MODE_REGION_MODE: u32 = 0;
pub const AUTO_UPDATE_MODE_AUTOMATIC_MODE: u32 = 1;

pub const WAVEFORM_MODE_INIT: u32 = 0x0;
pub const WAVEFORM_MODE_DU: u32 = 0x1;
pub const WAVEFORM_MODE_GC16: u32 = 0x2;
pub const WAVEFORM_MODE_GC16_FAST: u32 = 0x3;
pub const WAVEFORM_MODE_GLR16: u32 = 0x4;
pub const WAVEFORM_MODE_GLD16: u32 = 0x5;
pub const WAVEFORM_MODE_GL16_FAST: u32 = 0x6;
pub const WAVEFORM_MODE_DU4: u32 = 0x7;
pub const WAVEFORM_MODE_REAGL: u32 = 0x8;
pub const WAVEFORM_MODE_REAGLD: u32 = 0x9;
pub const WAVEFORM_MODE_GL4: u32 = 0xA;
pub const WAVEFORM_MODE_GL16_INV: u32 = 0xB;
pub const WAVEFORM_MODE_AUTO: u32 = 0x101;

pub const TEMP_USE_REMARKABLE_DRAW: i32 = 0x0018;
pub const TEMP_USE_AMBIENT: i32 = 0x1000;
pub const TEMP_USE_PAPYRUS: i32 = 0x1001;
pub const TEMP_USE_MAX: i32 = 0xFFFF;

pub const EPDC_FLAG_ENABLE_INVERSION: u32 = 0x0001;
pub const EPDC_FLAG_FORCE_MONOCHROME: u32 = 0x0002;
pub const EPDC_FLAG_USE_CMAP: u32 = 0x0004;
pub const EPDC_FLAG_USE_ALT_BUFFER: u32 = 0x0100;
pub const EPDC_FLAG_TEST_COLLISION: u32 = 0x0200;
pub const EPDC_FLAG_GROUP_UPDATE: u32 = 0x0400;
pub const EPDC_FLAG_USE_DITHERING_Y1: u32 = 0x2000;
pub const EPDC_FLAG_USE_DITHERING_Y4: u32 = 0x4000;

pub const DITHER_PASSTHROUGH: i32 = 0x0;
pub const DITHER_DRAWING: i32 = 0x1;

/// Quantisation value observed on the stock reMarkable drawing path.
pub const DRAWING_QUANT_BIT: i32 = 0x7614_3b24;

/// `_IO(MXCFB_MAGIC, nr)`
pub const fn io(nr: u8) -> u32 {
    ((MXCFB_MAGIC as u32) << 8) | nr as u32
}

/// `_IOW(MXCFB_MAGIC, nr, size)`
pub const fn iow(nr: u8, size: usize) -> u32 {
    (1 << 30) | (((size as u32) & 0x3fff) << 16) | ((MXCFB_MAGIC as u32) << 8) | nr as u32
}

/// `_IOWR(MXCFB_MAGIC, nr, size)`
pub const fn iowr(nr: u8, size: usize) -> u32 {
    (3 << 30) | (((size as u32) & 0x3fff) << 16) | ((MXCFB_MAGIC as u32) << 8) | nr as u32
}

/// Rectangle in controller coordinates.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable, Serialize, Deserialize)]
pub struct MxcfbRect {
    pub top: u32,
    pub left: u32,
    pub width: u32,
    pub height: u32,
}

impl MxcfbRect {
    /// True when the two rectangles share at least one pixel.
    pub fn overlaps(&self, other: &MxcfbRect) -> bool {
        let right = self.left.saturating_add(self.width);
        let bottom = self.top.saturating_add(self.height);
        let other_right = other.left.saturating_add(other.width);
        let other_bottom = other.top.saturating_add(other.height);
        self.left < other_right && other.left < right && self.top < other_bottom && other.top < bottom
    }
}

/// Alternate source buffer, first-generation layout (carries a virtual address).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MxcfbAltBufferDataV1 {
    pub virt_addr: *const libc::c_void,
    pub phys_addr: u32,
    pub width: u32,
    pub height: u32,
    pub alt_update_region: MxcfbRect,
}

impl Default for MxcfbAltBufferDataV1 {
    fn default() -> Self {
        Self {
            virt_addr: std::ptr::null(),
            phys_addr: 0,
            width: 0,
            height: 0,
            alt_update_region: MxcfbRect::default(),
        }
    }
}

/// Alternate source buffer, second-generation layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MxcfbAltBufferDataV2 {
    pub phys_addr: u32,
    pub width: u32,
    pub height: u32,
    pub alt_update_region: MxcfbRect,
}

/// `struct mxcfb_update_data` for first-generation controllers.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct MxcfbUpdateDataV1 {
    pub update_region: MxcfbRect,
    pub waveform_mode: u32,
    pub update_mode: u32,
    pub update_marker: u32,
    pub temp: libc::c_int,
    pub flags: libc::c_uint,
    pub alt_buffer_data: MxcfbAltBufferDataV1,
}

/// `struct mxcfb_update_data` for second-generation controllers.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MxcfbUpdateDataV2 {
    pub update_region: MxcfbRect,
    pub waveform_mode: u32,
    pub update_mode: u32,
    pub update_marker: u32,
    pub temp: i32,
    pub flags: u32,
    pub dither_mode: i32,
    pub quant_bit: i32,
    pub alt_buffer_data: MxcfbAltBufferDataV2,
}

/// In/out argument of `MXCFB_WAIT_FOR_UPDATE_COMPLETE`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MxcfbUpdateMarkerData {
    pub update_marker: u32,
    /// Output only
    pub collision_test: u32,
}

impl MxcfbUpdateDataV2 {
    /// Size of the struct in bytes
    pub const fn size() -> usize {
        mem::size_of::<Self>()
    }
}

impl MxcfbUpdateMarkerData {
    /// Size of the struct in bytes
    pub const fn size() -> usize {
        mem::size_of::<Self>()
    }
}

/// An update request in the layout of one controller generation.
#[derive(Debug, Clone, Copy)]
pub enum WireUpdate {
    V1(MxcfbUpdateDataV1),
    V2(MxcfbUpdateDataV2),
}

impl WireUpdate {
    pub fn region(&self) -> MxcfbRect {
        match self {
            WireUpdate::V1(d) => d.update_region,
            WireUpdate::V2(d) => d.update_region,
        }
    }

    pub fn marker(&self) -> u32 {
        match self {
            WireUpdate::V1(d) => d.update_marker,
            WireUpdate::V2(d) => d.update_marker,
        }
    }

    pub fn flags(&self) -> u32 {
        match self {
            WireUpdate::V1(d) => d.flags,
            WireUpdate::V2(d) => d.flags,
        }
    }

    /// Request number of `MXCFB_SEND_UPDATE` for this layout.
    pub fn request_code(&self) -> u32 {
        match self {
            WireUpdate::V1(_) => iow(NR_SEND_UPDATE, mem::size_of::<MxcfbUpdateDataV1>()),
            WireUpdate::V2(_) => iow(NR_SEND_UPDATE, mem::size_of::<MxcfbUpdateDataV2>()),
        }
    }

    /// Decoded, layout-independent view used for tracing.
    pub fn summary(&self) -> UpdateSummary {
        match self {
            WireUpdate::V1(d) => UpdateSummary {
                region: d.update_region,
                waveform_mode: d.waveform_mode,
                update_mode: d.update_mode,
                update_marker: d.update_marker,
                temp: d.temp,
                flags: d.flags,
                dither_mode: None,
                quant_bit: None,
                alt_buffer: (d.flags & EPDC_FLAG_USE_ALT_BUFFER != 0).then_some(AltBufferSummary {
                    phys_addr: d.alt_buffer_data.phys_addr,
                    width: d.alt_buffer_data.width,
                    height: d.alt_buffer_data.height,
                    region: d.alt_buffer_data.alt_update_region,
                }),
            },
            WireUpdate::V2(d) => UpdateSummary {
                region: d.update_region,
                waveform_mode: d.waveform_mode,
                update_mode: d.update_mode,
                update_marker: d.update_marker,
                temp: d.temp,
                flags: d.flags,
                dither_mode: Some(d.dither_mode),
                quant_bit: Some(d.quant_bit),
                alt_buffer: (d.flags & EPDC_FLAG_USE_ALT_BUFFER != 0).then_some(AltBufferSummary {
                    phys_addr: d.alt_buffer_data.phys_addr,
                    width: d.alt_buffer_data.width,
                    height: d.alt_buffer_data.height,
                    region: d.alt_buffer_data.alt_update_region,
                }),
            },
        }
    }
}

/// Request number of `MXCFB_WAIT_FOR_UPDATE_COMPLETE`.
pub const fn wait_for_update_request_code() -> u32 {
    iowr(NR_WAIT_FOR_UPDATE_COMPLETE, MxcfbUpdateMarkerData::size())
}

// ============================================================================
// Call tracing
// ============================================================================

/// Layout-independent description of an update request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSummary {
    pub region: MxcfbRect,
    pub waveform_mode: u32,
    pub update_mode: u32,
    pub update_marker: u32,
    pub temp: i32,
    pub flags: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dither_mode: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quant_bit: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_buffer: Option<AltBufferSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AltBufferSummary {
    pub phys_addr: u32,
    pub width: u32,
    pub height: u32,
    pub region: MxcfbRect,
}

/// One observed controller call and its outcome.
///
/// `status` is 0 on success, otherwise the negated OS error code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call")]
pub enum IoctlTrace {
    GetVarScreeninfo {
        status: i32,
        xres: u32,
        yres: u32,
        xres_virtual: u32,
        yres_virtual: u32,
        bits_per_pixel: u32,
        rotate: u32,
    },
    PutVarScreeninfo {
        status: i32,
        xres: u32,
        yres: u32,
        rotate: u32,
    },
    GetFixScreeninfo {
        status: i32,
        id: String,
        line_length: u32,
        smem_len: u32,
    },
    SetUpdateScheme {
        status: i32,
        scheme: u32,
    },
    SetAutoUpdateMode {
        status: i32,
        mode: u32,
    },
    SetEpdcAccess {
        status: i32,
        request: u32,
        enabled: bool,
    },
    SendUpdate {
        status: i32,
        request: u32,
        update: UpdateSummary,
    },
    WaitForUpdateComplete {
        status: i32,
        request: u32,
        update_marker: u32,
        collision_test: u32,
    },
}

impl IoctlTrace {
    /// Encode as a single JSON line.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode a JSON line produced by [`IoctlTrace::to_json`].
    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }
}
