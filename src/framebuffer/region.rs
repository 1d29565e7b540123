//! Translation of caller rectangles into the region sent to the controller

use epdfb_proto::MxcfbRect;
use serde::{Deserialize, Serialize};

use super::geometry::DisplayGeometry;

/// Rectangle in drawing coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub top: u32,
    pub left: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(top: u32, left: u32, width: u32, height: u32) -> Self {
        Self {
            top,
            left,
            width,
            height,
        }
    }

    /// Zero width and zero height: means "whole screen" when refreshing.
    pub fn is_empty(&self) -> bool {
        self.width == 0 && self.height == 0
    }
}

impl From<Rect> for MxcfbRect {
    fn from(r: Rect) -> Self {
        MxcfbRect {
            top: r.top,
            left: r.left,
            width: r.width,
            height: r.height,
        }
    }
}

impl From<MxcfbRect> for Rect {
    fn from(r: MxcfbRect) -> Self {
        Rect::new(r.top, r.left, r.width, r.height)
    }
}

/// Device-specific corrections applied on the refresh path only.
///
/// The horizontal divisor and the width scale are independent: the first
/// maps the drawing x-origin into the controller's address space, the second
/// rescales the transmitted width. Neither is a universal constant; calibrate
/// per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionCorrection {
    /// `left' = left / x_divisor` (0 is treated as 1)
    pub x_divisor: u32,
    /// `width' = width * width_scale` (0 is treated as 1)
    pub width_scale: u32,
    /// Width and height are raised to at least this many pixels before
    /// clamping. Tiny regions upset the controller's 8x8 block processing.
    pub min_dimension: u32,
}

impl Default for RegionCorrection {
    fn default() -> Self {
        Self {
            x_divisor: 2,
            width_scale: 1,
            min_dimension: 0,
        }
    }
}

impl RegionCorrection {
    /// No corrections at all.
    pub const IDENTITY: RegionCorrection = RegionCorrection {
        x_divisor: 1,
        width_scale: 1,
        min_dimension: 0,
    };

    /// Build the on-wire update region for `rect`.
    ///
    /// `None` or an empty rect selects the whole visible screen, uncorrected.
    /// Otherwise the corrections are applied, the origin is clamped into
    /// `[0, xres-1] x [0, yres-1]` and the extent truncated so the region never
    /// leaves the visible screen.
    pub fn build(&self, geometry: &DisplayGeometry, rect: Option<Rect>) -> MxcfbRect {
        let rect = match rect {
            Some(r) if !r.is_empty() => r,
            _ => return geometry.full_region(),
        };

        let left = rect.left / self.x_divisor.max(1);
        let width = rect
            .width
            .saturating_mul(self.width_scale.max(1))
            .max(self.min_dimension);
        let height = rect.height.max(self.min_dimension);

        let top = rect.top.min(geometry.yres - 1);
        let left = left.min(geometry.xres - 1);

        let width = if left.saturating_add(width) >= geometry.xres {
            geometry.xres - left
        } else {
            width
        };
        let height = if top.saturating_add(height) >= geometry.yres {
            geometry.yres - top
        } else {
            height
        };

        MxcfbRect {
            top,
            left,
            width,
            height,
        }
    }
}
