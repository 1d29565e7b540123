//! Framebuffer handle
//!
//! Owns the open device, the mapped pixel memory and the geometry queried at
//! open time. Pixel access lives in [`surface`], update submission and
//! completion in [`refresh`].

pub mod geometry;
pub mod mapping;
pub mod refresh;
pub mod region;
pub mod surface;

use std::path::Path;
use std::time::Duration;

use epdfb_proto::VarScreeninfo;
use epdfb_proto::screeninfo::FB_VMODE_NONINTERLACED;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::epdc::{AutoUpdateMode, Epdc, FbDevice, TracedEpdc, UpdateScheme};
use crate::error::{FbError, Result};

pub use geometry::{DisplayGeometry, PixelFormat};
pub use mapping::FrameMapping;
pub use refresh::{
    AltBuffer, Completion, ControllerGeneration, Dither, RetryPolicy, Temperature, UpdateFlags,
    UpdateMarker, UpdateMode, UpdateRequest, Waveform,
};
pub use region::{Rect, RegionCorrection};
pub use surface::{Color, DrawCorrection};

/// One-time display mode written with `FBIOPUT_VSCREENINFO` before the
/// geometry is queried. Unset fields keep the device's current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeSet {
    pub xres: Option<u32>,
    pub yres: Option<u32>,
    pub rotate: Option<u32>,
    /// Pixel clock in picoseconds
    pub pixclock: Option<u32>,
    pub left_margin: Option<u32>,
    pub right_margin: Option<u32>,
    pub upper_margin: Option<u32>,
    pub lower_margin: Option<u32>,
    pub hsync_len: Option<u32>,
    pub vsync_len: Option<u32>,
    pub sync: Option<u32>,
}

impl ModeSet {
    fn apply(&self, var: &mut VarScreeninfo) {
        let set = |field: &mut u32, value: Option<u32>| {
            if let Some(v) = value {
                *field = v;
            }
        };
        set(&mut var.xres, self.xres);
        set(&mut var.yres, self.yres);
        set(&mut var.rotate, self.rotate);
        set(&mut var.pixclock, self.pixclock);
        set(&mut var.left_margin, self.left_margin);
        set(&mut var.right_margin, self.right_margin);
        set(&mut var.upper_margin, self.upper_margin);
        set(&mut var.lower_margin, self.lower_margin);
        set(&mut var.hsync_len, self.hsync_len);
        set(&mut var.vsync_len, self.vsync_len);
        set(&mut var.sync, self.sync);
        var.vmode = FB_VMODE_NONINTERLACED;
        var.accel_flags = 0;
    }
}

/// Settings applied when a handle is created.
#[derive(Debug, Clone, Default)]
pub struct FramebufferOptions {
    pub generation: ControllerGeneration,
    pub region: RegionCorrection,
    pub draw: DrawCorrection,
    /// Default timeout of [`Framebuffer::wait_for_marker`]; `None` blocks
    /// until the controller answers.
    pub wait_timeout: Option<Duration>,
    pub update_scheme: Option<UpdateScheme>,
    pub auto_update_mode: Option<AutoUpdateMode>,
    pub mode_set: Option<ModeSet>,
}

/// An open, mapped EPDC framebuffer.
///
/// Not internally synchronised: share between threads behind a `Mutex`.
pub struct Framebuffer<D: Epdc = FbDevice> {
    // Field order is drop order: the mapping goes before the device closes.
    frame: FrameMapping,
    device: D,
    geometry: DisplayGeometry,
    generation: ControllerGeneration,
    region: RegionCorrection,
    draw: DrawCorrection,
    wait_timeout: Option<Duration>,
    markers: refresh::MarkerLedger,
}

impl Framebuffer<FbDevice> {
    /// Open the device at `path`, query its geometry and map its memory.
    pub fn open(path: impl AsRef<Path>, options: &FramebufferOptions) -> Result<Self> {
        let device = open_device(path.as_ref())?;
        Self::with_device(device, options)
    }
}

impl Framebuffer<TracedEpdc<FbDevice>> {
    /// Like [`Framebuffer::open`], logging every controller call.
    pub fn open_traced(path: impl AsRef<Path>, options: &FramebufferOptions) -> Result<Self> {
        let device = open_device(path.as_ref())?;
        Self::with_device(TracedEpdc::new(device), options)
    }
}

fn open_device(path: &Path) -> Result<FbDevice> {
    FbDevice::open(path).map_err(|source| FbError::DeviceOpen {
        path: path.to_path_buf(),
        source,
    })
}

impl<D: Epdc> Framebuffer<D> {
    /// Build a handle on top of an already opened controller.
    ///
    /// On error everything acquired so far (mapping, then device) is released
    /// before returning.
    pub fn with_device(device: D, options: &FramebufferOptions) -> Result<Self> {
        if let Some(mode_set) = &options.mode_set {
            let mut var = device
                .var_screeninfo()
                .map_err(|source| FbError::GeometryQuery {
                    what: "FBIOGET_VSCREENINFO",
                    source,
                })?;
            mode_set.apply(&mut var);
            device
                .put_var_screeninfo(&var)
                .map_err(|source| FbError::ModeSet { source })?;
            info!(
                "Mode set: {}x{} rotate {}",
                var.xres, var.yres, var.rotate
            );
        }

        let var = device
            .var_screeninfo()
            .map_err(|source| FbError::GeometryQuery {
                what: "FBIOGET_VSCREENINFO",
                source,
            })?;
        let fix = device
            .fix_screeninfo()
            .map_err(|source| FbError::GeometryQuery {
                what: "FBIOGET_FSCREENINFO",
                source,
            })?;
        let geometry = DisplayGeometry::from_screeninfo(&var, &fix)?;
        debug!("Geometry: {:?} (driver {:?})", geometry, fix.id_str());

        let len = geometry.frame_len();
        let frame = device
            .map_frame(len)
            .map_err(|source| FbError::Mapping { len, source })?;

        if let Some(scheme) = options.update_scheme {
            device
                .set_update_scheme(scheme)
                .map_err(|source| FbError::Control {
                    op: "MXCFB_SET_UPDATE_SCHEME",
                    source,
                })?;
            debug!("Update scheme set to {:?}", scheme);
        }
        if let Some(mode) = options.auto_update_mode {
            device
                .set_auto_update_mode(mode)
                .map_err(|source| FbError::Control {
                    op: "MXCFB_SET_AUTO_UPDATE_MODE",
                    source,
                })?;
            debug!("Auto-update mode set to {:?}", mode);
        }

        info!(
            "Framebuffer ready: {}x{} (virtual {}x{}), {} bpp, stride {}, {:?} controller",
            geometry.xres,
            geometry.yres,
            geometry.xres_virtual,
            geometry.yres_virtual,
            geometry.bits_per_pixel,
            geometry.line_length,
            options.generation
        );

        Ok(Self {
            frame,
            device,
            geometry,
            generation: options.generation,
            region: options.region,
            draw: options.draw,
            wait_timeout: options.wait_timeout,
            markers: refresh::MarkerLedger::new(),
        })
    }

    /// Unmap the frame, then close the device.
    pub fn close(self) -> Result<()> {
        let Self { frame, device, .. } = self;
        let len = frame.len();
        let unmapped = frame
            .unmap()
            .map_err(|source| FbError::Mapping { len, source });
        drop(device);
        info!("Framebuffer closed");
        unmapped
    }

    pub fn geometry(&self) -> &DisplayGeometry {
        &self.geometry
    }

    pub fn generation(&self) -> ControllerGeneration {
        self.generation
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn region_correction(&self) -> RegionCorrection {
        self.region
    }

    pub fn set_region_correction(&mut self, region: RegionCorrection) {
        self.region = region;
    }

    pub fn set_wait_timeout(&mut self, timeout: Option<Duration>) {
        self.wait_timeout = timeout;
    }

    pub fn set_update_scheme(&mut self, scheme: UpdateScheme) -> Result<()> {
        self.device
            .set_update_scheme(scheme)
            .map_err(|source| FbError::Control {
                op: "MXCFB_SET_UPDATE_SCHEME",
                source,
            })
    }

    pub fn set_auto_update_mode(&mut self, mode: AutoUpdateMode) -> Result<()> {
        self.device
            .set_auto_update_mode(mode)
            .map_err(|source| FbError::Control {
                op: "MXCFB_SET_AUTO_UPDATE_MODE",
                source,
            })
    }

    /// Hand the panel to the EPDC (`true`) or take it away (`false`).
    pub fn set_epdc_access(&mut self, enabled: bool) -> Result<()> {
        let op = if enabled {
            "MXCFB_ENABLE_EPDC_ACCESS"
        } else {
            "MXCFB_DISABLE_EPDC_ACCESS"
        };
        self.device
            .set_epdc_access(enabled)
            .map_err(|source| FbError::Control { op, source })?;
        debug!("EPDC access {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }
}

impl<D: Epdc> std::fmt::Debug for Framebuffer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framebuffer")
            .field("geometry", &self.geometry)
            .field("generation", &self.generation)
            .field("frame", &self.frame)
            .field("next_marker", &self.markers.peek_next())
            .finish()
    }
}
