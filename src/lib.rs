//! epdfb
//!
//! Userspace access to i.MX EPDC (`mxc_epdc_fb`) e-ink framebuffers: map the
//! frame memory, draw into it, and drive the controller's update-marker
//! protocol (submit a region refresh, wait for its completion).
//!
//! ```no_run
//! use epdfb::{Color, Framebuffer, FramebufferOptions, Rect, UpdateRequest, Waveform};
//!
//! # fn main() -> epdfb::Result<()> {
//! let mut fb = Framebuffer::open("/dev/fb0", &FramebufferOptions::default())?;
//! fb.fill(Color::White);
//! let marker = fb.refresh(&UpdateRequest::full(Waveform::Init))?;
//! fb.wait_for_marker(marker)?;
//!
//! let square = Rect::new(50, 50, 100, 100);
//! fb.draw_rect(square, Color::Black);
//! let marker = fb.refresh(&UpdateRequest::partial(square, Waveform::Gc16))?;
//! let completion = fb.wait_for_marker(marker)?;
//! println!("collided: {}", completion.collided());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod epdc;
pub mod error;
pub mod framebuffer;

pub use config::Config;
pub use epdc::{AutoUpdateMode, Epdc, FbDevice, TracedEpdc, UpdateScheme};
pub use error::{FbError, Result};
pub use framebuffer::{
    AltBuffer, Color, Completion, ControllerGeneration, DisplayGeometry, Dither, DrawCorrection,
    Framebuffer, FramebufferOptions, ModeSet, PixelFormat, Rect, RegionCorrection, RetryPolicy,
    Temperature, UpdateFlags, UpdateMarker, UpdateMode, UpdateRequest, Waveform,
};
