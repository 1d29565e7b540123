//! Controller backends
//!
//! [`Epdc`] is the seam between the framebuffer handle and the platform: the
//! real `mxc_epdc_fb` device ([`FbDevice`]), an in-process simulation
//! ([`sim::SimulatedEpdc`]) and a logging decorator ([`TracedEpdc`]).

pub mod device;
pub mod sim;
pub mod trace;

use std::io;
use std::time::Duration;

use epdfb_proto::{
    AUTO_UPDATE_MODE_AUTOMATIC_MODE, AUTO_UPDATE_MODE_REGION_MODE, FixScreeninfo,
    UPDATE_SCHEME_QUEUE, UPDATE_SCHEME_QUEUE_AND_MERGE, UPDATE_SCHEME_SNAPSHOT, VarScreeninfo,
    WireUpdate,
};
use serde::{Deserialize, Serialize};

use crate::framebuffer::mapping::FrameMapping;

pub use device::FbDevice;
pub use trace::TracedEpdc;

/// How the controller handles overlapping in-flight updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateScheme {
    /// Each update snapshots the buffer at submission time
    Snapshot,
    /// Updates are queued and processed in order
    Queue,
    /// Queued updates with overlapping regions may be merged
    QueueAndMerge,
}

impl UpdateScheme {
    pub fn to_raw(self) -> u32 {
        match self {
            UpdateScheme::Snapshot => UPDATE_SCHEME_SNAPSHOT,
            UpdateScheme::Queue => UPDATE_SCHEME_QUEUE,
            UpdateScheme::QueueAndMerge => UPDATE_SCHEME_QUEUE_AND_MERGE,
        }
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            UPDATE_SCHEME_SNAPSHOT => Some(UpdateScheme::Snapshot),
            UPDATE_SCHEME_QUEUE => Some(UpdateScheme::Queue),
            UPDATE_SCHEME_QUEUE_AND_MERGE => Some(UpdateScheme::QueueAndMerge),
            _ => None,
        }
    }
}

/// Whether the controller refreshes on its own when memory changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoUpdateMode {
    /// Only explicit `MXCFB_SEND_UPDATE` requests are drawn
    Region,
    Automatic,
}

impl AutoUpdateMode {
    pub fn to_raw(self) -> u32 {
        match self {
            AutoUpdateMode::Region => AUTO_UPDATE_MODE_REGION_MODE,
            AutoUpdateMode::Automatic => AUTO_UPDATE_MODE_AUTOMATIC_MODE,
        }
    }
}

/// Platform calls needed by a framebuffer handle.
///
/// Implementations are not required to be thread-safe beyond `Send`; the
/// handle serialises access through `&mut self`.
pub trait Epdc: Send {
    /// `FBIOGET_VSCREENINFO`
    fn var_screeninfo(&self) -> io::Result<VarScreeninfo>;

    /// `FBIOGET_FSCREENINFO`
    fn fix_screeninfo(&self) -> io::Result<FixScreeninfo>;

    /// `FBIOPUT_VSCREENINFO`
    fn put_var_screeninfo(&self, info: &VarScreeninfo) -> io::Result<()>;

    /// Map `len` bytes of frame memory read-write at offset 0.
    fn map_frame(&self, len: usize) -> io::Result<FrameMapping>;

    /// `MXCFB_SET_UPDATE_SCHEME`
    fn set_update_scheme(&self, scheme: UpdateScheme) -> io::Result<()>;

    /// `MXCFB_SET_AUTO_UPDATE_MODE`
    fn set_auto_update_mode(&self, mode: AutoUpdateMode) -> io::Result<()>;

    /// `MXCFB_ENABLE_EPDC_ACCESS` / `MXCFB_DISABLE_EPDC_ACCESS`
    fn set_epdc_access(&self, enabled: bool) -> io::Result<()>;

    /// `MXCFB_SEND_UPDATE`. Returns as soon as the controller accepted the
    /// request; drawing continues asynchronously.
    fn send_update(&self, update: &WireUpdate) -> io::Result<()>;

    /// `MXCFB_WAIT_FOR_UPDATE_COMPLETE`. Blocks until `marker` is drawn and
    /// returns the collision word. With a timeout, fails with
    /// [`io::ErrorKind::TimedOut`] once it elapses.
    fn wait_for_update(&self, marker: u32, timeout: Option<Duration>) -> io::Result<u32>;
}
