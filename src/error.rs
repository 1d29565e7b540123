//! Error type for framebuffer and controller operations

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::framebuffer::ControllerGeneration;

pub type Result<T> = std::result::Result<T, FbError>;

#[derive(Debug, thiserror::Error)]
pub enum FbError {
    /// The device node could not be opened read-write.
    #[error("failed to open framebuffer device {path:?}")]
    DeviceOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A screen-info ioctl failed or returned an unusable geometry.
    #[error("failed to query display geometry ({what})")]
    GeometryQuery {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to map {len} bytes of framebuffer memory")]
    Mapping {
        len: usize,
        #[source]
        source: io::Error,
    },

    #[error("FBIOPUT_VSCREENINFO failed")]
    ModeSet {
        #[source]
        source: io::Error,
    },

    /// A controller setting (update scheme, auto-update mode) was rejected.
    #[error("controller rejected {op}")]
    Control {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("write of {len} bytes at offset {offset} exceeds the {mapped} byte mapping")]
    OutOfBounds {
        offset: usize,
        len: usize,
        mapped: usize,
    },

    /// The controller refused the update, typically because it is out of
    /// update slots. Callers may retry after a backoff.
    #[error("controller rejected update {marker}")]
    Submission {
        marker: u32,
        #[source]
        source: io::Error,
    },

    #[error("waiting for update {marker} failed")]
    Wait {
        marker: u32,
        #[source]
        source: io::Error,
    },

    #[error("update marker {0} was never submitted or was already waited on")]
    InvalidMarker(u32),

    #[error("update {marker} did not complete within {timeout:?}")]
    Timeout { marker: u32, timeout: Duration },

    #[error("{feature} is not supported by {generation:?} controllers")]
    Unsupported {
        feature: &'static str,
        generation: ControllerGeneration,
    },
}

impl FbError {
    /// Raw OS error code reported by the platform call, if any.
    pub fn os_error(&self) -> Option<i32> {
        match self {
            FbError::DeviceOpen { source, .. }
            | FbError::GeometryQuery { source, .. }
            | FbError::Mapping { source, .. }
            | FbError::ModeSet { source }
            | FbError::Control { source, .. }
            | FbError::Submission { source, .. }
            | FbError::Wait { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// Whether a caller-side retry of the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FbError::Submission { .. })
    }
}
