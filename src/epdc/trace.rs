//! Call tracing for controller backends
//!
//! Wraps any [`Epdc`] and reports each platform call, decoded, as a
//! structured `tracing` event under the `epdfb::ioctl` target. This replaces
//! preloading an interposer into a running program to spy on its ioctls.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use epdfb_proto::{
    FixScreeninfo, IoctlTrace, NR_DISABLE_EPDC_ACCESS, NR_ENABLE_EPDC_ACCESS, VarScreeninfo,
    WireUpdate, wait_for_update_request_code,
};
use tracing::{debug, warn};

use super::{AutoUpdateMode, Epdc, UpdateScheme};
use crate::framebuffer::mapping::FrameMapping;

fn status<T>(result: &io::Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => -e.raw_os_error().unwrap_or(libc::EIO),
    }
}

/// Logging decorator around a controller backend.
#[derive(Debug)]
pub struct TracedEpdc<D> {
    inner: D,
    history: Option<Arc<Mutex<Vec<IoctlTrace>>>>,
}

impl<D: Epdc> TracedEpdc<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            history: None,
        }
    }

    /// Also keep every trace record in memory, shared with the returned handle.
    pub fn with_history(inner: D) -> (Self, Arc<Mutex<Vec<IoctlTrace>>>) {
        let history = Arc::new(Mutex::new(Vec::new()));
        let traced = Self {
            inner,
            history: Some(history.clone()),
        };
        (traced, history)
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    fn record(&self, trace: IoctlTrace) {
        match trace.to_json() {
            Ok(json) => debug!(target: "epdfb::ioctl", "{}", json),
            Err(e) => warn!(target: "epdfb::ioctl", "Failed to encode trace: {}", e),
        }
        if let Some(history) = &self.history {
            history.lock().unwrap_or_else(|e| e.into_inner()).push(trace);
        }
    }
}

impl<D: Epdc> Epdc for TracedEpdc<D> {
    fn var_screeninfo(&self) -> io::Result<VarScreeninfo> {
        let result = self.inner.var_screeninfo();
        let info = result.as_ref().copied().unwrap_or_default();
        self.record(IoctlTrace::GetVarScreeninfo {
            status: status(&result),
            xres: info.xres,
            yres: info.yres,
            xres_virtual: info.xres_virtual,
            yres_virtual: info.yres_virtual,
            bits_per_pixel: info.bits_per_pixel,
            rotate: info.rotate,
        });
        result
    }

    fn fix_screeninfo(&self) -> io::Result<FixScreeninfo> {
        let result = self.inner.fix_screeninfo();
        let info = result.as_ref().copied().unwrap_or_default();
        self.record(IoctlTrace::GetFixScreeninfo {
            status: status(&result),
            id: info.id_str(),
            line_length: info.line_length,
            smem_len: info.smem_len,
        });
        result
    }

    fn put_var_screeninfo(&self, info: &VarScreeninfo) -> io::Result<()> {
        let result = self.inner.put_var_screeninfo(info);
        self.record(IoctlTrace::PutVarScreeninfo {
            status: status(&result),
            xres: info.xres,
            yres: info.yres,
            rotate: info.rotate,
        });
        result
    }

    fn map_frame(&self, len: usize) -> io::Result<FrameMapping> {
        self.inner.map_frame(len)
    }

    fn set_update_scheme(&self, scheme: UpdateScheme) -> io::Result<()> {
        let result = self.inner.set_update_scheme(scheme);
        self.record(IoctlTrace::SetUpdateScheme {
            status: status(&result),
            scheme: scheme.to_raw(),
        });
        result
    }

    fn set_auto_update_mode(&self, mode: AutoUpdateMode) -> io::Result<()> {
        let result = self.inner.set_auto_update_mode(mode);
        self.record(IoctlTrace::SetAutoUpdateMode {
            status: status(&result),
            mode: mode.to_raw(),
        });
        result
    }

    fn set_epdc_access(&self, enabled: bool) -> io::Result<()> {
        let result = self.inner.set_epdc_access(enabled);
        let nr = if enabled {
            NR_ENABLE_EPDC_ACCESS
        } else {
            NR_DISABLE_EPDC_ACCESS
        };
        self.record(IoctlTrace::SetEpdcAccess {
            status: status(&result),
            request: epdfb_proto::io(nr),
            enabled,
        });
        result
    }

    fn send_update(&self, update: &WireUpdate) -> io::Result<()> {
        let result = self.inner.send_update(update);
        self.record(IoctlTrace::SendUpdate {
            status: status(&result),
            request: update.request_code(),
            update: update.summary(),
        });
        result
    }

    fn wait_for_update(&self, marker: u32, timeout: Option<Duration>) -> io::Result<u32> {
        let result = self.inner.wait_for_update(marker, timeout);
        self.record(IoctlTrace::WaitForUpdateComplete {
            status: status(&result),
            request: wait_for_update_request_code(),
            update_marker: marker,
            collision_test: *result.as_ref().unwrap_or(&0),
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epdc::sim::SimulatedEpdc;
    use epdfb_proto::MxcfbUpdateDataV2;

    #[test]
    fn test_records_submit_and_wait() {
        let (traced, history) = TracedEpdc::with_history(SimulatedEpdc::remarkable());

        let update = WireUpdate::V2(MxcfbUpdateDataV2 {
            update_marker: 5,
            ..Default::default()
        });
        traced.send_update(&update).unwrap();
        traced.wait_for_update(5, None).unwrap();
        assert!(traced.wait_for_update(6, None).is_err());

        let history = history.lock().unwrap();
        assert_eq!(history.len(), 3);
        match &history[0] {
            IoctlTrace::SendUpdate { status, request, update } => {
                assert_eq!(*status, 0);
                assert_eq!(*request, 0x4048_462E);
                assert_eq!(update.update_marker, 5);
            }
            other => panic!("unexpected trace {:?}", other),
        }
        match &history[2] {
            IoctlTrace::WaitForUpdateComplete { status, update_marker, .. } => {
                assert_eq!(*status, -libc::EINVAL);
                assert_eq!(*update_marker, 6);
            }
            other => panic!("unexpected trace {:?}", other),
        }
    }

    #[test]
    fn test_records_epdc_access() {
        let (traced, history) = TracedEpdc::with_history(SimulatedEpdc::remarkable());
        traced.set_epdc_access(false).unwrap();
        assert!(!traced.inner().epdc_access());

        let history = history.lock().unwrap();
        assert_eq!(
            history[0],
            IoctlTrace::SetEpdcAccess {
                status: 0,
                request: 0x4635,
                enabled: false,
            }
        );
    }

    #[test]
    fn test_failed_query_is_traced() {
        let sim = SimulatedEpdc::remarkable();
        sim.fail_geometry_queries(true);
        let (traced, history) = TracedEpdc::with_history(sim);

        assert!(traced.var_screeninfo().is_err());
        let history = history.lock().unwrap();
        assert!(matches!(
            history[0],
            IoctlTrace::GetVarScreeninfo { status, xres: 0, .. } if status == -libc::EIO
        ));
    }
}
