//! The `mxc_epdc_fb` framebuffer device

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::num::NonZeroUsize;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use epdfb_proto::screeninfo::{FBIOGET_FSCREENINFO, FBIOGET_VSCREENINFO, FBIOPUT_VSCREENINFO};
use epdfb_proto::{
    FixScreeninfo, MXCFB_MAGIC, MxcfbUpdateDataV1, MxcfbUpdateDataV2, MxcfbUpdateMarkerData,
    NR_DISABLE_EPDC_ACCESS, NR_ENABLE_EPDC_ACCESS, NR_SEND_UPDATE, NR_SET_AUTO_UPDATE_MODE,
    NR_SET_UPDATE_SCHEME, NR_WAIT_FOR_UPDATE_COMPLETE, VarScreeninfo, WireUpdate,
};
use nix::sys::mman::{MapFlags, ProtFlags, mmap};
use nix::{ioctl_none, ioctl_read_bad, ioctl_readwrite, ioctl_write_ptr, ioctl_write_ptr_bad};
use tracing::{debug, info, warn};

use super::{AutoUpdateMode, Epdc, UpdateScheme};
use crate::framebuffer::mapping::FrameMapping;

ioctl_read_bad!(fbioget_vscreeninfo, FBIOGET_VSCREENINFO, VarScreeninfo);
ioctl_write_ptr_bad!(fbioput_vscreeninfo, FBIOPUT_VSCREENINFO, VarScreeninfo);
ioctl_read_bad!(fbioget_fscreeninfo, FBIOGET_FSCREENINFO, FixScreeninfo);
ioctl_write_ptr!(mxcfb_send_update_v1, MXCFB_MAGIC, NR_SEND_UPDATE, MxcfbUpdateDataV1);
ioctl_write_ptr!(mxcfb_send_update_v2, MXCFB_MAGIC, NR_SEND_UPDATE, MxcfbUpdateDataV2);
ioctl_readwrite!(
    mxcfb_wait_for_update_complete,
    MXCFB_MAGIC,
    NR_WAIT_FOR_UPDATE_COMPLETE,
    MxcfbUpdateMarkerData
);
ioctl_write_ptr!(mxcfb_set_update_scheme, MXCFB_MAGIC, NR_SET_UPDATE_SCHEME, u32);
ioctl_write_ptr!(mxcfb_set_auto_update_mode, MXCFB_MAGIC, NR_SET_AUTO_UPDATE_MODE, u32);
ioctl_none!(mxcfb_enable_epdc_access, MXCFB_MAGIC, NR_ENABLE_EPDC_ACCESS);
ioctl_none!(mxcfb_disable_epdc_access, MXCFB_MAGIC, NR_DISABLE_EPDC_ACCESS);

/// An open framebuffer device node. Closed on drop.
#[derive(Debug)]
pub struct FbDevice {
    file: File,
    path: PathBuf,
    pending: PendingWaits,
}

impl FbDevice {
    /// Open `path` (e.g. `/dev/fb0`) for reading and writing.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        info!("Opened framebuffer device {:?}", path);
        Ok(Self {
            file,
            path,
            pending: PendingWaits::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

fn wait_blocking(fd: RawFd, marker: u32) -> io::Result<u32> {
    let mut data = MxcfbUpdateMarkerData {
        update_marker: marker,
        collision_test: 0,
    };
    unsafe { mxcfb_wait_for_update_complete(fd, &mut data) }?;
    Ok(data.collision_test)
}

fn wait_thread_gone() -> io::Error {
    io::Error::other("wait thread exited without a result")
}

/// Completion waits that outlived their timeout.
///
/// The wait ioctl cannot be interrupted, so a timed-out call keeps running on
/// its helper thread. The driver answers each marker once: a later wait on the
/// same marker must collect that thread's result instead of issuing a second
/// ioctl.
#[derive(Debug, Default)]
struct PendingWaits {
    waits: Mutex<HashMap<u32, Receiver<io::Result<u32>>>>,
}

impl PendingWaits {
    fn lock(&self) -> MutexGuard<'_, HashMap<u32, Receiver<io::Result<u32>>>> {
        self.waits.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait for `marker`, running `call` only when no earlier wait on the
    /// marker is still in flight.
    fn wait<F>(&self, marker: u32, timeout: Option<Duration>, call: F) -> io::Result<u32>
    where
        F: FnOnce() -> io::Result<u32> + Send + 'static,
    {
        let pending = self.lock().remove(&marker);
        let rx = match (pending, timeout) {
            (Some(rx), _) => {
                debug!("Resuming pending wait for update {}", marker);
                rx
            }
            (None, None) => return call(),
            (None, Some(_)) => {
                let (tx, rx) = mpsc::channel();
                thread::Builder::new()
                    .name(format!("epdc-wait-{}", marker))
                    .spawn(move || {
                        let _ = tx.send(call());
                    })?;
                rx
            }
        };

        let Some(timeout) = timeout else {
            return rx.recv().unwrap_or_else(|_| Err(wait_thread_gone()));
        };
        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                self.lock().insert(marker, rx);
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("update {} still pending after {:?}", marker, timeout),
                ))
            }
            Err(RecvTimeoutError::Disconnected) => Err(wait_thread_gone()),
        }
    }
}

impl Epdc for FbDevice {
    fn var_screeninfo(&self) -> io::Result<VarScreeninfo> {
        let mut info = VarScreeninfo::default();
        unsafe { fbioget_vscreeninfo(self.fd(), &mut info) }?;
        Ok(info)
    }

    fn fix_screeninfo(&self) -> io::Result<FixScreeninfo> {
        let mut info = FixScreeninfo::default();
        unsafe { fbioget_fscreeninfo(self.fd(), &mut info) }?;
        Ok(info)
    }

    fn put_var_screeninfo(&self, info: &VarScreeninfo) -> io::Result<()> {
        unsafe { fbioput_vscreeninfo(self.fd(), info) }?;
        Ok(())
    }

    fn map_frame(&self, len: usize) -> io::Result<FrameMapping> {
        let length = NonZeroUsize::new(len)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty framebuffer"))?;
        let ptr = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &self.file,
                0,
            )
        }?;
        debug!("Mapped {} bytes of {:?} at {:p}", len, self.path, ptr);
        Ok(unsafe { FrameMapping::from_raw(ptr, len) })
    }

    fn set_update_scheme(&self, scheme: UpdateScheme) -> io::Result<()> {
        let raw = scheme.to_raw();
        unsafe { mxcfb_set_update_scheme(self.fd(), &raw) }?;
        Ok(())
    }

    fn set_auto_update_mode(&self, mode: AutoUpdateMode) -> io::Result<()> {
        let raw = mode.to_raw();
        unsafe { mxcfb_set_auto_update_mode(self.fd(), &raw) }?;
        Ok(())
    }

    fn send_update(&self, update: &WireUpdate) -> io::Result<()> {
        match update {
            WireUpdate::V1(data) => unsafe { mxcfb_send_update_v1(self.fd(), data) }?,
            WireUpdate::V2(data) => unsafe { mxcfb_send_update_v2(self.fd(), data) }?,
        };
        Ok(())
    }

    fn set_epdc_access(&self, enabled: bool) -> io::Result<()> {
        if enabled {
            unsafe { mxcfb_enable_epdc_access(self.fd()) }?;
        } else {
            unsafe { mxcfb_disable_epdc_access(self.fd()) }?;
        }
        Ok(())
    }

    fn wait_for_update(&self, marker: u32, timeout: Option<Duration>) -> io::Result<u32> {
        let file = self.file.try_clone()?;
        self.pending
            .wait(marker, timeout, move || wait_blocking(file.as_raw_fd(), marker))
    }
}

impl Drop for FbDevice {
    fn drop(&mut self) {
        let abandoned = self.pending.lock().len();
        if abandoned > 0 {
            warn!(
                "Closing {:?} with {} update waits still blocked in the driver",
                self.path, abandoned
            );
        }
    }
}
