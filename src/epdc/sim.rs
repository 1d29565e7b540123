//! In-process controller simulation
//!
//! Behaves like the `mxc_epdc_fb` driver closely enough to exercise the
//! update protocol without hardware: heap frame memory, marker bookkeeping,
//! collision reporting and the blocking wait. Clones share state, so a test
//! can keep one clone to inspect while the handle owns another.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use epdfb_proto::{
    EPDC_FLAG_TEST_COLLISION, FixScreeninfo, MxcfbRect, UpdateSummary, VarScreeninfo, WireUpdate,
};
use tracing::debug;

use super::{AutoUpdateMode, Epdc, UpdateScheme};
use crate::framebuffer::mapping::FrameMapping;

/// Screen parameters reported by the simulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimGeometry {
    pub xres: u32,
    pub yres: u32,
    pub xres_virtual: u32,
    pub yres_virtual: u32,
    pub bits_per_pixel: u32,
    pub line_length: u32,
}

impl SimGeometry {
    /// Virtual area equal to the visible one, tightly packed scanlines.
    pub fn new(xres: u32, yres: u32, bits_per_pixel: u32) -> Self {
        Self {
            xres,
            yres,
            xres_virtual: xres,
            yres_virtual: yres,
            bits_per_pixel,
            line_length: xres * bits_per_pixel / 8,
        }
    }

    /// reMarkable panel: 1404x1872 visible, 1408x3840 virtual, RGB565.
    pub fn remarkable() -> Self {
        Self {
            xres: 1404,
            yres: 1872,
            xres_virtual: 1408,
            yres_virtual: 3840,
            bits_per_pixel: 16,
            line_length: 2816,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SimUpdate {
    region: MxcfbRect,
    collision: u32,
    complete: bool,
}

#[derive(Debug)]
struct SimState {
    var: VarScreeninfo,
    fix: FixScreeninfo,
    scheme: UpdateScheme,
    auto_update: AutoUpdateMode,
    epdc_access: bool,
    hold: bool,
    updates: HashMap<u32, SimUpdate>,
    submitted: Vec<UpdateSummary>,
    mode_sets: Vec<VarScreeninfo>,
    wait_calls: usize,
    failing_submissions: VecDeque<i32>,
    fail_geometry: bool,
    fail_mapping: bool,
    fail_controls: bool,
    /// One clone per live frame mapping
    mapping_lease: Arc<()>,
}

/// Simulated EPDC.
#[derive(Debug, Clone)]
pub struct SimulatedEpdc {
    shared: Arc<(Mutex<SimState>, Condvar)>,
}

impl SimulatedEpdc {
    pub fn new(geometry: SimGeometry) -> Self {
        let var = VarScreeninfo {
            xres: geometry.xres,
            yres: geometry.yres,
            xres_virtual: geometry.xres_virtual,
            yres_virtual: geometry.yres_virtual,
            bits_per_pixel: geometry.bits_per_pixel,
            ..Default::default()
        };
        let mut fix = FixScreeninfo {
            line_length: geometry.line_length,
            smem_len: geometry.line_length * geometry.yres_virtual,
            ..Default::default()
        };
        fix.id[..8].copy_from_slice(b"sim_epdc");

        let state = SimState {
            var,
            fix,
            scheme: UpdateScheme::QueueAndMerge,
            auto_update: AutoUpdateMode::Region,
            epdc_access: true,
            hold: false,
            updates: HashMap::new(),
            submitted: Vec::new(),
            mode_sets: Vec::new(),
            wait_calls: 0,
            failing_submissions: VecDeque::new(),
            fail_geometry: false,
            fail_mapping: false,
            fail_controls: false,
            mapping_lease: Arc::new(()),
        };
        Self {
            shared: Arc::new((Mutex::new(state), Condvar::new())),
        }
    }

    pub fn remarkable() -> Self {
        Self::new(SimGeometry::remarkable())
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.shared.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// While held, accepted updates stay in flight until [`complete_all`].
    ///
    /// [`complete_all`]: SimulatedEpdc::complete_all
    pub fn hold_completions(&self, hold: bool) {
        self.state().hold = hold;
    }

    /// Finish drawing every in-flight update.
    pub fn complete_all(&self) {
        let mut state = self.state();
        for update in state.updates.values_mut() {
            update.complete = true;
        }
        drop(state);
        self.shared.1.notify_all();
    }

    /// Reject the next `count` submissions with OS error `errno`.
    pub fn fail_next_submissions(&self, count: usize, errno: i32) {
        self.state().failing_submissions.extend(std::iter::repeat_n(errno, count));
    }

    pub fn fail_geometry_queries(&self, fail: bool) {
        self.state().fail_geometry = fail;
    }

    pub fn fail_mapping(&self, fail: bool) {
        self.state().fail_mapping = fail;
    }

    /// Reject update scheme, auto-update mode and EPDC access changes.
    pub fn fail_controls(&self, fail: bool) {
        self.state().fail_controls = fail;
    }

    /// Frame mappings handed out and not yet released.
    pub fn live_mappings(&self) -> usize {
        Arc::strong_count(&self.state().mapping_lease) - 1
    }

    /// Every request that reached the controller, in order.
    pub fn submitted(&self) -> Vec<UpdateSummary> {
        self.state().submitted.clone()
    }

    /// Number of `MXCFB_WAIT_FOR_UPDATE_COMPLETE` calls received.
    pub fn wait_calls(&self) -> usize {
        self.state().wait_calls
    }

    /// Screen info written through `FBIOPUT_VSCREENINFO`.
    pub fn mode_sets(&self) -> Vec<VarScreeninfo> {
        self.state().mode_sets.clone()
    }

    pub fn scheme(&self) -> UpdateScheme {
        self.state().scheme
    }

    pub fn auto_update_mode(&self) -> AutoUpdateMode {
        self.state().auto_update
    }

    pub fn epdc_access(&self) -> bool {
        self.state().epdc_access
    }

    /// Updates accepted but not yet drawn.
    pub fn in_flight(&self) -> usize {
        self.state().updates.values().filter(|u| !u.complete).count()
    }
}

impl Epdc for SimulatedEpdc {
    fn var_screeninfo(&self) -> io::Result<VarScreeninfo> {
        let state = self.state();
        if state.fail_geometry {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        Ok(state.var)
    }

    fn fix_screeninfo(&self) -> io::Result<FixScreeninfo> {
        let state = self.state();
        if state.fail_geometry {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        Ok(state.fix)
    }

    fn put_var_screeninfo(&self, info: &VarScreeninfo) -> io::Result<()> {
        let mut state = self.state();
        state.mode_sets.push(*info);
        state.var = *info;
        Ok(())
    }

    fn map_frame(&self, len: usize) -> io::Result<FrameMapping> {
        let state = self.state();
        if state.fail_mapping {
            return Err(io::Error::from_raw_os_error(libc::ENOMEM));
        }
        Ok(FrameMapping::heap_leased(len, state.mapping_lease.clone()))
    }

    fn set_update_scheme(&self, scheme: UpdateScheme) -> io::Result<()> {
        let mut state = self.state();
        if state.fail_controls {
            return Err(io::Error::from_raw_os_error(libc::EPERM));
        }
        state.scheme = scheme;
        Ok(())
    }

    fn set_auto_update_mode(&self, mode: AutoUpdateMode) -> io::Result<()> {
        let mut state = self.state();
        if state.fail_controls {
            return Err(io::Error::from_raw_os_error(libc::EPERM));
        }
        state.auto_update = mode;
        Ok(())
    }

    fn set_epdc_access(&self, enabled: bool) -> io::Result<()> {
        let mut state = self.state();
        if state.fail_controls {
            return Err(io::Error::from_raw_os_error(libc::EPERM));
        }
        state.epdc_access = enabled;
        Ok(())
    }

    fn send_update(&self, update: &WireUpdate) -> io::Result<()> {
        let mut state = self.state();
        if let Some(errno) = state.failing_submissions.pop_front() {
            return Err(io::Error::from_raw_os_error(errno));
        }

        let region = update.region();
        let marker = update.marker();

        // Snapshot copies the buffer per update, so nothing can collide.
        let collision = match state.scheme {
            UpdateScheme::Snapshot => 0,
            UpdateScheme::Queue | UpdateScheme::QueueAndMerge => state
                .updates
                .values()
                .any(|u| !u.complete && u.region.overlaps(&region))
                as u32,
        };

        // Collision test: report the result, draw nothing.
        let dry_run = update.flags() & EPDC_FLAG_TEST_COLLISION != 0;
        let complete = dry_run || !state.hold;

        debug!(
            "sim: accepted marker {} region {:?} collision {} dry_run {}",
            marker, region, collision, dry_run
        );
        state.submitted.push(update.summary());
        if marker != 0 {
            state.updates.insert(
                marker,
                SimUpdate {
                    region,
                    collision,
                    complete,
                },
            );
        }
        drop(state);
        self.shared.1.notify_all();
        Ok(())
    }

    fn wait_for_update(&self, marker: u32, timeout: Option<Duration>) -> io::Result<u32> {
        let (lock, cvar) = &*self.shared;
        let mut state = lock.lock().unwrap_or_else(|e| e.into_inner());
        state.wait_calls += 1;

        if !state.updates.contains_key(&marker) {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }

        let pending =
            |s: &mut SimState| s.updates.get(&marker).is_some_and(|u| !u.complete);
        let mut state = match timeout {
            None => cvar.wait_while(state, pending).unwrap_or_else(|e| e.into_inner()),
            Some(timeout) => {
                let (state, result) = cvar
                    .wait_timeout_while(state, timeout, pending)
                    .unwrap_or_else(|e| e.into_inner());
                if result.timed_out() {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("update {} still pending", marker),
                    ));
                }
                state
            }
        };

        match state.updates.remove(&marker) {
            Some(update) => Ok(update.collision),
            None => Err(io::Error::from_raw_os_error(libc::EINVAL)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epdfb_proto::{MxcfbUpdateDataV2, UPDATE_MODE_PARTIAL};

    fn update(marker: u32, region: MxcfbRect, flags: u32) -> WireUpdate {
        WireUpdate::V2(MxcfbUpdateDataV2 {
            update_region: region,
            update_mode: UPDATE_MODE_PARTIAL,
            update_marker: marker,
            flags,
            ..Default::default()
        })
    }

    const A: MxcfbRect = MxcfbRect {
        top: 0,
        left: 0,
        width: 300,
        height: 250,
    };
    const B: MxcfbRect = MxcfbRect {
        top: 200,
        left: 250,
        width: 300,
        height: 250,
    };

    #[test]
    fn test_unknown_marker_is_einval() {
        let sim = SimulatedEpdc::remarkable();
        let err = sim.wait_for_update(42, None).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
        assert_eq!(sim.wait_calls(), 1);
    }

    #[test]
    fn test_overlap_collides_only_while_in_flight() {
        let sim = SimulatedEpdc::remarkable();
        sim.hold_completions(true);
        sim.send_update(&update(1, A, 0)).unwrap();
        sim.send_update(&update(2, B, 0)).unwrap();
        assert_eq!(sim.in_flight(), 2);

        sim.complete_all();
        assert_eq!(sim.wait_for_update(1, None).unwrap(), 0);
        assert_eq!(sim.wait_for_update(2, None).unwrap(), 1);

        sim.send_update(&update(3, A, 0)).unwrap();
        sim.complete_all();
        assert_eq!(sim.wait_for_update(3, None).unwrap(), 0);
    }

    #[test]
    fn test_snapshot_never_collides() {
        let sim = SimulatedEpdc::remarkable();
        sim.set_update_scheme(UpdateScheme::Snapshot).unwrap();
        sim.hold_completions(true);
        sim.send_update(&update(1, A, 0)).unwrap();
        sim.send_update(&update(2, A, 0)).unwrap();
        sim.complete_all();
        assert_eq!(sim.wait_for_update(2, None).unwrap(), 0);
    }

    #[test]
    fn test_collision_dry_run_does_not_queue() {
        let sim = SimulatedEpdc::remarkable();
        sim.hold_completions(true);
        sim.send_update(&update(1, A, 0)).unwrap();
        sim.send_update(&update(2, B, EPDC_FLAG_TEST_COLLISION)).unwrap();

        assert_eq!(sim.in_flight(), 1);
        assert_eq!(sim.wait_for_update(2, Some(Duration::from_millis(10))).unwrap(), 1);
    }

    #[test]
    fn test_held_update_times_out() {
        let sim = SimulatedEpdc::remarkable();
        sim.hold_completions(true);
        sim.send_update(&update(1, A, 0)).unwrap();

        let err = sim.wait_for_update(1, Some(Duration::from_millis(20))).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_wait_wakes_on_completion() {
        let sim = SimulatedEpdc::remarkable();
        sim.hold_completions(true);
        sim.send_update(&update(1, A, 0)).unwrap();

        let waiter = sim.clone();
        let handle = std::thread::spawn(move || waiter.wait_for_update(1, Some(Duration::from_secs(5))));
        std::thread::sleep(Duration::from_millis(20));
        sim.complete_all();

        assert_eq!(handle.join().unwrap().unwrap(), 0);
    }

    #[test]
    fn test_controls_and_mapping_lease() {
        let sim = SimulatedEpdc::remarkable();
        sim.set_epdc_access(false).unwrap();
        assert!(!sim.epdc_access());

        let frame = sim.map_frame(64).unwrap();
        assert_eq!(sim.live_mappings(), 1);
        drop(frame);
        assert_eq!(sim.live_mappings(), 0);

        sim.fail_controls(true);
        let err = sim.set_epdc_access(true).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EPERM));
        assert!(sim.set_update_scheme(UpdateScheme::Queue).is_err());
        assert!(!sim.epdc_access());
        assert_eq!(sim.scheme(), UpdateScheme::QueueAndMerge);
    }

    #[test]
    fn test_injected_submission_failure() {
        let sim = SimulatedEpdc::remarkable();
        sim.fail_next_submissions(1, libc::EBUSY);

        let err = sim.send_update(&update(1, A, 0)).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBUSY));
        assert!(sim.submitted().is_empty());
        assert!(sim.send_update(&update(1, A, 0)).is_ok());
    }
}
