//! Refresh submission and completion wait
//!
//! A refresh turns an [`UpdateRequest`] into the controller's on-wire layout,
//! tags it with a fresh marker and hands it to the controller without waiting
//! for the drawing to finish. [`Framebuffer::wait_for_marker`] is the only
//! blocking call.

use std::collections::VecDeque;
use std::io;
use std::thread;
use std::time::Duration;

use bitflags::bitflags;
use epdfb_proto::{
    DITHER_DRAWING, DITHER_PASSTHROUGH, DRAWING_QUANT_BIT, EPDC_FLAG_ENABLE_INVERSION,
    EPDC_FLAG_FORCE_MONOCHROME, EPDC_FLAG_GROUP_UPDATE, EPDC_FLAG_TEST_COLLISION,
    EPDC_FLAG_USE_ALT_BUFFER, EPDC_FLAG_USE_CMAP, EPDC_FLAG_USE_DITHERING_Y1,
    EPDC_FLAG_USE_DITHERING_Y4, MxcfbAltBufferDataV1, MxcfbAltBufferDataV2, MxcfbUpdateDataV1,
    MxcfbUpdateDataV2, TEMP_USE_AMBIENT, TEMP_USE_MAX, TEMP_USE_PAPYRUS,
    TEMP_USE_REMARKABLE_DRAW, UPDATE_MODE_FULL, UPDATE_MODE_PARTIAL, WAVEFORM_MODE_AUTO,
    WAVEFORM_MODE_DU, WAVEFORM_MODE_DU4, WAVEFORM_MODE_GC16, WAVEFORM_MODE_GC16_FAST,
    WAVEFORM_MODE_GL4, WAVEFORM_MODE_GL16_FAST, WAVEFORM_MODE_GL16_INV, WAVEFORM_MODE_GLD16,
    WAVEFORM_MODE_GLR16, WAVEFORM_MODE_INIT, WAVEFORM_MODE_REAGL, WAVEFORM_MODE_REAGLD,
    WireUpdate,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::Framebuffer;
use super::region::Rect;
use crate::epdc::Epdc;
use crate::error::{FbError, Result};

/// On-wire layout spoken by the controller driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerGeneration {
    /// Alt buffer carries a virtual address; no dither fields
    V1,
    /// Dither mode and quant bit; alt buffer without a virtual address
    #[default]
    V2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Redraw only the region
    Partial,
    /// Flash the whole region to clear ghosting
    Full,
}

impl UpdateMode {
    pub fn to_raw(self) -> u32 {
        match self {
            UpdateMode::Partial => UPDATE_MODE_PARTIAL,
            UpdateMode::Full => UPDATE_MODE_FULL,
        }
    }
}

/// Grey-level transition curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Waveform {
    Init,
    /// Direct update, monochrome and fast
    Du,
    /// 16 grey levels, full fidelity
    Gc16,
    Gc16Fast,
    Glr16,
    Gld16,
    Gl16Fast,
    Du4,
    Reagl,
    Reagld,
    Gl4,
    Gl16Inv,
    /// Let the controller pick
    Auto,
    Other(u32),
}

impl Waveform {
    pub fn to_raw(self) -> u32 {
        match self {
            Waveform::Init => WAVEFORM_MODE_INIT,
            Waveform::Du => WAVEFORM_MODE_DU,
            Waveform::Gc16 => WAVEFORM_MODE_GC16,
            Waveform::Gc16Fast => WAVEFORM_MODE_GC16_FAST,
            Waveform::Glr16 => WAVEFORM_MODE_GLR16,
            Waveform::Gld16 => WAVEFORM_MODE_GLD16,
            Waveform::Gl16Fast => WAVEFORM_MODE_GL16_FAST,
            Waveform::Du4 => WAVEFORM_MODE_DU4,
            Waveform::Reagl => WAVEFORM_MODE_REAGL,
            Waveform::Reagld => WAVEFORM_MODE_REAGLD,
            Waveform::Gl4 => WAVEFORM_MODE_GL4,
            Waveform::Gl16Inv => WAVEFORM_MODE_GL16_INV,
            Waveform::Auto => WAVEFORM_MODE_AUTO,
            Waveform::Other(raw) => raw,
        }
    }
}

/// Temperature the waveform is selected for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Temperature {
    RemarkableDraw,
    /// Read the panel's ambient sensor
    #[default]
    Ambient,
    Papyrus,
    Max,
    /// Explicit value passed through unchanged
    Explicit(i32),
}

impl Temperature {
    pub fn to_raw(self) -> i32 {
        match self {
            Temperature::RemarkableDraw => TEMP_USE_REMARKABLE_DRAW,
            Temperature::Ambient => TEMP_USE_AMBIENT,
            Temperature::Papyrus => TEMP_USE_PAPYRUS,
            Temperature::Max => TEMP_USE_MAX,
            Temperature::Explicit(raw) => raw,
        }
    }
}

/// Dither mode and quantisation bit. Second-generation controllers only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dither {
    pub mode: i32,
    pub quant_bit: i32,
}

impl Dither {
    pub const PASSTHROUGH: Dither = Dither {
        mode: DITHER_PASSTHROUGH,
        quant_bit: 0,
    };

    pub const DRAWING: Dither = Dither {
        mode: DITHER_DRAWING,
        quant_bit: DRAWING_QUANT_BIT,
    };
}

impl Default for Dither {
    fn default() -> Self {
        Self::PASSTHROUGH
    }
}

bitflags! {
    /// `EPDC_FLAG_*` request flags.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct UpdateFlags: u32 {
        const ENABLE_INVERSION = EPDC_FLAG_ENABLE_INVERSION;
        const FORCE_MONOCHROME = EPDC_FLAG_FORCE_MONOCHROME;
        const USE_CMAP = EPDC_FLAG_USE_CMAP;
        const USE_ALT_BUFFER = EPDC_FLAG_USE_ALT_BUFFER;
        /// Report whether the update would collide, without drawing it
        const TEST_COLLISION = EPDC_FLAG_TEST_COLLISION;
        const GROUP_UPDATE = EPDC_FLAG_GROUP_UPDATE;
        const USE_DITHERING_Y1 = EPDC_FLAG_USE_DITHERING_Y1;
        const USE_DITHERING_Y4 = EPDC_FLAG_USE_DITHERING_Y4;
    }
}

/// Alternate source buffer for an update, in physical memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AltBuffer {
    pub phys_addr: u32,
    pub width: u32,
    pub height: u32,
    pub region: Rect,
}

/// Everything a refresh needs except the marker, which the handle allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateRequest {
    pub mode: UpdateMode,
    pub waveform: Waveform,
    pub temperature: Temperature,
    pub flags: UpdateFlags,
    pub dither: Option<Dither>,
    pub alt_buffer: Option<AltBuffer>,
    /// `None` or an empty rect refreshes the whole screen
    pub region: Option<Rect>,
}

impl UpdateRequest {
    pub fn full(waveform: Waveform) -> Self {
        Self {
            mode: UpdateMode::Full,
            waveform,
            temperature: Temperature::default(),
            flags: UpdateFlags::empty(),
            dither: None,
            alt_buffer: None,
            region: None,
        }
    }

    pub fn partial(region: Rect, waveform: Waveform) -> Self {
        Self {
            mode: UpdateMode::Partial,
            region: Some(region),
            ..Self::full(waveform)
        }
    }

    pub fn with_temperature(mut self, temperature: Temperature) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_flags(mut self, flags: UpdateFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_dither(mut self, dither: Dither) -> Self {
        self.dither = Some(dither);
        self
    }

    pub fn with_alt_buffer(mut self, alt_buffer: AltBuffer) -> Self {
        self.alt_buffer = Some(alt_buffer);
        self
    }
}

/// Handle to a submitted update. Never zero when returned by a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UpdateMarker(u32);

impl UpdateMarker {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for UpdateMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a completed wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub marker: UpdateMarker,
    /// Collision word reported by the controller; nonzero when the update
    /// overlapped another one still in flight.
    pub collision: u32,
}

impl Completion {
    pub fn collided(&self) -> bool {
        self.collision != 0
    }
}

/// Resubmission policy for [`Framebuffer::refresh_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total submissions, including the first
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff: Duration::from_secs(1),
        }
    }
}

const MAX_OUTSTANDING: usize = 256;

/// Marker generator plus the submitted markers nobody has waited on yet,
/// oldest submission first.
#[derive(Debug)]
pub(crate) struct MarkerLedger {
    next: u32,
    outstanding: VecDeque<u32>,
}

impl MarkerLedger {
    pub(crate) fn new() -> Self {
        Self {
            next: 1,
            outstanding: VecDeque::new(),
        }
    }

    pub(crate) fn peek_next(&self) -> u32 {
        self.next
    }

    fn allocate(&mut self) -> u32 {
        let marker = self.next;
        self.next = match self.next.wrapping_add(1) {
            0 => 1,
            n => n,
        };
        marker
    }

    fn submitted(&mut self, marker: u32) {
        if self.outstanding.len() >= MAX_OUTSTANDING {
            if let Some(oldest) = self.outstanding.pop_front() {
                debug!("Forgetting unwaited update marker {}", oldest);
            }
        }
        self.outstanding.push_back(marker);
    }

    fn take(&mut self, marker: u32) -> bool {
        match self.outstanding.iter().position(|&m| m == marker) {
            Some(index) => {
                self.outstanding.remove(index);
                true
            }
            None => false,
        }
    }
}

impl<D: Epdc> Framebuffer<D> {
    /// Submit `request` and return its marker without waiting for the
    /// drawing to finish.
    pub fn refresh(&mut self, request: &UpdateRequest) -> Result<UpdateMarker> {
        self.check_request(request)?;
        let marker = self.markers.allocate();
        self.submit(request, marker)
    }

    /// Like [`refresh`](Self::refresh), resubmitting the same marker after
    /// `policy.backoff` while the controller rejects it, up to
    /// `policy.max_attempts` submissions.
    pub fn refresh_with_retry(
        &mut self,
        request: &UpdateRequest,
        policy: &RetryPolicy,
    ) -> Result<UpdateMarker> {
        self.check_request(request)?;
        let marker = self.markers.allocate();
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.submit(request, marker) {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(
                        "Update {} rejected (attempt {}/{}, os error {:?}); retrying in {:?}",
                        marker,
                        attempt,
                        max_attempts,
                        e.os_error(),
                        policy.backoff
                    );
                    thread::sleep(policy.backoff);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Block until the update behind `marker` is drawn, bounded by the
    /// handle's configured wait timeout.
    pub fn wait_for_marker(&mut self, marker: UpdateMarker) -> Result<Completion> {
        self.wait_for_marker_timeout(marker, self.wait_timeout)
    }

    /// Block until the update behind `marker` is drawn or `timeout` elapses.
    ///
    /// Marker 0, markers never submitted through this handle and markers
    /// already waited on are rejected with [`FbError::InvalidMarker`] before
    /// reaching the controller. After a [`FbError::Timeout`] the marker can be
    /// waited on again.
    pub fn wait_for_marker_timeout(
        &mut self,
        marker: UpdateMarker,
        timeout: Option<Duration>,
    ) -> Result<Completion> {
        let raw = marker.raw();
        if raw == 0 || !self.markers.take(raw) {
            return Err(FbError::InvalidMarker(raw));
        }

        match self.device.wait_for_update(raw, timeout) {
            Ok(collision) => {
                debug!("Update {} complete (collision {})", raw, collision);
                Ok(Completion { marker, collision })
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                self.markers.submitted(raw);
                Err(FbError::Timeout {
                    marker: raw,
                    timeout: timeout.unwrap_or_default(),
                })
            }
            Err(source) => Err(FbError::Wait {
                marker: raw,
                source,
            }),
        }
    }

    /// The request exactly as it would be transmitted with `marker`.
    pub fn wire_update(&self, request: &UpdateRequest, marker: UpdateMarker) -> Result<WireUpdate> {
        self.check_request(request)?;

        let region = self.region.build(&self.geometry, request.region);
        let mut flags = request.flags;
        if request.alt_buffer.is_some() {
            flags |= UpdateFlags::USE_ALT_BUFFER;
        }

        let update = match self.generation {
            ControllerGeneration::V1 => WireUpdate::V1(MxcfbUpdateDataV1 {
                update_region: region,
                waveform_mode: request.waveform.to_raw(),
                update_mode: request.mode.to_raw(),
                update_marker: marker.raw(),
                temp: request.temperature.to_raw(),
                flags: flags.bits(),
                alt_buffer_data: request
                    .alt_buffer
                    .map(|alt| MxcfbAltBufferDataV1 {
                        phys_addr: alt.phys_addr,
                        width: alt.width,
                        height: alt.height,
                        alt_update_region: alt.region.into(),
                        ..Default::default()
                    })
                    .unwrap_or_default(),
            }),
            ControllerGeneration::V2 => {
                let dither = request.dither.unwrap_or_default();
                WireUpdate::V2(MxcfbUpdateDataV2 {
                    update_region: region,
                    waveform_mode: request.waveform.to_raw(),
                    update_mode: request.mode.to_raw(),
                    update_marker: marker.raw(),
                    temp: request.temperature.to_raw(),
                    flags: flags.bits(),
                    dither_mode: dither.mode,
                    quant_bit: dither.quant_bit,
                    alt_buffer_data: request
                        .alt_buffer
                        .map(|alt| MxcfbAltBufferDataV2 {
                            phys_addr: alt.phys_addr,
                            width: alt.width,
                            height: alt.height,
                            alt_update_region: alt.region.into(),
                        })
                        .unwrap_or_default(),
                })
            }
        };
        Ok(update)
    }

    fn check_request(&self, request: &UpdateRequest) -> Result<()> {
        if self.generation == ControllerGeneration::V1 && request.dither.is_some() {
            return Err(FbError::Unsupported {
                feature: "dither mode and quant bit",
                generation: self.generation,
            });
        }
        Ok(())
    }

    fn submit(&mut self, request: &UpdateRequest, marker: u32) -> Result<UpdateMarker> {
        let update = self.wire_update(request, UpdateMarker(marker))?;
        if let Err(source) = self.device.send_update(&update) {
            warn!("MXCFB_SEND_UPDATE for marker {} failed: {}", marker, source);
            return Err(FbError::Submission { marker, source });
        }
        self.markers.submitted(marker);
        debug!(
            "Submitted update {} ({:?}, {:?}) region {:?}",
            marker,
            request.mode,
            request.waveform,
            update.region()
        );
        Ok(UpdateMarker(marker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epdc::UpdateScheme;
    use crate::epdc::sim::SimulatedEpdc;
    use crate::framebuffer::FramebufferOptions;
    use crate::framebuffer::surface::Color;

    fn remarkable() -> (SimulatedEpdc, Framebuffer<SimulatedEpdc>) {
        let sim = SimulatedEpdc::remarkable();
        let fb = Framebuffer::with_device(sim.clone(), &FramebufferOptions::default()).unwrap();
        (sim, fb)
    }

    #[test]
    fn test_first_refresh_scenario() {
        let (sim, mut fb) = remarkable();

        fb.fill(Color::White);
        let first = fb.refresh(&UpdateRequest::full(Waveform::Init)).unwrap();
        assert_eq!(first.raw(), 1);

        let square = Rect::new(50, 50, 100, 100);
        fb.draw_rect(square, Color::Black);
        let second = fb
            .refresh(&UpdateRequest::partial(square, Waveform::Gc16))
            .unwrap();
        assert_eq!(second.raw(), 2);

        let submitted = sim.submitted();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[0].region.width, 1404);
        assert_eq!(submitted[0].region.height, 1872);
        assert_eq!(submitted[0].update_mode, UPDATE_MODE_FULL);
        assert_eq!(submitted[1].region.left, 25);
        assert_eq!(submitted[1].region.top, 50);
        assert_eq!(submitted[1].waveform_mode, WAVEFORM_MODE_GC16);

        let completion = fb.wait_for_marker(second).unwrap();
        assert_eq!(completion.collision, 0);
        assert!(!completion.collided());
    }

    #[test]
    fn test_overlapping_updates_collide() {
        let (sim, mut fb) = remarkable();
        assert_eq!(sim.scheme(), UpdateScheme::QueueAndMerge);
        sim.hold_completions(true);

        let a = fb
            .refresh(&UpdateRequest::partial(Rect::new(0, 0, 600, 250), Waveform::Du))
            .unwrap();
        let b = fb
            .refresh(&UpdateRequest::partial(Rect::new(200, 250, 600, 250), Waveform::Du))
            .unwrap();
        assert_eq!(sim.in_flight(), 2);

        sim.complete_all();
        assert!(!fb.wait_for_marker(a).unwrap().collided());
        assert!(fb.wait_for_marker(b).unwrap().collided());
    }

    #[test]
    fn test_markers_are_consecutive() {
        let (_sim, mut fb) = remarkable();
        let markers: Vec<u32> = (0..20)
            .map(|_| fb.refresh(&UpdateRequest::full(Waveform::Du)).unwrap().raw())
            .collect();
        let expected: Vec<u32> = (1..=20).collect();
        assert_eq!(markers, expected);
    }

    #[test]
    fn test_invalid_markers_never_reach_controller() {
        let (sim, mut fb) = remarkable();

        assert!(matches!(
            fb.wait_for_marker(UpdateMarker::from_raw(0)),
            Err(FbError::InvalidMarker(0))
        ));
        assert!(matches!(
            fb.wait_for_marker(UpdateMarker::from_raw(7)),
            Err(FbError::InvalidMarker(7))
        ));
        assert_eq!(sim.wait_calls(), 0);

        let marker = fb.refresh(&UpdateRequest::full(Waveform::Du)).unwrap();
        fb.wait_for_marker(marker).unwrap();
        assert!(matches!(
            fb.wait_for_marker(marker),
            Err(FbError::InvalidMarker(1))
        ));
        assert_eq!(sim.wait_calls(), 1);
    }

    #[test]
    fn test_failed_submission_is_not_waitable() {
        let (sim, mut fb) = remarkable();
        sim.fail_next_submissions(1, libc::EBUSY);

        let err = fb.refresh(&UpdateRequest::full(Waveform::Du)).unwrap_err();
        assert!(matches!(err, FbError::Submission { marker: 1, .. }));
        assert_eq!(err.os_error(), Some(libc::EBUSY));
        assert!(matches!(
            fb.wait_for_marker(UpdateMarker::from_raw(1)),
            Err(FbError::InvalidMarker(1))
        ));

        let next = fb.refresh(&UpdateRequest::full(Waveform::Du)).unwrap();
        assert_eq!(next.raw(), 2);
    }

    #[test]
    fn test_retry_resubmits_same_marker() {
        let (sim, mut fb) = remarkable();
        sim.fail_next_submissions(2, libc::EBUSY);
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff: Duration::from_millis(1),
        };

        let marker = fb
            .refresh_with_retry(&UpdateRequest::full(Waveform::Gc16), &policy)
            .unwrap();
        assert_eq!(marker.raw(), 1);
        assert_eq!(sim.submitted().len(), 1);
        assert_eq!(sim.submitted()[0].update_marker, 1);
    }

    #[test]
    fn test_retry_gives_up() {
        let (sim, mut fb) = remarkable();
        sim.fail_next_submissions(3, libc::EAGAIN);
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        };

        let err = fb
            .refresh_with_retry(&UpdateRequest::full(Waveform::Gc16), &policy)
            .unwrap_err();
        assert_eq!(err.os_error(), Some(libc::EAGAIN));
        assert!(sim.submitted().is_empty());
    }

    #[test]
    fn test_timeout_keeps_marker_waitable() {
        let (sim, mut fb) = remarkable();
        sim.hold_completions(true);
        let marker = fb.refresh(&UpdateRequest::full(Waveform::Gc16)).unwrap();

        let err = fb
            .wait_for_marker_timeout(marker, Some(Duration::from_millis(20)))
            .unwrap_err();
        assert!(matches!(err, FbError::Timeout { marker: 1, .. }));

        sim.complete_all();
        assert_eq!(fb.wait_for_marker(marker).unwrap().collision, 0);
    }

    #[test]
    fn test_v1_rejects_dither() {
        let sim = SimulatedEpdc::remarkable();
        let options = FramebufferOptions {
            generation: ControllerGeneration::V1,
            ..Default::default()
        };
        let mut fb = Framebuffer::with_device(sim.clone(), &options).unwrap();

        let dithered = UpdateRequest::full(Waveform::Gc16).with_dither(Dither::DRAWING);
        assert!(matches!(
            fb.refresh(&dithered),
            Err(FbError::Unsupported { generation: ControllerGeneration::V1, .. })
        ));
        assert!(sim.submitted().is_empty());

        let marker = fb.refresh(&UpdateRequest::full(Waveform::Gc16)).unwrap();
        assert_eq!(marker.raw(), 1);
        let sent = &sim.submitted()[0];
        assert_eq!(sent.dither_mode, None);
        assert_eq!(sent.temp, TEMP_USE_AMBIENT);
    }

    #[test]
    fn test_v2_carries_dither_and_alt_buffer() {
        let (sim, mut fb) = remarkable();
        let alt = AltBuffer {
            phys_addr: 0x8000_0000,
            width: 64,
            height: 32,
            region: Rect::new(0, 0, 64, 32),
        };
        let request = UpdateRequest::partial(Rect::new(10, 10, 20, 20), Waveform::Du)
            .with_dither(Dither::DRAWING)
            .with_temperature(Temperature::RemarkableDraw)
            .with_alt_buffer(alt);
        fb.refresh(&request).unwrap();

        let sent = &sim.submitted()[0];
        assert_eq!(sent.dither_mode, Some(DITHER_DRAWING));
        assert_eq!(sent.quant_bit, Some(DRAWING_QUANT_BIT));
        assert_eq!(sent.temp, TEMP_USE_REMARKABLE_DRAW);
        assert_ne!(sent.flags & EPDC_FLAG_USE_ALT_BUFFER, 0);
        assert_eq!(sent.alt_buffer.as_ref().map(|a| a.phys_addr), Some(0x8000_0000));
    }

    #[test]
    fn test_v1_alt_buffer_sets_flag() {
        let sim = SimulatedEpdc::remarkable();
        let options = FramebufferOptions {
            generation: ControllerGeneration::V1,
            ..Default::default()
        };
        let mut fb = Framebuffer::with_device(sim.clone(), &options).unwrap();
        let alt = AltBuffer {
            phys_addr: 0x9000_0000,
            width: 128,
            height: 48,
            region: Rect::new(4, 8, 120, 40),
        };
        let request = UpdateRequest::partial(Rect::new(10, 10, 20, 20), Waveform::Du)
            .with_flags(UpdateFlags::FORCE_MONOCHROME)
            .with_alt_buffer(alt);

        let wire = fb.wire_update(&request, UpdateMarker::from_raw(7)).unwrap();
        let WireUpdate::V1(data) = wire else {
            panic!("expected first-generation layout, got {:?}", wire);
        };
        assert!(data.alt_buffer_data.virt_addr.is_null());
        assert_eq!(data.alt_buffer_data.phys_addr, 0x9000_0000);
        assert_eq!(
            data.alt_buffer_data.alt_update_region,
            epdfb_proto::MxcfbRect::from(alt.region)
        );
        assert_eq!(
            data.flags,
            EPDC_FLAG_USE_ALT_BUFFER | EPDC_FLAG_FORCE_MONOCHROME
        );

        fb.refresh(&request).unwrap();
        let sent = &sim.submitted()[0];
        assert_eq!(sent.dither_mode, None);
        assert_ne!(sent.flags & EPDC_FLAG_USE_ALT_BUFFER, 0);
        let summary = sent.alt_buffer.as_ref().unwrap();
        assert_eq!((summary.phys_addr, summary.width, summary.height), (0x9000_0000, 128, 48));
    }

    #[test]
    fn test_collision_dry_run() {
        let (sim, mut fb) = remarkable();
        sim.hold_completions(true);
        let region = Rect::new(100, 100, 200, 200);

        fb.refresh(&UpdateRequest::partial(region, Waveform::Gc16))
            .unwrap();
        let dry_run = fb
            .refresh(
                &UpdateRequest::partial(region, Waveform::Gc16)
                    .with_flags(UpdateFlags::TEST_COLLISION),
            )
            .unwrap();

        assert_eq!(sim.in_flight(), 1);
        assert!(fb.wait_for_marker(dry_run).unwrap().collided());
    }

    #[test]
    fn test_ledger_forgets_oldest() {
        let mut ledger = MarkerLedger::new();
        for _ in 0..MAX_OUTSTANDING + 1 {
            let marker = ledger.allocate();
            ledger.submitted(marker);
        }
        assert!(!ledger.take(1));
        assert!(ledger.take(2));
        assert!(ledger.take(MAX_OUTSTANDING as u32 + 1));
    }

    #[test]
    fn test_ledger_eviction_follows_submission_order() {
        let mut ledger = MarkerLedger::new();
        ledger.next = u32::MAX - 9;
        for _ in 0..MAX_OUTSTANDING + 1 {
            let marker = ledger.allocate();
            ledger.submitted(marker);
        }
        // the first submission predates the wrap and goes first
        assert!(!ledger.take(u32::MAX - 9));
        assert!(ledger.take(u32::MAX - 8));
        assert!(ledger.take(1));
        assert!(ledger.take(MAX_OUTSTANDING as u32 - 9));
    }

    #[test]
    fn test_ledger_skips_zero_on_wrap() {
        let mut ledger = MarkerLedger::new();
        ledger.next = u32::MAX;
        assert_eq!(ledger.allocate(), u32::MAX);
        assert_eq!(ledger.allocate(), 1);
    }

    #[test]
    fn test_waveform_values() {
        assert_eq!(Waveform::Init.to_raw(), 0);
        assert_eq!(Waveform::Gc16.to_raw(), 2);
        assert_eq!(Waveform::Auto.to_raw(), 0x101);
        assert_eq!(Waveform::Other(0x42).to_raw(), 0x42);
        assert_eq!(Temperature::Explicit(24).to_raw(), 24);
    }
}
