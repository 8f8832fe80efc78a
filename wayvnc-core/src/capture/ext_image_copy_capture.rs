//! The `ext-image-copy-capture` screencopy backend (spec §4.3.1).
//!
//! Ported from `original_source/src/ext-image-copy-capture.c`'s session
//! object, with the design-note redesign (spec §9): the original's
//! `struct aml_timer* timer` plus a loose `bool should_start` collapse into
//! one explicit [`SessionState`] enum, so "is a capture pending, and why"
//! is a single value instead of two fields whose combinations had to be
//! reasoned about by hand.
//!
//! The compositor-event handlers below (`handle_*`) are the seams an
//! external Wayland wire-marshalling collaborator (spec §1 Non-goals) would
//! call; this module owns only the state machine and format negotiation,
//! not protocol object dispatch.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use drm_fourcc::{DrmFourcc as Fourcc, DrmModifier as Modifier};

use crate::buffer::{Buffer, BufferDomain, BufferPool, BufferType, PoolConfig};
use crate::capture::{
    rate_and_sort, top_format_modifiers, CaptureError, DoneFn, FormatEntry, RateFormatFn, ScreencopyCapabilities,
    ScreencopySession,
};
use crate::error::CaptureOutcome;
use crate::geometry::Region;
use crate::image_source::ImageSource;

/// Spec §9 redesign: replaces the original's timer-plus-bool tri-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session has been created against the source yet.
    Idle,
    /// A session exists; waiting for the `done`-terminated batch of
    /// constraint advertisements.
    Constraining,
    /// Constraints known; no capture currently requested.
    Ready,
    /// A capture was requested but rate-limiting delays it until `Instant`.
    Armed(Instant),
    /// A frame object is outstanding.
    Capturing,
    /// The previous frame failed for a reason other than buffer
    /// constraints; the session must be recreated before capturing again.
    Failed,
    /// Unrecoverable; the session is defunct.
    Terminal,
}

/// Compositor-supplied reason a `frame_handle_failed` event carried (spec
/// §4.3.1 step 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    BufferConstraints,
    Unknown,
    Stopped,
}

pub struct ExtImageCopyCaptureSession {
    source: Box<dyn ImageSource>,
    render_cursors: bool,
    pool: BufferPool,
    buffer: Option<Buffer>,
    state: SessionState,
    have_constraints: bool,
    should_recapture_when_ready: bool,
    frame_count: u32,

    width: u32,
    height: u32,
    shm_stride: u32,
    shm_formats: Vec<FormatEntry>,
    dmabuf_formats: Vec<FormatEntry>,
    dmabuf_device_node: Option<PathBuf>,

    hotspot: (i32, i32),
    last_frame_at: Option<Instant>,

    rate_limit: f64,
    pub enable_linux_dmabuf: bool,
    is_cursor_session: bool,

    pub on_done: Option<DoneFn>,
    pub rate_format: Option<RateFormatFn>,
    pub cursor_enter: Option<Box<dyn FnMut()>>,
    pub cursor_leave: Option<Box<dyn FnMut()>>,
    pub cursor_hotspot: Option<Box<dyn FnMut(i32, i32)>>,
}

const RATE_LIMIT_EPSILON: Duration = Duration::from_micros(4000);

impl ExtImageCopyCaptureSession {
    pub fn new(source: Box<dyn ImageSource>, render_cursors: bool, pool: BufferPool, rate_limit: f64) -> Self {
        ExtImageCopyCaptureSession {
            source,
            render_cursors,
            pool,
            buffer: None,
            state: SessionState::Idle,
            have_constraints: false,
            should_recapture_when_ready: false,
            frame_count: 0,
            width: 0,
            height: 0,
            shm_stride: 0,
            shm_formats: Vec::new(),
            dmabuf_formats: Vec::new(),
            dmabuf_device_node: None,
            hotspot: (0, 0),
            last_frame_at: None,
            rate_limit,
            enable_linux_dmabuf: true,
            is_cursor_session: false,
            on_done: None,
            rate_format: None,
            cursor_enter: None,
            cursor_leave: None,
            cursor_hotspot: None,
        }
    }

    pub fn new_cursor(source: Box<dyn ImageSource>, pool: BufferPool, rate_limit: f64) -> Self {
        let mut session = Self::new(source, true, pool, rate_limit);
        session.is_cursor_session = true;
        session
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn clear_constraints(&mut self) {
        if !self.have_constraints {
            return;
        }
        self.shm_formats.clear();
        self.dmabuf_formats.clear();
        self.have_constraints = false;
    }

    /// `session_handle_format_shm`.
    pub fn handle_shm_format(&mut self, format: Fourcc) {
        self.clear_constraints();
        self.shm_formats.push(FormatEntry {
            format,
            modifier: Modifier::Linear,
        });
    }

    /// `session_handle_format_drm`.
    pub fn handle_dmabuf_format(&mut self, format: Fourcc, modifiers: &[Modifier]) {
        self.clear_constraints();
        for &modifier in modifiers {
            self.dmabuf_formats.push(FormatEntry { format, modifier });
        }
    }

    /// `session_handle_dmabuf_device`.
    pub fn handle_dmabuf_device(&mut self, node: PathBuf) {
        self.clear_constraints();
        self.dmabuf_device_node = Some(node);
    }

    /// `session_handle_dimensions`.
    pub fn handle_buffer_size(&mut self, width: u32, height: u32) {
        self.clear_constraints();
        self.width = width;
        self.height = height;
        self.shm_stride = width * 4;
    }

    fn config_dma_buffers(&mut self) -> bool {
        let Some(rate_format) = self.rate_format.as_mut() else { return false };
        if self.dmabuf_formats.is_empty() {
            return false;
        }
        let sorted = rate_and_sort(&self.dmabuf_formats, BufferType::Dmabuf, self.domain(), rate_format);
        if sorted.is_empty() {
            return false;
        }
        let (format, modifiers) = top_format_modifiers(&sorted);
        let config = PoolConfig::dmabuf(self.width, self.height, format, modifiers, self.dmabuf_device_node.clone());
        matches!(self.pool.reconfig(config), Ok(true))
    }

    fn config_shm_buffers(&mut self) -> bool {
        let Some(rate_format) = self.rate_format.as_mut() else { return false };
        if self.shm_formats.is_empty() {
            return false;
        }
        let sorted = rate_and_sort(&self.shm_formats, BufferType::Shm, self.domain(), rate_format);
        if sorted.is_empty() {
            return false;
        }
        let format = sorted[0].entry.format;
        let config = PoolConfig::shm(self.width, self.height, self.shm_stride, format);
        matches!(self.pool.reconfig(config), Ok(true))
    }

    /// `config_buffers`: prefer dmabuf whenever it negotiates, matching
    /// `config_dma_buffers(self) || config_shm_buffers(self)` in the
    /// original's short-circuit order.
    fn config_buffers(&mut self) -> bool {
        if !self.enable_linux_dmabuf {
            return self.config_shm_buffers();
        }
        self.config_dma_buffers() || self.config_shm_buffers()
    }

    fn domain(&self) -> BufferDomain {
        if self.is_cursor_session {
            BufferDomain::Cursor
        } else {
            BufferDomain::Output
        }
    }

    /// `session_handle_constraints_done`.
    pub fn handle_constraints_done(&mut self, now: Instant) {
        if !self.config_buffers() {
            return;
        }
        self.have_constraints = true;
        if self.should_recapture_when_ready {
            self.should_recapture_when_ready = false;
            self.schedule_capture(now);
        } else {
            self.state = SessionState::Ready;
        }
    }

    fn schedule_capture(&mut self, now: Instant) {
        self.state = SessionState::Capturing;
        let buffer = match self.pool.acquire() {
            Ok(buffer) => buffer,
            Err(err) => {
                self.state = SessionState::Terminal;
                self.deliver(CaptureOutcome::Fatal, None);
                let _ = err;
                return;
            }
        };
        buffer.set_hotspot(self.hotspot);
        self.buffer = Some(buffer);
        let _ = now;
        // Attaching the buffer, replaying damage_buffer rectangles, and
        // issuing `capture` on the protocol object is the external wire
        // collaborator's job; our state is now Capturing and awaits
        // handle_frame_ready/handle_frame_failed.
    }

    fn deliver(&mut self, outcome: CaptureOutcome, buffer: Option<Buffer>) {
        if let Some(on_done) = self.on_done.as_mut() {
            on_done(outcome, buffer);
        }
    }

    /// `frame_handle_damage`.
    pub fn handle_frame_damage(&mut self, region: &Region) {
        if let Some(buffer) = &self.buffer {
            buffer.union_frame_damage(region);
        }
    }

    /// `frame_handle_ready`.
    pub fn handle_frame_ready(&mut self, now: Instant) {
        let Some(buffer) = self.buffer.take() else { return };
        buffer.clear_buffer_damage();
        self.frame_count += 1;
        self.last_frame_at = Some(now);
        self.state = SessionState::Ready;
        self.deliver(CaptureOutcome::Done, Some(buffer));
    }

    /// `frame_handle_failed`.
    pub fn handle_frame_failed(&mut self, reason: FailureReason, now: Instant) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
        if reason == FailureReason::BufferConstraints {
            self.state = SessionState::Ready;
            let _ = self.start(false, now);
            return;
        }
        self.state = SessionState::Failed;
        self.deliver(CaptureOutcome::Fatal, None);
    }
}

impl ScreencopySession for ExtImageCopyCaptureSession {
    fn capabilities(&self) -> ScreencopyCapabilities {
        ScreencopyCapabilities::CURSOR | ScreencopyCapabilities::TRANSFORM
    }

    fn start(&mut self, immediate: bool, now: Instant) -> Result<(), CaptureError> {
        if self.state == SessionState::Capturing {
            return Err(CaptureError::AlreadyCapturing);
        }

        if immediate && self.frame_count != 0 {
            self.state = SessionState::Constraining;
            self.have_constraints = false;
            self.should_recapture_when_ready = true;
            return Ok(());
        }

        if !self.have_constraints {
            self.state = SessionState::Constraining;
            self.should_recapture_when_ready = true;
            return Ok(());
        }

        let period = Duration::from_secs_f64(1.0 / self.rate_limit);
        let next_time = self.last_frame_at.map(|t| t + period).unwrap_or(now);
        let next_time = next_time.checked_sub(RATE_LIMIT_EPSILON).unwrap_or(next_time);

        if now >= next_time {
            self.schedule_capture(now);
        } else {
            self.state = SessionState::Armed(next_time);
        }
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
        self.state = SessionState::Ready;
    }

    fn set_on_done(&mut self, on_done: DoneFn) {
        self.on_done = Some(on_done);
    }

    fn set_rate_format(&mut self, rate_format: RateFormatFn) {
        self.rate_format = Some(rate_format);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::RustixShmAllocator;
    use crate::image_source::Output;
    use std::rc::Rc;

    fn session() -> ExtImageCopyCaptureSession {
        let pool = BufferPool::new(Rc::new(RustixShmAllocator), None, None);
        let output = Output::new(1);
        let mut session = ExtImageCopyCaptureSession::new(Box::new(output), true, pool, 30.0);
        session.rate_format = Some(Box::new(|_, _, _, _| 1.0));
        session
    }

    #[test]
    fn starts_in_idle_and_moves_to_constraining_on_first_start() {
        let mut session = session();
        assert_eq!(session.state(), SessionState::Idle);
        session.start(false, Instant::now()).unwrap();
        assert_eq!(session.state(), SessionState::Constraining);
    }

    #[test]
    fn full_negotiation_and_capture_cycle_delivers_done() {
        let mut session = session();
        let now = Instant::now();
        session.start(false, now).unwrap();

        session.handle_buffer_size(64, 64);
        session.handle_shm_format(drm_fourcc::DrmFourcc::Xrgb8888);
        session.handle_constraints_done(now);
        assert_eq!(session.state(), SessionState::Capturing);

        let delivered = Rc::new(std::cell::Cell::new(false));
        let d = delivered.clone();
        session.on_done = Some(Box::new(move |outcome, buffer| {
            assert_eq!(outcome, CaptureOutcome::Done);
            assert!(buffer.is_some());
            d.set(true);
        }));

        session.handle_frame_ready(now);
        assert!(delivered.get());
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn buffer_constraints_failure_retries_without_surfacing_fatal() {
        let mut session = session();
        let now = Instant::now();
        session.start(false, now).unwrap();
        session.handle_buffer_size(64, 64);
        session.handle_shm_format(drm_fourcc::DrmFourcc::Xrgb8888);
        session.handle_constraints_done(now);

        let delivered = Rc::new(std::cell::Cell::new(0));
        let d = delivered.clone();
        session.on_done = Some(Box::new(move |_, _| d.set(d.get() + 1)));

        session.handle_frame_failed(FailureReason::BufferConstraints, now);
        assert_eq!(delivered.get(), 0, "a constraints failure must retry silently");
        assert_eq!(session.state(), SessionState::Capturing);
    }

    fn deliver_one_frame_at(session: &mut ExtImageCopyCaptureSession, now: Instant) {
        session.start(false, now).unwrap();
        session.handle_buffer_size(64, 64);
        session.handle_shm_format(drm_fourcc::DrmFourcc::Xrgb8888);
        session.handle_constraints_done(now);
        session.handle_frame_ready(now);
        assert_eq!(session.state(), SessionState::Ready);
    }

    /// spec §8 S6: a `start` 10ms after a frame at t=0 arms a timer for
    /// t≈33.3−ε ms; a `start` at t=40ms (past the period) fires immediately.
    #[test]
    fn rate_limiter_arms_before_the_period_elapses() {
        let mut session = session();
        let t0 = Instant::now();
        deliver_one_frame_at(&mut session, t0);

        let t10 = t0 + Duration::from_millis(10);
        session.start(false, t10).unwrap();
        match session.state() {
            SessionState::Armed(deadline) => {
                let expected = t0 + Duration::from_micros(33_333) - RATE_LIMIT_EPSILON;
                let delta = if deadline > expected { deadline - expected } else { expected - deadline };
                assert!(delta < Duration::from_micros(50));
            }
            other => panic!("expected Armed, got {other:?}"),
        }
    }

    #[test]
    fn rate_limiter_fires_immediately_once_the_period_has_elapsed() {
        let mut session = session();
        let t0 = Instant::now();
        deliver_one_frame_at(&mut session, t0);

        let t40 = t0 + Duration::from_millis(40);
        session.start(false, t40).unwrap();
        assert_eq!(session.state(), SessionState::Capturing);
    }
}
