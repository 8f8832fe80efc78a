//! The wlroots-screencopy backend (spec §4.3.2).
//!
//! Simpler two-phase protocol than `ext-image-copy-capture`: a frame request
//! reports one `buffer` or `linux_dmabuf` description (no candidate list to
//! rate), the buffer is allocated or reused, and the caller copies into it.
//! Grounded on `original_source/src/screencopy.c` for the event sequence and
//! the two open-question behaviors this backend reproduces rather than
//! upgrades (no damage tracking, unconditional y-invert), and on
//! `original_source/include/screencopy.h` plus `src/smooth.c` for the
//! richer `start_time`/`last_time`/`delay_smoother` fields the simple
//! implementation doesn't use but the header promises: delay-smoothed
//! self-rescheduling instead of `ext-image-copy-capture`'s per-call
//! rate-limit gate.

use std::time::{Duration, Instant};

use drm_fourcc::DrmFourcc as Fourcc;

use crate::buffer::{Buffer, BufferDomain, BufferPool, BufferType, PoolConfig};
use crate::error::CaptureOutcome;
use crate::image_source::ImageSource;

use super::{CaptureError, DoneFn, RateFormatFn, ScreencopyCapabilities, ScreencopySession};

/// Exponential smoothing filter, ported from `original_source/src/smooth.c`.
/// `apply` is the first call for a fresh filter: there is no previous
/// sample, so the input passes through unsmoothed (matching `last_time ==
/// 0` in the C version, which makes `dt` enormous and `factor` saturate to
/// 1).
struct Smoother {
    time_constant: Duration,
    last_time: Option<Instant>,
    last_result: f64,
}

impl Smoother {
    fn new(time_constant: Duration) -> Self {
        Smoother {
            time_constant,
            last_time: None,
            last_result: 0.0,
        }
    }

    fn apply(&mut self, now: Instant, input: f64) -> f64 {
        let Some(last) = self.last_time else {
            self.last_time = Some(now);
            self.last_result = input;
            return input;
        };

        let dt = now.duration_since(last).as_secs_f64();
        let factor = 1.0 - (-dt / self.time_constant.as_secs_f64()).exp();
        let result = factor * input + (1.0 - factor) * self.last_result;

        self.last_time = Some(now);
        self.last_result = result;
        result
    }
}

/// Delay smoothing time constant (spec §4.3.2, "~100 ms").
const DELAY_SMOOTHING_TIME_CONSTANT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    Capturing,
    Armed(Instant),
    Failed,
}

pub struct WlrootsScreencopySession {
    source: Box<dyn ImageSource>,
    overlay_cursor: bool,
    pool: BufferPool,
    buffer: Option<Buffer>,
    state: SessionState,

    have_linux_dmabuf: bool,
    shm_format: Option<Fourcc>,
    dmabuf_format: Option<Fourcc>,
    width: u32,
    height: u32,
    stride: u32,

    is_immediate_copy: bool,
    rate_limit: f64,
    delay_smoother: Smoother,
    start_time: Option<Instant>,
    last_time: Option<Instant>,
    frame_count: u32,

    pub on_done: Option<DoneFn>,
    pub rate_format: Option<RateFormatFn>,
}

impl WlrootsScreencopySession {
    pub fn new(source: Box<dyn ImageSource>, overlay_cursor: bool, pool: BufferPool, rate_limit: f64) -> Self {
        WlrootsScreencopySession {
            source,
            overlay_cursor,
            pool,
            buffer: None,
            state: SessionState::Idle,
            have_linux_dmabuf: false,
            shm_format: None,
            dmabuf_format: None,
            width: 0,
            height: 0,
            stride: 0,
            is_immediate_copy: false,
            rate_limit,
            delay_smoother: Smoother::new(DELAY_SMOOTHING_TIME_CONSTANT),
            start_time: None,
            last_time: None,
            frame_count: 0,
            on_done: None,
            rate_format: None,
        }
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn deliver(&mut self, outcome: CaptureOutcome, buffer: Option<Buffer>) {
        if let Some(on_done) = self.on_done.as_mut() {
            on_done(outcome, buffer);
        }
    }

    fn fail(&mut self) {
        self.state = SessionState::Failed;
        self.deliver(CaptureOutcome::Fatal, None);
    }

    /// Source of the output this session targets, for a wire-marshalling
    /// collaborator that needs to know which `wl_output` to request against.
    pub fn source(&self) -> &dyn ImageSource {
        self.source.as_ref()
    }

    pub fn overlay_cursor(&self) -> bool {
        self.overlay_cursor
    }

    /// Event: the compositor described the next frame as an shm buffer
    /// (`zwlr_screencopy_frame_v1::buffer`). Allocates (or reuses, matching
    /// `screencopy_buffer_init`'s early return when a buffer already
    /// exists) a matching pool buffer.
    pub fn handle_buffer(&mut self, format: Fourcc, width: u32, height: u32, stride: u32) {
        self.have_linux_dmabuf = false;
        self.shm_format = Some(format);
        self.width = width;
        self.height = height;
        self.stride = stride;
        self.configure_and_acquire(BufferType::Shm, format);
    }

    /// Event: the compositor described the next frame as a dmabuf
    /// (`linux_dmabuf` event on the richer protocol variant).
    pub fn handle_linux_dmabuf(&mut self, format: Fourcc, width: u32, height: u32) {
        self.have_linux_dmabuf = true;
        self.dmabuf_format = Some(format);
        self.width = width;
        self.height = height;
        self.configure_and_acquire(BufferType::Dmabuf, format);
    }

    fn configure_and_acquire(&mut self, buffer_type: BufferType, format: Fourcc) {
        if self.buffer.is_some() {
            return;
        }

        let Some(rate_format) = self.rate_format.as_mut() else {
            self.fail();
            return;
        };
        let score = rate_format(buffer_type, BufferDomain::Output, format, drm_fourcc::DrmModifier::Linear);
        if score <= 0.0 {
            self.fail();
            return;
        }

        let config = match buffer_type {
            BufferType::Shm => PoolConfig::shm(self.width, self.height, self.stride, format),
            BufferType::Dmabuf => PoolConfig::dmabuf(self.width, self.height, format, vec![drm_fourcc::DrmModifier::Linear], None),
        };

        match self.pool.reconfig(config) {
            Ok(true) => {}
            Ok(false) | Err(_) => {
                self.fail();
                return;
            }
        }

        match self.pool.acquire() {
            Ok(buffer) => self.buffer = Some(buffer),
            Err(_) => self.fail(),
        }
    }

    /// Event: `flags` reporting orientation. The source always assumes
    /// y-inversion for this backend rather than reading the flag bitmask
    /// (an open question left unresolved upstream); reproduce that
    /// behavior rather than silently fixing it.
    pub fn handle_flags(&mut self, _flags: u32) {
        if let Some(buffer) = &self.buffer {
            buffer.set_y_inverted(true);
        }
    }

    /// Event: `damage`. The source TODO-stubs this callback; this backend
    /// reproduces that rather than accumulating the reported rectangle (an
    /// open question left unresolved upstream).
    pub fn handle_damage(&mut self, _x: u32, _y: u32, _width: u32, _height: u32) {}

    /// Event: `ready`. Smooths the observed capture delay, arms the next
    /// capture at `now + max(0, period - smoothed_delay)`, and delivers the
    /// finished buffer.
    pub fn handle_ready(&mut self, now: Instant) {
        let Some(buffer) = self.buffer.take() else { return };

        self.last_time = Some(now);
        if let Some(start) = self.start_time {
            let observed_delay = now.duration_since(start).as_secs_f64();
            let smoothed_delay = self.delay_smoother.apply(now, observed_delay);
            let period = Duration::from_secs_f64(1.0 / self.rate_limit);
            let remaining = (period.as_secs_f64() - smoothed_delay).max(0.0);
            self.state = SessionState::Armed(now + Duration::from_secs_f64(remaining));
        } else {
            self.state = SessionState::Idle;
        }

        self.frame_count += 1;
        self.deliver(CaptureOutcome::Done, Some(buffer));
    }

    /// Event: `failed`. Releases any in-flight buffer and re-issues the
    /// capture immediately, matching the "Re-issue on failed" rule.
    pub fn handle_failed(&mut self, now: Instant) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
        self.state = SessionState::Idle;
        let _ = self.start(false, now);
    }

    fn schedule_capture(&mut self, now: Instant) {
        self.state = SessionState::Capturing;
        self.start_time = Some(now);
    }
}

impl ScreencopySession for WlrootsScreencopySession {
    fn capabilities(&self) -> ScreencopyCapabilities {
        ScreencopyCapabilities::empty()
    }

    /// `immediate` is recorded (matching `is_immediate_copy`, which a
    /// renderer downstream can consult to treat the frame as a full
    /// repaint) and bypasses the armed deadline; otherwise the session
    /// waits until its self-scheduled deadline has passed (spec §4.3.2).
    fn start(&mut self, immediate: bool, now: Instant) -> Result<(), CaptureError> {
        if self.state() == SessionState::Capturing {
            return Err(CaptureError::AlreadyCapturing);
        }

        self.is_immediate_copy = immediate;

        if immediate {
            self.schedule_capture(now);
            return Ok(());
        }

        if let SessionState::Armed(deadline) = self.state() {
            if now < deadline {
                return Ok(());
            }
        }

        self.schedule_capture(now);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
        self.state = SessionState::Idle;
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
    use std::cell::RefCell;
    use std::rc::Rc;

    fn session() -> WlrootsScreencopySession {
        let pool = BufferPool::new(Rc::new(RustixShmAllocator), None, None);
        let mut s = WlrootsScreencopySession::new(Box::new(Output::new(1)), false, pool, 30.0);
        s.rate_format = Some(Box::new(|_, _, _, _| 1.0));
        s
    }

    fn deliver_one_frame_at(s: &mut WlrootsScreencopySession, now: Instant) {
        s.start(false, now).unwrap();
        s.handle_buffer(Fourcc::Xrgb8888, 16, 16, 64);
        s.handle_flags(0);
        s.handle_ready(now + Duration::from_millis(1));
    }

    #[test]
    fn full_cycle_delivers_done_and_sets_y_inverted() {
        let mut s = session();
        let done = Rc::new(RefCell::new(None));
        let d = done.clone();
        s.on_done = Some(Box::new(move |outcome, buf| *d.borrow_mut() = Some((outcome, buf))));

        let t0 = Instant::now();
        deliver_one_frame_at(&mut s, t0);

        let (outcome, buf) = done.borrow_mut().take().unwrap();
        assert!(matches!(outcome, CaptureOutcome::Done));
        assert!(buf.unwrap().y_inverted());
    }

    #[test]
    fn damage_events_are_ignored() {
        let mut s = session();
        let t0 = Instant::now();
        s.start(false, t0).unwrap();
        s.handle_buffer(Fourcc::Xrgb8888, 16, 16, 64);
        s.handle_damage(0, 0, 8, 8);
        // No frame_damage API is ever touched by handle_damage; a buffer
        // freshly acquired from a never-used pool carries no frame damage
        // either way, so the only meaningful assertion is that this never
        // panics or otherwise disturbs state.
        assert_eq!(s.state(), SessionState::Capturing);
    }

    #[test]
    fn rate_limiter_arms_after_delivering_a_frame() {
        let mut s = session();
        let t0 = Instant::now();
        deliver_one_frame_at(&mut s, t0);

        match s.state() {
            SessionState::Armed(deadline) => {
                // First sample passes through the smoother unsmoothed, so
                // the observed ~1ms delay is subtracted directly from the
                // ~33.3ms period.
                let expected = t0 + Duration::from_millis(1) + Duration::from_secs_f64(1.0 / 30.0 - 0.001);
                let diff = if deadline > expected { deadline - expected } else { expected - deadline };
                assert!(diff < Duration::from_micros(50));
            }
            other => panic!("expected Armed, got {other:?}"),
        }
    }

    #[test]
    fn start_waits_until_armed_deadline_then_captures() {
        let mut s = session();
        let t0 = Instant::now();
        deliver_one_frame_at(&mut s, t0);

        let SessionState::Armed(deadline) = s.state() else {
            panic!("expected Armed state");
        };

        s.start(false, deadline - Duration::from_millis(1)).unwrap();
        assert!(matches!(s.state(), SessionState::Armed(_)));

        s.start(false, deadline + Duration::from_millis(1)).unwrap();
        assert_eq!(s.state(), SessionState::Capturing);
    }

    #[test]
    fn immediate_start_bypasses_the_armed_deadline() {
        let mut s = session();
        let t0 = Instant::now();
        deliver_one_frame_at(&mut s, t0);

        s.start(true, t0 + Duration::from_millis(2)).unwrap();
        assert_eq!(s.state(), SessionState::Capturing);
        assert!(s.is_immediate_copy);
    }

    #[test]
    fn failed_frame_releases_buffer_and_reissues() {
        let mut s = session();
        let t0 = Instant::now();
        s.start(false, t0).unwrap();
        s.handle_buffer(Fourcc::Xrgb8888, 16, 16, 64);
        assert!(s.buffer.is_some());

        s.handle_failed(t0 + Duration::from_millis(1));
        assert!(s.buffer.is_none());
        assert_eq!(s.state(), SessionState::Capturing);
    }

    #[test]
    fn already_capturing_is_rejected() {
        let mut s = session();
        let t0 = Instant::now();
        s.start(false, t0).unwrap();
        assert!(matches!(s.start(false, t0), Err(CaptureError::AlreadyCapturing)));
    }
}
