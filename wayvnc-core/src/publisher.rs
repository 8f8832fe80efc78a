//! The frame publisher (spec §2 data flow, §4.2 "Registry broadcast"):
//! receives a capture backend's completion callback, refines the reported
//! damage into a tight region, broadcasts staleness to every other live
//! buffer of the same domain, and hands the finished buffer plus region
//! downstream to the RFB engine.
//!
//! Grounded on `original_source/src/main.c`'s `on_screencopy_done` dispatch
//! (`CAPTURE_DONE` → process frame, `CAPTURE_FAILED` → restart capture,
//! `CAPTURE_FATAL` → exit) recast against [`CaptureOutcome`]/[`Severity`]
//! rather than a raw status enum, and on [`crate::damage::DamageRefinery`] +
//! [`crate::buffer::BufferRegistry`] for the refine-then-broadcast sequence
//! spec §4.2 describes. The RFB engine itself is an external collaborator
//! (spec §1, §6 "provided by the external engine, not specified here") —
//! this module only owns the handoff into it.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::buffer::{Buffer, BufferRegistry};
use crate::damage::DamageRefinery;
use crate::error::{CaptureOutcome, Severity};
use crate::geometry::{Rectangle, Region};

/// Hands a finished buffer and its refined damage region to the RFB engine.
pub type SubmitFn = Box<dyn FnMut(Buffer, Region)>;

/// One capture source's publish pipeline. A source with more than one
/// concurrently live buffer size (e.g. switching captured output) needs one
/// `FramePublisher` per size, since a [`DamageRefinery`] is keyed to a
/// single width/height.
pub struct FramePublisher {
    refinery: RefCell<Option<DamageRefinery>>,
    registry: Rc<RefCell<BufferRegistry>>,
    submit: RefCell<Option<SubmitFn>>,
    frames_published: Cell<u64>,
}

impl FramePublisher {
    pub fn new(registry: Rc<RefCell<BufferRegistry>>) -> Self {
        FramePublisher { refinery: RefCell::new(None), registry, submit: RefCell::new(None), frames_published: Cell::new(0) }
    }

    pub fn set_submit(&self, submit: SubmitFn) {
        *self.submit.borrow_mut() = Some(submit);
    }

    pub fn frames_published(&self) -> u64 {
        self.frames_published.get()
    }

    /// Dispatches one `on_done` call (spec §4.3 `on_done(result, buffer,
    /// source)`). Returns the outcome's [`Severity`] so the caller (which
    /// owns the capture session and knows whether to restart it) can decide
    /// what to do next — this module never restarts a capture itself.
    pub fn handle_capture_result(&self, outcome: CaptureOutcome, buffer: Option<Buffer>) -> Severity {
        if let (CaptureOutcome::Done, Some(buffer)) = (outcome, buffer) {
            self.publish(buffer);
        }
        outcome.severity()
    }

    /// Refine, broadcast, and submit one finished buffer.
    fn publish(&self, buffer: Buffer) {
        let (width, height) = (buffer.width(), buffer.height());

        let mut refinery_slot = self.refinery.borrow_mut();
        let refinery = match refinery_slot.as_mut() {
            Some(r) if r.width() == width && r.height() == height => r,
            _ => {
                *refinery_slot = Some(DamageRefinery::new(width, height));
                refinery_slot.as_mut().unwrap()
            }
        };

        // The hint is whatever the compositor told us changed this frame,
        // widened by whatever changed in this buffer while it sat idle
        // (tracked as buffer-damage by earlier `registry_damage_all`
        // broadcasts against other buffers of this buffer's generation).
        // An empty hint means neither source has anything to report yet —
        // a freshly allocated buffer or a backend that never populates
        // frame-damage (wlroots-screencopy's damage callback is a no-op,
        // spec §4.3.2) — so treat it as a full repaint rather than
        // publishing nothing.
        let mut hint = buffer.frame_damage();
        hint.union(&buffer.buffer_damage());
        if hint.is_empty() {
            hint = Region::single(Rectangle::new(0, 0, width as i32, height as i32));
        }

        let refined = refinery.refine(&hint, &buffer);
        drop(refinery_slot);

        buffer.clear_frame_damage();
        buffer.clear_buffer_damage();

        if !refined.is_empty() {
            self.registry.borrow_mut().damage_all(&refined, buffer.domain(), &buffer);
        }

        self.frames_published.set(self.frames_published.get() + 1);

        if let Some(submit) = self.submit.borrow_mut().as_mut() {
            submit(buffer, refined);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferPool, PoolConfig, RustixShmAllocator};
    use drm_fourcc::DrmFourcc;
    use std::rc::Rc;

    fn pool() -> BufferPool {
        let mut pool = BufferPool::new(Rc::new(RustixShmAllocator), None, None);
        pool.reconfig(PoolConfig::shm(64, 64, 256, DrmFourcc::Xrgb8888)).unwrap();
        pool
    }

    #[test]
    fn first_frame_with_no_reported_damage_publishes_the_whole_buffer() {
        let registry = Rc::new(RefCell::new(BufferRegistry::new()));
        let publisher = FramePublisher::new(registry);

        let seen: Rc<RefCell<Option<Region>>> = Rc::new(RefCell::new(None));
        let seen2 = seen.clone();
        publisher.set_submit(Box::new(move |_buffer, region| *seen2.borrow_mut() = Some(region)));

        let mut pool = pool();
        let buffer = pool.acquire().unwrap();
        publisher.handle_capture_result(CaptureOutcome::Done, Some(buffer));

        let region = seen.borrow().clone().unwrap();
        assert_eq!(region.extents(), Some(Rectangle::new(0, 0, 64, 64)));
        assert_eq!(publisher.frames_published(), 1);
    }

    #[test]
    fn identical_buffer_on_second_pass_still_submits_but_reports_no_damage() {
        let registry = Rc::new(RefCell::new(BufferRegistry::new()));
        let publisher = FramePublisher::new(registry);

        let regions: Rc<RefCell<Vec<Region>>> = Rc::new(RefCell::new(Vec::new()));
        let regions2 = regions.clone();
        publisher.set_submit(Box::new(move |_buffer, region| regions2.borrow_mut().push(region)));

        let mut pool = pool();
        let buffer = pool.acquire().unwrap();

        publisher.handle_capture_result(CaptureOutcome::Done, Some(buffer.clone()));
        // Second frame off the very same buffer: no frame-damage was
        // reported and no broadcast touched it in between, so the hint is
        // empty again — but this time the refinery already has hashes for
        // every tile, so `refine` correctly reports nothing changed instead
        // of re-treating it as a first frame.
        buffer.set_pts(std::time::Duration::from_millis(16));
        publisher.handle_capture_result(CaptureOutcome::Done, Some(buffer));

        assert_eq!(regions.borrow().len(), 2);
        assert!(regions.borrow()[0].extents().is_some());
        assert!(regions.borrow()[1].is_empty());
    }

    #[test]
    fn broadcasts_refined_damage_to_other_live_buffers_of_the_same_domain() {
        let registry = Rc::new(RefCell::new(BufferRegistry::new()));
        let publisher = FramePublisher::new(registry.clone());
        publisher.set_submit(Box::new(|_buffer, _region| {}));

        let mut pool = pool();
        let source = pool.acquire().unwrap();
        registry.borrow_mut().track(&source);
        let other = pool.acquire().unwrap();
        registry.borrow_mut().track(&other);

        assert!(other.buffer_damage().is_empty());
        publisher.handle_capture_result(CaptureOutcome::Done, Some(source));
        assert!(!other.buffer_damage().is_empty());
    }

    #[test]
    fn failed_and_fatal_outcomes_are_not_published_and_report_their_severity() {
        let registry = Rc::new(RefCell::new(BufferRegistry::new()));
        let publisher = FramePublisher::new(registry);
        publisher.set_submit(Box::new(|_buffer, _region| panic!("must not be called")));

        assert_eq!(publisher.handle_capture_result(CaptureOutcome::Failed, None), Severity::Failed);
        assert_eq!(publisher.handle_capture_result(CaptureOutcome::Fatal, None), Severity::Fatal);
        assert_eq!(publisher.frames_published(), 0);
    }
}
