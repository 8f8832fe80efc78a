//! The shared error taxonomy described in spec §7.
//!
//! Individual subsystems (buffer pool, capture backends, ...) define their
//! own `thiserror` enums in teacher style (one `#[error("...")]` variant per
//! failure mode, see e.g. `backend::egl::Error` in the teacher) for the
//! concrete reasons something failed. [`Severity`] classifies *how* a given
//! failure should propagate, independent of which subsystem raised it.

use std::fmt;

/// How a failure should propagate through the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Retried locally; never surfaced upward (e.g. `EAGAIN`, a
    /// `buffer_constraints` failure the pool will renegotiate).
    Transient,
    /// The in-flight attempt aborted, but the session is reusable. Surfaced
    /// once to the component's completion callback, which typically retries.
    Failed,
    /// The session can no longer continue; it must be torn down and a fresh
    /// one created. Surfaced exactly once.
    Fatal,
    /// A control-plane request was malformed or refused. Surfaced only to
    /// the requesting client, never logged at error level.
    UserError,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Transient => "transient",
            Severity::Failed => "failed",
            Severity::Fatal => "fatal",
            Severity::UserError => "user-error",
        };
        f.write_str(s)
    }
}

/// Outcome reported by a capture backend's completion callback (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Done,
    Failed,
    Fatal,
}

impl CaptureOutcome {
    pub fn severity(self) -> Severity {
        match self {
            CaptureOutcome::Done => Severity::Transient,
            CaptureOutcome::Failed => Severity::Failed,
            CaptureOutcome::Fatal => Severity::Fatal,
        }
    }
}
