//! Capture, damage-tracking and image-source core for a Wayland screen
//! sharing server.
//!
//! This crate owns everything upstream of the RFB wire protocol: buffer
//! allocation and pooling, damage refinement, the image-source abstraction
//! (outputs, foreign toplevels, the desktop aggregate) and the capture
//! backends that turn compositor screencopy protocols into a stream of
//! painted buffers. It does not speak RFB itself (spec §1 Non-goals) — that
//! lives downstream, fed by [`publisher`].

pub mod buffer;
pub mod capture;
pub mod config;
pub mod damage;
pub mod error;
pub mod geometry;
pub mod image_source;
pub mod observer;
pub mod publisher;
pub mod wayland;

pub use error::{CaptureOutcome, Severity};
