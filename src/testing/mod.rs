//! Testing utilities for CrabStream
//!
//! Generated frame content and a scriptable backend for exercising the
//! session without hardware.

pub mod scripted;
pub mod synthetic_data;

pub use scripted::ScriptedBackend;
pub use synthetic_data::{synthetic_jpeg_frame, synthetic_rgb_frame};
