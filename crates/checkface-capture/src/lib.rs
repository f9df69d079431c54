//! checkface-capture — Frame acquisition.
//!
//! A frame source hands the attendance workflow one RGB frame at a time,
//! or nothing when no usable frame is available. Dark frames (lens
//! covered, lights off) are rejected here so they never reach the matcher.

pub mod frame;
pub mod source;

pub use frame::{CaptureError, Frame, IMAGE_EXTENSIONS};
pub use source::{FrameSource, InboxSource, StillImageSource};
