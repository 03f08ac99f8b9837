//! facewatch-hw: camera capture and frame handling.
//!
//! V4L2 capture converted to grayscale, labelled box overlays for preview
//! frames, and image-file snapshots.

pub mod annotate;
pub mod camera;
pub mod frame;

pub use annotate::{draw_box, Annotator, BoxStyle};
pub use camera::{Camera, CameraError, CameraStream, FrameQueue, FrameSource, PixelFormat};
pub use frame::{Frame, FrameError};
