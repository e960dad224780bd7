//! facelearn-hw — Camera capture for the live recognition loop.
//!
//! Provides V4L2 camera access producing RGB frames, and the
//! [`FrameSource`] seam the loop reads from.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameSource, PixelFormat};
pub use frame::Frame;
