//! custos-hw — V4L2 camera capture producing 8-bit grayscale frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameStream, DEFAULT_HEIGHT, DEFAULT_WIDTH};
pub use frame::{Frame, FrameError, PixelFormat};
