//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{Frame, FrameError, PixelFormat};
use custos_core::error::{Classified, ErrorClass};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera not found: {0}")]
    DeviceNotFound(String),
    #[error("camera busy: {0}")]
    DeviceBusy(String),
    #[error("{0} is not a video capture device")]
    NotCaptureDevice(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl Classified for CameraError {
    fn class(&self) -> ErrorClass {
        match self {
            CameraError::DeviceNotFound(_)
            | CameraError::NotCaptureDevice(_)
            | CameraError::FormatNegotiationFailed(_) => ErrorClass::Configuration,
            CameraError::DeviceBusy(_) | CameraError::CaptureFailed(_) | CameraError::Frame(_) => {
                ErrorClass::Transient
            }
        }
    }
}

/// A discovered V4L2 capture device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Open V4L2 device with a negotiated grayscale-convertible format.
pub struct Camera {
    device: Device,
    device_path: String,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open `device_path` (e.g. "/dev/video0") and request `width` x `height`.
    ///
    /// YUYV is requested; GREY and Y16 are accepted if the driver insists.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            let text = e.to_string();
            if text.contains("busy") || text.contains("EBUSY") {
                CameraError::DeviceBusy(device_path.to_string())
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::NotCaptureDevice(device_path.to_string()));
        }

        let mut requested = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
        requested.fourcc = FourCC::new(b"YUYV");
        requested.width = width;
        requested.height = height;

        let negotiated = device
            .set_format(&requested)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to set format: {e}")))?;
        let pixel_format = PixelFormat::from_fourcc(&negotiated.fourcc.repr).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format {:?} (need YUYV, GREY or Y16)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            format = ?pixel_format,
            "opened camera"
        );

        Ok(Self {
            device,
            device_path: device_path.to_string(),
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
        })
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Start streaming. Frames are read one at a time by the frame loop.
    pub fn stream(&self) -> Result<FrameStream<'_>, CameraError> {
        let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
        Ok(FrameStream { camera: self, stream })
    }

    /// Capture `count` frames, dark ones included; used by diagnostics.
    pub fn capture_frames(&self, count: usize) -> Result<Vec<Frame>, CameraError> {
        let mut stream = self.stream()?;
        (0..count).map(|_| stream.next_frame()).collect()
    }

    /// List V4L2 video capture devices among /dev/video0..15.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                    return None;
                }
                Some(DeviceInfo {
                    path,
                    name: caps.card,
                    driver: caps.driver,
                    bus: caps.bus,
                })
            })
            .collect()
    }
}

/// Live capture stream borrowed from a [`Camera`].
pub struct FrameStream<'a> {
    camera: &'a Camera,
    stream: MmapStream<'a>,
}

impl FrameStream<'_> {
    /// Dequeue the next buffer and convert it to a grayscale [`Frame`].
    pub fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        let gray = self
            .camera
            .pixel_format
            .to_grayscale(buf, self.camera.width, self.camera.height)?;
        let frame = Frame::new(gray, self.camera.width, self.camera.height, meta.sequence);
        if frame.is_dark {
            tracing::debug!(seq = frame.sequence, "dark frame");
        }
        Ok(frame)
    }
}
