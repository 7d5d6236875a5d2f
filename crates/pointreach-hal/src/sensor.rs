//! Generic `SensorSource` trait and supporting types for RGB-D cameras.

use pointreach_perception::{DepthFrame, Intrinsics, RgbImage};
use pointreach_types::{ReachError, RgbdImages};

/// A synchronised colour + depth pair.
#[derive(Debug, Clone, PartialEq)]
pub struct RgbdFrame {
    pub rgb: RgbImage,
    pub depth: DepthFrame,
}

impl RgbdFrame {
    /// Validate a wire-form image pair. An empty colour image is accepted;
    /// some drivers only stream depth.
    pub fn from_images(images: RgbdImages) -> Result<Self, ReachError> {
        Ok(Self {
            rgb: RgbImage::from_image(images.rgb)?,
            depth: DepthFrame::from_image(images.depth)?,
        })
    }
}

/// An RGB-D camera.
///
/// Drivers implement this trait and are handed to the transform pipeline at
/// startup.
pub trait SensorSource: Send {
    /// Stable identifier for this sensor, e.g. `"depth_camera"`.
    fn id(&self) -> &str;

    /// The fixed calibration of the depth stream.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::Startup`] if the device has not reported a
    /// usable calibration. Callers treat this as fatal.
    fn intrinsics(&self) -> Result<Intrinsics, ReachError>;

    /// Return the newest frame without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::SensorStall`] if no new frame is available
    /// right now (transient I/O stall, driver not yet streaming, …).
    fn capture(&mut self) -> Result<RgbdFrame, ReachError>;

    /// Release the device. Called once when the pipeline stops.
    fn close(&mut self) {}
}
