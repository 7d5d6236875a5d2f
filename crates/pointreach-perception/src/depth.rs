//! Immutable image rasters delivered by the depth camera.

use chrono::{DateTime, TimeDelta, Utc};
use pointreach_types::{ColorImage, DepthImage, ReachError};

/// A row-major depth raster in metres.
///
/// Frames are never mutated after construction; consumers share them behind
/// an `Arc` and swap the whole frame on refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthFrame {
    width: u32,
    height: u32,
    samples: Vec<f32>,
    timestamp: DateTime<Utc>,
}

impl DepthFrame {
    /// # Errors
    ///
    /// Returns [`ReachError::SensorStall`] if `samples` does not hold exactly
    /// `width * height` values; a short or oversized frame is treated like a
    /// frame that never arrived.
    pub fn new(
        width: u32,
        height: u32,
        samples: Vec<f32>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, ReachError> {
        let expected = width as usize * height as usize;
        if samples.len() != expected {
            return Err(ReachError::SensorStall(format!(
                "depth frame {width}x{height} carries {} samples, expected {expected}",
                samples.len()
            )));
        }
        Ok(Self {
            width,
            height,
            samples,
            timestamp,
        })
    }

    /// Build a frame from its wire form, stamped with the current time.
    pub fn from_image(image: DepthImage) -> Result<Self, ReachError> {
        Self::new(image.width, image.height, image.samples, Utc::now())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Time elapsed between capture and `now`.
    pub fn age_at(&self, now: DateTime<Utc>) -> TimeDelta {
        now.signed_duration_since(self.timestamp)
    }

    /// Raw depth at `(u, v)`. The value is returned as measured, including
    /// zeros and NaNs; validity is judged by the deprojection.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::OutOfRange`] if the pixel is outside the frame.
    pub fn sample(&self, u: i32, v: i32) -> Result<f32, ReachError> {
        if u < 0 || v < 0 || u as u32 >= self.width || v as u32 >= self.height {
            return Err(ReachError::OutOfRange {
                u,
                v,
                width: self.width,
                height: self.height,
            });
        }
        Ok(self.samples[v as usize * self.width as usize + u as usize])
    }
}

/// Packed RGB24 colour image paired with a depth frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RgbImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl RgbImage {
    /// # Errors
    ///
    /// Returns [`ReachError::SensorStall`] if `data` is not
    /// `width * height * 3` bytes long.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, ReachError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(ReachError::SensorStall(format!(
                "rgb image {width}x{height} carries {} bytes, expected {expected}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn from_image(image: ColorImage) -> Result<Self, ReachError> {
        Self::new(image.width, image.height, image.data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The `[r, g, b]` triple at `(u, v)`, or `None` outside the image.
    pub fn pixel(&self, u: u32, v: u32) -> Option<[u8; 3]> {
        if u >= self.width || v >= self.height {
            return None;
        }
        let i = (v as usize * self.width as usize + u as usize) * 3;
        Some([self.data[i], self.data[i + 1], self.data[i + 2]])
    }
}
