//! The pipeline's view of the most recent camera frame.

use std::sync::Arc;

use chrono::Utc;
use pointreach_hal::SensorSource;
use pointreach_perception::{DepthFrame, RgbImage};
use pointreach_types::ReachError;
use tracing::debug;

/// Holds the newest synchronised depth + colour pair.
///
/// Owned by the pipeline (single writer). A refresh swaps whole frames, so
/// a reader holding a [`snapshot`][Self::snapshot] never sees a half-updated
/// raster.
#[derive(Debug, Default)]
pub struct DepthBuffer {
    depth: Option<Arc<DepthFrame>>,
    rgb: Arc<RgbImage>,
    frames_received: u64,
}

impl DepthBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pull the latest frame from `sensor`.
    ///
    /// Returns `false` on a stall; the previous frame stays in place.
    pub fn refresh(&mut self, sensor: &mut dyn SensorSource) -> bool {
        match sensor.capture() {
            Ok(frame) => {
                self.depth = Some(Arc::new(frame.depth));
                self.rgb = Arc::new(frame.rgb);
                self.frames_received += 1;
                true
            }
            Err(e) => {
                debug!(sensor = sensor.id(), error = %e, "no new frame; keeping previous buffer");
                false
            }
        }
    }

    /// Depth at `(u, v)` in the buffered frame.
    ///
    /// # Errors
    ///
    /// - [`ReachError::SensorStall`] if no frame has been received yet.
    /// - [`ReachError::OutOfRange`] if the pixel lies outside the frame.
    pub fn current_depth(&self, u: i32, v: i32) -> Result<f32, ReachError> {
        self.depth
            .as_ref()
            .ok_or_else(|| ReachError::SensorStall("no depth frame received yet".to_string()))?
            .sample(u, v)
    }

    pub fn snapshot(&self) -> Option<Arc<DepthFrame>> {
        self.depth.clone()
    }

    pub fn rgb(&self) -> Arc<RgbImage> {
        Arc::clone(&self.rgb)
    }

    /// Milliseconds since the buffered depth frame was captured.
    pub fn frame_age_ms(&self) -> Option<i64> {
        self.depth
            .as_ref()
            .map(|frame| frame.age_at(Utc::now()).num_milliseconds())
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }
}
