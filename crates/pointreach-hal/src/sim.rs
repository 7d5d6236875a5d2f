//! In-process simulated devices for CI/CD testing without a physical camera.
//!
//! [`SimRgbdSensor`] and [`SimTransformSource`] are cheap to clone; every
//! clone shares the same state, so a test can keep one handle to script the
//! device while the pipeline owns the other.
//!
//! # Example
//!
//! ```rust
//! use pointreach_hal::sim::SimRgbdSensor;
//! use pointreach_hal::SensorSource;
//! use pointreach_perception::Intrinsics;
//!
//! let k = Intrinsics::new(500.0, 500.0, 320.0, 240.0, 640, 480).unwrap();
//! let mut sensor = SimRgbdSensor::new("depth_camera", Some(k));
//! sensor.push_flat_frame(2.0).unwrap();
//!
//! let frame = sensor.capture().expect("queued frame");
//! assert_eq!(frame.depth.sample(320, 240).unwrap(), 2.0);
//! assert!(sensor.capture().is_err()); // nothing new: stall
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use pointreach_perception::{DepthFrame, Intrinsics, RgbImage, RigidTransform, TfEngine};
use pointreach_types::ReachError;
use tracing::debug;

use crate::sensor::{RgbdFrame, SensorSource};
use crate::transform_source::TransformSource;

// ────────────────────────────────────────────────────────────────────────────
// Simulated RGB-D sensor
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SensorState {
    queued: VecDeque<RgbdFrame>,
    captures: usize,
    closed: bool,
}

/// A simulated RGB-D camera that hands out scripted frames.
///
/// Each queued frame is delivered exactly once; when the queue is empty
/// [`capture`][SensorSource::capture] reports a stall, like a real driver
/// with no new image.
#[derive(Debug, Clone)]
pub struct SimRgbdSensor {
    id: String,
    intrinsics: Option<Intrinsics>,
    state: Arc<Mutex<SensorState>>,
}

impl SimRgbdSensor {
    /// Create a simulated sensor. `None` intrinsics models a device that
    /// never reports its calibration.
    pub fn new(id: impl Into<String>, intrinsics: Option<Intrinsics>) -> Self {
        Self {
            id: id.into(),
            intrinsics,
            state: Arc::new(Mutex::new(SensorState::default())),
        }
    }

    /// Queue a frame for delivery.
    pub fn push_frame(&self, frame: RgbdFrame) {
        self.lock().queued.push_back(frame);
    }

    /// Queue a depth-only frame of `samples` sized to the intrinsics.
    ///
    /// # Errors
    ///
    /// Fails if the sensor has no intrinsics or `samples` does not cover the
    /// whole image.
    pub fn push_depth(&self, samples: Vec<f32>) -> Result<(), ReachError> {
        let k = self.intrinsics()?;
        let depth = DepthFrame::new(k.width(), k.height(), samples, Utc::now())?;
        self.push_frame(RgbdFrame {
            rgb: RgbImage::default(),
            depth,
        });
        Ok(())
    }

    /// Queue a frame in which every pixel reads `depth` metres.
    pub fn push_flat_frame(&self, depth: f32) -> Result<(), ReachError> {
        let k = self.intrinsics()?;
        self.push_depth(vec![depth; k.width() as usize * k.height() as usize])
    }

    /// Number of successful captures so far.
    pub fn captures(&self) -> usize {
        self.lock().captures
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SensorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SensorSource for SimRgbdSensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn intrinsics(&self) -> Result<Intrinsics, ReachError> {
        self.intrinsics
            .ok_or_else(|| ReachError::Startup(format!("sensor {} reported no intrinsics", self.id)))
    }

    fn capture(&mut self) -> Result<RgbdFrame, ReachError> {
        let mut state = self.lock();
        if state.closed {
            return Err(ReachError::SensorStall(format!("sensor {} is closed", self.id)));
        }
        match state.queued.pop_front() {
            Some(frame) => {
                state.captures += 1;
                Ok(frame)
            }
            None => Err(ReachError::SensorStall(format!("sensor {} has no new frame", self.id))),
        }
    }

    fn close(&mut self) {
        debug!(sensor = %self.id, "closing simulated sensor");
        self.lock().closed = true;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated transform provider
// ────────────────────────────────────────────────────────────────────────────

/// A simulated transform provider backed by a shared, mutable [`TfEngine`].
///
/// Tests move joints by calling [`set_transform`][Self::set_transform] or
/// disconnect the graph with [`remove_transform`][Self::remove_transform]
/// between pipeline ticks.
#[derive(Debug, Clone, Default)]
pub struct SimTransformSource {
    tf: Arc<Mutex<TfEngine>>,
    closed: Arc<Mutex<bool>>,
}

impl SimTransformSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update the pose of `child` in `parent`. The transform is
    /// stored as given, even if it is not rigid.
    pub fn set_transform(&self, parent: &str, child: &str, transform: RigidTransform) {
        self.tf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_transform(parent, child, transform);
    }

    pub fn remove_transform(&self, parent: &str, child: &str) -> bool {
        self.tf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove_transform(parent, child)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TransformSource for SimTransformSource {
    fn lookup(&self, source_frame: &str, target_frame: &str) -> Result<RigidTransform, ReachError> {
        let tf = self.tf.lock().unwrap_or_else(PoisonError::into_inner);
        TransformSource::lookup(&*tf, source_frame, target_frame)
    }

    fn close(&mut self) {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pointreach_perception::{Quaternion, Vec3};

    fn k() -> Intrinsics {
        Intrinsics::new(2.0, 2.0, 1.0, 1.0, 2, 2).unwrap()
    }

    #[test]
    fn queued_frames_are_delivered_once_in_order() {
        let mut sensor = SimRgbdSensor::new("cam", Some(k()));
        sensor.push_flat_frame(1.0).unwrap();
        sensor.push_flat_frame(2.0).unwrap();

        assert_eq!(sensor.capture().unwrap().depth.sample(0, 0).unwrap(), 1.0);
        assert_eq!(sensor.capture().unwrap().depth.sample(0, 0).unwrap(), 2.0);
        assert!(matches!(sensor.capture(), Err(ReachError::SensorStall(_))));
        assert_eq!(sensor.captures(), 2);
    }

    #[test]
    fn clones_share_state() {
        let sensor = SimRgbdSensor::new("cam", Some(k()));
        let mut owned = sensor.clone();
        sensor.push_depth(vec![0.5, 0.5, 0.0, 0.5]).unwrap();
        let frame = owned.capture().unwrap();
        assert_eq!(frame.depth.sample(0, 1).unwrap(), 0.0);
        assert_eq!(sensor.captures(), 1);
    }

    #[test]
    fn missing_intrinsics_is_a_startup_error() {
        let sensor = SimRgbdSensor::new("cam", None);
        assert!(matches!(sensor.intrinsics(), Err(ReachError::Startup(_))));
    }

    #[test]
    fn closed_sensor_stalls() {
        let mut sensor = SimRgbdSensor::new("cam", Some(k()));
        sensor.push_flat_frame(1.0).unwrap();
        sensor.close();
        assert!(sensor.is_closed());
        assert!(sensor.capture().is_err());
    }

    #[test]
    fn sim_transform_source_tracks_live_updates() {
        let source = SimTransformSource::new();
        let handle = source.clone();
        assert!(source.lookup("depth_camera", "base_link").is_err());

        handle.set_transform(
            "base_link",
            "depth_camera",
            RigidTransform::from_quaternion(Vec3::new(0.0, 0.0, 1.0), Quaternion::identity()),
        );
        let t = source.lookup("depth_camera", "base_link").unwrap();
        assert!((t.translation.z - 1.0).abs() < 1e-9);

        assert!(handle.remove_transform("base_link", "depth_camera"));
        assert!(source.lookup("depth_camera", "base_link").is_err());
    }
}
