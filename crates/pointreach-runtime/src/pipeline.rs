//! [`TransformPipeline`] – pixel request in, base-frame point out.
//!
//! Each [`tick`][TransformPipeline::tick]:
//!
//! 1. **Refresh** – pull the newest RGB-D pair into the [`DepthBuffer`]. A
//!    stall keeps the previous frame and the tick carries on.
//! 2. **Take** – remove the pending [`PixelRequest`] from the
//!    [`RequestSlot`]. No request ends the tick.
//! 3. **Sample** – read the depth under the pixel.
//! 4. **Deproject** – pinhole model → camera-frame point.
//! 5. **Resolve** – live camera → base transform, rejected unless rigid.
//! 6. **Publish** – `R · p + t` as a [`BasePoint`] on
//!    [`Topic::TargetPoints`].
//!
//! A failure in steps 3–5 drops the request without output. It is not
//! retried; the requester has to send it again.
//!
//! # Example
//!
//! ```rust
//! use pointreach_hal::{SimRgbdSensor, SimTransformSource};
//! use pointreach_middleware::EventBus;
//! use pointreach_perception::{Intrinsics, RigidTransform};
//! use pointreach_runtime::{PipelineConfig, RequestSlot, TickOutcome, TransformPipeline};
//! use pointreach_types::PixelRequest;
//!
//! let k = Intrinsics::new(500.0, 500.0, 320.0, 240.0, 640, 480).unwrap();
//! let sensor = SimRgbdSensor::new("depth_camera", Some(k));
//! sensor.push_flat_frame(2.0).unwrap();
//! let tf = SimTransformSource::new();
//! tf.set_transform("base_link", "depth_camera", RigidTransform::identity());
//!
//! let slot = RequestSlot::new();
//! let mut pipeline = TransformPipeline::new(
//!     PipelineConfig::default(),
//!     Box::new(sensor),
//!     Box::new(tf),
//!     slot.clone(),
//!     EventBus::default(),
//! )
//! .unwrap();
//!
//! slot.latch(PixelRequest::new(320, 240));
//! match pipeline.tick() {
//!     TickOutcome::Published(p) => assert_eq!((p.x, p.y, p.z), (0.0, 0.0, 2.0)),
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```

use std::time::Duration;

use pointreach_hal::{SensorSource, TransformSource};
use pointreach_middleware::{EventBus, Topic};
use pointreach_perception::{Intrinsics, Vec3};
use pointreach_types::{BasePoint, Event, EventPayload, PixelRequest, ReachError};
use tracing::{debug, info, instrument, warn};

use crate::buffer::DepthBuffer;
use crate::intake::RequestSlot;
use crate::resolver::TransformResolver;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default tick period.
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(20);

/// Configuration bundle for [`TransformPipeline`].
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Tick period of the runner.
    pub period: Duration,
    /// Frame the depth camera reports in.
    pub camera_frame: String,
    /// Frame the published points are expressed in.
    pub base_frame: String,
    /// Name stamped as the source of every published point.
    pub output_topic: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
            camera_frame: "depth_camera".to_string(),
            base_frame: "base_link".to_string(),
            output_topic: "/pointHandTransform/target:o".to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Observable state
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No request is waiting.
    Idle,
    /// A request is latched and will be handled on the next tick.
    Pending,
}

/// Result of one [`TransformPipeline::tick`].
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    NoRequest,
    Published(BasePoint),
    Dropped {
        request: PixelRequest,
        reason: ReachError,
    },
}

/// Counters kept over the pipeline's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub ticks: u64,
    pub published: u64,
    pub dropped: u64,
    pub stalls: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// TransformPipeline
// ─────────────────────────────────────────────────────────────────────────────

pub struct TransformPipeline {
    config: PipelineConfig,
    intrinsics: Intrinsics,
    sensor: Box<dyn SensorSource>,
    resolver: TransformResolver,
    buffer: DepthBuffer,
    slot: RequestSlot,
    bus: EventBus,
    stats: PipelineStats,
    closed: bool,
}

impl TransformPipeline {
    /// Build the pipeline, reading the sensor's calibration once.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::Startup`] if the sensor reports no usable
    /// intrinsics. There is no degraded mode.
    pub fn new(
        config: PipelineConfig,
        sensor: Box<dyn SensorSource>,
        transforms: Box<dyn TransformSource>,
        slot: RequestSlot,
        bus: EventBus,
    ) -> Result<Self, ReachError> {
        let intrinsics = sensor.intrinsics().map_err(|e| match e {
            ReachError::Startup(_) => e,
            other => ReachError::Startup(other.to_string()),
        })?;
        info!(
            sensor = sensor.id(),
            fx = intrinsics.fx(),
            fy = intrinsics.fy(),
            cx = intrinsics.cx(),
            cy = intrinsics.cy(),
            width = intrinsics.width(),
            height = intrinsics.height(),
            "transform pipeline initialised"
        );
        Ok(Self {
            config,
            intrinsics,
            sensor,
            resolver: TransformResolver::new(transforms),
            buffer: DepthBuffer::new(),
            slot,
            bus,
            stats: PipelineStats::default(),
            closed: false,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn intrinsics(&self) -> Intrinsics {
        self.intrinsics
    }

    /// Every tick consumes the latched request, so the pipeline is
    /// [`Pending`][PipelineState::Pending] exactly while one is waiting.
    pub fn state(&self) -> PipelineState {
        if self.slot.is_pending() {
            PipelineState::Pending
        } else {
            PipelineState::Idle
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn buffer(&self) -> &DepthBuffer {
        &self.buffer
    }

    /// Run one refresh/take/resolve/publish step. Never blocks on I/O.
    #[instrument(name = "pipeline_tick", skip(self), fields(tick = self.stats.ticks))]
    pub fn tick(&mut self) -> TickOutcome {
        self.stats.ticks += 1;

        if !self.buffer.refresh(self.sensor.as_mut()) {
            self.stats.stalls += 1;
        }

        let Some(request) = self.slot.take_request() else {
            return TickOutcome::NoRequest;
        };

        match self.resolve(request) {
            Ok(point) => {
                let event = Event::new(self.config.output_topic.clone(), EventPayload::TargetPoint(point));
                let receivers = self.bus.publish_to(Topic::TargetPoints, event);
                debug!(
                    u = request.u,
                    v = request.v,
                    x = point.x,
                    y = point.y,
                    z = point.z,
                    receivers,
                    "published target point"
                );
                self.stats.published += 1;
                TickOutcome::Published(point)
            }
            Err(reason) => {
                warn!(
                    u = request.u,
                    v = request.v,
                    frame_age_ms = self.buffer.frame_age_ms(),
                    error = %reason,
                    "dropping pixel request"
                );
                self.stats.dropped += 1;
                TickOutcome::Dropped { request, reason }
            }
        }
    }

    fn resolve(&self, request: PixelRequest) -> Result<BasePoint, ReachError> {
        let depth = self.buffer.current_depth(request.u, request.v)?;
        let camera = self.intrinsics.deproject(request.u, request.v, depth)?;
        let transform = self
            .resolver
            .lookup(&self.config.camera_frame, &self.config.base_frame)?;
        let base = transform.apply(Vec3::from(camera));
        Ok(BasePoint {
            x: base.x,
            y: base.y,
            z: base.z,
        })
    }

    /// Release the sensor and transform clients. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.sensor.close();
        self.resolver.close();
        self.closed = true;
        info!(
            ticks = self.stats.ticks,
            published = self.stats.published,
            dropped = self.stats.dropped,
            stalls = self.stats.stalls,
            "transform pipeline closed"
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pointreach_hal::{SimRgbdSensor, SimTransformSource};
    use pointreach_middleware::TopicReceiver;
    use pointreach_perception::{Matrix3, RigidTransform};

    struct Rig {
        sensor: SimRgbdSensor,
        tf: SimTransformSource,
        slot: RequestSlot,
        bus: EventBus,
        pipeline: TransformPipeline,
    }

    fn rig() -> Rig {
        let k = Intrinsics::new(500.0, 500.0, 320.0, 240.0, 640, 480).unwrap();
        let sensor = SimRgbdSensor::new("depth_camera", Some(k));
        let tf = SimTransformSource::new();
        tf.set_transform("base_link", "depth_camera", RigidTransform::identity());
        let slot = RequestSlot::new();
        let bus = EventBus::default();
        let pipeline = TransformPipeline::new(
            PipelineConfig::default(),
            Box::new(sensor.clone()),
            Box::new(tf.clone()),
            slot.clone(),
            bus.clone(),
        )
        .unwrap();
        Rig {
            sensor,
            tf,
            slot,
            bus,
            pipeline,
        }
    }

    fn published(outcome: TickOutcome) -> BasePoint {
        match outcome {
            TickOutcome::Published(p) => p,
            other => panic!("expected a published point, got {other:?}"),
        }
    }

    fn dropped_reason(outcome: TickOutcome) -> ReachError {
        match outcome {
            TickOutcome::Dropped { reason, .. } => reason,
            other => panic!("expected a dropped request, got {other:?}"),
        }
    }

    fn assert_close(p: BasePoint, x: f64, y: f64, z: f64) {
        assert!(
            (p.x - x).abs() < 1e-9 && (p.y - y).abs() < 1e-9 && (p.z - z).abs() < 1e-9,
            "got {p:?}, expected ({x}, {y}, {z})"
        );
    }

    #[test]
    fn missing_intrinsics_is_fatal() {
        let result = TransformPipeline::new(
            PipelineConfig::default(),
            Box::new(SimRgbdSensor::new("cam", None)),
            Box::new(SimTransformSource::new()),
            RequestSlot::new(),
            EventBus::default(),
        );
        assert!(matches!(result, Err(ReachError::Startup(_))));
    }

    #[test]
    fn no_request_no_output() {
        let mut r = rig();
        r.sensor.push_flat_frame(2.0).unwrap();
        assert_eq!(r.pipeline.tick(), TickOutcome::NoRequest);
        assert_eq!(r.pipeline.state(), PipelineState::Idle);
        assert_eq!(r.pipeline.buffer().frames_received(), 1);
    }

    #[test]
    fn latched_request_is_pending_until_the_next_tick() {
        let mut r = rig();
        r.sensor.push_flat_frame(2.0).unwrap();
        r.slot.latch(PixelRequest::new(320, 240));
        assert_eq!(r.pipeline.state(), PipelineState::Pending);
        published(r.pipeline.tick());
        assert_eq!(r.pipeline.state(), PipelineState::Idle);

        r.slot.latch(PixelRequest::new(9999, 0));
        assert_eq!(r.pipeline.state(), PipelineState::Pending);
        dropped_reason(r.pipeline.tick());
        assert_eq!(r.pipeline.state(), PipelineState::Idle);
    }

    #[test]
    fn principal_point_with_identity_transform() {
        let mut r = rig();
        r.sensor.push_flat_frame(2.0).unwrap();
        r.slot.latch(PixelRequest::new(320, 240));
        assert_close(published(r.pipeline.tick()), 0.0, 0.0, 2.0);
    }

    #[test]
    fn off_centre_pixel_with_translated_camera() {
        let mut r = rig();
        r.tf.set_transform(
            "base_link",
            "depth_camera",
            RigidTransform::new(Matrix3::identity(), Vec3::new(0.0, 0.0, 1.0)),
        );
        r.sensor.push_flat_frame(2.0).unwrap();
        r.slot.latch(PixelRequest::new(420, 240));
        assert_close(published(r.pipeline.tick()), 0.4, 0.0, 3.0);
    }

    #[tokio::test]
    async fn published_points_reach_bus_subscribers() {
        let mut r = rig();
        let mut rx: TopicReceiver = r.bus.subscribe_to(Topic::TargetPoints);
        r.sensor.push_flat_frame(2.0).unwrap();
        r.slot.latch(PixelRequest::new(320, 240));
        r.pipeline.tick();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.source, "/pointHandTransform/target:o");
        assert!(matches!(event.payload, EventPayload::TargetPoint(_)));
    }

    #[test]
    fn last_write_wins_before_a_tick() {
        let mut r = rig();
        r.sensor.push_flat_frame(1.0).unwrap();
        r.slot.latch(PixelRequest::new(1, 1));
        r.slot.latch(PixelRequest::new(2, 2));

        let p = published(r.pipeline.tick());
        assert_close(p, (2.0 - 320.0) / 500.0, (2.0 - 240.0) / 500.0, 1.0);
        assert_eq!(r.pipeline.tick(), TickOutcome::NoRequest);
        assert_eq!(r.pipeline.stats().published, 1);
    }

    #[test]
    fn zero_depth_drops_request() {
        let mut r = rig();
        r.sensor.push_flat_frame(0.0).unwrap();
        r.slot.latch(PixelRequest::new(320, 240));

        assert!(matches!(
            dropped_reason(r.pipeline.tick()),
            ReachError::InvalidSample { .. }
        ));
        assert_eq!(r.pipeline.state(), PipelineState::Idle);
        assert_eq!(r.pipeline.stats().dropped, 1);
    }

    #[test]
    fn nan_depth_drops_request() {
        let mut r = rig();
        r.sensor.push_flat_frame(f32::NAN).unwrap();
        r.slot.latch(PixelRequest::new(10, 10));
        assert!(matches!(
            dropped_reason(r.pipeline.tick()),
            ReachError::InvalidSample { .. }
        ));
    }

    #[test]
    fn out_of_image_request_is_dropped() {
        let mut r = rig();
        r.sensor.push_flat_frame(2.0).unwrap();
        r.slot.latch(PixelRequest::new(640, 0));
        assert!(matches!(
            dropped_reason(r.pipeline.tick()),
            ReachError::OutOfRange { .. }
        ));
    }

    #[test]
    fn request_before_first_frame_is_dropped() {
        let mut r = rig();
        r.slot.latch(PixelRequest::new(320, 240));
        assert!(matches!(
            dropped_reason(r.pipeline.tick()),
            ReachError::SensorStall(_)
        ));
        assert_eq!(r.pipeline.stats().stalls, 1);
    }

    #[test]
    fn transform_failure_is_not_retried() {
        let mut r = rig();
        r.tf.remove_transform("base_link", "depth_camera");
        r.sensor.push_flat_frame(2.0).unwrap();
        r.slot.latch(PixelRequest::new(320, 240));

        assert!(matches!(
            dropped_reason(r.pipeline.tick()),
            ReachError::TransformUnavailable { .. }
        ));

        r.tf.set_transform("base_link", "depth_camera", RigidTransform::identity());
        assert_eq!(r.pipeline.tick(), TickOutcome::NoRequest);
    }

    #[test]
    fn non_orthonormal_rotation_is_rejected() {
        let mut r = rig();
        r.tf.set_transform(
            "base_link",
            "depth_camera",
            RigidTransform::new(
                Matrix3::new([[1.0, 0.5, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]),
                Vec3::zero(),
            ),
        );
        r.sensor.push_flat_frame(2.0).unwrap();
        r.slot.latch(PixelRequest::new(320, 240));
        assert!(matches!(
            dropped_reason(r.pipeline.tick()),
            ReachError::InvalidTransform(_)
        ));
    }

    #[test]
    fn stall_uses_previous_frame() {
        let mut r = rig();
        r.sensor.push_flat_frame(1.5).unwrap();
        assert_eq!(r.pipeline.tick(), TickOutcome::NoRequest);

        // No new frame queued: this tick stalls but still answers.
        r.slot.latch(PixelRequest::new(320, 240));
        assert_close(published(r.pipeline.tick()), 0.0, 0.0, 1.5);
        assert_eq!(r.pipeline.stats().stalls, 1);
    }

    #[test]
    fn transform_is_looked_up_every_tick() {
        let mut r = rig();
        r.sensor.push_flat_frame(2.0).unwrap();
        r.slot.latch(PixelRequest::new(320, 240));
        assert_close(published(r.pipeline.tick()), 0.0, 0.0, 2.0);

        r.tf.set_transform(
            "base_link",
            "depth_camera",
            RigidTransform::new(Matrix3::identity(), Vec3::new(0.5, 0.0, 0.0)),
        );
        r.slot.latch(PixelRequest::new(320, 240));
        assert_close(published(r.pipeline.tick()), 0.5, 0.0, 2.0);
    }

    #[test]
    fn close_releases_devices_once() {
        let mut r = rig();
        r.pipeline.close();
        r.pipeline.close();
        assert!(r.sensor.is_closed());
        assert!(r.tf.is_closed());
    }
}
