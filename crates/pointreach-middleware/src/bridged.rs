//! Bus-fed device clients.
//!
//! Camera and kinematics drivers run out of process and push their data onto
//! the [`EventBus`] (usually through the [`DriverBridge`][crate::bridge::DriverBridge]).
//! The types here listen to that traffic on a background task, keep only the
//! newest value, and answer the pipeline's non-blocking queries from it.
//!
//! - [`BusSensor`] – a [`SensorSource`] over [`Topic::SensorData`].
//! - [`BusTransformSource`] – a [`TransformSource`] over [`Topic::Transforms`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use pointreach_hal::{RgbdFrame, SensorSource, TransformSource};
use pointreach_perception::{Intrinsics, Quaternion, RigidTransform, TfEngine, Vec3};
use pointreach_types::{CameraInfo, EventPayload, ReachError, RgbdImages};
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bus::{EventBus, Topic};

// ────────────────────────────────────────────────────────────────────────────
// BusSensor
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct LatestImages {
    info: Option<CameraInfo>,
    images: Option<RgbdImages>,
}

/// Production [`SensorSource`] that latches camera data published on the bus.
///
/// Only the newest image pair is kept. Each pair is handed out at most once,
/// so a driver that stops streaming shows up as a run of
/// [`ReachError::SensorStall`]s instead of the same stale frame.
pub struct BusSensor {
    id: String,
    latest: Arc<Mutex<LatestImages>>,
    info_ready: Arc<Notify>,
    listener: Option<JoinHandle<()>>,
}

impl BusSensor {
    /// Subscribe to [`Topic::SensorData`] and start latching.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(id: impl Into<String>, bus: &EventBus) -> Self {
        let id = id.into();
        let latest = Arc::new(Mutex::new(LatestImages::default()));
        let info_ready = Arc::new(Notify::new());
        let mut rx = bus.subscribe_to(Topic::SensorData);

        let task_latest = Arc::clone(&latest);
        let task_ready = Arc::clone(&info_ready);
        let task_id = id.clone();
        let listener = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => match event.payload {
                        EventPayload::CameraInfo(info) => {
                            lock(&task_latest).info = Some(info);
                            task_ready.notify_one();
                        }
                        EventPayload::Images(images) => {
                            lock(&task_latest).images = Some(images);
                        }
                        _ => {}
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Older frames are worthless anyway.
                        debug!(sensor = %task_id, lagged_by = n, "sensor listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self {
            id,
            latest,
            info_ready,
            listener: Some(listener),
        }
    }

    /// Wait up to `timeout` for the driver to announce its calibration.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::Startup`] if nothing usable arrives in time.
    pub async fn wait_for_intrinsics(&self, timeout: Duration) -> Result<Intrinsics, ReachError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if lock(&self.latest).info.is_some() {
                return self.intrinsics();
            }
            if tokio::time::timeout_at(deadline, self.info_ready.notified())
                .await
                .is_err()
            {
                return Err(ReachError::Startup(format!(
                    "sensor {} reported no intrinsics within {timeout:?}",
                    self.id
                )));
            }
        }
    }
}

impl SensorSource for BusSensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn intrinsics(&self) -> Result<Intrinsics, ReachError> {
        match lock(&self.latest).info {
            Some(info) => Intrinsics::try_from(info),
            None => Err(ReachError::Startup(format!(
                "sensor {} reported no intrinsics",
                self.id
            ))),
        }
    }

    fn capture(&mut self) -> Result<RgbdFrame, ReachError> {
        let images = lock(&self.latest).images.take().ok_or_else(|| {
            ReachError::SensorStall(format!("sensor {} has no new frame", self.id))
        })?;
        RgbdFrame::from_images(images)
    }

    fn close(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

impl Drop for BusSensor {
    fn drop(&mut self) {
        self.close();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// BusTransformSource
// ────────────────────────────────────────────────────────────────────────────

/// Production [`TransformSource`] that mirrors pose updates from the bus into
/// a live [`TfEngine`].
pub struct BusTransformSource {
    tf: Arc<Mutex<TfEngine>>,
    listener: Option<JoinHandle<()>>,
}

impl BusTransformSource {
    /// Subscribe to [`Topic::Transforms`] and start mirroring.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(bus: &EventBus) -> Self {
        let tf = Arc::new(Mutex::new(TfEngine::new()));
        let mut rx = bus.subscribe_to(Topic::Transforms);

        let task_tf = Arc::clone(&tf);
        let listener = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let EventPayload::TransformUpdate(update) = event.payload {
                            let rotation = Quaternion::from_array(update.rotation);
                            if !rotation.is_unit() {
                                warn!(
                                    parent = %update.parent,
                                    child = %update.child,
                                    rotation = ?update.rotation,
                                    "dropping pose update with non-unit quaternion"
                                );
                                continue;
                            }
                            let transform = RigidTransform::from_quaternion(
                                Vec3::from_array(update.translation),
                                rotation,
                            );
                            lock(&task_tf).set_transform(&update.parent, &update.child, transform);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(lagged_by = n, "transform listener lagged; poses may be stale until next update");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self {
            tf,
            listener: Some(listener),
        }
    }
}

impl TransformSource for BusTransformSource {
    fn lookup(&self, source_frame: &str, target_frame: &str) -> Result<RigidTransform, ReachError> {
        let tf = lock(&self.tf);
        TransformSource::lookup(&*tf, source_frame, target_frame)
    }

    fn close(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

impl Drop for BusTransformSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pointreach_types::{ColorImage, DepthImage, Event, FrameTransform};

    const SETTLE: Duration = Duration::from_millis(20);

    fn info() -> CameraInfo {
        CameraInfo {
            fx: 500.0,
            fy: 500.0,
            cx: 1.0,
            cy: 1.0,
            width: 2,
            height: 2,
        }
    }

    fn images(depth: f32) -> RgbdImages {
        RgbdImages {
            rgb: ColorImage::default(),
            depth: DepthImage {
                width: 2,
                height: 2,
                samples: vec![depth; 4],
            },
        }
    }

    #[tokio::test]
    async fn sensor_waits_for_announced_intrinsics() {
        let bus = EventBus::default();
        let sensor = BusSensor::spawn("depth_camera", &bus);

        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(SETTLE).await;
            publisher.publish_to(Topic::SensorData, Event::new("driver", EventPayload::CameraInfo(info())));
        });

        let k = sensor.wait_for_intrinsics(Duration::from_secs(2)).await.unwrap();
        assert_eq!(k.width(), 2);
    }

    #[tokio::test]
    async fn sensor_without_intrinsics_fails_startup() {
        let bus = EventBus::default();
        let sensor = BusSensor::spawn("depth_camera", &bus);
        let err = sensor
            .wait_for_intrinsics(Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, ReachError::Startup(_)));
    }

    #[tokio::test]
    async fn sensor_keeps_only_newest_frame_and_hands_it_out_once() {
        let bus = EventBus::default();
        let mut sensor = BusSensor::spawn("depth_camera", &bus);
        assert!(matches!(sensor.capture(), Err(ReachError::SensorStall(_))));

        bus.publish_to(Topic::SensorData, Event::new("driver", EventPayload::Images(images(1.0))));
        bus.publish_to(Topic::SensorData, Event::new("driver", EventPayload::Images(images(2.0))));
        tokio::time::sleep(SETTLE).await;

        let frame = sensor.capture().unwrap();
        assert_eq!(frame.depth.sample(0, 0).unwrap(), 2.0);
        assert!(matches!(sensor.capture(), Err(ReachError::SensorStall(_))));
    }

    #[tokio::test]
    async fn transform_source_follows_pose_updates() {
        let bus = EventBus::default();
        let source = BusTransformSource::spawn(&bus);
        assert!(source.lookup("depth_camera", "base_link").is_err());

        for z in [1.0, 1.5] {
            bus.publish_to(
                Topic::Transforms,
                Event::new(
                    "driver",
                    EventPayload::TransformUpdate(FrameTransform {
                        parent: "base_link".to_string(),
                        child: "depth_camera".to_string(),
                        translation: [0.0, 0.0, z],
                        rotation: [1.0, 0.0, 0.0, 0.0],
                    }),
                ),
            );
            tokio::time::sleep(SETTLE).await;
            let t = source.lookup("depth_camera", "base_link").unwrap();
            assert!((t.translation.z - z).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn transform_source_drops_non_unit_rotations() {
        let bus = EventBus::default();
        let source = BusTransformSource::spawn(&bus);
        let update = |z: f64, rotation: [f64; 4]| {
            Event::new(
                "driver",
                EventPayload::TransformUpdate(FrameTransform {
                    parent: "base_link".to_string(),
                    child: "depth_camera".to_string(),
                    translation: [0.0, 0.0, z],
                    rotation,
                }),
            )
        };

        bus.publish_to(Topic::Transforms, update(2.0, [0.0, 0.0, 0.0, 0.0]));
        tokio::time::sleep(SETTLE).await;
        assert!(source.lookup("depth_camera", "base_link").is_err());

        bus.publish_to(Topic::Transforms, update(1.0, [1.0, 0.0, 0.0, 0.0]));
        bus.publish_to(Topic::Transforms, update(3.0, [2.0, 0.0, 0.0, 0.0]));
        tokio::time::sleep(SETTLE).await;
        let t = source.lookup("depth_camera", "base_link").unwrap();
        assert!((t.translation.z - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn close_stops_listening() {
        let bus = EventBus::default();
        let mut sensor = BusSensor::spawn("depth_camera", &bus);
        sensor.close();
        tokio::time::sleep(SETTLE).await;
        assert_eq!(bus.subscriber_count(Topic::SensorData), 0);
    }
}
