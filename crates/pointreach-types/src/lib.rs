use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Image-space coordinates of a point the operator pointed at.
///
/// Signed so that out-of-image requests (including negative coordinates)
/// survive parsing and are rejected by the bounds check instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelRequest {
    pub u: i32,
    pub v: i32,
}

impl PixelRequest {
    pub fn new(u: i32, v: i32) -> Self {
        Self { u, v }
    }
}

/// A 3-D point in the robot base frame, in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BasePoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Calibration reported by a depth camera driver (pinhole model, no
/// distortion).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: u32,
    pub height: u32,
}

/// Row-major depth raster in metres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthImage {
    pub width: u32,
    pub height: u32,
    pub samples: Vec<f32>,
}

/// Packed RGB24 colour image.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ColorImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// A synchronised colour + depth pair as delivered by the camera driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RgbdImages {
    #[serde(default)]
    pub rgb: ColorImage,
    pub depth: DepthImage,
}

/// Pose of `child` expressed in `parent`, as published by a transform
/// provider. `rotation` is a unit quaternion in `[w, x, y, z]` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameTransform {
    pub parent: String,
    pub child: String,
    pub translation: [f64; 3],
    pub rotation: [f64; 4],
}

/// Unified event wrapper for the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "pointreach-middleware::bridge/pixel"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Stamp `payload` with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// Raw inbound pointing message; validated by the request intake.
    PixelMessage(serde_json::Value),
    /// A deprojected point in the base frame, ready for reaching.
    TargetPoint(BasePoint),
    CameraInfo(CameraInfo),
    Images(RgbdImages),
    TransformUpdate(FrameTransform),
    /// An idle motion the gating coordinator decided to perform.
    IdleMotion { index: usize, name: String },
    Fault { component: String, message: String },
}

/// Workspace-wide error type.
///
/// Everything above `Startup` is local to one tick or one request: callers
/// drop the work item and carry on. `Startup` is fatal.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReachError {
    #[error("Invalid depth sample at ({u}, {v}): {depth}")]
    InvalidSample { u: i32, v: i32, depth: f32 },

    #[error("Pixel ({u}, {v}) is outside the {width}x{height} image")]
    OutOfRange {
        u: i32,
        v: i32,
        width: u32,
        height: u32,
    },

    #[error("Transform {from_frame} -> {to_frame} unavailable")]
    TransformUnavailable { from_frame: String, to_frame: String },

    #[error("Invalid transform: {0}")]
    InvalidTransform(String),

    #[error("Sensor stall: {0}")]
    SensorStall(String),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Startup failed: {0}")]
    Startup(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ReachError {
    /// `true` for errors that only abandon the current tick or request.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ReachError::Startup(_))
    }
}
