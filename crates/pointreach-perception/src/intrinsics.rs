//! Pinhole intrinsics and pixel deprojection.
//!
//! For a pixel `(u, v)` with a metric depth `d` the camera-frame point is
//!
//! ```text
//! x = (u - cx) · d / fx
//! y = (v - cy) · d / fy
//! z = d
//! ```
//!
//! # Example
//!
//! ```rust
//! use pointreach_perception::intrinsics::Intrinsics;
//!
//! let k = Intrinsics::new(500.0, 500.0, 320.0, 240.0, 640, 480).unwrap();
//! let p = k.deproject(420, 240, 2.0).unwrap();
//! assert!((p.x - 0.4).abs() < 1e-9);
//! assert!((p.z - 2.0).abs() < 1e-9);
//! ```

use pointreach_types::{CameraInfo, ReachError};

use crate::transform::Vec3;

/// A point in the camera optical frame (metres; +z along the optical axis).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl From<CameraPoint> for Vec3 {
    fn from(p: CameraPoint) -> Self {
        Vec3::new(p.x, p.y, p.z)
    }
}

/// Validated camera intrinsics. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    fx: f64,
    fy: f64,
    cx: f64,
    cy: f64,
    width: u32,
    height: u32,
}

impl Intrinsics {
    /// # Errors
    ///
    /// Returns [`ReachError::Startup`] if a focal length is not a positive
    /// finite number, the principal point is not finite, or the image has a
    /// zero dimension. Intrinsics are only ever built at startup, where a bad
    /// calibration must stop the process.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64, width: u32, height: u32) -> Result<Self, ReachError> {
        if !(fx.is_finite() && fx > 0.0 && fy.is_finite() && fy > 0.0) {
            return Err(ReachError::Startup(format!(
                "focal lengths must be positive, got fx={fx} fy={fy}"
            )));
        }
        if !(cx.is_finite() && cy.is_finite()) {
            return Err(ReachError::Startup(format!(
                "principal point must be finite, got cx={cx} cy={cy}"
            )));
        }
        if width == 0 || height == 0 {
            return Err(ReachError::Startup(format!(
                "image size must be non-zero, got {width}x{height}"
            )));
        }
        Ok(Self {
            fx,
            fy,
            cx,
            cy,
            width,
            height,
        })
    }

    pub fn fx(&self) -> f64 {
        self.fx
    }

    pub fn fy(&self) -> f64 {
        self.fy
    }

    pub fn cx(&self) -> f64 {
        self.cx
    }

    pub fn cy(&self) -> f64 {
        self.cy
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// `true` if `(u, v)` lies inside the image.
    pub fn contains(&self, u: i32, v: i32) -> bool {
        u >= 0 && v >= 0 && (u as u32) < self.width && (v as u32) < self.height
    }

    /// Deproject pixel `(u, v)` at metric `depth` into the camera frame.
    ///
    /// # Errors
    ///
    /// - [`ReachError::OutOfRange`] if the pixel is outside the image.
    /// - [`ReachError::InvalidSample`] if `depth` is zero, negative or not
    ///   finite ("no measurement").
    pub fn deproject(&self, u: i32, v: i32, depth: f32) -> Result<CameraPoint, ReachError> {
        if !self.contains(u, v) {
            return Err(ReachError::OutOfRange {
                u,
                v,
                width: self.width,
                height: self.height,
            });
        }
        if !(depth.is_finite() && depth > 0.0) {
            return Err(ReachError::InvalidSample { u, v, depth });
        }
        let d = f64::from(depth);
        Ok(CameraPoint {
            x: (f64::from(u) - self.cx) * d / self.fx,
            y: (f64::from(v) - self.cy) * d / self.fy,
            z: d,
        })
    }

    /// Project a camera-frame point back onto the (continuous) image plane.
    ///
    /// Returns `None` for points on or behind the camera plane.
    pub fn project(&self, p: CameraPoint) -> Option<(f64, f64)> {
        if !(p.z.is_finite() && p.z > 0.0) {
            return None;
        }
        Some((self.fx * p.x / p.z + self.cx, self.fy * p.y / p.z + self.cy))
    }
}

impl TryFrom<CameraInfo> for Intrinsics {
    type Error = ReachError;

    fn try_from(info: CameraInfo) -> Result<Self, Self::Error> {
        Self::new(info.fx, info.fy, info.cx, info.cy, info.width, info.height)
    }
}

impl From<Intrinsics> for CameraInfo {
    fn from(k: Intrinsics) -> Self {
        CameraInfo {
            fx: k.fx,
            fy: k.fy,
            cx: k.cx,
            cy: k.cy,
            width: k.width,
            height: k.height,
        }
    }
}
