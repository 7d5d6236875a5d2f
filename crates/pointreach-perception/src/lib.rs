//! `pointreach-perception` – projective geometry for the reaching pipeline.
//!
//! Turns a pixel and a depth reading into a point the arm controller can
//! use, expressed in the robot base frame.
//!
//! # Modules
//!
//! - [`intrinsics`] – [`Intrinsics`][intrinsics::Intrinsics]: pinhole camera
//!   model that deprojects `(u, v, depth)` into a camera-frame
//!   [`CameraPoint`][intrinsics::CameraPoint] and projects it back.
//! - [`transform`] – [`RigidTransform`][transform::RigidTransform] (rotation
//!   matrix + translation) and [`TfEngine`][transform::TfEngine], a graph of
//!   named reference frames that resolves transform chains in either
//!   direction.
//! - [`depth`] – [`DepthFrame`][depth::DepthFrame]: an immutable,
//!   bounds-checked depth raster.

pub mod depth;
pub mod intrinsics;
pub mod transform;

pub use depth::{DepthFrame, RgbImage};
pub use intrinsics::{CameraPoint, Intrinsics};
pub use transform::{Matrix3, Quaternion, RigidTransform, TfEngine, Vec3};
