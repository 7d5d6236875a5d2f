//! Rigid transforms and the frame graph.
//!
//! Maintains a graph of named reference frames and the rigid-body transforms
//! (rotation matrix + translation) that relate them. Given any two frame
//! names the engine composes the chain between them via BFS, inverting edges
//! that are walked child-to-parent.
//!
//! # Example
//!
//! ```rust
//! use pointreach_perception::transform::{Quaternion, RigidTransform, TfEngine, Vec3};
//!
//! let mut tf = TfEngine::new();
//!
//! // The head is 1 m above the base; the camera is 0.1 m in front of the head.
//! tf.set_transform("base_link", "head",
//!     RigidTransform::from_quaternion(Vec3::new(0.0, 0.0, 1.0), Quaternion::identity()));
//! tf.set_transform("head", "depth_camera",
//!     RigidTransform::from_quaternion(Vec3::new(0.1, 0.0, 0.0), Quaternion::identity()));
//!
//! // Camera-frame points mapped into the base frame.
//! let t = tf.lookup("depth_camera", "base_link").unwrap();
//! let p = t.apply(Vec3::zero());
//! assert!((p.x - 0.1).abs() < 1e-9);
//! assert!((p.z - 1.0).abs() < 1e-9);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};

/// Tolerance used when checking that a rotation matrix is orthonormal.
pub const ORTHONORMAL_TOLERANCE: f64 = 1e-4;

// ────────────────────────────────────────────────────────────────────────────
// Primitive types
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D vector (metres when used as a point or translation).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The zero vector.
    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn from_array(a: [f64; 3]) -> Self {
        Self::new(a[0], a[1], a[2])
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }

    pub fn norm(self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
///
/// Only used as the wire form of a rotation; all arithmetic happens on
/// [`Matrix3`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    /// Create a quaternion. The caller is responsible for providing a unit
    /// quaternion (|q| = 1); a non-unit input yields a scaled matrix that
    /// [`Matrix3::is_orthonormal`] will reject.
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation (no rotation).
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    pub fn from_array(a: [f64; 4]) -> Self {
        Self::new(a[0], a[1], a[2], a[3])
    }

    /// Rotation of `angle_rad` around the unit `axis`.
    pub fn from_axis_angle(axis: Vec3, angle_rad: f64) -> Self {
        let half = angle_rad * 0.5;
        let s = half.sin();
        Self::new(half.cos(), axis.x * s, axis.y * s, axis.z * s)
    }

    /// `|q|²`.
    pub fn norm_squared(self) -> f64 {
        self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z
    }

    /// `true` if `|q|² ≈ 1` within the rigidity tolerance.
    pub fn is_unit(self) -> bool {
        (self.norm_squared() - 1.0).abs() <= ORTHONORMAL_TOLERANCE
    }

    /// Convert to the equivalent rotation matrix.
    ///
    /// Uses the homogeneous form, which equals `|q|²·R`. A unit quaternion
    /// gives the exact rotation; any other input (including zero) gives a
    /// matrix that fails [`Matrix3::is_orthonormal`].
    pub fn to_matrix(self) -> Matrix3 {
        let Self { w, x, y, z } = self;
        let (ww, xx, yy, zz) = (w * w, x * x, y * y, z * z);
        Matrix3::new([
            [
                ww + xx - yy - zz,
                2.0 * (x * y - w * z),
                2.0 * (x * z + w * y),
            ],
            [
                2.0 * (x * y + w * z),
                ww - xx + yy - zz,
                2.0 * (y * z - w * x),
            ],
            [
                2.0 * (x * z - w * y),
                2.0 * (y * z + w * x),
                ww - xx - yy + zz,
            ],
        ])
    }
}

/// A row-major 3×3 matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix3 {
    pub m: [[f64; 3]; 3],
}

impl Matrix3 {
    pub fn new(m: [[f64; 3]; 3]) -> Self {
        Self { m }
    }

    pub fn identity() -> Self {
        Self::new([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
    }

    pub fn transpose(self) -> Self {
        let m = self.m;
        Self::new([
            [m[0][0], m[1][0], m[2][0]],
            [m[0][1], m[1][1], m[2][1]],
            [m[0][2], m[1][2], m[2][2]],
        ])
    }

    pub fn mul(self, rhs: Self) -> Self {
        let mut out = [[0.0; 3]; 3];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = (0..3).map(|k| self.m[i][k] * rhs.m[k][j]).sum();
            }
        }
        Self::new(out)
    }

    pub fn mul_vec(self, v: Vec3) -> Vec3 {
        let m = self.m;
        Vec3::new(
            m[0][0] * v.x + m[0][1] * v.y + m[0][2] * v.z,
            m[1][0] * v.x + m[1][1] * v.y + m[1][2] * v.z,
            m[2][0] * v.x + m[2][1] * v.y + m[2][2] * v.z,
        )
    }

    pub fn determinant(self) -> f64 {
        let m = self.m;
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    }

    /// `true` if `RᵀR ≈ I` and `det(R) ≈ 1`, i.e. a proper rotation.
    pub fn is_orthonormal(self, tolerance: f64) -> bool {
        if self.m.iter().flatten().any(|c| !c.is_finite()) {
            return false;
        }
        let gram = self.transpose().mul(self);
        let identity = Self::identity();
        let gram_ok = gram
            .m
            .iter()
            .flatten()
            .zip(identity.m.iter().flatten())
            .all(|(a, b)| (a - b).abs() <= tolerance);
        gram_ok && (self.determinant() - 1.0).abs() <= tolerance
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RigidTransform
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body transform: rotation followed by translation.
///
/// Maps a point `p` expressed in a source frame into a target frame as
/// `R · p + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    pub rotation: Matrix3,
    pub translation: Vec3,
}

impl RigidTransform {
    pub fn new(rotation: Matrix3, translation: Vec3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn from_quaternion(translation: Vec3, rotation: Quaternion) -> Self {
        Self::new(rotation.to_matrix(), translation)
    }

    /// The identity transform (no translation, no rotation).
    pub fn identity() -> Self {
        Self::new(Matrix3::identity(), Vec3::zero())
    }

    /// `R · p + t`.
    pub fn apply(self, p: Vec3) -> Vec3 {
        self.rotation.mul_vec(p).add(self.translation)
    }

    /// The inverse transform, `(Rᵀ, -Rᵀ·t)`. Only valid for orthonormal
    /// rotations.
    pub fn inverse(self) -> Self {
        let rt = self.rotation.transpose();
        Self::new(rt, rt.mul_vec(self.translation).neg())
    }

    /// Compose two transforms: `other` applied first, then `self`.
    ///
    /// If `self` maps B into A and `other` maps C into B, the result maps C
    /// into A.
    pub fn compose(self, other: Self) -> Self {
        Self::new(
            self.rotation.mul(other.rotation),
            self.apply(other.translation),
        )
    }

    pub fn is_rigid(self) -> bool {
        self.rotation.is_orthonormal(ORTHONORMAL_TOLERANCE) && self.translation.is_finite()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TfEngine
// ────────────────────────────────────────────────────────────────────────────

/// A graph of named reference frames and the [`RigidTransform`]s that relate
/// them.
///
/// Each edge is registered as `parent → child` and stores the pose of the
/// child in the parent, i.e. the transform mapping child-frame points into
/// the parent frame. Lookups may walk edges in either direction.
#[derive(Debug, Default, Clone)]
pub struct TfEngine {
    /// `edges[parent][child] = RigidTransform`
    edges: HashMap<String, HashMap<String, RigidTransform>>,
}

impl TfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update the pose of `child_frame` in `parent_frame`.
    pub fn set_transform(&mut self, parent_frame: &str, child_frame: &str, transform: RigidTransform) {
        self.edges
            .entry(parent_frame.to_string())
            .or_default()
            .insert(child_frame.to_string(), transform);
    }

    /// Forget the edge between `parent_frame` and `child_frame`.
    pub fn remove_transform(&mut self, parent_frame: &str, child_frame: &str) -> bool {
        self.edges
            .get_mut(parent_frame)
            .map(|children| children.remove(child_frame).is_some())
            .unwrap_or(false)
    }

    /// `true` if `frame` appears anywhere in the graph.
    pub fn has_frame(&self, frame: &str) -> bool {
        self.edges.contains_key(frame)
            || self.edges.values().any(|children| children.contains_key(frame))
    }

    /// Compute the [`RigidTransform`] that maps points expressed in
    /// `source_frame` into `target_frame`.
    ///
    /// Returns `None` if the two frames are not connected.
    pub fn lookup(&self, source_frame: &str, target_frame: &str) -> Option<RigidTransform> {
        if source_frame == target_frame {
            return Some(RigidTransform::identity());
        }

        // Each queue item carries the transform mapping source_frame points
        // into the current node.
        let mut queue: VecDeque<(String, RigidTransform)> = VecDeque::new();
        let mut visited: HashSet<String> = HashSet::new();

        queue.push_back((source_frame.to_string(), RigidTransform::identity()));
        visited.insert(source_frame.to_string());

        while let Some((current, accumulated)) = queue.pop_front() {
            for (next, step) in self.neighbours(&current) {
                if visited.contains(&next) {
                    continue;
                }
                let composed = step.compose(accumulated);
                if next == target_frame {
                    return Some(composed);
                }
                visited.insert(next.clone());
                queue.push_back((next, composed));
            }
        }

        None
    }

    /// Adjacent frames of `frame` with the transform mapping `frame` points
    /// into each of them.
    fn neighbours(&self, frame: &str) -> Vec<(String, RigidTransform)> {
        let mut out = Vec::new();
        // Up: frame is a child, its stored pose maps it into the parent.
        for (parent, children) in &self.edges {
            if let Some(edge) = children.get(frame) {
                out.push((parent.clone(), *edge));
            }
        }
        // Down: the stored pose maps the child into frame, so invert it.
        if let Some(children) = self.edges.get(frame) {
            for (child, edge) in children {
                out.push((child.clone(), edge.inverse()));
            }
        }
        out
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_3};

    fn assert_close(a: Vec3, b: Vec3) {
        assert!(
            (a.x - b.x).abs() < 1e-9 && (a.y - b.y).abs() < 1e-9 && (a.z - b.z).abs() < 1e-9,
            "{a:?} != {b:?}"
        );
    }

    fn yaw(angle: f64) -> Quaternion {
        Quaternion::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), angle)
    }

    // ── Rotation ────────────────────────────────────────────────────────────

    #[test]
    fn identity_quaternion_is_identity_matrix() {
        assert_eq!(Quaternion::identity().to_matrix(), Matrix3::identity());
    }

    #[test]
    fn yaw_90deg_rotates_x_to_y() {
        let r = yaw(FRAC_PI_2).to_matrix();
        assert_close(r.mul_vec(Vec3::new(1.0, 0.0, 0.0)), Vec3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn quaternion_matrices_are_orthonormal() {
        let axis = Vec3::new(1.0, 2.0, 2.0);
        let n = axis.norm();
        let unit = Vec3::new(axis.x / n, axis.y / n, axis.z / n);
        for angle in [0.0, 0.3, FRAC_PI_3, FRAC_PI_2, 2.5, -1.2] {
            let r = Quaternion::from_axis_angle(unit, angle).to_matrix();
            assert!(r.is_orthonormal(ORTHONORMAL_TOLERANCE), "angle {angle}");
        }
    }

    #[test]
    fn scaled_or_reflected_matrices_are_rejected() {
        let mut scaled = Matrix3::identity();
        scaled.m[0][0] = 2.0;
        assert!(!scaled.is_orthonormal(ORTHONORMAL_TOLERANCE));

        let mut reflection = Matrix3::identity();
        reflection.m[2][2] = -1.0;
        assert!(!reflection.is_orthonormal(ORTHONORMAL_TOLERANCE));

        let mut nan = Matrix3::identity();
        nan.m[1][1] = f64::NAN;
        assert!(!nan.is_orthonormal(ORTHONORMAL_TOLERANCE));
    }

    #[test]
    fn degenerate_quaternions_are_not_rigid() {
        for q in [[0.0, 0.0, 0.0, 0.0], [0.5, 0.0, 0.0, 0.0], [2.0, 0.0, 0.0, 0.0]] {
            let quat = Quaternion::from_array(q);
            assert!(!quat.is_unit(), "{q:?}");
            let t = RigidTransform::from_quaternion(Vec3::new(0.0, 0.0, 1.0), quat);
            assert!(!t.is_rigid(), "{q:?} accepted as rigid");
        }
        assert!(Quaternion::from_array([-1.0, 0.0, 0.0, 0.0]).is_unit());
        assert!(yaw(0.7).is_unit());
    }

    // ── RigidTransform ──────────────────────────────────────────────────────

    #[test]
    fn identity_translation_adds() {
        let t = RigidTransform::from_quaternion(Vec3::new(0.0, 0.0, 1.0), Quaternion::identity());
        assert_close(t.apply(Vec3::new(0.4, 0.0, 2.0)), Vec3::new(0.4, 0.0, 3.0));
    }

    #[test]
    fn transform_then_inverse_returns_original_point() {
        let p = Vec3::new(0.3, -1.2, 2.5);
        let axes = [
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(0.6, 0.0, 0.8),
        ];
        for axis in axes {
            for angle in [0.1, FRAC_PI_3, FRAC_PI_2, 3.0] {
                let t = RigidTransform::from_quaternion(
                    Vec3::new(0.5, -0.25, 1.0),
                    Quaternion::from_axis_angle(axis, angle),
                );
                assert_close(t.inverse().apply(t.apply(p)), p);
            }
        }
    }

    #[test]
    fn compose_applies_right_operand_first() {
        let a = RigidTransform::from_quaternion(Vec3::new(1.0, 0.0, 0.0), yaw(FRAC_PI_2));
        let b = RigidTransform::from_quaternion(Vec3::new(0.0, 2.0, 0.0), Quaternion::identity());
        let p = Vec3::new(1.0, 0.0, 0.0);
        assert_close(a.compose(b).apply(p), a.apply(b.apply(p)));
    }

    #[test]
    fn non_finite_translation_is_not_rigid() {
        let t = RigidTransform::new(Matrix3::identity(), Vec3::new(f64::INFINITY, 0.0, 0.0));
        assert!(!t.is_rigid());
        assert!(RigidTransform::identity().is_rigid());
    }

    // ── TfEngine ────────────────────────────────────────────────────────────

    #[test]
    fn lookup_same_frame_returns_identity() {
        let tf = TfEngine::new();
        assert_eq!(tf.lookup("base_link", "base_link"), Some(RigidTransform::identity()));
    }

    #[test]
    fn lookup_child_to_parent_uses_stored_pose() {
        let mut tf = TfEngine::new();
        tf.set_transform(
            "base_link",
            "depth_camera",
            RigidTransform::from_quaternion(Vec3::new(0.0, 0.0, 1.0), Quaternion::identity()),
        );
        let t = tf.lookup("depth_camera", "base_link").unwrap();
        assert_close(t.apply(Vec3::new(0.0, 0.0, 2.0)), Vec3::new(0.0, 0.0, 3.0));
    }

    #[test]
    fn lookup_parent_to_child_inverts_edge() {
        let mut tf = TfEngine::new();
        tf.set_transform(
            "base_link",
            "depth_camera",
            RigidTransform::from_quaternion(Vec3::new(0.0, 0.0, 1.0), yaw(FRAC_PI_2)),
        );
        let up = tf.lookup("depth_camera", "base_link").unwrap();
        let down = tf.lookup("base_link", "depth_camera").unwrap();
        let p = Vec3::new(0.2, 0.7, -0.4);
        assert_close(down.apply(up.apply(p)), p);
    }

    #[test]
    fn lookup_composed_chain() {
        let mut tf = TfEngine::new();
        tf.set_transform(
            "base_link",
            "torso",
            RigidTransform::from_quaternion(Vec3::new(0.0, 0.0, 0.5), Quaternion::identity()),
        );
        tf.set_transform(
            "torso",
            "head",
            RigidTransform::from_quaternion(Vec3::new(0.0, 0.0, 0.6), yaw(FRAC_PI_2)),
        );
        tf.set_transform(
            "head",
            "depth_camera",
            RigidTransform::from_quaternion(Vec3::new(0.1, 0.0, 0.0), Quaternion::identity()),
        );

        // Camera origin: 0.1 m along the head's x axis, which the yaw turns
        // into base +y.
        let t = tf.lookup("depth_camera", "base_link").unwrap();
        assert_close(t.apply(Vec3::zero()), Vec3::new(0.0, 0.1, 1.1));
    }

    #[test]
    fn lookup_disconnected_returns_none() {
        let mut tf = TfEngine::new();
        tf.set_transform("base_link", "torso", RigidTransform::identity());
        tf.set_transform("odom", "map", RigidTransform::identity());
        assert!(tf.lookup("torso", "map").is_none());
        assert!(tf.lookup("base_link", "ghost_frame").is_none());
    }

    #[test]
    fn set_transform_overrides_previous() {
        let mut tf = TfEngine::new();
        tf.set_transform(
            "base_link",
            "depth_camera",
            RigidTransform::from_quaternion(Vec3::new(1.0, 0.0, 0.0), Quaternion::identity()),
        );
        tf.set_transform(
            "base_link",
            "depth_camera",
            RigidTransform::from_quaternion(Vec3::new(5.0, 0.0, 0.0), Quaternion::identity()),
        );
        let t = tf.lookup("depth_camera", "base_link").unwrap();
        assert!((t.translation.x - 5.0).abs() < 1e-9);
    }

    #[test]
    fn remove_transform_disconnects_frames() {
        let mut tf = TfEngine::new();
        tf.set_transform("base_link", "depth_camera", RigidTransform::identity());
        assert!(tf.has_frame("depth_camera"));
        assert!(tf.remove_transform("base_link", "depth_camera"));
        assert!(!tf.remove_transform("base_link", "depth_camera"));
        assert!(tf.lookup("depth_camera", "base_link").is_none());
    }
}
