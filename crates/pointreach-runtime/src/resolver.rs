//! Frame transform resolution with rigidity checking.

use pointreach_hal::TransformSource;
use pointreach_perception::RigidTransform;
use pointreach_types::ReachError;

/// Resolves the live camera-to-base transform on every call.
///
/// Nothing is cached between lookups: the camera may be mounted on a moving
/// joint.
pub struct TransformResolver {
    source: Box<dyn TransformSource>,
}

impl TransformResolver {
    pub fn new(source: Box<dyn TransformSource>) -> Self {
        Self { source }
    }

    /// The transform mapping `source_frame` points into `target_frame`.
    ///
    /// # Errors
    ///
    /// - [`ReachError::TransformUnavailable`] if the frames are not connected.
    /// - [`ReachError::InvalidTransform`] if the rotation is not orthonormal
    ///   or the translation is not finite.
    pub fn lookup(&self, source_frame: &str, target_frame: &str) -> Result<RigidTransform, ReachError> {
        let transform = self.source.lookup(source_frame, target_frame)?;
        if !transform.is_rigid() {
            return Err(ReachError::InvalidTransform(format!(
                "{source_frame} -> {target_frame} is not a rigid transform (det R = {:.6})",
                transform.rotation.determinant()
            )));
        }
        Ok(transform)
    }

    pub fn close(&mut self) {
        self.source.close();
    }
}
