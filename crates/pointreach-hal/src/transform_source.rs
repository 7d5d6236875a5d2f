//! Generic `TransformSource` trait for frame-transform providers.

use pointreach_perception::{RigidTransform, TfEngine};
use pointreach_types::ReachError;

/// A provider of live rigid transforms between named frames.
///
/// Implementations must answer from current state on every call: the camera
/// may sit on a moving joint, so yesterday's answer is not today's.
pub trait TransformSource: Send {
    /// The transform mapping points in `source_frame` into `target_frame`.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::TransformUnavailable`] if the frames are not
    /// currently connected (e.g. the driver has not published a pose yet).
    fn lookup(&self, source_frame: &str, target_frame: &str) -> Result<RigidTransform, ReachError>;

    /// Release the provider. Called once when the pipeline stops.
    fn close(&mut self) {}
}

/// A fixed frame graph is a valid (static) transform source.
impl TransformSource for TfEngine {
    fn lookup(&self, source_frame: &str, target_frame: &str) -> Result<RigidTransform, ReachError> {
        TfEngine::lookup(self, source_frame, target_frame).ok_or_else(|| {
            ReachError::TransformUnavailable {
                from_frame: source_frame.to_string(),
                to_frame: target_frame.to_string(),
            }
        })
    }
}
