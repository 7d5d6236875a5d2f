//! [`IdleMotions`] – the robot's repertoire of autonomous idle gestures and
//! the gate that decides whether it may perform them.

use pointreach_middleware::{EventBus, Topic};
use pointreach_types::{Event, EventPayload};
use thiserror::Error;
use tracing::{debug, info};

const SOURCE: &str = "pointreach-kernel::idle_motions";

/// Why a motion request was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MotionError {
    #[error("motion is currently forbidden")]
    Forbidden,
    #[error("no idle motion {index} (have {available})")]
    UnknownMotion { index: usize, available: usize },
    #[error("no idle motions configured")]
    NoMotions,
}

/// Holds the configured motion names and the "may move" gate.
///
/// Performed motions are announced on [`Topic::Motions`]; the motion driver
/// is whatever listens there.
pub struct IdleMotions {
    motions: Vec<String>,
    may_move: bool,
    next: usize,
    bus: EventBus,
}

impl IdleMotions {
    /// Motions start out permitted.
    pub fn new(motions: Vec<String>, bus: EventBus) -> Self {
        Self {
            motions,
            may_move: true,
            next: 0,
            bus,
        }
    }

    pub fn may_move(&self) -> bool {
        self.may_move
    }

    pub fn motions(&self) -> &[String] {
        &self.motions
    }

    pub fn dont_move(&mut self) {
        if self.may_move {
            info!("idle motions forbidden");
        }
        self.may_move = false;
    }

    pub fn now_you_can_move(&mut self) {
        if !self.may_move {
            info!("idle motions permitted");
        }
        self.may_move = true;
    }

    /// Perform motion `index`, or the next one in turn when `None`.
    ///
    /// Returns the index performed.
    pub fn do_motion(&mut self, index: Option<usize>) -> Result<usize, MotionError> {
        if !self.may_move {
            return Err(MotionError::Forbidden);
        }
        if self.motions.is_empty() {
            return Err(MotionError::NoMotions);
        }
        let index = match index {
            Some(i) if i >= self.motions.len() => {
                return Err(MotionError::UnknownMotion {
                    index: i,
                    available: self.motions.len(),
                });
            }
            Some(i) => i,
            None => {
                let i = self.next;
                self.next = (self.next + 1) % self.motions.len();
                i
            }
        };

        let name = self.motions[index].clone();
        info!(index, motion = %name, "performing idle motion");
        let receivers = self.bus.publish_to(
            Topic::Motions,
            Event::new(SOURCE, EventPayload::IdleMotion { index, name }),
        );
        debug!(receivers, "idle motion announced");
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn motions(bus: &EventBus) -> IdleMotions {
        IdleMotions::new(
            vec!["wave".to_string(), "look_around".to_string(), "stretch".to_string()],
            bus.clone(),
        )
    }

    #[test]
    fn round_robin_without_index() {
        let bus = EventBus::default();
        let mut m = motions(&bus);
        let picked: Vec<usize> = (0..4).map(|_| m.do_motion(None).unwrap()).collect();
        assert_eq!(picked, vec![0, 1, 2, 0]);
    }

    #[test]
    fn explicit_index_must_exist() {
        let bus = EventBus::default();
        let mut m = motions(&bus);
        assert_eq!(m.do_motion(Some(2)), Ok(2));
        assert_eq!(
            m.do_motion(Some(3)),
            Err(MotionError::UnknownMotion {
                index: 3,
                available: 3
            })
        );
    }

    #[test]
    fn gate_blocks_motion() {
        let bus = EventBus::default();
        let mut m = motions(&bus);
        m.dont_move();
        assert!(!m.may_move());
        assert_eq!(m.do_motion(None), Err(MotionError::Forbidden));
        m.now_you_can_move();
        assert!(m.do_motion(None).is_ok());
    }

    #[test]
    fn empty_repertoire() {
        let mut m = IdleMotions::new(Vec::new(), EventBus::default());
        assert_eq!(m.do_motion(None), Err(MotionError::NoMotions));
    }

    #[tokio::test]
    async fn performed_motion_is_announced() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::Motions);
        let mut m = motions(&bus);
        m.do_motion(Some(1)).unwrap();

        match rx.recv().await.unwrap().payload {
            EventPayload::IdleMotion { index, name } => {
                assert_eq!(index, 1);
                assert_eq!(name, "look_around");
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
