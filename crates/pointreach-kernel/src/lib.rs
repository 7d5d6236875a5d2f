//! `pointreach-kernel` – coordination around the reaching pipeline.
//!
//! # Modules
//!
//! - [`idle_motions`] – [`IdleMotions`][idle_motions::IdleMotions]: the
//!   configured idle gestures and the "may move" gate in front of them.
//! - [`idle_manager`] – [`IdleManager`][idle_manager::IdleManager]: polls the
//!   task orchestrator, permits idle motions only while it reports `idle`,
//!   performs them autonomously while permitted,
//!   and answers operator commands.

pub mod idle_manager;
pub mod idle_motions;

pub use idle_manager::{
    DEFAULT_IDLE_PERIOD, DEFAULT_MOTION_EVERY, IDLE_TOKEN, IdleCommand, IdleManager, IdleReply, OrchestratorStatus,
};
pub use idle_motions::{IdleMotions, MotionError};
