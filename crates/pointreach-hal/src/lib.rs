//! `pointreach-hal` – capability interfaces for the devices the reaching
//! pipeline depends on.
//!
//! # Modules
//!
//! - [`sensor`] – [`SensorSource`]: a synchronised RGB-D camera that reports
//!   its intrinsics once and hands out frames without blocking.
//! - [`transform_source`] – [`TransformSource`]: live rigid-transform lookups
//!   between named frames.
//! - [`sim`] – in-process simulated implementations of both traits for tests
//!   and headless runs.

pub mod sensor;
pub mod sim;
pub mod transform_source;

pub use sensor::{RgbdFrame, SensorSource};
pub use sim::{SimRgbdSensor, SimTransformSource};
pub use transform_source::TransformSource;
