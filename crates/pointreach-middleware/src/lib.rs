//! `pointreach-middleware` – the plumbing between the pipeline and the
//! outside world.
//!
//! Routes asynchronous data between device drivers, the transform pipeline
//! and downstream consumers without caring about the data's meaning.
//!
//! # Modules
//!
//! - [`bus`] – typed, topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.
//! - [`bridge`] – WebSocket bridge that lets external drivers push pixel
//!   requests, camera frames and transforms onto the bus as JSON, and streams
//!   computed target points back to them.
//! - [`bridged`] – production [`SensorSource`][pointreach_hal::SensorSource]
//!   and [`TransformSource`][pointreach_hal::TransformSource] implementations
//!   fed by bus traffic.

pub mod bridge;
pub mod bridged;
pub mod bus;

pub use bridge::{BridgeServer, BridgeTopics, DriverBridge};
pub use bridged::{BusSensor, BusTransformSource};
pub use bus::{EventBus, Topic, TopicReceiver};
