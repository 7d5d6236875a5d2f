//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::PixelRequests`] | Raw pointing messages from the operator UI |
//! | [`Topic::TargetPoints`] | Base-frame points computed by the pipeline |
//! | [`Topic::SensorData`] | Camera calibration and RGB-D frames |
//! | [`Topic::Transforms`] | Frame pose updates from the kinematics driver |
//! | [`Topic::Motions`] | Idle motions chosen by the gating coordinator |
//! | [`Topic::SystemAlerts`] | Faults and shutdown notices |

use pointreach_types::Event;
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Enumeration of all routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    PixelRequests,
    TargetPoints,
    SensorData,
    Transforms,
    Motions,
    SystemAlerts,
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    pixel_requests: broadcast::Sender<Event>,
    target_points: broadcast::Sender<Event>,
    sensor_data: broadcast::Sender<Event>,
    transforms: broadcast::Sender<Event>,
    motions: broadcast::Sender<Event>,
    system_alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let (pixel_requests, _) = broadcast::channel(capacity);
        let (target_points, _) = broadcast::channel(capacity);
        let (sensor_data, _) = broadcast::channel(capacity);
        let (transforms, _) = broadcast::channel(capacity);
        let (motions, _) = broadcast::channel(capacity);
        let (system_alerts, _) = broadcast::channel(capacity);
        Self {
            pixel_requests,
            target_points,
            sensor_data,
            transforms,
            motions,
            system_alerts,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event.
    /// Returns `0` when nobody is listening on the topic; that is a normal
    /// condition for fire-and-forget traffic, not an error.
    pub fn publish_to(&self, topic: Topic, event: Event) -> usize {
        self.topic_sender(topic).send(event).unwrap_or(0)
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Number of live receivers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::PixelRequests => &self.pixel_requests,
            Topic::TargetPoints => &self.target_points,
            Topic::SensorData => &self.sensor_data,
            Topic::Transforms => &self.transforms,
            Topic::Motions => &self.motions,
            Topic::SystemAlerts => &self.system_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.  The caller decides whether to
    ///   continue or abort.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`][Self::recv].
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}
