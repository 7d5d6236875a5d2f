//! WebSocket driver bridge.
//!
//! [`DriverBridge`] is the single entry point for out-of-process drivers:
//!
//! 1. **Ingests** JSON frames of the form `{"topic": "<name>", "msg": …}` and
//!    republishes them on the internal [`EventBus`], routed by the configured
//!    [`BridgeTopics`] names (pixel requests, camera info, RGB-D frames, pose
//!    updates).
//!
//! 2. **Streams** every computed target point (and every idle motion) back to
//!    all connected clients in the same envelope format.
//!
//! The bridge is agnostic about the meaning of the data it routes; pixel
//! messages in particular are forwarded verbatim and validated by the request
//! intake.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use pointreach_types::{CameraInfo, Event, EventPayload, FrameTransform, ReachError, RgbdImages};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::bus::{EventBus, Topic};

const SOURCE: &str = "pointreach-middleware::bridge";

/// Names of the external topics the bridge understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeTopics {
    /// Inbound `[u, v]` pointing requests.
    pub pixel_request: String,
    /// Outbound base-frame target points.
    pub target: String,
    /// Inbound camera calibration.
    pub camera_info: String,
    /// Inbound synchronised RGB-D frames.
    pub images: String,
    /// Inbound frame pose updates.
    pub transform: String,
    /// Outbound idle motions.
    pub motion: String,
}

impl Default for BridgeTopics {
    fn default() -> Self {
        Self {
            pixel_request: "/pointHandTransform/pixel:i".to_string(),
            target: "/pointHandTransform/target:o".to_string(),
            camera_info: "/depthCamera/cameraInfo".to_string(),
            images: "/depthCamera/rgbd".to_string(),
            transform: "/tf".to_string(),
            motion: "/idleManager/motion:o".to_string(),
        }
    }
}

/// Bridge between external driver connections and the internal
/// [`EventBus`].
#[derive(Clone)]
pub struct DriverBridge {
    bus: EventBus,
    topics: BridgeTopics,
}

impl DriverBridge {
    pub fn new(bus: EventBus, topics: BridgeTopics) -> Self {
        Self { bus, topics }
    }

    /// Bind the WebSocket listener on `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::Startup`] if the TCP listener cannot be bound;
    /// without its driver endpoint the process cannot do anything useful.
    pub async fn bind(self, addr: SocketAddr) -> Result<BridgeServer, ReachError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ReachError::Startup(format!("bridge bind error on {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ReachError::Startup(format!("bridge local address: {e}")))?;
        info!(addr = %local_addr, "driver bridge listening");
        Ok(BridgeServer {
            bridge: self,
            listener,
            local_addr,
        })
    }

    /// Route one inbound text frame onto the bus.
    ///
    /// Returns the bus topic the frame was published to.
    ///
    /// # Errors
    ///
    /// - [`ReachError::Serialization`] if the frame is not a JSON envelope or
    ///   its `msg` does not match the topic's schema.
    /// - [`ReachError::Channel`] for topics the bridge does not route.
    pub fn handle_incoming(&self, text: &str) -> Result<Topic, ReachError> {
        let envelope: Value = serde_json::from_str(text)
            .map_err(|e| ReachError::Serialization(format!("invalid bridge frame: {e}")))?;
        let topic = envelope.get("topic").and_then(Value::as_str).unwrap_or("");
        let msg = envelope.get("msg").cloned().unwrap_or(Value::Null);

        let (bus_topic, payload) = if topic == self.topics.pixel_request {
            // Shape checks belong to the intake, which logs and drops.
            (Topic::PixelRequests, EventPayload::PixelMessage(msg))
        } else if topic == self.topics.camera_info {
            (Topic::SensorData, EventPayload::CameraInfo(decode::<CameraInfo>(topic, msg)?))
        } else if topic == self.topics.images {
            (Topic::SensorData, EventPayload::Images(decode::<RgbdImages>(topic, msg)?))
        } else if topic == self.topics.transform {
            (
                Topic::Transforms,
                EventPayload::TransformUpdate(decode::<FrameTransform>(topic, msg)?),
            )
        } else {
            return Err(ReachError::Channel(format!("unrouted bridge topic '{topic}'")));
        };

        self.bus
            .publish_to(bus_topic, Event::new(format!("{SOURCE}{topic}"), payload));
        Ok(bus_topic)
    }

    /// Wrap an outbound event in the bridge envelope, or `None` for payloads
    /// that are not sent to clients.
    pub fn outbound_frame(&self, event: &Event) -> Option<String> {
        let frame = match &event.payload {
            EventPayload::TargetPoint(p) => json!({
                "topic": self.topics.target,
                "msg": { "x": p.x, "y": p.y, "z": p.z },
            }),
            EventPayload::IdleMotion { index, name } => json!({
                "topic": self.topics.motion,
                "msg": { "index": index, "name": name },
            }),
            _ => return None,
        };
        Some(frame.to_string())
    }

    async fn handle_client(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), ReachError> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| ReachError::Channel(format!("ws handshake from {peer}: {e}")))?;
        info!(peer = %peer, "driver connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let mut targets = self.bus.subscribe_to(Topic::TargetPoints);
        let mut motions = self.bus.subscribe_to(Topic::Motions);

        loop {
            let outbound = tokio::select! {
                result = targets.recv() => Some(result),
                result = motions.recv() => Some(result),
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            debug!(peer = %peer, error = %e, "ws read error");
                            break;
                        }
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = self.handle_incoming(text.as_str()) {
                                warn!(peer = %peer, error = %e, "dropping bridge frame");
                            }
                        }
                        _ => {}
                    }
                    None
                }
            };

            match outbound {
                Some(Ok(event)) => {
                    if let Some(frame) = self.outbound_frame(&event) {
                        if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Err(broadcast::error::RecvError::Lagged(n))) => {
                    warn!(peer = %peer, lagged_by = n, "ws client lagged");
                }
                Some(Err(broadcast::error::RecvError::Closed)) => break,
                None => {}
            }
        }

        info!(peer = %peer, "driver disconnected");
        Ok(())
    }
}

/// A bound, not yet running, bridge listener.
pub struct BridgeServer {
    bridge: DriverBridge,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl BridgeServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept driver connections until the task is dropped or aborted.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let bridge = self.bridge.clone();
                    tokio::spawn(async move {
                        if let Err(e) = bridge.handle_client(stream, peer).await {
                            error!(peer = %peer, error = %e, "ws client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "ws accept error");
                }
            }
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(topic: &str, msg: Value) -> Result<T, ReachError> {
    serde_json::from_value(msg)
        .map_err(|e| ReachError::Serialization(format!("bad message on '{topic}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pointreach_types::BasePoint;
    use tokio_tungstenite::connect_async;

    fn make_bridge() -> (EventBus, DriverBridge) {
        let bus = EventBus::default();
        let bridge = DriverBridge::new(bus.clone(), BridgeTopics::default());
        (bus, bridge)
    }

    #[tokio::test]
    async fn pixel_messages_are_forwarded_verbatim() {
        let (bus, bridge) = make_bridge();
        let mut rx = bus.subscribe_to(Topic::PixelRequests);

        let topic = bridge
            .handle_incoming(r#"{"topic":"/pointHandTransform/pixel:i","msg":[320,240]}"#)
            .unwrap();
        assert_eq!(topic, Topic::PixelRequests);

        let event = rx.recv().await.unwrap();
        match event.payload {
            EventPayload::PixelMessage(msg) => assert_eq!(msg, json!([320, 240])),
            other => panic!("expected PixelMessage, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_pixel_payload_still_reaches_intake() {
        let (bus, bridge) = make_bridge();
        let mut rx = bus.subscribe_to(Topic::PixelRequests);

        bridge
            .handle_incoming(r#"{"topic":"/pointHandTransform/pixel:i","msg":"nonsense"}"#)
            .unwrap();
        assert!(matches!(rx.recv().await.unwrap().payload, EventPayload::PixelMessage(_)));
    }

    #[tokio::test]
    async fn camera_info_and_frames_go_to_sensor_topic() {
        let (bus, bridge) = make_bridge();
        let mut rx = bus.subscribe_to(Topic::SensorData);

        bridge
            .handle_incoming(
                r#"{"topic":"/depthCamera/cameraInfo","msg":{"fx":500.0,"fy":500.0,"cx":320.0,"cy":240.0,"width":640,"height":480}}"#,
            )
            .unwrap();
        bridge
            .handle_incoming(
                r#"{"topic":"/depthCamera/rgbd","msg":{"depth":{"width":1,"height":1,"samples":[2.0]}}}"#,
            )
            .unwrap();

        assert!(matches!(rx.recv().await.unwrap().payload, EventPayload::CameraInfo(_)));
        assert!(matches!(rx.recv().await.unwrap().payload, EventPayload::Images(_)));
    }

    #[tokio::test]
    async fn transform_updates_go_to_transform_topic() {
        let (bus, bridge) = make_bridge();
        let mut rx = bus.subscribe_to(Topic::Transforms);

        bridge
            .handle_incoming(
                r#"{"topic":"/tf","msg":{"parent":"base_link","child":"depth_camera","translation":[0,0,1],"rotation":[1,0,0,0]}}"#,
            )
            .unwrap();

        match rx.recv().await.unwrap().payload {
            EventPayload::TransformUpdate(t) => assert_eq!(t.child, "depth_camera"),
            other => panic!("expected TransformUpdate, got {other:?}"),
        }
    }

    #[test]
    fn bad_frames_are_rejected() {
        let (_bus, bridge) = make_bridge();
        assert!(matches!(
            bridge.handle_incoming("not json"),
            Err(ReachError::Serialization(_))
        ));
        assert!(matches!(
            bridge.handle_incoming(r#"{"topic":"/depthCamera/cameraInfo","msg":{"fx":1}}"#),
            Err(ReachError::Serialization(_))
        ));
        assert!(matches!(
            bridge.handle_incoming(r#"{"topic":"/unknown","msg":{}}"#),
            Err(ReachError::Channel(_))
        ));
    }

    #[test]
    fn target_points_are_wrapped_in_envelope() {
        let (_bus, bridge) = make_bridge();
        let event = Event::new(
            "pipeline",
            EventPayload::TargetPoint(BasePoint {
                x: 0.4,
                y: 0.0,
                z: 3.0,
            }),
        );
        let frame: Value = serde_json::from_str(&bridge.outbound_frame(&event).unwrap()).unwrap();
        assert_eq!(frame["topic"], "/pointHandTransform/target:o");
        assert_eq!(frame["msg"]["z"], 3.0);

        let info = Event::new("x", EventPayload::Fault {
            component: "c".into(),
            message: "m".into(),
        });
        assert!(bridge.outbound_frame(&info).is_none());
    }

    #[tokio::test]
    async fn websocket_roundtrip() {
        let (bus, bridge) = make_bridge();
        let mut pixels = bus.subscribe_to(Topic::PixelRequests);

        let server = bridge.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let url = format!("ws://{}", server.local_addr());
        let server_task = tokio::spawn(server.run());

        let (mut ws, _) = connect_async(url).await.unwrap();
        ws.send(Message::Text(
            r#"{"topic":"/pointHandTransform/pixel:i","msg":[1,2]}"#.into(),
        ))
        .await
        .unwrap();
        let event = pixels.recv().await.unwrap();
        assert!(matches!(event.payload, EventPayload::PixelMessage(_)));

        // The client subscription exists once its first frame was handled.
        bus.publish_to(
            Topic::TargetPoints,
            Event::new(
                "pipeline",
                EventPayload::TargetPoint(BasePoint {
                    x: 1.0,
                    y: 2.0,
                    z: 3.0,
                }),
            ),
        );
        let reply = tokio::time::timeout(std::time::Duration::from_secs(2), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let frame: Value = serde_json::from_str(reply.to_text().unwrap()).unwrap();
        assert_eq!(frame["msg"]["y"], 2.0);

        server_task.abort();
    }

    #[tokio::test]
    async fn bind_failure_is_a_startup_error() {
        let (bus, bridge) = make_bridge();
        let first = bridge.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let second = DriverBridge::new(bus, BridgeTopics::default())
            .bind(first.local_addr())
            .await;
        assert!(matches!(second, Err(ReachError::Startup(_))));
    }
}
