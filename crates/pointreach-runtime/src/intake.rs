//! Request intake: the single-slot mailbox between inbound pixel messages
//! and the pipeline tick.
//!
//! Inbound messages arrive on their own task, independent of the tick phase.
//! The newest valid request overwrites any pending one (last-write-wins);
//! there is no queue and no back-pressure toward the sender.

use std::sync::{Arc, Mutex, PoisonError};

use pointreach_middleware::{EventBus, Topic};
use pointreach_types::{EventPayload, PixelRequest, ReachError};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Shared pending-request slot.
///
/// Cheap to clone; all clones refer to the same slot. `latch` and
/// `take_request` are each a single critical section.
#[derive(Debug, Clone, Default)]
pub struct RequestSlot {
    pending: Arc<Mutex<Option<PixelRequest>>>,
}

impl RequestSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `request`, returning the one it replaced, if any.
    pub fn latch(&self, request: PixelRequest) -> Option<PixelRequest> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(request)
    }

    /// Atomically remove and return the pending request.
    pub fn take_request(&self) -> Option<PixelRequest> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Parse an inbound pixel message.
///
/// Accepts `[u, v]` or `{"u": u, "v": v}`; both coordinates must be integers
/// that fit an `i32`.
///
/// # Errors
///
/// Returns [`ReachError::MalformedRequest`] for any other shape.
pub fn parse_request(msg: &Value) -> Result<PixelRequest, ReachError> {
    let (u, v) = match msg {
        Value::Array(items) if items.len() == 2 => (&items[0], &items[1]),
        Value::Array(items) => {
            return Err(ReachError::MalformedRequest(format!(
                "expected 2 coordinates, got {}",
                items.len()
            )));
        }
        Value::Object(fields) => match (fields.get("u"), fields.get("v")) {
            (Some(u), Some(v)) => (u, v),
            _ => {
                return Err(ReachError::MalformedRequest(
                    "object request needs both 'u' and 'v'".to_string(),
                ));
            }
        },
        other => {
            return Err(ReachError::MalformedRequest(format!(
                "expected [u, v] or {{\"u\", \"v\"}}, got {other}"
            )));
        }
    };
    Ok(PixelRequest::new(coordinate(u)?, coordinate(v)?))
}

fn coordinate(value: &Value) -> Result<i32, ReachError> {
    value
        .as_i64()
        .and_then(|n| i32::try_from(n).ok())
        .ok_or_else(|| ReachError::MalformedRequest(format!("coordinate {value} is not an integer")))
}

/// Validates inbound messages and latches them into a [`RequestSlot`].
#[derive(Debug, Clone)]
pub struct RequestIntake {
    slot: RequestSlot,
}

impl RequestIntake {
    pub fn new(slot: RequestSlot) -> Self {
        Self { slot }
    }

    pub fn slot(&self) -> &RequestSlot {
        &self.slot
    }

    /// Handle one inbound message. Malformed messages are logged and leave
    /// the slot untouched.
    pub fn on_message(&self, msg: &Value) -> Result<PixelRequest, ReachError> {
        let request = parse_request(msg).inspect_err(|e| {
            warn!(error = %e, "dropping malformed pixel message");
        })?;
        if let Some(replaced) = self.slot.latch(request) {
            debug!(
                u = replaced.u,
                v = replaced.v,
                "pending pixel request overwritten before it was processed"
            );
        }
        Ok(request)
    }

    /// Listen on [`Topic::PixelRequests`] until the bus closes.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn_listener(self, bus: &EventBus) -> JoinHandle<()> {
        let mut rx = bus.subscribe_to(Topic::PixelRequests);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let EventPayload::PixelMessage(msg) = event.payload {
                            match self.on_message(&msg) {
                                Ok(request) => debug!(u = request.u, v = request.v, "pixel request latched"),
                                // Already logged by `on_message`; the slot keeps its request.
                                Err(_) => continue,
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(lagged_by = n, "request listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
