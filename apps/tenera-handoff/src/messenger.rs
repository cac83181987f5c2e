use std::sync::Arc;

use bytes::Bytes;
use checkout_proto::{MessageKind, PropagationMessage};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use window_bus::{BusError, BusResult, Delivery, WindowBus, WindowHandle, WindowId};

#[derive(Debug, Error)]
pub enum SendError {
    #[error("target origin {0} is not allowed")]
    OriginNotAllowed(String),
    #[error("message could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Posts cart messages to the windows one page can reach: itself, its
/// parent when embedded, and any frames it hosts. Every outgoing post and
/// every incoming delivery is gated on an exact origin match.
pub struct WindowMessenger {
    bus: Arc<dyn WindowBus>,
    window: WindowHandle,
    parent: Option<WindowId>,
    frames: Vec<WindowId>,
    allowed_origins: Vec<String>,
}

impl WindowMessenger {
    pub fn new(
        bus: Arc<dyn WindowBus>,
        window: WindowHandle,
        allowed_origins: Vec<String>,
    ) -> Self {
        Self {
            bus,
            window,
            parent: None,
            frames: Vec::new(),
            allowed_origins,
        }
    }

    pub fn with_parent(mut self, parent: WindowId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_frame(mut self, frame: WindowId) -> Self {
        self.frames.push(frame);
        self
    }

    pub fn window(&self) -> &WindowHandle {
        &self.window
    }

    pub fn origin(&self) -> &str {
        &self.window.origin
    }

    pub fn subscribe(&self) -> BusResult<broadcast::Receiver<Delivery>> {
        self.bus.subscribe(&self.window.id)
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        origin == self.window.origin
            || self.allowed_origins.iter().any(|allowed| allowed == origin)
    }

    fn send_to(&self, target: &WindowId, bytes: Bytes) -> Result<(), SendError> {
        if let Some(origin) = self.bus.origin_of(target) {
            if !self.origin_allowed(&origin) {
                return Err(SendError::OriginNotAllowed(origin));
            }
        }
        self.bus.post(target, &self.window, bytes)?;
        Ok(())
    }

    /// Post `message` to every reachable window, own window included so
    /// same-page listeners fire too. Individual legs are best-effort; a
    /// closed or disallowed target never stops the others.
    pub fn broadcast(&self, message: &PropagationMessage) {
        let bytes = match serde_json::to_vec(message) {
            Ok(encoded) => Bytes::from(encoded),
            Err(err) => {
                warn!(
                    target: "handoff::messenger",
                    error = %err,
                    "outgoing message could not be encoded"
                );
                return;
            }
        };
        let mut targets: Vec<WindowId> = vec![self.window.id.clone()];
        if let Some(parent) = &self.parent {
            targets.push(parent.clone());
        }
        targets.extend(self.frames.iter().cloned());

        for target in targets {
            if let Err(err) = self.send_to(&target, bytes.clone()) {
                debug!(
                    target: "handoff::messenger",
                    window = %target,
                    error = %err,
                    "broadcast leg skipped"
                );
            }
        }
    }

    /// Directed reply to a specific window, used for handshake answers
    /// and receipt acks. Unlike `broadcast`, failures surface so the
    /// caller can fall back.
    pub fn reply(&self, to: &WindowId, message: &PropagationMessage) -> Result<(), SendError> {
        let bytes = Bytes::from(serde_json::to_vec(message)?);
        self.send_to(to, bytes)
    }

    /// Parse an incoming delivery, enforcing the origin allowlist and
    /// dropping unrecognized message kinds. Returns `None` for anything
    /// that should be ignored.
    pub fn decode(&self, delivery: &Delivery) -> Option<PropagationMessage> {
        if !self.origin_allowed(&delivery.origin) {
            debug!(
                target: "handoff::messenger",
                origin = %delivery.origin,
                "delivery from disallowed origin dropped"
            );
            return None;
        }
        let message: PropagationMessage = match serde_json::from_slice(&delivery.payload) {
            Ok(message) => message,
            Err(err) => {
                debug!(
                    target: "handoff::messenger",
                    origin = %delivery.origin,
                    error = %err,
                    "unparseable delivery dropped"
                );
                return None;
            }
        };
        if message.kind == MessageKind::Unknown {
            debug!(
                target: "handoff::messenger",
                origin = %delivery.origin,
                "unrecognized message kind ignored"
            );
            return None;
        }
        Some(message)
    }
}
