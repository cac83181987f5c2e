//! Window-addressed delivery fabric standing in for the browser's
//! `postMessage` plumbing. Windows register under an origin and receive
//! byte payloads addressed to their window id; senders never learn whether
//! a payload was consumed. Receivers see the sender's origin and are
//! responsible for validating it; the fabric itself enforces nothing.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

const WINDOW_CHANNEL_CAPACITY: usize = 64;

/// Opaque identity of one attached window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowId(String);

impl WindowId {
    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returned by [`WindowBus::register`]; identifies the caller on every
/// subsequent post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowHandle {
    pub id: WindowId,
    pub origin: String,
}

/// One payload delivered to a window, tagged with who sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub from: WindowId,
    pub origin: String,
    pub payload: Bytes,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("no window registered under id {0}")]
    UnknownWindow(String),
    #[error("window {0} is no longer receiving")]
    Closed(String),
}

pub type BusResult<T> = Result<T, BusError>;

pub trait WindowBus: Send + Sync {
    /// Attaches a window under `origin` and returns its handle.
    fn register(&self, origin: &str) -> WindowHandle;

    /// Subscribes to payloads addressed to `id`. Deliveries posted before
    /// the first subscription are lost, which is the race the handshake
    /// protocol exists to close.
    fn subscribe(&self, id: &WindowId) -> BusResult<broadcast::Receiver<Delivery>>;

    /// Delivers `payload` to the window `to`, stamped with the sender's
    /// identity.
    fn post(&self, to: &WindowId, from: &WindowHandle, payload: Bytes) -> BusResult<()>;

    /// Origin a window registered under, if it is still attached.
    fn origin_of(&self, id: &WindowId) -> Option<String>;

    /// Drops a window; subsequent posts to it fail.
    fn detach(&self, id: &WindowId);
}

struct WindowEntry {
    origin: String,
    sender: broadcast::Sender<Delivery>,
}

/// In-memory bus used by the runtime, the dry-run CLI, and tests.
#[derive(Default)]
pub struct LocalWindowBus {
    windows: parking_lot::RwLock<HashMap<WindowId, WindowEntry>>,
}

impl LocalWindowBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WindowBus for LocalWindowBus {
    fn register(&self, origin: &str) -> WindowHandle {
        let id = WindowId::generate();
        let (sender, _) = broadcast::channel(WINDOW_CHANNEL_CAPACITY);
        self.windows.write().insert(
            id.clone(),
            WindowEntry {
                origin: origin.to_string(),
                sender,
            },
        );
        WindowHandle {
            id,
            origin: origin.to_string(),
        }
    }

    fn subscribe(&self, id: &WindowId) -> BusResult<broadcast::Receiver<Delivery>> {
        let guard = self.windows.read();
        let entry = guard
            .get(id)
            .ok_or_else(|| BusError::UnknownWindow(id.to_string()))?;
        Ok(entry.sender.subscribe())
    }

    fn post(&self, to: &WindowId, from: &WindowHandle, payload: Bytes) -> BusResult<()> {
        let guard = self.windows.read();
        let entry = guard
            .get(to)
            .ok_or_else(|| BusError::UnknownWindow(to.to_string()))?;
        entry
            .sender
            .send(Delivery {
                from: from.id.clone(),
                origin: from.origin.clone(),
                payload,
            })
            .map(|_| ())
            .map_err(|_| BusError::Closed(to.to_string()))
    }

    fn origin_of(&self, id: &WindowId) -> Option<String> {
        self.windows.read().get(id).map(|entry| entry.origin.clone())
    }

    fn detach(&self, id: &WindowId) {
        self.windows.write().remove(id);
    }
}
