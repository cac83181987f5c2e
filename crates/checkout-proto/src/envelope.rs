use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cart::{CartLine, CartSnapshot};

/// Discriminant carried in the envelope's `type` field. Unrecognized
/// strings deserialize to `Unknown` so receivers can ignore them instead
/// of failing the whole message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    CartData,
    AddToCart,
    CartReady,
    CartReceived,
    /// Older funnel embeds announce themselves as SYSTEME_INTEGRATION_READY.
    #[serde(alias = "SYSTEME_INTEGRATION_READY")]
    IntegrationReady,
    PaymentSuccess,
    OrderProcessed,
    SyncError,
    #[serde(other)]
    Unknown,
}

impl MessageKind {
    /// Kinds that ask the holder of a cart to (re-)send it.
    pub fn is_ready_signal(self) -> bool {
        matches!(self, MessageKind::CartReady | MessageKind::IntegrationReady)
    }

    /// Kinds whose line payload should be applied to a receiving cart.
    pub fn carries_cart(self) -> bool {
        matches!(self, MessageKind::CartData | MessageKind::AddToCart)
    }
}

/// Cross-window message envelope. Kept flat rather than internally tagged
/// because independently evolved senders put lines under either `cart` or
/// `payload`; receivers must check both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropagationMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cart: Option<Vec<CartLine>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<CartLine>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_id: Option<Uuid>,
    /// Sender clock; informational only. Missing on some legacy senders.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Origin string the sender claims. Trust decisions use the delivery
    /// origin instead; this field is for logging.
    #[serde(default)]
    pub source: String,
}

impl PropagationMessage {
    fn base(kind: MessageKind, source: impl Into<String>) -> Self {
        Self {
            kind,
            cart: None,
            payload: None,
            redirect_url: None,
            attempt_id: None,
            timestamp: Utc::now(),
            source: source.into(),
        }
    }

    pub fn cart_data(snapshot: &CartSnapshot) -> Self {
        let mut msg = Self::base(MessageKind::CartData, snapshot.source_origin.clone());
        msg.cart = Some(snapshot.lines.clone());
        msg.attempt_id = Some(snapshot.attempt_id);
        msg
    }

    /// ADD_TO_CART historically shipped its line under `payload`. Each
    /// message carries a fresh attempt id so a re-delivered merge can be
    /// recognized and dropped.
    pub fn add_to_cart(line: CartLine, source: impl Into<String>) -> Self {
        let mut msg = Self::base(MessageKind::AddToCart, source);
        msg.payload = Some(vec![line]);
        msg.attempt_id = Some(Uuid::new_v4());
        msg
    }

    pub fn cart_ready(source: impl Into<String>) -> Self {
        Self::base(MessageKind::CartReady, source)
    }

    pub fn integration_ready(source: impl Into<String>) -> Self {
        Self::base(MessageKind::IntegrationReady, source)
    }

    pub fn cart_received(attempt_id: Option<Uuid>, source: impl Into<String>) -> Self {
        let mut msg = Self::base(MessageKind::CartReceived, source);
        msg.attempt_id = attempt_id;
        msg
    }

    pub fn payment_success(redirect_url: Option<String>, source: impl Into<String>) -> Self {
        let mut msg = Self::base(MessageKind::PaymentSuccess, source);
        msg.redirect_url = redirect_url;
        msg
    }

    pub fn sync_error(source: impl Into<String>) -> Self {
        Self::base(MessageKind::SyncError, source)
    }

    /// Lines regardless of which synonym field the sender used.
    pub fn lines(&self) -> Option<&[CartLine]> {
        self.cart
            .as_deref()
            .or(self.payload.as_deref())
            .filter(|lines| !lines.is_empty())
    }
}
