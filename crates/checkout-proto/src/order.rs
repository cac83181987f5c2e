use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cart::{CartLine, CartSnapshot};

/// Body of the remote-persistence POST. `total_amount` is always derived
/// from the lines at build time; the gate recomputes it again and treats
/// the client value as a hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDraft {
    pub attempt_id: Uuid,
    pub items: Vec<CartLine>,
    pub total_amount: i64,
    pub currency: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

impl OrderDraft {
    pub fn from_snapshot(snapshot: &CartSnapshot, currency: &str) -> Self {
        Self {
            attempt_id: snapshot.attempt_id,
            items: snapshot.lines.clone(),
            total_amount: snapshot.total_minor(),
            currency: currency.to_string(),
            timestamp: snapshot.captured_at,
            source: snapshot.source_origin.clone(),
        }
    }
}

/// Compact order description carried in the redirect URL's `orderData`
/// parameter for the receiving page's immediate display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub attempt_id: Uuid,
    pub item_count: u32,
    pub total_amount: i64,
    pub currency: String,
}
