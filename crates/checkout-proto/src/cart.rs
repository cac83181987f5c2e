use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::order::OrderSummary;

/// One purchasable line in a cart. Prices are integer minor units (kobo);
/// float naira amounts only exist at the legacy parsing boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub id: String,
    pub sku: String,
    pub name: String,
    pub unit_price_minor: i64,
    pub quantity: u32,
}

impl CartLine {
    /// Builds a line with `sku` mirroring `id` (the canonical identifier
    /// invariant).
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        unit_price_minor: i64,
        quantity: u32,
    ) -> Self {
        let id = id.into();
        Self {
            sku: id.clone(),
            id,
            name: name.into(),
            unit_price_minor,
            quantity,
        }
    }

    /// Saturates instead of wrapping; `validate` rejects any line whose
    /// total would need to.
    pub fn line_total_minor(&self) -> i64 {
        self.unit_price_minor
            .saturating_mul(i64::from(self.quantity))
    }

    pub fn validate(&self) -> Result<(), LineError> {
        if self.id.is_empty() {
            return Err(LineError::MissingIdentifier);
        }
        if self.id != self.sku {
            return Err(LineError::IdentifierMismatch {
                id: self.id.clone(),
                sku: self.sku.clone(),
            });
        }
        if self.name.trim().is_empty() {
            return Err(LineError::MissingName);
        }
        if self.unit_price_minor < 0 {
            return Err(LineError::NegativePrice(self.unit_price_minor));
        }
        if self.quantity == 0 {
            return Err(LineError::ZeroQuantity);
        }
        if self
            .unit_price_minor
            .checked_mul(i64::from(self.quantity))
            .is_none()
        {
            return Err(LineError::AmountOverflow);
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum LineError {
    #[error("line is missing an id/sku identifier")]
    MissingIdentifier,
    #[error("line id {id:?} does not match sku {sku:?}")]
    IdentifierMismatch { id: String, sku: String },
    #[error("line is missing a name")]
    MissingName,
    #[error("line price must not be negative, got {0}")]
    NegativePrice(i64),
    #[error("line price {0} is not a finite non-negative amount")]
    UnrepresentablePrice(f64),
    #[error("line is missing a price")]
    MissingPrice,
    #[error("line quantity must be at least 1")]
    ZeroQuantity,
    #[error("line total overflows the representable amount")]
    AmountOverflow,
}

#[derive(Debug, Error)]
pub enum LinesError {
    #[error("cart payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cart payload is not an array")]
    NotAnArray,
    #[error("cart line {index} is invalid: {source}")]
    Line { index: usize, source: LineError },
}

/// Converts a float naira amount to integer kobo, rounding half-up at two
/// decimal places. Legacy scripts stored floats; everything downstream of
/// the parse boundary stays integral.
pub fn naira_to_minor(naira: f64) -> Result<i64, LineError> {
    if !naira.is_finite() || naira < 0.0 {
        return Err(LineError::UnrepresentablePrice(naira));
    }
    Ok((naira * 100.0).round() as i64)
}

/// Loose mirror of the shapes independent scripts have written over time:
/// canonical lines carry `unitPriceMinor`, legacy lines carry float `price`
/// naira, and either of `id`/`sku` may be missing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLine {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    sku: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    unit_price_minor: Option<i64>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    quantity: Option<u32>,
}

impl RawLine {
    fn canonicalize(self) -> Result<CartLine, LineError> {
        let (id, sku) = match (self.id, self.sku) {
            (Some(id), Some(sku)) => {
                if id != sku {
                    return Err(LineError::IdentifierMismatch { id, sku });
                }
                (id, sku)
            }
            (Some(id), None) => (id.clone(), id),
            (None, Some(sku)) => (sku.clone(), sku),
            (None, None) => return Err(LineError::MissingIdentifier),
        };
        if id.is_empty() {
            return Err(LineError::MissingIdentifier);
        }

        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or(LineError::MissingName)?;

        let unit_price_minor = match (self.unit_price_minor, self.price) {
            (Some(minor), _) => {
                if minor < 0 {
                    return Err(LineError::NegativePrice(minor));
                }
                minor
            }
            (None, Some(naira)) => naira_to_minor(naira)?,
            (None, None) => return Err(LineError::MissingPrice),
        };

        let quantity = self.quantity.ok_or(LineError::ZeroQuantity)?;
        if quantity == 0 {
            return Err(LineError::ZeroQuantity);
        }
        if unit_price_minor.checked_mul(i64::from(quantity)).is_none() {
            return Err(LineError::AmountOverflow);
        }

        Ok(CartLine {
            id,
            sku,
            name,
            unit_price_minor,
            quantity,
        })
    }
}

/// Parses a serialized `CartLine[]`, accepting both canonical and legacy
/// line shapes. Any invalid element fails the whole value; callers treat
/// the failure as "absent data", never as a user-facing error.
pub fn parse_lines(raw: &str) -> Result<Vec<CartLine>, LinesError> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let elements = value.as_array().ok_or(LinesError::NotAnArray)?;

    let mut lines = Vec::with_capacity(elements.len());
    for (index, element) in elements.iter().enumerate() {
        let raw_line: RawLine = serde_json::from_value(element.clone())?;
        let line = raw_line
            .canonicalize()
            .map_err(|source| LinesError::Line { index, source })?;
        lines.push(line);
    }
    Ok(lines)
}

/// Immutable point-in-time copy of cart contents. One snapshot is minted
/// per checkout attempt series and carries the idempotency id every
/// downstream channel echoes back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSnapshot {
    pub lines: Vec<CartLine>,
    pub captured_at: DateTime<Utc>,
    pub source_origin: String,
    pub attempt_id: Uuid,
}

impl CartSnapshot {
    pub fn capture(lines: Vec<CartLine>, source_origin: impl Into<String>) -> Self {
        Self {
            lines,
            captured_at: Utc::now(),
            source_origin: source_origin.into(),
            attempt_id: Uuid::new_v4(),
        }
    }

    pub fn empty(source_origin: impl Into<String>) -> Self {
        Self::capture(Vec::new(), source_origin)
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Saturating sum: snapshots are untrusted until each line is
    /// validated, and a summary must never panic the checkout flow.
    pub fn total_minor(&self) -> i64 {
        self.lines
            .iter()
            .map(CartLine::line_total_minor)
            .fold(0, i64::saturating_add)
    }

    pub fn item_count(&self) -> u32 {
        self.lines
            .iter()
            .map(|line| line.quantity)
            .fold(0, u32::saturating_add)
    }

    pub fn summary(&self, currency: &str) -> OrderSummary {
        OrderSummary {
            attempt_id: self.attempt_id,
            item_count: self.item_count(),
            total_amount: self.total_minor(),
            currency: currency.to_string(),
        }
    }
}
