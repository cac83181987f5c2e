//! Shared wire definitions for the Tenera checkout handoff protocol.
//! Keeping these in a dedicated crate lets the client runtime, the order
//! gate, and external integrations agree on one envelope and cart shape
//! without pulling in heavier runtime code.

mod cart;
mod envelope;
mod order;

pub use cart::{
    naira_to_minor, parse_lines, CartLine, CartSnapshot, LineError, LinesError,
};
pub use envelope::{MessageKind, PropagationMessage};
pub use order::{OrderDraft, OrderSummary};

/// ISO 4217 code for the storefront's default currency.
pub const DEFAULT_CURRENCY: &str = "NGN";
