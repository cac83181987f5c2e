use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use checkout_proto::{parse_lines, CartSnapshot, MessageKind, OrderSummary, PropagationMessage};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;
use window_bus::Delivery;

use crate::cart::CartStore;
use crate::messenger::WindowMessenger;
use crate::remote::OrderSink;
use crate::storage::StorageMirror;

/// Which channel ultimately supplied the cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartSource {
    LandingUrl,
    ReferenceFetch,
    Storage,
    Handshake,
    Unavailable,
}

/// Checkout-side counterpart of the orchestrator: works through every
/// inbound channel until one produces a cart. Pushed messages are also
/// accepted at any time via `handle_delivery`.
pub struct CheckoutReceiver {
    cart: Arc<CartStore>,
    mirror: Arc<StorageMirror>,
    messenger: Arc<WindowMessenger>,
    sink: Arc<dyn OrderSink>,
    seen: Mutex<HashSet<Uuid>>,
    announce_rounds: u32,
    announce_timeout: Duration,
}

impl CheckoutReceiver {
    pub fn new(
        cart: Arc<CartStore>,
        mirror: Arc<StorageMirror>,
        messenger: Arc<WindowMessenger>,
        sink: Arc<dyn OrderSink>,
    ) -> Self {
        Self {
            cart,
            mirror,
            messenger,
            sink,
            seen: Mutex::new(HashSet::new()),
            announce_rounds: 3,
            announce_timeout: Duration::from_millis(700),
        }
    }

    pub fn with_announce(mut self, rounds: u32, per_round: Duration) -> Self {
        self.announce_rounds = rounds;
        self.announce_timeout = per_round;
        self
    }

    /// Acquire a cart: landing URL first, then the storage mirror, then
    /// the announce handshake. Returns where the cart came from.
    pub async fn acquire(&self, landing_url: Option<&Url>) -> CartSource {
        if let Some(url) = landing_url {
            if let Some(source) = self.adopt_landing_url(url).await {
                return source;
            }
        }
        if let Some(lines) = self.mirror.read_first_available() {
            info!(
                target: "handoff::receiver",
                lines = lines.len(),
                "cart recovered from the storage mirror"
            );
            self.cart.replace(lines);
            return CartSource::Storage;
        }
        if self.pull_via_handshake().await {
            return CartSource::Handshake;
        }
        debug!(
            target: "handoff::receiver",
            "no channel produced a cart; starting empty"
        );
        CartSource::Unavailable
    }

    /// Adopt the cart a redirect carried, either inline (`cart`) or as a
    /// stashed reference (`cartRef`). Re-processing the same landing URL
    /// is a no-op thanks to the attempt id.
    pub async fn adopt_landing_url(&self, url: &Url) -> Option<CartSource> {
        let params: HashMap<String, String> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if let Some(synced) = params.get("synced") {
            debug!(target: "handoff::receiver", synced = %synced, "landing url sync flag");
        }

        if let Some(raw) = params.get("cart") {
            match parse_lines(raw) {
                Ok(lines) if !lines.is_empty() => {
                    let attempt_id = params
                        .get("orderData")
                        .and_then(|raw| serde_json::from_str::<OrderSummary>(raw).ok())
                        .map(|summary| summary.attempt_id);
                    let fresh = attempt_id.map(|id| self.mark_seen(id)).unwrap_or(true);
                    if fresh {
                        info!(
                            target: "handoff::receiver",
                            lines = lines.len(),
                            attempt_id = ?attempt_id,
                            "cart adopted from the landing url"
                        );
                        self.cart.replace(lines);
                        self.remirror();
                    } else {
                        debug!(
                            target: "handoff::receiver",
                            attempt_id = ?attempt_id,
                            "landing url already processed"
                        );
                    }
                    return Some(CartSource::LandingUrl);
                }
                Ok(_) => debug!(target: "handoff::receiver", "landing url cart is empty"),
                Err(err) => debug!(
                    target: "handoff::receiver",
                    error = %err,
                    "landing url cart unparseable; ignoring"
                ),
            }
        }

        if let Some(reference) = params.get("cartRef") {
            match self.sink.fetch_snapshot(reference).await {
                Ok(Some(snapshot)) => {
                    if self.mark_seen(snapshot.attempt_id) {
                        info!(
                            target: "handoff::receiver",
                            reference = %reference,
                            lines = snapshot.lines.len(),
                            "cart fetched from its stash reference"
                        );
                        self.cart.replace(snapshot.lines);
                        self.remirror();
                    }
                    return Some(CartSource::ReferenceFetch);
                }
                Ok(None) => warn!(
                    target: "handoff::receiver",
                    reference = %reference,
                    "stash reference expired or unknown"
                ),
                Err(err) => warn!(
                    target: "handoff::receiver",
                    reference = %reference,
                    error = %err,
                    "stash reference could not be fetched"
                ),
            }
        }
        None
    }

    async fn pull_via_handshake(&self) -> bool {
        let mut rx = match self.messenger.subscribe() {
            Ok(rx) => rx,
            Err(err) => {
                warn!(
                    target: "handoff::receiver",
                    error = %err,
                    "window bus subscription failed; handshake skipped"
                );
                return false;
            }
        };
        for round in 1..=self.announce_rounds {
            self.messenger
                .broadcast(&PropagationMessage::cart_ready(self.messenger.origin()));
            match timeout(self.announce_timeout, self.wait_for_cart(&mut rx)).await {
                Ok(true) => return true,
                Ok(false) => return false,
                Err(_) => debug!(
                    target: "handoff::receiver",
                    round, "no cart data arrived this round"
                ),
            }
        }
        false
    }

    async fn wait_for_cart(&self, rx: &mut broadcast::Receiver<Delivery>) -> bool {
        loop {
            match rx.recv().await {
                Ok(delivery) => {
                    if self.handle_delivery(&delivery) {
                        return true;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(
                        target: "handoff::receiver",
                        missed, "receiver lagged behind the window bus"
                    );
                }
                Err(RecvError::Closed) => return false,
            }
        }
    }

    /// Apply one pushed delivery. Returns true when the delivery left the
    /// cart populated, which is what the handshake loop waits for.
    pub fn handle_delivery(&self, delivery: &Delivery) -> bool {
        if delivery.from == self.messenger.window().id {
            return false;
        }
        let Some(message) = self.messenger.decode(delivery) else {
            return false;
        };
        match message.kind {
            MessageKind::CartData => {
                let Some(lines) = message.lines() else {
                    debug!(target: "handoff::receiver", "cart data without lines ignored");
                    return false;
                };
                let fresh = message
                    .attempt_id
                    .map(|id| self.mark_seen(id))
                    .unwrap_or(true);
                if fresh {
                    info!(
                        target: "handoff::receiver",
                        lines = lines.len(),
                        from = %message.source,
                        "cart adopted from a window push"
                    );
                    self.cart.replace(lines.to_vec());
                    self.remirror();
                } else {
                    debug!(
                        target: "handoff::receiver",
                        attempt_id = ?message.attempt_id,
                        "duplicate cart push ignored"
                    );
                }
                // ack either way; the sender may have re-sent because the
                // first ack was lost
                self.ack(delivery, message.attempt_id);
                true
            }
            MessageKind::AddToCart => {
                let Some(lines) = message.lines() else {
                    return false;
                };
                let fresh = message
                    .attempt_id
                    .map(|id| self.mark_seen(id))
                    .unwrap_or(true);
                if !fresh {
                    debug!(
                        target: "handoff::receiver",
                        "duplicate add-to-cart ignored"
                    );
                    return true;
                }
                for line in lines {
                    self.cart.merge_line(line.clone());
                }
                self.remirror();
                debug!(
                    target: "handoff::receiver",
                    added = lines.len(),
                    "lines merged from a window push"
                );
                true
            }
            MessageKind::PaymentSuccess => {
                info!(
                    target: "handoff::receiver",
                    redirect = message.redirect_url.as_deref().unwrap_or("-"),
                    "payment confirmed; clearing the cart"
                );
                self.cart.clear();
                self.mirror.clear();
                false
            }
            MessageKind::OrderProcessed => {
                debug!(
                    target: "handoff::receiver",
                    attempt_id = ?message.attempt_id,
                    "order processed upstream"
                );
                false
            }
            _ => false,
        }
    }

    fn mark_seen(&self, id: Uuid) -> bool {
        self.seen.lock().insert(id)
    }

    fn remirror(&self) {
        let snapshot = CartSnapshot::capture(self.cart.lines(), self.messenger.origin());
        self.mirror.write(&snapshot);
    }

    fn ack(&self, delivery: &Delivery, attempt_id: Option<Uuid>) {
        let receipt = PropagationMessage::cart_received(attempt_id, self.messenger.origin());
        if let Err(err) = self.messenger.reply(&delivery.from, &receipt) {
            debug!(
                target: "handoff::receiver",
                error = %err,
                "receipt ack could not be delivered"
            );
        }
    }
}
