use std::sync::Arc;

use checkout_proto::{CartSnapshot, MessageKind, PropagationMessage};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use window_bus::{BusResult, Delivery, WindowId};

use crate::cart::CartStore;
use crate::messenger::WindowMessenger;
use crate::storage::StorageMirror;

/// Answers CART_READY / INTEGRATION_READY handshakes from windows that
/// joined after the push went out, so a late checkout page can still pull
/// the cart.
pub struct ReadyResponder {
    cart: Arc<CartStore>,
    mirror: Arc<StorageMirror>,
    messenger: Arc<WindowMessenger>,
}

impl ReadyResponder {
    pub fn new(
        cart: Arc<CartStore>,
        mirror: Arc<StorageMirror>,
        messenger: Arc<WindowMessenger>,
    ) -> Self {
        Self {
            cart,
            mirror,
            messenger,
        }
    }

    /// Subscribe and start answering in a background task. Subscription
    /// happens before the task is spawned, so a handshake sent right after
    /// this returns is never missed.
    pub fn spawn(self) -> BusResult<JoinHandle<()>> {
        let rx = self.messenger.subscribe()?;
        Ok(tokio::spawn(self.pump(rx)))
    }

    async fn pump(self, mut rx: broadcast::Receiver<Delivery>) {
        loop {
            match rx.recv().await {
                Ok(delivery) => self.handle(&delivery),
                Err(RecvError::Lagged(missed)) => {
                    warn!(
                        target: "handoff::responder",
                        missed, "responder lagged behind the window bus"
                    );
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!(target: "handoff::responder", "window detached; responder stopped");
    }

    /// Process one delivery. Split out of the pump so hosts that run their
    /// own event loop can feed deliveries in directly.
    pub fn handle(&self, delivery: &Delivery) {
        // our own broadcasts loop back; never answer our own handshake
        if delivery.from == self.messenger.window().id {
            return;
        }
        let Some(message) = self.messenger.decode(delivery) else {
            return;
        };
        if message.kind.is_ready_signal() {
            self.answer(&delivery.from);
        } else if message.kind == MessageKind::CartReceived {
            debug!(
                target: "handoff::responder",
                attempt_id = ?message.attempt_id,
                "counterpart confirmed cart receipt"
            );
        }
    }

    fn answer(&self, requester: &WindowId) {
        let lines = self.cart.lines_or_mirrored(&self.mirror);
        if lines.is_empty() {
            debug!(
                target: "handoff::responder",
                "handshake received but there is no cart to share"
            );
            return;
        }
        let snapshot = CartSnapshot::capture(lines, self.messenger.origin());
        let message = PropagationMessage::cart_data(&snapshot);
        if let Err(err) = self.messenger.reply(requester, &message) {
            warn!(
                target: "handoff::responder",
                window = %requester,
                error = %err,
                "direct handshake reply failed"
            );
        }
        // fallback path in case the direct reply was lost
        self.messenger.broadcast(&message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use checkout_proto::CartLine;
    use std::time::Duration;
    use window_bus::{LocalWindowBus, WindowBus};

    const SHOP: &str = "https://shop.tenera.life";
    const PAY: &str = "https://pay.tenera.life";

    fn allowed() -> Vec<String> {
        vec![SHOP.to_string(), PAY.to_string()]
    }

    fn responder_with_cart(
        bus: &Arc<LocalWindowBus>,
        lines: Vec<CartLine>,
    ) -> (ReadyResponder, WindowId) {
        let window = bus.register(SHOP);
        let id = window.id.clone();
        let messenger = Arc::new(WindowMessenger::new(bus.clone(), window, allowed()));
        let mirror = Arc::new(StorageMirror::new(
            Arc::new(MemoryStore::new()),
            vec!["teneraCart".to_string()],
        ));
        let responder = ReadyResponder::new(Arc::new(CartStore::with_lines(lines)), mirror, messenger);
        (responder, id)
    }

    fn ready_from(from: &WindowId, origin: &str) -> Delivery {
        Delivery {
            from: from.clone(),
            origin: origin.to_string(),
            payload: serde_json::to_vec(&PropagationMessage::cart_ready(origin))
                .unwrap()
                .into(),
        }
    }

    #[tokio::test]
    async fn answers_a_handshake_with_cart_data() {
        let bus = Arc::new(LocalWindowBus::new());
        let (responder, _) = responder_with_cart(
            &bus,
            vec![CartLine::new("blood_booster", "Blood Booster", 2_500_000, 2)],
        );
        let asker = bus.register(PAY);
        let mut asker_rx = bus.subscribe(&asker.id).unwrap();

        responder.handle(&ready_from(&asker.id, PAY));

        let delivery = asker_rx.try_recv().unwrap();
        let message: PropagationMessage = serde_json::from_slice(&delivery.payload).unwrap();
        assert_eq!(message.kind, MessageKind::CartData);
        assert_eq!(message.lines().unwrap()[0].id, "blood_booster");
        assert!(message.attempt_id.is_some());
    }

    #[tokio::test]
    async fn says_nothing_when_there_is_no_cart() {
        let bus = Arc::new(LocalWindowBus::new());
        let (responder, _) = responder_with_cart(&bus, Vec::new());
        let asker = bus.register(PAY);
        let mut asker_rx = bus.subscribe(&asker.id).unwrap();

        responder.handle(&ready_from(&asker.id, PAY));
        assert!(asker_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn never_answers_its_own_broadcast() {
        let bus = Arc::new(LocalWindowBus::new());
        let (responder, own_id) = responder_with_cart(
            &bus,
            vec![CartLine::new("blood_booster", "Blood Booster", 2_500_000, 2)],
        );
        let mut own_rx = bus.subscribe(&own_id).unwrap();

        responder.handle(&ready_from(&own_id, SHOP));
        assert!(own_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn spawned_responder_serves_the_bus() {
        let bus = Arc::new(LocalWindowBus::new());
        let (responder, landing_id) = responder_with_cart(
            &bus,
            vec![CartLine::new("immune_tea", "Immune Tea", 1_200_000, 1)],
        );
        responder.spawn().unwrap();

        let asker = bus.register(PAY);
        let mut asker_rx = bus.subscribe(&asker.id).unwrap();
        let asker_messenger =
            WindowMessenger::new(bus.clone(), asker, allowed()).with_parent(landing_id);
        asker_messenger.broadcast(&PropagationMessage::cart_ready(PAY));

        // the asker's own broadcast loops back first; keep reading until
        // the responder's answer arrives
        let answer = tokio::time::timeout(Duration::from_millis(500), async {
            loop {
                let delivery = asker_rx.recv().await.unwrap();
                if let Some(message) = asker_messenger.decode(&delivery) {
                    if message.kind == MessageKind::CartData {
                        return message;
                    }
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(answer.lines().unwrap()[0].id, "immune_tea");
    }
}
