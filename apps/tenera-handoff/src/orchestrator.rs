use std::sync::Arc;

use checkout_proto::{CartLine, CartSnapshot, OrderDraft, PropagationMessage};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::cart::CartStore;
use crate::config::HandoffConfig;
use crate::messenger::WindowMessenger;
use crate::redirect::{RedirectBuilder, RedirectError, RedirectPlan};
use crate::remote::{OrderSink, SinkError};
use crate::storage::StorageMirror;

/// Where a handoff currently stands. `Failed` only marks that every sync
/// attempt was spent; the redirect still happens afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffPhase {
    Idle,
    Collecting,
    Propagating,
    Failed,
    Redirecting,
    Done,
}

/// Seam for the final page navigation, so tests and the CLI can capture
/// the redirect instead of performing it.
pub trait Navigator: Send + Sync {
    fn navigate(&self, url: &Url);
}

/// Records navigations instead of performing them.
#[derive(Default)]
pub struct RecordingNavigator {
    visited: Mutex<Vec<Url>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<Url> {
        self.visited.lock().last().cloned()
    }

    pub fn count(&self) -> usize {
        self.visited.lock().len()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, url: &Url) {
        self.visited.lock().push(url.clone());
    }
}

/// Result of one completed handoff.
#[derive(Debug, Clone)]
pub struct HandoffOutcome {
    pub snapshot: CartSnapshot,
    pub synced: bool,
    pub plan: RedirectPlan,
}

/// Drives a checkout handoff end to end: capture the cart, push it down
/// every channel, then leave the page. Sync failures degrade the handoff
/// but never stop it.
pub struct CheckoutOrchestrator {
    config: HandoffConfig,
    cart: Arc<CartStore>,
    mirror: Arc<StorageMirror>,
    messenger: Arc<WindowMessenger>,
    sink: Arc<dyn OrderSink>,
    navigator: Arc<dyn Navigator>,
    redirect: RedirectBuilder,
    phase: RwLock<HandoffPhase>,
}

impl CheckoutOrchestrator {
    pub fn new(
        config: HandoffConfig,
        cart: Arc<CartStore>,
        mirror: Arc<StorageMirror>,
        messenger: Arc<WindowMessenger>,
        sink: Arc<dyn OrderSink>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, RedirectError> {
        let redirect = RedirectBuilder::new(
            &config.checkout_base_url,
            config.max_url_len,
            config.currency.clone(),
        )?;
        Ok(Self {
            config,
            cart,
            mirror,
            messenger,
            sink,
            navigator,
            redirect,
            phase: RwLock::new(HandoffPhase::Idle),
        })
    }

    pub fn phase(&self) -> HandoffPhase {
        *self.phase.read()
    }

    fn set_phase(&self, phase: HandoffPhase) {
        *self.phase.write() = phase;
        debug!(target: "handoff::orchestrator", phase = ?phase, "phase change");
    }

    /// Resolve the cart to hand off: the in-memory store first, then the
    /// storage mirror. An empty result is valid; checkout proceeds anyway.
    pub fn collect(&self) -> CartSnapshot {
        self.set_phase(HandoffPhase::Collecting);
        let lines = self.cart.lines_or_mirrored(&self.mirror);
        CartSnapshot::capture(lines, self.config.origin.clone())
    }

    async fn drive_channels_once(
        &self,
        snapshot: &CartSnapshot,
        attempt: u32,
    ) -> Result<(), SinkError> {
        self.mirror.write(snapshot);
        self.messenger
            .broadcast(&PropagationMessage::cart_data(snapshot));
        let draft = OrderDraft::from_snapshot(snapshot, &self.config.currency);
        let ack = self.sink.post_order(&draft).await?;
        debug!(
            target: "handoff::orchestrator",
            attempt,
            order_id = ack.order_id.as_deref().unwrap_or("-"),
            duplicate = ack.duplicate,
            "order draft persisted"
        );
        Ok(())
    }

    /// Run the full handoff. The storage and message channels are re-driven
    /// on every sync attempt; only the remote ack decides `synced`. An empty
    /// cart skips propagation entirely and redirects at once.
    pub async fn checkout(&self) -> HandoffOutcome {
        let snapshot = self.collect();
        let synced = if snapshot.is_empty() {
            debug!(
                target: "handoff::orchestrator",
                "cart is empty; skipping channel propagation"
            );
            false
        } else {
            self.set_phase(HandoffPhase::Propagating);
            let sync = self
                .config
                .retry
                .run(|attempt| self.drive_channels_once(&snapshot, attempt));
            let (synced, ()) = tokio::join!(sync, sleep(self.config.grace_delay));
            if !synced {
                self.set_phase(HandoffPhase::Failed);
                warn!(
                    target: "handoff::orchestrator",
                    attempts = self.config.retry.max_attempts,
                    "cart sync exhausted every attempt; redirecting anyway"
                );
                self.messenger
                    .broadcast(&PropagationMessage::sync_error(self.config.origin.clone()));
            }
            synced
        };

        self.set_phase(HandoffPhase::Redirecting);
        let now_ms = Utc::now().timestamp_millis();
        let plan = match self.redirect.plan_inline(&snapshot, synced, now_ms) {
            Some(plan) => plan,
            None => match self.sink.stash_snapshot(&snapshot).await {
                Ok(stashed) => {
                    info!(
                        target: "handoff::orchestrator",
                        reference = %stashed.reference,
                        "cart too large for the url; stashed server-side"
                    );
                    self.redirect
                        .plan_reference(&snapshot, &stashed.reference, synced, now_ms)
                }
                Err(err) => {
                    warn!(
                        target: "handoff::orchestrator",
                        error = %err,
                        "cart snapshot could not be stashed; redirecting without payload"
                    );
                    self.redirect.plan_omitted(&snapshot, now_ms)
                }
            },
        };

        self.navigator.navigate(&plan.url);
        self.set_phase(HandoffPhase::Done);
        info!(
            target: "handoff::orchestrator",
            synced,
            items = snapshot.item_count(),
            total = snapshot.total_minor(),
            url = %plan.url,
            "checkout handoff complete"
        );
        HandoffOutcome {
            snapshot,
            synced,
            plan,
        }
    }

    /// Merge one line into the cart and tell every window about it.
    pub fn announce_line_added(&self, line: CartLine) {
        self.cart.merge_line(line.clone());
        self.messenger.broadcast(&PropagationMessage::add_to_cart(
            line,
            self.config.origin.clone(),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messenger::WindowMessenger;
    use crate::remote::{SinkAck, SnapshotRef};
    use crate::retry::RetryPolicy;
    use crate::storage::{KeyValueStore, MemoryStore};
    use async_trait::async_trait;
    use checkout_proto::MessageKind;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};
    use window_bus::{LocalWindowBus, WindowBus};

    struct MockSink {
        post_calls: AtomicU32,
        stash_calls: AtomicU32,
        fail_posts: bool,
        stash_reference: Option<String>,
        drafts: Mutex<Vec<OrderDraft>>,
    }

    impl MockSink {
        fn new(fail_posts: bool, stash_reference: Option<&str>) -> Self {
            Self {
                post_calls: AtomicU32::new(0),
                stash_calls: AtomicU32::new(0),
                fail_posts,
                stash_reference: stash_reference.map(|r| r.to_string()),
                drafts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl OrderSink for MockSink {
        async fn post_order(&self, draft: &OrderDraft) -> Result<SinkAck, SinkError> {
            self.post_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_posts {
                return Err(SinkError::Unavailable);
            }
            self.drafts.lock().push(draft.clone());
            Ok(SinkAck {
                order_id: Some("ord_1".to_string()),
                duplicate: false,
            })
        }

        async fn stash_snapshot(&self, _snapshot: &CartSnapshot) -> Result<SnapshotRef, SinkError> {
            self.stash_calls.fetch_add(1, Ordering::SeqCst);
            match &self.stash_reference {
                Some(reference) => Ok(SnapshotRef {
                    reference: reference.clone(),
                }),
                None => Err(SinkError::Unavailable),
            }
        }

        async fn fetch_snapshot(&self, _reference: &str) -> Result<Option<CartSnapshot>, SinkError> {
            Ok(None)
        }
    }

    struct Fixture {
        orchestrator: CheckoutOrchestrator,
        store: Arc<MemoryStore>,
        sink: Arc<MockSink>,
        navigator: Arc<RecordingNavigator>,
    }

    fn fixture(lines: Vec<CartLine>, sink: MockSink, max_url_len: usize) -> Fixture {
        let config = HandoffConfig {
            grace_delay: Duration::from_millis(10),
            retry: RetryPolicy {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
                jitter: Duration::ZERO,
            },
            max_url_len,
            ..HandoffConfig::default()
        };
        let bus = Arc::new(LocalWindowBus::new());
        let window = bus.register(&config.origin);
        let messenger = Arc::new(WindowMessenger::new(
            bus,
            window,
            config.allowed_origins.clone(),
        ));
        let store = Arc::new(MemoryStore::new());
        let mirror = Arc::new(crate::storage::StorageMirror::new(
            store.clone(),
            config.storage_keys.clone(),
        ));
        let sink = Arc::new(sink);
        let navigator = Arc::new(RecordingNavigator::new());
        let orchestrator = CheckoutOrchestrator::new(
            config,
            Arc::new(CartStore::with_lines(lines)),
            mirror,
            messenger,
            sink.clone(),
            navigator.clone(),
        )
        .unwrap();
        Fixture {
            orchestrator,
            store,
            sink,
            navigator,
        }
    }

    fn url_params(url: &Url) -> HashMap<String, String> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    fn booster_cart() -> Vec<CartLine> {
        vec![CartLine::new("blood_booster", "Blood Booster", 2_500_000, 2)]
    }

    #[tokio::test]
    async fn successful_sync_marks_the_url() {
        let fx = fixture(booster_cart(), MockSink::new(false, None), 4_000);
        let outcome = fx.orchestrator.checkout().await;

        assert!(outcome.synced);
        assert_eq!(fx.orchestrator.phase(), HandoffPhase::Done);
        assert_eq!(fx.sink.post_calls.load(Ordering::SeqCst), 1);
        let drafts = fx.sink.drafts.lock();
        assert_eq!(drafts[0].total_amount, 5_000_000);
        // mirror was driven as part of the attempt
        assert!(fx.store.get("teneraCart").unwrap().is_some());
        let params = url_params(&fx.navigator.last().unwrap());
        assert_eq!(params["synced"], "true");
    }

    #[tokio::test]
    async fn exhausted_sync_still_redirects() {
        let fx = fixture(booster_cart(), MockSink::new(true, None), 4_000);
        let outcome = fx.orchestrator.checkout().await;

        assert!(!outcome.synced);
        assert_eq!(fx.sink.post_calls.load(Ordering::SeqCst), 2);
        assert_eq!(fx.navigator.count(), 1);
        let params = url_params(&fx.navigator.last().unwrap());
        assert_eq!(params["synced"], "false");
        // the cart still rides the url even though the gate is down
        assert!(params.contains_key("cart"));
    }

    #[tokio::test]
    async fn empty_cart_redirects_without_waiting() {
        let fx = fixture(Vec::new(), MockSink::new(false, None), 4_000);
        let started = Instant::now();
        let outcome = fx.orchestrator.checkout().await;

        assert!(!outcome.synced);
        assert_eq!(fx.sink.post_calls.load(Ordering::SeqCst), 0);
        assert_eq!(fx.navigator.count(), 1);
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn oversize_cart_redirects_by_reference() {
        let fx = fixture(
            booster_cart(),
            MockSink::new(false, Some("snp_test1")),
            160,
        );
        let outcome = fx.orchestrator.checkout().await;

        assert_eq!(fx.sink.stash_calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            outcome.plan.payload,
            crate::redirect::CartPayload::Reference(_)
        ));
        let params = url_params(&fx.navigator.last().unwrap());
        assert_eq!(params["cartRef"], "snp_test1");
        assert!(!params.contains_key("cart"));
    }

    #[tokio::test]
    async fn stash_failure_downgrades_to_no_payload() {
        let fx = fixture(booster_cart(), MockSink::new(false, None), 160);
        let outcome = fx.orchestrator.checkout().await;

        // sync succeeded but the payload could not travel; the receiver
        // must pull, so the url reports unsynced
        assert!(outcome.synced);
        assert_eq!(
            outcome.plan.payload,
            crate::redirect::CartPayload::Omitted
        );
        let params = url_params(&fx.navigator.last().unwrap());
        assert_eq!(params["synced"], "false");
        assert!(!params.contains_key("cart"));
        assert!(!params.contains_key("cartRef"));
    }

    #[tokio::test]
    async fn announce_merges_and_broadcasts() {
        let fx = fixture(booster_cart(), MockSink::new(false, None), 4_000);
        let mut rx = fx.orchestrator.messenger.subscribe().unwrap();

        fx.orchestrator
            .announce_line_added(CartLine::new("immune_tea", "Immune Tea", 1_200_000, 1));

        let delivery = rx.try_recv().unwrap();
        let message = fx.orchestrator.messenger.decode(&delivery).unwrap();
        assert_eq!(message.kind, MessageKind::AddToCart);
        assert_eq!(message.lines().unwrap()[0].id, "immune_tea");
        assert!(message.attempt_id.is_some());
        assert_eq!(fx.orchestrator.cart.lines().len(), 2);
    }
}
