use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use checkout_proto::{CartSnapshot, OrderDraft};
use rand::{distributions::Alphanumeric, Rng};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::storage::{CreateOutcome, OrderRecord, SharedStore};
use crate::webhook;

#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub config: Arc<Config>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/orders", post(create_order))
        .route("/api/snapshots", post(stash_snapshot))
        .route("/api/snapshots/:reference", get(fetch_snapshot))
        .route("/api/webhooks/payment", post(webhook::payment_webhook))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
    webhook_configured: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAckResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    pub duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OrderAckResponse {
    fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            order_id: None,
            duplicate: false,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StashResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// GET /health - Liveness plus whether webhook verification is armed.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        webhook_configured: state.config.webhook_secret.is_some(),
    })
}

/// POST /api/orders - Record a pending order, idempotent on attempt id.
pub async fn create_order(
    State(state): State<AppState>,
    Json(draft): Json<OrderDraft>,
) -> Result<Json<OrderAckResponse>, StatusCode> {
    if draft.items.is_empty() {
        warn!(target: "gate::orders", source = %draft.source, "rejecting order with no items");
        return Ok(Json(OrderAckResponse::rejected("order has no items")));
    }
    for (index, line) in draft.items.iter().enumerate() {
        if let Err(err) = line.validate() {
            warn!(target: "gate::orders", %index, %err, "rejecting order with invalid line");
            return Ok(Json(OrderAckResponse::rejected(format!(
                "line {} is invalid: {}",
                index, err
            ))));
        }
    }

    // Client totals are a hint; the lines are the authority. Validated
    // lines cannot overflow individually, but their sum still can.
    let summed = draft
        .items
        .iter()
        .try_fold(0i64, |acc, line| acc.checked_add(line.line_total_minor()));
    let computed = match summed {
        Some(total) => total,
        None => {
            warn!(
                target: "gate::orders",
                attempt_id = %draft.attempt_id,
                "rejecting order whose line totals overflow"
            );
            return Ok(Json(OrderAckResponse::rejected(
                "order total is not representable",
            )));
        }
    };
    if computed != draft.total_amount {
        warn!(
            target: "gate::orders",
            attempt_id = %draft.attempt_id,
            client_total = draft.total_amount,
            computed_total = computed,
            "client total disagrees with line items; storing the recomputed value"
        );
    }

    let record = OrderRecord::new(
        draft.attempt_id,
        draft.items,
        computed,
        draft.currency,
        draft.source,
    );
    let order_id = record.order_id.clone();
    let attempt_id = record.attempt_id;

    match state.store.create_order(record).await {
        Ok(CreateOutcome::Created) => {
            info!(target: "gate::orders", %attempt_id, %order_id, total = computed, "order recorded");
            Ok(Json(OrderAckResponse {
                success: true,
                order_id: Some(order_id),
                duplicate: false,
                message: None,
            }))
        }
        Ok(CreateOutcome::Duplicate(existing)) => {
            debug!(target: "gate::orders", %attempt_id, order_id = %existing, "replayed attempt, returning existing order");
            Ok(Json(OrderAckResponse {
                success: true,
                order_id: Some(existing),
                duplicate: true,
                message: None,
            }))
        }
        Err(err) => {
            error!(target: "gate::orders", "order store error: {err:?}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// POST /api/snapshots - Park a cart that is too large to travel by URL.
pub async fn stash_snapshot(
    State(state): State<AppState>,
    Json(snapshot): Json<CartSnapshot>,
) -> Result<Json<StashResponse>, StatusCode> {
    if snapshot.is_empty() {
        return Ok(Json(StashResponse {
            success: false,
            reference: None,
            message: Some("snapshot has no lines".into()),
        }));
    }

    let reference = generate_reference();
    match state.store.put_snapshot(&reference, &snapshot).await {
        Ok(()) => {
            info!(
                target: "gate::snapshots",
                %reference,
                attempt_id = %snapshot.attempt_id,
                lines = snapshot.lines.len(),
                "snapshot stashed"
            );
            Ok(Json(StashResponse {
                success: true,
                reference: Some(reference),
                message: None,
            }))
        }
        Err(err) => {
            error!(target: "gate::snapshots", "snapshot store error: {err:?}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /api/snapshots/:reference - Resolve a parked cart; 404 once expired.
pub async fn fetch_snapshot(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<CartSnapshot>, StatusCode> {
    match state.store.get_snapshot(&reference).await {
        Ok(Some(snapshot)) => Ok(Json(snapshot)),
        Ok(None) => {
            debug!(target: "gate::snapshots", %reference, "snapshot missing or expired");
            Err(StatusCode::NOT_FOUND)
        }
        Err(err) => {
            error!(target: "gate::snapshots", "snapshot store error: {err:?}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn generate_reference() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .map(char::from)
        .take(12)
        .collect();
    format!("snp_{}", suffix)
}
