use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::handlers::AppState;
use crate::storage::{epoch_seconds, PaymentRecord};

type HmacSha512 = Hmac<sha2::Sha512>;

#[derive(Debug, Deserialize)]
pub struct PaymentEvent {
    pub event: String,
    pub data: PaymentData,
}

#[derive(Debug, Deserialize)]
pub struct PaymentData {
    pub reference: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: Option<PaymentMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMetadata {
    #[serde(default)]
    pub attempt_id: Option<Uuid>,
}

/// POST /api/webhooks/payment - Provider callback. Unlike the storefront
/// endpoints this one hard-rejects: an unverifiable sender gets 401, not a
/// polite success envelope.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(secret) = state.config.webhook_secret.as_deref() else {
        warn!(target: "gate::webhook", "webhook received but no secret is configured; refusing");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let signature = headers
        .get(state.config.signature_header.as_str())
        .and_then(|value| value.to_str().ok());
    let Some(signature) = signature else {
        warn!(
            target: "gate::webhook",
            header = %state.config.signature_header,
            "webhook missing signature header"
        );
        return StatusCode::UNAUTHORIZED.into_response();
    };
    if !verify_signature(secret.as_bytes(), &body, signature) {
        warn!(target: "gate::webhook", "webhook signature mismatch");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let event: PaymentEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(err) => {
            warn!(target: "gate::webhook", %err, "webhook body is not a payment event");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    if event.event != "charge.success" {
        debug!(target: "gate::webhook", event = %event.event, "ignoring non-charge event");
        return Json(json!({ "received": true })).into_response();
    }

    let reference = sanitize_reference(&event.data.reference);
    if reference.is_empty() {
        warn!(
            target: "gate::webhook",
            raw = %event.data.reference,
            "charge reference is empty after sanitizing"
        );
        return StatusCode::BAD_REQUEST.into_response();
    }

    let attempt_id = event.data.metadata.as_ref().and_then(|meta| meta.attempt_id);
    let record = PaymentRecord {
        reference: reference.clone(),
        amount: event.data.amount,
        currency: event.data.currency.clone(),
        attempt_id,
        recorded_at: epoch_seconds(),
    };

    let fresh = match state.store.record_payment(record).await {
        Ok(fresh) => fresh,
        Err(err) => {
            error!(target: "gate::webhook", "payment store error: {err:?}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if !fresh {
        debug!(target: "gate::webhook", %reference, "charge already recorded, skipping");
        return Json(json!({ "received": true, "duplicate": true })).into_response();
    }

    match attempt_id {
        Some(attempt_id) => match state.store.mark_order_paid(attempt_id, &reference).await {
            Ok(true) => {
                info!(target: "gate::webhook", %attempt_id, %reference, "order marked paid");
            }
            Ok(false) => {
                warn!(
                    target: "gate::webhook",
                    %attempt_id,
                    %reference,
                    "charge references an unknown attempt"
                );
            }
            Err(err) => {
                error!(target: "gate::webhook", "order store error: {err:?}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        },
        None => {
            debug!(target: "gate::webhook", %reference, "charge carries no attempt id");
        }
    }

    Json(json!({ "received": true, "duplicate": false })).into_response()
}

/// Hex HMAC-SHA512 over the raw request body, the scheme payment providers
/// sign their callbacks with.
pub fn compute_signature(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha512::new_from_slice(secret).expect("invalid hmac key");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn verify_signature(secret: &[u8], body: &[u8], signature: &str) -> bool {
    let Ok(decoded) = hex::decode(signature.trim()) else {
        return false;
    };
    let mut mac = HmacSha512::new_from_slice(secret).expect("invalid hmac key");
    mac.update(body);
    // verify_slice compares in constant time.
    mac.verify_slice(&decoded).is_ok()
}

/// Charge references end up inside storage keys, so strip anything outside
/// a conservative charset and cap the length.
fn sanitize_reference(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
        .take(64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::handlers::{build_router, AppState};
    use crate::storage::{MemoryOrderStore, OrderRecord, OrderStatus, OrderStore};
    use axum::body::Body;
    use axum::http::Request;
    use axum::Router;
    use checkout_proto::CartLine;
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    const SECRET: &str = "wh_secret_for_tests";

    fn test_state(secret: Option<&str>) -> (AppState, Arc<MemoryOrderStore>) {
        let store = Arc::new(MemoryOrderStore::new());
        let config = Arc::new(Config {
            webhook_secret: secret.map(str::to_string),
            ..Config::default()
        });
        (
            AppState {
                store: store.clone(),
                config,
            },
            store,
        )
    }

    async fn seed_order(store: &MemoryOrderStore) -> Uuid {
        let attempt = Uuid::new_v4();
        let record = OrderRecord::new(
            attempt,
            vec![CartLine::new("blood_booster", "Blood Booster", 2_500_000, 2)],
            5_000_000,
            "NGN".into(),
            "https://shop.tenera.life".into(),
        );
        store.create_order(record).await.unwrap();
        attempt
    }

    fn charge_body(reference: &str, attempt: Option<Uuid>) -> String {
        let metadata = match attempt {
            Some(id) => json!({ "attemptId": id }),
            None => json!({}),
        };
        json!({
            "event": "charge.success",
            "data": {
                "reference": reference,
                "amount": 5_000_000,
                "currency": "NGN",
                "metadata": metadata
            }
        })
        .to_string()
    }

    async fn send_webhook(
        app: Router,
        signature: Option<&str>,
        body: &str,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/webhooks/payment")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header("x-paystack-signature", signature);
        }
        let response = app
            .oneshot(builder.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn verified_charge_marks_the_order_paid() {
        let (state, store) = test_state(Some(SECRET));
        let attempt = seed_order(&store).await;
        let body = charge_body("TEN-REF-1", Some(attempt));
        let signature = compute_signature(SECRET.as_bytes(), body.as_bytes());

        let (status, resp) =
            send_webhook(build_router(state), Some(&signature), &body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp["received"], true);
        assert_eq!(resp["duplicate"], false);

        let order = store.get_order(attempt).await.unwrap().expect("order");
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.payment_reference.as_deref(), Some("TEN-REF-1"));
    }

    #[tokio::test]
    async fn wrong_signature_is_refused() {
        let (state, store) = test_state(Some(SECRET));
        let attempt = seed_order(&store).await;
        let body = charge_body("TEN-REF-2", Some(attempt));
        let forged = compute_signature(b"some other secret", body.as_bytes());

        let (status, _) =
            send_webhook(build_router(state.clone()), Some(&forged), &body).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send_webhook(build_router(state), None, &body).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let order = store.get_order(attempt).await.unwrap().expect("order");
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn missing_secret_fails_closed() {
        let (state, store) = test_state(None);
        let attempt = seed_order(&store).await;
        let body = charge_body("TEN-REF-3", Some(attempt));
        // Even a correctly computed signature cannot be checked without a
        // configured secret.
        let signature = compute_signature(SECRET.as_bytes(), body.as_bytes());

        let (status, _) = send_webhook(build_router(state), Some(&signature), &body).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn garbage_body_with_a_valid_signature_is_bad_request() {
        let (state, _) = test_state(Some(SECRET));
        let body = "not a payment event";
        let signature = compute_signature(SECRET.as_bytes(), body.as_bytes());

        let (status, _) = send_webhook(build_router(state), Some(&signature), body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn replayed_charge_is_skipped() {
        let (state, store) = test_state(Some(SECRET));
        let attempt = seed_order(&store).await;
        let body = charge_body("TEN-REF-4", Some(attempt));
        let signature = compute_signature(SECRET.as_bytes(), body.as_bytes());

        let (_, first) =
            send_webhook(build_router(state.clone()), Some(&signature), &body).await;
        assert_eq!(first["duplicate"], false);

        let (status, replay) =
            send_webhook(build_router(state), Some(&signature), &body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(replay["duplicate"], true);

        let order = store.get_order(attempt).await.unwrap().expect("order");
        assert_eq!(order.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn references_are_sanitized_before_storage() {
        let (state, store) = test_state(Some(SECRET));
        let attempt = seed_order(&store).await;
        let body = charge_body("TEN 123/../x", Some(attempt));
        let signature = compute_signature(SECRET.as_bytes(), body.as_bytes());

        let (status, _) = send_webhook(build_router(state), Some(&signature), &body).await;
        assert_eq!(status, StatusCode::OK);

        let order = store.get_order(attempt).await.unwrap().expect("order");
        assert_eq!(order.payment_reference.as_deref(), Some("TEN123x"));
    }

    #[tokio::test]
    async fn unusable_reference_is_bad_request() {
        let (state, _) = test_state(Some(SECRET));
        let body = charge_body("///", None);
        let signature = compute_signature(SECRET.as_bytes(), body.as_bytes());

        let (status, _) = send_webhook(build_router(state), Some(&signature), &body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn non_charge_events_are_acked_but_not_recorded() {
        let (state, _) = test_state(Some(SECRET));
        let body = json!({
            "event": "transfer.success",
            "data": { "reference": "TEN-REF-5", "amount": 1 }
        })
        .to_string();
        let signature = compute_signature(SECRET.as_bytes(), body.as_bytes());

        let (status, resp) =
            send_webhook(build_router(state.clone()), Some(&signature), &body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp["received"], true);

        // The reference is still unclaimed, so a real charge for it is fresh.
        let charge = charge_body("TEN-REF-5", None);
        let signature = compute_signature(SECRET.as_bytes(), charge.as_bytes());
        let (_, resp) = send_webhook(build_router(state), Some(&signature), &charge).await;
        assert_eq!(resp["duplicate"], false);
    }
}
