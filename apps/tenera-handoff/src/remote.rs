use std::time::Duration;

use async_trait::async_trait;
use checkout_proto::{CartSnapshot, OrderDraft};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("invalid gate url: {0}")]
    InvalidConfig(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: StatusCode,
        body: String,
    },
    #[error("gate rejected the request: {0}")]
    Rejected(String),
    #[error("gate response missing {0}")]
    InvalidResponse(&'static str),
    #[error("order sink is not available")]
    Unavailable,
}

/// Acknowledgement for a persisted order draft.
#[derive(Debug, Clone)]
pub struct SinkAck {
    pub order_id: Option<String>,
    pub duplicate: bool,
}

/// Handle for a cart snapshot stashed server-side, passed through the
/// redirect URL when the inline payload would not fit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRef {
    pub reference: String,
}

/// Server-side persistence leg of the handoff. The orchestrator drives it
/// through this seam so tests can count attempts and fail on purpose.
#[async_trait]
pub trait OrderSink: Send + Sync {
    async fn post_order(&self, draft: &OrderDraft) -> Result<SinkAck, SinkError>;
    async fn stash_snapshot(&self, snapshot: &CartSnapshot) -> Result<SnapshotRef, SinkError>;
    async fn fetch_snapshot(&self, reference: &str) -> Result<Option<CartSnapshot>, SinkError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderAckBody {
    success: bool,
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default)]
    duplicate: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StashBody {
    success: bool,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client for the order gate.
#[derive(Clone)]
pub struct HttpOrderSink {
    http: Client,
    base_url: String,
}

impl HttpOrderSink {
    pub fn new(base_url: &str, post_timeout: Duration) -> Result<Self, SinkError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        Url::parse(&base_url).map_err(|err| SinkError::InvalidConfig(err.to_string()))?;
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(post_timeout)
            .build()?;
        Ok(Self { http, base_url })
    }
}

#[async_trait]
impl OrderSink for HttpOrderSink {
    async fn post_order(&self, draft: &OrderDraft) -> Result<SinkAck, SinkError> {
        let url = format!("{}/api/orders", self.base_url);
        let res = self.http.post(url).json(draft).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(SinkError::UnexpectedStatus { status, body });
        }
        let body = res.json::<OrderAckBody>().await?;
        if !body.success {
            return Err(SinkError::Rejected(
                body.message.unwrap_or_else(|| "unspecified".to_string()),
            ));
        }
        debug!(
            target: "handoff::remote",
            order_id = body.order_id.as_deref().unwrap_or("-"),
            duplicate = body.duplicate,
            "order draft acknowledged"
        );
        Ok(SinkAck {
            order_id: body.order_id,
            duplicate: body.duplicate,
        })
    }

    async fn stash_snapshot(&self, snapshot: &CartSnapshot) -> Result<SnapshotRef, SinkError> {
        let url = format!("{}/api/snapshots", self.base_url);
        let res = self.http.post(url).json(snapshot).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(SinkError::UnexpectedStatus { status, body });
        }
        let body = res.json::<StashBody>().await?;
        if !body.success {
            return Err(SinkError::Rejected(
                body.message.unwrap_or_else(|| "unspecified".to_string()),
            ));
        }
        match body.reference {
            Some(reference) => Ok(SnapshotRef { reference }),
            None => Err(SinkError::InvalidResponse("reference")),
        }
    }

    async fn fetch_snapshot(&self, reference: &str) -> Result<Option<CartSnapshot>, SinkError> {
        let url = format!("{}/api/snapshots/{}", self.base_url, reference);
        let res = self.http.get(url).send().await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(SinkError::UnexpectedStatus { status, body });
        }
        Ok(Some(res.json::<CartSnapshot>().await?))
    }
}

/// Sink for offline runs and tests of the degraded path. Every call
/// reports the gate as unreachable.
pub struct NullOrderSink;

#[async_trait]
impl OrderSink for NullOrderSink {
    async fn post_order(&self, _draft: &OrderDraft) -> Result<SinkAck, SinkError> {
        Err(SinkError::Unavailable)
    }

    async fn stash_snapshot(&self, _snapshot: &CartSnapshot) -> Result<SnapshotRef, SinkError> {
        Err(SinkError::Unavailable)
    }

    async fn fetch_snapshot(&self, _reference: &str) -> Result<Option<CartSnapshot>, SinkError> {
        Err(SinkError::Unavailable)
    }
}
