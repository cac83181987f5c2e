use checkout_proto::CartSnapshot;
use thiserror::Error;
use tracing::warn;
use url::Url;

#[derive(Debug, Error)]
pub enum RedirectError {
    #[error("invalid checkout base url: {0}")]
    InvalidBase(String),
}

/// How the cart rides in the redirect URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartPayload {
    /// Full line array in the `cart` query parameter.
    Inline,
    /// Server-side snapshot reference in `cartRef`.
    Reference(String),
    /// No cart payload at all; the receiver must fall back to its other
    /// channels.
    Omitted,
}

#[derive(Debug, Clone)]
pub struct RedirectPlan {
    pub url: Url,
    pub payload: CartPayload,
    pub synced: bool,
}

/// Builds checkout redirect URLs. Construction validates the base once;
/// after that every plan succeeds, because redirecting is the one step of
/// the handoff that must never be blocked.
pub struct RedirectBuilder {
    base: Url,
    max_url_len: usize,
    currency: String,
}

impl RedirectBuilder {
    pub fn new(
        base: &str,
        max_url_len: usize,
        currency: impl Into<String>,
    ) -> Result<Self, RedirectError> {
        let base = Url::parse(base.trim()).map_err(|err| RedirectError::InvalidBase(err.to_string()))?;
        Ok(Self {
            base,
            max_url_len,
            currency: currency.into(),
        })
    }

    fn build(
        &self,
        snapshot: &CartSnapshot,
        synced: bool,
        now_ms: i64,
        cart_param: Option<(&str, &str)>,
    ) -> Url {
        let mut url = self.base.clone();
        {
            let mut query = url.query_pairs_mut();
            if let Some((name, value)) = cart_param {
                query.append_pair(name, value);
            }
            match serde_json::to_string(&snapshot.summary(&self.currency)) {
                Ok(summary) => {
                    query.append_pair("orderData", &summary);
                }
                Err(err) => {
                    warn!(
                        target: "handoff::redirect",
                        error = %err,
                        "order summary could not be serialized; omitted"
                    );
                }
            }
            query.append_pair("synced", if synced { "true" } else { "false" });
            query.append_pair("t", &now_ms.to_string());
        }
        url
    }

    /// Plan with the cart inlined in the URL, or `None` when the result
    /// would blow past the length budget and the cart needs stashing.
    pub fn plan_inline(
        &self,
        snapshot: &CartSnapshot,
        synced: bool,
        now_ms: i64,
    ) -> Option<RedirectPlan> {
        let serialized = match serde_json::to_string(&snapshot.lines) {
            Ok(serialized) => serialized,
            Err(err) => {
                warn!(
                    target: "handoff::redirect",
                    error = %err,
                    "cart lines could not be serialized for the url"
                );
                return None;
            }
        };
        let url = self.build(snapshot, synced, now_ms, Some(("cart", &serialized)));
        if url.as_str().len() > self.max_url_len {
            return None;
        }
        Some(RedirectPlan {
            url,
            payload: CartPayload::Inline,
            synced,
        })
    }

    /// Plan carrying a stashed snapshot reference instead of the lines.
    pub fn plan_reference(
        &self,
        snapshot: &CartSnapshot,
        reference: &str,
        synced: bool,
        now_ms: i64,
    ) -> RedirectPlan {
        let url = self.build(snapshot, synced, now_ms, Some(("cartRef", reference)));
        RedirectPlan {
            url,
            payload: CartPayload::Reference(reference.to_string()),
            synced,
        }
    }

    /// Plan without any cart payload, used when the cart neither fits
    /// inline nor could be stashed. `synced` is forced off so the
    /// receiving page knows it has to pull the cart itself.
    pub fn plan_omitted(&self, snapshot: &CartSnapshot, now_ms: i64) -> RedirectPlan {
        let url = self.build(snapshot, false, now_ms, None);
        RedirectPlan {
            url,
            payload: CartPayload::Omitted,
            synced: false,
        }
    }
}
