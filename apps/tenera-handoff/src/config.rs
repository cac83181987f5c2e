use std::env;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Storage keys probed for a mirrored cart, most specific first.
pub const DEFAULT_STORAGE_KEYS: [&str; 5] = [
    "teneraCart",
    "systemeCart",
    "cart",
    "cartItems",
    "pendingOrderData",
];

/// Origins allowed to exchange cart messages with us.
pub const DEFAULT_ALLOWED_ORIGINS: [&str; 3] = [
    "https://shop.tenera.life",
    "https://pay.tenera.life",
    "https://tenera.systeme.io",
];

/// Client-side handoff configuration
#[derive(Debug, Clone)]
pub struct HandoffConfig {
    /// Origin this runtime speaks as when posting messages
    pub origin: String,
    /// Checkout page the redirect targets
    pub checkout_base_url: String,
    /// Base URL of the order gate (orders + snapshot stash)
    pub gate_base_url: String,
    pub storage_keys: Vec<String>,
    pub allowed_origins: Vec<String>,
    /// Pause between kicking off propagation and leaving the page
    pub grace_delay: Duration,
    /// Total budget for a single order POST
    pub post_timeout: Duration,
    pub retry: RetryPolicy,
    /// Redirect URLs longer than this carry a snapshot reference instead
    /// of the inline cart payload
    pub max_url_len: usize,
    pub currency: String,
}

impl HandoffConfig {
    pub fn from_env() -> Self {
        let origin =
            env::var("TENERA_ORIGIN").unwrap_or_else(|_| "https://shop.tenera.life".to_string());
        let checkout_base_url = env::var("TENERA_CHECKOUT_URL")
            .unwrap_or_else(|_| "https://pay.tenera.life/checkout".to_string());
        let gate_base_url =
            env::var("TENERA_GATE_URL").unwrap_or_else(|_| "http://127.0.0.1:8787".to_string());
        let storage_keys = env::var("TENERA_STORAGE_KEYS")
            .ok()
            .map(|raw| split_list(&raw))
            .filter(|keys| !keys.is_empty())
            .unwrap_or_else(|| DEFAULT_STORAGE_KEYS.iter().map(|k| k.to_string()).collect());
        let allowed_origins = env::var("TENERA_ALLOWED_ORIGINS")
            .ok()
            .map(|raw| split_list(&raw))
            .filter(|origins| !origins.is_empty())
            .unwrap_or_else(|| {
                DEFAULT_ALLOWED_ORIGINS
                    .iter()
                    .map(|o| o.to_string())
                    .collect()
            });
        let grace_delay = env::var("TENERA_GRACE_MS")
            .ok()
            .and_then(|val| val.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(1_000));
        let post_timeout = env::var("TENERA_POST_TIMEOUT_MS")
            .ok()
            .and_then(|val| val.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(5));
        let mut retry = RetryPolicy::default();
        if let Some(attempts) = env::var("TENERA_SYNC_ATTEMPTS")
            .ok()
            .and_then(|val| val.parse().ok())
        {
            retry.max_attempts = attempts;
        }
        if let Some(delay_ms) = env::var("TENERA_SYNC_DELAY_MS")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
        {
            retry.initial_delay = Duration::from_millis(delay_ms);
        }

        Self {
            origin,
            checkout_base_url,
            gate_base_url,
            storage_keys,
            allowed_origins,
            grace_delay,
            post_timeout,
            retry,
            max_url_len: env::var("TENERA_MAX_URL_LEN")
                .ok()
                .and_then(|val| val.parse().ok())
                .unwrap_or(2_000),
            currency: env::var("TENERA_CURRENCY").unwrap_or_else(|_| "NGN".to_string()),
        }
    }

    /// Whether `origin` may take part in the message channel. `origin` is
    /// compared exactly; no wildcard matching.
    pub fn allows_origin(&self, origin: &str) -> bool {
        self.origin == origin || self.allowed_origins.iter().any(|allowed| allowed == origin)
    }
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            origin: "https://shop.tenera.life".to_string(),
            checkout_base_url: "https://pay.tenera.life/checkout".to_string(),
            gate_base_url: "http://127.0.0.1:8787".to_string(),
            storage_keys: DEFAULT_STORAGE_KEYS.iter().map(|k| k.to_string()).collect(),
            allowed_origins: DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|o| o.to_string())
                .collect(),
            grace_delay: Duration::from_millis(1_000),
            post_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            max_url_len: 2_000,
            currency: "NGN".to_string(),
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_string())
        .collect()
}
