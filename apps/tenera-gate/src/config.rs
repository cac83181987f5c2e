use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub order_ttl_seconds: u64,
    pub snapshot_ttl_seconds: u64,
    pub webhook_secret: Option<String>,
    pub signature_header: String,
}

impl Config {
    pub fn from_env() -> Self {
        let order_ttl_seconds = env::var("ORDER_TTL")
            .ok()
            .and_then(|val| val.parse().ok())
            .unwrap_or(604_800); // default 7 days
        let snapshot_ttl_seconds = env::var("SNAPSHOT_TTL")
            .ok()
            .and_then(|val| val.parse().ok())
            .unwrap_or(3_600); // default 1 hour
        let webhook_secret = env::var("TENERA_WEBHOOK_SECRET").ok();
        let signature_header = env::var("TENERA_WEBHOOK_SIGNATURE_HEADER")
            .unwrap_or_else(|_| "x-paystack-signature".into());

        Self {
            port: env::var("TENERA_GATE_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8787),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            order_ttl_seconds,
            snapshot_ttl_seconds,
            webhook_secret,
            signature_header,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8787,
            redis_url: "redis://localhost:6379".to_string(),
            order_ttl_seconds: 604_800,
            snapshot_ttl_seconds: 3_600,
            webhook_secret: None,
            signature_header: "x-paystack-signature".to_string(),
        }
    }
}
