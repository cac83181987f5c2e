use anyhow::Result;
use async_trait::async_trait;
use checkout_proto::{CartLine, CartSnapshot};
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub order_id: String,
    pub attempt_id: Uuid,
    pub items: Vec<CartLine>,
    pub total_amount: i64,
    pub currency: String,
    pub source: String,
    pub status: OrderStatus,
    pub created_at: u64,
    #[serde(default)]
    pub payment_reference: Option<String>,
}

impl OrderRecord {
    pub fn new(
        attempt_id: Uuid,
        items: Vec<CartLine>,
        total_amount: i64,
        currency: String,
        source: String,
    ) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();

        Self {
            order_id: Uuid::new_v4().to_string(),
            attempt_id,
            items,
            total_amount,
            currency,
            source,
            status: OrderStatus::Pending,
            created_at,
            payment_reference: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub reference: String,
    pub amount: i64,
    pub currency: Option<String>,
    pub attempt_id: Option<Uuid>,
    pub recorded_at: u64,
}

/// Result of an order upsert keyed by attempt id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// The attempt was already recorded; carries the existing order id.
    Duplicate(String),
}

pub type SharedStore = Arc<dyn OrderStore>;

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts the order unless one already exists for the same attempt id.
    async fn create_order(&self, record: OrderRecord) -> Result<CreateOutcome>;
    async fn get_order(&self, attempt_id: Uuid) -> Result<Option<OrderRecord>>;
    /// Flips the order for this attempt to paid. Returns false when no order matches.
    async fn mark_order_paid(&self, attempt_id: Uuid, reference: &str) -> Result<bool>;
    async fn put_snapshot(&self, reference: &str, snapshot: &CartSnapshot) -> Result<()>;
    async fn get_snapshot(&self, reference: &str) -> Result<Option<CartSnapshot>>;
    /// Records the payment unless the reference was already seen. Returns false on replay.
    async fn record_payment(&self, record: PaymentRecord) -> Result<bool>;
}

#[derive(Clone)]
pub struct RedisOrderStore {
    redis: ConnectionManager,
    order_ttl_seconds: u64,
    snapshot_ttl_seconds: u64,
}

impl RedisOrderStore {
    pub async fn new(
        redis_url: &str,
        order_ttl_seconds: u64,
        snapshot_ttl_seconds: u64,
    ) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;

        Ok(Self {
            redis,
            order_ttl_seconds,
            snapshot_ttl_seconds,
        })
    }
}

#[async_trait]
impl OrderStore for RedisOrderStore {
    async fn create_order(&self, record: OrderRecord) -> Result<CreateOutcome> {
        let mut conn = self.redis.clone();
        let key = order_key(record.attempt_id);
        let value = serde_json::to_string(&record)?;

        // SET NX keeps the first write for an attempt and rejects replays.
        let inserted: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&value)
            .arg("NX")
            .arg("EX")
            .arg(self.order_ttl_seconds)
            .query_async(&mut conn)
            .await?;
        if inserted.is_some() {
            return Ok(CreateOutcome::Created);
        }

        match conn.get::<_, Option<String>>(&key).await? {
            Some(json) => {
                let existing: OrderRecord = serde_json::from_str(&json)?;
                Ok(CreateOutcome::Duplicate(existing.order_id))
            }
            // The earlier write expired between the two commands; claim the key now.
            None => {
                conn.set_ex::<_, _, ()>(&key, value, self.order_ttl_seconds)
                    .await?;
                Ok(CreateOutcome::Created)
            }
        }
    }

    async fn get_order(&self, attempt_id: Uuid) -> Result<Option<OrderRecord>> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(order_key(attempt_id)).await?;

        match value {
            Some(json) => {
                let record = serde_json::from_str(&json)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn mark_order_paid(&self, attempt_id: Uuid, reference: &str) -> Result<bool> {
        let mut conn = self.redis.clone();
        let key = order_key(attempt_id);
        let value: Option<String> = conn.get(&key).await?;
        let Some(json) = value else {
            return Ok(false);
        };

        let mut record: OrderRecord = serde_json::from_str(&json)?;
        record.status = OrderStatus::Paid;
        record.payment_reference = Some(reference.to_string());
        let updated = serde_json::to_string(&record)?;
        conn.set_ex::<_, _, ()>(&key, updated, self.order_ttl_seconds)
            .await?;
        Ok(true)
    }

    async fn put_snapshot(&self, reference: &str, snapshot: &CartSnapshot) -> Result<()> {
        let mut conn = self.redis.clone();
        let value = serde_json::to_string(snapshot)?;
        conn.set_ex::<_, _, ()>(snapshot_key(reference), value, self.snapshot_ttl_seconds)
            .await?;
        Ok(())
    }

    async fn get_snapshot(&self, reference: &str) -> Result<Option<CartSnapshot>> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(snapshot_key(reference)).await?;

        match value {
            Some(json) => {
                let snapshot = serde_json::from_str(&json)?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    async fn record_payment(&self, record: PaymentRecord) -> Result<bool> {
        let mut conn = self.redis.clone();
        let key = payment_key(&record.reference);
        let value = serde_json::to_string(&record)?;

        let inserted: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&value)
            .arg("NX")
            .arg("EX")
            .arg(self.order_ttl_seconds)
            .query_async(&mut conn)
            .await?;
        Ok(inserted.is_some())
    }
}

/// In-process store with the same upsert semantics, for tests and single-node runs.
#[derive(Default)]
pub struct MemoryOrderStore {
    orders: DashMap<Uuid, OrderRecord>,
    snapshots: DashMap<String, CartSnapshot>,
    payments: DashMap<String, PaymentRecord>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn create_order(&self, record: OrderRecord) -> Result<CreateOutcome> {
        match self.orders.entry(record.attempt_id) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                Ok(CreateOutcome::Duplicate(existing.get().order_id.clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(CreateOutcome::Created)
            }
        }
    }

    async fn get_order(&self, attempt_id: Uuid) -> Result<Option<OrderRecord>> {
        Ok(self.orders.get(&attempt_id).map(|entry| entry.clone()))
    }

    async fn mark_order_paid(&self, attempt_id: Uuid, reference: &str) -> Result<bool> {
        match self.orders.get_mut(&attempt_id) {
            Some(mut entry) => {
                entry.status = OrderStatus::Paid;
                entry.payment_reference = Some(reference.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn put_snapshot(&self, reference: &str, snapshot: &CartSnapshot) -> Result<()> {
        self.snapshots.insert(reference.to_string(), snapshot.clone());
        Ok(())
    }

    async fn get_snapshot(&self, reference: &str) -> Result<Option<CartSnapshot>> {
        Ok(self.snapshots.get(reference).map(|entry| entry.clone()))
    }

    async fn record_payment(&self, record: PaymentRecord) -> Result<bool> {
        match self.payments.entry(record.reference.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(true)
            }
        }
    }
}

fn order_key(attempt_id: Uuid) -> String {
    format!("order:attempt:{}", attempt_id)
}

fn snapshot_key(reference: &str) -> String {
    format!("snapshot:{}", reference)
}

fn payment_key(reference: &str) -> String {
    format!("payment:{}", reference)
}

pub fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}
