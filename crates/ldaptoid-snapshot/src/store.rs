//! Optional persistence of id assignments.
//!
//! A small key-value contract over redis: JSON records under
//! `ldaptoid:{user|group|synthetic}:<idpId>`. The store only ever grows; a
//! written pair is never changed. Every operation is bounded by a short
//! timeout and a failure degrades persistence without failing the build.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::alloc::IdAllocator;
use crate::builder::NewMapping;
use crate::error::StoreError;

/// Namespace prefix on every persisted key.
pub const KEY_PREFIX: &str = "ldaptoid:";

/// Default per-operation timeout.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(3);

/// One persisted id assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

impl From<&NewMapping> for MappingRecord {
    fn from(mapping: &NewMapping) -> Self {
        Self {
            uid: mapping.uid,
            gid: mapping.gid,
            timestamp: Utc::now(),
        }
    }
}

/// The key-value contract the scheduler persists through. Implemented by
/// redis for deployments and by [`MemoryMappingStore`] for tests.
#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn put(&self, key: &str, record: &MappingRecord) -> Result<(), StoreError>;
    async fn get(&self, key: &str) -> Result<Option<MappingRecord>, StoreError>;
    async fn list(&self) -> Result<HashMap<String, MappingRecord>, StoreError>;
    async fn ping(&self) -> bool;
}

/// Redis-backed store.
pub struct RedisMappingStore {
    manager: redis::aio::ConnectionManager,
    op_timeout: Duration,
}

impl RedisMappingStore {
    /// Connects to redis. `password` and a non-zero `database` are optional
    /// deployment details.
    pub async fn connect(
        host: &str,
        port: u16,
        password: Option<&str>,
        database: i64,
    ) -> Result<Self, StoreError> {
        let auth = password
            .map(|secret| format!(":{secret}@"))
            .unwrap_or_default();
        let url = format!("redis://{auth}{host}:{port}/{database}");
        let client =
            redis::Client::open(url).map_err(|err| StoreError::Connect(err.to_string()))?;
        let manager = tokio::time::timeout(
            DEFAULT_OP_TIMEOUT,
            redis::aio::ConnectionManager::new(client),
        )
        .await
        .map_err(|_| StoreError::Timeout)?
        .map_err(|err| StoreError::Connect(err.to_string()))?;
        info!(host, port, database, "mapping store connected");
        Ok(Self {
            manager,
            op_timeout: DEFAULT_OP_TIMEOUT,
        })
    }

    fn qualified(key: &str) -> String {
        format!("{KEY_PREFIX}{key}")
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, redis::RedisError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout)?
            .map_err(|err| StoreError::Operation(err.to_string()))
    }
}

#[async_trait]
impl MappingStore for RedisMappingStore {
    async fn put(&self, key: &str, record: &MappingRecord) -> Result<(), StoreError> {
        let payload =
            serde_json::to_string(record).map_err(|err| StoreError::Decode(err.to_string()))?;
        let mut conn = self.manager.clone();
        let qualified = Self::qualified(key);
        self.bounded(async move { conn.set::<_, _, ()>(qualified, payload).await })
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<MappingRecord>, StoreError> {
        let mut conn = self.manager.clone();
        let qualified = Self::qualified(key);
        let payload: Option<String> = self
            .bounded(async move { conn.get(qualified).await })
            .await?;
        payload
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|err| StoreError::Decode(err.to_string()))
    }

    async fn list(&self) -> Result<HashMap<String, MappingRecord>, StoreError> {
        let mut scan_conn = self.manager.clone();
        let pattern = format!("{KEY_PREFIX}*");
        let keys: Vec<String> = self
            .bounded(async move {
                let mut keys = Vec::new();
                let mut iter = scan_conn.scan_match::<_, String>(pattern).await?;
                while let Some(key) = iter.next_item().await {
                    keys.push(key);
                }
                Ok(keys)
            })
            .await?;

        let mut records = HashMap::with_capacity(keys.len());
        for qualified in keys {
            let mut conn = self.manager.clone();
            let fetch_key = qualified.clone();
            let payload: Option<String> = self
                .bounded(async move { conn.get(fetch_key).await })
                .await?;
            let Some(json) = payload else { continue };
            match serde_json::from_str(&json) {
                Ok(record) => {
                    let key = qualified.trim_start_matches(KEY_PREFIX).to_string();
                    records.insert(key, record);
                }
                Err(err) => warn!(key = %qualified, %err, "skipping undecodable mapping record"),
            }
        }
        debug!(records = records.len(), "mapping store listed");
        Ok(records)
    }

    async fn ping(&self) -> bool {
        let mut conn = self.manager.clone();
        let outcome = self
            .bounded(async move {
                redis::cmd("PING")
                    .query_async::<String>(&mut conn)
                    .await
            })
            .await;
        outcome.is_ok()
    }
}

/// In-memory store used by tests and as a stand-in when wiring components
/// together without redis.
#[derive(Debug, Default)]
pub struct MemoryMappingStore {
    records: RwLock<HashMap<String, MappingRecord>>,
}

impl MemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MappingStore for MemoryMappingStore {
    async fn put(&self, key: &str, record: &MappingRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        // Written pairs are immutable; only new keys land.
        records
            .entry(key.to_string())
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<MappingRecord>, StoreError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn list(&self) -> Result<HashMap<String, MappingRecord>, StoreError> {
        Ok(self.records.read().await.clone())
    }

    async fn ping(&self) -> bool {
        true
    }
}

/// Routes persisted records into the two allocators: `user:` keys seed the
/// UID space, `group:`/`synthetic:` keys seed the GID space.
pub fn seed_allocators(
    records: &HashMap<String, MappingRecord>,
    uid_alloc: &mut IdAllocator,
    gid_alloc: &mut IdAllocator,
) {
    let mut uid_entries = Vec::new();
    let mut gid_entries = Vec::new();
    for (key, record) in records {
        if key.starts_with("user:") {
            if let Some(uid) = record.uid {
                uid_entries.push((key.clone(), uid));
            }
        } else if key.starts_with("group:") || key.starts_with("synthetic:") {
            if let Some(gid) = record.gid {
                gid_entries.push((key.clone(), gid));
            }
        } else {
            warn!(key, "ignoring mapping record outside known namespaces");
        }
    }
    // Sort for reproducible import order; ties on id are then resolved the
    // same way on every start.
    uid_entries.sort();
    gid_entries.sort();
    uid_alloc.import(uid_entries);
    gid_alloc.import(gid_entries);
}
