use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{AppError, Result};
use crate::idempotency::record::IdempotencyRecord;

/// Keyed, TTL-aware storage for idempotency records.
///
/// A missing or expired key is `Ok(None)`. `Err` is reserved for the backend
/// itself failing; the interceptor treats it as a miss.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Returns the live record for `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>>;

    /// Inserts or replaces the record for `record.key`, expiring after `ttl`.
    async fn save(&self, record: IdempotencyRecord, ttl: Duration) -> Result<()>;

    /// Removes expired records and returns how many were removed.
    async fn purge_expired(&self) -> Result<u64>;
}

#[derive(Debug, Clone)]
struct StoredEntry {
    record: IdempotencyRecord,
    expires_at: Instant,
}

impl StoredEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process store backed by a sharded concurrent map.
///
/// Expiry is checked lazily on `get`; `purge_expired` reclaims memory for keys
/// that are never read again. There is no capacity bound.
#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    entries: DashMap<String, StoredEntry>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let now = Instant::now();

        // The shard read guard must be released before remove_if below.
        let live = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.record.clone()),
            Some(_) => None,
            None => return Ok(None),
        };

        if live.is_none() {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
            tracing::debug!(key_len = key.len(), "Dropped expired idempotency record on read");
        }

        Ok(live)
    }

    async fn save(&self, record: IdempotencyRecord, ttl: Duration) -> Result<()> {
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| AppError::Store(format!("TTL of {:?} overflows the clock", ttl)))?;
        let entry = StoredEntry { expires_at, record };
        self.entries.insert(entry.record.key.clone(), entry);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }
}
