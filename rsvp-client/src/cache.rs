//! Best-effort on-device cache of the guest's RSVP.
//!
//! Nothing here is a correctness dependency: every public operation except
//! `read` swallows storage failures, logs them and behaves as if the cache
//! were empty.

use crate::metrics_defs::{CACHE_HIT, CACHE_MISS, CACHE_WRITE_FAILED};
use crate::storage::{Storage, StorageError};
use crate::types::{CachedRsvp, RsvpRecord};
use shared::counter;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const CACHE_KEY: &str = "rsvp_cache_data";
pub const REPORT_ID_KEY: &str = "rsvp_report_id";
pub const SUBMITTED_KEY: &str = "rsvp_submitted";

pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("stored RSVP is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Clone)]
pub struct LocalCache {
    storage: Arc<dyn Storage>,
    ttl: Duration,
}

impl LocalCache {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        LocalCache {
            storage,
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn is_expired(&self, cached: &CachedRsvp, now: u64) -> bool {
        now.saturating_sub(cached.updated_at) > self.ttl.as_millis() as u64
    }

    /// Reads the stored record, separating "nothing usable" (`Ok(None)`) from
    /// a blob that exists but cannot be decoded. Expired and corrupt blobs are
    /// removed so the next read starts clean.
    pub fn read(&self) -> Result<Option<CachedRsvp>, CacheError> {
        let Some(raw) = self.storage.get(CACHE_KEY)? else {
            return Ok(None);
        };

        let cached: CachedRsvp = match serde_json::from_str(&raw) {
            Ok(cached) => cached,
            Err(e) => {
                self.remove_quietly(CACHE_KEY);
                return Err(e.into());
            }
        };

        if self.is_expired(&cached, now_millis()) {
            tracing::debug!(updated_at = cached.updated_at, "cached RSVP expired");
            self.remove_quietly(CACHE_KEY);
            return Ok(None);
        }

        Ok(Some(cached))
    }

    /// Returns the cached record if present and fresh.
    pub fn load(&self) -> Option<CachedRsvp> {
        let result = self.read().unwrap_or_else(|e| {
            tracing::warn!("failed to load cached RSVP: {e}");
            None
        });

        match result {
            Some(_) => counter!(CACHE_HIT).increment(1),
            None => counter!(CACHE_MISS).increment(1),
        }
        result
    }

    /// Overwrites the stored record, stamped with the current time.
    pub fn save(&self, record: &RsvpRecord) {
        let cached = CachedRsvp::new(record.clone(), now_millis());
        let result = serde_json::to_string(&cached)
            .map_err(CacheError::from)
            .and_then(|json| Ok(self.storage.set(CACHE_KEY, &json)?));

        if let Err(e) = result {
            counter!(CACHE_WRITE_FAILED).increment(1);
            tracing::warn!("failed to save cached RSVP: {e}");
        }
    }

    pub fn clear(&self) {
        self.remove_quietly(CACHE_KEY);
    }

    pub fn saved_report_id(&self) -> Option<String> {
        match self.storage.get(REPORT_ID_KEY) {
            Ok(id) => id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            Err(e) => {
                tracing::warn!("failed to read saved report id: {e}");
                None
            }
        }
    }

    pub fn save_report_id(&self, id: &str) {
        self.set_quietly(REPORT_ID_KEY, id);
    }

    pub fn clear_report_id(&self) {
        self.remove_quietly(REPORT_ID_KEY);
    }

    pub fn is_submitted(&self) -> bool {
        match self.storage.get(SUBMITTED_KEY) {
            Ok(flag) => flag.as_deref() == Some("true"),
            Err(e) => {
                tracing::warn!("failed to read submitted flag: {e}");
                false
            }
        }
    }

    pub fn set_submitted(&self, submitted: bool) {
        if submitted {
            self.set_quietly(SUBMITTED_KEY, "true");
        } else {
            self.remove_quietly(SUBMITTED_KEY);
        }
    }

    fn set_quietly(&self, key: &str, value: &str) {
        if let Err(e) = self.storage.set(key, value) {
            counter!(CACHE_WRITE_FAILED).increment(1);
            tracing::warn!(key, "failed to write to storage: {e}");
        }
    }

    fn remove_quietly(&self, key: &str) {
        if let Err(e) = self.storage.remove(key) {
            tracing::warn!(key, "failed to remove from storage: {e}");
        }
    }
}
