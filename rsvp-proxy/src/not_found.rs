// Short-lived memory of ids the store reported missing, so a page that keeps
// reloading a dead link does not hit the spreadsheet every time.
use crate::metrics_defs::{NOT_FOUND_CACHE_HIT, NOT_FOUND_CACHE_MISS};
use moka::sync::Cache;
use shared::counter;
use std::time::Duration;

const SIZE: u64 = 1000;
const TTL_SECS: u64 = 5;

/// Maps a report id to the error message the store answered with.
pub struct NotFoundCache {
    cache: Cache<String, String>,
}

impl NotFoundCache {
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(TTL_SECS))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(SIZE)
            .time_to_live(ttl)
            .build();

        NotFoundCache { cache }
    }

    pub fn insert(&self, id: &str, message: &str) {
        self.cache.insert(id.to_string(), message.to_string());
    }

    /// A write may create the id, so it is forgotten.
    pub fn invalidate(&self, id: &str) {
        self.cache.invalidate(id);
    }

    pub fn get(&self, id: &str) -> Option<String> {
        let message = self.cache.get(id);
        let metric_def = if message.is_some() {
            NOT_FOUND_CACHE_HIT
        } else {
            NOT_FOUND_CACHE_MISS
        };
        counter!(metric_def).increment(1);
        message
    }
}

impl Default for NotFoundCache {
    fn default() -> Self {
        Self::new()
    }
}
