use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::clock::{Clock, SystemClock};
use crate::registry::{CacheError, EdgeCache};

#[derive(Clone, Debug)]
struct CacheEntry {
    value: String,
    expires_at: Option<u64>,
}

/// In-memory [`EdgeCache`]: the fast path for single-process
/// deployments and tests. Expiry happens on read; inserts are
/// last-writer-wins.
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn now_epoch_secs(&self) -> u64 {
        self.clock.now_epoch_ms() / 1_000
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EdgeCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = self.now_epoch_secs();
        let mut entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());
        let Some(entry) = entries.get(key) else {
            return Ok(None);
        };
        if let Some(expires_at) = entry.expires_at {
            if now >= expires_at {
                entries.remove(key);
                return Ok(None);
            }
        }
        Ok(Some(entry.value.clone()))
    }

    // A zero TTL stores the entry without expiry.
    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError> {
        let now = self.now_epoch_secs();
        let expires_at = (ttl_seconds > 0).then(|| now.saturating_add(ttl_seconds));
        let entry = CacheEntry {
            value: value.to_string(),
            expires_at,
        };
        self.entries
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .insert(key.to_string(), entry);
        Ok(())
    }
}
