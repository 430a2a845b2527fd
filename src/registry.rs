//! Layered tenant lookup: edge cache, then the relational registry,
//! then an optional static domain map. Every degradation (malformed
//! cache entry, registry timeout, failed write-back) is a logged miss,
//! never an error: availability over consistency for resolution, while
//! admission itself still fails closed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::policy::Tier;
use crate::tenant::TenantRecord;

pub const TENANT_DOMAIN_CACHE_PREFIX: &str = "tenant:domain:";
pub const TENANT_SLUG_CACHE_PREFIX: &str = "tenant:slug:";
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
#[error("cache error: {0}")]
pub struct CacheError(pub String);

#[derive(Debug, Error)]
#[error("directory error: {0}")]
pub struct DirectoryError(pub String);

/// Edge key-value contract. Any conforming store works; writes are
/// last-writer-wins and idempotent.
#[async_trait]
pub trait EdgeCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError>;
}

/// The registry's two read queries. The hostname query is conceptually
/// `tenant_domains` joined to `tenants`, one indexed lookup. Writes
/// belong to the provisioning path, not here.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn tenant_by_hostname(
        &self,
        hostname: &str,
    ) -> Result<Option<TenantRecord>, DirectoryError>;
    async fn tenant_by_slug(&self, slug: &str) -> Result<Option<TenantRecord>, DirectoryError>;
}

/// Hostname-to-slug map for bootstrap/manual domain wiring before a
/// registry row exists.
#[derive(Clone, Debug, Default)]
pub struct StaticDomainMap {
    entries: HashMap<String, String>,
}

impl StaticDomainMap {
    /// Parses a `{"hostname": "slug"}` JSON object. Malformed input is
    /// logged and treated identically to "not configured".
    pub fn from_json_str(raw: &str) -> Self {
        match serde_json::from_str::<HashMap<String, String>>(raw) {
            Ok(entries) => Self {
                entries: entries
                    .into_iter()
                    .map(|(hostname, slug)| (hostname.to_ascii_lowercase(), slug))
                    .collect(),
            },
            Err(err) => {
                tracing::warn!(error = %err, "malformed static domain map, ignoring");
                Self::default()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn slug_for(&self, hostname: &str) -> Option<&str> {
        self.entries.get(hostname).map(String::as_str)
    }
}

/// Cache-aside lookup over an edge cache, a tenant directory, and an
/// optional static map.
pub struct TenantRegistry {
    cache: Arc<dyn EdgeCache>,
    directory: Arc<dyn TenantDirectory>,
    static_map: StaticDomainMap,
    ttl_seconds: u64,
    lookup_timeout: Duration,
}

impl TenantRegistry {
    pub fn new(cache: Arc<dyn EdgeCache>, directory: Arc<dyn TenantDirectory>) -> Self {
        Self {
            cache,
            directory,
            static_map: StaticDomainMap::default(),
            ttl_seconds: DEFAULT_CACHE_TTL_SECS,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    pub fn with_static_map(mut self, static_map: StaticDomainMap) -> Self {
        self.static_map = static_map;
        self
    }

    pub fn with_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    pub fn with_lookup_timeout(mut self, lookup_timeout: Duration) -> Self {
        self.lookup_timeout = lookup_timeout;
        self
    }

    /// Resolves a custom/vanity hostname to a tenant. A cache hit never
    /// falls through to the directory; a malformed entry counts as a
    /// miss.
    pub async fn lookup_by_hostname(&self, hostname: &str) -> Option<TenantRecord> {
        let hostname = hostname.trim().to_ascii_lowercase();
        let key = format!("{TENANT_DOMAIN_CACHE_PREFIX}{hostname}");

        if let Some(record) = self.cached(&key).await {
            return Some(record);
        }

        if let Some(record) = self
            .directory_call(self.directory.tenant_by_hostname(&hostname))
            .await
        {
            self.write_back(&key, &record).await;
            return Some(record);
        }

        let slug = self.static_map.slug_for(&hostname)?;
        // Bootstrap record: no registry row yet, so the slug stands in
        // for the id until provisioning catches up.
        let record = TenantRecord {
            id: slug.to_string(),
            slug: slug.to_string(),
            platform: None,
            tier: Tier::Free,
        };
        self.write_back(&key, &record).await;
        Some(record)
    }

    /// Resolves a slug (from subdomain or override resolution) to its
    /// full tenant record, same cache-aside flow under a separate key
    /// prefix. The static map is hostname-keyed and does not apply.
    pub async fn lookup_by_slug(&self, slug: &str) -> Option<TenantRecord> {
        let slug = slug.trim().to_ascii_lowercase();
        let key = format!("{TENANT_SLUG_CACHE_PREFIX}{slug}");

        if let Some(record) = self.cached(&key).await {
            return Some(record);
        }

        let record = self
            .directory_call(self.directory.tenant_by_slug(&slug))
            .await?;
        self.write_back(&key, &record).await;
        Some(record)
    }

    async fn cached(&self, key: &str) -> Option<TenantRecord> {
        let raw = match self.cache.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(error = %err, key, "edge cache read failed, treating as miss");
                return None;
            }
        };
        match serde_json::from_str::<TenantRecord>(&raw) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::warn!(error = %err, key, "malformed cache entry, treating as miss");
                None
            }
        }
    }

    async fn directory_call<F>(&self, call: F) -> Option<TenantRecord>
    where
        F: Future<Output = Result<Option<TenantRecord>, DirectoryError>>,
    {
        match tokio::time::timeout(self.lookup_timeout, call).await {
            Ok(Ok(found)) => found,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "tenant directory lookup failed, treating as miss");
                None
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = u64::try_from(self.lookup_timeout.as_millis()).unwrap_or(u64::MAX),
                    "tenant directory lookup timed out, treating as miss"
                );
                None
            }
        }
    }

    /// Best effort: the caller already holds the authoritative answer.
    async fn write_back(&self, key: &str, record: &TenantRecord) {
        let raw = match serde_json::to_string(record) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(error = %err, key, "failed to serialize cache entry");
                return;
            }
        };
        if let Err(err) = self.cache.put(key, &raw, self.ttl_seconds).await {
            tracing::warn!(error = %err, key, "edge cache write failed");
        }
    }
}
