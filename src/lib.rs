//! Admission control and tenant identity for a multi-tenant AI-gateway
//! front end.
//!
//! Two decisions live here. [`admission::decide`] gates every inbound
//! LLM request against source eligibility, tier policy, per-minute rate
//! limits, and a rolling daily budget; it is a pure function over an
//! injected usage snapshot and clock. [`tenant::resolve_tenant`] plus
//! [`registry::TenantRegistry`] map an inbound hostname to a tenant,
//! and [`sandbox::derive_sandbox_id`] derives that tenant's sandbox
//! identifier. [`gateway::Gateway`] composes the whole pass.

pub mod admission;
pub mod cache;
pub mod clock;
pub mod gateway;
pub mod observability;
pub mod policy;
pub mod registry;
pub mod sandbox;
pub mod tenant;
pub mod usage;

#[cfg(feature = "store-redis")]
pub mod redis_store;
#[cfg(feature = "store-sqlite")]
pub mod sqlite_store;

pub use admission::{
    Decision, DecisionKind, DecisionLog, DecisionReason, QuotaAccounting, RequestContext,
    RequestSource, TokenAccounting, decide,
};
pub use cache::MemoryCache;
pub use clock::{Clock, SystemClock};
pub use gateway::{AdmissionOutcome, Gateway};
pub use observability::{Observability, ObservabilitySnapshot};
pub use policy::{
    BudgetPolicy, CostPolicy, DEFAULT_PROVIDER, PolicyError, PolicyStore, RateLimitPolicy, Tier,
    TierPolicy,
};
pub use registry::{
    CacheError, DEFAULT_CACHE_TTL_SECS, DirectoryError, EdgeCache, StaticDomainMap,
    TENANT_DOMAIN_CACHE_PREFIX, TENANT_SLUG_CACHE_PREFIX, TenantDirectory, TenantRegistry,
};
pub use sandbox::derive_sandbox_id;
pub use tenant::{TENANT_OVERRIDE_HEADER, TenantRecord, TenantResolution, resolve_tenant};
pub use usage::{UsageLedger, UsageProvider, UsageSnapshot};

#[cfg(feature = "store-redis")]
pub use redis_store::{RedisCache, RedisCacheError};
#[cfg(feature = "store-sqlite")]
pub use sqlite_store::{SqliteDirectory, SqliteDirectoryError};
