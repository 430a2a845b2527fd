use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilitySnapshot {
    pub requests: u64,
    pub allowed: u64,
    pub blocked: u64,
    pub no_llm: u64,
    pub unknown_tenant: u64,
}

/// In-process decision counters. Atomics so the facade records through
/// a shared reference.
#[derive(Debug, Default)]
pub struct Observability {
    requests: AtomicU64,
    allowed: AtomicU64,
    blocked: AtomicU64,
    no_llm: AtomicU64,
    unknown_tenant: AtomicU64,
}

impl Observability {
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_allowed(&self) {
        self.allowed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_blocked(&self) {
        self.blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_no_llm(&self) {
        self.no_llm.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown_tenant(&self) {
        self.unknown_tenant.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ObservabilitySnapshot {
        ObservabilitySnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            allowed: self.allowed.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            no_llm: self.no_llm.load(Ordering::Relaxed),
            unknown_tenant: self.unknown_tenant.load(Ordering::Relaxed),
        }
    }
}
