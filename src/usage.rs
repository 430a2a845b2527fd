use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::clock::{day_bucket, minute_bucket};
use crate::policy::Tier;

/// Counters read immediately before a decision, reflecting state before
/// the request. The decision engine only ever reads these; the write
/// side belongs to the admitting caller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub minute_requests_used: u64,
    pub minute_tokens_used: u64,
    pub daily_cost_usd_micros_used: u64,
}

/// Source of usage snapshots, keyed by scope (tenant id). An I/O-backed
/// implementation must degrade internally; the snapshot contract has no
/// error channel.
#[async_trait]
pub trait UsageProvider: Send + Sync {
    async fn snapshot(&self, scope: &str, tier: Tier, now_ms: u64) -> UsageSnapshot;
}

#[derive(Debug, Clone)]
struct MinuteUsage {
    minute: u64,
    requests: u64,
    tokens: u64,
}

#[derive(Debug, Clone)]
struct DailySpend {
    day: u64,
    usd_micros: u64,
}

#[derive(Debug, Default)]
struct LedgerInner {
    minutes: HashMap<String, MinuteUsage>,
    days: HashMap<String, DailySpend>,
    last_gc_minute: u64,
}

/// In-memory usage counters: per-scope minute buckets and per-scope
/// daily spend. Single-process deployments use it directly; anything
/// distributed implements [`UsageProvider`] over its own counter store.
#[derive(Debug, Default)]
pub struct UsageLedger {
    inner: Mutex<LedgerInner>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter increments after an allowed request. One lock, so the
    /// request/token/spend counters move together.
    pub fn record_allow(
        &self,
        scope: &str,
        input_tokens: u32,
        output_tokens: u32,
        cost_usd_micros: u64,
        now_ms: u64,
    ) {
        let minute = minute_bucket(now_ms);
        let day = day_bucket(now_ms);
        let mut inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());

        if minute != inner.last_gc_minute {
            // Keep only the active minute bucket. Older/future buckets
            // are stale.
            inner.minutes.retain(|_, usage| usage.minute == minute);
            inner.last_gc_minute = minute;
        }

        let usage = inner
            .minutes
            .entry(scope.to_string())
            .or_insert(MinuteUsage {
                minute,
                requests: 0,
                tokens: 0,
            });
        if usage.minute != minute {
            usage.minute = minute;
            usage.requests = 0;
            usage.tokens = 0;
        }
        usage.requests = usage.requests.saturating_add(1);
        usage.tokens = usage
            .tokens
            .saturating_add(u64::from(input_tokens))
            .saturating_add(u64::from(output_tokens));

        let spend = inner
            .days
            .entry(scope.to_string())
            .or_insert(DailySpend { day, usd_micros: 0 });
        if spend.day != day {
            spend.day = day;
            spend.usd_micros = 0;
        }
        spend.usd_micros = spend.usd_micros.saturating_add(cost_usd_micros);
    }

    pub fn snapshot_at(&self, scope: &str, now_ms: u64) -> UsageSnapshot {
        let minute = minute_bucket(now_ms);
        let day = day_bucket(now_ms);
        let inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());

        let (minute_requests_used, minute_tokens_used) = match inner.minutes.get(scope) {
            Some(usage) if usage.minute == minute => (usage.requests, usage.tokens),
            _ => (0, 0),
        };
        let daily_cost_usd_micros_used = match inner.days.get(scope) {
            Some(spend) if spend.day == day => spend.usd_micros,
            _ => 0,
        };

        UsageSnapshot {
            minute_requests_used,
            minute_tokens_used,
            daily_cost_usd_micros_used,
        }
    }
}

#[async_trait]
impl UsageProvider for UsageLedger {
    async fn snapshot(&self, scope: &str, _tier: Tier, now_ms: u64) -> UsageSnapshot {
        self.snapshot_at(scope, now_ms)
    }
}
