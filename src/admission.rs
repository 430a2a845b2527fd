//! The admission decision engine.
//!
//! One pure function, [`decide`], gates every inbound LLM request. The
//! checks run in a fixed order; each is cheaper than the next, and the
//! fail-closed source checks run before any quota math. Reordering them
//! changes observable behavior under combined-violation inputs, so the
//! sequence is a contract.

use serde::{Deserialize, Serialize};

use crate::policy::{PolicyStore, Tier};
use crate::usage::UsageSnapshot;

/// Closed enumeration of calling subsystems. A source not listed here is
/// denied, never silently allowed: new caller types must be added here
/// before they can reach the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestSource {
    Web,
    Api,
    Cli,
    Webhook,
    Scheduler,
    Heartbeat,
    Digest,
}

impl RequestSource {
    pub fn parse(normalized: &str) -> Option<Self> {
        match normalized {
            "web" => Some(Self::Web),
            "api" => Some(Self::Api),
            "cli" => Some(Self::Cli),
            "webhook" => Some(Self::Webhook),
            "scheduler" => Some(Self::Scheduler),
            "heartbeat" => Some(Self::Heartbeat),
            "digest" => Some(Self::Digest),
            _ => None,
        }
    }

    /// Background callers that never need a live model call. Classified
    /// before any quota math so they are never charged phantom cost.
    pub fn is_no_llm(self) -> bool {
        matches!(self, Self::Scheduler | Self::Heartbeat | Self::Digest)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Api => "api",
            Self::Cli => "cli",
            Self::Webhook => "webhook",
            Self::Scheduler => "scheduler",
            Self::Heartbeat => "heartbeat",
            Self::Digest => "digest",
        }
    }
}

/// Per-request facts, assembled by the boundary layer. Never mutated
/// after construction; the engine normalizes `source` internally.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub request_id: String,
    pub source: String,
    pub tier: Tier,
    pub provider: Option<String>,
    pub requested_max_output_tokens: u32,
    pub estimated_input_tokens: u32,
    pub estimated_output_tokens: u32,
    pub customer_id: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Allow,
    Block,
    NoLlm,
}

/// Stable reason codes. The serialized snake_case strings are the wire
/// contract downstream dashboards and alerting key on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Allowed,
    MissingSource,
    UnknownSource,
    NoLlmSource,
    UnsupportedProvider,
    UnknownTier,
    InvalidOutputTokens,
    InputTokensExceeded,
    RateLimitRpmExceeded,
    RateLimitTpmExceeded,
    BudgetExceeded,
}

impl DecisionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::MissingSource => "missing_source",
            Self::UnknownSource => "unknown_source",
            Self::NoLlmSource => "no_llm_source",
            Self::UnsupportedProvider => "unsupported_provider",
            Self::UnknownTier => "unknown_tier",
            Self::InvalidOutputTokens => "invalid_output_tokens",
            Self::InputTokensExceeded => "input_tokens_exceeded",
            Self::RateLimitRpmExceeded => "rate_limit_rpm_exceeded",
            Self::RateLimitTpmExceeded => "rate_limit_tpm_exceeded",
            Self::BudgetExceeded => "budget_exceeded",
        }
    }
}

/// Requested vs. capped vs. estimated token counts. The capped fields
/// are populated once a tier policy has been resolved; the caller must
/// honor the capped values downstream, not the raw request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenAccounting {
    pub requested_max_output: u32,
    pub estimated_input: u32,
    pub estimated_output: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capped_max_output: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capped_estimated_output: Option<u32>,
}

/// Limits, used amounts, remaining headroom, and the projected
/// post-request values. Present even on block, so a refused request
/// records what it would have cost against which limit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuotaAccounting {
    pub rpm_limit: u32,
    pub rpm_used: u64,
    pub rpm_remaining: u64,
    pub rpm_projected: u64,
    pub tpm_limit: u32,
    pub tpm_used: u64,
    pub tpm_remaining: u64,
    pub tpm_projected: u64,
    pub budget_usd_micros: u64,
    pub spent_usd_micros: u64,
    pub remaining_usd_micros: u64,
    pub projected_usd_micros: u64,
}

/// One decision, fully accounted. Append-only: consumed by telemetry,
/// never read back by the engine. Field names and presence rules
/// (`provider`/`model` only on allow, `quota` only once a tier policy
/// was resolved) are a wire contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DecisionLog {
    pub ts_ms: u64,
    pub request_id: String,
    /// Normalized (trimmed, lowercased) source string.
    pub source: String,
    pub tier: Tier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    pub decision: DecisionKind,
    pub reason: DecisionReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub tokens: TokenAccounting,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<QuotaAccounting>,
}

impl DecisionLog {
    /// Emits the record to the observability pipeline under a stable
    /// target. The engine itself never emits; the admitting caller does.
    pub fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(record) => {
                tracing::info!(target: "gatehouse::decision", %record, "admission decision");
            }
            Err(err) => {
                tracing::warn!(
                    target: "gatehouse::decision",
                    error = %err,
                    request_id = %self.request_id,
                    "failed to serialize decision log"
                );
            }
        }
    }
}

/// The engine's output. Every variant carries a fully populated log;
/// the three-way union is the error-handling mechanism, with no
/// exceptions and no retry concept inside the engine.
#[derive(Clone, Debug)]
pub enum Decision {
    Allow {
        provider: String,
        model: String,
        max_output_tokens: u32,
        log: DecisionLog,
    },
    Block {
        reason: DecisionReason,
        log: DecisionLog,
    },
    NoLlm {
        reason: DecisionReason,
        log: DecisionLog,
    },
}

impl Decision {
    pub fn log(&self) -> &DecisionLog {
        match self {
            Decision::Allow { log, .. } | Decision::Block { log, .. } | Decision::NoLlm { log, .. } => {
                log
            }
        }
    }

    pub fn kind(&self) -> DecisionKind {
        match self {
            Decision::Allow { .. } => DecisionKind::Allow,
            Decision::Block { .. } => DecisionKind::Block,
            Decision::NoLlm { .. } => DecisionKind::NoLlm,
        }
    }

    pub fn reason(&self) -> DecisionReason {
        self.log().reason
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }
}

/// Gates one request. Pure: no I/O, no clock reads (`now_ms` is
/// injected), constant-time in configuration size. The snapshot reflects
/// state before this request; incrementing counters after an allow is
/// the caller's responsibility.
pub fn decide(
    request: &RequestContext,
    usage: &UsageSnapshot,
    policies: &PolicyStore,
    now_ms: u64,
) -> Decision {
    let source = request.source.trim().to_ascii_lowercase();

    let tokens = TokenAccounting {
        requested_max_output: request.requested_max_output_tokens,
        estimated_input: request.estimated_input_tokens,
        estimated_output: request.estimated_output_tokens,
        capped_max_output: None,
        capped_estimated_output: None,
    };

    // Uniform log shape regardless of outcome; quota and capped token
    // fields fill in once a tier policy has been resolved.
    let pre_policy = |decision: DecisionKind, reason: DecisionReason| DecisionLog {
        ts_ms: now_ms,
        request_id: request.request_id.clone(),
        source: source.clone(),
        tier: request.tier,
        customer_id: request.customer_id.clone(),
        decision,
        reason,
        provider: None,
        model: None,
        tokens: tokens.clone(),
        quota: None,
    };

    if source.is_empty() {
        let reason = DecisionReason::MissingSource;
        return Decision::Block {
            reason,
            log: pre_policy(DecisionKind::Block, reason),
        };
    }

    let Some(parsed_source) = RequestSource::parse(&source) else {
        let reason = DecisionReason::UnknownSource;
        return Decision::Block {
            reason,
            log: pre_policy(DecisionKind::Block, reason),
        };
    };

    // Routing, not quota: checked before any budget math.
    if parsed_source.is_no_llm() {
        let reason = DecisionReason::NoLlmSource;
        return Decision::NoLlm {
            reason,
            log: pre_policy(DecisionKind::NoLlm, reason),
        };
    }

    if let Some(provider) = request.provider.as_deref() {
        if provider.trim() != policies.supported_provider() {
            let reason = DecisionReason::UnsupportedProvider;
            return Decision::Block {
                reason,
                log: pre_policy(DecisionKind::Block, reason),
            };
        }
    }

    let Some(policy) = policies.tier_policy(request.tier) else {
        let reason = DecisionReason::UnknownTier;
        return Decision::Block {
            reason,
            log: pre_policy(DecisionKind::Block, reason),
        };
    };

    // Capped values, not the raw request, feed every check below and are
    // what the caller must honor downstream.
    let capped_max_output = request
        .requested_max_output_tokens
        .min(policy.max_output_tokens);
    let capped_estimated_output = request.estimated_output_tokens.min(capped_max_output);

    let projected_requests = usage.minute_requests_used.saturating_add(1);
    let projected_minute_tokens = usage
        .minute_tokens_used
        .saturating_add(u64::from(request.estimated_input_tokens))
        .saturating_add(u64::from(capped_estimated_output));
    let request_cost = policy
        .cost
        .request_cost_usd_micros(request.estimated_input_tokens, capped_estimated_output);
    let projected_spend = usage
        .daily_cost_usd_micros_used
        .saturating_add(request_cost);

    let tokens = TokenAccounting {
        capped_max_output: Some(capped_max_output),
        capped_estimated_output: Some(capped_estimated_output),
        ..tokens.clone()
    };
    let quota = QuotaAccounting {
        rpm_limit: policy.rate_limits.requests_per_minute,
        rpm_used: usage.minute_requests_used,
        rpm_remaining: u64::from(policy.rate_limits.requests_per_minute)
            .saturating_sub(usage.minute_requests_used),
        rpm_projected: projected_requests,
        tpm_limit: policy.rate_limits.tokens_per_minute,
        tpm_used: usage.minute_tokens_used,
        tpm_remaining: u64::from(policy.rate_limits.tokens_per_minute)
            .saturating_sub(usage.minute_tokens_used),
        tpm_projected: projected_minute_tokens,
        budget_usd_micros: policy.budget.daily_usd_micros,
        spent_usd_micros: usage.daily_cost_usd_micros_used,
        remaining_usd_micros: policy
            .budget
            .daily_usd_micros
            .saturating_sub(usage.daily_cost_usd_micros_used),
        projected_usd_micros: projected_spend,
    };

    let with_quota = |decision: DecisionKind,
                      reason: DecisionReason,
                      provider: Option<String>,
                      model: Option<String>| DecisionLog {
        ts_ms: now_ms,
        request_id: request.request_id.clone(),
        source: source.clone(),
        tier: request.tier,
        customer_id: request.customer_id.clone(),
        decision,
        reason,
        provider,
        model,
        tokens: tokens.clone(),
        quota: Some(quota.clone()),
    };

    if request.requested_max_output_tokens == 0 {
        let reason = DecisionReason::InvalidOutputTokens;
        return Decision::Block {
            reason,
            log: with_quota(DecisionKind::Block, reason, None, None),
        };
    }

    if request.estimated_input_tokens > policy.max_input_tokens {
        let reason = DecisionReason::InputTokensExceeded;
        return Decision::Block {
            reason,
            log: with_quota(DecisionKind::Block, reason, None, None),
        };
    }

    // Request rate before token rate: cheaper, and the binding
    // constraint under burst load.
    if projected_requests > u64::from(policy.rate_limits.requests_per_minute) {
        let reason = DecisionReason::RateLimitRpmExceeded;
        return Decision::Block {
            reason,
            log: with_quota(DecisionKind::Block, reason, None, None),
        };
    }

    if projected_minute_tokens > u64::from(policy.rate_limits.tokens_per_minute) {
        let reason = DecisionReason::RateLimitTpmExceeded;
        return Decision::Block {
            reason,
            log: with_quota(DecisionKind::Block, reason, None, None),
        };
    }

    // Projected post-request spend, strict `>`: the last affordable
    // request is still allowed, the next one is not.
    if projected_spend > policy.budget.daily_usd_micros {
        let reason = DecisionReason::BudgetExceeded;
        return Decision::Block {
            reason,
            log: with_quota(DecisionKind::Block, reason, None, None),
        };
    }

    let provider = policies.supported_provider().to_string();
    let model = policy.model.clone();
    let log = with_quota(
        DecisionKind::Allow,
        DecisionReason::Allowed,
        Some(provider.clone()),
        Some(model.clone()),
    );
    Decision::Allow {
        provider,
        model,
        max_output_tokens: capped_max_output,
        log,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{BudgetPolicy, CostPolicy, RateLimitPolicy, TierPolicy};

    fn store() -> PolicyStore {
        PolicyStore::new("anthropic").with_tier(
            Tier::Free,
            TierPolicy {
                model: "claude-3-5-haiku-latest".to_string(),
                max_output_tokens: 1_000,
                max_input_tokens: 8_000,
                rate_limits: RateLimitPolicy {
                    requests_per_minute: 5,
                    tokens_per_minute: 10_000,
                },
                budget: BudgetPolicy {
                    daily_usd_micros: 1_000_000,
                },
                cost: CostPolicy {
                    input_usd_micros_per_token: 10,
                    output_usd_micros_per_token: 100,
                },
            },
        )
    }

    fn request() -> RequestContext {
        RequestContext {
            request_id: "req-1".to_string(),
            source: "web".to_string(),
            tier: Tier::Free,
            provider: None,
            requested_max_output_tokens: 500,
            estimated_input_tokens: 100,
            estimated_output_tokens: 200,
            customer_id: None,
        }
    }

    fn idle() -> UsageSnapshot {
        UsageSnapshot::default()
    }

    #[test]
    fn empty_source_blocks_regardless_of_other_fields() {
        let mut req = request();
        req.source = "   ".to_string();
        req.provider = Some("someone-else".to_string());
        req.requested_max_output_tokens = 0;

        let decision = decide(&req, &idle(), &store(), 1);
        assert_eq!(decision.reason(), DecisionReason::MissingSource);
        assert_eq!(decision.kind(), DecisionKind::Block);
        assert!(decision.log().quota.is_none());
    }

    #[test]
    fn unknown_source_blocks() {
        let mut req = request();
        req.source = "mystery-caller".to_string();

        let decision = decide(&req, &idle(), &store(), 1);
        assert_eq!(decision.reason(), DecisionReason::UnknownSource);
    }

    #[test]
    fn source_is_normalized_before_classification() {
        let mut req = request();
        req.source = "  Web ".to_string();

        let decision = decide(&req, &idle(), &store(), 1);
        assert!(decision.is_allow());
        assert_eq!(decision.log().source, "web");
    }

    #[test]
    fn no_llm_source_wins_over_every_later_check() {
        let mut req = request();
        req.source = "heartbeat".to_string();
        // Would fail the provider, output-token, and budget checks if
        // classification did not short-circuit first.
        req.provider = Some("someone-else".to_string());
        req.requested_max_output_tokens = 0;
        let exhausted = UsageSnapshot {
            minute_requests_used: 1_000,
            minute_tokens_used: 1_000_000,
            daily_cost_usd_micros_used: u64::MAX,
        };

        let decision = decide(&req, &exhausted, &store(), 1);
        assert_eq!(decision.kind(), DecisionKind::NoLlm);
        assert_eq!(decision.reason(), DecisionReason::NoLlmSource);
    }

    #[test]
    fn unsupported_provider_blocks() {
        let mut req = request();
        req.provider = Some("other-llm-vendor".to_string());

        let decision = decide(&req, &idle(), &store(), 1);
        assert_eq!(decision.reason(), DecisionReason::UnsupportedProvider);
    }

    #[test]
    fn absent_provider_is_filled_in_on_allow() {
        let decision = decide(&request(), &idle(), &store(), 1);
        match decision {
            Decision::Allow {
                provider, model, ..
            } => {
                assert_eq!(provider, "anthropic");
                assert_eq!(model, "claude-3-5-haiku-latest");
            }
            other => panic!("expected allow, got {other:?}"),
        }
    }

    #[test]
    fn missing_tier_policy_blocks() {
        let mut req = request();
        req.tier = Tier::Enterprise;

        let decision = decide(&req, &idle(), &store(), 1);
        assert_eq!(decision.reason(), DecisionReason::UnknownTier);
    }

    #[test]
    fn zero_requested_output_tokens_blocks() {
        let mut req = request();
        req.requested_max_output_tokens = 0;

        let decision = decide(&req, &idle(), &store(), 1);
        assert_eq!(decision.reason(), DecisionReason::InvalidOutputTokens);
        // Policy was resolved, so the refused log still carries quota.
        assert!(decision.log().quota.is_some());
    }

    #[test]
    fn oversized_input_blocks() {
        let mut req = request();
        req.estimated_input_tokens = 8_001;

        let decision = decide(&req, &idle(), &store(), 1);
        assert_eq!(decision.reason(), DecisionReason::InputTokensExceeded);
    }

    #[test]
    fn output_tokens_are_capped_to_policy() {
        let mut req = request();
        req.requested_max_output_tokens = 4_000;

        let decision = decide(&req, &idle(), &store(), 1);
        match &decision {
            Decision::Allow {
                max_output_tokens, ..
            } => assert_eq!(*max_output_tokens, 1_000),
            other => panic!("expected allow, got {other:?}"),
        }
        let tokens = &decision.log().tokens;
        assert_eq!(tokens.capped_max_output, Some(1_000));
        assert_eq!(tokens.capped_estimated_output, Some(200));
    }

    #[test]
    fn estimated_output_is_capped_by_capped_max() {
        let mut req = request();
        req.requested_max_output_tokens = 100;
        req.estimated_output_tokens = 5_000;

        let decision = decide(&req, &idle(), &store(), 1);
        assert_eq!(decision.log().tokens.capped_estimated_output, Some(100));
    }

    #[test]
    fn rpm_exhaustion_blocks_regardless_of_token_and_budget_headroom() {
        let usage = UsageSnapshot {
            minute_requests_used: 5,
            minute_tokens_used: 0,
            daily_cost_usd_micros_used: 0,
        };

        let decision = decide(&request(), &usage, &store(), 1);
        assert_eq!(decision.reason(), DecisionReason::RateLimitRpmExceeded);
    }

    #[test]
    fn rpm_check_runs_before_tpm_and_budget_when_all_would_fail() {
        let usage = UsageSnapshot {
            minute_requests_used: 5,
            minute_tokens_used: 10_000,
            daily_cost_usd_micros_used: u64::MAX,
        };

        let decision = decide(&request(), &usage, &store(), 1);
        assert_eq!(decision.reason(), DecisionReason::RateLimitRpmExceeded);
    }

    #[test]
    fn tpm_projection_counts_input_plus_capped_output() {
        // 9_800 used + 100 input + 200 estimated output pushes past 10_000.
        let usage = UsageSnapshot {
            minute_tokens_used: 9_800,
            ..UsageSnapshot::default()
        };

        let decision = decide(&request(), &usage, &store(), 1);
        assert_eq!(decision.reason(), DecisionReason::RateLimitTpmExceeded);

        // One fewer used token and the projection fits exactly.
        let usage = UsageSnapshot {
            minute_tokens_used: 9_700,
            ..UsageSnapshot::default()
        };
        assert!(decide(&request(), &usage, &store(), 1).is_allow());
    }

    #[test]
    fn budget_boundary_is_exact() {
        // Request cost: 100 input * 10 + 200 output * 100 = 21_000 micros.
        let at_boundary = UsageSnapshot {
            daily_cost_usd_micros_used: 1_000_000 - 21_000,
            ..UsageSnapshot::default()
        };
        assert!(decide(&request(), &at_boundary, &store(), 1).is_allow());

        let one_over = UsageSnapshot {
            daily_cost_usd_micros_used: 1_000_000 - 21_000 + 1,
            ..UsageSnapshot::default()
        };
        let decision = decide(&request(), &one_over, &store(), 1);
        assert_eq!(decision.reason(), DecisionReason::BudgetExceeded);

        let log = decision.log();
        let quota = log.quota.as_ref().expect("quota on block");
        assert_eq!(quota.projected_usd_micros, 1_000_001);
        assert_eq!(quota.budget_usd_micros, 1_000_000);
    }

    #[test]
    fn increasing_request_usage_never_unblocks() {
        let mut blocked_seen = false;
        for used in 0..10 {
            let usage = UsageSnapshot {
                minute_requests_used: used,
                ..UsageSnapshot::default()
            };
            let allowed = decide(&request(), &usage, &store(), 1).is_allow();
            if blocked_seen {
                assert!(!allowed, "allow after block at used={used}");
            }
            if !allowed {
                blocked_seen = true;
            }
        }
        assert!(blocked_seen);
    }

    #[test]
    fn allow_log_carries_provider_model_and_projections() {
        let decision = decide(&request(), &idle(), &store(), 42);
        let log = decision.log();
        assert_eq!(log.ts_ms, 42);
        assert_eq!(log.decision, DecisionKind::Allow);
        assert_eq!(log.reason, DecisionReason::Allowed);
        assert_eq!(log.provider.as_deref(), Some("anthropic"));
        assert_eq!(log.model.as_deref(), Some("claude-3-5-haiku-latest"));

        let quota = log.quota.as_ref().expect("quota");
        assert_eq!(quota.rpm_projected, 1);
        assert_eq!(quota.tpm_projected, 300);
        assert_eq!(quota.projected_usd_micros, 21_000);
        assert_eq!(quota.rpm_remaining, 5);
    }

    #[test]
    fn block_log_omits_provider_and_model_on_the_wire() {
        let mut req = request();
        req.provider = Some("other".to_string());
        let decision = decide(&req, &idle(), &store(), 1);

        let json = serde_json::to_value(decision.log()).expect("json");
        assert_eq!(json["reason"], "unsupported_provider");
        assert!(json.get("provider").is_none());
        assert!(json.get("model").is_none());
    }

    #[test]
    fn reason_codes_are_stable_on_the_wire() {
        for (reason, code) in [
            (DecisionReason::Allowed, "allowed"),
            (DecisionReason::MissingSource, "missing_source"),
            (DecisionReason::UnknownSource, "unknown_source"),
            (DecisionReason::NoLlmSource, "no_llm_source"),
            (DecisionReason::UnsupportedProvider, "unsupported_provider"),
            (DecisionReason::UnknownTier, "unknown_tier"),
            (DecisionReason::InvalidOutputTokens, "invalid_output_tokens"),
            (DecisionReason::InputTokensExceeded, "input_tokens_exceeded"),
            (
                DecisionReason::RateLimitRpmExceeded,
                "rate_limit_rpm_exceeded",
            ),
            (
                DecisionReason::RateLimitTpmExceeded,
                "rate_limit_tpm_exceeded",
            ),
            (DecisionReason::BudgetExceeded, "budget_exceeded"),
        ] {
            assert_eq!(reason.as_str(), code);
            assert_eq!(
                serde_json::to_value(reason).expect("json"),
                serde_json::Value::String(code.to_string())
            );
        }
    }
}
