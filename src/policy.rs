use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The one provider this deployment speaks to. A request naming any
/// other provider is blocked; a request naming none gets this one.
pub const DEFAULT_PROVIDER: &str = "anthropic";

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Pro,
    Enterprise,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Enterprise => "enterprise",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "free" => Some(Tier::Free),
            "pro" => Some(Tier::Pro),
            "enterprise" => Some(Tier::Enterprise),
            _ => None,
        }
    }
}

/// Per-subscription-tier limits. Loaded once at process start, read-only
/// at decision time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TierPolicy {
    pub model: String,
    pub max_output_tokens: u32,
    pub max_input_tokens: u32,
    pub rate_limits: RateLimitPolicy,
    pub budget: BudgetPolicy,
    pub cost: CostPolicy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub requests_per_minute: u32,
    pub tokens_per_minute: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BudgetPolicy {
    pub daily_usd_micros: u64,
}

/// Per-token rates in integer micro-dollars. Config files carry USD
/// floats; conversion happens once at load so decision-time comparisons
/// are exact.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CostPolicy {
    pub input_usd_micros_per_token: u64,
    pub output_usd_micros_per_token: u64,
}

impl CostPolicy {
    pub fn request_cost_usd_micros(&self, input_tokens: u32, output_tokens: u32) -> u64 {
        let input = u64::from(input_tokens).saturating_mul(self.input_usd_micros_per_token);
        let output = u64::from(output_tokens).saturating_mul(self.output_usd_micros_per_token);
        input.saturating_add(output)
    }
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid policy for tier {tier}: max_output_tokens must be positive")]
    ZeroMaxOutputTokens { tier: &'static str },
    #[error("invalid policy for tier {tier}: invalid usd value for {field}")]
    InvalidUsdValue {
        tier: &'static str,
        field: &'static str,
    },
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Deserialize)]
struct PolicyFileConfig {
    #[serde(default = "default_provider")]
    supported_provider: String,
    #[serde(default)]
    tiers: BTreeMap<Tier, TierPolicyConfig>,
}

fn default_provider() -> String {
    DEFAULT_PROVIDER.to_string()
}

#[derive(Debug, Deserialize)]
struct TierPolicyConfig {
    model: String,
    max_output_tokens: u32,
    max_input_tokens: u32,
    rate_limits: RateLimitConfig,
    budget: BudgetFileConfig,
    cost: CostFileConfig,
}

#[derive(Debug, Deserialize)]
struct RateLimitConfig {
    requests_per_minute: u32,
    tokens_per_minute: u32,
}

#[derive(Debug, Deserialize)]
struct BudgetFileConfig {
    daily_usd: f64,
}

#[derive(Debug, Deserialize)]
struct CostFileConfig {
    input_token_usd: f64,
    output_token_usd: f64,
}

/// Immutable per-deployment tier configuration plus the provider
/// allow-list (a single entry).
#[derive(Clone, Debug, Default)]
pub struct PolicyStore {
    supported_provider: String,
    tiers: BTreeMap<Tier, TierPolicy>,
}

impl PolicyStore {
    pub fn new(supported_provider: impl Into<String>) -> Self {
        Self {
            supported_provider: supported_provider.into(),
            tiers: BTreeMap::new(),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, PolicyError> {
        let config: PolicyFileConfig = toml::from_str(raw)?;
        let mut tiers = BTreeMap::new();
        for (tier, tier_config) in config.tiers {
            tiers.insert(tier, TierPolicy::from_config(tier, tier_config)?);
        }
        Ok(Self {
            supported_provider: config.supported_provider,
            tiers,
        })
    }

    pub fn with_tier(mut self, tier: Tier, policy: TierPolicy) -> Self {
        self.tiers.insert(tier, policy);
        self
    }

    pub fn supported_provider(&self) -> &str {
        &self.supported_provider
    }

    pub fn tier_policy(&self, tier: Tier) -> Option<&TierPolicy> {
        self.tiers.get(&tier)
    }
}

impl TierPolicy {
    fn from_config(tier: Tier, config: TierPolicyConfig) -> Result<Self, PolicyError> {
        if config.max_output_tokens == 0 {
            return Err(PolicyError::ZeroMaxOutputTokens {
                tier: tier.as_str(),
            });
        }
        Ok(Self {
            model: config.model,
            max_output_tokens: config.max_output_tokens,
            max_input_tokens: config.max_input_tokens,
            rate_limits: RateLimitPolicy {
                requests_per_minute: config.rate_limits.requests_per_minute,
                tokens_per_minute: config.rate_limits.tokens_per_minute,
            },
            budget: BudgetPolicy {
                daily_usd_micros: usd_to_micros(config.budget.daily_usd, tier, "budget.daily_usd")?,
            },
            cost: CostPolicy {
                input_usd_micros_per_token: usd_to_micros(
                    config.cost.input_token_usd,
                    tier,
                    "cost.input_token_usd",
                )?,
                output_usd_micros_per_token: usd_to_micros(
                    config.cost.output_token_usd,
                    tier,
                    "cost.output_token_usd",
                )?,
            },
        })
    }
}

fn usd_to_micros(usd: f64, tier: Tier, field: &'static str) -> Result<u64, PolicyError> {
    if !usd.is_finite() || usd < 0.0 {
        return Err(PolicyError::InvalidUsdValue {
            tier: tier.as_str(),
            field,
        });
    }
    let micros = (usd * 1_000_000.0).round();
    if micros > u64::MAX as f64 {
        return Ok(u64::MAX);
    }
    Ok(micros as u64)
}
