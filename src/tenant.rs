use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::policy::Tier;

/// Dev-only tenant override header. Outside dev mode the header is
/// ignored outright, not merely distrusted.
pub const TENANT_OVERRIDE_HEADER: &str = "x-tenant-override";

/// Registry entity. `id` is the stable identity (assigned at
/// provisioning, never changes); `slug` is unique but renameable, so it
/// serves display and cache keys while `id` anchors sandbox derivation.
/// Serde shape doubles as the cache wire format; the full record is
/// cached so a hit never needs a secondary fetch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRecord {
    pub id: String,
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    pub tier: Tier,
}

/// Outcome of hostname classification. Request-scoped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TenantResolution {
    /// Dev-mode override header named the tenant directly.
    Override { slug: String, hostname: String },
    /// Subdomain of the app domain; the prefix is the tenant slug.
    Subdomain { slug: String, hostname: String },
    /// Custom/vanity domain; the caller must consult the registry.
    Custom { hostname: String },
    /// No tenant derivable (bare apex domain included).
    None { hostname: String },
}

impl TenantResolution {
    pub fn hostname(&self) -> &str {
        match self {
            TenantResolution::Override { hostname, .. }
            | TenantResolution::Subdomain { hostname, .. }
            | TenantResolution::Custom { hostname }
            | TenantResolution::None { hostname } => hostname,
        }
    }

    pub fn slug(&self) -> Option<&str> {
        match self {
            TenantResolution::Override { slug, .. } | TenantResolution::Subdomain { slug, .. } => {
                Some(slug)
            }
            _ => None,
        }
    }
}

fn override_slug_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[A-Za-z0-9-]+$").expect("override slug regex is valid"))
}

/// Classifies an inbound hostname. Pure and synchronous: it never
/// performs the registry lookup itself; a `Custom` result tells the
/// caller to do that.
///
/// The override header is a trust boundary: honored only in dev mode and
/// only when the value is alphanumeric-plus-hyphen, so it can never
/// carry an unsanitized value downstream.
pub fn resolve_tenant(
    hostname: &str,
    app_domain: &str,
    dev_mode: bool,
    override_header: Option<&str>,
) -> TenantResolution {
    let hostname = hostname.trim().to_ascii_lowercase();

    if dev_mode {
        if let Some(value) = override_header {
            let value = value.trim();
            if override_slug_regex().is_match(value) {
                return TenantResolution::Override {
                    slug: value.to_ascii_lowercase(),
                    hostname,
                };
            }
        }
    }

    let app_domain = app_domain.trim().to_ascii_lowercase();
    if hostname == app_domain {
        return TenantResolution::None { hostname };
    }
    if let Some(prefix) = hostname.strip_suffix(&format!(".{app_domain}")) {
        if !prefix.is_empty() {
            return TenantResolution::Subdomain {
                slug: prefix.to_string(),
                hostname,
            };
        }
        return TenantResolution::None { hostname };
    }

    TenantResolution::Custom { hostname }
}
