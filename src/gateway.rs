use std::sync::Arc;

use crate::admission::{Decision, RequestContext, decide};
use crate::clock::{Clock, SystemClock};
use crate::observability::{Observability, ObservabilitySnapshot};
use crate::policy::PolicyStore;
use crate::registry::TenantRegistry;
use crate::sandbox::derive_sandbox_id;
use crate::tenant::{TenantRecord, TenantResolution, resolve_tenant};
use crate::usage::UsageProvider;

/// One admission pass, start to finish.
#[derive(Clone, Debug)]
pub enum AdmissionOutcome {
    /// Allowed; the caller may forward to the model provider inside the
    /// named sandbox.
    Admitted {
        tenant: TenantRecord,
        sandbox_id: String,
        decision: Decision,
    },
    /// Tenant resolved, request refused (block or no-LLM routing).
    Refused {
        tenant: TenantRecord,
        decision: Decision,
    },
    /// No tenant derivable for this hostname; no decision is rendered.
    UnknownTenant { resolution: TenantResolution },
}

/// Composes the resolver, the registry, the usage provider, and the
/// decision engine. Incrementing usage counters after an admit is the
/// embedding application's job, with its own atomicity discipline; the
/// facade only reads snapshots.
pub struct Gateway {
    policies: PolicyStore,
    usage: Arc<dyn UsageProvider>,
    registry: TenantRegistry,
    app_domain: String,
    dev_mode: bool,
    clock: Arc<dyn Clock>,
    observability: Observability,
}

impl Gateway {
    pub fn new(
        policies: PolicyStore,
        usage: Arc<dyn UsageProvider>,
        registry: TenantRegistry,
        app_domain: impl Into<String>,
    ) -> Self {
        Self {
            policies,
            usage,
            registry,
            app_domain: app_domain.into(),
            dev_mode: false,
            clock: Arc::new(SystemClock),
            observability: Observability::default(),
        }
    }

    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn observability(&self) -> ObservabilitySnapshot {
        self.observability.snapshot()
    }

    pub async fn admit(
        &self,
        request: RequestContext,
        hostname: &str,
        override_header: Option<&str>,
    ) -> AdmissionOutcome {
        self.observability.record_request();

        let resolution = resolve_tenant(hostname, &self.app_domain, self.dev_mode, override_header);
        let tenant = match &resolution {
            TenantResolution::Override { slug, .. } | TenantResolution::Subdomain { slug, .. } => {
                self.registry.lookup_by_slug(slug).await
            }
            TenantResolution::Custom { hostname } => {
                self.registry.lookup_by_hostname(hostname).await
            }
            TenantResolution::None { .. } => None,
        };
        let Some(tenant) = tenant else {
            self.observability.record_unknown_tenant();
            return AdmissionOutcome::UnknownTenant { resolution };
        };

        // The registry's tier is authoritative over whatever the caller
        // put in the context.
        let request = RequestContext {
            tier: tenant.tier,
            ..request
        };

        let now_ms = self.clock.now_epoch_ms();
        let usage = self.usage.snapshot(&tenant.id, tenant.tier, now_ms).await;
        let decision = decide(&request, &usage, &self.policies, now_ms);
        decision.log().emit();

        match &decision {
            Decision::Allow { .. } => {
                self.observability.record_allowed();
                let sandbox_id = derive_sandbox_id(&tenant.id);
                AdmissionOutcome::Admitted {
                    tenant,
                    sandbox_id,
                    decision,
                }
            }
            Decision::Block { .. } => {
                self.observability.record_blocked();
                AdmissionOutcome::Refused { tenant, decision }
            }
            Decision::NoLlm { .. } => {
                self.observability.record_no_llm();
                AdmissionOutcome::Refused { tenant, decision }
            }
        }
    }
}
