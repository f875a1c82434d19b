//! Sequences resource managers through reconcile, pause and delete passes.
//!
//! The orchestrator trusts the registration order absolutely: managers run
//! strictly one after another in that order for `reconcile` and `pause`, and
//! in the exact reverse order for `delete`. The first failure aborts the
//! pass. Nothing is retried and nothing is remembered between passes; the
//! caller re-invokes a pass and relies on manager idempotence to continue
//! where the previous one stopped.

use std::fmt;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::scope::{ClusterScope, MachineScope, Scope};
use crate::service::{ServiceError, ServiceReconciler};
use crate::skus::SkuCache;

/// Pass performed by the orchestrator.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Operation {
    /// Create or update every resource.
    Reconcile,
    /// Suspend asynchronous provisioning where supported.
    Pause,
    /// Remove every resource.
    Delete,
}

impl Operation {
    /// Verb used in error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reconcile => "reconcile",
            Self::Pause => "pause",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First failure of a pass, attributed to the manager that raised it.
#[derive(Debug, Error)]
#[error("failed to {operation} {owner_kind} service {service}: {source}")]
pub struct OrchestrationError {
    operation: Operation,
    owner_kind: &'static str,
    service: String,
    #[source]
    source: ServiceError,
}

impl OrchestrationError {
    /// Pass that failed.
    #[must_use]
    pub const fn operation(&self) -> Operation {
        self.operation
    }

    /// Kind of declarative object the orchestrator governs.
    #[must_use]
    pub const fn owner_kind(&self) -> &'static str {
        self.owner_kind
    }

    /// Name reported by the failing manager after it failed.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Underlying manager error.
    #[must_use]
    pub const fn cause(&self) -> &ServiceError {
        &self.source
    }

    /// Consumes the error and returns the manager error.
    #[must_use]
    pub fn into_cause(self) -> ServiceError {
        self.source
    }
}

/// Ordered set of managers bound to one scope for one pass.
///
/// Built fresh by the caller for each attempt. The scope and SKU cache are
/// borrowed and outlive the orchestrator; the managers are owned.
pub struct ServiceOrchestrator<'a, S: Scope> {
    scope: &'a S,
    services: Vec<Box<dyn ServiceReconciler + 'a>>,
    sku_cache: &'a SkuCache,
}

/// Orchestrator for a single compute node.
pub type AzureMachineService<'a> = ServiceOrchestrator<'a, MachineScope>;

/// Orchestrator for the shared cluster infrastructure.
pub type AzureClusterService<'a> = ServiceOrchestrator<'a, ClusterScope>;

impl<'a, S: Scope> ServiceOrchestrator<'a, S> {
    /// Binds `services`, in dependency order, to `scope`.
    #[must_use]
    pub fn new(
        scope: &'a S,
        services: Vec<Box<dyn ServiceReconciler + 'a>>,
        sku_cache: &'a SkuCache,
    ) -> Self {
        Self {
            scope,
            services,
            sku_cache,
        }
    }

    /// Scope the orchestrator is bound to.
    #[must_use]
    pub const fn scope(&self) -> &'a S {
        self.scope
    }

    /// SKU cache handed to the managers.
    #[must_use]
    pub const fn sku_cache(&self) -> &'a SkuCache {
        self.sku_cache
    }

    /// Manager names in registration order.
    #[must_use]
    pub fn service_names(&self) -> Vec<&str> {
        self.services.iter().map(|service| service.name()).collect()
    }

    /// Runs `reconcile` on every manager in registration order.
    ///
    /// # Errors
    ///
    /// Returns the first manager failure; later managers are not called.
    pub async fn reconcile(&self, ctx: &Context) -> Result<(), OrchestrationError> {
        for service in &self.services {
            self.trace_call(Operation::Reconcile, service.as_ref());
            if let Err(source) = service.reconcile(ctx).await {
                return Err(self.failure(Operation::Reconcile, service.as_ref(), source));
            }
        }
        self.trace_done(Operation::Reconcile);
        Ok(())
    }

    /// Runs `pause` on every manager that supports it, in registration order.
    ///
    /// Managers without the pause capability are skipped.
    ///
    /// # Errors
    ///
    /// Returns the first manager failure; later managers are not called.
    pub async fn pause(&self, ctx: &Context) -> Result<(), OrchestrationError> {
        for service in &self.services {
            let Some(pauser) = service.pauser() else {
                debug!(
                    owner_kind = S::OWNER_KIND,
                    owner = self.scope.name(),
                    service = service.name(),
                    "service cannot pause, skipping"
                );
                continue;
            };
            self.trace_call(Operation::Pause, service.as_ref());
            if let Err(source) = pauser.pause(ctx).await {
                return Err(self.failure(Operation::Pause, service.as_ref(), source));
            }
        }
        self.trace_done(Operation::Pause);
        Ok(())
    }

    /// Runs `delete` on every manager in reverse registration order.
    ///
    /// # Errors
    ///
    /// Returns the first manager failure; managers registered earlier than
    /// the failing one are not called.
    pub async fn delete(&self, ctx: &Context) -> Result<(), OrchestrationError> {
        for service in self.services.iter().rev() {
            self.trace_call(Operation::Delete, service.as_ref());
            if let Err(source) = service.delete(ctx).await {
                return Err(self.failure(Operation::Delete, service.as_ref(), source));
            }
        }
        self.trace_done(Operation::Delete);
        Ok(())
    }

    fn trace_call(&self, operation: Operation, service: &dyn ServiceReconciler) {
        debug!(
            owner_kind = S::OWNER_KIND,
            owner = self.scope.name(),
            service = service.name(),
            %operation,
            "calling service"
        );
    }

    fn trace_done(&self, operation: Operation) {
        info!(
            owner_kind = S::OWNER_KIND,
            owner = self.scope.name(),
            services = self.services.len(),
            %operation,
            "pass complete"
        );
    }

    // The name is read after the call returns so managers can report the
    // identity they ended up with.
    fn failure(
        &self,
        operation: Operation,
        service: &dyn ServiceReconciler,
        source: ServiceError,
    ) -> OrchestrationError {
        let err = OrchestrationError {
            operation,
            owner_kind: S::OWNER_KIND,
            service: service.name().to_owned(),
            source,
        };
        warn!(owner = self.scope.name(), error = %err, "pass aborted");
        err
    }
}

impl<S: Scope> fmt::Debug for ServiceOrchestrator<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceOrchestrator")
            .field("owner_kind", &S::OWNER_KIND)
            .field("owner", &self.scope.name())
            .field("services", &self.service_names())
            .finish_non_exhaustive()
    }
}
