//! Concrete resource managers and the specs they drive.
//!
//! A manager owns the ordered list of [`ResourceSpec`]s for one resource
//! category and applies them through a [`CloudClient`]. [`AsyncService`]
//! models resources created directly through the provider API and cannot be
//! paused. [`ManagedService`] models resources the provider keeps
//! reconciling on its own; pausing it suspends that reconciliation.
//! [`SharedService`] models resources several owners point at and only
//! deletes them once nothing references them.

pub mod compute;
pub mod network;

use tracing::{debug, info};

use crate::cloud::{CloudClient, ReconcilePolicy, Resource, ResourceSpec};
use crate::context::Context;
use crate::scope::Environment;
use crate::service::{Pauser, ServiceError, ServiceFuture, ServiceReconciler};

/// Manager for resources created directly through the provider API.
pub struct AsyncService<'a> {
    name: &'static str,
    client: &'a dyn CloudClient,
    specs: Vec<ResourceSpec>,
}

impl<'a> AsyncService<'a> {
    /// Creates a manager that applies `specs` in order.
    #[must_use]
    pub fn new(name: &'static str, client: &'a dyn CloudClient, specs: Vec<ResourceSpec>) -> Self {
        Self {
            name,
            client,
            specs,
        }
    }

    /// Specs owned by the manager, in apply order.
    #[must_use]
    pub fn specs(&self) -> &[ResourceSpec] {
        &self.specs
    }

    async fn apply(&self, ctx: &Context, spec: &ResourceSpec) -> Result<Resource, ServiceError> {
        if let Some(existing) = ctx.run(self.client.get(spec)).await?? {
            if existing.matches(spec) {
                debug!(service = self.name, resource = %spec, "resource up to date");
                return Ok(existing);
            }
        }
        let resource = ctx.run(self.client.create_or_update(spec)).await??;
        info!(service = self.name, resource = %spec, "resource created or updated");
        Ok(resource)
    }

    async fn reconcile_all(&self, ctx: &Context) -> Result<(), ServiceError> {
        for spec in &self.specs {
            self.apply(ctx, spec).await?;
        }
        Ok(())
    }

    async fn delete_all(&self, ctx: &Context) -> Result<(), ServiceError> {
        for spec in self.specs.iter().rev() {
            ctx.run(self.client.delete(spec)).await??;
            info!(service = self.name, resource = %spec, "resource deleted");
        }
        Ok(())
    }
}

impl ServiceReconciler for AsyncService<'_> {
    fn name(&self) -> &str {
        self.name
    }

    fn reconcile<'a>(&'a self, ctx: &'a Context) -> ServiceFuture<'a> {
        Box::pin(self.reconcile_all(ctx))
    }

    fn delete<'a>(&'a self, ctx: &'a Context) -> ServiceFuture<'a> {
        Box::pin(self.delete_all(ctx))
    }
}

/// Manager for resources the provider reconciles asynchronously.
///
/// Reconcile applies the specs and re-enables provider reconciliation on any
/// object left paused by an earlier pass.
pub struct ManagedService<'a> {
    inner: AsyncService<'a>,
}

impl<'a> ManagedService<'a> {
    /// Creates a pausable manager that applies `specs` in order.
    #[must_use]
    pub fn new(name: &'static str, client: &'a dyn CloudClient, specs: Vec<ResourceSpec>) -> Self {
        Self {
            inner: AsyncService::new(name, client, specs),
        }
    }

    /// Specs owned by the manager, in apply order.
    #[must_use]
    pub fn specs(&self) -> &[ResourceSpec] {
        self.inner.specs()
    }

    async fn reconcile_all(&self, ctx: &Context) -> Result<(), ServiceError> {
        for spec in &self.inner.specs {
            let resource = self.inner.apply(ctx, spec).await?;
            if resource.reconcile_policy == ReconcilePolicy::Skip {
                self.set_policy(ctx, spec, ReconcilePolicy::Manage).await?;
            }
        }
        Ok(())
    }

    async fn pause_all(&self, ctx: &Context) -> Result<(), ServiceError> {
        for spec in &self.inner.specs {
            match ctx.run(self.inner.client.get(spec)).await?? {
                Some(resource) if resource.reconcile_policy == ReconcilePolicy::Manage => {
                    self.set_policy(ctx, spec, ReconcilePolicy::Skip).await?;
                }
                Some(_) => debug!(service = self.inner.name, resource = %spec, "already paused"),
                None => debug!(service = self.inner.name, resource = %spec, "nothing to pause"),
            }
        }
        Ok(())
    }

    async fn set_policy(
        &self,
        ctx: &Context,
        spec: &ResourceSpec,
        policy: ReconcilePolicy,
    ) -> Result<(), ServiceError> {
        ctx.run(self.inner.client.set_reconcile_policy(spec, policy))
            .await??;
        info!(
            service = self.inner.name,
            resource = %spec,
            %policy,
            "reconcile policy updated"
        );
        Ok(())
    }
}

impl ServiceReconciler for ManagedService<'_> {
    fn name(&self) -> &str {
        self.inner.name
    }

    fn reconcile<'a>(&'a self, ctx: &'a Context) -> ServiceFuture<'a> {
        Box::pin(self.reconcile_all(ctx))
    }

    fn delete<'a>(&'a self, ctx: &'a Context) -> ServiceFuture<'a> {
        Box::pin(self.inner.delete_all(ctx))
    }

    fn pauser(&self) -> Option<&dyn Pauser> {
        Some(self)
    }
}

impl Pauser for ManagedService<'_> {
    fn pause<'a>(&'a self, ctx: &'a Context) -> ServiceFuture<'a> {
        Box::pin(self.pause_all(ctx))
    }
}

/// Manager for resources shared between several owners, such as the
/// availability set of one machine role.
///
/// Reconcile behaves like [`AsyncService`]. Delete keeps any spec still
/// referenced by an object of the referrer type in the same resource group
/// and removes it once the last referrer is gone. Not pausable.
pub struct SharedService<'a> {
    inner: AsyncService<'a>,
    subscription_id: String,
    referrer_type: &'static str,
}

impl<'a> SharedService<'a> {
    /// Creates a manager whose specs are referenced by `referrer_type`
    /// objects in `subscription_id`.
    #[must_use]
    pub fn new(
        name: &'static str,
        client: &'a dyn CloudClient,
        specs: Vec<ResourceSpec>,
        subscription_id: impl Into<String>,
        referrer_type: &'static str,
    ) -> Self {
        Self {
            inner: AsyncService::new(name, client, specs),
            subscription_id: subscription_id.into(),
            referrer_type,
        }
    }

    /// Specs owned by the manager, in apply order.
    #[must_use]
    pub fn specs(&self) -> &[ResourceSpec] {
        self.inner.specs()
    }

    async fn delete_unreferenced(&self, ctx: &Context) -> Result<(), ServiceError> {
        let client = self.inner.client;
        for spec in self.inner.specs.iter().rev() {
            let id = spec.id(&self.subscription_id);
            let referrers = ctx
                .run(client.list(self.referrer_type, &spec.resource_group))
                .await??;
            if let Some(referrer) = referrers.iter().find(|res| res.references(&id)) {
                debug!(
                    service = self.inner.name,
                    resource = %spec,
                    referrer = %referrer.spec,
                    "resource still referenced, keeping"
                );
                continue;
            }
            ctx.run(client.delete(spec)).await??;
            info!(service = self.inner.name, resource = %spec, "resource deleted");
        }
        Ok(())
    }
}

impl ServiceReconciler for SharedService<'_> {
    fn name(&self) -> &str {
        self.inner.name
    }

    fn reconcile<'a>(&'a self, ctx: &'a Context) -> ServiceFuture<'a> {
        Box::pin(self.inner.reconcile_all(ctx))
    }

    fn delete<'a>(&'a self, ctx: &'a Context) -> ServiceFuture<'a> {
        Box::pin(self.delete_unreferenced(ctx))
    }
}

/// Renders the provider identifier of a resource in the environment's
/// resource group.
#[must_use]
pub fn resource_id(env: &Environment, resource_type: &str, name: &str) -> String {
    ResourceSpec::new(
        resource_type,
        name,
        env.resource_group.as_str(),
        serde_json::Value::Null,
    )
    .id(&env.subscription_id)
}

pub(crate) fn invalid(resource: &str, message: impl Into<String>) -> ServiceError {
    ServiceError::InvalidSpec {
        resource: resource.to_owned(),
        message: message.into(),
    }
}
