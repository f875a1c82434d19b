//! Capability contracts implemented by resource managers.
//!
//! Every manager implements [`ServiceReconciler`]. Managers that can suspend
//! asynchronous provisioning additionally implement [`Pauser`] and advertise
//! it through [`ServiceReconciler::pauser`], which the orchestrator probes at
//! runtime. New managers opt in without any change to the orchestrator.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::cloud::CloudError;
use crate::context::{Context, ContextError};
use crate::skus::SkuError;

/// Future returned by manager operations.
pub type ServiceFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ServiceError>> + Send + 'a>>;

/// Errors a manager may return from `reconcile`, `pause` or `delete`.
///
/// Any error aborts the remainder of the current pass.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The call observed cancellation or an expired deadline.
    #[error(transparent)]
    Context(#[from] ContextError),
    /// The provider rejected or failed a request.
    #[error(transparent)]
    Cloud(#[from] CloudError),
    /// A SKU lookup needed to derive the resource parameters failed.
    #[error(transparent)]
    Sku(#[from] SkuError),
    /// The derived resource configuration is unusable.
    #[error("invalid {resource} spec: {message}")]
    InvalidSpec {
        /// Resource category the spec belongs to.
        resource: String,
        /// Description of the problem.
        message: String,
    },
    /// Free-form failure reported by a manager.
    #[error("{0}")]
    Other(String),
}

impl ServiceError {
    /// Builds a free-form error from a message.
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Returns `true` when the error stems from cancellation or a deadline.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Context(_))
    }
}

/// Mandatory contract for a unit owning one category of cloud resource.
///
/// `reconcile` and `delete` must be idempotent: repeating a call against an
/// unchanged scope converges to the same provider state without duplicating
/// side effects. A successful return means the resource is in the desired
/// state for that operation.
pub trait ServiceReconciler: Send + Sync {
    /// Stable identifier, unique within one orchestrator.
    fn name(&self) -> &str;

    /// Creates or updates the resource to match the scope.
    fn reconcile<'a>(&'a self, ctx: &'a Context) -> ServiceFuture<'a>;

    /// Removes the resource; an already absent resource is not an error.
    fn delete<'a>(&'a self, ctx: &'a Context) -> ServiceFuture<'a>;

    /// Capability probe for [`Pauser`].
    ///
    /// Managers that can pause return `Some(self)`. The default reports no
    /// capability, which the orchestrator treats as "skip", not as failure.
    fn pauser(&self) -> Option<&dyn Pauser> {
        None
    }
}

/// Optional capability: suspend asynchronous provisioning without deleting.
pub trait Pauser: Send + Sync {
    /// Stops further provider-side reconciliation of the resource.
    fn pause<'a>(&'a self, ctx: &'a Context) -> ServiceFuture<'a>;
}
