//! Core library for the `azrig` Azure infrastructure orchestrator.
//!
//! An orchestrator binds an ordered list of resource managers to one
//! declarative object (a machine or a cluster) and drives them through
//! reconcile, pause and delete passes. Managers run strictly in sequence;
//! delete walks the list backwards and the first failure aborts the pass
//! with an error naming the operation, the owner kind and the manager.

pub mod assembly;
pub mod cloud;
pub mod config;
pub mod context;
pub mod logging;
pub mod orchestrator;
pub mod scope;
pub mod service;
pub mod services;
pub mod skus;
pub mod test_support;

pub use assembly::{AssemblyError, new_azure_cluster_service, new_azure_machine_service};
pub use cloud::{CloudClient, CloudError, InMemoryCloud, ReconcilePolicy, ResourceSpec};
pub use config::{ConfigError, ProviderConfig};
pub use context::{Context, ContextError};
pub use orchestrator::{
    AzureClusterService, AzureMachineService, OrchestrationError, Operation, ServiceOrchestrator,
};
pub use scope::{ClusterScope, Environment, MachineScope, Scope};
pub use service::{Pauser, ServiceError, ServiceFuture, ServiceReconciler};
pub use services::{AsyncService, ManagedService, SharedService};
pub use skus::{ResourceSku, ResourceSkuKind, SkuCache, SkuError};
