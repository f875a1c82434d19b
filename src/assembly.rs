//! Builds orchestrators with their managers in dependency order.
//!
//! Each resource category becomes one manager. Categories with nothing to
//! manage for the given scope are left out, so the registered list is always
//! the minimal ordered set for that object.

use thiserror::Error;

use crate::cloud::{CloudClient, ResourceSpec};
use crate::orchestrator::{AzureClusterService, AzureMachineService};
use crate::scope::{ClusterScope, MachineScope, Scope};
use crate::service::{ServiceError, ServiceReconciler};
use crate::services::{AsyncService, ManagedService, SharedService, compute, network};
use crate::skus::SkuCache;

/// Manager of the machine's public IP.
pub const PUBLIC_IPS: &str = "publicips";
/// Manager of the machine's network interfaces.
pub const NETWORK_INTERFACES: &str = "networkinterfaces";
/// Manager of the machine's availability set.
pub const AVAILABILITY_SETS: &str = "availabilitysets";
/// Manager of the machine's managed disks.
pub const DISKS: &str = "disks";
/// Manager of the virtual machine.
pub const VIRTUAL_MACHINE: &str = "virtualmachine";
/// Manager of the machine's role assignments.
pub const ROLE_ASSIGNMENTS: &str = "roleassignments";
/// Manager of the machine's VM extensions.
pub const VM_EXTENSIONS: &str = "vmextensions";
/// Manager of the cluster resource group.
pub const GROUP: &str = "group";
/// Manager of the cluster virtual network.
pub const VIRTUAL_NETWORK: &str = "virtualnetwork";
/// Manager of the cluster security groups.
pub const SECURITY_GROUPS: &str = "securitygroups";
/// Manager of the cluster subnets.
pub const SUBNETS: &str = "subnets";

/// Errors raised while deriving manager specs from a scope.
#[derive(Debug, Error)]
#[error("failed to build {service} for {owner_kind} {owner}: {source}")]
pub struct AssemblyError {
    service: &'static str,
    owner_kind: &'static str,
    owner: String,
    #[source]
    source: ServiceError,
}

impl AssemblyError {
    fn new<S: Scope>(scope: &S, service: &'static str, source: ServiceError) -> Self {
        Self {
            service,
            owner_kind: S::OWNER_KIND,
            owner: scope.name().to_owned(),
            source,
        }
    }

    /// Manager whose specs could not be derived.
    #[must_use]
    pub const fn service(&self) -> &'static str {
        self.service
    }

    /// Underlying validation or lookup error.
    #[must_use]
    pub const fn cause(&self) -> &ServiceError {
        &self.source
    }
}

#[derive(Clone, Copy)]
enum Kind {
    Async,
    Managed,
    Shared { referrer_type: &'static str },
}

struct Registry<'a, S> {
    scope: &'a S,
    client: &'a dyn CloudClient,
    services: Vec<Box<dyn ServiceReconciler + 'a>>,
}

impl<'a, S: Scope> Registry<'a, S> {
    fn new(scope: &'a S, client: &'a dyn CloudClient) -> Self {
        Self {
            scope,
            client,
            services: Vec::new(),
        }
    }

    fn register(
        &mut self,
        name: &'static str,
        kind: Kind,
        derived: Result<Vec<ResourceSpec>, ServiceError>,
    ) -> Result<(), AssemblyError> {
        let specs = derived.map_err(|source| AssemblyError::new(self.scope, name, source))?;
        if specs.is_empty() {
            return Ok(());
        }
        let service: Box<dyn ServiceReconciler + 'a> = match kind {
            Kind::Async => Box::new(AsyncService::new(name, self.client, specs)),
            Kind::Managed => Box::new(ManagedService::new(name, self.client, specs)),
            Kind::Shared { referrer_type } => Box::new(SharedService::new(
                name,
                self.client,
                specs,
                self.scope.environment().subscription_id.as_str(),
                referrer_type,
            )),
        };
        self.services.push(service);
        Ok(())
    }
}

/// Orchestrator reconciling one compute node.
///
/// Managers are registered as public IPs, network interfaces, availability
/// sets, disks, virtual machine, role assignments and VM extensions.
///
/// # Errors
///
/// Returns [`AssemblyError`] when the machine cannot be expressed as valid
/// resource specs, for example when its VM size is missing from `skus`.
pub fn new_azure_machine_service<'a>(
    scope: &'a MachineScope,
    client: &'a dyn CloudClient,
    skus: &'a SkuCache,
) -> Result<AzureMachineService<'a>, AssemblyError> {
    let mut registry = Registry::new(scope, client);
    registry.register(PUBLIC_IPS, Kind::Async, Ok(network::public_ips(scope)))?;
    registry.register(
        NETWORK_INTERFACES,
        Kind::Async,
        network::network_interfaces(scope, skus),
    )?;
    registry.register(
        AVAILABILITY_SETS,
        Kind::Shared {
            referrer_type: compute::VIRTUAL_MACHINE_TYPE,
        },
        Ok(compute::availability_sets(scope, skus)),
    )?;
    registry.register(DISKS, Kind::Async, compute::disks(scope, skus))?;
    registry.register(
        VIRTUAL_MACHINE,
        Kind::Async,
        compute::virtual_machine(scope, skus).map(|vm| vec![vm]),
    )?;
    registry.register(
        ROLE_ASSIGNMENTS,
        Kind::Async,
        compute::role_assignments(scope),
    )?;
    registry.register(VM_EXTENSIONS, Kind::Async, Ok(compute::vm_extensions(scope)))?;
    Ok(AzureMachineService::new(scope, registry.services, skus))
}

/// Orchestrator reconciling the shared cluster infrastructure.
///
/// Managers are registered as resource group, virtual network, security
/// groups and subnets. The resource group and virtual network are
/// provider-managed and can be paused.
///
/// # Errors
///
/// Returns [`AssemblyError`] when the cluster cannot be expressed as valid
/// resource specs, for example when a security rule is malformed.
pub fn new_azure_cluster_service<'a>(
    scope: &'a ClusterScope,
    client: &'a dyn CloudClient,
    skus: &'a SkuCache,
) -> Result<AzureClusterService<'a>, AssemblyError> {
    let mut registry = Registry::new(scope, client);
    registry.register(
        GROUP,
        Kind::Managed,
        Ok(vec![network::resource_group(scope)]),
    )?;
    registry.register(
        VIRTUAL_NETWORK,
        Kind::Managed,
        network::virtual_network(scope).map(|vnet| vec![vnet]),
    )?;
    registry.register(
        SECURITY_GROUPS,
        Kind::Async,
        network::security_groups(scope),
    )?;
    registry.register(SUBNETS, Kind::Async, network::subnets(scope))?;
    Ok(AzureClusterService::new(scope, registry.services, skus))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::InMemoryCloud;
    use crate::scope::VmExtension;
    use crate::test_support::{allow_tcp, sample_cluster, sample_machine, sample_skus};
    use rstest::rstest;

    #[rstest]
    fn machine_services_omit_empty_categories() {
        let scope = sample_machine();
        let skus = sample_skus();
        let cloud = InMemoryCloud::new();
        let service = new_azure_machine_service(&scope, &cloud, &skus).expect("assembled");
        assert_eq!(
            service.service_names(),
            vec![PUBLIC_IPS, NETWORK_INTERFACES, AVAILABILITY_SETS, DISKS, VIRTUAL_MACHINE]
        );
    }

    #[rstest]
    fn machine_services_follow_dependency_order() {
        let mut scope = sample_machine();
        scope.spec.availability_zone = Some(String::from("2"));
        scope.spec.identity = crate::scope::VmIdentity::SystemAssigned;
        scope.spec.role_assignment = Some(crate::scope::RoleAssignment {
            definition_id: String::from("contributor"),
            scope: None,
        });
        scope.spec.vm_extensions = vec![VmExtension {
            name: String::from("bootstrap"),
            publisher: String::from("Microsoft.Azure.Extensions"),
            version: String::from("2.1"),
            settings: std::collections::BTreeMap::new(),
        }];
        let skus = sample_skus();
        let cloud = InMemoryCloud::new();
        let service = new_azure_machine_service(&scope, &cloud, &skus).expect("assembled");
        assert_eq!(
            service.service_names(),
            vec![
                PUBLIC_IPS,
                NETWORK_INTERFACES,
                DISKS,
                VIRTUAL_MACHINE,
                ROLE_ASSIGNMENTS,
                VM_EXTENSIONS
            ]
        );
    }

    #[rstest]
    fn cluster_services_follow_dependency_order() {
        let scope = sample_cluster();
        let skus = sample_skus();
        let cloud = InMemoryCloud::new();
        let service = new_azure_cluster_service(&scope, &cloud, &skus).expect("assembled");
        assert_eq!(
            service.service_names(),
            vec![GROUP, VIRTUAL_NETWORK, SECURITY_GROUPS, SUBNETS]
        );
    }

    #[rstest]
    fn unknown_vm_size_fails_assembly() {
        let mut scope = sample_machine();
        scope.spec.vm_size = String::from("Standard_Missing");
        let skus = sample_skus();
        let cloud = InMemoryCloud::new();
        let err = new_azure_machine_service(&scope, &cloud, &skus).expect_err("unknown size");
        assert_eq!(err.service(), NETWORK_INTERFACES);
        assert_eq!(
            err.to_string(),
            "failed to build networkinterfaces for AzureMachine demo-md-0-abcde: resource sku with name 'Standard_Missing' and category 'virtualMachines' not found in location 'westeurope'"
        );
    }

    #[rstest]
    fn malformed_rule_fails_cluster_assembly() {
        let mut scope = sample_cluster();
        if let Some(group) = scope.spec.subnets[1].security_group.as_mut() {
            group.security_rules.push(allow_tcp("ssh", 50, "22"));
        }
        let skus = sample_skus();
        let cloud = InMemoryCloud::new();
        let err = new_azure_cluster_service(&scope, &cloud, &skus).expect_err("bad rule");
        assert_eq!(err.service(), SECURITY_GROUPS);
        assert!(matches!(err.cause(), ServiceError::InvalidSpec { .. }));
    }
}
