//! Compute resource specs derived from a machine scope.

use serde_json::{Value, json};
use uuid::Uuid;

use super::network::{NETWORK_INTERFACE_TYPE, network_interface_name};
use super::{invalid, resource_id};
use crate::cloud::{RESOURCE_GROUP_TYPE, ResourceSpec};
use crate::scope::{MachineScope, Scope, VmIdentity};
use crate::service::ServiceError;
use crate::skus::{
    EPHEMERAL_OS_DISK, MAX_FAULT_DOMAINS, PREMIUM_IO, ResourceSku, ResourceSkuKind, SkuCache,
};

/// Resource type of availability sets.
pub const AVAILABILITY_SET_TYPE: &str = "Microsoft.Compute/availabilitySets";
/// Resource type of managed disks.
pub const DISK_TYPE: &str = "Microsoft.Compute/disks";
/// Resource type of virtual machines.
pub const VIRTUAL_MACHINE_TYPE: &str = "Microsoft.Compute/virtualMachines";
/// Resource type of VM extensions.
pub const VM_EXTENSION_TYPE: &str = "Microsoft.Compute/virtualMachines/extensions";
/// Resource type of role assignments.
pub const ROLE_ASSIGNMENT_TYPE: &str = "Microsoft.Authorization/roleAssignments";

/// SKU name of aligned availability sets.
pub const ALIGNED_AVAILABILITY_SET_SKU: &str = "Aligned";
/// Fault domain count used when the SKU catalogue does not report one.
pub const DEFAULT_FAULT_DOMAINS: u64 = 2;
/// Update domain count of every availability set.
pub const UPDATE_DOMAINS: u64 = 5;

/// Name of the machine's OS disk.
#[must_use]
pub fn os_disk_name(scope: &MachineScope) -> String {
    format!("{}_OSDisk", scope.machine_name)
}

fn is_premium(storage_account_type: &str) -> bool {
    storage_account_type.starts_with("Premium")
}

fn require_premium_io(
    sku: &ResourceSku,
    storage_account_type: &str,
    disk: &str,
) -> Result<(), ServiceError> {
    if is_premium(storage_account_type) && !sku.has_capability(PREMIUM_IO) {
        return Err(invalid(
            "disk",
            format!(
                "{disk} uses {storage_account_type} but VM size {} does not support premium storage",
                sku.name
            ),
        ));
    }
    Ok(())
}

/// Availability set shared by machines of the same role.
///
/// Zonal machines do not use one, so the list is empty when an availability
/// zone is set.
#[must_use]
pub fn availability_sets(scope: &MachineScope, skus: &SkuCache) -> Vec<ResourceSpec> {
    if scope.spec.availability_zone.is_some() {
        return Vec::new();
    }
    let fault_domains = skus
        .get(ALIGNED_AVAILABILITY_SET_SKU, ResourceSkuKind::AvailabilitySets)
        .ok()
        .and_then(|sku| sku.capability(MAX_FAULT_DOMAINS))
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(DEFAULT_FAULT_DOMAINS);
    let env = scope.environment();
    vec![
        ResourceSpec::new(
            AVAILABILITY_SET_TYPE,
            scope.availability_set_name(),
            env.resource_group.as_str(),
            json!({
                "location": env.location,
                "sku": { "name": ALIGNED_AVAILABILITY_SET_SKU },
                "platformFaultDomainCount": fault_domains,
                "platformUpdateDomainCount": UPDATE_DOMAINS,
            }),
        )
        .with_tags(scope.cluster.tags()),
    ]
}

/// Managed disks of the machine: the OS disk unless it is ephemeral, then
/// each data disk.
///
/// # Errors
///
/// Returns [`ServiceError::Sku`] when the VM size is not offered, and
/// [`ServiceError::InvalidSpec`] when a premium disk is attached to a size
/// without premium storage or two data disks share a LUN.
pub fn disks(scope: &MachineScope, skus: &SkuCache) -> Result<Vec<ResourceSpec>, ServiceError> {
    let sku = skus.get(&scope.spec.vm_size, ResourceSkuKind::VirtualMachines)?;
    let env = scope.environment();
    let zones: Vec<&str> = scope.spec.availability_zone.iter().map(String::as_str).collect();
    let disk = |name: String, size: u32, storage: &str| {
        ResourceSpec::new(
            DISK_TYPE,
            name,
            env.resource_group.as_str(),
            json!({
                "location": env.location,
                "sku": { "name": storage },
                "diskSizeGB": size,
                "zones": zones,
            }),
        )
        .with_tags(scope.tags())
    };

    let mut specs = Vec::with_capacity(scope.spec.data_disks.len() + 1);
    let os_disk = &scope.spec.os_disk;
    if !os_disk.ephemeral {
        let name = os_disk_name(scope);
        require_premium_io(sku, &os_disk.storage_account_type, &name)?;
        specs.push(disk(
            name,
            os_disk.disk_size_gb,
            &os_disk.storage_account_type,
        ));
    }
    let mut luns = std::collections::BTreeSet::new();
    for data_disk in &scope.spec.data_disks {
        let name = format!("{}_{}", scope.machine_name, data_disk.name_suffix);
        if !luns.insert(data_disk.lun) {
            return Err(invalid(
                "disk",
                format!("{name} reuses LUN {}", data_disk.lun),
            ));
        }
        require_premium_io(sku, &data_disk.storage_account_type, &name)?;
        specs.push(disk(
            name,
            data_disk.disk_size_gb,
            &data_disk.storage_account_type,
        ));
    }
    Ok(specs)
}

/// The virtual machine itself.
///
/// # Errors
///
/// Returns [`ServiceError::Sku`] when the VM size is not offered, and
/// [`ServiceError::InvalidSpec`] when an ephemeral OS disk or the
/// availability zone is not supported by the size.
pub fn virtual_machine(scope: &MachineScope, skus: &SkuCache) -> Result<ResourceSpec, ServiceError> {
    let sku = skus.get(&scope.spec.vm_size, ResourceSkuKind::VirtualMachines)?;
    let spec = &scope.spec;
    if spec.os_disk.ephemeral && !sku.has_capability(EPHEMERAL_OS_DISK) {
        return Err(invalid(
            "virtual machine",
            format!("VM size {} does not support ephemeral OS disks", sku.name),
        ));
    }
    if let Some(zone) = &spec.availability_zone {
        if !sku.supports_zone(zone) {
            return Err(invalid(
                "virtual machine",
                format!("VM size {} is not offered in zone {zone}", sku.name),
            ));
        }
    }
    let env = scope.environment();

    let os_disk = if spec.os_disk.ephemeral {
        json!({
            "createOption": "FromImage",
            "osType": spec.os_disk.os_type,
            "diffDiskSettings": { "option": "Local" },
            "caching": "ReadOnly",
        })
    } else {
        json!({
            "name": os_disk_name(scope),
            "createOption": "FromImage",
            "osType": spec.os_disk.os_type,
            "diskSizeGB": spec.os_disk.disk_size_gb,
            "managedDisk": { "storageAccountType": spec.os_disk.storage_account_type },
        })
    };
    let data_disks: Vec<Value> = spec
        .data_disks
        .iter()
        .map(|disk| {
            let name = format!("{}_{}", scope.machine_name, disk.name_suffix);
            json!({
                "name": name,
                "lun": disk.lun,
                "createOption": "Attach",
                "managedDisk": { "id": resource_id(env, DISK_TYPE, &name) },
            })
        })
        .collect();
    let placement = match &spec.availability_zone {
        Some(zone) => json!({ "zones": [zone] }),
        None => json!({
            "availabilitySet": {
                "id": resource_id(env, AVAILABILITY_SET_TYPE, &scope.availability_set_name()),
            },
        }),
    };

    Ok(ResourceSpec::new(
        VIRTUAL_MACHINE_TYPE,
        scope.machine_name.as_str(),
        env.resource_group.as_str(),
        json!({
            "location": env.location,
            "identity": identity_parameters(&spec.identity),
            "hardwareProfile": { "vmSize": spec.vm_size },
            "storageProfile": {
                "imageReference": {
                    "publisher": spec.image.publisher,
                    "offer": spec.image.offer,
                    "sku": spec.image.sku,
                    "version": spec.image.version,
                },
                "osDisk": os_disk,
                "dataDisks": data_disks,
            },
            "networkProfile": {
                "networkInterfaces": [{
                    "id": resource_id(env, NETWORK_INTERFACE_TYPE, &network_interface_name(scope)),
                    "primary": true,
                }],
            },
            "placement": placement,
        }),
    )
    .with_tags(scope.tags()))
}

fn identity_parameters(identity: &VmIdentity) -> Value {
    match identity {
        VmIdentity::None => json!({ "type": "None" }),
        VmIdentity::SystemAssigned => json!({ "type": "SystemAssigned" }),
        VmIdentity::UserAssigned(ids) => {
            let assigned: serde_json::Map<String, Value> =
                ids.iter().map(|id| (id.clone(), json!({}))).collect();
            json!({ "type": "UserAssigned", "userAssignedIdentities": assigned })
        }
    }
}

/// Role assignment for the machine's system-assigned identity.
///
/// The assignment name is a UUID v5 derived from the subscription, resource
/// group, machine and role definition, so repeated passes target the same
/// object.
///
/// # Errors
///
/// Returns [`ServiceError::InvalidSpec`] when a role is requested for a
/// machine without a system-assigned identity.
pub fn role_assignments(scope: &MachineScope) -> Result<Vec<ResourceSpec>, ServiceError> {
    let Some(assignment) = &scope.spec.role_assignment else {
        return Ok(Vec::new());
    };
    if scope.spec.identity != VmIdentity::SystemAssigned {
        return Err(invalid(
            "role assignment",
            format!(
                "machine {} needs a system-assigned identity to receive a role",
                scope.machine_name
            ),
        ));
    }
    let env = scope.environment();
    let target = assignment.scope.clone().unwrap_or_else(|| {
        ResourceSpec::new(
            RESOURCE_GROUP_TYPE,
            env.resource_group.as_str(),
            env.resource_group.as_str(),
            Value::Null,
        )
        .id(&env.subscription_id)
    });
    Ok(vec![ResourceSpec::new(
        ROLE_ASSIGNMENT_TYPE,
        role_assignment_name(scope, &assignment.definition_id).to_string(),
        env.resource_group.as_str(),
        json!({
            "roleDefinitionId": assignment.definition_id,
            "principal": resource_id(env, VIRTUAL_MACHINE_TYPE, &scope.machine_name),
            "scope": target,
        }),
    )])
}

/// Deterministic role assignment name for `definition_id` on the machine.
#[must_use]
pub fn role_assignment_name(scope: &MachineScope, definition_id: &str) -> Uuid {
    let env = scope.environment();
    let seed = format!(
        "{}/{}/{}/{definition_id}",
        env.subscription_id, env.resource_group, scope.machine_name
    );
    Uuid::new_v5(&Uuid::NAMESPACE_URL, seed.as_bytes())
}

/// Extensions installed on the virtual machine.
#[must_use]
pub fn vm_extensions(scope: &MachineScope) -> Vec<ResourceSpec> {
    let env = scope.environment();
    scope
        .spec
        .vm_extensions
        .iter()
        .map(|extension| {
            ResourceSpec::new(
                VM_EXTENSION_TYPE,
                format!("{}/{}", scope.machine_name, extension.name),
                env.resource_group.as_str(),
                json!({
                    "location": env.location,
                    "publisher": extension.publisher,
                    "typeHandlerVersion": extension.version,
                    "settings": extension.settings,
                }),
            )
            .with_tags(scope.tags())
        })
        .collect()
}
