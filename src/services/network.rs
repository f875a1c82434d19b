//! Network resource specs derived from cluster and machine scopes.

use std::collections::BTreeSet;

use serde_json::{Value, json};

use super::{invalid, resource_id};
use crate::cloud::{RESOURCE_GROUP_TYPE, ResourceSpec};
use crate::scope::{
    ClusterScope, MachineScope, Scope, SecurityGroup, SecurityProtocol, SecurityRule,
    SecurityRuleAction, SecurityRuleDirection,
};
use crate::service::ServiceError;
use crate::skus::{ACCELERATED_NETWORKING, ResourceSkuKind, SkuCache};

/// Resource type of virtual networks.
pub const VIRTUAL_NETWORK_TYPE: &str = "Microsoft.Network/virtualNetworks";
/// Resource type of subnets.
pub const SUBNET_TYPE: &str = "Microsoft.Network/virtualNetworks/subnets";
/// Resource type of network security groups.
pub const SECURITY_GROUP_TYPE: &str = "Microsoft.Network/networkSecurityGroups";
/// Resource type of public IP addresses.
pub const PUBLIC_IP_TYPE: &str = "Microsoft.Network/publicIPAddresses";
/// Resource type of network interfaces.
pub const NETWORK_INTERFACE_TYPE: &str = "Microsoft.Network/networkInterfaces";

/// Lowest priority value the provider accepts for a security rule.
pub const MIN_RULE_PRIORITY: u32 = 100;
/// Highest priority value the provider accepts for a security rule.
pub const MAX_RULE_PRIORITY: u32 = 4096;

/// Resource group holding every cluster resource.
#[must_use]
pub fn resource_group(scope: &ClusterScope) -> ResourceSpec {
    let env = scope.environment();
    ResourceSpec::new(
        RESOURCE_GROUP_TYPE,
        env.resource_group.as_str(),
        env.resource_group.as_str(),
        json!({ "location": env.location }),
    )
    .with_tags(scope.tags())
}

/// Cluster virtual network.
///
/// # Errors
///
/// Returns [`ServiceError::InvalidSpec`] when the network has no address
/// space.
pub fn virtual_network(scope: &ClusterScope) -> Result<ResourceSpec, ServiceError> {
    let vnet = &scope.spec.vnet;
    if vnet.cidr_blocks.is_empty() {
        return Err(invalid(
            "virtual network",
            format!("{} has no address prefixes", vnet.name),
        ));
    }
    let env = scope.environment();
    Ok(ResourceSpec::new(
        VIRTUAL_NETWORK_TYPE,
        vnet.name.as_str(),
        env.resource_group.as_str(),
        json!({
            "location": env.location,
            "addressSpace": { "addressPrefixes": vnet.cidr_blocks },
        }),
    )
    .with_tags(scope.tags()))
}

/// One network security group per subnet that declares one.
///
/// # Errors
///
/// Returns [`ServiceError::InvalidSpec`] when a group repeats a rule name,
/// repeats a priority within one direction, or uses a priority outside
/// 100 to 4096.
pub fn security_groups(scope: &ClusterScope) -> Result<Vec<ResourceSpec>, ServiceError> {
    let env = scope.environment();
    scope
        .spec
        .subnets
        .iter()
        .filter_map(|subnet| subnet.security_group.as_ref())
        .map(|group| {
            validate_rules(group)?;
            let rules: Vec<Value> = group.security_rules.iter().map(rule_parameters).collect();
            Ok(ResourceSpec::new(
                SECURITY_GROUP_TYPE,
                group.name.as_str(),
                env.resource_group.as_str(),
                json!({ "location": env.location, "securityRules": rules }),
            )
            .with_tags(scope.tags()))
        })
        .collect()
}

fn validate_rules(group: &SecurityGroup) -> Result<(), ServiceError> {
    let mut names = BTreeSet::new();
    let mut priorities = BTreeSet::new();
    for rule in &group.security_rules {
        if !(MIN_RULE_PRIORITY..=MAX_RULE_PRIORITY).contains(&rule.priority) {
            return Err(invalid(
                "security group",
                format!(
                    "rule {} in {} has priority {} outside {MIN_RULE_PRIORITY}..={MAX_RULE_PRIORITY}",
                    rule.name, group.name, rule.priority
                ),
            ));
        }
        if !names.insert(rule.name.as_str()) {
            return Err(invalid(
                "security group",
                format!("duplicate rule name {} in {}", rule.name, group.name),
            ));
        }
        if !priorities.insert((rule.direction, rule.priority)) {
            return Err(invalid(
                "security group",
                format!(
                    "rule {} in {} reuses {} priority {}",
                    rule.name,
                    group.name,
                    direction_name(rule.direction).to_lowercase(),
                    rule.priority
                ),
            ));
        }
    }
    Ok(())
}

const fn direction_name(direction: SecurityRuleDirection) -> &'static str {
    match direction {
        SecurityRuleDirection::Inbound => "Inbound",
        SecurityRuleDirection::Outbound => "Outbound",
    }
}

fn rule_parameters(rule: &SecurityRule) -> Value {
    let protocol = match rule.protocol {
        SecurityProtocol::Tcp => "Tcp",
        SecurityProtocol::Udp => "Udp",
        SecurityProtocol::Icmp => "Icmp",
        SecurityProtocol::All => "*",
    };
    let access = match rule.action {
        SecurityRuleAction::Allow => "Allow",
        SecurityRuleAction::Deny => "Deny",
    };
    let any = |value: Option<&String>| value.map_or("*", String::as_str).to_owned();
    json!({
        "name": rule.name,
        "description": rule.description,
        "protocol": protocol,
        "direction": direction_name(rule.direction),
        "priority": rule.priority,
        "access": access,
        "sourcePortRange": any(rule.source_ports.as_ref()),
        "destinationPortRange": any(rule.destination_ports.as_ref()),
        "sourceAddressPrefix": any(rule.source.as_ref()),
        "destinationAddressPrefix": any(rule.destination.as_ref()),
    })
}

/// Subnets of the cluster network, attached to their security groups.
///
/// # Errors
///
/// Returns [`ServiceError::InvalidSpec`] when a subnet has no address space.
pub fn subnets(scope: &ClusterScope) -> Result<Vec<ResourceSpec>, ServiceError> {
    let env = scope.environment();
    let vnet = &scope.spec.vnet.name;
    scope
        .spec
        .subnets
        .iter()
        .map(|subnet| {
            if subnet.cidr_blocks.is_empty() {
                return Err(invalid(
                    "subnet",
                    format!("{} has no address prefixes", subnet.name),
                ));
            }
            let nsg = subnet
                .security_group
                .as_ref()
                .map(|group| json!({ "id": resource_id(env, SECURITY_GROUP_TYPE, &group.name) }));
            Ok(ResourceSpec::new(
                SUBNET_TYPE,
                format!("{vnet}/{}", subnet.name),
                env.resource_group.as_str(),
                json!({
                    "addressPrefixes": subnet.cidr_blocks,
                    "networkSecurityGroup": nsg,
                }),
            ))
        })
        .collect()
}

/// Name of the machine's public IP.
#[must_use]
pub fn public_ip_name(scope: &MachineScope) -> String {
    format!("pip-{}", scope.machine_name)
}

/// Name of the machine's primary network interface.
#[must_use]
pub fn network_interface_name(scope: &MachineScope) -> String {
    format!("{}-nic", scope.machine_name)
}

/// Public IP of the machine, when one is requested.
#[must_use]
pub fn public_ips(scope: &MachineScope) -> Vec<ResourceSpec> {
    if !scope.spec.allocate_public_ip {
        return Vec::new();
    }
    let env = scope.environment();
    let zones: Vec<&str> = scope.spec.availability_zone.iter().map(String::as_str).collect();
    vec![
        ResourceSpec::new(
            PUBLIC_IP_TYPE,
            public_ip_name(scope),
            env.resource_group.as_str(),
            json!({
                "location": env.location,
                "sku": { "name": "Standard" },
                "publicIPAllocationMethod": "Static",
                "publicIPAddressVersion": "IPv4",
                "zones": zones,
            }),
        )
        .with_tags(scope.tags()),
    ]
}

/// Primary network interface of the machine.
///
/// Accelerated networking follows the VM size when not set explicitly.
///
/// # Errors
///
/// Returns [`ServiceError::Sku`] when the VM size is not offered, and
/// [`ServiceError::InvalidSpec`] when the subnet cannot be resolved or
/// accelerated networking is requested on a size that lacks it.
pub fn network_interfaces(
    scope: &MachineScope,
    skus: &SkuCache,
) -> Result<Vec<ResourceSpec>, ServiceError> {
    let sku = skus.get(&scope.spec.vm_size, ResourceSkuKind::VirtualMachines)?;
    let supported = sku.has_capability(ACCELERATED_NETWORKING);
    let accelerated = match scope.spec.accelerated_networking {
        Some(true) if !supported => {
            return Err(invalid(
                "network interface",
                format!(
                    "accelerated networking is not supported on VM size {}",
                    scope.spec.vm_size
                ),
            ));
        }
        Some(requested) => requested,
        None => supported,
    };
    let subnet = scope.subnet().ok_or_else(|| {
        invalid(
            "network interface",
            format!(
                "no subnet {} for machine {}",
                scope.spec.subnet_name.as_deref().unwrap_or(scope.role.as_str()),
                scope.machine_name
            ),
        )
    })?;
    let env = scope.environment();
    let subnet_id = resource_id(
        env,
        SUBNET_TYPE,
        &format!("{}/{}", scope.cluster.spec.vnet.name, subnet.name),
    );
    let public_ip = scope
        .spec
        .allocate_public_ip
        .then(|| json!({ "id": resource_id(env, PUBLIC_IP_TYPE, &public_ip_name(scope)) }));
    Ok(vec![
        ResourceSpec::new(
            NETWORK_INTERFACE_TYPE,
            network_interface_name(scope),
            env.resource_group.as_str(),
            json!({
                "location": env.location,
                "enableAcceleratedNetworking": accelerated,
                "ipConfigurations": [{
                    "name": "pipConfig",
                    "primary": true,
                    "privateIPAllocationMethod": "Dynamic",
                    "subnet": { "id": subnet_id },
                    "publicIPAddress": public_ip,
                }],
            }),
        )
        .with_tags(scope.tags()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skus::SkuError;
    use crate::test_support::{allow_tcp, sample_cluster, sample_machine, sample_skus};
    use rstest::rstest;

    #[rstest]
    fn resource_group_carries_cluster_tags() {
        let spec = resource_group(&sample_cluster());
        assert_eq!(spec.name, "rg-demo");
        assert_eq!(spec.parameters["location"], "westeurope");
        assert_eq!(
            spec.tags.get("azrig.io_cluster_demo").map(String::as_str),
            Some("owned")
        );
    }

    #[rstest]
    fn virtual_network_requires_address_space() {
        let mut scope = sample_cluster();
        scope.spec.vnet.cidr_blocks.clear();
        let err = virtual_network(&scope).expect_err("empty address space");
        assert_eq!(
            err.to_string(),
            "invalid virtual network spec: demo-vnet has no address prefixes"
        );
    }

    #[rstest]
    fn security_groups_render_rules_with_wildcards() {
        let specs = security_groups(&sample_cluster()).expect("valid groups");
        assert_eq!(specs.len(), 2);
        let rule = &specs[0].parameters["securityRules"][0];
        assert_eq!(rule["name"], "allow_apiserver");
        assert_eq!(rule["destinationPortRange"], "6443");
        assert_eq!(rule["sourceAddressPrefix"], "*");
        assert_eq!(rule["direction"], "Inbound");
    }

    #[rstest]
    #[case(allow_tcp("ssh", 99, "22"), "priority 99 outside 100..=4096")]
    #[case(allow_tcp("ssh", 4097, "22"), "priority 4097 outside 100..=4096")]
    #[case(allow_tcp("allow_apiserver", 300, "22"), "duplicate rule name allow_apiserver")]
    #[case(allow_tcp("ssh", 2201, "22"), "reuses inbound priority 2201")]
    fn security_groups_reject_invalid_rules(
        #[case] extra: SecurityRule,
        #[case] expected: &str,
    ) {
        let mut scope = sample_cluster();
        if let Some(group) = scope.spec.subnets[0].security_group.as_mut() {
            group.security_rules.push(extra);
        }
        let err = security_groups(&scope).expect_err("invalid rule");
        assert!(
            err.to_string().contains(expected),
            "unexpected error: {err}"
        );
    }

    #[rstest]
    fn same_priority_is_allowed_in_opposite_directions() {
        let mut scope = sample_cluster();
        let mut outbound = allow_tcp("egress", 2201, "443");
        outbound.direction = SecurityRuleDirection::Outbound;
        if let Some(group) = scope.spec.subnets[0].security_group.as_mut() {
            group.security_rules.push(outbound);
        }
        assert!(security_groups(&scope).is_ok());
    }

    #[rstest]
    fn subnets_reference_their_security_group() {
        let specs = subnets(&sample_cluster()).expect("valid subnets");
        assert_eq!(specs[0].name, "demo-vnet/demo-controlplane-subnet");
        assert_eq!(
            specs[0].parameters["networkSecurityGroup"]["id"],
            "/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/rg-demo/providers/Microsoft.Network/networkSecurityGroups/demo-controlplane-nsg"
        );
    }

    #[rstest]
    fn public_ip_is_omitted_when_not_requested() {
        let mut scope = sample_machine();
        assert_eq!(public_ips(&scope).len(), 1);
        scope.spec.allocate_public_ip = false;
        assert!(public_ips(&scope).is_empty());
    }

    #[rstest]
    #[case(None, true)]
    #[case(Some(false), false)]
    #[case(Some(true), true)]
    fn accelerated_networking_follows_sku(
        #[case] requested: Option<bool>,
        #[case] expected: bool,
    ) {
        let mut scope = sample_machine();
        scope.spec.accelerated_networking = requested;
        let specs = network_interfaces(&scope, &sample_skus()).expect("valid nic");
        assert_eq!(specs[0].parameters["enableAcceleratedNetworking"], expected);
    }

    #[rstest]
    fn accelerated_networking_requires_capability() {
        let mut scope = sample_machine();
        scope.spec.vm_size = String::from("Basic_A0");
        scope.spec.accelerated_networking = Some(true);
        let err = network_interfaces(&scope, &sample_skus()).expect_err("unsupported");
        assert!(err.to_string().contains("accelerated networking is not supported"));
    }

    #[rstest]
    fn network_interface_requires_known_size() {
        let mut scope = sample_machine();
        scope.spec.vm_size = String::from("Standard_Missing");
        let err = network_interfaces(&scope, &sample_skus()).expect_err("unknown size");
        assert!(matches!(err, ServiceError::Sku(SkuError::NotFound { .. })));
    }

    #[rstest]
    fn network_interface_requires_subnet() {
        let mut scope = sample_machine();
        scope.spec.subnet_name = Some(String::from("missing"));
        let err = network_interfaces(&scope, &sample_skus()).expect_err("missing subnet");
        assert_eq!(
            err.to_string(),
            "invalid network interface spec: no subnet missing for machine demo-md-0-abcde"
        );
    }
}
