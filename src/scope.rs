//! Declarative node and cluster objects consumed by the managers.
//!
//! Scopes are owned by the caller and borrowed for the duration of one pass.
//! Nothing in this crate mutates them.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Tag key prefix marking resources owned by a cluster.
pub const CLUSTER_TAG_PREFIX: &str = "azrig.io_cluster_";
/// Tag key recording the role of the owning machine.
pub const ROLE_TAG: &str = "azrig.io_role";
/// Tag key recording the resource's logical name.
pub const NAME_TAG: &str = "Name";

/// Read access shared by every scope an orchestrator can be bound to.
pub trait Scope: Send + Sync {
    /// Kind of declarative object, used in error messages.
    const OWNER_KIND: &'static str;

    /// Name of the declarative object.
    fn name(&self) -> &str;

    /// Subscription, location and resource group the object lives in.
    fn environment(&self) -> &Environment;
}

/// Cloud environment identifiers.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    /// Subscription identifier.
    pub subscription_id: String,
    /// Region, for example `westeurope`.
    pub location: String,
    /// Resource group holding the cluster's resources.
    pub resource_group: String,
}

/// Address space of the cluster network.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VnetSpec {
    /// Virtual network name.
    pub name: String,
    /// Address prefixes.
    pub cidr_blocks: Vec<String>,
}

/// Which machines a subnet hosts.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum SubnetRole {
    /// Control plane machines.
    ControlPlane,
    /// Worker machines.
    Node,
}

/// Traffic direction of a security rule.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum SecurityRuleDirection {
    /// Traffic entering the subnet.
    Inbound,
    /// Traffic leaving the subnet.
    Outbound,
}

/// Protocol matched by a security rule.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
pub enum SecurityProtocol {
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
    /// ICMP.
    Icmp,
    /// Any protocol.
    #[serde(rename = "*")]
    All,
}

/// Whether a matching rule admits or drops traffic.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
pub enum SecurityRuleAction {
    /// Admit traffic.
    #[default]
    Allow,
    /// Drop traffic.
    Deny,
}

/// One network security rule.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityRule {
    /// Rule name, unique within its group.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Matched protocol.
    pub protocol: SecurityProtocol,
    /// Matched direction.
    pub direction: SecurityRuleDirection,
    /// Evaluation priority; lower values win.
    pub priority: u32,
    /// Source port range, `*` when omitted.
    pub source_ports: Option<String>,
    /// Destination port range, `*` when omitted.
    pub destination_ports: Option<String>,
    /// Source address prefix, `*` when omitted.
    pub source: Option<String>,
    /// Destination address prefix, `*` when omitted.
    pub destination: Option<String>,
    /// Allow or deny.
    #[serde(default)]
    pub action: SecurityRuleAction,
}

/// Network security group attached to a subnet.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroup {
    /// Group name.
    pub name: String,
    /// Rules in the group.
    #[serde(default)]
    pub security_rules: Vec<SecurityRule>,
}

/// One subnet of the cluster network.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    /// Subnet name.
    pub name: String,
    /// Machines hosted in the subnet.
    pub role: SubnetRole,
    /// Address prefixes.
    pub cidr_blocks: Vec<String>,
    /// Optional security group.
    pub security_group: Option<SecurityGroup>,
}

/// Desired state of the cluster infrastructure.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureClusterSpec {
    /// Cluster network.
    pub vnet: VnetSpec,
    /// Subnets of the cluster network.
    #[serde(default)]
    pub subnets: Vec<SubnetSpec>,
    /// Tags applied to every cluster resource.
    #[serde(default)]
    pub additional_tags: BTreeMap<String, String>,
}

/// Cluster object plus its environment.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterScope {
    /// Cloud environment.
    pub environment: Environment,
    /// Cluster name.
    pub cluster_name: String,
    /// Desired cluster state.
    pub spec: AzureClusterSpec,
}

impl ClusterScope {
    /// Tags every cluster-owned resource carries.
    #[must_use]
    pub fn tags(&self) -> BTreeMap<String, String> {
        let mut tags = self.spec.additional_tags.clone();
        tags.insert(
            format!("{CLUSTER_TAG_PREFIX}{}", self.cluster_name),
            String::from("owned"),
        );
        tags
    }

    /// Finds a subnet by name.
    #[must_use]
    pub fn subnet(&self, name: &str) -> Option<&SubnetSpec> {
        self.spec.subnets.iter().find(|subnet| subnet.name == name)
    }

    /// Finds the first subnet hosting `role`.
    #[must_use]
    pub fn subnet_for_role(&self, role: SubnetRole) -> Option<&SubnetSpec> {
        self.spec.subnets.iter().find(|subnet| subnet.role == role)
    }
}

impl Scope for ClusterScope {
    const OWNER_KIND: &'static str = "AzureCluster";

    fn name(&self) -> &str {
        &self.cluster_name
    }

    fn environment(&self) -> &Environment {
        &self.environment
    }
}

/// Role of a machine within its cluster.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum MachineRole {
    /// Control plane machine.
    ControlPlane,
    /// Worker machine.
    Node,
}

impl MachineRole {
    /// Tag value and name fragment for the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ControlPlane => "control-plane",
            Self::Node => "node",
        }
    }

    /// Subnet role hosting machines of this role.
    #[must_use]
    pub const fn subnet_role(self) -> SubnetRole {
        match self {
            Self::ControlPlane => SubnetRole::ControlPlane,
            Self::Node => SubnetRole::Node,
        }
    }
}

/// Marketplace image reference.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    /// Publisher, for example `Canonical`.
    pub publisher: String,
    /// Offer name.
    pub offer: String,
    /// Image SKU.
    pub sku: String,
    /// Image version, `latest` when omitted.
    #[serde(default = "latest")]
    pub version: String,
}

fn latest() -> String {
    String::from("latest")
}

/// Operating system disk settings.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OsDisk {
    /// `Linux` or `Windows`.
    pub os_type: String,
    /// Size in GiB.
    pub disk_size_gb: u32,
    /// Storage account type, for example `Premium_LRS`.
    pub storage_account_type: String,
    /// Place the OS disk on local ephemeral storage.
    #[serde(default)]
    pub ephemeral: bool,
}

/// Additional managed disk.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataDisk {
    /// Suffix appended to the machine name to form the disk name.
    pub name_suffix: String,
    /// Size in GiB.
    pub disk_size_gb: u32,
    /// Logical unit number.
    pub lun: u32,
    /// Storage account type, for example `Premium_LRS`.
    pub storage_account_type: String,
}

/// Managed identity assigned to the VM.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub enum VmIdentity {
    /// No identity.
    #[default]
    None,
    /// Identity created and owned by the VM.
    SystemAssigned,
    /// Pre-existing user-assigned identities, by provider id.
    UserAssigned(Vec<String>),
}

/// Role granted to the VM's system-assigned identity.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignment {
    /// Role definition identifier.
    pub definition_id: String,
    /// Scope the role applies to; the resource group when omitted.
    pub scope: Option<String>,
}

/// VM extension to install.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VmExtension {
    /// Extension name.
    pub name: String,
    /// Extension publisher.
    pub publisher: String,
    /// Extension version.
    pub version: String,
    /// Public settings.
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

/// Desired state of one compute node.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureMachineSpec {
    /// VM size, for example `Standard_D2s_v3`.
    pub vm_size: String,
    /// Subnet to attach to; the first subnet for the role when omitted.
    pub subnet_name: Option<String>,
    /// Boot image.
    pub image: Image,
    /// OS disk settings.
    pub os_disk: OsDisk,
    /// Additional disks.
    #[serde(default)]
    pub data_disks: Vec<DataDisk>,
    /// Request accelerated networking; follows the SKU when omitted.
    pub accelerated_networking: Option<bool>,
    /// Give the machine a public IP.
    #[serde(default)]
    pub allocate_public_ip: bool,
    /// Availability zone; an availability set is used when omitted.
    pub availability_zone: Option<String>,
    /// Managed identity.
    #[serde(default)]
    pub identity: VmIdentity,
    /// Role for the system-assigned identity.
    pub role_assignment: Option<RoleAssignment>,
    /// Extensions to install.
    #[serde(default)]
    pub vm_extensions: Vec<VmExtension>,
    /// Extra tags for machine resources.
    #[serde(default)]
    pub additional_tags: BTreeMap<String, String>,
}

/// Machine object plus the cluster it belongs to.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineScope {
    /// Owning cluster.
    pub cluster: ClusterScope,
    /// Machine name; also the VM name.
    pub machine_name: String,
    /// Machine role.
    pub role: MachineRole,
    /// Desired machine state.
    pub spec: AzureMachineSpec,
}

impl MachineScope {
    /// Tags carried by every machine resource.
    #[must_use]
    pub fn tags(&self) -> BTreeMap<String, String> {
        let mut tags = self.cluster.tags();
        tags.extend(
            self.spec
                .additional_tags
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        tags.insert(String::from(ROLE_TAG), self.role.as_str().to_owned());
        tags.insert(String::from(NAME_TAG), self.machine_name.clone());
        tags
    }

    /// Subnet the machine attaches to.
    #[must_use]
    pub fn subnet(&self) -> Option<&SubnetSpec> {
        match self.spec.subnet_name.as_deref() {
            Some(name) => self.cluster.subnet(name),
            None => self.cluster.subnet_for_role(self.role.subnet_role()),
        }
    }

    /// Name of the availability set shared by machines of the same role.
    #[must_use]
    pub fn availability_set_name(&self) -> String {
        format!("{}_{}-as", self.cluster.cluster_name, self.role.as_str())
    }
}

impl Scope for MachineScope {
    const OWNER_KIND: &'static str = "AzureMachine";

    fn name(&self) -> &str {
        &self.machine_name
    }

    fn environment(&self) -> &Environment {
        &self.cluster.environment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const MACHINE_JSON: &str = r#"{
        "cluster": {
            "environment": {
                "subscriptionId": "sub",
                "location": "westeurope",
                "resourceGroup": "rg-demo"
            },
            "clusterName": "demo",
            "spec": {
                "vnet": {"name": "demo-vnet", "cidrBlocks": ["10.0.0.0/8"]},
                "subnets": [
                    {"name": "cp-subnet", "role": "control-plane", "cidrBlocks": ["10.0.0.0/16"]},
                    {"name": "node-subnet", "role": "node", "cidrBlocks": ["10.1.0.0/16"]}
                ],
                "additionalTags": {"team": "infra"}
            }
        },
        "machineName": "demo-md-0-abcde",
        "role": "node",
        "spec": {
            "vmSize": "Standard_D2s_v3",
            "image": {"publisher": "Canonical", "offer": "ubuntu", "sku": "24_04-lts"},
            "osDisk": {"osType": "Linux", "diskSizeGb": 128, "storageAccountType": "Premium_LRS"},
            "identity": {"UserAssigned": ["/id/one"]},
            "additionalTags": {"team": "compute"}
        }
    }"#;

    fn machine() -> MachineScope {
        serde_json::from_str(MACHINE_JSON).expect("machine scope should parse")
    }

    #[rstest]
    fn machine_scope_parses_defaults() {
        let scope = machine();
        assert_eq!(scope.spec.image.version, "latest");
        assert!(!scope.spec.os_disk.ephemeral);
        assert!(scope.spec.data_disks.is_empty());
        assert_eq!(
            scope.spec.identity,
            VmIdentity::UserAssigned(vec![String::from("/id/one")])
        );
        assert_eq!(<MachineScope as Scope>::OWNER_KIND, "AzureMachine");
        assert_eq!(scope.environment().resource_group, "rg-demo");
    }

    #[rstest]
    fn machine_tags_override_cluster_tags() {
        let tags = machine().tags();
        assert_eq!(tags.get("team").map(String::as_str), Some("compute"));
        assert_eq!(
            tags.get("azrig.io_cluster_demo").map(String::as_str),
            Some("owned")
        );
        assert_eq!(tags.get(ROLE_TAG).map(String::as_str), Some("node"));
        assert_eq!(
            tags.get(NAME_TAG).map(String::as_str),
            Some("demo-md-0-abcde")
        );
    }

    #[rstest]
    #[case(None, Some("node-subnet"))]
    #[case(Some("cp-subnet"), Some("cp-subnet"))]
    #[case(Some("missing"), None)]
    fn subnet_resolves_by_name_or_role(
        #[case] subnet_name: Option<&str>,
        #[case] expected: Option<&str>,
    ) {
        let mut scope = machine();
        scope.spec.subnet_name = subnet_name.map(str::to_owned);
        assert_eq!(scope.subnet().map(|subnet| subnet.name.as_str()), expected);
    }

    #[rstest]
    fn availability_set_name_groups_by_role() {
        assert_eq!(machine().availability_set_name(), "demo_node-as");
    }
}
