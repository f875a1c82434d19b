//! Test support utilities shared across unit and integration tests.

use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::MutexGuard;

use crate::context::Context;
use crate::orchestrator::Operation;
use crate::scope::{
    AzureClusterSpec, AzureMachineSpec, ClusterScope, Environment, Image, MachineRole,
    MachineScope, OsDisk, SecurityGroup, SecurityProtocol, SecurityRule, SecurityRuleAction,
    SecurityRuleDirection, SubnetRole, SubnetSpec, VmIdentity, VnetSpec,
};
use crate::service::{Pauser, ServiceError, ServiceFuture, ServiceReconciler};
use crate::skus::{
    ACCELERATED_NETWORKING, EPHEMERAL_OS_DISK, PREMIUM_IO, ResourceSku, ResourceSkuKind,
    SkuCache, SkuCapability,
};

/// Records a single call made through a [`RecordingService`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Call {
    /// Registered name of the service that was called.
    pub service: String,
    /// Operation that was invoked.
    pub operation: Operation,
}

impl Call {
    /// Returns a compact `service:operation` string for assertions.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}:{}", self.service, self.operation)
    }
}

/// Call log shared between several doubles so tests can assert ordering.
#[derive(Clone, Debug, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, service: &str, operation: Operation) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Call {
                service: service.to_owned(),
                operation,
            });
    }

    /// Returns a snapshot of all calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the recorded calls as `service:operation` labels.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.calls().iter().map(Call::label).collect()
    }

    /// Counts calls of `operation` made on `service`.
    #[must_use]
    pub fn count(&self, service: &str, operation: Operation) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.service == service && call.operation == operation)
            .count()
    }
}

/// Scripted manager without the pause capability.
///
/// Every call is appended to the shared [`CallLog`]. Failures are scripted
/// per operation; a failing call may also change the name the double
/// reports afterwards.
#[derive(Debug)]
pub struct RecordingService {
    name: String,
    name_after_failure: Option<String>,
    failed: AtomicBool,
    failures: BTreeMap<Operation, String>,
    delay: Option<Duration>,
    log: CallLog,
}

impl RecordingService {
    /// Creates a double that succeeds on every call.
    #[must_use]
    pub fn new(name: impl Into<String>, log: &CallLog) -> Self {
        Self {
            name: name.into(),
            name_after_failure: None,
            failed: AtomicBool::new(false),
            failures: BTreeMap::new(),
            delay: None,
            log: log.clone(),
        }
    }

    /// Makes every `operation` call fail with `message`.
    #[must_use]
    pub fn failing(mut self, operation: Operation, message: impl Into<String>) -> Self {
        self.failures.insert(operation, message.into());
        self
    }

    /// Reports `name` once any call has failed.
    #[must_use]
    pub fn renamed_after_failure(mut self, name: impl Into<String>) -> Self {
        self.name_after_failure = Some(name.into());
        self
    }

    /// Makes every call wait `delay` under the caller's context.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Wraps the double so it advertises the pause capability.
    #[must_use]
    pub const fn pausable(self) -> PausableService {
        PausableService { inner: self }
    }

    /// Boxes the double for registration with an orchestrator.
    #[must_use]
    pub fn boxed<'a>(self) -> Box<dyn ServiceReconciler + 'a> {
        Box::new(self)
    }

    async fn perform(&self, ctx: &Context, operation: Operation) -> Result<(), ServiceError> {
        self.log.record(&self.name, operation);
        if let Some(delay) = self.delay {
            ctx.run(tokio::time::sleep(delay)).await?;
        }
        if let Some(message) = self.failures.get(&operation) {
            self.failed.store(true, Ordering::SeqCst);
            return Err(ServiceError::other(message.clone()));
        }
        Ok(())
    }
}

impl ServiceReconciler for RecordingService {
    fn name(&self) -> &str {
        match &self.name_after_failure {
            Some(renamed) if self.failed.load(Ordering::SeqCst) => renamed,
            _ => &self.name,
        }
    }

    fn reconcile<'a>(&'a self, ctx: &'a Context) -> ServiceFuture<'a> {
        Box::pin(self.perform(ctx, Operation::Reconcile))
    }

    fn delete<'a>(&'a self, ctx: &'a Context) -> ServiceFuture<'a> {
        Box::pin(self.perform(ctx, Operation::Delete))
    }
}

/// [`RecordingService`] that also implements [`Pauser`].
#[derive(Debug)]
pub struct PausableService {
    inner: RecordingService,
}

impl PausableService {
    /// Boxes the double for registration with an orchestrator.
    #[must_use]
    pub fn boxed<'a>(self) -> Box<dyn ServiceReconciler + 'a> {
        Box::new(self)
    }
}

impl ServiceReconciler for PausableService {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn reconcile<'a>(&'a self, ctx: &'a Context) -> ServiceFuture<'a> {
        self.inner.reconcile(ctx)
    }

    fn delete<'a>(&'a self, ctx: &'a Context) -> ServiceFuture<'a> {
        self.inner.delete(ctx)
    }

    fn pauser(&self) -> Option<&dyn Pauser> {
        Some(self)
    }
}

impl Pauser for PausableService {
    fn pause<'a>(&'a self, ctx: &'a Context) -> ServiceFuture<'a> {
        Box::pin(self.inner.perform(ctx, Operation::Pause))
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// Holds [`ENV_LOCK`] and restores the touched variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Applies `changes` while holding the lock: `Some` sets a variable,
    /// `None` removes it.
    pub async fn apply(changes: &[(&str, Option<&str>)]) -> Self {
        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(changes.len());
        for (key, value) in changes {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`.
            unsafe {
                match value {
                    Some(text) => env::set_var(key, text),
                    None => env::remove_var(key),
                }
            }
        }
        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in self.previous.iter().rev() {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(value) => env::set_var(key, value),
                    None => env::remove_var(key),
                }
            }
        }
    }
}

/// Environment used by the sample scopes.
#[must_use]
pub fn sample_environment() -> Environment {
    Environment {
        subscription_id: String::from("00000000-0000-0000-0000-000000000000"),
        location: String::from("westeurope"),
        resource_group: String::from("rg-demo"),
    }
}

/// Cluster with a control plane and a node subnet, each behind an NSG.
#[must_use]
pub fn sample_cluster() -> ClusterScope {
    ClusterScope {
        environment: sample_environment(),
        cluster_name: String::from("demo"),
        spec: AzureClusterSpec {
            vnet: VnetSpec {
                name: String::from("demo-vnet"),
                cidr_blocks: vec![String::from("10.0.0.0/8")],
            },
            subnets: vec![
                SubnetSpec {
                    name: String::from("demo-controlplane-subnet"),
                    role: SubnetRole::ControlPlane,
                    cidr_blocks: vec![String::from("10.0.0.0/16")],
                    security_group: Some(SecurityGroup {
                        name: String::from("demo-controlplane-nsg"),
                        security_rules: vec![allow_tcp("allow_apiserver", 2201, "6443")],
                    }),
                },
                SubnetSpec {
                    name: String::from("demo-node-subnet"),
                    role: SubnetRole::Node,
                    cidr_blocks: vec![String::from("10.1.0.0/16")],
                    security_group: Some(SecurityGroup {
                        name: String::from("demo-node-nsg"),
                        security_rules: Vec::new(),
                    }),
                },
            ],
            additional_tags: BTreeMap::new(),
        },
    }
}

/// Inbound TCP allow rule for `ports`.
#[must_use]
pub fn allow_tcp(name: &str, priority: u32, ports: &str) -> SecurityRule {
    SecurityRule {
        name: name.to_owned(),
        description: String::new(),
        protocol: SecurityProtocol::Tcp,
        direction: SecurityRuleDirection::Inbound,
        priority,
        source_ports: None,
        destination_ports: Some(ports.to_owned()),
        source: None,
        destination: None,
        action: SecurityRuleAction::Allow,
    }
}

/// Zoneless node machine with a public IP in [`sample_cluster`].
#[must_use]
pub fn sample_machine() -> MachineScope {
    MachineScope {
        cluster: sample_cluster(),
        machine_name: String::from("demo-md-0-abcde"),
        role: MachineRole::Node,
        spec: AzureMachineSpec {
            vm_size: String::from("Standard_D2s_v3"),
            subnet_name: None,
            image: Image {
                publisher: String::from("Canonical"),
                offer: String::from("ubuntu-24_04-lts"),
                sku: String::from("server"),
                version: String::from("latest"),
            },
            os_disk: OsDisk {
                os_type: String::from("Linux"),
                disk_size_gb: 128,
                storage_account_type: String::from("Premium_LRS"),
                ephemeral: false,
            },
            data_disks: Vec::new(),
            accelerated_networking: None,
            allocate_public_ip: true,
            availability_zone: None,
            identity: VmIdentity::None,
            role_assignment: None,
            vm_extensions: Vec::new(),
            additional_tags: BTreeMap::new(),
        },
    }
}

/// Cache offering `Standard_D2s_v3` with premium storage, accelerated
/// networking and ephemeral OS disks in zones 1 to 3 of `westeurope`.
#[must_use]
pub fn sample_skus() -> SkuCache {
    let capability = |name: &str, value: &str| SkuCapability {
        name: name.to_owned(),
        value: value.to_owned(),
    };
    let vm = ResourceSku {
        name: String::from("Standard_D2s_v3"),
        kind: ResourceSkuKind::VirtualMachines,
        locations: vec![String::from("westeurope")],
        zones: vec![String::from("1"), String::from("2"), String::from("3")],
        capabilities: vec![
            capability(ACCELERATED_NETWORKING, "True"),
            capability(EPHEMERAL_OS_DISK, "True"),
            capability(PREMIUM_IO, "True"),
            capability("vCPUs", "2"),
            capability("MemoryGB", "8"),
        ],
    };
    let basic = ResourceSku {
        name: String::from("Basic_A0"),
        kind: ResourceSkuKind::VirtualMachines,
        locations: vec![String::from("westeurope")],
        zones: Vec::new(),
        capabilities: vec![capability(PREMIUM_IO, "False")],
    };
    SkuCache::new([vm, basic], "westeurope")
}
