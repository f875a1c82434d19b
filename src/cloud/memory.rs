//! In-memory cloud used for dry runs and tests.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::sleep;

use super::{CloudClient, CloudError, CloudFuture, ReconcilePolicy, Resource, ResourceSpec};

type ResourceKey = (String, String, String);
type FailureKey = (OperationKind, String, String);

/// Kind of mutating call recorded in the journal.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum OperationKind {
    /// `create_or_update`.
    CreateOrUpdate,
    /// `delete` of an existing object.
    Delete,
    /// `set_reconcile_policy`.
    SetReconcilePolicy(ReconcilePolicy),
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateOrUpdate => f.write_str("create_or_update"),
            Self::Delete => f.write_str("delete"),
            Self::SetReconcilePolicy(policy) => write!(f, "set_reconcile_policy({policy})"),
        }
    }
}

/// One journal entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JournalEntry {
    /// What was done.
    pub kind: OperationKind,
    /// Provider resource type.
    pub resource_type: String,
    /// Resource name.
    pub name: String,
}

impl fmt::Display for JournalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.kind, self.resource_type, self.name)
    }
}

#[derive(Debug, Default)]
struct State {
    resources: BTreeMap<ResourceKey, Resource>,
    journal: Vec<JournalEntry>,
    failures: BTreeMap<FailureKey, CloudError>,
}

/// Thread-safe in-memory implementation of [`CloudClient`].
///
/// Clones share state, so a test can keep one handle for assertions while
/// the managers own another.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCloud {
    state: Arc<Mutex<State>>,
    latency: Option<Duration>,
}

impl InMemoryCloud {
    /// Creates an empty cloud.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every call by `latency`, which lets tests exercise deadlines.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes every `kind` call against the `resource_type` object `name`
    /// fail with `error`.
    pub fn fail(
        &self,
        kind: OperationKind,
        resource_type: impl Into<String>,
        name: impl Into<String>,
        error: CloudError,
    ) {
        if let Ok(mut state) = self.state.lock() {
            state
                .failures
                .insert((kind, resource_type.into(), name.into()), error);
        }
    }

    /// Removes all scripted failures.
    pub fn clear_failures(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.failures.clear();
        }
    }

    /// Forgets every journalled call while keeping stored objects.
    pub fn clear_journal(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.journal.clear();
        }
    }

    /// Returns a snapshot of the mutating calls made so far.
    #[must_use]
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.state
            .lock()
            .map(|state| state.journal.clone())
            .unwrap_or_default()
    }

    /// Returns a snapshot of the stored objects, ordered by key.
    #[must_use]
    pub fn resources(&self) -> Vec<Resource> {
        self.state
            .lock()
            .map(|state| state.resources.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Looks up a stored object by type and name.
    #[must_use]
    pub fn resource(&self, resource_type: &str, name: &str) -> Option<Resource> {
        self.state.lock().ok().and_then(|state| {
            state
                .resources
                .values()
                .find(|res| res.spec.resource_type == resource_type && res.spec.name == name)
                .cloned()
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, CloudError> {
        self.state
            .lock()
            .map_err(|_| CloudError::Transport(String::from("in-memory state lock poisoned")))
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            sleep(latency).await;
        }
    }

    fn key(spec: &ResourceSpec) -> ResourceKey {
        (
            spec.resource_type.clone(),
            spec.resource_group.clone(),
            spec.name.clone(),
        )
    }

    fn record(
        state: &mut State,
        kind: OperationKind,
        spec: &ResourceSpec,
    ) -> Result<(), CloudError> {
        let failure_key = (kind, spec.resource_type.clone(), spec.name.clone());
        if let Some(err) = state.failures.get(&failure_key) {
            return Err(err.clone());
        }
        state.journal.push(JournalEntry {
            kind,
            resource_type: spec.resource_type.clone(),
            name: spec.name.clone(),
        });
        Ok(())
    }
}

impl CloudClient for InMemoryCloud {
    fn get<'a>(&'a self, spec: &'a ResourceSpec) -> CloudFuture<'a, Option<Resource>> {
        Box::pin(async move {
            self.simulate_latency().await;
            let state = self.lock()?;
            Ok(state.resources.get(&Self::key(spec)).cloned())
        })
    }

    fn list<'a>(
        &'a self,
        resource_type: &'a str,
        resource_group: &'a str,
    ) -> CloudFuture<'a, Vec<Resource>> {
        Box::pin(async move {
            self.simulate_latency().await;
            let state = self.lock()?;
            Ok(state
                .resources
                .values()
                .filter(|res| {
                    res.spec.resource_type == resource_type
                        && res.spec.resource_group == resource_group
                })
                .cloned()
                .collect())
        })
    }

    fn create_or_update<'a>(&'a self, spec: &'a ResourceSpec) -> CloudFuture<'a, Resource> {
        Box::pin(async move {
            self.simulate_latency().await;
            let mut state = self.lock()?;
            Self::record(&mut state, OperationKind::CreateOrUpdate, spec)?;
            let key = Self::key(spec);
            let reconcile_policy = state
                .resources
                .get(&key)
                .map(|existing| existing.reconcile_policy)
                .unwrap_or_default();
            let resource = Resource {
                spec: spec.clone(),
                reconcile_policy,
            };
            state.resources.insert(key, resource.clone());
            Ok(resource)
        })
    }

    fn delete<'a>(&'a self, spec: &'a ResourceSpec) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            self.simulate_latency().await;
            let mut state = self.lock()?;
            let key = Self::key(spec);
            if !state.resources.contains_key(&key) {
                return Ok(());
            }
            Self::record(&mut state, OperationKind::Delete, spec)?;
            state.resources.remove(&key);
            Ok(())
        })
    }

    fn set_reconcile_policy<'a>(
        &'a self,
        spec: &'a ResourceSpec,
        policy: ReconcilePolicy,
    ) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            self.simulate_latency().await;
            let mut state = self.lock()?;
            let key = Self::key(spec);
            if !state.resources.contains_key(&key) {
                return Err(CloudError::NotFound {
                    resource: spec.to_string(),
                });
            }
            Self::record(&mut state, OperationKind::SetReconcilePolicy(policy), spec)?;
            if let Some(existing) = state.resources.get_mut(&key) {
                existing.reconcile_policy = policy;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pip() -> ResourceSpec {
        ResourceSpec::new(
            "Microsoft.Network/publicIPAddresses",
            "pip-node-0",
            "rg",
            json!({"sku": "Standard"}),
        )
    }

    #[tokio::test]
    async fn create_or_update_is_an_upsert() {
        let pip = pip();
        let cloud = InMemoryCloud::new();
        cloud.create_or_update(&pip).await.expect("first create");
        cloud.create_or_update(&pip).await.expect("second create");
        assert_eq!(cloud.resources().len(), 1);
        assert_eq!(cloud.journal().len(), 2);
    }

    #[tokio::test]
    async fn delete_of_missing_object_is_silent() {
        let pip = pip();
        let cloud = InMemoryCloud::new();
        cloud.delete(&pip).await.expect("delete should succeed");
        assert!(cloud.journal().is_empty());
    }

    #[tokio::test]
    async fn scripted_failure_is_returned_and_not_journalled() {
        let pip = pip();
        let cloud = InMemoryCloud::new();
        let error = CloudError::Rejected {
            resource: pip.to_string(),
            message: String::from("quota exceeded"),
        };
        cloud.fail(
            OperationKind::CreateOrUpdate,
            "Microsoft.Network/publicIPAddresses",
            "pip-node-0",
            error.clone(),
        );
        let result = cloud.create_or_update(&pip).await;
        assert_eq!(result, Err(error));
        assert!(cloud.journal().is_empty());

        cloud.clear_failures();
        cloud.create_or_update(&pip).await.expect("create after clear");
    }

    #[tokio::test]
    async fn scripted_failure_only_hits_the_named_resource_type() {
        let pip = pip();
        let vm = ResourceSpec::new(
            "Microsoft.Compute/virtualMachines",
            "pip-node-0",
            "rg",
            json!({}),
        );
        let cloud = InMemoryCloud::new();
        cloud.fail(
            OperationKind::CreateOrUpdate,
            "Microsoft.Compute/virtualMachines",
            "pip-node-0",
            CloudError::Transport(String::from("reset")),
        );

        cloud.create_or_update(&pip).await.expect("other type is unaffected");
        assert!(cloud.create_or_update(&vm).await.is_err());
    }

    #[tokio::test]
    async fn list_filters_by_type_and_group() {
        let cloud = InMemoryCloud::new();
        cloud.create_or_update(&pip()).await.expect("create pip");
        let other_group = ResourceSpec::new(
            "Microsoft.Network/publicIPAddresses",
            "pip-node-1",
            "rg-other",
            json!({}),
        );
        cloud.create_or_update(&other_group).await.expect("create other");

        let listed = cloud
            .list("Microsoft.Network/publicIPAddresses", "rg")
            .await
            .expect("list");

        assert_eq!(listed.len(), 1);
        assert_eq!(listed.first().map(|res| res.spec.name.as_str()), Some("pip-node-0"));
    }

    #[tokio::test]
    async fn reconcile_policy_survives_updates() {
        let pip = pip();
        let cloud = InMemoryCloud::new();
        cloud.create_or_update(&pip).await.expect("create");
        cloud
            .set_reconcile_policy(&pip, ReconcilePolicy::Skip)
            .await
            .expect("pause");
        let updated = cloud.create_or_update(&pip).await.expect("update");
        assert_eq!(updated.reconcile_policy, ReconcilePolicy::Skip);
    }

    #[tokio::test]
    async fn reconcile_policy_requires_existing_object() {
        let pip = pip();
        let cloud = InMemoryCloud::new();
        let result = cloud.set_reconcile_policy(&pip, ReconcilePolicy::Skip).await;
        assert!(matches!(result, Err(CloudError::NotFound { .. })));
    }
}
