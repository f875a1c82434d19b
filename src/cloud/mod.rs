//! Provider client seam used by the resource managers.
//!
//! Managers describe each cloud object as a [`ResourceSpec`] and drive it
//! through a [`CloudClient`]. The real provider SDK lives behind this trait;
//! [`InMemoryCloud`] backs dry runs and tests.

mod memory;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use thiserror::Error;

pub use memory::{InMemoryCloud, JournalEntry, OperationKind};

/// Resource type of resource groups.
pub const RESOURCE_GROUP_TYPE: &str = "Microsoft.Resources/resourceGroups";

/// Future returned by cloud client calls.
pub type CloudFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CloudError>> + Send + 'a>>;

/// Desired state of one cloud object.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ResourceSpec {
    /// Provider resource type, for example `Microsoft.Network/publicIPAddresses`.
    pub resource_type: String,
    /// Resource name; child resources use `parent/child`.
    pub name: String,
    /// Owning resource group.
    pub resource_group: String,
    /// Type-specific parameters sent to the provider.
    pub parameters: serde_json::Value,
    /// Tags applied to the object.
    pub tags: BTreeMap<String, String>,
}

impl ResourceSpec {
    /// Creates a spec with no tags.
    #[must_use]
    pub fn new(
        resource_type: impl Into<String>,
        name: impl Into<String>,
        resource_group: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            resource_group: resource_group.into(),
            parameters,
            tags: BTreeMap::new(),
        }
    }

    /// Replaces the tag set.
    #[must_use]
    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    /// Renders the provider identifier within `subscription_id`.
    #[must_use]
    pub fn id(&self, subscription_id: &str) -> String {
        if self.resource_type == RESOURCE_GROUP_TYPE {
            return format!("/subscriptions/{subscription_id}/resourceGroups/{}", self.name);
        }
        let (parent_type, child_type) = self
            .resource_type
            .rsplit_once('/')
            .unwrap_or((self.resource_type.as_str(), ""));
        let path = match self.name.split_once('/') {
            Some((parent, child)) if !child_type.is_empty() && parent_type.contains('/') => {
                format!("{parent_type}/{parent}/{child_type}/{child}")
            }
            _ => format!("{}/{}", self.resource_type, self.name),
        };
        format!(
            "/subscriptions/{subscription_id}/resourceGroups/{}/providers/{path}",
            self.resource_group
        )
    }
}

impl fmt::Display for ResourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.resource_type, self.name)
    }
}

/// Whether the provider keeps reconciling an object asynchronously.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcilePolicy {
    /// Provider-side reconciliation is active.
    #[default]
    Manage,
    /// Provider-side reconciliation is suspended.
    Skip,
}

impl fmt::Display for ReconcilePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manage => f.write_str("manage"),
            Self::Skip => f.write_str("skip"),
        }
    }
}

/// Object as reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Resource {
    /// Last applied desired state.
    pub spec: ResourceSpec,
    /// Current reconcile policy.
    pub reconcile_policy: ReconcilePolicy,
}

impl Resource {
    /// Returns `true` when the stored object already matches `spec`.
    #[must_use]
    pub fn matches(&self, spec: &ResourceSpec) -> bool {
        self.spec.parameters == spec.parameters && self.spec.tags == spec.tags
    }

    /// Returns `true` when any string in the stored parameters equals `id`,
    /// ignoring ASCII case as provider identifiers do.
    #[must_use]
    pub fn references(&self, id: &str) -> bool {
        fn walk(value: &serde_json::Value, id: &str) -> bool {
            match value {
                serde_json::Value::String(text) => text.eq_ignore_ascii_case(id),
                serde_json::Value::Array(items) => items.iter().any(|item| walk(item, id)),
                serde_json::Value::Object(map) => map.values().any(|item| walk(item, id)),
                _ => false,
            }
        }
        walk(&self.spec.parameters, id)
    }
}

/// Errors returned by cloud clients.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CloudError {
    /// The object does not exist.
    #[error("{resource} not found")]
    NotFound {
        /// Display form of the resource.
        resource: String,
    },
    /// The request conflicts with existing provider state.
    #[error("conflict on {resource}: {message}")]
    Conflict {
        /// Display form of the resource.
        resource: String,
        /// Provider message.
        message: String,
    },
    /// The provider rejected the request.
    #[error("request for {resource} rejected: {message}")]
    Rejected {
        /// Display form of the resource.
        resource: String,
        /// Provider message.
        message: String,
    },
    /// The request never reached the provider or the reply was lost.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Minimal provider interface required by the resource managers.
pub trait CloudClient: Send + Sync {
    /// Fetches the current object, or `None` when it does not exist.
    fn get<'a>(&'a self, spec: &'a ResourceSpec) -> CloudFuture<'a, Option<Resource>>;

    /// Lists every object of `resource_type` in `resource_group`.
    fn list<'a>(
        &'a self,
        resource_type: &'a str,
        resource_group: &'a str,
    ) -> CloudFuture<'a, Vec<Resource>>;

    /// Creates the object or updates it in place.
    fn create_or_update<'a>(&'a self, spec: &'a ResourceSpec) -> CloudFuture<'a, Resource>;

    /// Deletes the object; deleting an absent object succeeds.
    fn delete<'a>(&'a self, spec: &'a ResourceSpec) -> CloudFuture<'a, ()>;

    /// Changes whether the provider keeps reconciling the object.
    fn set_reconcile_policy<'a>(
        &'a self,
        spec: &'a ResourceSpec,
        policy: ReconcilePolicy,
    ) -> CloudFuture<'a, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(
        RESOURCE_GROUP_TYPE,
        "rg-demo",
        "/subscriptions/sub/resourceGroups/rg-demo"
    )]
    #[case(
        "Microsoft.Network/publicIPAddresses",
        "pip-node-0",
        "/subscriptions/sub/resourceGroups/rg-demo/providers/Microsoft.Network/publicIPAddresses/pip-node-0"
    )]
    #[case(
        "Microsoft.Network/virtualNetworks/subnets",
        "vnet-demo/node-subnet",
        "/subscriptions/sub/resourceGroups/rg-demo/providers/Microsoft.Network/virtualNetworks/vnet-demo/subnets/node-subnet"
    )]
    fn id_renders_provider_path(
        #[case] resource_type: &str,
        #[case] name: &str,
        #[case] expected: &str,
    ) {
        let spec = ResourceSpec::new(resource_type, name, "rg-demo", json!({}));
        assert_eq!(spec.id("sub"), expected);
    }

    #[rstest]
    fn matches_compares_parameters_and_tags() {
        let spec = ResourceSpec::new("t", "n", "rg", json!({"sku": "Standard"}));
        let stored = Resource {
            spec: spec.clone(),
            reconcile_policy: ReconcilePolicy::Manage,
        };
        assert!(stored.matches(&spec));

        let mut tags = BTreeMap::new();
        tags.insert(String::from("owner"), String::from("ops"));
        assert!(!stored.matches(&spec.with_tags(tags)));
    }

    #[rstest]
    fn references_finds_nested_identifiers() {
        let stored = Resource {
            spec: ResourceSpec::new(
                "Microsoft.Compute/virtualMachines",
                "vm",
                "rg",
                json!({"placement": {"availabilitySet": {"id": "/subscriptions/s/resourceGroups/RG/x"}}}),
            ),
            reconcile_policy: ReconcilePolicy::Manage,
        };
        assert!(stored.references("/subscriptions/s/resourceGroups/rg/x"));
        assert!(!stored.references("/subscriptions/s/resourceGroups/rg/y"));
    }
}
