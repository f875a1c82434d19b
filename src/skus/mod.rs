//! Read-only SKU capability cache.
//!
//! The cache is populated once by the caller and then shared by reference
//! between orchestrators. Nothing in this crate mutates it after
//! construction, so concurrent reads need no locking.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use thiserror::Error;

/// Accelerated networking support on a VM size.
pub const ACCELERATED_NETWORKING: &str = "AcceleratedNetworkingEnabled";
/// Ephemeral OS disk support on a VM size.
pub const EPHEMERAL_OS_DISK: &str = "EphemeralOSDiskSupported";
/// Premium storage support on a VM size.
pub const PREMIUM_IO: &str = "PremiumIO";
/// Number of virtual CPUs.
pub const VCPUS: &str = "vCPUs";
/// Memory in gigabytes.
pub const MEMORY_GB: &str = "MemoryGB";
/// Maximum fault domain count for availability sets.
pub const MAX_FAULT_DOMAINS: &str = "MaximumPlatformFaultDomainCount";

/// Resource type a SKU applies to.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[serde(rename_all = "camelCase")]
pub enum ResourceSkuKind {
    /// Virtual machine sizes.
    VirtualMachines,
    /// Managed disk SKUs.
    Disks,
    /// Availability set SKUs.
    AvailabilitySets,
}

impl ResourceSkuKind {
    /// Provider name of the resource type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VirtualMachines => "virtualMachines",
            Self::Disks => "disks",
            Self::AvailabilitySets => "availabilitySets",
        }
    }
}

impl fmt::Display for ResourceSkuKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single named capability with its string value.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct SkuCapability {
    /// Capability name, for example `vCPUs`.
    pub name: String,
    /// Capability value as reported by the provider.
    pub value: String,
}

/// Capability metadata for one SKU.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSku {
    /// SKU name, for example `Standard_D2s_v3`.
    pub name: String,
    /// Resource type the SKU applies to.
    pub kind: ResourceSkuKind,
    /// Locations that offer the SKU.
    #[serde(default)]
    pub locations: Vec<String>,
    /// Availability zones offering the SKU in the cache location.
    #[serde(default)]
    pub zones: Vec<String>,
    /// Reported capabilities.
    #[serde(default)]
    pub capabilities: Vec<SkuCapability>,
}

impl ResourceSku {
    /// Returns the raw value of a capability.
    #[must_use]
    pub fn capability(&self, name: &str) -> Option<&str> {
        self.capabilities
            .iter()
            .find(|cap| cap.name == name)
            .map(|cap| cap.value.as_str())
    }

    /// Returns `true` when the capability is present with value `True`.
    #[must_use]
    pub fn has_capability(&self, name: &str) -> bool {
        self.capability(name)
            .is_some_and(|value| value.eq_ignore_ascii_case("true"))
    }

    /// Returns `true` when a numeric capability is at least `minimum`.
    ///
    /// Fractional values such as `3.5` compare on their integer part.
    #[must_use]
    pub fn has_capability_with_capacity(&self, name: &str, minimum: u64) -> bool {
        self.capability(name)
            .and_then(|value| value.split('.').next())
            .and_then(|whole| whole.parse::<u64>().ok())
            .is_some_and(|capacity| capacity >= minimum)
    }

    /// Returns `true` when the SKU is offered in `zone`.
    #[must_use]
    pub fn supports_zone(&self, zone: &str) -> bool {
        self.zones.iter().any(|offered| offered == zone)
    }

    fn offered_in(&self, location: &str) -> bool {
        self.locations.is_empty()
            || self
                .locations
                .iter()
                .any(|offered| offered.eq_ignore_ascii_case(location))
    }
}

/// Errors raised by SKU lookups.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SkuError {
    /// No SKU with the requested name and kind is offered in the location.
    #[error("resource sku with name '{name}' and category '{kind}' not found in location '{location}'")]
    NotFound {
        /// Requested SKU name.
        name: String,
        /// Requested resource kind.
        kind: ResourceSkuKind,
        /// Location of the cache.
        location: String,
    },
}

/// Immutable lookup from SKU name and kind to capability metadata.
#[derive(Clone, Debug, Default)]
pub struct SkuCache {
    location: String,
    skus: BTreeMap<(ResourceSkuKind, String), ResourceSku>,
}

impl SkuCache {
    /// Builds a cache for `location`, dropping SKUs not offered there.
    #[must_use]
    pub fn new(skus: impl IntoIterator<Item = ResourceSku>, location: impl Into<String>) -> Self {
        let cache_location = location.into();
        let entries = skus
            .into_iter()
            .filter(|sku| sku.offered_in(&cache_location))
            .map(|sku| ((sku.kind, sku.name.clone()), sku))
            .collect();
        Self {
            location: cache_location,
            skus: entries,
        }
    }

    /// Location the cache was built for.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Returns `true` when the cache holds no SKUs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.skus.is_empty()
    }

    /// Looks up a SKU by name and kind.
    ///
    /// # Errors
    ///
    /// Returns [`SkuError::NotFound`] when the SKU is not offered in the
    /// cache location.
    pub fn get(&self, name: &str, kind: ResourceSkuKind) -> Result<&ResourceSku, SkuError> {
        self.skus
            .get(&(kind, name.to_owned()))
            .ok_or_else(|| SkuError::NotFound {
                name: name.to_owned(),
                kind,
                location: self.location.clone(),
            })
    }
}

#[cfg(test)]
mod tests;
