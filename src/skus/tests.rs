//! Unit tests for the SKU cache.

use super::*;
use rstest::{fixture, rstest};

fn capability(name: &str, value: &str) -> SkuCapability {
    SkuCapability {
        name: name.to_owned(),
        value: value.to_owned(),
    }
}

#[fixture]
fn d2s() -> ResourceSku {
    ResourceSku {
        name: String::from("Standard_D2s_v3"),
        kind: ResourceSkuKind::VirtualMachines,
        locations: vec![String::from("westeurope")],
        zones: vec![String::from("1"), String::from("2")],
        capabilities: vec![
            capability(ACCELERATED_NETWORKING, "True"),
            capability(PREMIUM_IO, "True"),
            capability(EPHEMERAL_OS_DISK, "False"),
            capability(VCPUS, "2"),
            capability(MEMORY_GB, "8.5"),
        ],
    }
}

#[rstest]
fn get_returns_sku_for_matching_kind(d2s: ResourceSku) {
    let cache = SkuCache::new([d2s.clone()], "westeurope");
    let found = cache
        .get("Standard_D2s_v3", ResourceSkuKind::VirtualMachines)
        .expect("sku should be cached");
    assert_eq!(found, &d2s);
}

#[rstest]
fn get_reports_missing_kind(d2s: ResourceSku) {
    let cache = SkuCache::new([d2s], "westeurope");
    let err = cache
        .get("Standard_D2s_v3", ResourceSkuKind::Disks)
        .expect_err("disks kind is absent");
    assert_eq!(
        err.to_string(),
        "resource sku with name 'Standard_D2s_v3' and category 'disks' not found in location 'westeurope'"
    );
}

#[rstest]
fn new_drops_skus_from_other_locations(d2s: ResourceSku) {
    let cache = SkuCache::new([d2s], "eastus");
    assert!(cache.is_empty());
    assert_eq!(cache.location(), "eastus");
}

#[rstest]
#[case(ACCELERATED_NETWORKING, true)]
#[case(PREMIUM_IO, true)]
#[case(EPHEMERAL_OS_DISK, false)]
#[case("UltraSSDAvailable", false)]
fn has_capability_requires_true_value(
    d2s: ResourceSku,
    #[case] name: &str,
    #[case] expected: bool,
) {
    assert_eq!(d2s.has_capability(name), expected);
}

#[rstest]
#[case(VCPUS, 2, true)]
#[case(VCPUS, 4, false)]
#[case(MEMORY_GB, 8, true)]
#[case(MEMORY_GB, 9, false)]
#[case(MAX_FAULT_DOMAINS, 1, false)]
fn has_capability_with_capacity_compares_numbers(
    d2s: ResourceSku,
    #[case] name: &str,
    #[case] minimum: u64,
    #[case] expected: bool,
) {
    assert_eq!(d2s.has_capability_with_capacity(name, minimum), expected);
}

#[rstest]
fn supports_zone_checks_offered_zones(d2s: ResourceSku) {
    assert!(d2s.supports_zone("2"));
    assert!(!d2s.supports_zone("3"));
}

#[rstest]
fn skus_deserialise_from_catalogue_json() {
    let json = r#"[{
        "name": "Premium_LRS",
        "kind": "disks",
        "locations": ["westeurope"],
        "capabilities": [{"name": "MaxSizeGiB", "value": "32767"}]
    }]"#;
    let skus: Vec<ResourceSku> = serde_json::from_str(json).expect("catalogue should parse");
    let cache = SkuCache::new(skus, "westeurope");
    let disk = cache
        .get("Premium_LRS", ResourceSkuKind::Disks)
        .expect("disk sku should be cached");
    assert!(disk.has_capability_with_capacity("MaxSizeGiB", 1024));
    assert!(disk.zones.is_empty());
}
