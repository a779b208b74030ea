//! Property tests for resolver invariants
//!
//! Random module sets over a handful of package names and versions, so that
//! version ranges, uses conflicts and singleton groups collide often.

mod common;

use bllvm_resolver::module::resolver::verify_consistency;
use bllvm_resolver::module::wiring::WiringSummary;
use bllvm_resolver::module::{ModuleContainer, ResourceBuilder, ResourceId, VersionRange};
use bllvm_resolver::CollisionPolicy;
use common::*;
use proptest::prelude::*;
use proptest::prelude::any;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct ModuleShape {
    name: u8,
    version: u32,
    singleton: bool,
    exports: Vec<(u8, u32)>,
    imports: Vec<(u8, u32, u32, bool)>,
}

fn module_shape() -> impl Strategy<Value = ModuleShape> {
    (
        0u8..4,
        1u32..4,
        any::<bool>(),
        prop::collection::vec((0u8..4, 1u32..4), 0..3),
        prop::collection::vec((0u8..4, 1u32..4, 1u32..3, any::<bool>()), 0..3),
    )
        .prop_map(|(name, version, singleton, exports, imports)| ModuleShape {
            name,
            version,
            singleton,
            exports,
            imports,
        })
}

fn builder(shape: &ModuleShape) -> ResourceBuilder {
    let mut b = module(&format!("m{}", shape.name), shape.version, 0).singleton(shape.singleton);
    for (pkg, version) in &shape.exports {
        b = b.export_package_uses(&format!("p{}", pkg), v(*version, 0), &["p0", "p1", "p2", "p3"]);
    }
    for (pkg, floor, width, optional) in &shape.imports {
        let range = VersionRange::half_open(v(*floor, 0), v(floor + width, 0));
        let name = format!("p{}", pkg);
        b = if *optional {
            b.import_package_optional(&name, range)
        } else {
            b.import_package(&name, range)
        };
    }
    b
}

fn resolve_all(shapes: &[ModuleShape]) -> (ModuleContainer, Vec<ResourceId>) {
    let container = container_with(CollisionPolicy::Multiple);
    let ids: Vec<ResourceId> = shapes.iter().map(|s| install(&container, builder(s))).collect();
    let _ = container.resolve(&ids);
    (container, ids)
}

fn summaries(container: &ModuleContainer) -> Vec<WiringSummary> {
    container
        .wiring_state()
        .wirings()
        .map(|w| w.summary())
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_published_wirings_are_consistent(
        shapes in prop::collection::vec(module_shape(), 1..8),
    ) {
        let (container, _) = resolve_all(&shapes);
        prop_assert!(verify_consistency(&container.wiring_state()).is_ok());
    }

    #[test]
    fn test_at_most_one_singleton_per_name(shapes in prop::collection::vec(module_shape(), 1..8)) {
        let (container, ids) = resolve_all(&shapes);
        let mut resolved_singletons: BTreeMap<String, usize> = BTreeMap::new();
        for id in ids {
            let resource = container.resource(id).unwrap();
            if resource.is_singleton && container.is_resolved(id) {
                *resolved_singletons.entry(resource.symbolic_name.clone()).or_default() += 1;
            }
        }
        prop_assert!(resolved_singletons.values().all(|count| *count == 1));
    }

    #[test]
    fn test_resolution_is_reproducible(shapes in prop::collection::vec(module_shape(), 1..8)) {
        let (first, _) = resolve_all(&shapes);
        let (second, _) = resolve_all(&shapes);
        prop_assert_eq!(summaries(&first), summaries(&second));
    }

    #[test]
    fn test_mandatory_requirements_are_wired(
        shapes in prop::collection::vec(module_shape(), 1..8),
    ) {
        let (container, ids) = resolve_all(&shapes);
        for (shape, id) in shapes.iter().zip(ids) {
            let Some(wiring) = container.wiring(id) else { continue };
            let resource = container.resource(id).unwrap();
            let mandatory = shape.imports.iter().filter(|(_, _, _, optional)| !optional).count();
            let wired = resource
                .requirements
                .iter()
                .filter(|r| !r.is_optional())
                .filter(|r| wiring.wires_for(r).next().is_some())
                .count();
            prop_assert_eq!(wired, mandatory);
        }
    }
}
