#![allow(dead_code)]

use bllvm_resolver::module::{
    ModuleContainer, Resource, ResourceBuilder, ResourceId, Version, VersionRange,
};
use bllvm_resolver::{CollisionPolicy, ResolverConfig};

pub fn v(major: u32, minor: u32) -> Version {
    Version::new(major, minor, 0)
}

pub fn range(s: &str) -> VersionRange {
    VersionRange::parse(s).unwrap()
}

pub fn any() -> VersionRange {
    VersionRange::default()
}

pub fn module(name: &str, major: u32, minor: u32) -> ResourceBuilder {
    Resource::builder(name, v(major, minor))
}

pub fn install(container: &ModuleContainer, builder: ResourceBuilder) -> ResourceId {
    container.install(builder).unwrap().id
}

pub fn container_with(policy: CollisionPolicy) -> ModuleContainer {
    ModuleContainer::new(ResolverConfig {
        collision_policy: policy,
        ..ResolverConfig::default()
    })
}

/// Providers each requested resource is wired to, in id order
pub fn providers_of(container: &ModuleContainer, id: ResourceId) -> Vec<ResourceId> {
    container
        .wiring(id)
        .map(|w| w.providers().into_iter().collect())
        .unwrap_or_default()
}
