//! Wires, wirings and the published wiring state
//!
//! A [`WiringState`] is an immutable snapshot; publishing a batch produces a new
//! state which the container swaps in atomically.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::module::capability::{Capability, Requirement};
use crate::module::report::ResolutionReport;
use crate::module::resource::ResourceId;

/// A requirement bound to a provider capability
#[derive(Debug, Clone, PartialEq)]
pub struct Wire {
    /// Owner of `requirement`
    pub requirer: ResourceId,
    pub requirement: Arc<Requirement>,
    /// Owner of `capability`
    pub provider: ResourceId,
    /// Capability the requirement was bound to
    pub capability: Arc<Capability>,
}

impl Wire {
    pub fn new(requirement: Arc<Requirement>, capability: Arc<Capability>) -> Self {
        Self {
            requirer: requirement.owner,
            provider: capability.owner,
            requirement,
            capability,
        }
    }

    /// Package name carried by this wire, if it is a package wire
    pub fn package_name(&self) -> Option<&str> {
        self.capability.package_name()
    }
}

/// Resolved wiring of one resource
#[derive(Debug, Clone, PartialEq)]
pub struct Wiring {
    /// The wired resource
    pub resource: ResourceId,
    /// Wires in requirement declaration order
    pub wires: Vec<Wire>,
    /// Packages this resource exports whose import was wired elsewhere
    pub substitutions: BTreeMap<String, ResourceId>,
}

impl Wiring {
    pub fn new(resource: ResourceId, wires: Vec<Wire>) -> Self {
        Self {
            resource,
            wires,
            substitutions: BTreeMap::new(),
        }
    }

    /// Distinct providers this resource is wired to, excluding itself
    pub fn providers(&self) -> BTreeSet<ResourceId> {
        self.wires
            .iter()
            .map(|w| w.provider)
            .filter(|p| *p != self.resource)
            .collect()
    }

    /// Wires for the requirement at `requirement` (by pointer identity)
    pub fn wires_for<'a>(
        &'a self,
        requirement: &'a Arc<Requirement>,
    ) -> impl Iterator<Item = &'a Wire> + 'a {
        self.wires
            .iter()
            .filter(move |w| Arc::ptr_eq(&w.requirement, requirement))
    }

    /// Compact serializable form
    pub fn summary(&self) -> WiringSummary {
        WiringSummary {
            resource: self.resource,
            wires: self
                .wires
                .iter()
                .map(|w| WireSummary {
                    namespace: w.requirement.namespace.clone(),
                    requirement: w.requirement.to_string(),
                    provider: w.provider,
                    capability: w.capability.to_string(),
                })
                .collect(),
            substitutions: self.substitutions.clone(),
        }
    }
}

/// Serializable view of a wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireSummary {
    pub namespace: String,
    pub requirement: String,
    pub provider: ResourceId,
    pub capability: String,
}

/// Serializable view of a wiring
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WiringSummary {
    pub resource: ResourceId,
    pub wires: Vec<WireSummary>,
    pub substitutions: BTreeMap<String, ResourceId>,
}

/// Immutable published wiring state
#[derive(Debug, Clone, Default)]
pub struct WiringState {
    /// Bumped on every publish
    pub generation: u64,
    wirings: BTreeMap<ResourceId, Arc<Wiring>>,
}

impl WiringState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ResourceId) -> Option<&Arc<Wiring>> {
        self.wirings.get(&id)
    }

    pub fn is_resolved(&self, id: ResourceId) -> bool {
        self.wirings.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.wirings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wirings.is_empty()
    }

    pub fn resolved(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.wirings.keys().copied()
    }

    pub fn wirings(&self) -> impl Iterator<Item = &Arc<Wiring>> {
        self.wirings.values()
    }

    /// New state with `pending` added
    pub fn publish(&self, pending: &BTreeMap<ResourceId, Arc<Wiring>>) -> WiringState {
        let mut wirings = self.wirings.clone();
        for (id, wiring) in pending {
            wirings.insert(*id, Arc::clone(wiring));
        }
        WiringState {
            generation: self.generation + 1,
            wirings,
        }
    }

    /// New state with the wirings of `ids` discarded
    pub fn without(&self, ids: &BTreeSet<ResourceId>) -> WiringState {
        let wirings = self
            .wirings
            .iter()
            .filter(|(id, _)| !ids.contains(id))
            .map(|(id, w)| (*id, Arc::clone(w)))
            .collect();
        WiringState {
            generation: self.generation + 1,
            wirings,
        }
    }

    /// `roots` plus every resolved resource transitively wired to one of them
    pub fn dependents_closure(&self, roots: &BTreeSet<ResourceId>) -> BTreeSet<ResourceId> {
        let mut closure = roots.clone();
        loop {
            let before = closure.len();
            for wiring in self.wirings.values() {
                if closure.contains(&wiring.resource) {
                    continue;
                }
                if wiring.wires.iter().any(|w| closure.contains(&w.provider)) {
                    closure.insert(wiring.resource);
                }
            }
            if closure.len() == before {
                return closure;
            }
        }
    }
}

/// Result of a successful `resolve` call
///
/// `wirings` holds the wiring of every requested resource that is resolved
/// (newly or previously); `report` explains the ones that are not.
#[derive(Debug, Clone, Default)]
pub struct WiringBatch {
    pub wirings: BTreeMap<ResourceId, Arc<Wiring>>,
    pub report: ResolutionReport,
}

impl WiringBatch {
    pub fn get(&self, id: ResourceId) -> Option<&Arc<Wiring>> {
        self.wirings.get(&id)
    }

    pub fn is_resolved(&self, id: ResourceId) -> bool {
        self.wirings.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::resource::Resource;
    use crate::module::version::{Version, VersionRange};

    fn wired(consumer: &Resource, provider: &Resource) -> Arc<Wiring> {
        let req = Arc::clone(&consumer.requirements[0]);
        let cap = Arc::clone(provider.capabilities.last().unwrap());
        Arc::new(Wiring::new(consumer.id, vec![Wire::new(req, cap)]))
    }

    #[test]
    fn test_publish_and_dependents_closure() {
        let a = Resource::builder("a", Version::new(1, 0, 0))
            .export_package("pa", Version::new(1, 0, 0))
            .build(ResourceId(1));
        let b = Resource::builder("b", Version::new(1, 0, 0))
            .import_package("pa", VersionRange::default())
            .export_package("pb", Version::new(1, 0, 0))
            .build(ResourceId(2));
        let c = Resource::builder("c", Version::new(1, 0, 0))
            .import_package("pb", VersionRange::default())
            .build(ResourceId(3));

        let mut pending = BTreeMap::new();
        pending.insert(a.id, Arc::new(Wiring::new(a.id, Vec::new())));
        pending.insert(b.id, wired(&b, &a));
        pending.insert(c.id, wired(&c, &b));

        let state = WiringState::new().publish(&pending);
        assert_eq!(state.generation, 1);
        assert_eq!(state.len(), 3);
        assert_eq!(state.get(b.id).unwrap().providers(), BTreeSet::from([a.id]));

        let closure = state.dependents_closure(&BTreeSet::from([a.id]));
        assert_eq!(closure, BTreeSet::from([a.id, b.id, c.id]));

        let after = state.without(&BTreeSet::from([c.id]));
        assert!(!after.is_resolved(c.id));
        assert!(after.is_resolved(a.id));
        assert_eq!(after.generation, 2);
    }
}
