//! Candidate index
//!
//! Capabilities are grouped by namespace and pre-sorted in preference order:
//! resolved owners first, then higher version, then owner id, then declaration
//! order. `find_candidates` is a linear filter pass over one namespace, so its
//! output keeps that order.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::module::capability::{Capability, Requirement};
use crate::module::registry::ResourceGraph;
use crate::module::resource::Resource;
use crate::module::version::Version;
use crate::module::wiring::WiringState;

struct Entry {
    capability: Arc<Capability>,
    resolved: bool,
    version: Version,
    declared: usize,
}

impl Entry {
    fn preference(&self, other: &Entry) -> Ordering {
        other
            .resolved
            .cmp(&self.resolved)
            .then_with(|| other.version.cmp(&self.version))
            .then_with(|| self.capability.owner.cmp(&other.capability.owner))
            .then_with(|| self.declared.cmp(&other.declared))
    }
}

/// Namespace-keyed capability index over one graph snapshot
pub struct CandidateIndex {
    by_namespace: HashMap<String, Vec<Arc<Capability>>>,
}

impl CandidateIndex {
    /// Index installed resources plus removal-pending ones that are still resolved
    pub fn build(graph: &ResourceGraph, state: &WiringState) -> Self {
        let mut grouped: HashMap<String, Vec<Entry>> = HashMap::new();
        let providers = graph
            .installed()
            .chain(graph.removal_pending().filter(|r| state.is_resolved(r.id)));
        for resource in providers {
            let resolved = state.is_resolved(resource.id);
            for (declared, capability) in resource.capabilities.iter().enumerate() {
                grouped
                    .entry(capability.namespace.clone())
                    .or_default()
                    .push(Entry {
                        version: capability_version(capability, resource),
                        capability: Arc::clone(capability),
                        resolved,
                        declared,
                    });
            }
        }

        let by_namespace = grouped
            .into_iter()
            .map(|(ns, mut entries)| {
                entries.sort_by(Entry::preference);
                (ns, entries.into_iter().map(|e| e.capability).collect())
            })
            .collect();
        Self { by_namespace }
    }

    /// Capabilities matching `requirement`, in preference order
    pub fn find_candidates(&self, requirement: &Requirement) -> Vec<Arc<Capability>> {
        self.by_namespace
            .get(&requirement.namespace)
            .map(|caps| {
                caps.iter()
                    .filter(|c| requirement.matches(c))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of indexed capabilities in `namespace`
    pub fn namespace_len(&self, namespace: &str) -> usize {
        self.by_namespace.get(namespace).map_or(0, Vec::len)
    }
}

/// The capability's own `version` attribute, falling back to its owner's version
fn capability_version(capability: &Capability, owner: &Resource) -> Version {
    capability
        .version()
        .cloned()
        .unwrap_or_else(|| owner.version.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::capability::namespace;
    use crate::module::resource::ResourceId;
    use crate::module::version::VersionRange;
    use crate::module::wiring::Wiring;
    use std::collections::BTreeMap;

    fn exporter(graph: &mut ResourceGraph, name: &str, version: Version) -> ResourceId {
        let id = graph.allocate_id();
        graph.insert(Arc::new(
            Resource::builder(name, Version::new(1, 0, 0))
                .export_package("p", version)
                .build(id),
        ));
        id
    }

    #[test]
    fn test_candidates_prefer_resolved_then_version_then_id() {
        let mut graph = ResourceGraph::new();
        let low = exporter(&mut graph, "low", Version::new(1, 0, 0));
        let high_a = exporter(&mut graph, "high.a", Version::new(1, 5, 0));
        let high_b = exporter(&mut graph, "high.b", Version::new(1, 5, 0));
        let resolved = exporter(&mut graph, "resolved", Version::new(1, 1, 0));
        let too_new = exporter(&mut graph, "too.new", Version::new(2, 5, 0));

        let mut pending = BTreeMap::new();
        pending.insert(resolved, Arc::new(Wiring::new(resolved, Vec::new())));
        let state = WiringState::new().publish(&pending);

        let index = CandidateIndex::build(&graph, &state);
        let req = Requirement::package("p", &VersionRange::parse("[1.0,2.0)").unwrap());
        let owners: Vec<ResourceId> = index
            .find_candidates(&req)
            .iter()
            .map(|c| c.owner)
            .collect();
        assert_eq!(owners, vec![resolved, high_a, high_b, low]);
        assert!(!owners.contains(&too_new));
        assert_eq!(index.namespace_len(namespace::PACKAGE), 5);
    }

    #[test]
    fn test_unresolved_removal_pending_resources_are_not_indexed() {
        let mut graph = ResourceGraph::new();
        let id = exporter(&mut graph, "gone", Version::new(1, 0, 0));
        let removed = graph.remove(id).unwrap();
        graph.mark_removal_pending(removed);

        let index = CandidateIndex::build(&graph, &WiringState::new());
        assert!(index
            .find_candidates(&Requirement::package("p", &VersionRange::default()))
            .is_empty());
    }
}
