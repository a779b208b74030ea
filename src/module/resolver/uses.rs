//! Uses-constraint checking
//!
//! A resource's class space is every package wire reachable through its
//! transitive wire closure. Within one class space each package name must come
//! from exactly one provider.

use std::collections::{BTreeMap, BTreeSet};

use crate::module::resource::ResourceId;
use crate::module::wiring::{Wire, WiringState};

/// Two providers of one package visible to the same resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsesViolation {
    /// Resource whose class space sees the package twice
    pub resource: ResourceId,
    pub package: String,
    /// Every provider of `package` reachable from `resource`
    pub providers: Vec<ResourceId>,
}

/// Layered view of wires: the search in progress, then the batch's pending
/// wirings, then the published state
pub(crate) struct WireView<'a> {
    pub tentative: &'a BTreeMap<ResourceId, Vec<Wire>>,
    pub pending: &'a BTreeMap<ResourceId, Vec<Wire>>,
    pub state: &'a WiringState,
}

impl<'a> WireView<'a> {
    pub fn wires_of(&self, id: ResourceId) -> &'a [Wire] {
        if let Some(wires) = self.tentative.get(&id) {
            return wires;
        }
        if let Some(wires) = self.pending.get(&id) {
            return wires;
        }
        match self.state.get(id) {
            Some(wiring) => &wiring.wires,
            None => &[],
        }
    }

    /// Package name to providers over the closure of `root`
    pub fn package_sources(&self, root: ResourceId) -> BTreeMap<&'a str, BTreeSet<ResourceId>> {
        let mut sources: BTreeMap<&'a str, BTreeSet<ResourceId>> = BTreeMap::new();
        let mut visited = BTreeSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            for wire in self.wires_of(id) {
                if let Some(package) = wire.package_name() {
                    sources.entry(package).or_default().insert(wire.provider);
                }
                if !visited.contains(&wire.provider) {
                    stack.push(wire.provider);
                }
            }
        }
        sources
    }

    /// First package with more than one provider in the closure of `root`
    pub fn check(&self, root: ResourceId) -> Result<(), UsesViolation> {
        for (package, providers) in self.package_sources(root) {
            if providers.len() > 1 {
                return Err(UsesViolation {
                    resource: root,
                    package: package.to_string(),
                    providers: providers.into_iter().collect(),
                });
            }
        }
        Ok(())
    }
}

/// Check every published wiring's class space
pub fn verify_consistency(state: &WiringState) -> Result<(), UsesViolation> {
    let empty = BTreeMap::new();
    let view = WireView {
        tentative: &empty,
        pending: &empty,
        state,
    };
    for id in state.resolved() {
        view.check(id)?;
    }
    Ok(())
}
