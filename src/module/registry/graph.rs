//! Installed resource graph
//!
//! The container keeps one `ResourceGraph` behind a lock and hands out cheap
//! `Arc` snapshots to the resolver; mutations clone on write.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::module::resource::{Resource, ResourceId};

/// Installed and removal-pending resources
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    resources: BTreeMap<ResourceId, Arc<Resource>>,
    /// Uninstalled or superseded revisions that are still resolved
    removal_pending: BTreeMap<ResourceId, Arc<Resource>>,
    next_id: u64,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next resource id; ids start at 1
    pub fn allocate_id(&mut self) -> ResourceId {
        self.next_id += 1;
        ResourceId(self.next_id)
    }

    pub fn insert(&mut self, resource: Arc<Resource>) {
        self.resources.insert(resource.id, resource);
    }

    /// Remove an installed resource; returns it if it was installed
    pub fn remove(&mut self, id: ResourceId) -> Option<Arc<Resource>> {
        self.resources.remove(&id)
    }

    /// Keep a removed revision around until it is refreshed away
    pub fn mark_removal_pending(&mut self, resource: Arc<Resource>) {
        self.removal_pending.insert(resource.id, resource);
    }

    /// Drop removal-pending revisions
    pub fn purge(&mut self, ids: impl IntoIterator<Item = ResourceId>) -> Vec<ResourceId> {
        ids.into_iter()
            .filter(|id| self.removal_pending.remove(id).is_some())
            .collect()
    }

    /// Look up an installed or removal-pending resource
    pub fn get(&self, id: ResourceId) -> Option<&Arc<Resource>> {
        self.resources
            .get(&id)
            .or_else(|| self.removal_pending.get(&id))
    }

    /// Whether `id` is currently installed (not removal-pending)
    pub fn is_installed(&self, id: ResourceId) -> bool {
        self.resources.contains_key(&id)
    }

    pub fn is_removal_pending(&self, id: ResourceId) -> bool {
        self.removal_pending.contains_key(&id)
    }

    /// Installed resources in id order
    pub fn installed(&self) -> impl Iterator<Item = &Arc<Resource>> {
        self.resources.values()
    }

    pub fn removal_pending(&self) -> impl Iterator<Item = &Arc<Resource>> {
        self.removal_pending.values()
    }

    /// Installed resources with the given symbolic name
    pub fn by_symbolic_name(&self, name: &str) -> Vec<Arc<Resource>> {
        self.resources
            .values()
            .filter(|r| r.symbolic_name == name)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::version::Version;

    #[test]
    fn test_ids_are_sequential_and_lookup_covers_pending() {
        let mut graph = ResourceGraph::new();
        let a = graph.allocate_id();
        let b = graph.allocate_id();
        assert_eq!((a, b), (ResourceId(1), ResourceId(2)));

        graph.insert(Arc::new(Resource::builder("a", Version::new(1, 0, 0)).build(a)));
        graph.insert(Arc::new(Resource::builder("a", Version::new(2, 0, 0)).build(b)));
        assert_eq!(graph.by_symbolic_name("a").len(), 2);

        let old = graph.remove(a).unwrap();
        graph.mark_removal_pending(old);
        assert!(!graph.is_installed(a));
        assert!(graph.is_removal_pending(a));
        assert!(graph.get(a).is_some());
        assert_eq!(graph.by_symbolic_name("a").len(), 1);

        assert_eq!(graph.purge([a, b]), vec![a]);
        assert!(graph.get(a).is_none());
    }
}
