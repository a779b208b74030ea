//! Module container
//!
//! Owns the installed resource graph and the published wiring state, and
//! orchestrates resolution:
//!
//! - structural changes (install, update, uninstall) take the per-resource locks
//!   of the resources they touch and swap in a new graph snapshot
//! - `resolve` runs the resolver lock-free on snapshots, then locks every
//!   resource it wires plus every provider it references, re-validates the
//!   snapshot against current state and publishes with a compare-and-swap;
//!   stale snapshots are retried up to `max_resolve_attempts`
//! - re-resolving an already resolved batch only reads the published state

use arc_swap::{ArcSwap, Guard};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{CollisionPolicy, ResolverConfig};
use crate::module::events::{ContainerEvent, EventManager, EventType};
use crate::module::hooks::{HookChain, ShrinkableCollection};
use crate::module::lockset::LockSet;
use crate::module::registry::{DescriptorSet, ResourceGraph};
use crate::module::report::{EntryData, EntryType, ReportEntry, ResolutionReport};
use crate::module::resolver::{ResolveContext, Resolver, ResolverOutcome};
use crate::module::resource::{Resource, ResourceBuilder, ResourceId};
use crate::module::traits::{
    CollisionHook, CollisionOperation, HookError, ReportListener, ResolveError, ResolverError,
    ResolverHookFactory,
};
use crate::module::wiring::{Wiring, WiringBatch, WiringState};

/// Why a publish attempt did not go through
enum PublishError {
    /// Current state no longer matches the snapshot the batch was resolved on
    Stale(String),
    /// A lock could not be acquired in time
    LockTimeout(ResourceId),
}

/// Module container façade
pub struct ModuleContainer {
    config: ResolverConfig,
    graph: RwLock<Arc<ResourceGraph>>,
    state: ArcSwap<WiringState>,
    locks: LockSet,
    resolver_hooks: RwLock<Vec<Arc<dyn ResolverHookFactory>>>,
    collision_hooks: RwLock<Vec<Arc<dyn CollisionHook>>>,
    listeners: RwLock<Vec<Arc<dyn ReportListener>>>,
    events: EventManager,
}

impl Default for ModuleContainer {
    fn default() -> Self {
        Self::new(ResolverConfig::default())
    }
}

impl ModuleContainer {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            graph: RwLock::new(Arc::new(ResourceGraph::new())),
            state: ArcSwap::from_pointee(WiringState::new()),
            locks: LockSet::new(),
            resolver_hooks: RwLock::new(Vec::new()),
            collision_hooks: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
            events: EventManager::new(),
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Register a resolver hook factory; hooks run in registration order
    pub fn add_resolver_hook(&self, factory: Arc<dyn ResolverHookFactory>) {
        debug!("Registered resolver hook {}", factory.name());
        self.resolver_hooks.write().push(factory);
    }

    pub fn add_collision_hook(&self, hook: Arc<dyn CollisionHook>) {
        self.collision_hooks.write().push(hook);
    }

    pub fn add_report_listener(&self, listener: Arc<dyn ReportListener>) {
        self.listeners.write().push(listener);
    }

    /// Subscribe to container events; an empty slice means every event
    pub fn subscribe_events(
        &self,
        types: &[EventType],
    ) -> mpsc::UnboundedReceiver<ContainerEvent> {
        self.events.subscribe(types)
    }

    /// Current graph snapshot
    pub fn graph(&self) -> Arc<ResourceGraph> {
        Arc::clone(&self.graph.read())
    }

    /// Current published wiring state
    pub fn wiring_state(&self) -> Arc<WiringState> {
        self.state.load_full()
    }

    pub fn resource(&self, id: ResourceId) -> Option<Arc<Resource>> {
        self.graph.read().get(id).cloned()
    }

    /// Installed resources in id order
    pub fn resources(&self) -> Vec<Arc<Resource>> {
        self.graph.read().installed().cloned().collect()
    }

    pub fn wiring(&self, id: ResourceId) -> Option<Arc<Wiring>> {
        self.state.load().get(id).cloned()
    }

    pub fn is_resolved(&self, id: ResourceId) -> bool {
        self.state.load().is_resolved(id)
    }

    /// The per-resource lock set shared by resolution and structural changes
    pub fn locks(&self) -> &LockSet {
        &self.locks
    }

    /// Install a new resource
    pub fn install(&self, builder: ResourceBuilder) -> Result<Arc<Resource>, ResolverError> {
        for _ in 0..self.config.max_resolve_attempts {
            let snapshot = self.graph();
            let same_name = snapshot.by_symbolic_name(builder.symbolic_name());
            let _guard = self
                .locks
                .lock_all(same_name.iter().map(|r| r.id), self.config.lock_timeout())?;

            let provisional = Arc::new(builder.clone().build(ResourceId::UNASSIGNED));
            let collisions = self.collisions(
                CollisionOperation::Installing,
                &provisional,
                &same_name,
                None,
            );
            if !collisions.is_empty() {
                return Err(collision_error(&provisional, collisions));
            }

            let resource = {
                let mut graph = self.graph.write();
                if !same_ids(&graph.by_symbolic_name(builder.symbolic_name()), &same_name) {
                    debug!(
                        "Install of {} raced a concurrent change; retrying",
                        builder.symbolic_name()
                    );
                    continue;
                }
                let graph = Arc::make_mut(&mut graph);
                let id = graph.allocate_id();
                let resource = Arc::new(builder.clone().build(id));
                graph.insert(Arc::clone(&resource));
                resource
            };

            info!("Installed {}", resource);
            self.events.publish(ContainerEvent::Installed(resource.id));
            return Ok(resource);
        }
        Err(ResolverError::Conflict(format!(
            "install of {} kept racing concurrent changes",
            builder.symbolic_name()
        )))
    }

    /// Validate and install every resource in a descriptor set, in file order
    pub fn install_descriptors(
        &self,
        set: &DescriptorSet,
    ) -> Result<Vec<Arc<Resource>>, ResolverError> {
        set.validate()?;
        set.resources
            .iter()
            .map(|d| self.install(d.to_builder()?))
            .collect()
    }

    /// Replace `id` with a new revision built from `builder`
    ///
    /// A resolved old revision stays resolved as removal pending until refreshed.
    pub fn update(
        &self,
        id: ResourceId,
        builder: ResourceBuilder,
    ) -> Result<Arc<Resource>, ResolverError> {
        for _ in 0..self.config.max_resolve_attempts {
            let snapshot = self.graph();
            if !snapshot.is_installed(id) {
                return Err(ResolverError::ResourceNotFound(id));
            }
            let same_name = snapshot.by_symbolic_name(builder.symbolic_name());
            let _guard = self.locks.lock_all(
                same_name.iter().map(|r| r.id).chain(std::iter::once(id)),
                self.config.lock_timeout(),
            )?;

            let provisional = Arc::new(builder.clone().build(ResourceId::UNASSIGNED));
            let collisions =
                self.collisions(CollisionOperation::Updating, &provisional, &same_name, Some(id));
            if !collisions.is_empty() {
                return Err(collision_error(&provisional, collisions));
            }

            let resolved = self.is_resolved(id);
            let resource = {
                let mut graph = self.graph.write();
                if !graph.is_installed(id)
                    || !same_ids(&graph.by_symbolic_name(builder.symbolic_name()), &same_name)
                {
                    continue;
                }
                let graph = Arc::make_mut(&mut graph);
                let new_id = graph.allocate_id();
                let resource = Arc::new(builder.clone().build(new_id));
                graph.insert(Arc::clone(&resource));
                if let Some(old) = graph.remove(id) {
                    if resolved {
                        graph.mark_removal_pending(old);
                    }
                }
                resource
            };

            info!("Updated {} to {}", id, resource);
            self.events.publish(ContainerEvent::Updated {
                old: id,
                new: resource.id,
            });
            return Ok(resource);
        }
        Err(ResolverError::Conflict(format!(
            "update of {} kept racing concurrent changes",
            id
        )))
    }

    /// Remove an installed resource
    ///
    /// A resolved resource stays resolved as removal pending until refreshed.
    pub fn uninstall(&self, id: ResourceId) -> Result<(), ResolverError> {
        let _guard = self.locks.lock_all([id], self.config.lock_timeout())?;
        let resolved = self.is_resolved(id);
        {
            let mut graph = self.graph.write();
            if !graph.is_installed(id) {
                return Err(ResolverError::ResourceNotFound(id));
            }
            let graph = Arc::make_mut(&mut graph);
            if let Some(old) = graph.remove(id) {
                if resolved {
                    graph.mark_removal_pending(old);
                }
            }
        }
        info!("Uninstalled {}", id);
        self.events.publish(ContainerEvent::Uninstalled(id));
        Ok(())
    }

    /// Discard the wirings of `ids`, of every removal-pending revision, and of
    /// everything transitively wired to them, in one step
    ///
    /// Returns the resources that lost their wiring. Removal-pending revisions
    /// are dropped from the graph.
    pub fn refresh(&self, ids: &[ResourceId]) -> Result<Vec<ResourceId>, ResolverError> {
        for _ in 0..self.config.max_resolve_attempts {
            let graph = self.graph();
            let current = self.state.load_full();
            let roots: BTreeSet<ResourceId> = ids
                .iter()
                .copied()
                .chain(graph.removal_pending().map(|r| r.id))
                .filter(|id| current.is_resolved(*id))
                .collect();
            let closure = current.dependents_closure(&roots);

            let _guard = self
                .locks
                .lock_all(closure.iter().copied(), self.config.lock_timeout())?;
            let next = Arc::new(current.without(&closure));
            let prev = self.state.compare_and_swap(&current, next);
            if !Arc::ptr_eq(&prev, &current) {
                debug!("Refresh raced a concurrent publish; retrying");
                continue;
            }

            let purged = {
                let mut graph = self.graph.write();
                let pending: Vec<ResourceId> = graph.removal_pending().map(|r| r.id).collect();
                Arc::make_mut(&mut graph).purge(pending)
            };

            let unresolved: Vec<ResourceId> = closure.into_iter().collect();
            info!(
                "Refreshed {} resource(s); purged {} removal-pending revision(s)",
                unresolved.len(),
                purged.len()
            );
            if !unresolved.is_empty() {
                self.events.publish(ContainerEvent::Unresolved(unresolved.clone()));
            }
            return Ok(unresolved);
        }
        Err(ResolverError::Conflict(
            "refresh kept racing concurrent publishes".to_string(),
        ))
    }

    /// Resolve `ids` and publish the result atomically
    ///
    /// Returns the wirings of every requested resource that ends up resolved,
    /// plus a report for the others. If nothing new could be resolved and the
    /// report is not empty, the report is returned as the error.
    pub fn resolve(&self, ids: &[ResourceId]) -> Result<WiringBatch, ResolveError> {
        let graph = self.graph();
        for id in ids {
            if graph.get(*id).is_none() {
                return Err(ResolverError::ResourceNotFound(*id).into());
            }
        }

        let state = self.state.load_full();
        if ids.iter().all(|id| state.is_resolved(*id)) {
            debug!("All {} resource(s) already resolved", ids.len());
            let batch = batch_for(ids, &state, ResolutionReport::new());
            self.notify(ids, &batch.report);
            return Ok(batch);
        }

        let triggers: Vec<Arc<Resource>> = ids
            .iter()
            .filter_map(|id| graph.get(*id).cloned())
            .collect();
        let factories = self.resolver_hooks.read().clone();
        let mut hooks = match HookChain::begin(&factories, &triggers) {
            Ok(hooks) => hooks,
            Err(e) => return self.hook_failure(ids, e, None),
        };

        let resolver = Resolver::new(self.config.max_search_steps);
        let mut report = ResolutionReport::new();
        let mut stale = None;
        for attempt in 1..=self.config.max_resolve_attempts {
            let graph = self.graph();
            let state = self.state.load_full();
            let ctx = ResolveContext {
                graph: &graph,
                state: &state,
                triggers: ids,
            };
            let outcome = match resolver.resolve(&ctx, &mut hooks) {
                Ok(outcome) => outcome,
                Err(e) => {
                    let ended = hooks.end();
                    return self.hook_failure(ids, e, ended);
                }
            };

            if outcome.pending.is_empty() {
                let mut report = outcome.report;
                end_hooks(&mut hooks, ids, &mut report);
                return self.finish(ids, &state, report, Vec::new());
            }

            match self.publish(&graph, &state, &outcome) {
                Ok(published) => {
                    let resolved: Vec<ResourceId> = outcome.pending.keys().copied().collect();
                    let mut report = outcome.report;
                    end_hooks(&mut hooks, ids, &mut report);
                    return self.finish(ids, &published, report, resolved);
                }
                Err(PublishError::Stale(reason)) => {
                    debug!("Attempt {} to publish went stale: {}", attempt, reason);
                    report = outcome.report;
                    stale = Some(reason);
                }
                Err(PublishError::LockTimeout(locked)) => {
                    warn!("Attempt {} timed out waiting for lock on {}", attempt, locked);
                    report = outcome.report;
                    stale = None;
                    for id in ids {
                        if !state.is_resolved(*id) {
                            report.add(
                                *id,
                                ReportEntry::new(
                                    EntryType::LockTimeout,
                                    EntryData::Lock {
                                        resource: locked,
                                        timeout_ms: self.config.lock_timeout_ms,
                                    },
                                ),
                            );
                        }
                    }
                }
            }
        }

        let state = self.state.load_full();
        if let Some(reason) = stale {
            warn!(
                "Gave up publishing after {} attempt(s): {}",
                self.config.max_resolve_attempts, reason
            );
            for id in ids {
                if !state.is_resolved(*id) {
                    report.add(
                        *id,
                        ReportEntry::new(
                            EntryType::UnresolvedProvider,
                            EntryData::Message(format!(
                                "publish went stale on every attempt: {}",
                                reason
                            )),
                        ),
                    );
                }
            }
        }
        end_hooks(&mut hooks, ids, &mut report);
        self.finish(ids, &state, report, Vec::new())
    }

    fn finish(
        &self,
        ids: &[ResourceId],
        state: &WiringState,
        report: ResolutionReport,
        resolved: Vec<ResourceId>,
    ) -> Result<WiringBatch, ResolveError> {
        self.notify(ids, &report);
        if !resolved.is_empty() {
            info!("Published {} new wiring(s)", resolved.len());
            self.events.publish(ContainerEvent::Resolved(resolved.clone()));
        }
        if resolved.is_empty() && !report.is_empty() {
            self.events.publish(ContainerEvent::ResolutionFailed {
                triggers: ids.to_vec(),
                report: report.clone(),
            });
            return Err(ResolveError::Unresolved(report));
        }
        Ok(batch_for(ids, state, report))
    }

    fn hook_failure(
        &self,
        ids: &[ResourceId],
        error: HookError,
        ended: Option<HookError>,
    ) -> Result<WiringBatch, ResolveError> {
        warn!("Resolver hook {} failed: {}", error.hook, error.message);
        let mut report = ResolutionReport::new();
        add_hook_failure(&mut report, ids, &error);
        if let Some(ended) = ended {
            add_hook_failure(&mut report, ids, &ended);
        }
        self.notify(ids, &report);
        self.events.publish(ContainerEvent::ResolutionFailed {
            triggers: ids.to_vec(),
            report: report.clone(),
        });
        Err(ResolveError::Hook {
            source: error,
            report,
        })
    }

    fn notify(&self, ids: &[ResourceId], report: &ResolutionReport) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_report(ids, report);
        }
    }

    /// Lock, re-validate and swap in the outcome's wirings
    fn publish(
        &self,
        snapshot: &Arc<ResourceGraph>,
        base: &Arc<WiringState>,
        outcome: &ResolverOutcome,
    ) -> Result<Arc<WiringState>, PublishError> {
        let providers: BTreeSet<ResourceId> = outcome
            .pending
            .values()
            .flat_map(|w| w.wires.iter().map(|wire| wire.provider))
            .filter(|p| !outcome.pending.contains_key(p))
            .collect();
        let _guard = self
            .locks
            .lock_all(
                outcome.pending.keys().copied().chain(providers.iter().copied()),
                self.config.lock_timeout(),
            )
            .map_err(|e| match e {
                ResolverError::LockTimeout(id) => PublishError::LockTimeout(id),
                other => PublishError::Stale(other.to_string()),
            })?;

        let graph = self.graph();
        for id in outcome.pending.keys() {
            if !graph.is_installed(*id) || !same_revision(&graph, snapshot, *id) {
                return Err(PublishError::Stale(format!("{} changed", id)));
            }
        }
        for id in &providers {
            if !same_revision(&graph, snapshot, *id) {
                return Err(PublishError::Stale(format!("provider {} changed", id)));
            }
        }

        let mut current = self.state.load_full();
        loop {
            self.validate_against(&graph, base, &current, outcome, &providers)?;
            let next = Arc::new(current.publish(&outcome.pending));
            let prev = self.state.compare_and_swap(&current, Arc::clone(&next));
            if Arc::ptr_eq(&prev, &current) {
                return Ok(next);
            }
            current = Guard::into_inner(prev);
        }
    }

    /// Checks that the batch still fits the current published state
    fn validate_against(
        &self,
        graph: &ResourceGraph,
        base: &WiringState,
        current: &WiringState,
        outcome: &ResolverOutcome,
        providers: &BTreeSet<ResourceId>,
    ) -> Result<(), PublishError> {
        for id in outcome.pending.keys() {
            if current.is_resolved(*id) {
                return Err(PublishError::Stale(format!("{} was resolved concurrently", id)));
            }
        }
        for id in providers {
            let unchanged = match (base.get(*id), current.get(*id)) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            };
            if !unchanged {
                return Err(PublishError::Stale(format!("wiring of provider {} changed", id)));
            }
        }
        for id in outcome.pending.keys() {
            let Some(resource) = graph.get(*id) else {
                continue;
            };
            if !resource.is_singleton {
                continue;
            }
            // singletons already resolved in `base` were seen by the resolver
            let taken = current
                .resolved()
                .filter(|other| !base.is_resolved(*other))
                .any(|other| {
                    graph.get(other).map_or(false, |r| {
                        r.is_singleton && r.symbolic_name == resource.symbolic_name
                    })
                });
            if taken {
                return Err(PublishError::Stale(format!(
                    "singleton {} resolved concurrently",
                    resource.symbolic_name
                )));
            }
        }
        Ok(())
    }

    /// Installed resources that collide with `target` under the configured policy
    fn collisions(
        &self,
        operation: CollisionOperation,
        target: &Arc<Resource>,
        same_name: &[Arc<Resource>],
        exclude: Option<ResourceId>,
    ) -> Vec<ResourceId> {
        let others = same_name.iter().filter(|r| Some(r.id) != exclude);
        match self.config.collision_policy {
            CollisionPolicy::Multiple => Vec::new(),
            CollisionPolicy::Single => others.map(|r| r.id).collect(),
            CollisionPolicy::Managed => {
                let state = self.state.load();
                let mut candidates: Vec<Arc<Resource>> = others
                    .filter(|r| {
                        r.version == target.version || (r.is_singleton && state.is_resolved(r.id))
                    })
                    .cloned()
                    .collect();
                let hooks = self.collision_hooks.read().clone();
                for hook in hooks {
                    if candidates.is_empty() {
                        break;
                    }
                    hook.filter_collisions(
                        operation,
                        target,
                        &mut ShrinkableCollection::new(&mut candidates),
                    );
                }
                candidates.iter().map(|r| r.id).collect()
            }
        }
    }
}

/// Close the hook chain, reporting a failing `end` against every trigger
fn end_hooks(hooks: &mut HookChain, ids: &[ResourceId], report: &mut ResolutionReport) {
    if let Some(error) = hooks.end() {
        add_hook_failure(report, ids, &error);
    }
}

fn add_hook_failure(report: &mut ResolutionReport, ids: &[ResourceId], error: &HookError) {
    for id in ids {
        report.add(
            *id,
            ReportEntry::new(
                EntryType::HookFailure,
                EntryData::Hook {
                    hook: error.hook.clone(),
                    message: error.message.clone(),
                },
            ),
        );
    }
}

fn collision_error(target: &Resource, with: Vec<ResourceId>) -> ResolverError {
    warn!(
        "{}@{} collides with {:?}",
        target.symbolic_name, target.version, with
    );
    ResolverError::Collision {
        name: target.symbolic_name.clone(),
        version: target.version.to_string(),
        with,
    }
}

fn same_ids(a: &[Arc<Resource>], b: &[Arc<Resource>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.id == y.id)
}

fn same_revision(graph: &ResourceGraph, snapshot: &ResourceGraph, id: ResourceId) -> bool {
    match (graph.get(id), snapshot.get(id)) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

/// Wirings of the requested ids that are resolved in `state`
fn batch_for(ids: &[ResourceId], state: &WiringState, report: ResolutionReport) -> WiringBatch {
    let wirings: BTreeMap<ResourceId, Arc<Wiring>> = ids
        .iter()
        .filter_map(|id| state.get(*id).map(|w| (*id, Arc::clone(w))))
        .collect();
    WiringBatch { wirings, report }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::version::{Version, VersionRange};

    #[test]
    fn test_install_resolve_uninstall_refresh() {
        let container = ModuleContainer::default();
        let api = container
            .install(
                Resource::builder("api", Version::new(1, 0, 0))
                    .export_package("api", Version::new(1, 0, 0)),
            )
            .unwrap();
        let app = container
            .install(
                Resource::builder("app", Version::new(1, 0, 0))
                    .import_package("api", VersionRange::default()),
            )
            .unwrap();

        let batch = container.resolve(&[app.id]).unwrap();
        assert!(batch.report.is_empty());
        assert!(container.is_resolved(api.id));
        assert_eq!(batch.get(app.id).unwrap().providers(), BTreeSet::from([api.id]));

        container.uninstall(api.id).unwrap();
        assert!(container.is_resolved(api.id));
        assert!(container.graph().is_removal_pending(api.id));

        let unresolved = container.refresh(&[]).unwrap();
        assert_eq!(unresolved, vec![api.id, app.id]);
        assert!(container.resource(api.id).is_none());
        assert!(!container.is_resolved(app.id));
        assert!(container.locks().is_empty());
    }

    #[test]
    fn test_unknown_resource_is_rejected() {
        let container = ModuleContainer::default();
        assert!(matches!(
            container.resolve(&[ResourceId(42)]),
            Err(ResolveError::Container(ResolverError::ResourceNotFound(_)))
        ));
        assert!(matches!(
            container.uninstall(ResourceId(42)),
            Err(ResolverError::ResourceNotFound(_))
        ));
    }

    #[test]
    fn test_same_name_and_version_collides_by_default() {
        let container = ModuleContainer::default();
        container
            .install(Resource::builder("dup", Version::new(1, 0, 0)))
            .unwrap();
        let err = container
            .install(Resource::builder("dup", Version::new(1, 0, 0)))
            .unwrap_err();
        assert!(matches!(err, ResolverError::Collision { .. }));
        assert!(container
            .install(Resource::builder("dup", Version::new(2, 0, 0)))
            .is_ok());
    }
}
