//! Core resolution algorithm
//!
//! Works on immutable snapshots (resource graph and published wiring state) and
//! produces pending wirings plus a report. Nothing here touches shared state;
//! the container publishes the result.
//!
//! A batch runs in four phases:
//! 1. `filter_resolvable` over every unresolved installed resource
//! 2. singleton selection
//! 3. viability fixpoint over hook-filtered candidates
//! 4. one backtracking search per trigger, in deterministic order

pub mod candidates;
pub mod search;
pub mod singleton;
pub mod uses;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use crate::module::capability::namespace;
use crate::module::hooks::HookChain;
use crate::module::registry::ResourceGraph;
use crate::module::report::{EntryData, EntryType, ReportEntry, ResolutionReport};
use crate::module::resource::{Resource, ResourceId};
use crate::module::traits::HookError;
use crate::module::wiring::{Wire, Wiring, WiringState};

pub use candidates::CandidateIndex;
pub use singleton::{select_singletons, SingletonLoss};
pub use uses::{verify_consistency, UsesViolation};

use search::{MatchCache, Search, SearchInput, SearchOutcome};

/// Default bound on candidate attempts per search
pub const DEFAULT_MAX_SEARCH_STEPS: usize = 100_000;

/// Snapshots a batch resolves against
pub struct ResolveContext<'a> {
    /// Installed resources
    pub graph: &'a ResourceGraph,
    /// Published wirings; resolved resources are never rewired
    pub state: &'a WiringState,
    /// Resources the batch was asked to resolve
    pub triggers: &'a [ResourceId],
}

/// Pending wirings and the report for one batch
#[derive(Debug, Clone, Default)]
pub struct ResolverOutcome {
    /// New wirings for every resource the batch resolved, triggers and pulled-in providers
    pub pending: BTreeMap<ResourceId, Arc<Wiring>>,
    /// Why the remaining triggers did not resolve
    pub report: ResolutionReport,
}

/// The resolution algorithm
#[derive(Debug, Clone)]
pub struct Resolver {
    max_search_steps: usize,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SEARCH_STEPS)
    }
}

impl Resolver {
    pub fn new(max_search_steps: usize) -> Self {
        Self { max_search_steps }
    }

    /// Resolve `ctx.triggers`
    ///
    /// Triggers that are already resolved or not installed are ignored. A hook
    /// error aborts the batch; the caller owns the hook chain and ends it.
    pub fn resolve(
        &self,
        ctx: &ResolveContext<'_>,
        hooks: &mut HookChain,
    ) -> Result<ResolverOutcome, HookError> {
        let graph = ctx.graph;
        let state = ctx.state;
        let triggers: BTreeSet<ResourceId> = ctx
            .triggers
            .iter()
            .copied()
            .filter(|id| graph.is_installed(*id) && !state.is_resolved(*id))
            .collect();
        let mut full = ResolutionReport::new();

        let unresolved: Vec<Arc<Resource>> = graph
            .installed()
            .filter(|r| !state.is_resolved(r.id))
            .cloned()
            .collect();
        let mut resolvable = unresolved.clone();
        hooks.filter_resolvable(&mut resolvable)?;
        let mut viable: BTreeSet<ResourceId> = resolvable.iter().map(|r| r.id).collect();
        for resource in &unresolved {
            if !viable.contains(&resource.id) {
                full.add(
                    resource.id,
                    ReportEntry::new(
                        EntryType::FilteredByHook,
                        EntryData::Message("removed by a resolver hook".to_string()),
                    ),
                );
            }
        }

        let resolved: Vec<Arc<Resource>> = state
            .resolved()
            .filter_map(|id| graph.get(id).cloned())
            .collect();
        for loss in select_singletons(&resolved, &resolvable, hooks)? {
            viable.remove(&loss.loser);
            full.add(
                loss.loser,
                ReportEntry::new(
                    EntryType::SingletonSelection,
                    EntryData::Singleton {
                        selected: loss.selected,
                    },
                ),
            );
        }

        let index = CandidateIndex::build(graph, state);
        let mut matches: MatchCache = HashMap::new();
        for resource in resolvable.iter().filter(|r| viable.contains(&r.id)) {
            for (i, req) in resource.requirements.iter().enumerate() {
                if !req.is_resolve_time() {
                    continue;
                }
                let mut candidates = index.find_candidates(req);
                hooks.filter_matches(req, &mut candidates)?;
                matches.insert((resource.id, i), candidates);
            }
        }

        self.prune_unviable(&resolvable, state, &matches, &mut viable, &mut full);

        let by_id: BTreeMap<ResourceId, &Arc<Resource>> =
            resolvable.iter().map(|r| (r.id, r)).collect();
        let mut order: Vec<&Arc<Resource>> = triggers
            .iter()
            .filter(|id| viable.contains(*id))
            .filter_map(|id| by_id.get(id).copied())
            .collect();
        order.sort_by(|a, b| {
            a.symbolic_name
                .cmp(&b.symbolic_name)
                .then_with(|| b.version.cmp(&a.version))
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut pending: BTreeMap<ResourceId, Vec<Wire>> = BTreeMap::new();
        for root in order {
            if pending.contains_key(&root.id) || !viable.contains(&root.id) {
                continue;
            }
            let input = SearchInput {
                graph,
                state,
                matches: &matches,
                pending: &pending,
                viable: &viable,
                max_steps: self.max_search_steps,
            };
            let outcome = Search::new(&input).run(root.id);
            match outcome {
                SearchOutcome::Resolved(wires) => {
                    debug!("Resolved {} with {} resource(s)", root, wires.len());
                    pending.extend(wires);
                }
                SearchOutcome::Failed(failure) => {
                    debug!("Failed to resolve {}", root);
                    viable.remove(&root.id);
                    let root_causes: Vec<ReportEntry> =
                        failure.causes.entries_for(root.id).to_vec();
                    if let Some(violation) = failure.uses {
                        full.add(
                            root.id,
                            ReportEntry::new(
                                EntryType::UsesConstraintViolation,
                                EntryData::Uses {
                                    package: violation.package,
                                    providers: violation.providers,
                                },
                            ),
                        );
                    } else if failure.budget_exhausted {
                        full.add(
                            root.id,
                            ReportEntry::new(
                                EntryType::UnresolvedProvider,
                                EntryData::Message(format!(
                                    "search exceeded {} steps",
                                    self.max_search_steps
                                )),
                            ),
                        );
                    } else if root_causes.is_empty() {
                        full.add(
                            root.id,
                            ReportEntry::new(
                                EntryType::UnresolvedProvider,
                                EntryData::Message("no consistent wiring found".to_string()),
                            ),
                        );
                    }
                    full.merge(failure.causes);
                }
            }
        }

        let wirings: BTreeMap<ResourceId, Arc<Wiring>> = pending
            .into_iter()
            .map(|(id, wires)| {
                let mut wiring = Wiring::new(id, wires);
                if let Some(resource) = graph.get(id) {
                    wiring.substitutions = substitutions(resource, &wiring.wires);
                }
                (id, Arc::new(wiring))
            })
            .collect();

        let report = narrow_report(&full, &triggers, &wirings);
        info!(
            "Resolved {} resource(s) for {} trigger(s); {} unresolved",
            wirings.len(),
            triggers.len(),
            report.len()
        );
        Ok(ResolverOutcome {
            pending: wirings,
            report,
        })
    }

    /// Drop resources whose mandatory requirements have no usable candidate,
    /// repeating until nothing changes
    fn prune_unviable(
        &self,
        resolvable: &[Arc<Resource>],
        state: &WiringState,
        matches: &MatchCache,
        viable: &mut BTreeSet<ResourceId>,
        report: &mut ResolutionReport,
    ) {
        loop {
            let mut failed = Vec::new();
            for resource in resolvable.iter().filter(|r| viable.contains(&r.id)) {
                for (i, req) in resource.requirements.iter().enumerate() {
                    if !req.is_resolve_time() || req.is_optional() {
                        continue;
                    }
                    let candidates = matches
                        .get(&(resource.id, i))
                        .map(Vec::as_slice)
                        .unwrap_or(&[]);
                    let usable = candidates
                        .iter()
                        .any(|c| state.is_resolved(c.owner) || viable.contains(&c.owner));
                    if usable {
                        continue;
                    }
                    let requirement = req.to_string();
                    let entry = if candidates.is_empty() {
                        ReportEntry::new(
                            EntryType::MissingCapability,
                            EntryData::Requirement { requirement },
                        )
                    } else {
                        let providers: BTreeSet<ResourceId> =
                            candidates.iter().map(|c| c.owner).collect();
                        ReportEntry::new(
                            EntryType::UnresolvedProvider,
                            EntryData::Provider {
                                requirement,
                                providers: providers.into_iter().collect(),
                            },
                        )
                    };
                    failed.push((resource.id, entry));
                    break;
                }
            }
            if failed.is_empty() {
                return;
            }
            for (id, entry) in failed {
                viable.remove(&id);
                report.add(id, entry);
            }
        }
    }
}

/// Exported packages whose import was wired to another provider
fn substitutions(resource: &Resource, wires: &[Wire]) -> BTreeMap<String, ResourceId> {
    let exported: BTreeSet<&str> = resource.exported_packages().collect();
    wires
        .iter()
        .filter(|w| w.requirement.namespace == namespace::PACKAGE && w.provider != resource.id)
        .filter_map(|w| {
            w.package_name()
                .filter(|p| exported.contains(p))
                .map(|p| (p.to_string(), w.provider))
        })
        .collect()
}

/// Entries for unresolved triggers, plus the providers they name, transitively
fn narrow_report(
    full: &ResolutionReport,
    triggers: &BTreeSet<ResourceId>,
    resolved: &BTreeMap<ResourceId, Arc<Wiring>>,
) -> ResolutionReport {
    let mut report = ResolutionReport::new();
    let mut queue: Vec<ResourceId> = triggers.iter().rev().copied().collect();
    let mut seen = BTreeSet::new();
    while let Some(id) = queue.pop() {
        if !seen.insert(id) || resolved.contains_key(&id) {
            continue;
        }
        for entry in full.entries_for(id) {
            report.add(id, entry.clone());
            if let EntryData::Provider { providers, .. } = &entry.data {
                queue.extend(providers.iter().rev().copied());
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::version::{Version, VersionRange};

    fn install(
        graph: &mut ResourceGraph,
        build: impl FnOnce(ResourceId) -> Resource,
    ) -> ResourceId {
        let id = graph.allocate_id();
        graph.insert(Arc::new(build(id)));
        id
    }

    fn run(graph: &ResourceGraph, state: &WiringState, triggers: &[ResourceId]) -> ResolverOutcome {
        Resolver::default()
            .resolve(
                &ResolveContext {
                    graph,
                    state,
                    triggers,
                },
                &mut HookChain::empty(),
            )
            .unwrap()
    }

    #[test]
    fn test_cycle_resolves_in_one_search() {
        let mut graph = ResourceGraph::new();
        let a = install(&mut graph, |id| {
            Resource::builder("a", Version::new(1, 0, 0))
                .export_package("pa", Version::new(1, 0, 0))
                .import_package("pb", VersionRange::default())
                .build(id)
        });
        let b = install(&mut graph, |id| {
            Resource::builder("b", Version::new(1, 0, 0))
                .export_package("pb", Version::new(1, 0, 0))
                .import_package("pa", VersionRange::default())
                .build(id)
        });

        let outcome = run(&graph, &WiringState::new(), &[a]);
        assert!(outcome.report.is_empty());
        assert_eq!(outcome.pending.keys().copied().collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(outcome.pending[&a].providers(), BTreeSet::from([b]));
        assert_eq!(outcome.pending[&b].providers(), BTreeSet::from([a]));
    }

    #[test]
    fn test_missing_capability_propagates_to_dependents() {
        let mut graph = ResourceGraph::new();
        let lib = install(&mut graph, |id| {
            Resource::builder("lib", Version::new(1, 0, 0))
                .export_package("lib", Version::new(1, 0, 0))
                .import_package("absent", VersionRange::default())
                .build(id)
        });
        let app = install(&mut graph, |id| {
            Resource::builder("app", Version::new(1, 0, 0))
                .import_package("lib", VersionRange::default())
                .build(id)
        });

        let outcome = run(&graph, &WiringState::new(), &[app]);
        assert!(outcome.pending.is_empty());
        assert!(outcome.report.has(app, EntryType::UnresolvedProvider));
        // The named provider's own reason is carried along
        assert!(outcome.report.has(lib, EntryType::MissingCapability));
    }

    #[test]
    fn test_substitution_recorded_when_import_wins_elsewhere() {
        let mut graph = ResourceGraph::new();
        let provider = install(&mut graph, |id| {
            Resource::builder("provider", Version::new(1, 0, 0))
                .export_package("p", Version::new(2, 0, 0))
                .build(id)
        });
        let mut state = WiringState::new();
        let mut seed = BTreeMap::new();
        seed.insert(provider, Arc::new(Wiring::new(provider, Vec::new())));
        state = state.publish(&seed);

        let both = install(&mut graph, |id| {
            Resource::builder("both", Version::new(1, 0, 0))
                .export_package("p", Version::new(1, 0, 0))
                .import_package("p", VersionRange::default())
                .build(id)
        });

        let outcome = run(&graph, &state, &[both]);
        let wiring = &outcome.pending[&both];
        assert_eq!(wiring.substitutions.get("p"), Some(&provider));
    }

    #[test]
    fn test_step_budget_fails_the_search() {
        let mut graph = ResourceGraph::new();
        install(&mut graph, |id| {
            Resource::builder("lib", Version::new(1, 0, 0))
                .export_package("lib", Version::new(1, 0, 0))
                .build(id)
        });
        let app = install(&mut graph, |id| {
            Resource::builder("app", Version::new(1, 0, 0))
                .import_package("lib", VersionRange::default())
                .build(id)
        });
        let outcome = Resolver::new(0)
            .resolve(
                &ResolveContext {
                    graph: &graph,
                    state: &WiringState::new(),
                    triggers: &[app],
                },
                &mut HookChain::empty(),
            )
            .unwrap();
        assert!(outcome.pending.is_empty());
        assert!(outcome.report.has(app, EntryType::UnresolvedProvider));
    }
}
