//! Backtracking search
//!
//! One search resolves one root resource together with every unresolved
//! provider it pulls in. Requirements are visited in a fixed cursor order
//! (involved resources in the order they were pulled, requirements in
//! declaration order); each visited requirement opens a choice point. A choice
//! is kept only if every involved class space stays consistent. Exhausted choice
//! points are popped and the previous one moves on to its next candidate.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::trace;

use crate::module::capability::{Capability, Requirement};
use crate::module::registry::ResourceGraph;
use crate::module::report::{EntryData, EntryType, ReportEntry, ResolutionReport};
use crate::module::resolver::uses::{UsesViolation, WireView};
use crate::module::resource::{Resource, ResourceId};
use crate::module::wiring::{Wire, WiringState};

/// Hook-filtered candidates per `(resource, requirement index)`
pub(crate) type MatchCache = HashMap<(ResourceId, usize), Vec<Arc<Capability>>>;

/// Read-only inputs shared by every search in a batch
pub(crate) struct SearchInput<'a> {
    pub graph: &'a ResourceGraph,
    pub state: &'a WiringState,
    pub matches: &'a MatchCache,
    /// Wires committed by earlier searches of this batch
    pub pending: &'a BTreeMap<ResourceId, Vec<Wire>>,
    /// Unresolved resources still allowed to resolve
    pub viable: &'a BTreeSet<ResourceId>,
    pub max_steps: usize,
}

impl SearchInput<'_> {
    /// Resolved, or committed earlier in this batch
    fn is_settled(&self, id: ResourceId) -> bool {
        self.state.is_resolved(id) || self.pending.contains_key(&id)
    }

    fn is_usable(&self, id: ResourceId) -> bool {
        self.is_settled(id) || self.viable.contains(&id)
    }
}

pub(crate) enum SearchOutcome {
    /// Wires for every involved resource
    Resolved(BTreeMap<ResourceId, Vec<Wire>>),
    Failed(SearchFailure),
}

pub(crate) struct SearchFailure {
    /// Uses violation left standing by the final unwind, if any
    pub uses: Option<UsesViolation>,
    /// Why individual choice points ran out of candidates
    pub causes: ResolutionReport,
    pub budget_exhausted: bool,
}

struct ChoicePoint {
    requirer: ResourceId,
    position: usize,
    req_index: usize,
    requirement: Arc<Requirement>,
    candidates: Vec<Arc<Capability>>,
    next: usize,
    /// Undo marks: involved length and requirer wire count before any choice
    involved_before: usize,
    wires_before: usize,
    /// Set once the final alternative (unwired, or the greedy set) was taken
    unwired_tried: bool,
    /// Latest uses violation that rejected one of the candidates
    violation: Option<UsesViolation>,
}

enum Step {
    Accepted,
    Exhausted,
    OutOfBudget,
}

pub(crate) struct Search<'a> {
    input: &'a SearchInput<'a>,
    involved: Vec<Arc<Resource>>,
    involved_ids: BTreeSet<ResourceId>,
    wires: BTreeMap<ResourceId, Vec<Wire>>,
    stack: Vec<ChoicePoint>,
    steps: usize,
    uses: Option<UsesViolation>,
    causes: ResolutionReport,
}

impl<'a> Search<'a> {
    pub fn new(input: &'a SearchInput<'a>) -> Self {
        Self {
            input,
            involved: Vec::new(),
            involved_ids: BTreeSet::new(),
            wires: BTreeMap::new(),
            stack: Vec::new(),
            steps: 0,
            uses: None,
            causes: ResolutionReport::new(),
        }
    }

    pub fn run(mut self, root: ResourceId) -> SearchOutcome {
        self.pull(root);
        let mut cursor = (0, 0);

        while let Some((position, req_index)) = self.next_requirement(cursor) {
            let mut cp = self.open(position, req_index);
            loop {
                match self.try_next(&mut cp) {
                    Step::Accepted => {
                        // earlier violations belong to abandoned branches
                        self.uses = None;
                        cp.violation = None;
                        cursor = (cp.position, cp.req_index + 1);
                        self.stack.push(cp);
                        break;
                    }
                    Step::Exhausted => {
                        if let Some(violation) = cp.violation.take() {
                            self.uses = Some(violation);
                        }
                        self.record_exhaustion(&cp);
                        match self.stack.pop() {
                            Some(prev) => {
                                self.undo(&prev);
                                cp = prev;
                            }
                            None => return self.fail(false),
                        }
                    }
                    Step::OutOfBudget => return self.fail(true),
                }
            }
        }

        trace!(
            "Search for {} settled {} resource(s) in {} step(s)",
            root,
            self.involved.len(),
            self.steps
        );
        SearchOutcome::Resolved(self.wires)
    }

    fn fail(self, budget_exhausted: bool) -> SearchOutcome {
        SearchOutcome::Failed(SearchFailure {
            uses: self.uses,
            causes: self.causes,
            budget_exhausted,
        })
    }

    fn pull(&mut self, id: ResourceId) {
        if let Some(resource) = self.input.graph.get(id) {
            self.involved.push(Arc::clone(resource));
            self.involved_ids.insert(id);
            self.wires.insert(id, Vec::new());
        }
    }

    /// Next resolve-time requirement at or after `cursor`
    fn next_requirement(&self, cursor: (usize, usize)) -> Option<(usize, usize)> {
        let (mut position, mut index) = cursor;
        while let Some(resource) = self.involved.get(position) {
            while let Some(req) = resource.requirements.get(index) {
                if req.is_resolve_time() {
                    return Some((position, index));
                }
                index += 1;
            }
            position += 1;
            index = 0;
        }
        None
    }

    fn open(&self, position: usize, req_index: usize) -> ChoicePoint {
        let resource = &self.involved[position];
        let requirement = Arc::clone(&resource.requirements[req_index]);
        let candidates = self
            .input
            .matches
            .get(&(resource.id, req_index))
            .map(|caps| {
                caps.iter()
                    .filter(|c| self.input.is_usable(c.owner))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        ChoicePoint {
            requirer: resource.id,
            position,
            req_index,
            requirement,
            candidates,
            next: 0,
            involved_before: self.involved.len(),
            wires_before: self.wires.get(&resource.id).map_or(0, Vec::len),
            unwired_tried: false,
            violation: None,
        }
    }

    fn try_next(&mut self, cp: &mut ChoicePoint) -> Step {
        if cp.requirement.is_multiple() {
            return self.try_all(cp);
        }
        while cp.next < cp.candidates.len() {
            if !self.tick() {
                return Step::OutOfBudget;
            }
            let candidate = Arc::clone(&cp.candidates[cp.next]);
            cp.next += 1;
            self.apply(cp, candidate);
            match self.consistent() {
                Ok(()) => return Step::Accepted,
                Err(violation) => cp.violation = Some(violation),
            }
            self.undo(cp);
        }
        if cp.requirement.is_optional() && !cp.unwired_tried {
            cp.unwired_tried = true;
            return Step::Accepted;
        }
        Step::Exhausted
    }

    /// Multiple cardinality: keep every candidate that stays consistent
    ///
    /// The greedy set is the only alternative, so revisiting the choice point
    /// exhausts it.
    fn try_all(&mut self, cp: &mut ChoicePoint) -> Step {
        if cp.unwired_tried {
            return Step::Exhausted;
        }
        cp.unwired_tried = true;
        let mut kept = 0;
        while cp.next < cp.candidates.len() {
            if !self.tick() {
                return Step::OutOfBudget;
            }
            let candidate = Arc::clone(&cp.candidates[cp.next]);
            cp.next += 1;
            let involved_mark = self.involved.len();
            let wires_mark = self.wires.get(&cp.requirer).map_or(0, Vec::len);
            self.apply(cp, candidate);
            match self.consistent() {
                Ok(()) => kept += 1,
                Err(violation) => {
                    cp.violation = Some(violation);
                    self.truncate(cp.requirer, involved_mark, wires_mark);
                }
            }
        }
        if kept > 0 || cp.requirement.is_optional() {
            Step::Accepted
        } else {
            Step::Exhausted
        }
    }

    fn tick(&mut self) -> bool {
        self.steps += 1;
        self.steps <= self.input.max_steps
    }

    fn apply(&mut self, cp: &ChoicePoint, capability: Arc<Capability>) {
        let owner = capability.owner;
        self.wires
            .entry(cp.requirer)
            .or_default()
            .push(Wire::new(Arc::clone(&cp.requirement), capability));
        if !self.input.is_settled(owner) && !self.involved_ids.contains(&owner) {
            self.pull(owner);
        }
    }

    /// Revert everything `cp` applied
    fn undo(&mut self, cp: &ChoicePoint) {
        self.truncate(cp.requirer, cp.involved_before, cp.wires_before);
    }

    fn truncate(&mut self, requirer: ResourceId, involved_len: usize, wires_len: usize) {
        for resource in self.involved.drain(involved_len..) {
            self.involved_ids.remove(&resource.id);
            self.wires.remove(&resource.id);
        }
        if let Some(wires) = self.wires.get_mut(&requirer) {
            wires.truncate(wires_len);
        }
    }

    fn consistent(&self) -> Result<(), UsesViolation> {
        let view = WireView {
            tentative: &self.wires,
            pending: self.input.pending,
            state: self.input.state,
        };
        for resource in &self.involved {
            if let Err(violation) = view.check(resource.id) {
                trace!(
                    "Uses conflict on package {} for {}",
                    violation.package,
                    violation.resource
                );
                return Err(violation);
            }
        }
        Ok(())
    }

    fn record_exhaustion(&mut self, cp: &ChoicePoint) {
        if cp.requirement.is_optional() {
            return;
        }
        let requirement = cp.requirement.to_string();
        let entry = if cp.candidates.is_empty() {
            ReportEntry::new(
                EntryType::MissingCapability,
                EntryData::Requirement { requirement },
            )
        } else {
            let providers: BTreeSet<ResourceId> = cp.candidates.iter().map(|c| c.owner).collect();
            ReportEntry::new(
                EntryType::UnresolvedProvider,
                EntryData::Provider {
                    requirement,
                    providers: providers.into_iter().collect(),
                },
            )
        };
        self.causes.add(cp.requirer, entry);
    }
}
