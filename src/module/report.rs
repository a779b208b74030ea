//! Resolution reports
//!
//! A report maps each resource that could not be resolved to typed entries
//! explaining why. Entries are data: one resource failing never aborts the
//! others.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::module::resource::ResourceId;

/// Kind of report entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum EntryType {
    /// A resolver hook removed the resource from the resolvable set
    FilteredByHook,
    /// No installed capability matches a mandatory requirement
    MissingCapability,
    /// Another singleton with the same symbolic name was selected
    SingletonSelection,
    /// Matching providers exist but none of them can resolve
    UnresolvedProvider,
    /// Every candidate wiring exposes two providers of one package
    UsesConstraintViolation,
    /// Resource locks could not be acquired in time
    LockTimeout,
    /// A resolver hook failed and the batch was abandoned
    HookFailure,
}

impl EntryType {
    /// Whether retrying the same batch later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, EntryType::LockTimeout)
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryType::FilteredByHook => "filtered by hook",
            EntryType::MissingCapability => "missing capability",
            EntryType::SingletonSelection => "singleton selection",
            EntryType::UnresolvedProvider => "unresolved provider",
            EntryType::UsesConstraintViolation => "uses constraint violation",
            EntryType::LockTimeout => "lock timeout",
            EntryType::HookFailure => "hook failure",
        };
        f.write_str(s)
    }
}

/// Payload of a report entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryData {
    Hook { hook: String, message: String },
    Requirement { requirement: String },
    Singleton { selected: ResourceId },
    Provider { requirement: String, providers: Vec<ResourceId> },
    Uses { package: String, providers: Vec<ResourceId> },
    Lock { resource: ResourceId, timeout_ms: u64 },
    Message(String),
}

/// One reason a resource did not resolve
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub kind: EntryType,
    pub data: EntryData,
}

impl ReportEntry {
    pub fn new(kind: EntryType, data: EntryData) -> Self {
        Self { kind, data }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl fmt::Display for ReportEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        match &self.data {
            EntryData::Hook { hook, message } => write!(f, ": {} ({})", message, hook),
            EntryData::Requirement { requirement } => write!(f, ": {}", requirement),
            EntryData::Singleton { selected } => write!(f, ": {} selected", selected),
            EntryData::Provider {
                requirement,
                providers,
            } => write!(f, ": {} via {}", requirement, join_ids(providers)),
            EntryData::Uses { package, providers } => {
                write!(f, ": package {} from {}", package, join_ids(providers))
            }
            EntryData::Lock {
                resource,
                timeout_ms,
            } => write!(f, ": {} after {}ms", resource, timeout_ms),
            EntryData::Message(msg) => write!(f, ": {}", msg),
        }
    }
}

fn join_ids(ids: &[ResourceId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Per-resource failure entries for one resolution attempt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ResolutionReport {
    entries: BTreeMap<ResourceId, Vec<ReportEntry>>,
}

impl ResolutionReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entry; identical entries for one resource are kept once
    pub fn add(&mut self, resource: ResourceId, entry: ReportEntry) {
        let list = self.entries.entry(resource).or_default();
        if !list.contains(&entry) {
            list.push(entry);
        }
    }

    pub fn entries_for(&self, resource: ResourceId) -> &[ReportEntry] {
        self.entries
            .get(&resource)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether `resource` has an entry of `kind`
    pub fn has(&self, resource: ResourceId, kind: EntryType) -> bool {
        self.entries_for(resource).iter().any(|e| e.kind == kind)
    }

    pub fn contains(&self, resource: ResourceId) -> bool {
        self.entries.contains_key(&resource)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of resources with entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn remove(&mut self, resource: ResourceId) -> Option<Vec<ReportEntry>> {
        self.entries.remove(&resource)
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: ResolutionReport) {
        for (id, list) in other.entries {
            for entry in list {
                self.add(id, entry);
            }
        }
    }

    /// Resources and their entries, ordered by id
    pub fn iter(&self) -> impl Iterator<Item = (ResourceId, &[ReportEntry])> {
        self.entries.iter().map(|(id, list)| (*id, list.as_slice()))
    }

    pub fn resources(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.entries.keys().copied()
    }

    /// True when every entry could go away on retry
    pub fn is_retryable(&self) -> bool {
        !self.is_empty()
            && self
                .entries
                .values()
                .flatten()
                .all(ReportEntry::is_retryable)
    }
}

impl fmt::Display for ResolutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, list) in &self.entries {
            for entry in list {
                writeln!(f, "{}: {}", id, entry)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing(req: &str) -> ReportEntry {
        ReportEntry::new(
            EntryType::MissingCapability,
            EntryData::Requirement {
                requirement: req.to_string(),
            },
        )
    }

    #[test]
    fn test_add_deduplicates_entries() {
        let mut report = ResolutionReport::new();
        report.add(ResourceId(1), missing("package (package=p)"));
        report.add(ResourceId(1), missing("package (package=p)"));
        report.add(ResourceId(1), missing("package (package=q)"));
        assert_eq!(report.entries_for(ResourceId(1)).len(), 2);
        assert!(report.has(ResourceId(1), EntryType::MissingCapability));
        assert!(!report.has(ResourceId(2), EntryType::MissingCapability));
    }

    #[test]
    fn test_only_lock_timeouts_are_retryable() {
        let mut report = ResolutionReport::new();
        report.add(
            ResourceId(3),
            ReportEntry::new(
                EntryType::LockTimeout,
                EntryData::Lock {
                    resource: ResourceId(3),
                    timeout_ms: 10,
                },
            ),
        );
        assert!(report.is_retryable());
        report.add(ResourceId(4), missing("bundle"));
        assert!(!report.is_retryable());
        assert!(!ResolutionReport::new().is_retryable());
    }

    #[test]
    fn test_merge_and_display() {
        let mut a = ResolutionReport::new();
        a.add(ResourceId(1), missing("x"));
        let mut b = ResolutionReport::new();
        b.add(
            ResourceId(2),
            ReportEntry::new(
                EntryType::SingletonSelection,
                EntryData::Singleton {
                    selected: ResourceId(5),
                },
            ),
        );
        a.merge(b);
        assert_eq!(a.len(), 2);
        let text = a.to_string();
        assert!(text.contains("#2: singleton selection: #5 selected"));
    }
}
