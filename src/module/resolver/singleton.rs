//! Singleton selection
//!
//! At most one singleton per symbolic name may be resolved. Resolved singletons
//! win outright; the remaining members of a group are selected in preference
//! order, each one kept only if it does not collide with an already selected
//! member. Hooks decide what collides.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

use crate::module::hooks::HookChain;
use crate::module::resource::{Resource, ResourceId};
use crate::module::traits::HookError;

/// A member that lost to a selected singleton
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingletonLoss {
    /// Member that may not resolve in this batch
    pub loser: ResourceId,
    /// Member chosen for the singleton name
    pub selected: ResourceId,
}

/// Select singletons among `resolved` and `viable` resources
///
/// Returns the losers; each loser is an unresolved member of `viable`.
pub fn select_singletons(
    resolved: &[Arc<Resource>],
    viable: &[Arc<Resource>],
    hooks: &mut HookChain,
) -> Result<Vec<SingletonLoss>, HookError> {
    let resolved_ids: BTreeSet<ResourceId> = resolved.iter().map(|r| r.id).collect();
    let mut groups: BTreeMap<&str, Vec<&Arc<Resource>>> = BTreeMap::new();
    for resource in resolved.iter().chain(viable.iter()) {
        if resource.is_singleton {
            groups
                .entry(resource.symbolic_name.as_str())
                .or_default()
                .push(resource);
        }
    }

    let mut losses = Vec::new();
    for (name, mut members) in groups {
        if members.len() < 2 {
            continue;
        }
        members.sort_by(|a, b| {
            resolved_ids
                .contains(&b.id)
                .cmp(&resolved_ids.contains(&a.id))
                .then_with(|| b.version.cmp(&a.version))
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut selected: Vec<ResourceId> = Vec::new();
        for member in &members {
            if resolved_ids.contains(&member.id) {
                selected.push(member.id);
                continue;
            }
            let Some(identity) = member.identity() else {
                selected.push(member.id);
                continue;
            };
            let mut collisions: Vec<_> = members
                .iter()
                .filter(|other| other.id != member.id)
                .filter_map(|other| other.identity().cloned())
                .collect();
            hooks.filter_singleton_collisions(identity, &mut collisions)?;

            let winner = selected
                .iter()
                .find(|s| collisions.iter().any(|c| c.owner == **s));
            match winner {
                Some(winner) => {
                    debug!("Singleton {} {} loses to {}", name, member.id, winner);
                    losses.push(SingletonLoss {
                        loser: member.id,
                        selected: *winner,
                    });
                }
                None => selected.push(member.id),
            }
        }
    }
    Ok(losses)
}
