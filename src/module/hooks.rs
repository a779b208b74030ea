//! Resolver hook plumbing
//!
//! [`ShrinkableCollection`] is the only view hooks get of the resolver's working
//! sets; it supports iteration and removal but no insertion. [`HookChain`] runs
//! the hooks of one batch in registration order.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::module::capability::{Capability, Requirement};
use crate::module::resource::Resource;
use crate::module::traits::{HookError, ResolverHook, ResolverHookFactory};

/// Removal-only view over a working set
pub struct ShrinkableCollection<'a, T> {
    items: &'a mut Vec<T>,
}

impl<'a, T> ShrinkableCollection<'a, T> {
    pub fn new(items: &'a mut Vec<T>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Keep only the items for which `keep` returns true
    pub fn retain<F: FnMut(&T) -> bool>(&mut self, keep: F) {
        self.items.retain(keep);
    }

    /// Remove the item at `index`, preserving order
    pub fn remove_at(&mut self, index: usize) -> Option<T> {
        if index < self.items.len() {
            Some(self.items.remove(index))
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<'a, T: PartialEq> ShrinkableCollection<'a, T> {
    pub fn contains(&self, item: &T) -> bool {
        self.items.contains(item)
    }

    /// Remove the first item equal to `item`
    pub fn remove(&mut self, item: &T) -> bool {
        match self.items.iter().position(|i| i == item) {
            Some(idx) => {
                self.items.remove(idx);
                true
            }
            None => false,
        }
    }
}

/// Hooks of one resolution batch, run as a pipeline
pub struct HookChain {
    hooks: Vec<(String, Box<dyn ResolverHook>)>,
}

impl HookChain {
    /// Chain with no hooks
    pub fn empty() -> Self {
        Self { hooks: Vec::new() }
    }

    /// Begin a batch on every factory
    ///
    /// If one factory fails, the hooks already begun are ended before the error
    /// is returned.
    pub fn begin(
        factories: &[Arc<dyn ResolverHookFactory>],
        triggers: &[Arc<Resource>],
    ) -> Result<Self, HookError> {
        let mut chain = Self::empty();
        for factory in factories {
            match factory.begin(triggers) {
                Ok(hook) => chain.hooks.push((factory.name().to_string(), hook)),
                Err(e) => {
                    warn!("Resolver hook {} failed to begin: {}", factory.name(), e);
                    chain.end();
                    return Err(e);
                }
            }
        }
        debug!("Began resolver hook chain with {} hook(s)", chain.hooks.len());
        Ok(chain)
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn filter_resolvable(
        &mut self,
        candidates: &mut Vec<Arc<Resource>>,
    ) -> Result<(), HookError> {
        for (_, hook) in self.hooks.iter_mut() {
            hook.filter_resolvable(&mut ShrinkableCollection::new(candidates))?;
        }
        Ok(())
    }

    pub fn filter_singleton_collisions(
        &mut self,
        singleton: &Arc<Capability>,
        collisions: &mut Vec<Arc<Capability>>,
    ) -> Result<(), HookError> {
        for (_, hook) in self.hooks.iter_mut() {
            hook.filter_singleton_collisions(
                singleton,
                &mut ShrinkableCollection::new(collisions),
            )?;
        }
        Ok(())
    }

    pub fn filter_matches(
        &mut self,
        requirement: &Arc<Requirement>,
        candidates: &mut Vec<Arc<Capability>>,
    ) -> Result<(), HookError> {
        for (_, hook) in self.hooks.iter_mut() {
            hook.filter_matches(requirement, &mut ShrinkableCollection::new(candidates))?;
        }
        Ok(())
    }

    /// End every hook; failures are logged, and the first is returned
    pub fn end(&mut self) -> Option<HookError> {
        let mut first = None;
        for (name, mut hook) in self.hooks.drain(..) {
            if let Err(e) = hook.end() {
                warn!("Resolver hook {} failed to end batch: {}", name, e);
                first.get_or_insert(e);
            }
        }
        first
    }
}

impl Drop for HookChain {
    fn drop(&mut self) {
        if !self.hooks.is_empty() {
            self.end();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_shrinkable_collection_only_removes() {
        let mut items = vec![1, 2, 3, 4];
        {
            let mut view = ShrinkableCollection::new(&mut items);
            assert!(view.remove(&2));
            assert!(!view.remove(&9));
            view.retain(|i| *i != 4);
            assert_eq!(view.len(), 2);
            assert!(view.contains(&3));
        }
        assert_eq!(items, vec![1, 3]);
    }

    struct Counting {
        ended: Arc<AtomicUsize>,
        fail_begin: bool,
    }

    struct CountingHook {
        ended: Arc<AtomicUsize>,
    }

    impl ResolverHook for CountingHook {
        fn end(&mut self) -> Result<(), HookError> {
            self.ended.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl ResolverHookFactory for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn begin(&self, _triggers: &[Arc<Resource>]) -> Result<Box<dyn ResolverHook>, HookError> {
            if self.fail_begin {
                return Err(HookError::new("counting", "refused"));
            }
            Ok(Box::new(CountingHook {
                ended: Arc::clone(&self.ended),
            }))
        }
    }

    #[test]
    fn test_failed_begin_ends_already_started_hooks() {
        let ended = Arc::new(AtomicUsize::new(0));
        let factories: Vec<Arc<dyn ResolverHookFactory>> = vec![
            Arc::new(Counting {
                ended: Arc::clone(&ended),
                fail_begin: false,
            }),
            Arc::new(Counting {
                ended: Arc::clone(&ended),
                fail_begin: true,
            }),
        ];
        assert!(HookChain::begin(&factories, &[]).is_err());
        assert_eq!(ended.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_end_runs_once() {
        let ended = Arc::new(AtomicUsize::new(0));
        let factories: Vec<Arc<dyn ResolverHookFactory>> = vec![Arc::new(Counting {
            ended: Arc::clone(&ended),
            fail_begin: false,
        })];
        let mut chain = HookChain::begin(&factories, &[]).unwrap();
        assert!(chain.end().is_none());
        drop(chain);
        assert_eq!(ended.load(Ordering::SeqCst), 1);
    }
}
