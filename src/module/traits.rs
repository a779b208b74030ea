//! Resolver SPI traits and error types
//!
//! Defines the extension points external policy code plugs into (resolver hooks,
//! collision hooks, report listeners) and the errors the module system reports.

use std::sync::Arc;
use thiserror::Error;

use crate::module::capability::{Capability, Requirement};
use crate::module::filter::FilterParseError;
use crate::module::hooks::ShrinkableCollection;
use crate::module::report::ResolutionReport;
use crate::module::resource::{Resource, ResourceId};
use crate::module::version::VersionParseError;

/// Error raised by a hook; aborts the batch being resolved
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{hook}: {message}")]
pub struct HookError {
    /// Name of the failing hook
    pub hook: String,
    /// What went wrong, as the hook reported it
    pub message: String,
}

impl HookError {
    pub fn new(hook: &str, message: impl Into<String>) -> Self {
        Self {
            hook: hook.to_string(),
            message: message.into(),
        }
    }
}

/// Creates one [`ResolverHook`] per resolution batch
pub trait ResolverHookFactory: Send + Sync {
    /// Name used in logs and hook failure reports
    fn name(&self) -> &str;

    /// Called once at the start of a batch with the resources that triggered it
    fn begin(&self, triggers: &[Arc<Resource>]) -> Result<Box<dyn ResolverHook>, HookError>;
}

/// Batch-scoped resolver hook
///
/// Every method receives a collection that only supports removal, so a hook can
/// narrow what the resolver considers but never add to it. Default methods leave
/// the collection untouched.
pub trait ResolverHook: Send {
    /// Remove resources that must not resolve in this batch
    fn filter_resolvable(
        &mut self,
        _candidates: &mut ShrinkableCollection<'_, Arc<Resource>>,
    ) -> Result<(), HookError> {
        Ok(())
    }

    /// Remove identity capabilities that should not count as colliding with `singleton`
    fn filter_singleton_collisions(
        &mut self,
        _singleton: &Arc<Capability>,
        _collisions: &mut ShrinkableCollection<'_, Arc<Capability>>,
    ) -> Result<(), HookError> {
        Ok(())
    }

    /// Remove capabilities `requirement` must not be wired to
    fn filter_matches(
        &mut self,
        _requirement: &Arc<Requirement>,
        _candidates: &mut ShrinkableCollection<'_, Arc<Capability>>,
    ) -> Result<(), HookError> {
        Ok(())
    }

    /// Called once when the batch finishes, whether or not it succeeded
    fn end(&mut self) -> Result<(), HookError> {
        Ok(())
    }
}

/// Structural operation that triggered a collision check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionOperation {
    Installing,
    Updating,
}

/// Decides which installed resources count as colliding with an incoming one
pub trait CollisionHook: Send + Sync {
    /// Remove resources from `candidates` that should not collide with `target`
    fn filter_collisions(
        &self,
        operation: CollisionOperation,
        target: &Arc<Resource>,
        candidates: &mut ShrinkableCollection<'_, Arc<Resource>>,
    );
}

/// Receives the report of every resolution attempt
pub trait ReportListener: Send + Sync {
    fn on_report(&self, triggers: &[ResourceId], report: &ResolutionReport);
}

/// Module system errors
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("Resource not found: {0}")]
    ResourceNotFound(ResourceId),

    #[error("Resource {name}@{version} collides with installed resource(s) {with:?}")]
    Collision {
        name: String,
        version: String,
        with: Vec<ResourceId>,
    },

    #[error("Timed out acquiring lock for resource {0}")]
    LockTimeout(ResourceId),

    #[error("Resource {0} is not locked by the current thread")]
    NotLockOwner(ResourceId),

    #[error("Concurrent modification: {0}")]
    Conflict(String),

    #[error("Invalid resource descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Invalid version: {0}")]
    Version(#[from] VersionParseError),

    #[error("Invalid filter: {0}")]
    Filter(#[from] FilterParseError),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for ResolverError {
    fn from(e: serde_json::Error) -> Self {
        ResolverError::SerializationError(e.to_string())
    }
}

impl From<toml::de::Error> for ResolverError {
    fn from(e: toml::de::Error) -> Self {
        ResolverError::SerializationError(e.to_string())
    }
}

/// Outcome of a failed `resolve` call
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Nothing in the batch could be resolved
    #[error("Resolution failed for {} resource(s)", .0.len())]
    Unresolved(ResolutionReport),

    /// A resolver hook failed; the batch was abandoned
    #[error("Resolver hook failed: {source}")]
    Hook {
        source: HookError,
        report: ResolutionReport,
    },

    #[error(transparent)]
    Container(#[from] ResolverError),
}

impl ResolveError {
    /// The report attached to the failure, if any
    pub fn report(&self) -> Option<&ResolutionReport> {
        match self {
            ResolveError::Unresolved(report) | ResolveError::Hook { report, .. } => Some(report),
            ResolveError::Container(_) => None,
        }
    }
}
