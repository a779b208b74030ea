//! Module system
//!
//! Installed module revisions (resources) expose capabilities and declare
//! requirements. The resolver decides which of them can be wired together into
//! a consistent graph; the container owns the installed set and the published
//! wirings.
//!
//! ## Layout
//!
//! - **Values**: [`version`], [`filter`], [`capability`], [`resource`]
//! - **State**: [`registry`] (installed graph, descriptors), [`wiring`]
//! - **Algorithm**: [`resolver`], driven through the [`hooks`] chain, reporting via [`report`]
//! - **Coordination**: [`lockset`], [`events`], [`container`]

pub mod capability;
pub mod container;
pub mod events;
pub mod filter;
pub mod hooks;
pub mod lockset;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod resource;
pub mod traits;
pub mod version;
pub mod wiring;

pub use capability::{namespace, AttributeValue, Capability, Requirement};
pub use container::ModuleContainer;
pub use events::{ContainerEvent, EventType};
pub use filter::Filter;
pub use hooks::{HookChain, ShrinkableCollection};
pub use lockset::{LockGuard, LockSet};
pub use registry::{DescriptorSet, ResourceGraph};
pub use report::{EntryData, EntryType, ReportEntry, ResolutionReport};
pub use resolver::{ResolveContext, Resolver};
pub use resource::{Resource, ResourceBuilder, ResourceId};
pub use traits::{
    CollisionHook, CollisionOperation, HookError, ReportListener, ResolveError, ResolverError,
    ResolverHook, ResolverHookFactory,
};
pub use version::{Version, VersionRange};
pub use wiring::{Wire, Wiring, WiringBatch, WiringState};
