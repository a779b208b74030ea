//! bllvm-resolver - module resolution engine
//!
//! Given installed module revisions that expose capabilities and declare
//! requirements, decides which of them can be wired together into a
//! consistent dependency graph:
//!
//! - version-range matching and LDAP-style filters over typed attributes
//! - backtracking search with an explicit choice-point stack
//! - uses-constraint checking so no consumer sees two providers of one package
//! - singleton selection and a shrink-only hook SPI
//! - atomic publication of wirings under per-resource locks
//!
//! ```rust
//! use bllvm_resolver::module::{ModuleContainer, Resource, Version, VersionRange};
//!
//! let container = ModuleContainer::default();
//! let api = container
//!     .install(
//!         Resource::builder("api", Version::new(1, 0, 0))
//!             .export_package("api", Version::new(1, 5, 0)),
//!     )
//!     .unwrap();
//! let app = container
//!     .install(
//!         Resource::builder("app", Version::new(1, 0, 0))
//!             .import_package("api", VersionRange::parse("[1.0,2.0)").unwrap()),
//!     )
//!     .unwrap();
//!
//! let batch = container.resolve(&[app.id]).unwrap();
//! assert!(batch.get(app.id).unwrap().providers().contains(&api.id));
//! ```

pub mod config;
pub mod module;
pub mod utils;

pub use config::{CollisionPolicy, LoggingConfig, ResolverConfig};
