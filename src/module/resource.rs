//! Module revisions (resources)
//!
//! A resource is immutable once built. Updating a module creates a new resource
//! with a new id; the old one stays valid for any wiring that references it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::module::capability::{
    attribute, directive, namespace, Capability, Requirement,
};
use crate::module::version::{Version, VersionRange};

/// Stable resource identity; ids are handed out in installation order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId(pub u64);

impl ResourceId {
    /// Placeholder owner for capabilities that do not belong to a resource yet
    pub const UNASSIGNED: ResourceId = ResourceId(0);
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity `type` attribute values
pub const TYPE_MODULE: &str = "module";
pub const TYPE_FRAGMENT: &str = "fragment";

/// Installed module revision
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: ResourceId,
    pub symbolic_name: String,
    pub version: Version,
    pub capabilities: Vec<Arc<Capability>>,
    pub requirements: Vec<Arc<Requirement>>,
    pub is_singleton: bool,
    pub is_fragment: bool,
}

impl Resource {
    /// Start building a resource
    pub fn builder(symbolic_name: &str, version: Version) -> ResourceBuilder {
        ResourceBuilder::new(symbolic_name, version)
    }

    /// The identity capability every resource carries
    pub fn identity(&self) -> Option<&Arc<Capability>> {
        self.capabilities
            .iter()
            .find(|c| c.namespace == namespace::IDENTITY)
    }

    /// Capabilities in `ns`
    pub fn capabilities_in<'a>(
        &'a self,
        ns: &'a str,
    ) -> impl Iterator<Item = &'a Arc<Capability>> + 'a {
        self.capabilities.iter().filter(move |c| c.namespace == ns)
    }

    /// Names of packages this resource exports
    pub fn exported_packages(&self) -> impl Iterator<Item = &str> + '_ {
        self.capabilities.iter().filter_map(|c| c.package_name())
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.symbolic_name, self.version, self.id)
    }
}

/// Builder for resources
///
/// Capabilities and requirements are collected unowned; `build` stamps the owner
/// id onto each and prepends the identity capability (plus the `bundle` and
/// `host` capabilities for non-fragments).
#[derive(Debug, Clone)]
pub struct ResourceBuilder {
    symbolic_name: String,
    version: Version,
    singleton: bool,
    fragment: bool,
    capabilities: Vec<Capability>,
    requirements: Vec<Requirement>,
}

impl ResourceBuilder {
    pub fn new(symbolic_name: &str, version: Version) -> Self {
        Self {
            symbolic_name: symbolic_name.to_string(),
            version,
            singleton: false,
            fragment: false,
            capabilities: Vec::new(),
            requirements: Vec::new(),
        }
    }

    pub fn symbolic_name(&self) -> &str {
        &self.symbolic_name
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn is_singleton(&self) -> bool {
        self.singleton
    }

    pub fn singleton(mut self, singleton: bool) -> Self {
        self.singleton = singleton;
        self
    }

    pub fn capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn requirement(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    pub fn export_package(self, name: &str, version: Version) -> Self {
        self.capability(Capability::package(name, version))
    }

    /// Export with a `uses` directive listing the packages the export depends on
    pub fn export_package_uses(self, name: &str, version: Version, uses: &[&str]) -> Self {
        self.capability(
            Capability::package(name, version).with_directive(directive::USES, &uses.join(",")),
        )
    }

    pub fn import_package(self, name: &str, range: VersionRange) -> Self {
        self.requirement(Requirement::package(name, &range))
    }

    pub fn import_package_optional(self, name: &str, range: VersionRange) -> Self {
        self.requirement(Requirement::package(name, &range).optional())
    }

    pub fn require_bundle(self, name: &str, range: VersionRange) -> Self {
        self.requirement(Requirement::named(namespace::BUNDLE, name, &range))
    }

    /// Mark as a fragment attaching to `host`
    pub fn fragment_host(mut self, host: &str, range: VersionRange) -> Self {
        self.fragment = true;
        self.requirement(Requirement::named(namespace::HOST, host, &range))
    }

    /// Require an execution environment by name
    pub fn require_environment(self, name: &str) -> Self {
        self.requirement(Requirement::named(
            namespace::EXECUTION_ENVIRONMENT,
            name,
            &VersionRange::default(),
        ))
    }

    /// Stamp ownership and produce the immutable resource
    pub fn build(self, id: ResourceId) -> Resource {
        let mut identity =
            Capability::named(namespace::IDENTITY, &self.symbolic_name, self.version.clone())
                .with_attribute(
                    attribute::TYPE,
                    if self.fragment { TYPE_FRAGMENT } else { TYPE_MODULE },
                );
        if self.singleton {
            identity = identity.with_directive(directive::SINGLETON, "true");
        }

        let mut capabilities = vec![identity];
        if !self.fragment {
            capabilities.push(Capability::named(
                namespace::BUNDLE,
                &self.symbolic_name,
                self.version.clone(),
            ));
            capabilities.push(Capability::named(
                namespace::HOST,
                &self.symbolic_name,
                self.version.clone(),
            ));
        }
        capabilities.extend(self.capabilities);

        let capabilities = capabilities
            .into_iter()
            .map(|mut c| {
                c.owner = id;
                Arc::new(c)
            })
            .collect();
        let requirements = self
            .requirements
            .into_iter()
            .map(|mut r| {
                r.owner = id;
                Arc::new(r)
            })
            .collect();

        Resource {
            id,
            symbolic_name: self.symbolic_name,
            version: self.version,
            capabilities,
            requirements,
            is_singleton: self.singleton,
            is_fragment: self.fragment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::capability::AttributeValue;

    #[test]
    fn test_build_stamps_owner_and_identity() {
        let r = Resource::builder("a", Version::new(1, 0, 0))
            .export_package("p", Version::new(1, 5, 0))
            .import_package("q", VersionRange::default())
            .build(ResourceId(7));

        assert!(r.capabilities.iter().all(|c| c.owner == ResourceId(7)));
        assert!(r.requirements.iter().all(|q| q.owner == ResourceId(7)));

        let identity = r.identity().unwrap();
        assert_eq!(identity.name(), Some("a"));
        assert_eq!(identity.version(), Some(&Version::new(1, 0, 0)));
        assert_eq!(r.exported_packages().collect::<Vec<_>>(), vec!["p"]);
        assert_eq!(r.capabilities_in(namespace::HOST).count(), 1);
    }

    #[test]
    fn test_fragments_offer_no_host_capability() {
        let f = Resource::builder("a.frag", Version::new(1, 0, 0))
            .fragment_host("a", VersionRange::default())
            .build(ResourceId(2));
        assert!(f.is_fragment);
        assert_eq!(f.capabilities_in(namespace::HOST).count(), 0);
        assert_eq!(
            f.identity().unwrap().attributes.get(attribute::TYPE),
            Some(&AttributeValue::from(TYPE_FRAGMENT))
        );
    }
}
