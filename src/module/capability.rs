//! Capability and requirement model
//!
//! Capabilities and requirements are generic attribute/directive bags keyed by
//! namespace. The resolver treats every namespace the same way except for the
//! uses-constraint check, which only looks at the package namespace.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::module::filter::Filter;
use crate::module::resource::ResourceId;
use crate::module::version::{Version, VersionRange};

/// Namespace vocabulary
///
/// In every namespace the capability attribute named after the namespace carries
/// the provided name (e.g. `package=org.example` in the package namespace).
pub mod namespace {
    /// Exported/imported packages
    pub const PACKAGE: &str = "package";
    /// Whole-module requirements (require-bundle)
    pub const BUNDLE: &str = "bundle";
    /// Fragment attachment
    pub const HOST: &str = "host";
    /// Symbolic name and version of every resource
    pub const IDENTITY: &str = "identity";
    /// Execution environment
    pub const EXECUTION_ENVIRONMENT: &str = "execution-environment";
}

/// Well-known attribute keys
pub mod attribute {
    pub const VERSION: &str = "version";
    pub const TYPE: &str = "type";
}

/// Well-known directive keys
pub mod directive {
    /// Attributes a filter must mention for the capability to match
    pub const MANDATORY: &str = "mandatory";
    /// Packages an exported package depends on
    pub const USES: &str = "uses";
    pub const SINGLETON: &str = "singleton";
}

/// Typed attribute value
///
/// Deserialization is untagged: integers become `Long`, floats `Double`, strings
/// that parse as a version become `Version`, everything else `String`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Long(i64),
    Double(f64),
    Version(Version),
    String(String),
    List(Vec<AttributeValue>),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_version(&self) -> Option<&Version> {
        match self {
            AttributeValue::Version(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Long(n) => write!(f, "{}", n),
            AttributeValue::Double(d) => write!(f, "{}", d),
            AttributeValue::Version(v) => write!(f, "{}", v),
            AttributeValue::String(s) => write!(f, "{}", s),
            AttributeValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                write!(f, "[{}]", parts.join(","))
            }
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<i64> for AttributeValue {
    fn from(n: i64) -> Self {
        AttributeValue::Long(n)
    }
}

impl From<Version> for AttributeValue {
    fn from(v: Version) -> Self {
        AttributeValue::Version(v)
    }
}

/// Attribute bag; ordered so that iteration and serialization are deterministic
pub type Attributes = BTreeMap<String, AttributeValue>;

/// Directive bag
pub type Directives = BTreeMap<String, String>;

/// Whether an unsatisfied requirement prevents resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    #[default]
    Mandatory,
    Optional,
}

/// How many providers a requirement is wired to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    #[default]
    Single,
    Multiple,
}

/// When a requirement takes effect; the resolver only wires `Resolve`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effective {
    #[default]
    Resolve,
    Active,
}

/// A named, attributed fact a resource offers
#[derive(Debug, Clone, PartialEq)]
pub struct Capability {
    pub namespace: String,
    pub attributes: Attributes,
    pub directives: Directives,
    /// Set when the owning resource is built
    pub owner: ResourceId,
}

impl Capability {
    /// Create an empty capability in `namespace`
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            attributes: Attributes::new(),
            directives: Directives::new(),
            owner: ResourceId::UNASSIGNED,
        }
    }

    /// Capability whose namespace attribute is `name` with the given version
    pub fn named(namespace: &str, name: &str, version: Version) -> Self {
        Self::new(namespace)
            .with_attribute(namespace, name)
            .with_attribute(attribute::VERSION, version)
    }

    /// Exported package
    pub fn package(name: &str, version: Version) -> Self {
        Self::named(namespace::PACKAGE, name, version)
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn with_directive(mut self, key: &str, value: &str) -> Self {
        self.directives.insert(key.to_string(), value.to_string());
        self
    }

    /// The value of the attribute named after the namespace
    pub fn name(&self) -> Option<&str> {
        self.attributes
            .get(&self.namespace)
            .and_then(AttributeValue::as_str)
    }

    /// The `version` attribute, if typed as a version
    pub fn version(&self) -> Option<&Version> {
        self.attributes
            .get(attribute::VERSION)
            .and_then(AttributeValue::as_version)
    }

    /// Package name when this is a package capability
    pub fn package_name(&self) -> Option<&str> {
        if self.namespace == namespace::PACKAGE {
            self.name()
        } else {
            None
        }
    }

    /// Names listed in a comma-separated directive
    pub fn directive_list(&self, key: &str) -> Vec<&str> {
        self.directives
            .get(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.namespace)?;
        for (k, v) in &self.attributes {
            write!(f, "; {}={}", k, v)?;
        }
        Ok(())
    }
}

/// A named, filtered need a resource declares
#[derive(Debug, Clone, PartialEq)]
pub struct Requirement {
    pub namespace: String,
    /// `None` matches every capability in the namespace
    pub filter: Option<Filter>,
    pub resolution: Resolution,
    pub cardinality: Cardinality,
    pub effective: Effective,
    /// Directives the resolver does not interpret
    pub directives: Directives,
    /// Set when the owning resource is built
    pub owner: ResourceId,
}

impl Requirement {
    pub fn new(namespace: &str, filter: Option<Filter>) -> Self {
        Self {
            namespace: namespace.to_string(),
            filter,
            resolution: Resolution::default(),
            cardinality: Cardinality::default(),
            effective: Effective::default(),
            directives: Directives::new(),
            owner: ResourceId::UNASSIGNED,
        }
    }

    /// Requirement on `name` within `namespace` whose version lies in `range`
    pub fn named(namespace: &str, name: &str, range: &VersionRange) -> Self {
        let filter = Filter::and(vec![
            Filter::eq(namespace, name),
            range.to_filter(attribute::VERSION),
        ]);
        Self::new(namespace, Some(filter))
    }

    /// Imported package
    pub fn package(name: &str, range: &VersionRange) -> Self {
        Self::named(namespace::PACKAGE, name, range)
    }

    pub fn optional(mut self) -> Self {
        self.resolution = Resolution::Optional;
        self
    }

    pub fn multiple(mut self) -> Self {
        self.cardinality = Cardinality::Multiple;
        self
    }

    pub fn with_effective(mut self, effective: Effective) -> Self {
        self.effective = effective;
        self
    }

    pub fn with_directive(mut self, key: &str, value: &str) -> Self {
        self.directives.insert(key.to_string(), value.to_string());
        self
    }

    pub fn is_optional(&self) -> bool {
        self.resolution == Resolution::Optional
    }

    pub fn is_multiple(&self) -> bool {
        self.cardinality == Cardinality::Multiple
    }

    /// Only `effective:=resolve` requirements take part in resolution
    pub fn is_resolve_time(&self) -> bool {
        self.effective == Effective::Resolve
    }

    /// Namespace, filter and `mandatory` directive all agree
    pub fn matches(&self, capability: &Capability) -> bool {
        if self.namespace != capability.namespace {
            return false;
        }
        let mandatory = capability.directive_list(directive::MANDATORY);
        match &self.filter {
            None => mandatory.is_empty(),
            Some(filter) => {
                if !mandatory.is_empty() {
                    let referenced = filter.referenced_attributes();
                    if !mandatory.iter().all(|m| referenced.contains(m)) {
                        return false;
                    }
                }
                filter.matches(&capability.attributes)
            }
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.namespace)?;
        if let Some(filter) = &self.filter {
            write!(f, " {}", filter)?;
        }
        if self.is_optional() {
            write!(f, " (optional)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_requirement_matches_version_range() {
        let req = Requirement::package("p", &VersionRange::parse("[1.0,2.0)").unwrap());
        assert!(req.matches(&Capability::package("p", Version::new(1, 5, 0))));
        assert!(!req.matches(&Capability::package("p", Version::new(2, 5, 0))));
        assert!(!req.matches(&Capability::package("q", Version::new(1, 5, 0))));
    }

    #[test]
    fn test_namespace_must_agree() {
        let req = Requirement::new(namespace::BUNDLE, None);
        assert!(!req.matches(&Capability::package("p", Version::new(1, 0, 0))));
        assert!(req.matches(&Capability::new(namespace::BUNDLE)));
    }

    #[test]
    fn test_mandatory_attributes_must_be_referenced() {
        let cap = Capability::package("p", Version::new(1, 0, 0))
            .with_attribute("vendor", "acme")
            .with_directive(directive::MANDATORY, "vendor");

        let plain = Requirement::package("p", &VersionRange::default());
        assert!(!plain.matches(&cap));

        let with_vendor = Requirement::new(
            namespace::PACKAGE,
            Some(Filter::parse("(&(package=p)(vendor=acme))").unwrap()),
        );
        assert!(with_vendor.matches(&cap));
    }

    #[test]
    fn test_directive_list_splits_and_trims() {
        let cap =
            Capability::package("p", Version::empty()).with_directive(directive::USES, "a, b,,c");
        assert_eq!(cap.directive_list(directive::USES), vec!["a", "b", "c"]);
        assert!(cap.directive_list("missing").is_empty());
    }

    #[test]
    fn test_attribute_value_untagged_deserialization() {
        let v: AttributeValue = serde_json::from_str("42").unwrap();
        assert_eq!(v, AttributeValue::Long(42));
        let v: AttributeValue = serde_json::from_str("\"1.2.3\"").unwrap();
        assert_eq!(v, AttributeValue::Version(Version::new(1, 2, 3)));
        let v: AttributeValue = serde_json::from_str("\"org.example\"").unwrap();
        assert_eq!(v, AttributeValue::String("org.example".into()));
    }
}
