//! Resource descriptor files
//!
//! Descriptors are an already-structured form of resource metadata, read from
//! TOML or JSON, used by tooling and tests to install sets of resources:
//!
//! ```toml
//! [[resource]]
//! symbolic_name = "org.example.app"
//! version = "1.0.0"
//! imports = [{ package = "org.example.api", range = "[1.0,2.0)" }]
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use crate::module::capability::{
    directive, Attributes, Capability, Directives, Effective, Requirement,
};
use crate::module::filter::Filter;
use crate::module::resource::ResourceBuilder;
use crate::module::traits::ResolverError;
use crate::module::version::{Version, VersionRange};

const MAX_NAME_LEN: usize = 256;

fn default_version() -> String {
    "0.0.0".to_string()
}

/// A file's worth of resource descriptors
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DescriptorSet {
    #[serde(rename = "resource", default)]
    pub resources: Vec<ResourceDescriptor>,
}

impl DescriptorSet {
    /// Load descriptors; `.json` files are read as JSON, everything else as TOML
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ResolverError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ResolverError::InvalidDescriptor(format!(
                "Failed to read descriptor file {}: {}",
                path.display(),
                e
            ))
        })?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let set = if is_json {
            Self::from_json_str(&contents)?
        } else {
            Self::from_toml_str(&contents)?
        };
        debug!(
            "Loaded {} resource descriptor(s) from {}",
            set.resources.len(),
            path.display()
        );
        Ok(set)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ResolverError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_json_str(s: &str) -> Result<Self, ResolverError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Validate every descriptor, collecting all problems
    pub fn validate(&self) -> Result<(), ResolverError> {
        let errors: Vec<String> = self
            .resources
            .iter()
            .flat_map(ResourceDescriptor::problems)
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            warn!("Descriptor validation failed: {:?}", errors);
            Err(ResolverError::InvalidDescriptor(errors.join("; ")))
        }
    }
}

/// Exported package
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDescriptor {
    pub package: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub uses: Vec<String>,
    /// Attributes a requirement must name to match this export
    #[serde(default)]
    pub mandatory: Vec<String>,
    #[serde(default)]
    pub attributes: Attributes,
}

/// Imported package
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportDescriptor {
    pub package: String,
    #[serde(default)]
    pub range: Option<String>,
    #[serde(default)]
    pub optional: bool,
}

/// Required module (require-bundle) or fragment host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedDescriptor {
    pub name: String,
    #[serde(default)]
    pub range: Option<String>,
    #[serde(default)]
    pub optional: bool,
}

/// Capability in an arbitrary namespace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub namespace: String,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub directives: Directives,
}

/// Requirement in an arbitrary namespace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequirementDescriptor {
    pub namespace: String,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub multiple: bool,
    #[serde(default)]
    pub effective: Effective,
}

/// One resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub symbolic_name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub singleton: bool,
    #[serde(default)]
    pub fragment_host: Option<NamedDescriptor>,
    #[serde(default)]
    pub exports: Vec<ExportDescriptor>,
    #[serde(default)]
    pub imports: Vec<ImportDescriptor>,
    #[serde(default)]
    pub require_bundles: Vec<NamedDescriptor>,
    #[serde(default)]
    pub capabilities: Vec<CapabilityDescriptor>,
    #[serde(default)]
    pub requirements: Vec<RequirementDescriptor>,
}

impl ResourceDescriptor {
    /// Problems found in this descriptor, empty when valid
    pub fn problems(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let who = &self.symbolic_name;

        if !is_valid_name(&self.symbolic_name) {
            errors.push(format!(
                "Invalid symbolic name: {:?} (alphanumeric with '.', '-' or '_')",
                self.symbolic_name
            ));
        }
        if let Err(e) = Version::parse(&self.version) {
            errors.push(format!("{}: {}", who, e));
        }

        for export in &self.exports {
            if !is_valid_name(&export.package) {
                errors.push(format!("{}: invalid package name {:?}", who, export.package));
            }
            if let Err(e) = Version::parse(&export.version) {
                errors.push(format!("{}: export {}: {}", who, export.package, e));
            }
        }
        for import in &self.imports {
            if !is_valid_name(&import.package) {
                errors.push(format!("{}: invalid package name {:?}", who, import.package));
            }
            if let Some(Err(e)) = import.range.as_deref().map(VersionRange::parse) {
                errors.push(format!("{}: import {}: {}", who, import.package, e));
            }
        }
        for named in self.require_bundles.iter().chain(self.fragment_host.iter()) {
            if !is_valid_name(&named.name) {
                errors.push(format!("{}: invalid module name {:?}", who, named.name));
            }
            if let Some(Err(e)) = named.range.as_deref().map(VersionRange::parse) {
                errors.push(format!("{}: {}: {}", who, named.name, e));
            }
        }
        for cap in &self.capabilities {
            if cap.namespace.trim().is_empty() {
                errors.push(format!("{}: capability with empty namespace", who));
            }
        }
        for req in &self.requirements {
            if req.namespace.trim().is_empty() {
                errors.push(format!("{}: requirement with empty namespace", who));
            }
            if let Some(Err(e)) = req.filter.as_deref().map(Filter::parse) {
                errors.push(format!("{}: requirement in {}: {}", who, req.namespace, e));
            }
        }
        errors
    }

    /// Turn the descriptor into a resource builder
    pub fn to_builder(&self) -> Result<ResourceBuilder, ResolverError> {
        let problems = self.problems();
        if !problems.is_empty() {
            return Err(ResolverError::InvalidDescriptor(problems.join("; ")));
        }

        let mut builder = ResourceBuilder::new(&self.symbolic_name, Version::parse(&self.version)?)
            .singleton(self.singleton);

        if let Some(host) = &self.fragment_host {
            builder = builder.fragment_host(&host.name, parse_range(&host.range)?);
        }
        for export in &self.exports {
            let mut cap = Capability::package(&export.package, Version::parse(&export.version)?);
            for (key, value) in &export.attributes {
                cap = cap.with_attribute(key, value.clone());
            }
            if !export.uses.is_empty() {
                cap = cap.with_directive(directive::USES, &export.uses.join(","));
            }
            if !export.mandatory.is_empty() {
                cap = cap.with_directive(directive::MANDATORY, &export.mandatory.join(","));
            }
            builder = builder.capability(cap);
        }
        for import in &self.imports {
            let mut req = Requirement::package(&import.package, &parse_range(&import.range)?);
            if import.optional {
                req = req.optional();
            }
            builder = builder.requirement(req);
        }
        for bundle in &self.require_bundles {
            let mut req = Requirement::named(
                crate::module::capability::namespace::BUNDLE,
                &bundle.name,
                &parse_range(&bundle.range)?,
            );
            if bundle.optional {
                req = req.optional();
            }
            builder = builder.requirement(req);
        }
        for cap in &self.capabilities {
            let mut capability = Capability::new(&cap.namespace);
            capability.attributes = cap.attributes.clone();
            capability.directives = cap.directives.clone();
            builder = builder.capability(capability);
        }
        for req in &self.requirements {
            let filter = req.filter.as_deref().map(Filter::parse).transpose()?;
            let mut requirement =
                Requirement::new(&req.namespace, filter).with_effective(req.effective);
            if req.optional {
                requirement = requirement.optional();
            }
            if req.multiple {
                requirement = requirement.multiple();
            }
            builder = builder.requirement(requirement);
        }
        Ok(builder)
    }
}

fn parse_range(range: &Option<String>) -> Result<VersionRange, ResolverError> {
    match range {
        Some(r) => Ok(VersionRange::parse(r)?),
        None => Ok(VersionRange::default()),
    }
}

/// Names: non-empty, bounded, start alphanumeric, then alphanumeric or `.-_`
#[inline]
fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return false;
    }
    if !name.chars().next().map_or(false, |c| c.is_alphanumeric()) {
        return false;
    }
    name.chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::capability::namespace;
    use crate::module::resource::ResourceId;

    const SAMPLE: &str = r#"
[[resource]]
symbolic_name = "org.example.api"
version = "1.2.0"
exports = [{ package = "org.example.api", version = "1.2.0", uses = ["org.example.util"] }]

[[resource]]
symbolic_name = "org.example.app"
imports = [
  { package = "org.example.api", range = "[1.0,2.0)" },
  { package = "org.example.log", optional = true },
]

[[resource.requirements]]
namespace = "execution-environment"
filter = "(execution-environment=JavaSE-1.8)"
"#;

    #[test]
    fn test_toml_descriptors_build_resources() {
        let set = DescriptorSet::from_toml_str(SAMPLE).unwrap();
        set.validate().unwrap();
        assert_eq!(set.resources.len(), 2);

        let app = set.resources[1].to_builder().unwrap().build(ResourceId(2));
        assert_eq!(app.version, Version::empty());
        assert_eq!(app.requirements.len(), 3);
        assert!(app.requirements[1].is_optional());
        assert_eq!(app.requirements[2].namespace, namespace::EXECUTION_ENVIRONMENT);

        let api = set.resources[0].to_builder().unwrap().build(ResourceId(1));
        let export = api.capabilities_in(namespace::PACKAGE).next().unwrap();
        assert_eq!(export.directive_list(directive::USES), vec!["org.example.util"]);
        assert!(app.requirements[0].matches(export));
    }

    #[test]
    fn test_validation_collects_every_problem() {
        let json = r#"{"resource": [
            {"symbolic_name": "-bad", "version": "x.y"},
            {"symbolic_name": "ok", "imports": [{"package": "p", "range": "[2.0"}]}
        ]}"#;
        let set = DescriptorSet::from_json_str(json).unwrap();
        match set.validate() {
            Err(ResolverError::InvalidDescriptor(msg)) => {
                assert!(msg.contains("Invalid symbolic name"));
                assert!(msg.contains("x.y"));
                assert!(msg.contains("import p"));
            }
            other => panic!("expected invalid descriptor, got {:?}", other),
        }
    }

    #[test]
    fn test_from_file_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("set.toml");
        std::fs::write(&toml_path, SAMPLE).unwrap();
        assert_eq!(DescriptorSet::from_file(&toml_path).unwrap().resources.len(), 2);

        let json_path = dir.path().join("set.json");
        std::fs::write(&json_path, r#"{"resource": [{"symbolic_name": "a"}]}"#).unwrap();
        assert_eq!(DescriptorSet::from_file(&json_path).unwrap().resources.len(), 1);

        assert!(DescriptorSet::from_file(dir.path().join("missing.toml")).is_err());
    }
}
