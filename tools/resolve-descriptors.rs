//! Install a descriptor file into a fresh container and resolve everything
//!
//! Prints the resulting wirings and the resolution report as JSON.
//!
//! Usage:
//!   resolve-descriptors <descriptors.toml|json> [--config <resolver.toml|json>] [--pretty]

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use bllvm_resolver::module::report::ResolutionReport;
use bllvm_resolver::module::wiring::WiringSummary;
use bllvm_resolver::module::{DescriptorSet, ModuleContainer, ResolveError, ResourceId};
use bllvm_resolver::utils::init_logging_from_config;
use bllvm_resolver::ResolverConfig;

#[derive(Parser, Debug)]
#[command(about = "Resolve a set of module descriptors and print the wiring graph")]
struct Args {
    /// Descriptor file (`.json` is read as JSON, anything else as TOML)
    descriptors: PathBuf,

    /// Resolver configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

#[derive(Serialize)]
struct Output {
    resolved: Vec<WiringSummary>,
    unresolved: Vec<ResourceId>,
    report: ResolutionReport,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ResolverConfig> {
    let Some(path) = path else {
        return Ok(ResolverConfig::default());
    };
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if is_json {
        ResolverConfig::from_json_file(path)
    } else {
        ResolverConfig::from_toml_file(path)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref())?;
    config.validate()?;
    init_logging_from_config(config.logging.as_ref());

    let descriptors = DescriptorSet::from_file(&args.descriptors)
        .with_context(|| format!("loading {}", args.descriptors.display()))?;

    let container = ModuleContainer::new(config);
    let installed = container.install_descriptors(&descriptors)?;
    let ids: Vec<ResourceId> = installed.iter().map(|r| r.id).collect();
    info!("Installed {} resource(s)", ids.len());

    let (wirings, report) = match container.resolve(&ids) {
        Ok(batch) => (batch.wirings, batch.report),
        Err(ResolveError::Unresolved(report)) => {
            warn!("Nothing could be resolved");
            (Default::default(), report)
        }
        Err(e) => return Err(e.into()),
    };

    let output = Output {
        resolved: wirings.values().map(|w| w.summary()).collect(),
        unresolved: ids
            .iter()
            .copied()
            .filter(|id| !wirings.contains_key(id))
            .collect(),
        report,
    };
    let json = if args.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{}", json);
    Ok(())
}
