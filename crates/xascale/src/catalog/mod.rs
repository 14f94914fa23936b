//! Workloads known to the `xa` binary: the built-in ones and the
//! command-backed ones read from catalog files.

pub mod builtin;
pub mod command;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use xacore::workload::{ResourceRequirement, WorkloadDefinition, WorkloadRegistry};

use crate::Result;
use crate::catalog::command::{CommandWorkload, CommandWorkloadDef};
use crate::common::error::XaScaleError;
use crate::configfile::FileFormat;

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct CatalogDef {
    #[serde(default)]
    pub workloads: Vec<CommandWorkloadDef>,
}

impl CatalogDef {
    pub fn parse(content: &str, format: FileFormat) -> Result<CatalogDef> {
        let catalog: CatalogDef = match format {
            FileFormat::Toml => toml::from_str(content)?,
            FileFormat::Json => serde_json::from_str(content)
                .map_err(|error| XaScaleError::DeserializationError(error.to_string()))?,
        };
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<()> {
        for def in &self.workloads {
            if def.command.is_empty() {
                return Err(XaScaleError::CatalogError(format!(
                    "Workload `{}` has an empty command",
                    def.name
                )));
            }
        }
        Ok(())
    }
}

pub fn load_catalog(path: &Path) -> Result<CatalogDef> {
    let content = std::fs::read_to_string(path).map_err(|error| {
        XaScaleError::CatalogError(format!("Cannot read {}: {error}", path.display()))
    })?;
    CatalogDef::parse(&content, FileFormat::from_path(path))
}

fn command_definition(def: CommandWorkloadDef) -> Result<WorkloadDefinition> {
    let requirement = ResourceRequirement::new(def.resources.clone())?;
    let name = def.name.clone();
    let description = def.description.clone();
    let duration = def.duration;
    Ok(
        WorkloadDefinition::new(name, requirement, Arc::new(CommandWorkload::new(def)))
            .with_description(description)
            .with_default_duration(duration),
    )
}

/// Registers the built-in workloads followed by the workloads of the given
/// catalog files. Names have to be unique across all of them.
pub fn create_registry(catalogs: &[PathBuf]) -> Result<WorkloadRegistry> {
    let mut registry = WorkloadRegistry::new();
    for definition in builtin::builtin_workloads()? {
        registry.register(definition)?;
    }
    for path in catalogs {
        let catalog = load_catalog(path)?;
        log::debug!(
            "Catalog {} contains {} workload(s)",
            path.display(),
            catalog.workloads.len()
        );
        for def in catalog.workloads {
            registry.register(command_definition(def)?)?;
        }
    }
    Ok(registry)
}
