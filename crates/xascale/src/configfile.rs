//! Loading of configuration layers from files.
//!
//! The format is chosen by the file extension: `.json` is parsed as JSON,
//! everything else as TOML. Durations are given in seconds.

use std::path::{Path, PathBuf};

use xacore::config::ConfigLayer;

use crate::Result;
use crate::common::error::XaScaleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Toml,
    Json,
}

impl FileFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => FileFormat::Json,
            _ => FileFormat::Toml,
        }
    }
}

pub fn parse_layer(content: &str, format: FileFormat) -> Result<ConfigLayer> {
    let layer: ConfigLayer = match format {
        FileFormat::Toml => toml::from_str(content)?,
        FileFormat::Json => serde_json::from_str(content).map_err(|error| {
            XaScaleError::DeserializationError(error.to_string())
        })?,
    };
    Ok(layer)
}

pub fn load_layer(path: &Path) -> Result<ConfigLayer> {
    let content = std::fs::read_to_string(path).map_err(|error| {
        XaScaleError::GenericError(format!(
            "Cannot read configuration file {}: {error}",
            path.display()
        ))
    })?;
    let layer = parse_layer(&content, FileFormat::from_path(path)).map_err(|error| {
        XaScaleError::GenericError(format!(
            "Invalid configuration file {}: {error}",
            path.display()
        ))
    })?;
    log::debug!("Loaded configuration layer from {}", path.display());
    Ok(layer.with_source(path.display().to_string()))
}

/// Loads the base layer and the override layers, in precedence order.
pub fn load_layers(paths: &[PathBuf]) -> Result<(Option<ConfigLayer>, Vec<ConfigLayer>)> {
    let mut layers = paths
        .iter()
        .map(|path| load_layer(path))
        .collect::<Result<Vec<_>>>()?;
    if layers.is_empty() {
        return Ok((None, Vec::new()));
    }
    let base = layers.remove(0);
    Ok((Some(base), layers))
}
