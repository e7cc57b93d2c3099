//! Best-effort raster layer composition.
//!
//! Each layer is prepared by a function returning `Result<Layer>`. The
//! composer stacks every success in registration order and reports every
//! failure, so one unavailable dataset never sinks the whole expression.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::error::{GeobatchError, Result};

/// Declarative description of a layer, as written in a layers file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub name: String,
    pub bands: Vec<String>,
    /// Opaque parameters forwarded to the remote service
    #[serde(default)]
    pub params: Option<toml::Table>,
}

/// A prepared, validated layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub bands: Vec<String>,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// The stacked multi-band raster requested from the remote service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RasterExpression {
    pub layers: Vec<Layer>,
}

impl RasterExpression {
    /// Band names of all layers in stacking order
    pub fn band_names(&self) -> Vec<String> {
        self.layers.iter().flat_map(|l| l.bands.iter().cloned()).collect()
    }

    pub fn band_count(&self) -> usize {
        self.layers.iter().map(|l| l.bands.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.band_count() == 0
    }
}

/// A layer that could not be prepared
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerFailure {
    pub name: String,
    pub reason: String,
}

/// Outcome of composing all registered layers
#[derive(Debug, Clone)]
pub struct Composition {
    pub expression: RasterExpression,
    pub failures: Vec<LayerFailure>,
}

type Preparer = Box<dyn Fn() -> Result<Layer> + Send + Sync>;

/// Collects layer preparation functions and stacks their results
#[derive(Default)]
pub struct LayerComposer {
    preparers: Vec<(String, Preparer)>,
}

impl LayerComposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Composer that prepares each spec with [`prepare_layer`]
    pub fn from_specs(specs: Vec<LayerSpec>) -> Self {
        let mut composer = Self::new();
        for spec in specs {
            let name = spec.name.clone();
            composer.register(name, move || prepare_layer(&spec));
        }
        composer
    }

    pub fn register<F>(&mut self, name: impl Into<String>, preparer: F) -> &mut Self
    where
        F: Fn() -> Result<Layer> + Send + Sync + 'static,
    {
        self.preparers.push((name.into(), Box::new(preparer)));
        self
    }

    pub fn len(&self) -> usize {
        self.preparers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.preparers.is_empty()
    }

    /// Run every preparer; successes are stacked, failures collected
    pub fn compose(&self) -> Composition {
        let mut layers: Vec<Layer> = Vec::new();
        let mut failures = Vec::new();
        let mut seen_bands: HashSet<String> = HashSet::new();

        for (name, preparer) in &self.preparers {
            match preparer() {
                Ok(layer) => {
                    if let Some(dup) = layer.bands.iter().find(|b| seen_bands.contains(*b)) {
                        tracing::warn!(layer = %name, band = %dup, "Skipping layer with duplicate band");
                        failures.push(LayerFailure {
                            name: name.clone(),
                            reason: format!("band '{}' already provided by another layer", dup),
                        });
                        continue;
                    }
                    seen_bands.extend(layer.bands.iter().cloned());
                    layers.push(layer);
                }
                Err(e) => {
                    tracing::warn!(layer = %name, error = %e, "Layer preparation failed");
                    failures.push(LayerFailure { name: name.clone(), reason: e.to_string() });
                }
            }
        }

        tracing::debug!(
            layers = layers.len(),
            failures = failures.len(),
            "Layer composition finished"
        );

        Composition { expression: RasterExpression { layers }, failures }
    }
}

/// Validate a spec into a layer
pub fn prepare_layer(spec: &LayerSpec) -> Result<Layer> {
    if spec.name.trim().is_empty() {
        return Err(GeobatchError::ConfigInvalid {
            key: "layers.name".to_string(),
            reason: "layer name cannot be empty".to_string(),
        });
    }

    if spec.bands.is_empty() {
        return Err(GeobatchError::ConfigInvalid {
            key: format!("layers.{}.bands", spec.name),
            reason: "layer must declare at least one band".to_string(),
        });
    }

    let mut seen = HashSet::new();
    for band in &spec.bands {
        if band.is_empty() || !band.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(GeobatchError::ConfigInvalid {
                key: format!("layers.{}.bands", spec.name),
                reason: format!("band name '{}' must be alphanumeric or '_'", band),
            });
        }
        if !seen.insert(band) {
            return Err(GeobatchError::ConfigInvalid {
                key: format!("layers.{}.bands", spec.name),
                reason: format!("band '{}' listed twice", band),
            });
        }
    }

    let params = match &spec.params {
        Some(table) => serde_json::to_value(table)
            .map_err(|e| GeobatchError::Serialization(format!("Invalid layer params: {}", e)))?,
        None => serde_json::Value::Null,
    };

    Ok(Layer { name: spec.name.clone(), bands: spec.bands.clone(), params })
}

#[derive(Debug, Deserialize)]
struct LayersFile {
    #[serde(default)]
    layers: Vec<LayerSpec>,
}

/// Load layer specs from a TOML file with `[[layers]]` tables
pub fn load_layer_specs<P: AsRef<Path>>(path: P) -> Result<Vec<LayerSpec>> {
    let content = fs::read_to_string(path.as_ref()).map_err(|e| GeobatchError::ConfigInvalid {
        key: "layers".to_string(),
        reason: format!("Failed to read layers file {}: {}", path.as_ref().display(), e),
    })?;

    let file: LayersFile = toml::from_str(&content).map_err(|e| GeobatchError::ConfigInvalid {
        key: "layers".to_string(),
        reason: format!("Failed to parse TOML: {}", e),
    })?;

    Ok(file.layers)
}
