//! YAML configuration.
//!
//! Keys are camelCase so existing `config.yml` files keep working. Each entry
//! under `shapefiles` is deserialized on its own: a broken section only takes
//! its own dataset down.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::overlay::LineStyle;
use crate::projection::{Projection, DEFAULT_PLANE_HEIGHT, DEFAULT_UNITS_PER_SCALE};

pub const DEFAULT_LAYER_ID: &str = "countries.markerset";
pub const DEFAULT_LAYER_NAME: &str = "Countries";
pub const DEFAULT_COUNTRIES_PATH: &str = "countries.txt";
pub const DEFAULT_SHAPEFILE_PATH: &str = "countryborders";
pub const DEFAULT_COLOR: u32 = 0xCC66CC;
pub const DEFAULT_MARKER_ICON: &str = "king";

/// Prefix of every dataset key, and so of every polyline marker id.
pub const DATASET_KEY_PREFIX: &str = "shapefiles";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration for {dataset}: {source}")]
    Dataset {
        dataset: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Missing configuration value {dataset}.{key}")]
    Missing { dataset: String, key: &'static str },

    #[error("Invalid configuration: {dataset}.{key} - {reason}")]
    Invalid {
        dataset: String,
        key: &'static str,
        reason: String,
    },
}

/// A value given either by name or by position.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum NameOrIndex {
    Index(usize),
    Name(String),
}

impl fmt::Display for NameOrIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameOrIndex::Index(index) => write!(f, "#{index}"),
            NameOrIndex::Name(name) => f.write_str(name),
        }
    }
}

/// Target world/plane; an index counts into the host's plane list.
pub type WorldRef = NameOrIndex;

/// Attribute selector; an index is the 1-based attribute position.
pub type AttributeRef = NameOrIndex;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub layer_id: String,
    pub layer_name: String,
    /// Base directory for the relative paths below.
    pub data_dir: PathBuf,
    pub countries_path: PathBuf,
    /// Raw dataset sections, in file order.
    pub shapefiles: serde_yaml::Mapping,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            layer_id: DEFAULT_LAYER_ID.to_string(),
            layer_name: DEFAULT_LAYER_NAME.to_string(),
            data_dir: PathBuf::from("."),
            countries_path: PathBuf::from(DEFAULT_COUNTRIES_PATH),
            shapefiles: serde_yaml::Mapping::new(),
        }
    }
}

impl Config {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Loads a config file. A relative `dataDir` is taken relative to the
    /// directory holding the file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml_str(&text)?;
        if config.data_dir.is_relative() {
            if let Some(parent) = path.parent() {
                config.data_dir = parent.join(&config.data_dir);
            }
        }
        Ok(config)
    }

    /// Every configured dataset with its parsed (or failed) settings.
    pub fn datasets(&self) -> Vec<(String, Result<DatasetConfig, ConfigError>)> {
        self.shapefiles
            .iter()
            .map(|(key, value)| {
                let name = match key {
                    serde_yaml::Value::String(name) => name.clone(),
                    other => serde_yaml::to_string(other)
                        .map(|s| s.trim().to_string())
                        .unwrap_or_default(),
                };
                let dataset = dataset_key(&name);
                let parsed = serde_yaml::from_value::<DatasetConfig>(value.clone())
                    .map_err(|source| ConfigError::Dataset {
                        dataset: dataset.clone(),
                        source,
                    })
                    .and_then(|parsed| parsed.validate(&dataset).map(|()| parsed));
                (name, parsed)
            })
            .collect()
    }

    pub fn shapefile_path(&self, dataset: &DatasetConfig) -> PathBuf {
        self.data_dir.join(&dataset.shapefile_path)
    }

    pub fn countries_path(&self) -> PathBuf {
        self.data_dir.join(&self.countries_path)
    }
}

/// `shapefiles.<name>`, the key marker ids are derived from.
pub fn dataset_key(name: &str) -> String {
    format!("{DATASET_KEY_PREFIX}.{name}")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetConfig {
    #[serde(default = "default_scaling")]
    pub scaling: f64,
    #[serde(default)]
    pub x_offset: i32,
    #[serde(default = "default_y")]
    pub y: i32,
    #[serde(default)]
    pub z_offset: i32,
    #[serde(default)]
    pub world: Option<WorldRef>,
    #[serde(default = "default_shapefile_path")]
    pub shapefile_path: PathBuf,
    /// Only this attribute is decoded when set; otherwise every attribute
    /// holding polygon text is.
    #[serde(default)]
    pub geometry_attribute: Option<AttributeRef>,
    /// Attribute used as the polyline label.
    #[serde(default)]
    pub name_attribute: Option<AttributeRef>,
    #[serde(default)]
    pub style: StyleConfig,
}

impl DatasetConfig {
    fn validate(&self, dataset: &str) -> Result<(), ConfigError> {
        if self.world.is_none() {
            return Err(ConfigError::Missing {
                dataset: dataset.to_string(),
                key: "world",
            });
        }
        if !self.scaling.is_finite() || self.scaling <= 0.0 {
            return Err(ConfigError::Invalid {
                dataset: dataset.to_string(),
                key: "scaling",
                reason: format!("must be a positive number, got {}", self.scaling),
            });
        }
        if !(0.0..=1.0).contains(&self.style.line_opacity) {
            return Err(ConfigError::Invalid {
                dataset: dataset.to_string(),
                key: "style.lineOpacity",
                reason: format!("must be within 0..1, got {}", self.style.line_opacity),
            });
        }
        if self.style.color > 0xFF_FFFF {
            return Err(ConfigError::Invalid {
                dataset: dataset.to_string(),
                key: "style.color",
                reason: format!("{:#x} is not a 24-bit colour", self.style.color),
            });
        }
        Ok(())
    }

    pub fn projection(&self) -> Projection {
        Projection::from_units_per_scale(self.scaling, self.x_offset, self.y, self.z_offset)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StyleConfig {
    pub color: u32,
    pub line_thickness: i32,
    pub line_opacity: f64,
    /// Zero leaves the layer's current minimum zoom untouched.
    pub minimum_zoom: i32,
    pub priority: i32,
    pub hide_by_default: bool,
    pub marker_icon: String,
    pub enable_country_markers: bool,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            color: DEFAULT_COLOR,
            line_thickness: 3,
            line_opacity: 0.5,
            minimum_zoom: 0,
            priority: 12,
            hide_by_default: true,
            marker_icon: DEFAULT_MARKER_ICON.to_string(),
            enable_country_markers: false,
        }
    }
}

impl StyleConfig {
    pub fn line_style(&self) -> LineStyle {
        LineStyle {
            thickness: self.line_thickness,
            opacity: self.line_opacity,
            color: self.color,
        }
    }
}

fn default_scaling() -> f64 {
    DEFAULT_UNITS_PER_SCALE
}

fn default_y() -> i32 {
    DEFAULT_PLANE_HEIGHT
}

fn default_shapefile_path() -> PathBuf {
    PathBuf::from(DEFAULT_SHAPEFILE_PATH)
}
