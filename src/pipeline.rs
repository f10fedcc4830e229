//! Dataset loading: source → CRS normalisation → decoding → reconciliation.

use std::path::PathBuf;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{dataset_key, AttributeRef, Config, ConfigError, DatasetConfig};
use crate::countries::read_countries;
use crate::crs::{self, CrsError};
use crate::overlay::OverlayHost;
use crate::reconcile::{marker_id, Reconciler};
use crate::source::{Feature, Source, SourceError};
use crate::wkt::decode_polygon;

/// Failure that aborts a single dataset.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Crs(#[from] CrsError),

    #[error("No world found for {0}!")]
    WorldOrPlaneNotFound(String),

    #[error("Error creating marker set {0}")]
    LayerUnavailable(String),
}

/// Failure that aborts the whole run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("No usable dataset configuration")]
    NoDatasets,
}

/// Outcome of one dataset load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub dataset: String,
    pub source: PathBuf,
    /// Set when the markers came from a reprojected copy.
    pub reprojected: Option<PathBuf>,
    pub features: usize,
    pub rings: usize,
    pub polylines: usize,
    pub points: usize,
    pub replaced: usize,
    /// Polylines left over from an earlier load that were deleted.
    pub removed: usize,
    pub malformed_tokens: usize,
    pub malformed_rings: usize,
    pub failed_markers: usize,
    pub unreadable_features: usize,
    pub skipped_countries: usize,
}

impl LoadReport {
    /// True when anything in the dataset could not be turned into a marker.
    pub fn had_errors(&self) -> bool {
        self.malformed_tokens > 0
            || self.malformed_rings > 0
            || self.failed_markers > 0
            || self.unreadable_features > 0
            || self.skipped_countries > 0
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub loaded: Vec<LoadReport>,
    pub failed: Vec<(String, LoadError)>,
}

/// Attribute positions (1-based) to decode for `feature`.
fn geometry_positions(feature: &Feature, selector: Option<&AttributeRef>) -> Vec<usize> {
    match selector {
        None => (1..=feature.attributes.len()).collect(),
        Some(AttributeRef::Index(position)) => vec![*position],
        Some(AttributeRef::Name(name)) => feature
            .attributes
            .iter()
            .position(|(attribute, _)| attribute == name)
            .map(|index| vec![index + 1])
            .unwrap_or_default(),
    }
}

fn feature_label(feature: &Feature, selector: Option<&AttributeRef>) -> String {
    let value = match selector {
        None => None,
        Some(AttributeRef::Index(position)) => feature.attribute_at(*position),
        Some(AttributeRef::Name(name)) => feature.attribute(name),
    };
    value.unwrap_or_default().to_string()
}

/// Loads one dataset into the host and reports what happened.
///
/// Nothing is written to the host before the source, its CRS and the target
/// plane have all been resolved.
pub fn load_dataset<H: OverlayHost>(
    config: &Config,
    name: &str,
    dataset: &DatasetConfig,
    host: &mut H,
) -> Result<LoadReport, LoadError> {
    let key = dataset_key(name);
    let path = config.shapefile_path(dataset);

    let mut source = Source::open(&path)?;
    let schema = source.schema()?;
    info!(dataset = %key, crs = %schema.crs.code, "Opened {}", source.path().display());

    let world = dataset.world.as_ref().ok_or_else(|| ConfigError::Missing {
        dataset: key.clone(),
        key: "world",
    })?;
    let plane = host
        .resolve_plane(world)
        .ok_or_else(|| LoadError::WorldOrPlaneNotFound(world.to_string()))?;

    let mut report = LoadReport {
        dataset: key.clone(),
        source: source.path().to_path_buf(),
        ..LoadReport::default()
    };

    if crs::needs_reprojection(&schema.crs) {
        info!("Translating {} to a readable format...", source.path().display());
        let copy = crs::normalize(&source, &schema.crs)?;
        info!("Translating finished.");
        source = Source::open(&copy)?;
        report.reprojected = Some(copy);
    }

    let layer = host
        .layer(&config.layer_id, &config.layer_name)
        .ok_or_else(|| LoadError::LayerUnavailable(config.layer_id.clone()))?;
    let mut reconciler = Reconciler::new(layer, &plane, dataset.projection());
    reconciler.sync_layer(&config.layer_name, &dataset.style);

    let line_style = dataset.style.line_style();
    let mut features = source.features()?;
    for item in features.iter() {
        let feature = match item {
            Ok(feature) => feature,
            Err(err) => {
                warn!("Stopped reading {}: {}", key, err);
                report.unreadable_features += 1;
                break;
            }
        };
        report.features += 1;
        let label = feature_label(&feature, dataset.name_attribute.as_ref());

        for position in geometry_positions(&feature, dataset.geometry_attribute.as_ref()) {
            let Some(decoded) = decode_polygon(feature.attribute_at(position)) else {
                continue;
            };
            report.malformed_tokens += decoded.malformed_tokens;
            report.malformed_rings += decoded.malformed_rings;

            for (polygon_index, ring) in decoded.rings.iter().enumerate() {
                report.rings += 1;
                let id = marker_id(&key, feature.index, position, polygon_index);
                // failures are logged and counted by the reconciler
                let _ = reconciler.upsert_ring(&id, &label, ring, &line_style);
            }
        }
    }
    drop(features);

    // a partial read says nothing about the rings it never reached
    if report.unreadable_features == 0 {
        reconciler.sweep_stale(&key);
    }

    if dataset.style.enable_country_markers {
        let countries_path = config.countries_path();
        match read_countries(&countries_path) {
            Ok(list) => {
                report.skipped_countries += list.skipped;
                for record in &list.records {
                    let _ = reconciler.upsert_point(record, &dataset.style.marker_icon);
                }
                info!("Country markers enabled!");
            }
            Err(err) => {
                warn!(
                    "Countries file {} not found. Country markers not loaded: {}",
                    countries_path.display(),
                    err
                );
                report.skipped_countries += 1;
            }
        }
    }

    let stats = reconciler.stats();
    report.polylines = stats.polylines;
    report.points = stats.points;
    report.replaced = stats.replaced;
    report.removed = stats.removed;
    report.failed_markers = stats.failed;

    if report.had_errors() {
        warn!(
            malformed_rings = report.malformed_rings,
            malformed_tokens = report.malformed_tokens,
            failed_markers = report.failed_markers,
            unreadable_features = report.unreadable_features,
            "Shapefile {} loaded with errors, likely malformed input",
            key
        );
    } else {
        info!(
            polylines = report.polylines,
            points = report.points,
            "Shapefile {} successfully loaded!",
            key
        );
    }
    Ok(report)
}

/// Loads every configured dataset in order. Dataset failures are logged and
/// collected; only the lack of any usable dataset configuration is fatal.
pub fn run<H: OverlayHost>(config: &Config, host: &mut H) -> Result<RunSummary, RunError> {
    let datasets = config.datasets();
    let mut summary = RunSummary::default();
    let mut usable = 0;

    for (name, parsed) in datasets {
        let key = dataset_key(&name);
        let dataset = match parsed {
            Ok(dataset) => dataset,
            Err(err) => {
                error!("{}", err);
                summary.failed.push((key, err.into()));
                continue;
            }
        };
        usable += 1;

        match load_dataset(config, &name, &dataset, host) {
            Ok(report) => summary.loaded.push(report),
            Err(err) => {
                error!("Shapefile {} not loaded: {}", key, err);
                summary.failed.push((key, err));
            }
        }
    }

    if usable == 0 {
        return Err(RunError::NoDatasets);
    }
    Ok(summary)
}
