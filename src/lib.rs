use std::path::Path;

use anyhow::Context;

pub mod config;
pub mod countries;
pub mod crs;
pub mod logging;
pub mod overlay;
pub mod pipeline;
pub mod projection;
pub mod reconcile;
pub mod source;
pub mod wkt;

pub use config::{Config, DatasetConfig};
pub use overlay::{MarkerLayer, MemoryHost, OverlayHost};
pub use pipeline::{load_dataset, run, LoadError, LoadReport, RunError, RunSummary};
pub use projection::{project, ProjectedPoint, Projection};

/// Reads the config at `path` and loads every dataset it lists into `host`.
pub fn process_config<H: OverlayHost>(path: &Path, host: &mut H) -> anyhow::Result<RunSummary> {
    let config = Config::from_path(path)
        .with_context(|| format!("Failed to load configuration {}", path.display()))?;
    Ok(pipeline::run(&config, host)?)
}
