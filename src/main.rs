use clap::{Arg, ArgAction, Command};
use std::fs::File;
use std::path::PathBuf;
use tracing::{error, info, warn};

use gis_overlay::{logging, process_config, MemoryHost};

fn main() {
    let matches = Command::new("GIS Overlay")
        .version("1.0")
        .author("Jesper Fjellin")
        .about("Loads border shapefiles and country points into a map marker layer")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .num_args(1)
                .required(true)
                .help("YAML configuration listing the shapefiles to load"),
        )
        .arg(
            Arg::new("worlds")
                .short('w')
                .long("worlds")
                .num_args(1..)
                .default_value("world")
                .help("Planes known to the host, in index order"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .num_args(1)
                .help("Write the resulting markers to a GeoJSON file"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("Increase log verbosity"),
        )
        .get_matches();

    if let Err(err) = logging::init(matches.get_count("verbose")) {
        eprintln!("Error initialising logging: {}", err);
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_default();
    let worlds: Vec<String> = matches
        .get_many::<String>("worlds")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    let mut host = MemoryHost::new(worlds);
    let summary = match process_config(&config_path, &mut host) {
        Ok(summary) => summary,
        Err(err) => {
            error!("{:#}", err);
            std::process::exit(1);
        }
    };

    for report in &summary.loaded {
        info!(
            "{}: {} features, {} polylines, {} points",
            report.dataset, report.features, report.polylines, report.points
        );
    }
    for (dataset, err) in &summary.failed {
        warn!("{} skipped: {}", dataset, err);
    }

    if let Some(output) = matches.get_one::<String>("output") {
        let written = File::create(output)
            .map_err(anyhow::Error::from)
            .and_then(|file| {
                serde_json::to_writer_pretty(file, &host.to_feature_collection())
                    .map_err(anyhow::Error::from)
            });
        match written {
            Ok(()) => info!("Markers written to {}", output),
            Err(err) => {
                error!("Error writing {}: {}", output, err);
                std::process::exit(1);
            }
        }
    }
}
