use std::fs;
use std::path::{Path, PathBuf};

use proj::Proj;
use shapefile::dbase::{self, TableWriterBuilder};
use shapefile::{Multipoint, Point, Polygon, PolygonRing, Polyline, Shape};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::source::Source;

/// Target of every reprojection.
pub const TARGET_CRS: &str = "EPSG:4326";

/// Projection descriptor written next to a reprojected copy.
pub const WGS84_PRJ: &str = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;

const COPY_SUFFIX: &str = "_wgs84";

#[derive(Debug, Error)]
pub enum CrsError {
    #[error("Could not resolve a coordinate reference system: {0}")]
    CrsUnresolved(String),

    #[error("No transform from {crs} to EPSG:4326: {reason}")]
    ProjectionUnsupported { crs: String, reason: String },

    #[error("Failed to transform vertex ({x}, {y}): {reason}")]
    Transform { x: f64, y: f64, reason: String },

    #[error("Feature {index} has a shape of type {kind} which cannot be reprojected")]
    UnsupportedShape { index: usize, kind: String },

    #[error("Failed to write reprojected copy: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to write reprojected copy: {0}")]
    Shapefile(#[from] shapefile::Error),

    #[error("Failed to write reprojected attribute table: {0}")]
    Dbase(#[from] dbase::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrsKind {
    Geographic,
    Projected,
    Other(String),
}

/// What a `.prj` file says about its coordinate reference system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrsDescriptor {
    pub kind: CrsKind,
    /// Name of the root CRS, e.g. `GCS_WGS_1984`.
    pub code: String,
    /// Root level `AUTHORITY["EPSG","4326"]`, if any.
    pub authority: Option<(String, String)>,
    pub wkt: String,
}

impl CrsDescriptor {
    pub fn parse(wkt: &str) -> Result<Self, CrsError> {
        let wkt = wkt.trim();
        let Some(open) = wkt.find('[') else {
            return Err(CrsError::CrsUnresolved(format!("not a WKT definition: '{wkt}'")));
        };
        let keyword = wkt[..open].trim().to_ascii_uppercase();
        if keyword.is_empty() || !keyword.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(CrsError::CrsUnresolved(format!("invalid keyword '{keyword}'")));
        }
        let kind = match keyword.as_str() {
            "GEOGCS" | "GEOGCRS" | "GEODCRS" => CrsKind::Geographic,
            "PROJCS" | "PROJCRS" => CrsKind::Projected,
            _ => CrsKind::Other(keyword),
        };
        let code = quoted_strings(&wkt[open..])
            .next()
            .ok_or_else(|| CrsError::CrsUnresolved("missing CRS name".to_string()))?
            .to_string();

        Ok(Self {
            kind,
            code,
            authority: root_authority(wkt),
            wkt: wkt.to_string(),
        })
    }

    fn is_epsg(&self, code: &str) -> bool {
        matches!(&self.authority, Some((name, value)) if name.eq_ignore_ascii_case("EPSG") && value == code)
    }

    pub fn is_geographic_wgs84(&self) -> bool {
        if self.kind != CrsKind::Geographic {
            return false;
        }
        let code = self.code.to_ascii_uppercase().replace(' ', "_");
        code.contains("WGS_1984") || code.contains("WGS_84") || self.is_epsg("4326")
    }

    /// Definition handed to PROJ: the EPSG code when known, the WKT otherwise.
    fn proj_definition(&self) -> String {
        match &self.authority {
            Some((name, value)) if name.eq_ignore_ascii_case("EPSG") => format!("EPSG:{value}"),
            _ => self.wkt.clone(),
        }
    }
}

fn quoted_strings(text: &str) -> impl Iterator<Item = &str> {
    text.split('"').skip(1).step_by(2)
}

/// Finds `AUTHORITY[...]` (or the WKT2 `ID[...]`) directly under the root node.
fn root_authority(wkt: &str) -> Option<(String, String)> {
    let mut depth = 0usize;
    let mut in_quotes = false;
    for (offset, c) in wkt.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '[' | '(' if !in_quotes => depth += 1,
            ']' | ')' if !in_quotes => depth = depth.saturating_sub(1),
            ',' if !in_quotes && depth == 1 => {
                let rest = wkt[offset + 1..].trim_start();
                let upper = rest.get(..10).unwrap_or(rest).to_ascii_uppercase();
                if upper.starts_with("AUTHORITY[") || upper.starts_with("ID[") {
                    let node = rest.find(']').map_or(rest, |end| &rest[..end]);
                    let mut strings = quoted_strings(node);
                    let name = strings.next()?.to_string();
                    let value = match strings.next() {
                        Some(value) => value.to_string(),
                        // WKT2 writes the code unquoted: ID["EPSG",4326]
                        None => node.split(',').nth(1)?.trim().to_string(),
                    };
                    return Some((name, value));
                }
            }
            _ => {}
        }
    }
    None
}

pub fn needs_reprojection(crs: &CrsDescriptor) -> bool {
    !crs.is_geographic_wgs84()
}

/// Vertex transform from a source CRS to WGS84 lon/lat.
pub struct Reprojector {
    proj: Proj,
}

impl Reprojector {
    pub fn new(source: &CrsDescriptor) -> Result<Self, CrsError> {
        let definition = source.proj_definition();
        let proj = Proj::new_known_crs(&definition, TARGET_CRS, None).map_err(|err| {
            CrsError::ProjectionUnsupported {
                crs: source.code.clone(),
                reason: err.to_string(),
            }
        })?;
        Ok(Self { proj })
    }

    pub fn convert(&self, x: f64, y: f64) -> Result<(f64, f64), CrsError> {
        self.proj.convert((x, y)).map_err(|err| CrsError::Transform {
            x,
            y,
            reason: err.to_string(),
        })
    }

    fn point(&self, point: &Point) -> Result<Point, CrsError> {
        let (x, y) = self.convert(point.x, point.y)?;
        Ok(Point::new(x, y))
    }

    fn points(&self, points: &[Point]) -> Result<Vec<Point>, CrsError> {
        points.iter().map(|p| self.point(p)).collect()
    }
}

/// `<dir>/<stem>_wgs84.shp` for a source at `<dir>/<stem>.shp`.
pub fn derived_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    source.with_file_name(format!("{stem}{COPY_SUFFIX}.shp"))
}

/// Writes a WGS84 copy of `source` and returns its path.
///
/// The copy is assembled in a staging directory beside the target and only
/// moved into place once every feature has been written. On failure the
/// staging directory is removed and nothing appears at the derived path.
pub fn normalize(source: &Source, crs: &CrsDescriptor) -> Result<PathBuf, CrsError> {
    let reprojector = Reprojector::new(crs)?;
    let target = derived_path(source.path());
    let parent = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let staging = tempfile::Builder::new()
        .prefix(".reproject")
        .tempdir_in(parent)?;
    let staged = staging.path().join(target.file_name().unwrap_or_default());

    let written = write_transformed(source, &reprojector, &staged)?;
    fs::write(staged.with_extension("prj"), WGS84_PRJ)?;
    commit(&staged, &target)?;

    info!(
        "Wrote {} reprojected features to {}",
        written,
        target.display()
    );
    Ok(target)
}

fn write_transformed(
    source: &Source,
    reprojector: &Reprojector,
    staged: &Path,
) -> Result<usize, CrsError> {
    let table = dbase::Reader::from_path(source.sidecar("dbf"))?;
    let mut writer = shapefile::Writer::from_path(staged, TableWriterBuilder::from_reader(table))?;
    let mut reader = shapefile::Reader::from_path(source.path())?;

    let mut written = 0;
    for (index, item) in reader.iter_shapes_and_records().enumerate() {
        let (shape, record) = item?;
        match shape {
            Shape::Polygon(polygon) => {
                let rings = polygon
                    .rings()
                    .iter()
                    .map(|ring| -> Result<PolygonRing<Point>, CrsError> {
                        Ok(match ring {
                            PolygonRing::Outer(points) => PolygonRing::Outer(reprojector.points(points)?),
                            PolygonRing::Inner(points) => PolygonRing::Inner(reprojector.points(points)?),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                writer.write_shape_and_record(&Polygon::with_rings(rings), &record)?;
            }
            Shape::Polyline(polyline) => {
                let parts = polyline
                    .parts()
                    .iter()
                    .map(|part| reprojector.points(part))
                    .collect::<Result<Vec<_>, CrsError>>()?;
                writer.write_shape_and_record(&Polyline::with_parts(parts), &record)?;
            }
            Shape::Point(point) => {
                writer.write_shape_and_record(&reprojector.point(&point)?, &record)?;
            }
            Shape::Multipoint(multipoint) => {
                let points = reprojector.points(multipoint.points())?;
                writer.write_shape_and_record(&Multipoint::new(points), &record)?;
            }
            other => {
                return Err(CrsError::UnsupportedShape {
                    index,
                    kind: format!("{:?}", other.shapetype()),
                })
            }
        }
        written += 1;
    }
    // the shp/shx headers are finalized when the writer is dropped
    drop(writer);
    debug!("Staged {} features at {}", written, staged.display());
    Ok(written)
}

const COPY_EXTENSIONS: [&str; 4] = ["shp", "shx", "dbf", "prj"];

fn commit(staged: &Path, target: &Path) -> Result<(), CrsError> {
    let mut moved = Vec::with_capacity(COPY_EXTENSIONS.len());
    for extension in COPY_EXTENSIONS {
        let to = target.with_extension(extension);
        if let Err(err) = fs::rename(staged.with_extension(extension), &to) {
            warn!("Rolling back reprojected copy {}", target.display());
            for path in moved {
                let _ = fs::remove_file(path);
            }
            return Err(err.into());
        }
        moved.push(to);
    }
    Ok(())
}
