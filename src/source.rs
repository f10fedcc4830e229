use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use geo::{Coord, LineString, MultiPoint, MultiPolygon, Point, Polygon};
use shapefile::dbase::{self, FieldValue};
use shapefile::{PolygonRing, Shape};
use thiserror::Error;
use tracing::{debug, warn};

use crate::crs::{CrsDescriptor, CrsError};
use crate::wkt;

/// Name of the attribute holding the shape rendered as WKT text. It is always
/// the first attribute of a feature.
pub const GEOMETRY_ATTRIBUTE: &str = "the_geom";

/// Companion files a dataset cannot be read without: spatial index,
/// projection descriptor and attribute table.
pub const REQUIRED_SIDECARS: [&str; 3] = ["shx", "prj", "dbf"];

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Shapefile {} not found", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Required file {0} not found or empty")]
    MissingSidecar(String),

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read shapefile: {0}")]
    Shapefile(#[from] shapefile::Error),

    #[error("Failed to read attribute table: {0}")]
    Dbase(#[from] dbase::Error),

    #[error(transparent)]
    Crs(#[from] CrsError),
}

/// An opened, validated shapefile dataset.
#[derive(Debug, Clone)]
pub struct Source {
    path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Schema {
    pub crs: CrsDescriptor,
    /// Attribute names in feature order; `the_geom` comes first.
    pub attribute_names: Vec<String>,
}

/// One dataset row.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub index: usize,
    pub attributes: Vec<(String, Option<String>)>,
}

impl Feature {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(attribute, _)| attribute == name)
            .and_then(|(_, value)| value.as_deref())
    }

    /// Looks an attribute up by its 1-based position.
    pub fn attribute_at(&self, position: usize) -> Option<&str> {
        position
            .checked_sub(1)
            .and_then(|index| self.attributes.get(index))
            .and_then(|(_, value)| value.as_deref())
    }
}

impl Source {
    /// Opens the dataset at `path`. A path without extension gets `.shp`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let mut path = path.as_ref().to_path_buf();
        if path.extension().is_none() {
            path.set_extension("shp");
        }

        if !is_non_empty_file(&path) {
            return Err(SourceError::SourceNotFound(path));
        }

        let mut missing = None;
        for extension in REQUIRED_SIDECARS {
            let sidecar = path.with_extension(extension);
            if !is_non_empty_file(&sidecar) {
                let name = file_name(&sidecar);
                warn!("{} not found!", name);
                missing.get_or_insert(name);
            }
        }
        if let Some(name) = missing {
            warn!(
                "One or more additional files could not be located for shapefile {}",
                path.display()
            );
            return Err(SourceError::MissingSidecar(name));
        }

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sidecar(&self, extension: &str) -> PathBuf {
        self.path.with_extension(extension)
    }

    pub fn schema(&self) -> Result<Schema, SourceError> {
        let prj_path = self.sidecar("prj");
        let prj = fs::read_to_string(&prj_path).map_err(|source| SourceError::Io {
            path: prj_path.clone(),
            source,
        })?;
        let crs = CrsDescriptor::parse(&prj)?;

        let table = dbase::Reader::from_path(self.sidecar("dbf"))?;
        let attribute_names = std::iter::once(GEOMETRY_ATTRIBUTE.to_string())
            .chain(table.fields().iter().map(|field| field.name().to_string()))
            .collect();

        Ok(Schema {
            crs,
            attribute_names,
        })
    }

    /// Opens the feature stream. The returned value owns the file handles and
    /// closes them when dropped.
    pub fn features(&self) -> Result<Features, SourceError> {
        let table = dbase::Reader::from_path(self.sidecar("dbf"))?;
        let field_names = table
            .fields()
            .iter()
            .map(|field| field.name().to_string())
            .collect();
        let reader = shapefile::Reader::from_path(&self.path)?;
        Ok(Features {
            reader,
            field_names,
        })
    }
}

pub struct Features {
    reader: shapefile::Reader<BufReader<fs::File>, BufReader<fs::File>>,
    field_names: Vec<String>,
}

impl Features {
    /// Lazy, single pass over the dataset rows.
    pub fn iter(&mut self) -> impl Iterator<Item = Result<Feature, SourceError>> + '_ {
        let field_names = &self.field_names;
        self.reader
            .iter_shapes_and_records()
            .enumerate()
            .map(move |(index, item)| {
                let (shape, record) = item?;
                let mut attributes = Vec::with_capacity(field_names.len() + 1);
                attributes.push((GEOMETRY_ATTRIBUTE.to_string(), shape_text(&shape)));
                for name in field_names {
                    let value = record.get(name).and_then(field_text);
                    attributes.push((name.clone(), value));
                }
                Ok(Feature { index, attributes })
            })
    }
}

fn is_non_empty_file(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn coords(points: &[shapefile::Point]) -> LineString<f64> {
    LineString::new(points.iter().map(|p| Coord { x: p.x, y: p.y }).collect())
}

/// Groups shapefile rings into polygons: every outer ring opens a polygon and
/// the inner rings that follow it become its holes.
pub fn polygon_to_geo(polygon: &shapefile::Polygon) -> MultiPolygon<f64> {
    let mut groups: Vec<(LineString<f64>, Vec<LineString<f64>>)> = Vec::new();
    for ring in polygon.rings() {
        match ring {
            PolygonRing::Outer(points) => groups.push((coords(points), Vec::new())),
            PolygonRing::Inner(points) => match groups.last_mut() {
                Some((_, holes)) => holes.push(coords(points)),
                None => groups.push((coords(points), Vec::new())),
            },
        }
    }
    MultiPolygon(
        groups
            .into_iter()
            .map(|(exterior, holes)| Polygon::new(exterior, holes))
            .collect(),
    )
}

/// Renders a shape as the text stored in the geometry attribute.
pub fn shape_text(shape: &Shape) -> Option<String> {
    match shape {
        Shape::Polygon(polygon) => Some(wkt::multi_polygon_text(&polygon_to_geo(polygon))),
        Shape::Polyline(polyline) => {
            let parts: Vec<_> = polyline.parts().iter().map(|part| coords(part)).collect();
            Some(wkt::multi_line_string_text(&parts))
        }
        Shape::Point(point) => Some(wkt::point_text(&Point::new(point.x, point.y))),
        Shape::Multipoint(multipoint) => {
            let points = multipoint
                .points()
                .iter()
                .map(|p| Point::new(p.x, p.y))
                .collect::<Vec<_>>();
            Some(wkt::multi_point_text(&MultiPoint(points)))
        }
        Shape::NullShape => None,
        other => {
            debug!("Unsupported shape type {:?}", other.shapetype());
            None
        }
    }
}

fn field_text(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Character(text) => text.clone(),
        FieldValue::Numeric(number) => number.map(|n| n.to_string()),
        FieldValue::Logical(flag) => flag.map(|b| b.to_string()),
        FieldValue::Float(number) => number.map(|n| n.to_string()),
        FieldValue::Integer(number) => Some(number.to_string()),
        FieldValue::Double(number) => Some(number.to_string()),
        FieldValue::Memo(text) => Some(text.clone()),
        other => Some(format!("{:?}", other)),
    }
}
