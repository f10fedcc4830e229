//! The seam to the rendering host that owns the marker layers.
//!
//! [`MemoryHost`] is a complete in-process host. It backs the tests and the
//! CLI, which can dump its state as GeoJSON.

use std::collections::BTreeMap;

use geojson::{Feature, FeatureCollection, Geometry as GeoJsonGeometry, Value as GeoJsonValue};
use serde_json::{json, Map};

use crate::config::WorldRef;
use crate::projection::{ProjectedPoint, VertexArrays};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineStyle {
    pub thickness: i32,
    pub opacity: f64,
    /// 24-bit RGB.
    pub color: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Polyline,
    Point,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerHandle {
    pub id: String,
    pub kind: MarkerKind,
}

/// One named marker set inside the host.
///
/// The `create_or_replace_*` calls must publish the marker in one step: an
/// observer sees either the previous marker or the complete new one.
pub trait MarkerLayer {
    fn create_or_replace_polyline(
        &mut self,
        id: &str,
        label: &str,
        plane: &str,
        vertices: &VertexArrays,
        style: &LineStyle,
    ) -> Option<MarkerHandle>;

    fn find_polyline(&self, id: &str) -> Option<MarkerHandle>;

    /// Ids of every polyline currently in the layer.
    fn polyline_ids(&self) -> Vec<String>;

    fn delete(&mut self, handle: MarkerHandle);

    fn create_or_replace_point(
        &mut self,
        id: &str,
        label: &str,
        plane: &str,
        point: ProjectedPoint,
        icon: &str,
    ) -> Option<MarkerHandle>;

    fn set_label(&mut self, label: &str);
    fn set_min_zoom(&mut self, zoom: i32);
    fn set_priority(&mut self, priority: i32);
    fn set_hide_by_default(&mut self, hide: bool);
}

pub trait OverlayHost {
    type Layer: MarkerLayer;

    /// Finds the layer `id`, creating it with `label` when absent.
    fn layer(&mut self, id: &str, label: &str) -> Option<&mut Self::Layer>;

    /// Name of the plane `world` refers to, if the host knows it.
    fn resolve_plane(&self, world: &WorldRef) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolylineMarker {
    pub label: String,
    pub plane: String,
    pub vertices: VertexArrays,
    pub style: LineStyle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointMarker {
    pub label: String,
    pub plane: String,
    pub position: ProjectedPoint,
    pub icon: String,
}

#[derive(Debug, Clone)]
pub struct MemoryLayer {
    pub id: String,
    pub label: String,
    pub min_zoom: Option<i32>,
    pub priority: i32,
    pub hide_by_default: bool,
    polylines: BTreeMap<String, PolylineMarker>,
    points: BTreeMap<String, PointMarker>,
    mutations: usize,
}

impl MemoryLayer {
    pub fn new(id: &str, label: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            min_zoom: None,
            priority: 0,
            hide_by_default: false,
            polylines: BTreeMap::new(),
            points: BTreeMap::new(),
            mutations: 0,
        }
    }

    pub fn polyline(&self, id: &str) -> Option<&PolylineMarker> {
        self.polylines.get(id)
    }

    pub fn point(&self, id: &str) -> Option<&PointMarker> {
        self.points.get(id)
    }

    pub fn polylines(&self) -> impl Iterator<Item = (&str, &PolylineMarker)> {
        self.polylines.iter().map(|(id, marker)| (id.as_str(), marker))
    }

    pub fn points(&self) -> impl Iterator<Item = (&str, &PointMarker)> {
        self.points.iter().map(|(id, marker)| (id.as_str(), marker))
    }

    pub fn polyline_count(&self) -> usize {
        self.polylines.len()
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// Number of marker creations and deletions applied so far.
    pub fn mutations(&self) -> usize {
        self.mutations
    }

    /// Markers in plane coordinates: GeoJSON `[x, z]` positions, with the
    /// plane height and style carried as properties.
    pub fn to_feature_collection(&self) -> FeatureCollection {
        let mut features = Vec::with_capacity(self.polylines.len() + self.points.len());

        for (id, marker) in &self.polylines {
            let coords = marker
                .vertices
                .xs
                .iter()
                .zip(&marker.vertices.zs)
                .map(|(x, z)| vec![*x, *z])
                .collect();
            let mut properties = Map::new();
            properties.insert("layer".to_string(), json!(self.id));
            properties.insert("label".to_string(), json!(marker.label));
            properties.insert("plane".to_string(), json!(marker.plane));
            properties.insert("y".to_string(), json!(marker.vertices.ys.first()));
            properties.insert("color".to_string(), json!(format!("#{:06X}", marker.style.color)));
            properties.insert("lineThickness".to_string(), json!(marker.style.thickness));
            properties.insert("lineOpacity".to_string(), json!(marker.style.opacity));
            features.push(feature(id, GeoJsonValue::LineString(coords), properties));
        }

        for (id, marker) in &self.points {
            let mut properties = Map::new();
            properties.insert("layer".to_string(), json!(self.id));
            properties.insert("label".to_string(), json!(marker.label));
            properties.insert("plane".to_string(), json!(marker.plane));
            properties.insert("y".to_string(), json!(marker.position.y));
            properties.insert("icon".to_string(), json!(marker.icon));
            let position = vec![marker.position.x, marker.position.z];
            features.push(feature(id, GeoJsonValue::Point(position), properties));
        }

        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }
}

fn feature(id: &str, value: GeoJsonValue, properties: Map<String, serde_json::Value>) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(GeoJsonGeometry::new(value)),
        id: Some(geojson::feature::Id::String(id.to_string())),
        properties: Some(properties),
        foreign_members: None,
    }
}

impl MarkerLayer for MemoryLayer {
    fn create_or_replace_polyline(
        &mut self,
        id: &str,
        label: &str,
        plane: &str,
        vertices: &VertexArrays,
        style: &LineStyle,
    ) -> Option<MarkerHandle> {
        let aligned = vertices.xs.len() == vertices.ys.len() && vertices.xs.len() == vertices.zs.len();
        if vertices.is_empty() || !aligned {
            return None;
        }
        let marker = PolylineMarker {
            label: label.to_string(),
            plane: plane.to_string(),
            vertices: vertices.clone(),
            style: *style,
        };
        self.polylines.insert(id.to_string(), marker);
        self.mutations += 1;
        Some(MarkerHandle {
            id: id.to_string(),
            kind: MarkerKind::Polyline,
        })
    }

    fn find_polyline(&self, id: &str) -> Option<MarkerHandle> {
        self.polylines.get(id).map(|_| MarkerHandle {
            id: id.to_string(),
            kind: MarkerKind::Polyline,
        })
    }

    fn polyline_ids(&self) -> Vec<String> {
        self.polylines.keys().cloned().collect()
    }

    fn delete(&mut self, handle: MarkerHandle) {
        let removed = match handle.kind {
            MarkerKind::Polyline => self.polylines.remove(&handle.id).is_some(),
            MarkerKind::Point => self.points.remove(&handle.id).is_some(),
        };
        if removed {
            self.mutations += 1;
        }
    }

    fn create_or_replace_point(
        &mut self,
        id: &str,
        label: &str,
        plane: &str,
        point: ProjectedPoint,
        icon: &str,
    ) -> Option<MarkerHandle> {
        let marker = PointMarker {
            label: label.to_string(),
            plane: plane.to_string(),
            position: point,
            icon: icon.to_string(),
        };
        self.points.insert(id.to_string(), marker);
        self.mutations += 1;
        Some(MarkerHandle {
            id: id.to_string(),
            kind: MarkerKind::Point,
        })
    }

    fn set_label(&mut self, label: &str) {
        self.label = label.to_string();
    }

    fn set_min_zoom(&mut self, zoom: i32) {
        self.min_zoom = Some(zoom);
    }

    fn set_priority(&mut self, priority: i32) {
        self.priority = priority;
    }

    fn set_hide_by_default(&mut self, hide: bool) {
        self.hide_by_default = hide;
    }
}

/// Host with a fixed list of planes and any number of layers.
#[derive(Debug, Clone, Default)]
pub struct MemoryHost {
    planes: Vec<String>,
    layers: BTreeMap<String, MemoryLayer>,
}

impl MemoryHost {
    pub fn new<I, S>(planes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            planes: planes.into_iter().map(Into::into).collect(),
            layers: BTreeMap::new(),
        }
    }

    pub fn get_layer(&self, id: &str) -> Option<&MemoryLayer> {
        self.layers.get(id)
    }

    pub fn layers(&self) -> impl Iterator<Item = &MemoryLayer> {
        self.layers.values()
    }

    /// Total creations and deletions across every layer.
    pub fn mutations(&self) -> usize {
        self.layers.values().map(MemoryLayer::mutations).sum()
    }

    pub fn to_feature_collection(&self) -> FeatureCollection {
        let features = self
            .layers
            .values()
            .flat_map(|layer| layer.to_feature_collection().features)
            .collect();
        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }
}

impl OverlayHost for MemoryHost {
    type Layer = MemoryLayer;

    fn layer(&mut self, id: &str, label: &str) -> Option<&mut MemoryLayer> {
        Some(
            self.layers
                .entry(id.to_string())
                .or_insert_with(|| MemoryLayer::new(id, label)),
        )
    }

    fn resolve_plane(&self, world: &WorldRef) -> Option<String> {
        match world {
            WorldRef::Index(index) => self.planes.get(*index).cloned(),
            WorldRef::Name(name) => self.planes.iter().find(|plane| *plane == name).cloned(),
        }
    }
}
