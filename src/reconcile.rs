use std::collections::BTreeSet;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::StyleConfig;
use crate::countries::PointRecord;
use crate::overlay::{LineStyle, MarkerLayer};
use crate::projection::{project, Projection, VertexArrays};
use crate::wkt::Ring;

/// Fewest vertices a border polyline is drawn with.
pub const MIN_POLYLINE_VERTICES: usize = 2;

#[derive(Debug, Error, PartialEq)]
pub enum MarkerError {
    #[error("Error adding polyline {id}: only {vertices} vertices")]
    Degenerate { id: String, vertices: usize },
    #[error("Error adding marker {0}")]
    CreateFailed(String),
}

/// Stable id of a border polyline. Equal inputs give equal ids on every load.
pub fn marker_id(key: &str, feature: usize, property: usize, polygon: usize) -> String {
    format!("{key}_{feature}_{property}_{polygon}")
}

/// True when `id` is a polyline id [`marker_id`] produces for `key`.
pub fn is_dataset_marker(key: &str, id: &str) -> bool {
    let Some(rest) = id.strip_prefix(key).and_then(|rest| rest.strip_prefix('_')) else {
        return false;
    };
    let parts: Vec<&str> = rest.split('_').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub polylines: usize,
    pub points: usize,
    pub replaced: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Writes one dataset's markers into a layer.
pub struct Reconciler<'a, L: MarkerLayer> {
    layer: &'a mut L,
    plane: &'a str,
    projection: Projection,
    stats: ReconcileStats,
    emitted: BTreeSet<String>,
}

impl<'a, L: MarkerLayer> Reconciler<'a, L> {
    pub fn new(layer: &'a mut L, plane: &'a str, projection: Projection) -> Self {
        Self {
            layer,
            plane,
            projection,
            stats: ReconcileStats::default(),
            emitted: BTreeSet::new(),
        }
    }

    /// Pushes the layer level display settings. A zero minimum zoom keeps
    /// whatever the layer has.
    pub fn sync_layer(&mut self, label: &str, style: &StyleConfig) {
        self.layer.set_label(label);
        if style.minimum_zoom > 0 {
            self.layer.set_min_zoom(style.minimum_zoom);
        }
        self.layer.set_priority(style.priority);
        self.layer.set_hide_by_default(style.hide_by_default);
    }

    pub fn upsert_ring(
        &mut self,
        id: &str,
        label: &str,
        ring: &Ring,
        style: &LineStyle,
    ) -> Result<(), MarkerError> {
        let mut vertices = VertexArrays::with_capacity(ring.len());
        for vertex in &ring.vertices {
            vertices.push(project(vertex.lat, vertex.lon, &self.projection));
        }
        self.upsert_polyline(id, label, &vertices, style)
    }

    pub fn upsert_polyline(
        &mut self,
        id: &str,
        label: &str,
        vertices: &VertexArrays,
        style: &LineStyle,
    ) -> Result<(), MarkerError> {
        self.emitted.insert(id.to_string());
        if let Some(existing) = self.layer.find_polyline(id) {
            self.layer.delete(existing);
            self.stats.replaced += 1;
        }

        let result = if vertices.len() < MIN_POLYLINE_VERTICES {
            Err(MarkerError::Degenerate {
                id: id.to_string(),
                vertices: vertices.len(),
            })
        } else {
            self.layer
                .create_or_replace_polyline(id, label, self.plane, vertices, style)
                .map(|_| ())
                .ok_or_else(|| MarkerError::CreateFailed(id.to_string()))
        };

        match &result {
            Ok(()) => {
                debug!(id, vertices = vertices.len(), "Polyline added");
                self.stats.polylines += 1;
            }
            Err(err) => {
                info!("{}", err);
                self.stats.failed += 1;
            }
        }
        result
    }

    pub fn upsert_point(&mut self, record: &PointRecord, icon: &str) -> Result<(), MarkerError> {
        let position = project(record.lat, record.lon, &self.projection);
        match self
            .layer
            .create_or_replace_point(&record.id, &record.label, self.plane, position, icon)
        {
            Some(_) => {
                self.stats.points += 1;
                Ok(())
            }
            None => {
                warn!("Error adding marker {}", record.id);
                self.stats.failed += 1;
                Err(MarkerError::CreateFailed(record.id.clone()))
            }
        }
    }

    /// Deletes polylines of dataset `key` that this reconciler did not write,
    /// such as rings a feature no longer has. Markers of other datasets are
    /// left alone.
    pub fn sweep_stale(&mut self, key: &str) -> usize {
        let stale: Vec<String> = self
            .layer
            .polyline_ids()
            .into_iter()
            .filter(|id| is_dataset_marker(key, id) && !self.emitted.contains(id))
            .collect();
        for id in &stale {
            if let Some(handle) = self.layer.find_polyline(id) {
                debug!(id = %id, "Removing stale polyline");
                self.layer.delete(handle);
                self.stats.removed += 1;
            }
        }
        stale.len()
    }

    pub fn stats(&self) -> ReconcileStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::{MarkerHandle, MemoryLayer};
    use crate::projection::ProjectedPoint;
    use crate::wkt::LatLon;

    const STYLE: LineStyle = LineStyle {
        thickness: 3,
        opacity: 0.5,
        color: 0xCC66CC,
    };

    fn ring(pairs: &[(f64, f64)]) -> Ring {
        Ring {
            vertices: pairs.iter().map(|&(lat, lon)| LatLon { lat, lon }).collect(),
        }
    }

    #[test]
    fn marker_ids_are_positional() {
        assert_eq!(marker_id("shapefiles.countries", 3, 1, 0), "shapefiles.countries_3_1_0");
        assert_eq!(marker_id("k", 0, 2, 5), marker_id("k", 0, 2, 5));
    }

    #[test]
    fn dataset_marker_ids_do_not_match_neighbouring_keys() {
        assert!(is_dataset_marker("shapefiles.a", "shapefiles.a_0_1_2"));
        assert!(!is_dataset_marker("shapefiles.a", "shapefiles.a_b_0_1_2"));
        assert!(!is_dataset_marker("shapefiles.a", "shapefiles.ab_0_1_2"));
        assert!(!is_dataset_marker("shapefiles.a", "shapefiles.a_0_1"));
        assert!(!is_dataset_marker("shapefiles.a", "FRA"));
    }

    #[test]
    fn sweep_removes_only_unwritten_markers_of_the_dataset() {
        let mut layer = MemoryLayer::new("l", "L");
        let line = ring(&[(0.0, 0.0), (1.0, 1.0)]);
        {
            let mut reconciler = Reconciler::new(&mut layer, "world", Projection::default());
            for id in ["k_0_1_0", "k_0_1_1", "k_b_0_1_0", "other"] {
                reconciler.upsert_ring(id, "", &line, &STYLE).unwrap();
            }
        }
        let mut reconciler = Reconciler::new(&mut layer, "world", Projection::default());
        reconciler.upsert_ring("k_0_1_0", "", &line, &STYLE).unwrap();
        assert_eq!(reconciler.sweep_stale("k"), 1);
        assert_eq!(reconciler.stats().removed, 1);
        assert_eq!(layer.polyline_ids(), vec!["k_0_1_0", "k_b_0_1_0", "other"]);
    }

    #[test]
    fn repeated_upsert_keeps_one_marker() {
        let mut layer = MemoryLayer::new("l", "L");
        let square = ring(&[(0.0, 0.0), (0.0, 1.0), (1.0, 1.0)]);
        {
            let mut reconciler = Reconciler::new(&mut layer, "world", Projection::default());
            reconciler.upsert_ring("a", "", &square, &STYLE).unwrap();
            reconciler.upsert_ring("a", "", &square, &STYLE).unwrap();
            assert_eq!(reconciler.stats().replaced, 1);
            assert_eq!(reconciler.stats().polylines, 2);
        }
        assert_eq!(layer.polyline_count(), 1);
        let marker = layer.polyline("a").unwrap();
        assert_eq!(marker.vertices.xs, vec![0.0, 0.0, 120.0]);
        assert_eq!(marker.vertices.zs, vec![0.0, -120.0, -120.0]);
        assert_eq!(marker.vertices.ys, vec![64.0; 3]);
    }

    #[test]
    fn degenerate_ring_is_skipped_and_old_marker_removed() {
        let mut layer = MemoryLayer::new("l", "L");
        let mut reconciler = Reconciler::new(&mut layer, "world", Projection::default());
        reconciler
            .upsert_ring("a", "", &ring(&[(0.0, 0.0), (1.0, 1.0)]), &STYLE)
            .unwrap();
        let err = reconciler.upsert_ring("a", "", &ring(&[(0.0, 0.0)]), &STYLE).unwrap_err();
        assert_eq!(err, MarkerError::Degenerate { id: "a".to_string(), vertices: 1 });
        assert_eq!(reconciler.stats().failed, 1);
        assert!(layer.find_polyline("a").is_none());
    }

    #[test]
    fn sync_layer_leaves_unset_min_zoom() {
        let mut layer = MemoryLayer::new("l", "Old");
        layer.min_zoom = Some(4);
        let style = StyleConfig {
            priority: 7,
            hide_by_default: false,
            ..StyleConfig::default()
        };
        Reconciler::new(&mut layer, "world", Projection::default()).sync_layer("New", &style);
        assert_eq!(layer.label, "New");
        assert_eq!(layer.min_zoom, Some(4));
        assert_eq!(layer.priority, 7);
        assert!(!layer.hide_by_default);

        let style = StyleConfig {
            minimum_zoom: 2,
            ..StyleConfig::default()
        };
        Reconciler::new(&mut layer, "world", Projection::default()).sync_layer("New", &style);
        assert_eq!(layer.min_zoom, Some(2));
    }

    #[test]
    fn country_point_uses_third_column_for_x() {
        let mut layer = MemoryLayer::new("l", "L");
        let record = PointRecord {
            id: "FRA".to_string(),
            lon: 2.0,
            lat: 46.0,
            label: "France".to_string(),
        };
        Reconciler::new(&mut layer, "world", Projection::default())
            .upsert_point(&record, "king")
            .unwrap();
        let point = layer.point("FRA").unwrap();
        assert_eq!(point.position, ProjectedPoint { x: 46.0 * 120.0, y: 64.0, z: -(2.0 * 120.0) });
        assert_eq!(point.label, "France");
        assert_eq!(point.icon, "king");
    }

    struct RefusingLayer;

    impl MarkerLayer for RefusingLayer {
        fn create_or_replace_polyline(
            &mut self,
            _: &str,
            _: &str,
            _: &str,
            _: &VertexArrays,
            _: &LineStyle,
        ) -> Option<MarkerHandle> {
            None
        }
        fn find_polyline(&self, _: &str) -> Option<MarkerHandle> {
            None
        }
        fn polyline_ids(&self) -> Vec<String> {
            Vec::new()
        }
        fn delete(&mut self, _: MarkerHandle) {}
        fn create_or_replace_point(
            &mut self,
            _: &str,
            _: &str,
            _: &str,
            _: ProjectedPoint,
            _: &str,
        ) -> Option<MarkerHandle> {
            None
        }
        fn set_label(&mut self, _: &str) {}
        fn set_min_zoom(&mut self, _: i32) {}
        fn set_priority(&mut self, _: i32) {}
        fn set_hide_by_default(&mut self, _: bool) {}
    }

    #[test]
    fn host_refusal_is_counted() {
        let mut layer = RefusingLayer;
        let mut reconciler = Reconciler::new(&mut layer, "world", Projection::default());
        let result = reconciler.upsert_ring("a", "", &ring(&[(0.0, 0.0), (1.0, 1.0)]), &STYLE);
        assert_eq!(result, Err(MarkerError::CreateFailed("a".to_string())));
        assert_eq!(reconciler.stats().failed, 1);
    }
}
