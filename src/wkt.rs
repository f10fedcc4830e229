//! Textual multipolygon handling.
//!
//! The decoder is a fixed-substring splitter, not a WKT grammar: the text is
//! cut on `"), ("`, which yields one chunk per ring for the shape produced by
//! [`multi_polygon_text`]. Nesting that does not follow that shape is decoded
//! as-is and may merge or split rings incorrectly.

use geo::{Coord, LineString, MultiPoint, MultiPolygon, Point};
use thiserror::Error;
use tracing::warn;

/// A geometry attribute is only considered when it contains this token.
pub const RING_OPEN: &str = "((";
pub const RING_SEPARATOR: &str = "), (";
pub const PAIR_SEPARATOR: &str = ", ";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    fn out_of_range(&self) -> bool {
        self.lat + 180.0 > 360.0 || self.lon + 180.0 > 360.0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ring {
    pub vertices: Vec<LatLon>,
}

impl Ring {
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

/// Rings of one geometry attribute plus the problems met while decoding it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedPolygon {
    pub rings: Vec<Ring>,
    pub malformed_tokens: usize,
    pub malformed_rings: usize,
}

impl DecodedPolygon {
    /// True when at least one ring had to be thrown away.
    pub fn had_errors(&self) -> bool {
        self.malformed_rings > 0
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum MalformedToken {
    #[error("coordinate token '{0}' has fewer than two fields")]
    MissingField(String),
    #[error("coordinate token '{0}' is not numeric")]
    NotNumeric(String),
}

pub fn is_polygon_text(text: &str) -> bool {
    text.contains(RING_OPEN)
}

/// Decodes a geometry attribute value. Returns `None` when the value is null
/// or does not look like polygon text.
pub fn decode_polygon(text: Option<&str>) -> Option<DecodedPolygon> {
    let text = text?;
    if !is_polygon_text(text) {
        return None;
    }

    let mut decoded = DecodedPolygon::default();
    'chunks: for chunk in strip_type_tag(text).split(RING_SEPARATOR) {
        let stripped = chunk.replace(['(', ')'], "");
        let mut ring = Ring::default();

        for token in stripped.split(PAIR_SEPARATOR) {
            let vertex = match parse_pair(token) {
                Ok(vertex) => vertex,
                Err(err) => {
                    warn!("Dropping vertex: {}", err);
                    decoded.malformed_tokens += 1;
                    continue;
                }
            };
            if vertex.out_of_range() {
                warn!(lat = vertex.lat, lon = vertex.lon, "Coordinate out of range, discarding ring");
                decoded.malformed_rings += 1;
                continue 'chunks;
            }
            ring.vertices.push(vertex);
        }

        decoded.rings.push(ring);
    }

    Some(decoded)
}

/// Drops the leading geometry keyword (`MULTIPOLYGON`, `MULTILINESTRING`, ...).
fn strip_type_tag(text: &str) -> &str {
    text.trim_start()
        .trim_start_matches(|c: char| c.is_ascii_alphabetic() || c == '_')
        .trim_start()
}

fn parse_pair(token: &str) -> Result<LatLon, MalformedToken> {
    let mut fields = token.split_whitespace();
    let (Some(lat), Some(lon)) = (fields.next(), fields.next()) else {
        return Err(MalformedToken::MissingField(token.to_string()));
    };
    let lat = parse_field(lat, token)?;
    let lon = parse_field(lon, token)?;
    Ok(LatLon { lat, lon })
}

fn parse_field(field: &str, token: &str) -> Result<f64, MalformedToken> {
    match field.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(MalformedToken::NotNumeric(token.to_string())),
    }
}

fn coords_text<'a>(coords: impl Iterator<Item = &'a Coord<f64>>) -> String {
    coords
        .map(|c| format!("{} {}", c.x, c.y))
        .collect::<Vec<_>>()
        .join(PAIR_SEPARATOR)
}

fn ring_text(ring: &LineString<f64>) -> String {
    format!("({})", coords_text(ring.coords()))
}

/// Renders a multipolygon as `MULTIPOLYGON (((x y, ...), (...)), ((...)))`.
pub fn multi_polygon_text(multi_polygon: &MultiPolygon<f64>) -> String {
    if multi_polygon.0.is_empty() {
        return "MULTIPOLYGON EMPTY".to_string();
    }
    let polygons = multi_polygon
        .iter()
        .map(|polygon| {
            let rings = std::iter::once(polygon.exterior())
                .chain(polygon.interiors())
                .map(ring_text)
                .collect::<Vec<_>>();
            format!("({})", rings.join(PAIR_SEPARATOR))
        })
        .collect::<Vec<_>>();
    format!("MULTIPOLYGON ({})", polygons.join(PAIR_SEPARATOR))
}

pub fn multi_line_string_text(lines: &[LineString<f64>]) -> String {
    if lines.is_empty() {
        return "MULTILINESTRING EMPTY".to_string();
    }
    let parts = lines.iter().map(ring_text).collect::<Vec<_>>();
    format!("MULTILINESTRING ({})", parts.join(PAIR_SEPARATOR))
}

pub fn point_text(point: &Point<f64>) -> String {
    format!("POINT ({} {})", point.x(), point.y())
}

/// Renders `MULTIPOINT (x y, x y)`. The unparenthesised member form keeps
/// point sets from being taken for polygon text.
pub fn multi_point_text(points: &MultiPoint<f64>) -> String {
    if points.0.is_empty() {
        return "MULTIPOINT EMPTY".to_string();
    }
    format!("MULTIPOINT ({})", coords_text(points.iter().map(|p| &p.0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Polygon};

    fn lat_lons(ring: &Ring) -> Vec<(f64, f64)> {
        ring.vertices.iter().map(|v| (v.lat, v.lon)).collect()
    }

    #[test]
    fn splits_two_polygons_into_two_rings() {
        let decoded = decode_polygon(Some("MULTIPOLYGON (((1 2, 3 4)), ((5 6, 7 8)))")).unwrap();
        assert_eq!(decoded.rings.len(), 2);
        assert_eq!(lat_lons(&decoded.rings[0]), vec![(1.0, 2.0), (3.0, 4.0)]);
        assert_eq!(lat_lons(&decoded.rings[1]), vec![(5.0, 6.0), (7.0, 8.0)]);
        assert!(!decoded.had_errors());
    }

    #[test]
    fn skips_null_and_non_polygon_text() {
        assert_eq!(decode_polygon(None), None);
        assert_eq!(decode_polygon(Some("POINT (1 2)")), None);
        assert_eq!(decode_polygon(Some("France")), None);
    }

    #[test]
    fn malformed_tokens_shrink_the_ring() {
        let text = "MULTIPOLYGON (((1 2, abc 4, 5, 7 8, 9 x)))";
        let decoded = decode_polygon(Some(text)).unwrap();
        assert_eq!(decoded.rings.len(), 1);
        // five tokens, three malformed
        assert_eq!(lat_lons(&decoded.rings[0]), vec![(1.0, 2.0), (7.0, 8.0)]);
        assert_eq!(decoded.malformed_tokens, 3);
        assert!(!decoded.had_errors());
    }

    #[test]
    fn out_of_range_vertex_drops_only_its_ring() {
        let text = "MULTIPOLYGON (((1 2, 3 4)), ((200 6, 7 8)), ((9 10, 11 12)))";
        let decoded = decode_polygon(Some(text)).unwrap();
        assert_eq!(decoded.rings.len(), 2);
        assert_eq!(lat_lons(&decoded.rings[1]), vec![(9.0, 10.0), (11.0, 12.0)]);
        assert_eq!(decoded.malformed_rings, 1);
        assert!(decoded.had_errors());
    }

    #[test]
    fn range_check_applies_to_both_fields() {
        let decoded = decode_polygon(Some("MULTIPOLYGON (((1 181)))")).unwrap();
        assert!(decoded.rings.is_empty());
        assert!(decoded.had_errors());

        let decoded = decode_polygon(Some("MULTIPOLYGON (((180 180)))")).unwrap();
        assert_eq!(decoded.rings.len(), 1);
    }

    #[test]
    fn decoding_is_deterministic() {
        let text = "MULTIPOLYGON (((1 2, 3 4), (5 6, 7 8)), ((9 10, 11 12)))";
        assert_eq!(decode_polygon(Some(text)), decode_polygon(Some(text)));
        assert_eq!(decode_polygon(Some(text)).unwrap().rings.len(), 3);
    }

    #[test]
    fn writer_output_round_trips_through_decoder() {
        let outer: Polygon<f64> = polygon![
            (x: 10.5, y: 20.0),
            (x: 11.0, y: 20.0),
            (x: 11.0, y: 21.25),
            (x: 10.5, y: 20.0),
        ];
        let text = multi_polygon_text(&MultiPolygon(vec![outer.clone(), outer]));
        assert_eq!(
            text,
            "MULTIPOLYGON (((10.5 20, 11 20, 11 21.25, 10.5 20)), ((10.5 20, 11 20, 11 21.25, 10.5 20)))"
        );
        let decoded = decode_polygon(Some(&text)).unwrap();
        assert_eq!(decoded.rings.len(), 2);
        assert_eq!(decoded.rings[0].len(), 4);
    }

    #[test]
    fn line_string_text_keeps_its_first_vertex() {
        let line = LineString::from(vec![(1.0, 2.0), (3.0, 4.0), (5.0, 6.0)]);
        let text = multi_line_string_text(&[line]);
        assert_eq!(text, "MULTILINESTRING ((1 2, 3 4, 5 6))");
        let decoded = decode_polygon(Some(&text)).unwrap();
        assert_eq!(decoded.rings.len(), 1);
        assert_eq!(lat_lons(&decoded.rings[0]), vec![(1.0, 2.0), (3.0, 4.0), (5.0, 6.0)]);
        assert_eq!(decoded.malformed_tokens, 0);
    }

    #[test]
    fn any_leading_keyword_is_stripped() {
        let decoded = decode_polygon(Some("  POLYGON ((1 2, 3 4), (5 6, 7 8))")).unwrap();
        assert_eq!(decoded.rings.len(), 2);
        assert_eq!(lat_lons(&decoded.rings[0]), vec![(1.0, 2.0), (3.0, 4.0)]);
        assert_eq!(decoded.malformed_tokens, 0);
    }

    #[test]
    fn point_sets_are_not_polygon_text() {
        let points = MultiPoint(vec![Point::new(1.0, 2.0), Point::new(3.0, 4.0)]);
        let text = multi_point_text(&points);
        assert_eq!(text, "MULTIPOINT (1 2, 3 4)");
        assert_eq!(decode_polygon(Some(&text)), None);
        assert_eq!(decode_polygon(Some(&point_text(&Point::new(1.0, 2.0)))), None);
    }

    #[test]
    fn empty_shapes_render_as_empty_keyword() {
        assert_eq!(multi_polygon_text(&MultiPolygon(vec![])), "MULTIPOLYGON EMPTY");
        assert_eq!(multi_line_string_text(&[]), "MULTILINESTRING EMPTY");
        assert!(decode_polygon(Some("MULTIPOLYGON EMPTY")).is_none());
    }
}
