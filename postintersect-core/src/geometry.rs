//! WKT-level geometry helpers for export sanitization.
//!
//! Geometries travel through the export pipeline as WKT and are inspected
//! and normalized through the `wkt` crate's typed coordinate model. The
//! one transformation applied is ZM→Z: the measure ordinate is stripped
//! recursively through the coordinate structure (point coordinates keep
//! their first three components; line strings, polygon rings and
//! multi-geometries are recursed into). Stripping is idempotent.

use crate::error::PostIntersectError;
use crate::Result;
use wkt::types::{
    Coord, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon, Point,
    Polygon,
};
use wkt::Wkt;

/// Coordinate dimensionality observed across a geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dimensions {
    /// Any coordinate carries an elevation ordinate.
    pub z: bool,
    /// Any coordinate carries a measure ordinate.
    pub m: bool,
}

/// Parses a WKT string into the typed geometry model.
pub fn parse_wkt(text: &str) -> Result<Wkt<f64>> {
    text.parse::<Wkt<f64>>().map_err(|e| {
        PostIntersectError::configuration(format!("Failed to parse WKT geometry: {}", e))
    })
}

/// Reports which optional ordinates appear anywhere in the geometry.
pub fn dimensions(geometry: &Wkt<f64>) -> Dimensions {
    let mut dims = Dimensions::default();
    visit_coords(geometry, &mut |coord| {
        dims.z |= coord.z.is_some();
        dims.m |= coord.m.is_some();
    });
    dims
}

/// True when any coordinate in the geometry carries a measure ordinate.
pub fn has_measure(geometry: &Wkt<f64>) -> bool {
    dimensions(geometry).m
}

/// Strips the measure ordinate from every coordinate, recursing through
/// nested coordinate structures. Elevation is preserved; applying this to
/// an already measure-free geometry returns it unchanged.
pub fn strip_measure(geometry: Wkt<f64>) -> Wkt<f64> {
    match geometry {
        Wkt::Point(point) => Wkt::Point(strip_point(point)),
        Wkt::LineString(line) => Wkt::LineString(strip_line(line)),
        Wkt::Polygon(polygon) => Wkt::Polygon(strip_polygon(polygon)),
        Wkt::MultiPoint(MultiPoint(points)) => {
            Wkt::MultiPoint(MultiPoint(points.into_iter().map(strip_point).collect()))
        }
        Wkt::MultiLineString(MultiLineString(lines)) => {
            Wkt::MultiLineString(MultiLineString(lines.into_iter().map(strip_line).collect()))
        }
        Wkt::MultiPolygon(MultiPolygon(polygons)) => Wkt::MultiPolygon(MultiPolygon(
            polygons.into_iter().map(strip_polygon).collect(),
        )),
        Wkt::GeometryCollection(GeometryCollection(members)) => Wkt::GeometryCollection(
            GeometryCollection(members.into_iter().map(strip_measure).collect()),
        ),
    }
}

/// The uppercase WKT keyword of the geometry kind, used to classify
/// layers in the output container.
pub fn geometry_type_name(geometry: &Wkt<f64>) -> &'static str {
    match geometry {
        Wkt::Point(_) => "POINT",
        Wkt::LineString(_) => "LINESTRING",
        Wkt::Polygon(_) => "POLYGON",
        Wkt::MultiPoint(_) => "MULTIPOINT",
        Wkt::MultiLineString(_) => "MULTILINESTRING",
        Wkt::MultiPolygon(_) => "MULTIPOLYGON",
        Wkt::GeometryCollection(_) => "GEOMETRYCOLLECTION",
    }
}

/// Visits the X/Y pair of every coordinate in the geometry, in structure
/// order. Used for envelope computation.
pub fn visit_xy(geometry: &Wkt<f64>, visit: &mut impl FnMut(f64, f64)) {
    visit_coords(geometry, &mut |coord| visit(coord.x, coord.y));
}

fn strip_coord(coord: Coord<f64>) -> Coord<f64> {
    Coord {
        x: coord.x,
        y: coord.y,
        z: coord.z,
        m: None,
    }
}

fn strip_point(point: Point<f64>) -> Point<f64> {
    Point(point.0.map(strip_coord))
}

fn strip_line(line: LineString<f64>) -> LineString<f64> {
    LineString(line.0.into_iter().map(strip_coord).collect())
}

fn strip_polygon(polygon: Polygon<f64>) -> Polygon<f64> {
    Polygon(polygon.0.into_iter().map(strip_line).collect())
}

fn visit_coords(geometry: &Wkt<f64>, visit: &mut impl FnMut(&Coord<f64>)) {
    match geometry {
        Wkt::Point(Point(coord)) => {
            if let Some(coord) = coord {
                visit(coord);
            }
        }
        Wkt::LineString(LineString(coords)) => coords.iter().for_each(&mut *visit),
        Wkt::Polygon(Polygon(rings)) => {
            for LineString(coords) in rings {
                coords.iter().for_each(&mut *visit);
            }
        }
        Wkt::MultiPoint(MultiPoint(points)) => {
            for Point(coord) in points {
                if let Some(coord) = coord {
                    visit(coord);
                }
            }
        }
        Wkt::MultiLineString(MultiLineString(lines)) => {
            for LineString(coords) in lines {
                coords.iter().for_each(&mut *visit);
            }
        }
        Wkt::MultiPolygon(MultiPolygon(polygons)) => {
            for Polygon(rings) in polygons {
                for LineString(coords) in rings {
                    coords.iter().for_each(&mut *visit);
                }
            }
        }
        Wkt::GeometryCollection(GeometryCollection(members)) => {
            for member in members {
                visit_coords(member, visit);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_measure_on_zm_polygon() {
        let geometry =
            parse_wkt("POLYGON ZM ((0 0 1 9,4 0 1 9,4 4 1 9,0 0 1 9))").unwrap();
        assert!(has_measure(&geometry));
        assert_eq!(dimensions(&geometry), Dimensions { z: true, m: true });
    }

    #[test]
    fn test_no_measure_on_plain_polygon() {
        let geometry = parse_wkt("POLYGON ((0 0,4 0,4 4,0 0))").unwrap();
        assert!(!has_measure(&geometry));
        assert_eq!(dimensions(&geometry), Dimensions { z: false, m: false });
    }

    #[test]
    fn test_strip_keeps_elevation_and_drops_measure() {
        let geometry = parse_wkt("LINESTRING ZM (0 0 5 1,1 1 6 2)").unwrap();
        let stripped = strip_measure(geometry);

        let dims = dimensions(&stripped);
        assert!(dims.z);
        assert!(!dims.m);
    }

    #[test]
    fn test_strip_recurses_into_multipolygon_rings() {
        let geometry = parse_wkt(
            "MULTIPOLYGON ZM (((0 0 1 7,4 0 1 7,4 4 1 7,0 0 1 7),(1 1 1 7,2 1 1 7,2 2 1 7,1 1 1 7)))",
        )
        .unwrap();
        let stripped = strip_measure(geometry);
        assert!(!has_measure(&stripped));
        assert!(dimensions(&stripped).z);
    }

    #[test]
    fn test_strip_recurses_into_collections() {
        let geometry = parse_wkt(
            "GEOMETRYCOLLECTION ZM (POINT ZM (1 2 3 4),LINESTRING ZM (0 0 0 1,1 1 1 2))",
        )
        .unwrap();
        let stripped = strip_measure(geometry);
        assert!(!has_measure(&stripped));
    }

    #[test]
    fn test_strip_is_idempotent() {
        let geometry = parse_wkt("POLYGON ZM ((0 0 1 9,4 0 1 9,4 4 1 9,0 0 1 9))").unwrap();
        let once = strip_measure(geometry);
        let once_text = once.to_string();
        let twice_text = strip_measure(once).to_string();
        assert_eq!(once_text, twice_text);
    }

    #[test]
    fn test_strip_leaves_3d_geometry_unchanged() {
        let geometry = parse_wkt("POLYGON Z ((0 0 1,4 0 1,4 4 1,0 0 1))").unwrap();
        let before = geometry.to_string();
        let after = strip_measure(geometry).to_string();
        assert_eq!(before, after);
    }

    #[test]
    fn test_geometry_type_names() {
        assert_eq!(
            geometry_type_name(&parse_wkt("POINT (1 2)").unwrap()),
            "POINT"
        );
        assert_eq!(
            geometry_type_name(&parse_wkt("MULTIPOLYGON (((0 0,1 0,1 1,0 0)))").unwrap()),
            "MULTIPOLYGON"
        );
    }
}
