//! Thin wrappers over the `geo` crate predicates used during classification.
//!
//! Everything here treats a cell or query rectangle as a closed polygon.
//! Envelopment follows the per-member rule: a multi-polygon contains a
//! rectangle only if one of its member polygons contains it on its own;
//! two members covering half the rectangle each do not count.

use geo::{Contains, Intersects, MultiPolygon, Polygon, Rect};

use crate::dataset::ElementGeometry;

/// Does the element's geometry share any space with the rectangle?
pub fn geometry_intersects_rect(geometry: &ElementGeometry, rect: &Rect<f64>) -> bool {
    let rect_poly = rect.to_polygon();
    match geometry {
        ElementGeometry::Point(point) => rect_poly.intersects(point),
        ElementGeometry::Line(lines) => rect_poly.intersects(lines),
        ElementGeometry::Area(polygons) => rect_poly.intersects(polygons),
    }
}

/// Does the element's geometry fully contain the rectangle?
///
/// Lines and points cannot contain anything; only closed area geometry
/// qualifies.
pub fn geometry_envelops_rect(geometry: &ElementGeometry, rect: &Rect<f64>) -> bool {
    match geometry {
        ElementGeometry::Area(polygons) => multipolygon_contains_rect(polygons, rect),
        _ => false,
    }
}

/// Per-member containment of a rectangle by a multi-polygon.
pub fn multipolygon_contains_rect(polygons: &MultiPolygon<f64>, rect: &Rect<f64>) -> bool {
    polygons
        .0
        .iter()
        .any(|polygon| polygon_contains_rect(polygon, rect))
}

/// Containment of a rectangle by a single polygon, holes respected.
pub fn polygon_contains_rect(polygon: &Polygon<f64>, rect: &Rect<f64>) -> bool {
    polygon.contains(&rect.to_polygon())
}
