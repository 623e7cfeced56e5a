//! Parsed views of source WKT, backed by the `wkt` and `geo` crates.

use geo::algorithm::{BoundingRect, Simplify};
use geo::Geometry;
use wkt::{ToWkt, TryFromWkt};

/// WKT with any EWKT `SRID=...;` prefix removed.
pub fn strip_srid_prefix(wkt: &str) -> &str {
    let trimmed = wkt.trim();
    match trimmed.split_once(';') {
        Some((prefix, rest)) if prefix.trim().to_ascii_uppercase().starts_with("SRID=") => {
            rest.trim_start()
        }
        _ => trimmed,
    }
}

/// `None` when the text is not WKT the `wkt` crate can convert.
pub fn parse_wkt(wkt: &str) -> Option<Geometry<f64>> {
    match Geometry::<f64>::try_from_wkt_str(strip_srid_prefix(wkt)) {
        Ok(geometry) => Some(geometry),
        Err(err) => {
            tracing::debug!(%err, "unreadable WKT");
            None
        }
    }
}

pub fn is_geometry_collection(wkt: &str) -> bool {
    matches!(parse_wkt(wkt), Some(Geometry::GeometryCollection(_)))
}

/// A thousandth of the bounding-box diagonal. Points and empty geometries
/// have none.
pub fn simplify_tolerance(geometry: &Geometry<f64>) -> Option<f64> {
    geometry
        .bounding_rect()
        .map(|rect| rect.width().hypot(rect.height()) / 1000.0)
        .filter(|tolerance| *tolerance > 0.0)
}

/// Douglas-Peucker simplification of linear and areal geometries; anything
/// else is returned unchanged.
pub fn simplify(geometry: Geometry<f64>, tolerance: f64) -> Geometry<f64> {
    match geometry {
        Geometry::LineString(line) => Geometry::LineString(line.simplify(&tolerance)),
        Geometry::MultiLineString(lines) => Geometry::MultiLineString(lines.simplify(&tolerance)),
        Geometry::Polygon(polygon) => Geometry::Polygon(polygon.simplify(&tolerance)),
        Geometry::MultiPolygon(polygons) => Geometry::MultiPolygon(polygons.simplify(&tolerance)),
        other => other,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimplifiedWkt {
    pub wkt: String,
    pub tolerance: f64,
}

/// Parses `wkt`, simplifies it with [`simplify_tolerance`] and writes it back
/// out. `None` when the text cannot be parsed or has no extent.
pub fn simplify_wkt(wkt: &str) -> Option<SimplifiedWkt> {
    let geometry = parse_wkt(wkt)?;
    let tolerance = simplify_tolerance(&geometry)?;
    Some(SimplifiedWkt {
        wkt: simplify(geometry, tolerance).wkt_string(),
        tolerance,
    })
}
