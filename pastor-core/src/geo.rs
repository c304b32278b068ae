//! Great-circle distance and fence polygon geometry.
//!
//! Polygons are small (a pasture, a farm) so containment and edge distance
//! work on a local equirectangular projection; only `distance` is exact
//! on the sphere.

use std::f64::consts::PI;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

const METERS_PER_DEGREE: f64 = EARTH_RADIUS_M * PI / 180.0;

/// Haversine distance in metres.
///
/// Non-finite inputs yield `NaN`; callers must check before comparing.
pub fn distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }

    /// Finite and within WGS84 bounds.
    pub fn is_valid(&self) -> bool {
        self.is_finite() && (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }

    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        distance(self.lat, self.lon, other.lat, other.lon)
    }

    pub fn to_geojson(&self) -> Value {
        json!({ "type": "Point", "coordinates": [self.lon, self.lat] })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn contains(&self, p: GeoPoint) -> bool {
        p.lat >= self.min_lat && p.lat <= self.max_lat && p.lon >= self.min_lon && p.lon <= self.max_lon
    }

    pub fn to_geojson(&self) -> Value {
        json!({
            "type": "Polygon",
            "coordinates": [[
                [self.min_lon, self.min_lat],
                [self.max_lon, self.min_lat],
                [self.max_lon, self.max_lat],
                [self.min_lon, self.max_lat],
                [self.min_lon, self.min_lat],
            ]],
        })
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum GeometryError {
    #[error("geometry is not a GeoJSON Polygon")]
    NotAPolygon,
    #[error("polygon has no coordinates")]
    MissingCoordinates,
    #[error("polygon holes are not supported")]
    HolesUnsupported,
    #[error("malformed position at index {0}")]
    MalformedPosition(usize),
    #[error("invalid coordinate ({lat}, {lon})")]
    InvalidCoordinate { lat: f64, lon: f64 },
    #[error("polygon needs at least 3 distinct vertices, got {0}")]
    TooFewVertices(usize),
    #[error("polygon edges intersect")]
    SelfIntersecting,
    #[error("polygon has zero area")]
    ZeroArea,
}

/// Simple polygon: exterior ring only, stored without the closing vertex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Polygon {
    ring: Box<[GeoPoint]>,
}

impl Polygon {
    pub fn new(mut points: Vec<GeoPoint>) -> Result<Self, GeometryError> {
        if let Some(p) = points.iter().find(|p| !p.is_valid()) {
            return Err(GeometryError::InvalidCoordinate { lat: p.lat, lon: p.lon });
        }

        points.dedup();
        if points.len() > 1 && points.first() == points.last() {
            points.pop();
        }

        if points.len() < 3 {
            return Err(GeometryError::TooFewVertices(points.len()));
        }

        if has_self_intersection(&points) {
            return Err(GeometryError::SelfIntersecting);
        }

        if signed_area(&points).abs() < f64::EPSILON {
            return Err(GeometryError::ZeroArea);
        }

        Ok(Self {
            ring: points.into_boxed_slice(),
        })
    }

    /// Accepts a GeoJSON `Polygon` geometry or a `Feature` wrapping one.
    pub fn from_geojson(value: &Value) -> Result<Self, GeometryError> {
        let geometry = match value.get("type").and_then(Value::as_str) {
            Some("Feature") => value.get("geometry").ok_or(GeometryError::NotAPolygon)?,
            Some("Polygon") => value,
            _ => return Err(GeometryError::NotAPolygon),
        };

        if geometry.get("type").and_then(Value::as_str) != Some("Polygon") {
            return Err(GeometryError::NotAPolygon);
        }

        let rings = geometry
            .get("coordinates")
            .and_then(Value::as_array)
            .ok_or(GeometryError::MissingCoordinates)?;

        let exterior = match rings.as_slice() {
            [] => return Err(GeometryError::MissingCoordinates),
            [exterior] => exterior.as_array().ok_or(GeometryError::MissingCoordinates)?,
            _ => return Err(GeometryError::HolesUnsupported),
        };

        let points = exterior
            .iter()
            .enumerate()
            .map(|(i, position)| {
                let pair = position.as_array().ok_or(GeometryError::MalformedPosition(i))?;
                match (pair.first().and_then(Value::as_f64), pair.get(1).and_then(Value::as_f64)) {
                    (Some(lon), Some(lat)) => Ok(GeoPoint::new(lat, lon)),
                    _ => Err(GeometryError::MalformedPosition(i)),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(points)
    }

    /// Builds a polygon from `[lat, lon]` pairs, the order field apps use.
    pub fn from_lat_lon(points: &[[f64; 2]]) -> Result<Self, GeometryError> {
        Self::new(points.iter().map(|p| GeoPoint::new(p[0], p[1])).collect())
    }

    pub fn vertices(&self) -> &[GeoPoint] {
        &self.ring
    }

    pub fn to_geojson(&self) -> Value {
        let mut coordinates: Vec<[f64; 2]> = self.ring.iter().map(|p| [p.lon, p.lat]).collect();
        coordinates.push([self.ring[0].lon, self.ring[0].lat]);

        json!({ "type": "Polygon", "coordinates": [coordinates] })
    }

    pub fn bbox(&self) -> BoundingBox {
        self.ring.iter().fold(
            BoundingBox {
                min_lat: f64::INFINITY,
                min_lon: f64::INFINITY,
                max_lat: f64::NEG_INFINITY,
                max_lon: f64::NEG_INFINITY,
            },
            |bb, p| BoundingBox {
                min_lat: bb.min_lat.min(p.lat),
                min_lon: bb.min_lon.min(p.lon),
                max_lat: bb.max_lat.max(p.lat),
                max_lon: bb.max_lon.max(p.lon),
            },
        )
    }

    /// Area-weighted centroid.
    pub fn centroid(&self) -> GeoPoint {
        let origin = self.ring[0];
        let n = self.ring.len();

        let (mut area, mut cx, mut cy) = (0.0, 0.0, 0.0);
        for i in 0..n {
            let (x0, y0) = planar(origin, self.ring[i]);
            let (x1, y1) = planar(origin, self.ring[(i + 1) % n]);
            let cross = x0 * y1 - x1 * y0;
            area += cross;
            cx += (x0 + x1) * cross;
            cy += (y0 + y1) * cross;
        }
        area *= 0.5;

        GeoPoint::new(origin.lat + cy / (6.0 * area), origin.lon + cx / (6.0 * area))
    }

    /// Ray-casting containment; points on an edge count as inside.
    pub fn contains(&self, p: GeoPoint) -> bool {
        if !p.is_finite() {
            return false;
        }

        let n = self.ring.len();
        if (0..n).any(|i| on_segment(self.ring[i], self.ring[(i + 1) % n], p)) {
            return true;
        }

        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (a, b) = (self.ring[i], self.ring[j]);
            if (a.lat > p.lat) != (b.lat > p.lat) {
                let x = (b.lon - a.lon) * (p.lat - a.lat) / (b.lat - a.lat) + a.lon;
                if p.lon < x {
                    inside = !inside;
                }
            }
            j = i;
        }

        inside
    }

    /// Metres from `p` to the polygon; zero when inside.
    pub fn distance_to(&self, p: GeoPoint) -> f64 {
        if !p.is_finite() {
            return f64::NAN;
        }
        if self.contains(p) {
            return 0.0;
        }

        let n = self.ring.len();
        (0..n)
            .map(|i| OrderedFloat(edge_distance_m(p, self.ring[i], self.ring[(i + 1) % n])))
            .min()
            .map_or(f64::INFINITY, |d| d.0)
    }
}

impl TryFrom<Value> for Polygon {
    type Error = GeometryError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_geojson(&value)
    }
}

impl From<Polygon> for Value {
    fn from(p: Polygon) -> Self {
        p.to_geojson()
    }
}

// x = lon, y = lat, in degrees relative to `origin`.
fn planar(origin: GeoPoint, p: GeoPoint) -> (f64, f64) {
    (p.lon - origin.lon, p.lat - origin.lat)
}

fn signed_area(points: &[GeoPoint]) -> f64 {
    let origin = points[0];
    let n = points.len();
    let mut sum = 0.0;
    for i in 0..n {
        let (x0, y0) = planar(origin, points[i]);
        let (x1, y1) = planar(origin, points[(i + 1) % n]);
        sum += x0 * y1 - x1 * y0;
    }
    sum / 2.0
}

fn orientation(a: GeoPoint, b: GeoPoint, c: GeoPoint) -> f64 {
    (b.lon - a.lon) * (c.lat - a.lat) - (b.lat - a.lat) * (c.lon - a.lon)
}

fn within_extent(a: GeoPoint, b: GeoPoint, p: GeoPoint) -> bool {
    p.lon >= a.lon.min(b.lon) && p.lon <= a.lon.max(b.lon) && p.lat >= a.lat.min(b.lat) && p.lat <= a.lat.max(b.lat)
}

fn on_segment(a: GeoPoint, b: GeoPoint, p: GeoPoint) -> bool {
    orientation(a, b, p) == 0.0 && within_extent(a, b, p)
}

fn segments_intersect(p1: GeoPoint, p2: GeoPoint, q1: GeoPoint, q2: GeoPoint) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);

    if d1 * d2 < 0.0 && d3 * d4 < 0.0 {
        return true;
    }

    (d1 == 0.0 && within_extent(q1, q2, p1))
        || (d2 == 0.0 && within_extent(q1, q2, p2))
        || (d3 == 0.0 && within_extent(p1, p2, q1))
        || (d4 == 0.0 && within_extent(p1, p2, q2))
}

fn has_self_intersection(points: &[GeoPoint]) -> bool {
    let n = points.len();
    for i in 0..n {
        for j in (i + 2)..n {
            // first and last edges share vertex 0
            if i == 0 && j == n - 1 {
                continue;
            }
            if segments_intersect(points[i], points[i + 1], points[j], points[(j + 1) % n]) {
                return true;
            }
        }
    }
    false
}

fn edge_distance_m(p: GeoPoint, a: GeoPoint, b: GeoPoint) -> f64 {
    let scale_x = p.lat.to_radians().cos() * METERS_PER_DEGREE;
    let (ax, ay) = ((a.lon - p.lon) * scale_x, (a.lat - p.lat) * METERS_PER_DEGREE);
    let (bx, by) = ((b.lon - p.lon) * scale_x, (b.lat - p.lat) * METERS_PER_DEGREE);

    let (dx, dy) = (bx - ax, by - ay);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq == 0.0 {
        0.0
    } else {
        (-(ax * dx + ay * dy) / len_sq).clamp(0.0, 1.0)
    };

    (ax + t * dx).hypot(ay + t * dy)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pasture() -> Polygon {
        Polygon::from_lat_lon(&[[39.99, -8.01], [39.99, -7.99], [40.01, -7.99], [40.01, -8.01]])
            .unwrap()
    }

    #[test]
    fn one_degree_of_latitude() {
        let d = distance(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_194.93).abs() < 0.01, "got {d}");
        assert_eq!(distance(40.0, -8.0, 40.0, -8.0), 0.0);
    }

    #[test]
    fn non_finite_input_is_nan() {
        assert!(distance(f64::NAN, 0.0, 1.0, 1.0).is_nan());
        assert!(distance(0.0, f64::INFINITY, 1.0, 1.0).is_nan());
    }

    #[test]
    fn containment() {
        let fence = pasture();
        assert!(fence.contains(GeoPoint::new(40.0, -8.0)));
        assert!(fence.contains(GeoPoint::new(39.99, -8.0)));
        assert!(!fence.contains(GeoPoint::new(40.02, -8.0)));
        assert!(!fence.contains(GeoPoint::new(f64::NAN, -8.0)));
    }

    #[test]
    fn distance_to_outside_point() {
        let fence = pasture();
        assert_eq!(fence.distance_to(GeoPoint::new(40.0, -8.0)), 0.0);

        let d = fence.distance_to(GeoPoint::new(40.02, -8.0));
        assert!((d - 1111.95).abs() < 1.0, "got {d}");
    }

    #[test]
    fn geojson_ring_is_closed_on_output() {
        let value = json!({
            "type": "Polygon",
            "coordinates": [[[-8.01, 39.99], [-7.99, 39.99], [-7.99, 40.01], [-8.01, 40.01], [-8.01, 39.99]]],
        });
        let fence = Polygon::from_geojson(&value).unwrap();
        assert_eq!(fence.vertices().len(), 4);
        assert_eq!(fence, pasture());

        let out = fence.to_geojson();
        assert_eq!(out["coordinates"][0].as_array().unwrap().len(), 5);
    }

    #[test]
    fn feature_wrapper_is_accepted() {
        let value = json!({
            "type": "Feature",
            "properties": {},
            "geometry": pasture().to_geojson(),
        });
        assert!(Polygon::from_geojson(&value).is_ok());
    }

    #[test]
    fn rejects_invalid_shapes() {
        let bowtie = Polygon::from_lat_lon(&[[0.0, 0.0], [1.0, 1.0], [1.0, 0.0], [0.0, 1.0]]);
        assert_eq!(bowtie, Err(GeometryError::SelfIntersecting));

        let line = Polygon::from_lat_lon(&[[0.0, 0.0], [0.0, 1.0], [0.0, 2.0]]);
        assert_eq!(line, Err(GeometryError::ZeroArea));

        let two = Polygon::from_lat_lon(&[[0.0, 0.0], [0.0, 1.0], [0.0, 0.0]]);
        assert_eq!(two, Err(GeometryError::TooFewVertices(2)));

        let point = json!({ "type": "Point", "coordinates": [0.0, 0.0] });
        assert_eq!(Polygon::from_geojson(&point), Err(GeometryError::NotAPolygon));

        let holed = json!({
            "type": "Polygon",
            "coordinates": [
                [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]],
                [[0.1, 0.1], [0.2, 0.1], [0.2, 0.2], [0.1, 0.1]],
            ],
        });
        assert_eq!(Polygon::from_geojson(&holed), Err(GeometryError::HolesUnsupported));

        let out_of_range = Polygon::from_lat_lon(&[[95.0, 0.0], [0.0, 1.0], [1.0, 1.0]]);
        assert!(matches!(out_of_range, Err(GeometryError::InvalidCoordinate { .. })));
    }

    #[test]
    fn bbox_and_centroid() {
        let fence = pasture();
        let bb = fence.bbox();
        assert_eq!((bb.min_lat, bb.max_lat), (39.99, 40.01));
        assert_eq!((bb.min_lon, bb.max_lon), (-8.01, -7.99));

        let c = fence.centroid();
        assert!((c.lat - 40.0).abs() < 1e-9);
        assert!((c.lon + 8.0).abs() < 1e-9);
    }
}
