//! Geospatial context: corridor geometry, pixel georeferencing, and the
//! geolocation collaborator that turns a coordinate into a corridor distance.
//!
//! Distances use a local equirectangular projection centred on the query
//! point. Over corridor-scale extents (a few kilometres) the error stays well
//! under a metre, which is finer than any setback rule.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::{CoreError, CoreResult, Stage};

/// Mean Earth radius (IUGG), metres.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub fn new(lon: f64, lat: f64) -> CoreResult<Self> {
        if !(lon.is_finite() && lat.is_finite())
            || !(-180.0..=180.0).contains(&lon)
            || !(-90.0..=90.0).contains(&lat)
        {
            return Err(CoreError::input(
                Stage::Geolocate,
                format!("coordinate out of range: lon={} lat={}", lon, lat),
            ));
        }
        Ok(Self { lon, lat })
    }
}

/// Affine pixel → lon/lat mapping for a north-up image (world-file style).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoReference {
    /// Coordinate of the top-left corner of pixel (0, 0).
    pub origin: GeoPoint,
    pub lon_per_pixel: f64,
    /// Usually negative: latitude falls as rows increase.
    pub lat_per_pixel: f64,
}

impl GeoReference {
    /// Per-pixel steps must be finite and non-zero.
    pub fn new(origin: GeoPoint, lon_per_pixel: f64, lat_per_pixel: f64) -> CoreResult<Self> {
        for (name, step) in [("lon_per_pixel", lon_per_pixel), ("lat_per_pixel", lat_per_pixel)] {
            if !step.is_finite() || step == 0.0 {
                return Err(CoreError::input(
                    Stage::Geolocate,
                    format!("georeference {} must be finite and non-zero, got {}", name, step),
                ));
            }
        }
        Ok(Self {
            origin,
            lon_per_pixel,
            lat_per_pixel,
        })
    }

    /// `(x, y)` are pixel indices; the coordinate is that pixel's centre.
    pub fn pixel_to_geo(&self, x: f64, y: f64) -> GeoPoint {
        GeoPoint {
            lon: self.origin.lon + (x + 0.5) * self.lon_per_pixel,
            lat: self.origin.lat + (y + 0.5) * self.lat_per_pixel,
        }
    }
}

/// Protected right-of-way: centerlines and/or buffer polygons.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Corridor {
    pub lines: Vec<Vec<GeoPoint>>,
    /// Each polygon is an exterior ring followed by holes.
    pub polygons: Vec<Vec<Vec<GeoPoint>>>,
}

impl Corridor {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.polygons.is_empty()
    }

    pub fn load(path: &Path) -> CoreResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CoreError::input(
                Stage::Load,
                format!("corridor file {} unreadable: {}", path.display(), e),
            )
        })?;
        Self::from_geojson_str(&raw)
    }

    /// Parse FeatureCollection / Feature / (Multi)LineString / (Multi)Polygon.
    pub fn from_geojson_str(raw: &str) -> CoreResult<Self> {
        let value: Value = serde_json::from_str(raw).map_err(|e| malformed(e.to_string()))?;
        let mut corridor = Corridor::default();
        collect_geometry(&value, &mut corridor).map_err(malformed)?;
        if corridor.is_empty() {
            return Err(malformed("no corridor geometry found".to_string()));
        }
        Ok(corridor)
    }
}

fn malformed(reason: String) -> CoreError {
    CoreError::input(Stage::Load, format!("malformed corridor geometry: {}", reason))
}

fn collect_geometry(value: &Value, out: &mut Corridor) -> std::result::Result<(), String> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing \"type\"".to_string())?;
    match kind {
        "FeatureCollection" => {
            let features = value
                .get("features")
                .and_then(Value::as_array)
                .ok_or_else(|| "FeatureCollection without features".to_string())?;
            for feature in features {
                collect_geometry(feature, out)?;
            }
        }
        "Feature" => {
            let geometry = value
                .get("geometry")
                .filter(|g| !g.is_null())
                .ok_or_else(|| "Feature without geometry".to_string())?;
            collect_geometry(geometry, out)?;
        }
        "LineString" => out.lines.push(line(coordinates(value)?)?),
        "MultiLineString" => {
            for l in array(coordinates(value)?, "MultiLineString")? {
                out.lines.push(line(l)?);
            }
        }
        "Polygon" => out.polygons.push(polygon(coordinates(value)?)?),
        "MultiPolygon" => {
            for p in array(coordinates(value)?, "MultiPolygon")? {
                out.polygons.push(polygon(p)?);
            }
        }
        other => return Err(format!("unsupported geometry type {}", other)),
    }
    Ok(())
}

fn coordinates(value: &Value) -> std::result::Result<&Value, String> {
    value
        .get("coordinates")
        .ok_or_else(|| "geometry without coordinates".to_string())
}

fn array<'a>(value: &'a Value, what: &str) -> std::result::Result<&'a Vec<Value>, String> {
    value
        .as_array()
        .ok_or_else(|| format!("{} coordinates must be an array", what))
}

fn position(value: &Value) -> std::result::Result<GeoPoint, String> {
    let pair = value
        .as_array()
        .filter(|p| p.len() >= 2)
        .ok_or_else(|| "position must be [lon, lat]".to_string())?;
    let lon = pair[0].as_f64().ok_or("longitude is not a number")?;
    let lat = pair[1].as_f64().ok_or("latitude is not a number")?;
    GeoPoint::new(lon, lat).map_err(|e| e.to_string())
}

fn line(value: &Value) -> std::result::Result<Vec<GeoPoint>, String> {
    let points = array(value, "LineString")?
        .iter()
        .map(position)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if points.len() < 2 {
        return Err("LineString needs at least two positions".to_string());
    }
    Ok(points)
}

fn polygon(value: &Value) -> std::result::Result<Vec<Vec<GeoPoint>>, String> {
    let rings = array(value, "Polygon")?
        .iter()
        .map(|ring| {
            let points = array(ring, "Polygon ring")?
                .iter()
                .map(position)
                .collect::<std::result::Result<Vec<_>, _>>()?;
            if points.len() < 4 {
                return Err("polygon ring needs at least four positions".to_string());
            }
            Ok(points)
        })
        .collect::<std::result::Result<Vec<_>, String>>()?;
    if rings.is_empty() {
        return Err("Polygon without rings".to_string());
    }
    Ok(rings)
}

// -------------------- Geolocation collaborator --------------------

/// Maps a coordinate to its distance from the corridor.
///
/// `Ok(None)` means the distance is unavailable; `Err` is a collaborator
/// failure. Neither aborts a run.
pub trait Geolocator: Send + Sync {
    fn name(&self) -> &'static str;

    fn locate(&self, point: GeoPoint, corridor: &Corridor) -> Result<Option<f64>>;
}

/// Local-projection geolocator: nearest segment distance, zero inside
/// corridor polygons.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlanarGeolocator;

impl Geolocator for PlanarGeolocator {
    fn name(&self) -> &'static str {
        "planar"
    }

    fn locate(&self, point: GeoPoint, corridor: &Corridor) -> Result<Option<f64>> {
        if corridor.is_empty() {
            return Ok(None);
        }
        let projection = LocalProjection::centred_on(point);

        for rings in &corridor.polygons {
            let projected: Vec<Vec<(f64, f64)>> = rings
                .iter()
                .map(|ring| ring.iter().map(|p| projection.project(*p)).collect())
                .collect();
            if contains_origin(&projected) {
                return Ok(Some(0.0));
            }
        }

        let mut best = f64::INFINITY;
        let paths = corridor
            .lines
            .iter()
            .chain(corridor.polygons.iter().flatten());
        for path in paths {
            for segment in path.windows(2) {
                let a = projection.project(segment[0]);
                let b = projection.project(segment[1]);
                best = best.min(origin_to_segment(a, b));
            }
        }
        Ok(best.is_finite().then_some(best))
    }
}

struct LocalProjection {
    origin: GeoPoint,
    meters_per_degree: f64,
    lon_scale: f64,
}

impl LocalProjection {
    fn centred_on(origin: GeoPoint) -> Self {
        Self {
            origin,
            meters_per_degree: EARTH_RADIUS_M * std::f64::consts::PI / 180.0,
            lon_scale: origin.lat.to_radians().cos(),
        }
    }

    fn project(&self, p: GeoPoint) -> (f64, f64) {
        let mut dlon = p.lon - self.origin.lon;
        if dlon > 180.0 {
            dlon -= 360.0;
        } else if dlon < -180.0 {
            dlon += 360.0;
        }
        (
            dlon * self.lon_scale * self.meters_per_degree,
            (p.lat - self.origin.lat) * self.meters_per_degree,
        )
    }
}

fn origin_to_segment(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len2 = dx * dx + dy * dy;
    let t = if len2 == 0.0 {
        0.0
    } else {
        (-(a.0 * dx + a.1 * dy) / len2).clamp(0.0, 1.0)
    };
    let (px, py) = (a.0 + t * dx, a.1 + t * dy);
    (px * px + py * py).sqrt()
}

/// Even-odd test over exterior + holes.
fn contains_origin(rings: &[Vec<(f64, f64)>]) -> bool {
    let mut inside = false;
    for ring in rings {
        for edge in ring.windows(2) {
            let ((x1, y1), (x2, y2)) = (edge[0], edge[1]);
            if (y1 > 0.0) != (y2 > 0.0) {
                let x_cross = x1 + (0.0 - y1) * (x2 - x1) / (y2 - y1);
                if x_cross > 0.0 {
                    inside = !inside;
                }
            }
        }
    }
    inside
}

// -------------------- Run-level geospatial input --------------------

/// Optional geospatial context supplied with a run.
///
/// Each field is independent. With no context every candidate's distance is
/// unknown; no proxy distance is ever substituted.
#[derive(Clone, Debug, Default)]
pub struct GeoContext {
    /// Scene location used when no georeference is available.
    pub site: Option<GeoPoint>,
    /// Maps candidate centroids to coordinates.
    pub georeference: Option<GeoReference>,
    pub corridor: Option<Corridor>,
    /// Surveyed distance for the whole scene, used when there is no corridor.
    pub site_distance_meters: Option<f64>,
}

impl GeoContext {
    pub fn is_empty(&self) -> bool {
        self.site.is_none()
            && self.georeference.is_none()
            && self.corridor.is_none()
            && self.site_distance_meters.is_none()
    }

    /// Coordinate for a pixel centroid: georeferenced when possible, else the site.
    pub fn coordinate_for(&self, x: f64, y: f64) -> Option<GeoPoint> {
        self.georeference
            .map(|g| g.pixel_to_geo(x, y))
            .or(self.site)
    }

    /// Feed every field into `hasher`; absent fields are tagged, not skipped.
    pub fn digest_into(&self, hasher: &mut Sha256) {
        match self.site {
            Some(p) => {
                hasher.update([1u8]);
                digest_point(hasher, p);
            }
            None => hasher.update([0u8]),
        }
        match self.georeference {
            Some(g) => {
                hasher.update([1u8]);
                digest_point(hasher, g.origin);
                hasher.update(g.lon_per_pixel.to_le_bytes());
                hasher.update(g.lat_per_pixel.to_le_bytes());
            }
            None => hasher.update([0u8]),
        }
        match &self.corridor {
            Some(c) => {
                hasher.update([1u8]);
                hasher.update((c.lines.len() as u64).to_le_bytes());
                for line in &c.lines {
                    digest_ring(hasher, line);
                }
                hasher.update((c.polygons.len() as u64).to_le_bytes());
                for polygon in &c.polygons {
                    hasher.update((polygon.len() as u64).to_le_bytes());
                    for ring in polygon {
                        digest_ring(hasher, ring);
                    }
                }
            }
            None => hasher.update([0u8]),
        }
        match self.site_distance_meters {
            Some(d) => {
                hasher.update([1u8]);
                hasher.update(d.to_le_bytes());
            }
            None => hasher.update([0u8]),
        }
    }
}

fn digest_point(hasher: &mut Sha256, p: GeoPoint) {
    hasher.update(p.lon.to_le_bytes());
    hasher.update(p.lat.to_le_bytes());
}

fn digest_ring(hasher: &mut Sha256, points: &[GeoPoint]) {
    hasher.update((points.len() as u64).to_le_bytes());
    for p in points {
        digest_point(hasher, *p);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {}, "geometry": {
                "type": "LineString", "coordinates": [[0.0, 0.0], [1.0, 0.0]]
            }}
        ]
    }"#;

    const SQUARE: &str = r#"{
        "type": "Polygon",
        "coordinates": [[[10.0, 10.0], [10.01, 10.0], [10.01, 10.01], [10.0, 10.01], [10.0, 10.0]]]
    }"#;

    #[test]
    fn distance_to_equatorial_line() {
        let corridor = Corridor::from_geojson_str(LINE).unwrap();
        let d = PlanarGeolocator
            .locate(GeoPoint::new(0.5, 0.001).unwrap(), &corridor)
            .unwrap()
            .unwrap();
        assert!((d - 111.195).abs() < 0.5, "d={}", d);
    }

    #[test]
    fn distance_past_line_end_uses_endpoint() {
        let corridor = Corridor::from_geojson_str(LINE).unwrap();
        let d = PlanarGeolocator
            .locate(GeoPoint::new(-0.001, 0.0).unwrap(), &corridor)
            .unwrap()
            .unwrap();
        assert!((d - 111.195).abs() < 0.5, "d={}", d);
    }

    #[test]
    fn inside_polygon_is_zero() {
        let corridor = Corridor::from_geojson_str(SQUARE).unwrap();
        let d = PlanarGeolocator
            .locate(GeoPoint::new(10.005, 10.005).unwrap(), &corridor)
            .unwrap();
        assert_eq!(d, Some(0.0));
        let outside = PlanarGeolocator
            .locate(GeoPoint::new(10.02, 10.005).unwrap(), &corridor)
            .unwrap()
            .unwrap();
        assert!(outside > 1000.0 && outside < 1100.0, "outside={}", outside);
    }

    #[test]
    fn malformed_geometry_is_input_error() {
        for raw in [
            "not json",
            r#"{"type": "Point", "coordinates": [0, 0]}"#,
            r#"{"type": "LineString", "coordinates": [[0, 0]]}"#,
            r#"{"type": "LineString", "coordinates": [[0, 0], [0, 95]]}"#,
            r#"{"type": "FeatureCollection", "features": []}"#,
        ] {
            let err = Corridor::from_geojson_str(raw).unwrap_err();
            assert!(matches!(err, CoreError::Input { .. }), "{}", raw);
        }
    }

    #[test]
    fn georeference_maps_pixel_centres() {
        let g = GeoReference::new(GeoPoint::new(-97.0, 35.0).unwrap(), 0.0001, -0.0001).unwrap();
        let p = g.pixel_to_geo(10.0, 20.0);
        assert!((p.lon - -96.99895).abs() < 1e-9);
        assert!((p.lat - 34.99795).abs() < 1e-9);
        let corner = g.pixel_to_geo(-0.5, -0.5);
        assert!((corner.lon - -97.0).abs() < 1e-12);
        assert!((corner.lat - 35.0).abs() < 1e-12);

        let ctx = GeoContext {
            site: Some(GeoPoint::new(1.0, 1.0).unwrap()),
            ..GeoContext::default()
        };
        assert_eq!(ctx.coordinate_for(5.0, 5.0), ctx.site);
        assert!(GeoContext::default().coordinate_for(5.0, 5.0).is_none());
    }

    #[test]
    fn georeference_rejects_degenerate_steps() {
        let origin = GeoPoint::new(-97.0, 35.0).unwrap();
        for (lon_step, lat_step) in [
            (f64::NAN, -1e-5),
            (1e-5, f64::INFINITY),
            (0.0, -1e-5),
            (1e-5, 0.0),
        ] {
            let err = GeoReference::new(origin, lon_step, lat_step).unwrap_err();
            assert!(matches!(err, CoreError::Input { .. }));
        }
    }
}
