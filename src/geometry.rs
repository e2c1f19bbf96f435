use anyhow::{bail, Context, Result};
use geojson::{FeatureCollection, GeoJson, Value};
use std::fs;
use std::path::Path;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Squared planar distance in degrees. Cheap comparison metric for
/// nearest-neighbour work; never mix with metric distances.
pub fn distance_sq(a: [f64; 2], b: [f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

pub fn planar_distance(a: [f64; 2], b: [f64; 2]) -> f64 {
    distance_sq(a, b).sqrt()
}

/// Great-circle distance in meters between two `[lon, lat]` points.
pub fn haversine_m(a: [f64; 2], b: [f64; 2]) -> f64 {
    let d_lat = (b[1] - a[1]).to_radians();
    let d_lon = (b[0] - a[0]).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a[1].to_radians().cos() * b[1].to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: [f64; 2],
    pub max: [f64; 2],
}

impl BoundingBox {
    fn empty() -> BoundingBox {
        BoundingBox {
            min: [f64::INFINITY, f64::INFINITY],
            max: [f64::NEG_INFINITY, f64::NEG_INFINITY],
        }
    }

    fn extend(&mut self, point: [f64; 2]) {
        self.min[0] = self.min[0].min(point[0]);
        self.min[1] = self.min[1].min(point[1]);
        self.max[0] = self.max[0].max(point[0]);
        self.max[1] = self.max[1].max(point[1]);
    }

    pub fn contains(&self, point: [f64; 2]) -> bool {
        point[0] >= self.min[0]
            && point[0] <= self.max[0]
            && point[1] >= self.min[1]
            && point[1] <= self.max[1]
    }
}

/// Spatial containment test over `[lon, lat]` points.
pub trait Bounds {
    fn contains(&self, point: [f64; 2]) -> bool;
}

/// A polygon (exterior ring plus optional holes) with its bounding
/// box as a fast reject.
#[derive(Debug, Clone)]
pub struct PolyBounds {
    rings: Vec<Vec<[f64; 2]>>,
    bbox: BoundingBox,
}

impl PolyBounds {
    pub fn new(rings: Vec<Vec<[f64; 2]>>) -> PolyBounds {
        let mut bbox = BoundingBox::empty();
        for ring in &rings {
            for &point in ring {
                bbox.extend(point);
            }
        }
        PolyBounds { rings, bbox }
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }
}

impl Bounds for PolyBounds {
    fn contains(&self, point: [f64; 2]) -> bool {
        if !self.bbox.contains(point) {
            return false;
        }

        // Even-odd ray casting; a hit inside a hole toggles back out.
        let mut inside = false;
        for ring in &self.rings {
            if ring_crosses_odd(ring, point) {
                inside = !inside;
            }
        }
        inside
    }
}

fn ring_crosses_odd(ring: &[[f64; 2]], point: [f64; 2]) -> bool {
    if ring.len() < 3 {
        return false;
    }

    let mut odd = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let [xi, yi] = ring[i];
        let [xj, yj] = ring[j];
        if (yi > point[1]) != (yj > point[1])
            && point[0] < (xj - xi) * (point[1] - yi) / (yj - yi) + xi
        {
            odd = !odd;
        }
        j = i;
    }
    odd
}

#[derive(Debug, Clone, Default)]
pub struct MultiPolyBounds(pub Vec<PolyBounds>);

impl Bounds for MultiPolyBounds {
    fn contains(&self, point: [f64; 2]) -> bool {
        self.0.iter().any(|poly| poly.contains(point))
    }
}

/// Reads a boundary from a GeoJSON FeatureCollection, collecting
/// every Polygon and MultiPolygon feature.
pub fn read_boundary(path: &Path) -> Result<MultiPolyBounds> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let geojson: GeoJson = raw
        .parse()
        .with_context(|| format!("parsing {}", path.display()))?;
    let collection = FeatureCollection::try_from(geojson)
        .with_context(|| format!("{} is not a FeatureCollection", path.display()))?;

    let mut polygons = Vec::new();

    for feature in collection.features {
        let Some(geometry) = feature.geometry else {
            continue;
        };

        match geometry.value {
            Value::Polygon(polygon) => polygons.push(poly_bounds_from_rings(&polygon)?),
            Value::MultiPolygon(multi) => {
                for polygon in &multi {
                    polygons.push(poly_bounds_from_rings(polygon)?);
                }
            }
            _ => {}
        }
    }

    Ok(MultiPolyBounds(polygons))
}

fn poly_bounds_from_rings(rings: &[Vec<Vec<f64>>]) -> Result<PolyBounds> {
    let mut converted = Vec::with_capacity(rings.len());

    for ring in rings {
        let mut points = Vec::with_capacity(ring.len());
        for position in ring {
            if position.len() < 2 {
                bail!("boundary ring position with fewer than two coordinates");
            }
            points.push([position[0], position[1]]);
        }
        converted.push(points);
    }

    Ok(PolyBounds::new(converted))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> PolyBounds {
        PolyBounds::new(vec![vec![
            [0.0, 0.0],
            [1.0, 0.0],
            [1.0, 1.0],
            [0.0, 1.0],
            [0.0, 0.0],
        ]])
    }

    #[test]
    fn haversine_la_to_nyc() {
        let la = [-118.2437, 34.0522];
        let nyc = [-74.0060, 40.7128];
        let dist = haversine_m(la, nyc);
        assert!(dist > 3_930_000.0 && dist < 3_950_000.0);
    }

    #[test]
    fn haversine_small_northward_step() {
        let dist = haversine_m([0.0, 0.0], [0.0, 0.001]);
        assert!((dist - 111.195).abs() < 0.01, "got {}", dist);
    }

    #[test]
    fn polygon_contains_and_rejects() {
        let poly = unit_box();
        assert!(poly.contains([0.5, 0.5]));
        assert!(!poly.contains([-0.5, 0.5]));
        assert!(!poly.contains([1.5, 0.5]));
    }

    #[test]
    fn polygon_containment_implies_bbox_containment() {
        let poly = PolyBounds::new(vec![vec![
            [0.0, 0.0],
            [2.0, 0.5],
            [1.0, 2.0],
            [0.0, 0.0],
        ]]);

        for ix in -10..30 {
            for iy in -10..30 {
                let point = [ix as f64 * 0.1, iy as f64 * 0.1];
                if poly.contains(point) {
                    assert!(poly.bbox().contains(point));
                }
            }
        }
    }

    #[test]
    fn hole_excludes_interior() {
        let poly = PolyBounds::new(vec![
            vec![[0.0, 0.0], [4.0, 0.0], [4.0, 4.0], [0.0, 4.0], [0.0, 0.0]],
            vec![[1.0, 1.0], [3.0, 1.0], [3.0, 3.0], [1.0, 3.0], [1.0, 1.0]],
        ]);

        assert!(poly.contains([0.5, 0.5]));
        assert!(!poly.contains([2.0, 2.0]));
    }

    #[test]
    fn multi_polygon_checks_every_member() {
        let far_box = PolyBounds::new(vec![vec![
            [10.0, 10.0],
            [11.0, 10.0],
            [11.0, 11.0],
            [10.0, 11.0],
            [10.0, 10.0],
        ]]);
        let bounds = MultiPolyBounds(vec![unit_box(), far_box]);

        assert!(bounds.contains([0.5, 0.5]));
        assert!(bounds.contains([10.5, 10.5]));
        assert!(!bounds.contains([5.0, 5.0]));
    }
}
