use serde::{Deserialize, Serialize};

pub mod link;
pub mod state;
pub mod wire;

pub type AgentId = u32;

/// Geographic position on the WGS-84 ellipsoid. Altitude is metres above the
/// ellipsoid.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct GeoPoint {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    #[serde(default)]
    pub altitude_m: f64,
}

impl GeoPoint {
    pub fn new(latitude_deg: f64, longitude_deg: f64, altitude_m: f64) -> Self {
        Self {
            latitude_deg,
            longitude_deg,
            altitude_m,
        }
    }

    pub fn at_altitude(self, altitude_m: f64) -> Self {
        Self { altitude_m, ..self }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude_deg)
            && (-180.0..=180.0).contains(&self.longitude_deg)
            && self.altitude_m.is_finite()
    }
}

/// The home position of a mission. Set once and never moved while the
/// mission runs; every `LocalPoint` of that mission is relative to it.
pub type Origin = GeoPoint;

/// North-east-down offset in metres. Only meaningful together with the
/// origin it was computed against.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct LocalPoint {
    pub north_m: f64,
    pub east_m: f64,
    pub down_m: f64,
}

impl LocalPoint {
    pub fn new(north_m: f64, east_m: f64, down_m: f64) -> Self {
        Self {
            north_m,
            east_m,
            down_m,
        }
    }

    pub fn dist_horizontal(&self, other: &LocalPoint) -> f64 {
        let dn = self.north_m - other.north_m;
        let de = self.east_m - other.east_m;
        (dn * dn + de * de).sqrt()
    }

    pub fn dist(&self, other: &LocalPoint) -> f64 {
        let dd = self.down_m - other.down_m;
        (self.dist_horizontal(other).powi(2) + dd * dd).sqrt()
    }
}

/// A corner as submitted by an operator.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl From<LatLon> for GeoPoint {
    fn from(p: LatLon) -> Self {
        GeoPoint::new(p.lat, p.lon, 0.0)
    }
}

/// Quadrilateral mission area, corners wound bottom-left, bottom-right,
/// top-right, top-left.
///
/// Only the bottom-left and top-right corners take part in planning: the area
/// is treated as the axis-aligned box spanned by those two. Corners 1 and 3
/// are carried but currently ignored, so a skewed quadrilateral is planned as
/// its diagonal's bounding box.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct Polygon {
    corners: [GeoPoint; 4],
}

impl Polygon {
    pub const BOTTOM_LEFT: usize = 0;
    pub const BOTTOM_RIGHT: usize = 1;
    pub const TOP_RIGHT: usize = 2;
    pub const TOP_LEFT: usize = 3;

    pub fn new(corners: [GeoPoint; 4]) -> Self {
        Self { corners }
    }

    /// Builds a polygon from exactly four points. On any other count the
    /// offending count is returned.
    pub fn from_points(points: &[GeoPoint]) -> Result<Self, usize> {
        let corners: [GeoPoint; 4] = points.try_into().map_err(|_| points.len())?;
        Ok(Self { corners })
    }

    pub fn corners(&self) -> &[GeoPoint; 4] {
        &self.corners
    }

    pub fn bottom_left(&self) -> GeoPoint {
        self.corners[Self::BOTTOM_LEFT]
    }

    pub fn top_right(&self) -> GeoPoint {
        self.corners[Self::TOP_RIGHT]
    }
}

/// One sector's goal. `agent_slot` indexes the coordinator's agent list
/// (identity mapping: sector i is flown by slot i).
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct MissionTarget {
    pub position: GeoPoint,
    pub sector: usize,
    pub agent_slot: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polygon_requires_four_points() {
        let p = GeoPoint::new(1.0, 2.0, 0.0);
        assert_eq!(Polygon::from_points(&[p, p, p]), Err(3));
        assert_eq!(Polygon::from_points(&[p; 5]), Err(5));

        let q = GeoPoint::new(3.0, 4.0, 0.0);
        let polygon = Polygon::from_points(&[p, p, q, p]).unwrap();
        assert_eq!(polygon.bottom_left(), p);
        assert_eq!(polygon.top_right(), q);
    }

    #[test]
    fn geopoint_range_check() {
        assert!(GeoPoint::new(26.3, 50.1, 12.0).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, -180.5, 0.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0, 0.0).is_valid());
    }

    #[test]
    fn latlon_deserializes_from_operator_json() {
        let pts: Vec<LatLon> =
            serde_json::from_str(r#"[{"lat": 26.308079, "lon": 50.146278}]"#).unwrap();
        let geo: GeoPoint = pts[0].into();
        assert_eq!(geo.altitude_m, 0.0);
        assert_eq!(geo.latitude_deg, 26.308079);
    }
}
