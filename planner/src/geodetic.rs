//! WGS-84 geodetic <-> local north-east-down conversion.
//!
//! Both directions go through earth-centred earth-fixed (ECEF) coordinates on
//! the full ellipsoid, so there is no flat-earth approximation: the local
//! frame is the exact tangent plane at the origin and points far from the
//! origin get a growing `down` component as the earth curves away. Accuracy is
//! limited only by f64 arithmetic and the geodetic iteration (sub-millimetre
//! for |latitude| <= 89.9 deg).
//!
//! Non-finite input is not trapped; NaN and infinities propagate into the
//! result.

use skyguard_structs::{GeoPoint, LocalPoint, Origin};

pub const WGS84_A: f64 = 6_378_137.0;
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;
const WGS84_E2: f64 = WGS84_F * (2.0 - WGS84_F);

const MAX_ITERATIONS: usize = 10;
const LAT_EPSILON_RAD: f64 = 1e-14;

#[derive(Clone, Copy, Debug)]
struct Ecef {
    x: f64,
    y: f64,
    z: f64,
}

fn prime_vertical_radius(sin_lat: f64) -> f64 {
    WGS84_A / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt()
}

fn geodetic_to_ecef(p: &GeoPoint) -> Ecef {
    let (sin_lat, cos_lat) = p.latitude_deg.to_radians().sin_cos();
    let (sin_lon, cos_lon) = p.longitude_deg.to_radians().sin_cos();
    let n = prime_vertical_radius(sin_lat);
    Ecef {
        x: (n + p.altitude_m) * cos_lat * cos_lon,
        y: (n + p.altitude_m) * cos_lat * sin_lon,
        z: (n * (1.0 - WGS84_E2) + p.altitude_m) * sin_lat,
    }
}

fn ecef_to_geodetic(e: &Ecef) -> GeoPoint {
    let lon = e.y.atan2(e.x);
    let p = e.x.hypot(e.y);

    let mut lat = e.z.atan2(p * (1.0 - WGS84_E2));
    for _ in 0..MAX_ITERATIONS {
        let n = prime_vertical_radius(lat.sin());
        let next = (e.z + WGS84_E2 * n * lat.sin()).atan2(p);
        let done = (next - lat).abs() < LAT_EPSILON_RAD;
        lat = next;
        if done {
            break;
        }
    }

    let (sin_lat, cos_lat) = lat.sin_cos();
    let h = p * cos_lat + e.z * sin_lat - WGS84_A * (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();

    GeoPoint::new(lat.to_degrees(), lon.to_degrees(), h)
}

/// Projects `target` into the NED frame anchored at `origin`.
pub fn to_local(target: &GeoPoint, origin: &Origin) -> LocalPoint {
    let t = geodetic_to_ecef(target);
    let o = geodetic_to_ecef(origin);
    let (dx, dy, dz) = (t.x - o.x, t.y - o.y, t.z - o.z);

    let (sin_lat, cos_lat) = origin.latitude_deg.to_radians().sin_cos();
    let (sin_lon, cos_lon) = origin.longitude_deg.to_radians().sin_cos();

    let east = -sin_lon * dx + cos_lon * dy;
    let north = -sin_lat * cos_lon * dx - sin_lat * sin_lon * dy + cos_lat * dz;
    let up = cos_lat * cos_lon * dx + cos_lat * sin_lon * dy + sin_lat * dz;

    LocalPoint::new(north, east, -up)
}

/// Inverse of [`to_local`].
pub fn to_geo(point: &LocalPoint, origin: &Origin) -> GeoPoint {
    let o = geodetic_to_ecef(origin);
    let (sin_lat, cos_lat) = origin.latitude_deg.to_radians().sin_cos();
    let (sin_lon, cos_lon) = origin.longitude_deg.to_radians().sin_cos();

    let (n, e, u) = (point.north_m, point.east_m, -point.down_m);
    let dx = -sin_lon * e - sin_lat * cos_lon * n + cos_lat * cos_lon * u;
    let dy = cos_lon * e - sin_lat * sin_lon * n + cos_lat * sin_lon * u;
    let dz = cos_lat * n + sin_lat * u;

    ecef_to_geodetic(&Ecef {
        x: o.x + dx,
        y: o.y + dy,
        z: o.z + dz,
    })
}

/// Ground distance between two positions, measured in the tangent plane of
/// `a`.
pub fn horizontal_distance_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let local = to_local(b, a);
    local.north_m.hypot(local.east_m)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEG_TOL: f64 = 1e-6;
    const ALT_TOL: f64 = 0.01;

    fn assert_round_trip(p: GeoPoint, o: GeoPoint) {
        let back = to_geo(&to_local(&p, &o), &o);
        assert!(
            (back.latitude_deg - p.latitude_deg).abs() < DEG_TOL
                && (back.longitude_deg - p.longitude_deg).abs() < DEG_TOL
                && (back.altitude_m - p.altitude_m).abs() < ALT_TOL,
            "round trip of {:?} around {:?} gave {:?}",
            p,
            o,
            back
        );
    }

    #[test]
    fn origin_maps_to_zero() {
        let o = GeoPoint::new(26.308079, 50.146278, 12.0);
        let l = to_local(&o, &o);
        assert!(l.north_m.abs() < 1e-6 && l.east_m.abs() < 1e-6 && l.down_m.abs() < 1e-6);
    }

    #[test]
    fn known_offsets_at_equator() {
        let o = GeoPoint::new(0.0, 0.0, 0.0);

        // One arc-minute of latitude at the equator is ~1842.9 m on WGS-84.
        let north = to_local(&GeoPoint::new(1.0 / 60.0, 0.0, 0.0), &o);
        assert!((north.north_m - 1842.9).abs() < 0.5, "{:?}", north);
        assert!(north.east_m.abs() < 1e-6);

        // One arc-minute of longitude at the equator is ~1855.3 m.
        let east = to_local(&GeoPoint::new(0.0, 1.0 / 60.0, 0.0), &o);
        assert!((east.east_m - 1855.3).abs() < 0.5, "{:?}", east);
        assert!(east.north_m.abs() < 1e-6);

        // The ground curves away below the tangent plane.
        assert!(east.down_m > 0.0);
    }

    #[test]
    fn altitude_is_negative_down() {
        let o = GeoPoint::new(45.0, 7.0, 100.0);
        let l = to_local(&GeoPoint::new(45.0, 7.0, 130.0), &o);
        assert!((l.down_m + 30.0).abs() < 1e-6);
    }

    #[test]
    fn round_trip_grid() {
        let origins = [
            GeoPoint::new(26.308079, 50.146278, 0.0),
            GeoPoint::new(-33.9, 151.2, 40.0),
            GeoPoint::new(84.0, -179.5, 0.0),
            GeoPoint::new(-85.0, 10.0, 2500.0),
        ];
        for o in origins {
            for dlat in [-0.2, -0.01, 0.0, 0.003, 0.15] {
                for dlon in [-0.3, 0.0, 0.0007, 0.25] {
                    for alt in [0.0, 25.0, 1200.0] {
                        let p = GeoPoint::new(
                            (o.latitude_deg + dlat).clamp(-85.0, 85.0),
                            o.longitude_deg + dlon,
                            alt,
                        );
                        assert_round_trip(p, o);
                    }
                }
            }
        }
    }

    #[test]
    fn local_round_trip_tens_of_km() {
        let o = GeoPoint::new(59.91, 10.75, 0.0);
        for (n, e) in [(30_000.0, -12_000.0), (-45_000.0, 45_000.0), (0.5, 0.25)] {
            let l = LocalPoint::new(n, e, 0.0);
            let back = to_local(&to_geo(&l, &o), &o);
            assert!(back.dist(&l) < 1e-3, "{:?} vs {:?}", back, l);
        }
    }

    #[test]
    fn nan_propagates() {
        let o = GeoPoint::new(10.0, 10.0, 0.0);
        let l = to_local(&GeoPoint::new(f64::NAN, 10.0, 0.0), &o);
        assert!(l.north_m.is_nan());
    }

    #[test]
    fn horizontal_distance_ignores_altitude() {
        let a = GeoPoint::new(26.308079, 50.146278, 0.0);
        let b = to_geo(&LocalPoint::new(3.0, 4.0, -25.0), &a);
        assert!((horizontal_distance_m(&a, &b) - 5.0).abs() < 1e-6);
    }
}
