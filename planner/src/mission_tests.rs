use skyguard_structs::{GeoPoint, Polygon};

use crate::geodetic::{to_geo, to_local};
use crate::mission::{local_bounds, plan_mission};
use crate::PlanError;

fn home() -> GeoPoint {
    GeoPoint::new(26.308079, 50.146278, 0.0)
}

fn stadium_polygon() -> Polygon {
    Polygon::new([
        GeoPoint::new(26.308079, 50.146278, 0.0),
        GeoPoint::new(26.308642, 50.147220, 0.0),
        GeoPoint::new(26.309173, 50.146842, 0.0),
        GeoPoint::new(26.308620, 50.145891, 0.0),
    ])
}

#[test]
pub fn stadium_targets_stay_inside_and_apart() {
    let _ = env_logger::try_init();
    let polygon = stadium_polygon();
    let targets = plan_mission(&polygon, &home(), 2, 2).unwrap();
    assert_eq!(targets.len(), 4);

    let bounds = local_bounds(&polygon, &home());
    let min_cell = (bounds.width_m() / 2.0).min(bounds.height_m() / 2.0);

    let locals: Vec<_> = targets
        .iter()
        .map(|t| to_local(&t.position, &home()))
        .collect();
    for l in &locals {
        assert!(bounds.contains(l, 1e-6), "{:?} outside {:?}", l, bounds);
    }
    for i in 0..locals.len() {
        for j in (i + 1)..locals.len() {
            assert!(locals[i].dist_horizontal(&locals[j]) >= min_cell / 2.0);
        }
    }
}

#[test]
pub fn targets_are_row_major_with_identity_slots() {
    let targets = plan_mission(&stadium_polygon(), &home(), 2, 2).unwrap();
    for (i, t) in targets.iter().enumerate() {
        assert_eq!(t.sector, i);
        assert_eq!(t.agent_slot, i);
        assert_eq!(t.position.altitude_m, 0.0);
    }

    let l: Vec<_> = targets.iter().map(|t| to_local(&t.position, &home())).collect();
    // Bottom row is south of the top row; columns go west to east.
    assert!(l[0].north_m < l[2].north_m && l[1].north_m < l[3].north_m);
    assert!(l[0].east_m < l[1].east_m && l[2].east_m < l[3].east_m);
    assert!((l[0].north_m - l[1].north_m).abs() < 1e-6);
}

#[test]
pub fn offset_home_shifts_bounds() {
    // Area 200 m north and 100 m east of home, 80 x 40 m.
    let h = home();
    let bl = to_geo(&skyguard_structs::LocalPoint::new(200.0, 100.0, 0.0), &h).at_altitude(0.0);
    let tr = to_geo(&skyguard_structs::LocalPoint::new(240.0, 180.0, 0.0), &h).at_altitude(0.0);
    let polygon = Polygon::new([bl, bl, tr, tr]);

    let targets = plan_mission(&polygon, &h, 1, 2).unwrap();
    let l: Vec<_> = targets.iter().map(|t| to_local(&t.position, &h)).collect();
    assert!((l[0].north_m - 220.0).abs() < 0.01 && (l[0].east_m - 120.0).abs() < 0.01);
    assert!((l[1].north_m - 220.0).abs() < 0.01 && (l[1].east_m - 160.0).abs() < 0.01);
}

#[test]
pub fn side_corners_do_not_change_the_plan() {
    let mut skewed = *stadium_polygon().corners();
    skewed[Polygon::BOTTOM_RIGHT] = GeoPoint::new(26.0, 50.0, 0.0);
    skewed[Polygon::TOP_LEFT] = GeoPoint::new(27.0, 51.0, 0.0);

    let a = plan_mission(&stadium_polygon(), &home(), 2, 2).unwrap();
    let b = plan_mission(&Polygon::new(skewed), &home(), 2, 2).unwrap();
    assert_eq!(a, b);
}

#[test]
pub fn degenerate_area_is_invalid() {
    let p = home();
    let polygon = Polygon::new([p, p, p, p]);
    assert!(matches!(
        plan_mission(&polygon, &home(), 2, 2),
        Err(PlanError::InvalidDimension { .. })
    ));
}

#[test]
pub fn zero_rows_propagates_invalid_dimension() {
    assert_eq!(
        plan_mission(&stadium_polygon(), &home(), 0, 2),
        Err(PlanError::InvalidDimension { name: "rows", value: 0.0 })
    );
}

#[test]
pub fn more_sectors_than_agents_is_not_the_planners_concern() {
    let targets = plan_mission(&stadium_polygon(), &home(), 3, 3).unwrap();
    assert_eq!(targets.len(), 9);
}
