use log::{debug, info};
use skyguard_structs::{GeoPoint, LocalPoint, MissionTarget, Origin, Polygon};

use crate::geodetic::{to_geo, to_local};
use crate::partition::SectorGrid;
use crate::PlanError;

/// Axis-aligned extent of the mission area in the home frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalBounds {
    pub north_min: f64,
    pub north_max: f64,
    pub east_min: f64,
    pub east_max: f64,
}

impl LocalBounds {
    pub fn width_m(&self) -> f64 {
        self.east_max - self.east_min
    }

    pub fn height_m(&self) -> f64 {
        self.north_max - self.north_min
    }

    pub fn contains(&self, p: &LocalPoint, tolerance_m: f64) -> bool {
        p.north_m >= self.north_min - tolerance_m
            && p.north_m <= self.north_max + tolerance_m
            && p.east_m >= self.east_min - tolerance_m
            && p.east_m <= self.east_max + tolerance_m
    }
}

/// Box spanned by the polygon's bottom-left and top-right corners, both taken
/// at altitude 0, relative to `home`. The other two corners are ignored.
pub fn local_bounds(polygon: &Polygon, home: &Origin) -> LocalBounds {
    let a = to_local(&polygon.bottom_left().at_altitude(0.0), home);
    let b = to_local(&polygon.top_right().at_altitude(0.0), home);
    LocalBounds {
        north_min: a.north_m.min(b.north_m),
        north_max: a.north_m.max(b.north_m),
        east_min: a.east_m.min(b.east_m),
        east_max: a.east_m.max(b.east_m),
    }
}

/// Splits the polygon into `rows` x `cols` sectors and returns one target per
/// sector, row-major from the south-west sector.
///
/// Height comes from the north axis and width from the east axis. Target
/// altitude is always 0; the flight altitude is a per-mission setting, not a
/// property of the area. The planner does not know how many agents exist;
/// sector `i` is simply assigned to agent slot `i`.
pub fn plan_mission(
    polygon: &Polygon,
    home: &Origin,
    rows: usize,
    cols: usize,
) -> Result<Vec<MissionTarget>, PlanError> {
    let bounds = local_bounds(polygon, home);
    info!(
        "mission area {:.1} m wide x {:.1} m high",
        bounds.width_m(),
        bounds.height_m()
    );

    let grid = SectorGrid::new(bounds.width_m(), bounds.height_m(), rows, cols)?;

    let targets = grid
        .centers()
        .into_iter()
        .enumerate()
        .map(|(sector, center)| {
            let offset = LocalPoint::new(
                bounds.north_min + center.north_m,
                bounds.east_min + center.east_m,
                0.0,
            );
            let position: GeoPoint = to_geo(&offset, home).at_altitude(0.0);
            debug!(
                "sector {} -> lat {:.6}, lon {:.6}",
                sector, position.latitude_deg, position.longitude_deg
            );
            MissionTarget {
                position,
                sector,
                agent_slot: sector,
            }
        })
        .collect();

    Ok(targets)
}
