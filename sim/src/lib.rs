use log::debug;
use serde::{Deserialize, Serialize};
use skyguard_planner::geodetic::{to_geo, to_local};
use skyguard_structs::{
    link::{Command, Health, PositionSample},
    wire::VehicleReport,
    AgentId, GeoPoint, LocalPoint,
};

pub mod link;

pub use link::{CommandLog, SimLink};

/// Vehicle dynamics and power-up delays.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SimParams {
    pub link_delay_secs: f64,
    pub gps_fix_secs: f64,
    pub calibration_secs: f64,
    pub climb_rate_mps: f64,
    pub descent_rate_mps: f64,
    pub ground_speed_mps: f64,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            link_delay_secs: 0.5,
            gps_fix_secs: 2.0,
            calibration_secs: 3.0,
            climb_rate_mps: 2.5,
            descent_rate_mps: 1.5,
            ground_speed_mps: 8.0,
        }
    }
}

/// Injected misbehaviour.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimFaults {
    pub no_heartbeat: bool,
    pub no_gps: bool,
    pub never_armable: bool,
    pub reject_arm: bool,
    pub reject_takeoff: bool,
    pub reject_goto: bool,
    /// Climb stops at this relative altitude.
    pub stall_climb_at_m: Option<f64>,
    /// Descent stops just above the ground and the vehicle stays in the air.
    pub stuck_in_air: bool,
    /// The link goes silent for good at this simulation time.
    pub drop_link_at_secs: Option<f64>,
}

const STUCK_HOVER_M: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq)]
enum Goal {
    Idle,
    Climb { altitude_m: f64 },
    Goto { target: LocalPoint },
    Hover,
    Land,
}

/// One simulated multicopter. Position is kept in the NED frame of its own
/// home; up is negative down.
#[derive(Clone, Debug)]
pub struct SimVehicle {
    pub home: GeoPoint,
    pub params: SimParams,
    pub faults: SimFaults,
    pub curr_time: f64,
    pub curr_loc: LocalPoint,
    pub armed: bool,
    pub in_air: bool,
    goal: Goal,
}

fn go_towards(max_dist: &mut f64, source: &mut f64, target: f64) -> bool {
    let dist = (target - *source).abs();
    if dist <= *max_dist {
        *max_dist -= dist;
        *source = target;
        true
    } else {
        *source += max_dist.copysign(target - *source);
        *max_dist = 0.0;
        false
    }
}

fn go_towards_xy(max_dist: &mut f64, source: &mut LocalPoint, target: &LocalPoint) -> bool {
    let dist = source.dist_horizontal(target);
    if dist <= *max_dist {
        *max_dist -= dist;
        source.north_m = target.north_m;
        source.east_m = target.east_m;
        true
    } else {
        let scaling = *max_dist / dist;
        source.north_m += (target.north_m - source.north_m) * scaling;
        source.east_m += (target.east_m - source.east_m) * scaling;
        *max_dist = 0.0;
        false
    }
}

impl SimVehicle {
    pub fn new(home: GeoPoint) -> Self {
        Self::with_faults(home, SimParams::default(), SimFaults::default())
    }

    pub fn with_faults(home: GeoPoint, params: SimParams, faults: SimFaults) -> Self {
        Self {
            home,
            params,
            faults,
            curr_time: 0.0,
            curr_loc: LocalPoint::default(),
            armed: false,
            in_air: false,
            goal: Goal::Idle,
        }
    }

    pub fn altitude_m(&self) -> f64 {
        -self.curr_loc.down_m
    }

    pub fn link_dropped(&self) -> bool {
        self.faults
            .drop_link_at_secs
            .is_some_and(|at| self.curr_time >= at)
    }

    fn heartbeat(&self) -> bool {
        !self.faults.no_heartbeat
            && !self.link_dropped()
            && self.curr_time >= self.params.link_delay_secs
    }

    fn health(&self) -> Health {
        let gps = !self.faults.no_gps && self.curr_time >= self.params.gps_fix_secs;
        Health {
            global_position_ok: gps,
            home_position_ok: gps,
            armable: gps
                && !self.faults.never_armable
                && self.curr_time >= self.params.calibration_secs,
        }
    }

    pub fn simulate(&mut self, dt: f64) {
        self.curr_time += dt;

        let mut alt = self.altitude_m();
        match self.goal {
            Goal::Idle | Goal::Hover => {}
            Goal::Climb { altitude_m } => {
                let ceiling = self
                    .faults
                    .stall_climb_at_m
                    .map_or(altitude_m, |stall| stall.min(altitude_m));
                let mut climb = dt * self.params.climb_rate_mps;
                if go_towards(&mut climb, &mut alt, ceiling) && ceiling >= altitude_m {
                    self.goal = Goal::Hover;
                }
            }
            Goal::Goto { target } => {
                let mut travel = dt * self.params.ground_speed_mps;
                let mut climb = dt * self.params.climb_rate_mps;
                let arrived_xy = go_towards_xy(&mut travel, &mut self.curr_loc, &target);
                let arrived_z = go_towards(&mut climb, &mut alt, -target.down_m);
                if arrived_xy && arrived_z {
                    self.goal = Goal::Hover;
                }
            }
            Goal::Land => {
                let floor = if self.faults.stuck_in_air { STUCK_HOVER_M } else { 0.0 };
                let mut descent = dt * self.params.descent_rate_mps;
                if go_towards(&mut descent, &mut alt, floor) && floor == 0.0 {
                    self.goal = Goal::Idle;
                }
            }
        }
        self.curr_loc.down_m = -alt;

        let was_in_air = self.in_air;
        self.in_air = alt > 0.0;
        if was_in_air && !self.in_air {
            debug!("t={:.2} vehicle touched down", self.curr_time);
        }
    }

    pub fn report(&self) -> VehicleReport {
        let geo = to_geo(&self.curr_loc, &self.home);
        VehicleReport {
            heartbeat: self.heartbeat(),
            health: self.health(),
            position: PositionSample {
                latitude_deg: geo.latitude_deg,
                longitude_deg: geo.longitude_deg,
                absolute_altitude_m: self.home.altitude_m + self.altitude_m(),
                relative_altitude_m: self.altitude_m(),
            },
            in_air: self.in_air,
            armed: self.armed,
        }
    }

    /// Applies a command the way an autopilot would: either accepts it or
    /// explains why not.
    pub fn command(&mut self, command: Command) -> Result<(), String> {
        if !self.heartbeat() {
            return Err("no link to vehicle".to_string());
        }
        match command {
            Command::Arm => {
                if self.faults.reject_arm {
                    return Err("arming denied by autopilot".to_string());
                }
                if !self.health().armable {
                    return Err("vehicle not armable".to_string());
                }
                self.armed = true;
            }
            Command::Disarm => {
                if self.in_air {
                    return Err("cannot disarm in air".to_string());
                }
                self.armed = false;
            }
            Command::Takeoff { altitude_m } => {
                if self.faults.reject_takeoff {
                    return Err("takeoff denied by autopilot".to_string());
                }
                if !self.armed {
                    return Err("takeoff requires armed vehicle".to_string());
                }
                self.goal = Goal::Climb { altitude_m };
            }
            Command::Land => {
                if !self.in_air {
                    return Err("not in air".to_string());
                }
                self.goal = Goal::Land;
            }
            Command::Goto {
                latitude_deg,
                longitude_deg,
                altitude_m,
                yaw_deg: _,
            } => {
                if self.faults.reject_goto {
                    return Err("goto denied by autopilot".to_string());
                }
                if !self.in_air {
                    return Err("goto requires vehicle in air".to_string());
                }
                let target = GeoPoint::new(
                    latitude_deg,
                    longitude_deg,
                    self.home.altitude_m + altitude_m,
                );
                let mut target = to_local(&target, &self.home);
                // Hold commanded height above home rather than above the tangent plane.
                target.down_m = -altitude_m;
                self.goal = Goal::Goto { target };
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimAgent {
    pub id: AgentId,
    #[serde(default)]
    pub offset_north_m: f64,
    #[serde(default)]
    pub offset_east_m: f64,
    #[serde(default)]
    pub faults: SimFaults,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub home: GeoPoint,
    pub params: SimParams,
    pub agents: Vec<SimAgent>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            home: GeoPoint::new(26.308079, 50.146278, 0.0),
            params: SimParams::default(),
            agents: (1..=4)
                .map(|id| SimAgent {
                    id,
                    offset_north_m: 0.0,
                    offset_east_m: 3.0 * (id as f64 - 1.0),
                    faults: SimFaults::default(),
                })
                .collect(),
        }
    }
}

/// A set of simulated vehicles addressed by agent id.
pub struct SimFleet {
    pub vehicles: Vec<(AgentId, SimVehicle)>,
}

impl SimFleet {
    pub fn new(config: &SimConfig) -> Self {
        let vehicles = config
            .agents
            .iter()
            .map(|a| {
                let home = to_geo(
                    &LocalPoint::new(a.offset_north_m, a.offset_east_m, 0.0),
                    &config.home,
                )
                .at_altitude(config.home.altitude_m);
                (a.id, SimVehicle::with_faults(home, config.params, a.faults))
            })
            .collect();
        Self { vehicles }
    }

    pub fn simulate(&mut self, dt: f64) {
        for (_, v) in self.vehicles.iter_mut() {
            v.simulate(dt);
        }
    }

    pub fn reports(&self) -> impl Iterator<Item = (AgentId, VehicleReport)> + '_ {
        self.vehicles.iter().map(|(id, v)| (*id, v.report()))
    }

    pub fn command(&mut self, agent: AgentId, command: Command) -> Result<(), String> {
        match self.vehicles.iter_mut().find(|(id, _)| *id == agent) {
            Some((_, v)) => v.command(command),
            None => Err(format!("unknown agent {}", agent)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn powered_up() -> SimVehicle {
        let mut v = SimVehicle::new(GeoPoint::new(26.308079, 50.146278, 0.0));
        v.simulate(5.0);
        v
    }

    fn run(v: &mut SimVehicle, secs: f64) {
        for _ in 0..(secs * 10.0) as usize {
            v.simulate(0.1);
        }
    }

    #[test]
    fn health_comes_up_in_order() {
        let mut v = SimVehicle::new(GeoPoint::default());
        assert!(!v.report().heartbeat);
        v.simulate(1.0);
        let r = v.report();
        assert!(r.heartbeat && !r.health.position_ok());
        v.simulate(1.5);
        let r = v.report();
        assert!(r.health.position_ok() && !r.health.armable);
        v.simulate(1.0);
        assert!(v.report().health.armable);
    }

    #[test]
    fn arm_rejected_while_calibrating() {
        let mut v = SimVehicle::new(GeoPoint::default());
        v.simulate(1.0);
        assert!(v.command(Command::Arm).is_err());
        v.simulate(3.0);
        assert!(v.command(Command::Arm).is_ok());
    }

    #[test]
    fn takeoff_goto_land() {
        let mut v = powered_up();
        v.command(Command::Arm).unwrap();
        assert!(v.command(Command::Land).is_err());
        v.command(Command::Takeoff { altitude_m: 10.0 }).unwrap();
        run(&mut v, 5.0);
        assert!(v.in_air);
        assert!((v.altitude_m() - 10.0).abs() < 1e-9);

        let target = to_geo(&LocalPoint::new(40.0, 30.0, 0.0), &v.home);
        v.command(Command::Goto {
            latitude_deg: target.latitude_deg,
            longitude_deg: target.longitude_deg,
            altitude_m: 10.0,
            yaw_deg: 0.0,
        })
        .unwrap();
        run(&mut v, 10.0);
        assert!(v.curr_loc.dist_horizontal(&LocalPoint::new(40.0, 30.0, 0.0)) < 1e-3);
        assert!((v.report().position.relative_altitude_m - 10.0).abs() < 1e-9);

        assert!(v.command(Command::Disarm).is_err());
        v.command(Command::Land).unwrap();
        run(&mut v, 10.0);
        assert!(!v.report().in_air);
        v.command(Command::Disarm).unwrap();
        assert!(!v.armed);
    }

    #[test]
    fn faults_stall_and_stick() {
        let faults = SimFaults {
            stall_climb_at_m: Some(4.0),
            stuck_in_air: true,
            ..Default::default()
        };
        let mut v = SimVehicle::with_faults(GeoPoint::default(), SimParams::default(), faults);
        v.simulate(5.0);
        v.command(Command::Arm).unwrap();
        v.command(Command::Takeoff { altitude_m: 10.0 }).unwrap();
        run(&mut v, 10.0);
        assert!((v.altitude_m() - 4.0).abs() < 1e-9);

        v.command(Command::Land).unwrap();
        run(&mut v, 10.0);
        assert!(v.in_air);
        assert!((v.altitude_m() - STUCK_HOVER_M).abs() < 1e-9);
    }

    #[test]
    fn dropped_link_rejects_takeoff() {
        let faults = SimFaults {
            reject_takeoff: true,
            drop_link_at_secs: Some(8.0),
            ..Default::default()
        };
        let mut v = SimVehicle::with_faults(GeoPoint::default(), SimParams::default(), faults);
        v.simulate(5.0);
        v.command(Command::Arm).unwrap();
        assert!(v.command(Command::Takeoff { altitude_m: 10.0 }).is_err());
        assert!(!v.link_dropped());

        v.simulate(3.0);
        assert!(v.link_dropped());
        assert!(!v.report().heartbeat);
        assert!(v.command(Command::Disarm).is_err());
    }

    #[test]
    fn fleet_routes_commands_by_id() {
        let mut fleet = SimFleet::new(&SimConfig::default());
        fleet.simulate(5.0);
        assert!(fleet.command(2, Command::Arm).is_ok());
        assert!(fleet.command(9, Command::Arm).is_err());
        let armed: Vec<_> = fleet.reports().map(|(id, r)| (id, r.armed)).collect();
        assert_eq!(armed, vec![(1, false), (2, true), (3, false), (4, false)]);
    }
}
