use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use crate::wire::VehicleReport;
use crate::GeoPoint;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub global_position_ok: bool,
    pub home_position_ok: bool,
    pub armable: bool,
}

impl Health {
    pub fn position_ok(&self) -> bool {
        self.global_position_ok && self.home_position_ok
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub absolute_altitude_m: f64,
    /// Metres above the vehicle's home position.
    pub relative_altitude_m: f64,
}

impl PositionSample {
    pub fn geo(&self) -> GeoPoint {
        GeoPoint::new(
            self.latitude_deg,
            self.longitude_deg,
            self.absolute_altitude_m,
        )
    }
}

/// Latest-value telemetry streams of one vehicle. A stream whose sender is
/// gone means the link is gone.
#[derive(Debug, Clone)]
pub struct Telemetry {
    pub heartbeat: watch::Receiver<bool>,
    pub health: watch::Receiver<Health>,
    pub position: watch::Receiver<PositionSample>,
    pub in_air: watch::Receiver<bool>,
}

/// Sending half of `Telemetry`. Fed with whole vehicle reports; only fields
/// that changed wake up receivers.
#[derive(Debug)]
pub struct TelemetryFeed {
    heartbeat: watch::Sender<bool>,
    health: watch::Sender<Health>,
    position: watch::Sender<PositionSample>,
    in_air: watch::Sender<bool>,
}

impl TelemetryFeed {
    pub fn open(initial: &VehicleReport) -> (Self, Telemetry) {
        let (heartbeat, heartbeat_rx) = watch::channel(initial.heartbeat);
        let (health, health_rx) = watch::channel(initial.health);
        let (position, position_rx) = watch::channel(initial.position);
        let (in_air, in_air_rx) = watch::channel(initial.in_air);
        (
            Self {
                heartbeat,
                health,
                position,
                in_air,
            },
            Telemetry {
                heartbeat: heartbeat_rx,
                health: health_rx,
                position: position_rx,
                in_air: in_air_rx,
            },
        )
    }

    pub fn publish(&self, report: &VehicleReport) {
        fn set<T: PartialEq + Copy>(tx: &watch::Sender<T>, value: T) {
            tx.send_if_modified(|v| {
                let changed = *v != value;
                *v = value;
                changed
            });
        }
        set(&self.heartbeat, report.heartbeat);
        set(&self.health, report.health);
        set(&self.position, report.position);
        set(&self.in_air, report.in_air);
    }

    /// Marks the vehicle as silent without touching the other streams.
    pub fn heartbeat_lost(&self) {
        self.heartbeat.send_if_modified(|alive| std::mem::replace(alive, false));
    }

    /// True once every receiver was dropped.
    pub fn is_closed(&self) -> bool {
        self.heartbeat.is_closed()
            && self.health.is_closed()
            && self.position.is_closed()
            && self.in_air.is_closed()
    }
}

/// Commands understood by a vehicle. Goto altitude is metres above the
/// vehicle's home position.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Arm,
    Disarm,
    Takeoff {
        altitude_m: f64,
    },
    Land,
    Goto {
        latitude_deg: f64,
        longitude_deg: f64,
        altitude_m: f64,
        yaw_deg: f64,
    },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LinkError {
    #[error("vehicle rejected action: {0}")]
    ActionRejected(String),
    #[error("link is not connected")]
    Disconnected,
    #[error("transport error: {0}")]
    Transport(String),
}

/// The capabilities a flight agent needs from its vehicle link. One link
/// instance serves exactly one vehicle and is owned by exactly one agent.
///
/// Commands resolve once the vehicle acknowledged them; they never wait for
/// the commanded motion to finish. Progress is observed through the
/// `Telemetry` returned by `connect`.
pub trait FlightLink: Send + 'static {
    fn connect(&mut self) -> impl Future<Output = Result<Telemetry, LinkError>> + Send;

    fn arm(&mut self) -> impl Future<Output = Result<(), LinkError>> + Send;

    fn disarm(&mut self) -> impl Future<Output = Result<(), LinkError>> + Send;

    fn takeoff(&mut self, altitude_m: f64) -> impl Future<Output = Result<(), LinkError>> + Send;

    fn land(&mut self) -> impl Future<Output = Result<(), LinkError>> + Send;

    fn goto(
        &mut self,
        latitude_deg: f64,
        longitude_deg: f64,
        altitude_m: f64,
        yaw_deg: f64,
    ) -> impl Future<Output = Result<(), LinkError>> + Send;
}
