use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::debug;
use skyguard_structs::link::{Command, FlightLink, LinkError, Telemetry, TelemetryFeed};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::SimVehicle;

pub const DEFAULT_TICK: Duration = Duration::from_millis(50);

/// Every command a `SimLink` was asked to send, in order, whether or not the
/// vehicle accepted it.
#[derive(Clone, Debug, Default)]
pub struct CommandLog(Arc<Mutex<Vec<Command>>>);

impl CommandLog {
    fn push(&self, command: Command) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).push(command);
    }

    pub fn commands(&self) -> Vec<Command> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process flight link to a simulated vehicle. Once connected, the
/// vehicle is stepped on a tokio interval and every step is published to the
/// telemetry streams. Must be connected from inside a tokio runtime.
pub struct SimLink {
    vehicle: Arc<Mutex<SimVehicle>>,
    tick: Duration,
    log: CommandLog,
    stepper: Option<JoinHandle<()>>,
}

impl SimLink {
    pub fn new(vehicle: SimVehicle) -> Self {
        Self {
            vehicle: Arc::new(Mutex::new(vehicle)),
            tick: DEFAULT_TICK,
            log: CommandLog::default(),
            stepper: None,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn command_log(&self) -> CommandLog {
        self.log.clone()
    }

    /// Shared handle to the simulated vehicle, for inspection.
    pub fn vehicle(&self) -> Arc<Mutex<SimVehicle>> {
        self.vehicle.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SimVehicle> {
        self.vehicle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send(&mut self, command: Command) -> Result<(), LinkError> {
        if self.stepper.as_ref().map_or(true, |s| s.is_finished()) {
            return Err(LinkError::Disconnected);
        }
        self.log.push(command);
        self.lock().command(command).map_err(LinkError::ActionRejected)
    }
}

impl Drop for SimLink {
    fn drop(&mut self) {
        if let Some(stepper) = self.stepper.take() {
            stepper.abort();
        }
    }
}

impl FlightLink for SimLink {
    async fn connect(&mut self) -> Result<Telemetry, LinkError> {
        if let Some(old) = self.stepper.take() {
            old.abort();
        }

        let report = self.lock().report();
        let (feed, telemetry) = TelemetryFeed::open(&report);

        let vehicle = self.vehicle.clone();
        let tick = self.tick;
        self.stepper = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let (report, dropped_at) = {
                    let mut v = vehicle.lock().unwrap_or_else(|e| e.into_inner());
                    v.simulate(tick.as_secs_f64());
                    (v.report(), v.link_dropped().then_some(v.curr_time))
                };
                feed.publish(&report);
                if let Some(t) = dropped_at {
                    debug!("t={:.2} sim link went silent", t);
                    break;
                }
                if feed.is_closed() {
                    debug!("sim link telemetry dropped, stopping stepper");
                    break;
                }
            }
        }));

        Ok(telemetry)
    }

    async fn arm(&mut self) -> Result<(), LinkError> {
        self.send(Command::Arm)
    }

    async fn disarm(&mut self) -> Result<(), LinkError> {
        self.send(Command::Disarm)
    }

    async fn takeoff(&mut self, altitude_m: f64) -> Result<(), LinkError> {
        self.send(Command::Takeoff { altitude_m })
    }

    async fn land(&mut self) -> Result<(), LinkError> {
        self.send(Command::Land)
    }

    async fn goto(
        &mut self,
        latitude_deg: f64,
        longitude_deg: f64,
        altitude_m: f64,
        yaw_deg: f64,
    ) -> Result<(), LinkError> {
        self.send(Command::Goto {
            latitude_deg,
            longitude_deg,
            altitude_m,
            yaw_deg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SimFaults, SimParams};
    use skyguard_structs::GeoPoint;

    #[tokio::test(start_paused = true)]
    async fn telemetry_follows_the_vehicle() {
        let mut link = SimLink::new(SimVehicle::new(GeoPoint::default()));
        assert_eq!(link.arm().await, Err(LinkError::Disconnected));

        let mut telemetry = link.connect().await.unwrap();
        assert!(!*telemetry.heartbeat.borrow());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(*telemetry.heartbeat.borrow_and_update());
        assert!(telemetry.health.borrow().armable);

        link.arm().await.unwrap();
        link.takeoff(5.0).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(*telemetry.in_air.borrow());
        assert!((telemetry.position.borrow().relative_altitude_m - 5.0).abs() < 1e-9);

        assert_eq!(
            link.command_log().commands(),
            vec![Command::Arm, Command::Takeoff { altitude_m: 5.0 }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_surfaces_as_action_rejected() {
        let mut link = SimLink::new(SimVehicle::new(GeoPoint::default()));
        let _telemetry = link.connect().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(matches!(link.arm().await, Err(LinkError::ActionRejected(_))));
        assert_eq!(link.command_log().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_link_closes_telemetry_and_refuses_commands() {
        let faults = SimFaults {
            drop_link_at_secs: Some(3.0),
            ..Default::default()
        };
        let vehicle = SimVehicle::with_faults(GeoPoint::default(), SimParams::default(), faults);
        let mut link = SimLink::new(vehicle);
        let mut telemetry = link.connect().await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(*telemetry.heartbeat.borrow_and_update());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!*telemetry.heartbeat.borrow_and_update());
        assert!(telemetry.heartbeat.changed().await.is_err());
        assert_eq!(link.arm().await, Err(LinkError::Disconnected));
        assert!(link.command_log().is_empty());
    }
}
