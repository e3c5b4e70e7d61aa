use std::time::Duration;

use log::{debug, error, info, warn};
use skyguard_planner::geodetic::horizontal_distance_m;
use skyguard_structs::{
    link::{FlightLink, Health, LinkError, PositionSample, Telemetry},
    state::{AgentState, FailureReason},
    AgentId, GeoPoint,
};
use tokio::sync::watch;
use tokio::time::{sleep, timeout_at, Instant};

use crate::config::Timing;
use crate::AgentError;

/// Heading used when a goto does not specify one: north.
pub const DEFAULT_YAW_DEG: f64 = 0.0;

const CLIMB_LOG_STEP_M: f64 = 5.0;

/// Resolves once `cancel` reads true. Never resolves if the sender is gone.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Waits until `ready` holds for the latest value of `rx`, re-checking on
/// every update.
async fn wait_until<T>(
    rx: &mut watch::Receiver<T>,
    cancel: &mut watch::Receiver<bool>,
    deadline: Instant,
    on_timeout: FailureReason,
    mut ready: impl FnMut(&T) -> bool,
) -> Result<(), FailureReason> {
    let wait = async {
        loop {
            let is_ready = ready(&*rx.borrow_and_update());
            if is_ready {
                return Ok(());
            }
            if rx.changed().await.is_err() {
                return Err(FailureReason::LinkLost);
            }
        }
    };
    tokio::select! {
        res = timeout_at(deadline, wait) => res.unwrap_or(Err(on_timeout)),
        _ = cancelled(cancel) => Err(FailureReason::Cancelled),
    }
}

/// Samples the latest value of `rx` every `interval` until `ready` holds.
async fn poll_until<T>(
    rx: &mut watch::Receiver<T>,
    cancel: &mut watch::Receiver<bool>,
    interval: Duration,
    deadline: Instant,
    on_timeout: FailureReason,
    mut ready: impl FnMut(&T) -> bool,
) -> Result<(), FailureReason> {
    let poll = async {
        loop {
            let is_ready = ready(&*rx.borrow());
            if is_ready {
                return Ok(());
            }
            if rx.has_changed().is_err() {
                return Err(FailureReason::LinkLost);
            }
            sleep(interval).await;
        }
    };
    tokio::select! {
        res = timeout_at(deadline, poll) => res.unwrap_or(Err(on_timeout)),
        _ = cancelled(cancel) => Err(FailureReason::Cancelled),
    }
}

fn link_failure(e: &LinkError, rejected: FailureReason) -> FailureReason {
    match e {
        LinkError::ActionRejected(_) => rejected,
        LinkError::Disconnected | LinkError::Transport(_) => FailureReason::LinkLost,
    }
}

type Stream<T> = fn(&mut Telemetry) -> &mut watch::Receiver<T>;

/// Drives one vehicle through connect, arm, takeoff, navigate and land.
///
/// Every operation checks the current state first and returns
/// `AgentError::Precondition` without touching the vehicle when called out of
/// order. A gate that times out, a rejected command or a raised cancellation
/// signal moves the agent to `Failed`, which is terminal.
pub struct FlightAgent<L> {
    id: AgentId,
    address: String,
    link: L,
    timing: Timing,
    cancel: watch::Receiver<bool>,
    state: AgentState,
    telemetry: Option<Telemetry>,
    armed: bool,
    climbed: bool,
    target: Option<GeoPoint>,
}

impl<L: FlightLink> FlightAgent<L> {
    pub fn new(
        id: AgentId,
        address: impl Into<String>,
        link: L,
        timing: Timing,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            address: address.into(),
            link,
            timing,
            cancel,
            state: AgentState::Disconnected,
            telemetry: None,
            armed: false,
            climbed: false,
            target: None,
        }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn target(&self) -> Option<GeoPoint> {
        self.target
    }

    /// Last in-air flag reported by the vehicle; false before connecting.
    pub fn reports_in_air(&self) -> bool {
        self.telemetry.as_ref().is_some_and(|t| *t.in_air.borrow())
    }

    /// Whether this agent armed the vehicle and has not disarmed it since.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Last position reported by the vehicle.
    pub fn position(&self) -> Option<PositionSample> {
        self.telemetry.as_ref().map(|t| *t.position.borrow())
    }

    fn require(&self, op: &'static str, ok: bool) -> Result<(), AgentError> {
        if ok {
            Ok(())
        } else {
            Err(AgentError::Precondition {
                op,
                state: self.state,
            })
        }
    }

    fn set_state(&mut self, state: AgentState) {
        debug!("[drone {}] {} -> {}", self.id, self.state, state);
        self.state = state;
    }

    fn fail(&mut self, reason: FailureReason) -> AgentError {
        warn!("[drone {}] failed while {}: {}", self.id, self.state, reason);
        self.state = AgentState::Failed(reason);
        AgentError::Failed(reason)
    }

    async fn wait_stream<T>(
        &mut self,
        stream: Stream<T>,
        deadline: Instant,
        on_timeout: FailureReason,
        ready: impl FnMut(&T) -> bool,
    ) -> Result<(), AgentError> {
        let outcome = match self.telemetry.as_mut() {
            Some(t) => wait_until(stream(t), &mut self.cancel, deadline, on_timeout, ready).await,
            None => Err(FailureReason::LinkLost),
        };
        outcome.map_err(|reason| self.fail(reason))
    }

    async fn poll_stream<T>(
        &mut self,
        stream: Stream<T>,
        interval: Duration,
        deadline: Instant,
        on_timeout: FailureReason,
        ready: impl FnMut(&T) -> bool,
    ) -> Result<(), AgentError> {
        let outcome = match self.telemetry.as_mut() {
            Some(t) => {
                poll_until(stream(t), &mut self.cancel, interval, deadline, on_timeout, ready).await
            }
            None => Err(FailureReason::LinkLost),
        };
        outcome.map_err(|reason| self.fail(reason))
    }

    /// Fixed delay that still gives way to cancellation.
    async fn pause(&mut self, duration: Duration) -> Result<(), AgentError> {
        let elapsed = tokio::select! {
            _ = sleep(duration) => true,
            _ = cancelled(&mut self.cancel) => false,
        };
        if elapsed {
            Ok(())
        } else {
            Err(self.fail(FailureReason::Cancelled))
        }
    }

    /// Opens the link, then waits for a heartbeat and for GPS and home
    /// position to be reported healthy, all within the connect timeout.
    pub async fn connect(&mut self) -> Result<(), AgentError> {
        self.require("connect", self.state == AgentState::Disconnected)?;
        info!("[drone {}] connecting to {}", self.id, self.address);
        let deadline = Instant::now() + self.timing.connect_timeout();

        let opened = tokio::select! {
            res = timeout_at(deadline, self.link.connect()) => Some(res),
            _ = cancelled(&mut self.cancel) => None,
        };
        let telemetry = match opened {
            None => return Err(self.fail(FailureReason::Cancelled)),
            Some(Err(_)) => return Err(self.fail(FailureReason::ConnectTimeout)),
            Some(Ok(Err(e))) => {
                error!("[drone {}] cannot open link: {}", self.id, e);
                return Err(self.fail(FailureReason::LinkLost));
            }
            Some(Ok(Ok(telemetry))) => telemetry,
        };
        self.telemetry = Some(telemetry);

        self.wait_stream(
            |t| &mut t.heartbeat,
            deadline,
            FailureReason::ConnectTimeout,
            |alive| *alive,
        )
        .await?;
        self.set_state(AgentState::Connected);
        info!("[drone {}] connected, waiting for position lock", self.id);

        self.wait_stream(
            |t| &mut t.health,
            deadline,
            FailureReason::ConnectTimeout,
            Health::position_ok,
        )
        .await?;
        info!("[drone {}] position lock", self.id);
        Ok(())
    }

    /// Arms once the vehicle reports armable, waits the settle delay, takes
    /// off and returns when the climb reached the configured fraction of
    /// `target_altitude_m`.
    pub async fn arm_and_takeoff(&mut self, target_altitude_m: f64) -> Result<(), AgentError> {
        self.require("arm_and_takeoff", self.state == AgentState::Connected)?;
        self.set_state(AgentState::Arming);

        info!("[drone {}] waiting for vehicle to become armable", self.id);
        let deadline = Instant::now() + self.timing.armable_timeout();
        let interval = self.timing.armable_poll();
        self.poll_stream(
            |t| &mut t.health,
            interval,
            deadline,
            FailureReason::ArmableTimeout,
            |h| h.armable,
        )
        .await?;

        info!("[drone {}] arming", self.id);
        if let Err(e) = self.link.arm().await {
            warn!("[drone {}] arming failed: {}", self.id, e);
            return Err(self.fail(link_failure(&e, FailureReason::ArmRejected)));
        }
        self.armed = true;
        self.set_state(AgentState::TakingOff);

        self.pause(self.timing.settle()).await?;

        info!("[drone {}] taking off to {:.1} m", self.id, target_altitude_m);
        if let Err(e) = self.link.takeoff(target_altitude_m).await {
            warn!("[drone {}] takeoff failed: {}", self.id, e);
            return Err(self.fail(link_failure(&e, FailureReason::TakeoffRejected)));
        }
        self.set_state(AgentState::Airborne);

        let id = self.id;
        let threshold = target_altitude_m * self.timing.altitude_reached_ratio;
        let deadline = Instant::now() + self.timing.takeoff_timeout();
        let mut next_log_m = CLIMB_LOG_STEP_M;
        self.wait_stream(
            |t| &mut t.position,
            deadline,
            FailureReason::TakeoffTimeout,
            |p| {
                let alt = p.relative_altitude_m;
                if alt >= next_log_m {
                    debug!("[drone {}] climbing, alt {:.1} m", id, alt);
                    next_log_m = (alt / CLIMB_LOG_STEP_M).floor() * CLIMB_LOG_STEP_M
                        + CLIMB_LOG_STEP_M;
                }
                alt >= threshold
            },
        )
        .await?;

        self.climbed = true;
        info!("[drone {}] reached takeoff altitude", self.id);
        Ok(())
    }

    /// Sends the vehicle towards a position. Returns once the goto was
    /// accepted; it does not wait for arrival.
    pub async fn fly_to(
        &mut self,
        latitude_deg: f64,
        longitude_deg: f64,
        altitude_m: f64,
        yaw_deg: Option<f64>,
    ) -> Result<(), AgentError> {
        self.require("fly_to", self.climbed && self.state.is_flying())?;
        let yaw_deg = yaw_deg.unwrap_or(DEFAULT_YAW_DEG);

        info!(
            "[drone {}] moving to lat {:.6}, lon {:.6}",
            self.id, latitude_deg, longitude_deg
        );
        if let Err(e) = self
            .link
            .goto(latitude_deg, longitude_deg, altitude_m, yaw_deg)
            .await
        {
            warn!("[drone {}] move failed: {}", self.id, e);
            return Err(self.fail(link_failure(&e, FailureReason::ActionRejected)));
        }
        self.target = Some(GeoPoint::new(latitude_deg, longitude_deg, altitude_m));
        self.set_state(AgentState::Navigating);
        Ok(())
    }

    /// Waits until the reported position is within `tolerance_m` of the last
    /// goto target, measured along the ground.
    pub async fn await_arrival(&mut self, tolerance_m: f64) -> Result<(), AgentError> {
        let target = match (self.state, self.target) {
            (AgentState::Navigating, Some(target)) => target,
            _ => return self.require("await_arrival", false),
        };
        let deadline = Instant::now() + self.timing.arrival_timeout();
        self.wait_stream(
            |t| &mut t.position,
            deadline,
            FailureReason::ArrivalTimeout,
            |p| horizontal_distance_m(&target, &p.geo()) <= tolerance_m,
        )
        .await?;
        info!("[drone {}] on station", self.id);
        self.set_state(AgentState::AtTarget);
        Ok(())
    }

    /// Declares a navigating agent on station without checking its position.
    pub fn confirm_at_target(&mut self) -> Result<(), AgentError> {
        self.require("confirm_at_target", self.state == AgentState::Navigating)?;
        self.set_state(AgentState::AtTarget);
        Ok(())
    }

    async fn touch_down(&mut self, honour_cancel: bool) -> Result<(), FailureReason> {
        self.link
            .land()
            .await
            .map_err(|e| link_failure(&e, FailureReason::ActionRejected))?;

        let deadline = Instant::now() + self.timing.land_timeout();
        let (_keep_open, mut never) = watch::channel(false);
        let cancel = if honour_cancel {
            &mut self.cancel
        } else {
            &mut never
        };
        match self.telemetry.as_mut() {
            Some(t) => {
                wait_until(&mut t.in_air, cancel, deadline, FailureReason::LandTimeout, |in_air| {
                    !*in_air
                })
                .await?
            }
            None => return Err(FailureReason::LinkLost),
        }
        info!("[drone {}] landed", self.id);

        self.link
            .disarm()
            .await
            .map_err(|e| link_failure(&e, FailureReason::ActionRejected))?;
        self.armed = false;
        info!("[drone {}] disarmed", self.id);
        Ok(())
    }

    /// Lands, waits for the in-air flag to clear, then disarms.
    pub async fn land(&mut self) -> Result<(), AgentError> {
        self.require("land", self.state.is_flying())?;
        info!("[drone {}] landing", self.id);
        self.set_state(AgentState::Landing);
        match self.touch_down(true).await {
            Ok(()) => {
                self.set_state(AgentState::Landed);
                Ok(())
            }
            Err(reason) => Err(self.fail(reason)),
        }
    }

    /// Best-effort recovery after an abort: lands and disarms a vehicle that
    /// is still in the air, or just disarms one that is armed on the ground.
    /// Cancellation is ignored here. A failed agent keeps its failure reason.
    pub async fn emergency_land(&mut self) -> Result<(), AgentError> {
        let result = if self.reports_in_air() {
            warn!("[drone {}] emergency landing from {}", self.id, self.state);
            self.touch_down(false).await
        } else if self.armed {
            warn!("[drone {}] disarming on the ground", self.id);
            match self.link.disarm().await {
                Ok(()) => {
                    self.armed = false;
                    Ok(())
                }
                Err(e) => Err(link_failure(&e, FailureReason::ActionRejected)),
            }
        } else {
            return Ok(());
        };

        match result {
            Ok(()) => {
                if !self.state.is_failed() {
                    self.set_state(AgentState::Landed);
                }
                Ok(())
            }
            Err(reason) => {
                error!("[drone {}] emergency landing failed: {}", self.id, reason);
                if self.state.is_failed() {
                    Err(AgentError::Failed(reason))
                } else {
                    Err(self.fail(reason))
                }
            }
        }
    }
}
