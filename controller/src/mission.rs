use log::{info, warn};
use serde::{Deserialize, Serialize};
use skyguard_planner::plan_mission;
use skyguard_structs::{
    link::FlightLink,
    state::{AgentState, SwarmSnapshot},
    GeoPoint, LatLon, MissionTarget, Polygon,
};
use tokio::task::JoinHandle;

use crate::config::{AgentEndpoint, SwarmConfig};
use crate::coordinator::{CancelHandle, PhaseReport, SwarmCoordinator};
use crate::MissionError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MissionReport {
    pub targets: Vec<MissionTarget>,
    pub phases: Vec<PhaseReport>,
    /// Agent states once the mission ended.
    pub snapshot: SwarmSnapshot,
    pub cancelled: bool,
}

/// Runs connect, takeoff, deploy, hold and land on the whole swarm.
///
/// Individual agent failures are recorded in the report and do not end the
/// mission. A raised cancellation signal skips the remaining phases and
/// lands every vehicle that is still up.
pub async fn run_mission<L: FlightLink>(
    coordinator: &mut SwarmCoordinator<L>,
    targets: &[MissionTarget],
    config: &SwarmConfig,
) -> Result<MissionReport, MissionError> {
    if targets.len() < coordinator.len() {
        return Err(MissionError::InsufficientTargets {
            targets: targets.len(),
            agents: coordinator.len(),
        });
    }

    let altitude_m = config.flight_altitude_m;
    let mut phases = Vec::new();

    phases.push(coordinator.connect_all().await);
    if !coordinator.is_cancelled() {
        phases.push(coordinator.takeoff_all(altitude_m).await);
    }
    if !coordinator.is_cancelled() {
        phases.push(
            coordinator
                .deploy_all(
                    targets,
                    altitude_m,
                    Some(config.yaw_deg),
                    config.arrival_tolerance_m,
                )
                .await?,
        );
    }
    if !coordinator.is_cancelled() {
        if let Err(e) = coordinator.hold_all(config.hold()).await {
            warn!("hold ended early: {}", e);
        }
    }
    if !coordinator.is_cancelled() {
        phases.push(coordinator.land_all().await);
    }

    let cancelled = coordinator.is_cancelled();
    if cancelled {
        warn!("mission cancelled, bringing the swarm down");
        phases.push(coordinator.abort_all().await);
    }

    let snapshot = coordinator.snapshot().await;
    info!(
        "mission finished: {} landed, {} failed",
        snapshot.count(|s| *s == AgentState::Landed),
        snapshot.failed().count()
    );
    Ok(MissionReport {
        targets: targets.to_vec(),
        phases,
        snapshot,
        cancelled,
    })
}

pub struct SubmittedMission {
    pub targets: Vec<MissionTarget>,
    pub cancel: CancelHandle,
    pub handle: JoinHandle<Result<MissionReport, MissionError>>,
}

/// Accepts mission areas from an operator and launches a swarm over each.
pub struct MissionDesk<F> {
    config: SwarmConfig,
    make_link: F,
}

impl<L, F> MissionDesk<F>
where
    L: FlightLink,
    F: FnMut(&AgentEndpoint) -> L,
{
    pub fn new(config: SwarmConfig, make_link: F) -> Self {
        Self { config, make_link }
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    /// Plans the area given by four corners (bottom-left, bottom-right,
    /// top-right, top-left) and starts the mission on a background task.
    /// Planning errors are returned before anything is spawned. Must be
    /// called from within a tokio runtime.
    pub fn submit(&mut self, coordinates: &[LatLon]) -> Result<SubmittedMission, MissionError> {
        let corners: Vec<GeoPoint> = coordinates.iter().map(|&c| GeoPoint::from(c)).collect();
        let polygon = Polygon::from_points(&corners).map_err(MissionError::InvalidPolygon)?;
        if let Some(bad) = corners.iter().position(|c| !c.is_valid()) {
            return Err(MissionError::InvalidCorner(bad));
        }

        let targets = plan_mission(&polygon, &self.config.home, self.config.rows, self.config.cols)?;
        if targets.len() < self.config.agents.len() {
            return Err(MissionError::InsufficientTargets {
                targets: targets.len(),
                agents: self.config.agents.len(),
            });
        }

        info!(
            "mission accepted: {} agents over {} sectors",
            self.config.agents.len(),
            targets.len()
        );
        let mut coordinator =
            SwarmCoordinator::new(&self.config.agents, self.config.timing, &mut self.make_link);
        let cancel = coordinator.cancel_handle();
        let config = self.config.clone();
        let mission_targets = targets.clone();
        let handle = tokio::spawn(async move {
            run_mission(&mut coordinator, &mission_targets, &config).await
        });

        Ok(SubmittedMission {
            targets,
            cancel,
            handle,
        })
    }
}
