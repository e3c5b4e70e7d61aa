use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use skyguard_structs::{
    link::FlightLink,
    state::{AgentState, FailureReason, SwarmSnapshot},
    AgentId, MissionTarget,
};
use tokio::sync::{watch, Mutex, MutexGuard, OwnedMutexGuard};
use tokio::task::JoinSet;
use tokio::time::sleep;

use crate::agent::{cancelled, FlightAgent};
use crate::config::{AgentEndpoint, Timing};
use crate::{AgentError, MissionError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Connect,
    Takeoff,
    Deploy,
    Land,
    Abort,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Done,
    Failed(FailureReason),
    /// The agent was not in a state where the phase applies to it.
    Skipped(AgentState),
}

impl From<Result<(), AgentError>> for Outcome {
    fn from(result: Result<(), AgentError>) -> Self {
        match result {
            Ok(()) => Outcome::Done,
            Err(AgentError::Failed(reason)) => Outcome::Failed(reason),
            Err(AgentError::Precondition { state, .. }) => Outcome::Skipped(state),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub agent: AgentId,
    pub outcome: Outcome,
}

/// Per-agent result of one fan-out, in agent order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub outcomes: Vec<AgentOutcome>,
}

impl PhaseReport {
    pub fn successes(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Done))
    }

    pub fn failures(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped(_)))
    }

    pub fn outcome_of(&self, agent: AgentId) -> Option<Outcome> {
        self.outcomes
            .iter()
            .find(|o| o.agent == agent)
            .map(|o| o.outcome)
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.outcome)).count()
    }
}

/// Raises the swarm-wide cancellation signal. Every wait of every agent
/// observes it.
#[derive(Clone, Debug)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    pub fn cancel(&self) {
        if !self.0.send_replace(true) {
            warn!("mission cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.0.subscribe()
    }
}

/// Owns a fixed set of flight agents and runs each mission phase on all of
/// them at once. A phase returns only after every agent finished its part,
/// so phases act as barriers. One agent failing never stops the others.
///
/// Each agent sits behind its own lock that a phase task holds while it
/// works. Dropping a phase future aborts its tasks and releases the locks,
/// so the swarm stays intact and can still be landed.
pub struct SwarmCoordinator<L> {
    agents: Vec<Arc<Mutex<FlightAgent<L>>>>,
    cancel: CancelHandle,
}

impl<L: FlightLink> SwarmCoordinator<L> {
    pub fn new(
        endpoints: &[AgentEndpoint],
        timing: Timing,
        mut make_link: impl FnMut(&AgentEndpoint) -> L,
    ) -> Self {
        let (tx, rx) = watch::channel(false);
        let agents = endpoints
            .iter()
            .map(|e| {
                let link = make_link(e);
                let agent = FlightAgent::new(e.id, e.address.clone(), link, timing, rx.clone());
                Arc::new(Mutex::new(agent))
            })
            .collect();
        Self {
            agents,
            cancel: CancelHandle(Arc::new(tx)),
        }
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// The agent in `slot`, once no phase task is working on it.
    pub async fn agent(&self, slot: usize) -> Option<MutexGuard<'_, FlightAgent<L>>> {
        Some(self.agents.get(slot)?.lock().await)
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn snapshot(&self) -> SwarmSnapshot {
        let mut snapshot = SwarmSnapshot::default();
        for agent in &self.agents {
            let agent = agent.lock().await;
            snapshot.agents.insert(agent.id(), agent.state());
        }
        snapshot
    }

    /// Agents whose vehicle last reported being in the air.
    pub async fn airborne(&self) -> Vec<AgentId> {
        let mut ids = Vec::new();
        for agent in &self.agents {
            let agent = agent.lock().await;
            if agent.reports_in_air() {
                ids.push(agent.id());
            }
        }
        ids
    }

    /// Hands every agent to its own task, locked for the duration of `op`,
    /// and reports the results in slot order.
    async fn run_phase<F, Fut>(&mut self, phase: Phase, mut op: F) -> PhaseReport
    where
        F: FnMut(usize, OwnedMutexGuard<FlightAgent<L>>) -> Fut,
        Fut: Future<Output = Result<(), AgentError>> + Send + 'static,
    {
        info!("{:?}: starting on {} agents", phase, self.agents.len());
        let mut tasks = JoinSet::new();
        for (slot, agent) in self.agents.iter().enumerate() {
            let agent = agent.clone().lock_owned().await;
            let id = agent.id();
            let fut = op(slot, agent);
            tasks.spawn(async move { (slot, id, fut.await) });
        }

        let mut finished = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(done) => finished.push(done),
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => error!("{:?}: agent task lost: {}", phase, e),
            }
        }
        finished.sort_by_key(|(slot, _, _)| *slot);

        let outcomes = finished
            .into_iter()
            .map(|(_, agent, result)| AgentOutcome {
                agent,
                outcome: result.into(),
            })
            .collect();
        let report = PhaseReport { phase, outcomes };
        info!(
            "{:?}: {} done, {} failed, {} skipped",
            phase,
            report.successes(),
            report.failures(),
            report.skipped()
        );
        report
    }

    pub async fn connect_all(&mut self) -> PhaseReport {
        self.run_phase(Phase::Connect, |_, mut agent| async move { agent.connect().await })
            .await
    }

    pub async fn takeoff_all(&mut self, altitude_m: f64) -> PhaseReport {
        self.run_phase(Phase::Takeoff, move |_, mut agent| async move {
            agent.arm_and_takeoff(altitude_m).await
        })
        .await
    }

    /// Sends agent `i` to `targets[i]`. With an arrival tolerance each agent
    /// also waits until it is that close to its target; without one, an
    /// accepted goto counts as on station.
    ///
    /// Fails before any command is issued when there are fewer targets than
    /// agents.
    pub async fn deploy_all(
        &mut self,
        targets: &[MissionTarget],
        altitude_m: f64,
        yaw_deg: Option<f64>,
        arrival_tolerance_m: Option<f64>,
    ) -> Result<PhaseReport, MissionError> {
        if targets.len() < self.agents.len() {
            return Err(MissionError::InsufficientTargets {
                targets: targets.len(),
                agents: self.agents.len(),
            });
        }
        if targets.len() > self.agents.len() {
            warn!("{} sectors left uncovered", targets.len() - self.agents.len());
        }

        let positions: Vec<_> = targets.iter().map(|t| t.position).collect();
        let report = self
            .run_phase(Phase::Deploy, move |slot, mut agent| {
                let target = positions[slot];
                async move {
                    agent
                        .fly_to(
                            target.latitude_deg,
                            target.longitude_deg,
                            altitude_m,
                            yaw_deg,
                        )
                        .await?;
                    match arrival_tolerance_m {
                        Some(tolerance) => agent.await_arrival(tolerance).await,
                        None => agent.confirm_at_target(),
                    }
                }
            })
            .await;
        Ok(report)
    }

    /// Keeps the swarm on station for `duration`, or until cancelled.
    pub async fn hold_all(&mut self, duration: Duration) -> Result<(), MissionError> {
        info!("holding sectors for {:.1} s", duration.as_secs_f64());
        let mut cancel = self.cancel.subscribe();
        tokio::select! {
            _ = sleep(duration) => Ok(()),
            _ = cancelled(&mut cancel) => Err(MissionError::Cancelled),
        }
    }

    /// Lands every flying agent. Failed agents that are still in the air or
    /// still armed are brought down and disarmed as well.
    pub async fn land_all(&mut self) -> PhaseReport {
        self.run_phase(Phase::Land, |_, mut agent| async move {
            let state = agent.state();
            if state.is_flying() {
                agent.land().await
            } else if state.is_failed() && (agent.reports_in_air() || agent.is_armed()) {
                agent.emergency_land().await
            } else {
                Err(AgentError::Precondition { op: "land", state })
            }
        })
        .await
    }

    /// Raises the cancellation signal and brings every vehicle back to the
    /// ground, ignoring the signal while doing so.
    pub async fn abort_all(&mut self) -> PhaseReport {
        self.cancel.cancel();
        self.run_phase(Phase::Abort, |_, mut agent| async move {
            agent.emergency_land().await
        })
        .await
    }
}
