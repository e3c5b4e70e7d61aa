use skyguard_planner::PlanError;
use skyguard_structs::state::{AgentState, FailureReason};
use thiserror::Error;

pub mod agent;
pub mod config;
pub mod coordinator;
pub mod mission;

#[cfg(test)]
mod testutil;

pub use agent::FlightAgent;
pub use config::{AgentEndpoint, ConfigError, SwarmConfig, Timing};
pub use coordinator::{AgentOutcome, CancelHandle, Outcome, Phase, PhaseReport, SwarmCoordinator};
pub use mission::{run_mission, MissionDesk, MissionReport, SubmittedMission};

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum AgentError {
    /// The operation is not allowed in the agent's current state. Nothing was
    /// sent to the vehicle.
    #[error("{op} not allowed while {state}")]
    Precondition { op: &'static str, state: AgentState },
    #[error("agent failed: {0}")]
    Failed(FailureReason),
}

#[derive(Debug, Error, PartialEq)]
pub enum MissionError {
    #[error("mission area needs exactly 4 corners, got {0}")]
    InvalidPolygon(usize),
    #[error("corner {0} is not a valid position")]
    InvalidCorner(usize),
    #[error("cannot plan mission: {0}")]
    Plan(#[from] PlanError),
    #[error("{targets} targets for {agents} agents")]
    InsufficientTargets { targets: usize, agents: usize },
    #[error("mission cancelled")]
    Cancelled,
}
