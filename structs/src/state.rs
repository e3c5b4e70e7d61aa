use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::AgentId;

/// Why an agent ended up in `AgentState::Failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureReason {
    ConnectTimeout,
    ArmableTimeout,
    ArmRejected,
    TakeoffRejected,
    TakeoffTimeout,
    ActionRejected,
    ArrivalTimeout,
    LandTimeout,
    /// The link could not be opened, or a telemetry stream closed.
    LinkLost,
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::ConnectTimeout => "connect timed out",
            FailureReason::ArmableTimeout => "vehicle never became armable",
            FailureReason::ArmRejected => "arm rejected",
            FailureReason::TakeoffRejected => "takeoff rejected",
            FailureReason::TakeoffTimeout => "takeoff altitude not reached in time",
            FailureReason::ActionRejected => "action rejected",
            FailureReason::ArrivalTimeout => "target not reached in time",
            FailureReason::LandTimeout => "landing not confirmed in time",
            FailureReason::LinkLost => "link lost",
            FailureReason::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Lifecycle of one flight agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentState {
    Disconnected,
    Connected,
    Arming,
    TakingOff,
    Airborne,
    Navigating,
    AtTarget,
    Landing,
    Landed,
    Failed(FailureReason),
}

impl AgentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentState::Landed | AgentState::Failed(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, AgentState::Failed(_))
    }

    /// States from which a normal landing may be commanded.
    pub fn is_flying(&self) -> bool {
        matches!(
            self,
            AgentState::Airborne | AgentState::Navigating | AgentState::AtTarget
        )
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentState::Failed(reason) => write!(f, "Failed({})", reason),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Point-in-time view of every agent's state, keyed by agent id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SwarmSnapshot {
    pub agents: BTreeMap<AgentId, AgentState>,
}

impl SwarmSnapshot {
    pub fn count(&self, pred: impl Fn(&AgentState) -> bool) -> usize {
        self.agents.values().filter(|s| pred(s)).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = (AgentId, FailureReason)> + '_ {
        self.agents.iter().filter_map(|(id, s)| match s {
            AgentState::Failed(r) => Some((*id, *r)),
            _ => None,
        })
    }

    pub fn all_terminal(&self) -> bool {
        self.agents.values().all(|s| s.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(AgentState::Landed.is_terminal());
        assert!(AgentState::Failed(FailureReason::ArmRejected).is_terminal());
        assert!(!AgentState::AtTarget.is_terminal());
        assert!(AgentState::Navigating.is_flying());
        assert!(!AgentState::Landing.is_flying());
        assert!(!AgentState::Failed(FailureReason::LandTimeout).is_flying());
    }

    #[test]
    fn snapshot_counts() {
        let mut snap = SwarmSnapshot::default();
        snap.agents.insert(1, AgentState::AtTarget);
        snap.agents.insert(2, AgentState::Failed(FailureReason::ActionRejected));
        snap.agents.insert(3, AgentState::AtTarget);
        assert_eq!(snap.count(|s| *s == AgentState::AtTarget), 2);
        assert_eq!(
            snap.failed().collect::<Vec<_>>(),
            vec![(2, FailureReason::ActionRejected)]
        );
        assert!(!snap.all_terminal());
    }
}
