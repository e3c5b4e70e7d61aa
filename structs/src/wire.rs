//! JSON messages exchanged between the simulated fleet and the controller
//! over MQTT.

use serde::{Deserialize, Serialize};

use crate::link::{Command, Health, PositionSample};
use crate::AgentId;

pub const TOPIC_ROOT: &str = "/skyguard";

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VehicleReport {
    pub heartbeat: bool,
    pub health: Health,
    pub position: PositionSample,
    pub in_air: bool,
    pub armed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandMsg {
    pub seq: u64,
    pub command: Command,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    pub seq: u64,
    pub result: Result<(), String>,
}

pub fn telemetry_topic(agent: AgentId) -> String {
    format!("{}/{}/telemetry", TOPIC_ROOT, agent)
}

pub fn command_topic(agent: AgentId) -> String {
    format!("{}/{}/command", TOPIC_ROOT, agent)
}

pub fn ack_topic(agent: AgentId) -> String {
    format!("{}/{}/ack", TOPIC_ROOT, agent)
}

/// Subscription filter matching every agent's command topic.
pub fn all_commands_filter() -> String {
    format!("{}/+/command", TOPIC_ROOT)
}

/// Extracts the agent id from a `/skyguard/<id>/command` topic.
pub fn agent_of_command_topic(topic: &str) -> Option<AgentId> {
    let rest = topic.strip_prefix(TOPIC_ROOT)?.strip_prefix('/')?;
    let (id, leaf) = rest.split_once('/')?;
    if leaf != "command" {
        return None;
    }
    id.parse().ok()
}
