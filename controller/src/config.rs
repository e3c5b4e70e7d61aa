use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use skyguard_structs::{AgentId, GeoPoint};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Where one agent's vehicle can be reached. The address is opaque here and
/// interpreted by the flight link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentEndpoint {
    pub id: AgentId,
    pub address: String,
}

/// Bounds and intervals for every gated wait of a flight agent.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub connect_timeout_secs: f64,
    pub armable_poll_secs: f64,
    pub armable_timeout_secs: f64,
    /// Fixed wait between arming and takeoff. There is no signal for "motors
    /// spun up", so this is a plain delay.
    pub settle_secs: f64,
    pub takeoff_timeout_secs: f64,
    /// Fraction of the takeoff altitude that counts as reached.
    pub altitude_reached_ratio: f64,
    pub arrival_timeout_secs: f64,
    pub land_timeout_secs: f64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 60.0,
            armable_poll_secs: 1.0,
            armable_timeout_secs: 60.0,
            settle_secs: 2.0,
            takeoff_timeout_secs: 60.0,
            altitude_reached_ratio: 0.99,
            arrival_timeout_secs: 120.0,
            land_timeout_secs: 120.0,
        }
    }
}

fn secs(s: f64) -> Duration {
    Duration::try_from_secs_f64(s).unwrap_or_default()
}

impl Timing {
    pub fn connect_timeout(&self) -> Duration {
        secs(self.connect_timeout_secs)
    }
    pub fn armable_poll(&self) -> Duration {
        secs(self.armable_poll_secs)
    }
    pub fn armable_timeout(&self) -> Duration {
        secs(self.armable_timeout_secs)
    }
    pub fn settle(&self) -> Duration {
        secs(self.settle_secs)
    }
    pub fn takeoff_timeout(&self) -> Duration {
        secs(self.takeoff_timeout_secs)
    }
    pub fn arrival_timeout(&self) -> Duration {
        secs(self.arrival_timeout_secs)
    }
    pub fn land_timeout(&self) -> Duration {
        secs(self.land_timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("armable_poll_secs", self.armable_poll_secs),
            ("armable_timeout_secs", self.armable_timeout_secs),
            ("settle_secs", self.settle_secs),
            ("takeoff_timeout_secs", self.takeoff_timeout_secs),
            ("arrival_timeout_secs", self.arrival_timeout_secs),
            ("land_timeout_secs", self.land_timeout_secs),
        ];
        for (name, value) in durations {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!("timing.{} = {}", name, value)));
            }
        }
        if !(self.altitude_reached_ratio > 0.0 && self.altitude_reached_ratio <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "timing.altitude_reached_ratio = {}",
                self.altitude_reached_ratio
            )));
        }
        if !(self.armable_poll_secs > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "timing.armable_poll_secs = {}",
                self.armable_poll_secs
            )));
        }
        Ok(())
    }
}

/// Everything a mission needs besides the area itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub home: GeoPoint,
    pub agents: Vec<AgentEndpoint>,
    pub rows: usize,
    pub cols: usize,
    /// Takeoff and cruise height above home.
    pub flight_altitude_m: f64,
    /// How long the swarm holds its sectors before landing.
    pub hold_secs: f64,
    /// Heading while holding; 0 faces north.
    pub yaw_deg: f64,
    /// When set, deployment waits until each agent is this close to its
    /// target. When absent, a goto that was accepted counts as arrived.
    pub arrival_tolerance_m: Option<f64>,
    pub timing: Timing,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            home: GeoPoint::new(26.308079, 50.146278, 0.0),
            agents: (1..=4)
                .map(|id| AgentEndpoint {
                    id,
                    address: "mqtt://localhost:1883".to_string(),
                })
                .collect(),
            rows: 2,
            cols: 2,
            flight_altitude_m: 25.0,
            hold_secs: 20.0,
            yaw_deg: 0.0,
            arrival_tolerance_m: None,
            timing: Timing::default(),
        }
    }
}

impl SwarmConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: SwarmConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn hold(&self) -> Duration {
        secs(self.hold_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.home.is_valid() {
            return Err(ConfigError::Invalid(format!("home {:?}", self.home)));
        }
        if self.agents.is_empty() {
            return Err(ConfigError::Invalid("no agents configured".to_string()));
        }
        let mut ids: Vec<_> = self.agents.iter().map(|a| a.id).collect();
        ids.sort();
        ids.dedup();
        if ids.len() != self.agents.len() {
            return Err(ConfigError::Invalid("duplicate agent id".to_string()));
        }
        if !(self.flight_altitude_m > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "flight_altitude_m = {}",
                self.flight_altitude_m
            )));
        }
        if !self.hold_secs.is_finite() || self.hold_secs < 0.0 {
            return Err(ConfigError::Invalid(format!("hold_secs = {}", self.hold_secs)));
        }
        if let Some(tol) = self.arrival_tolerance_m {
            if !(tol > 0.0) {
                return Err(ConfigError::Invalid(format!("arrival_tolerance_m = {}", tol)));
            }
        }
        self.timing.validate()
    }
}
