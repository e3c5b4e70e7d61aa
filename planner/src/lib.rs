use thiserror::Error;

pub mod geodetic;
pub mod mission;
pub mod partition;

#[cfg(test)]
mod mission_tests;

pub use mission::{local_bounds, plan_mission, LocalBounds};
pub use partition::{partition, SectorGrid};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlanError {
    #[error("invalid partition dimension {name} = {value}")]
    InvalidDimension { name: &'static str, value: f64 },
}
