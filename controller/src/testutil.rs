use skyguard_sim::{CommandLog, SimFaults, SimLink, SimParams, SimVehicle};
use skyguard_structs::{GeoPoint, LatLon};

use crate::config::{AgentEndpoint, SwarmConfig, Timing};
use crate::coordinator::SwarmCoordinator;

pub fn home() -> GeoPoint {
    GeoPoint::new(26.308079, 50.146278, 0.0)
}

/// The KFUPM stadium area, bottom-left first, counter-clockwise.
pub fn stadium_corners() -> [LatLon; 4] {
    [
        LatLon { lat: 26.308079, lon: 50.146278 },
        LatLon { lat: 26.308642, lon: 50.147220 },
        LatLon { lat: 26.309173, lon: 50.146842 },
        LatLon { lat: 26.308620, lon: 50.145891 },
    ]
}

pub fn test_timing() -> Timing {
    Timing {
        connect_timeout_secs: 10.0,
        armable_timeout_secs: 10.0,
        takeoff_timeout_secs: 30.0,
        arrival_timeout_secs: 60.0,
        land_timeout_secs: 30.0,
        ..Default::default()
    }
}

pub fn test_config() -> SwarmConfig {
    SwarmConfig {
        home: home(),
        agents: (1..=4)
            .map(|id| AgentEndpoint {
                id,
                address: format!("sim://{}", id),
            })
            .collect(),
        flight_altitude_m: 10.0,
        hold_secs: 5.0,
        timing: test_timing(),
        ..Default::default()
    }
}

/// One simulated vehicle per configured agent, all starting at home, with
/// `faults[i]` injected into agent `i`.
pub fn sim_swarm(
    config: &SwarmConfig,
    faults: &[SimFaults],
) -> (SwarmCoordinator<SimLink>, Vec<CommandLog>) {
    assert_eq!(config.agents.len(), faults.len());
    let mut links: Vec<SimLink> = faults
        .iter()
        .map(|f| SimLink::new(SimVehicle::with_faults(config.home, SimParams::default(), *f)))
        .collect();
    let logs = links.iter().map(|l| l.command_log()).collect();
    links.reverse();
    let coordinator = SwarmCoordinator::new(&config.agents, config.timing, |_| {
        links.pop().expect("one link per agent")
    });
    (coordinator, logs)
}
