use anyhow::{bail, Context};
use log::{info, warn};
use skyguard_controller::{AgentEndpoint, MissionDesk, SwarmConfig};
use skyguard_mqtt::MqttLink;
use skyguard_structs::LatLon;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init(); // RUST_LOG=info to follow the mission.

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (config, area_path) = match args.as_slice() {
        [area] => (SwarmConfig::default(), area),
        [config, area] => (
            SwarmConfig::load(config).with_context(|| format!("loading config {}", config))?,
            area,
        ),
        _ => bail!("usage: skyguard_controller [config.json] <area.json>"),
    };
    let area_json = std::fs::read_to_string(area_path)
        .with_context(|| format!("reading mission area {}", area_path))?;
    let area: Vec<LatLon> = serde_json::from_str(&area_json)
        .with_context(|| format!("parsing mission area {}", area_path))?;

    let mut desk = MissionDesk::new(config, |e: &AgentEndpoint| {
        MqttLink::new(e.id, e.address.as_str())
    });
    let mission = desk.submit(&area)?;
    for target in &mission.targets {
        info!(
            "sector {} -> agent slot {} at lat {:.6}, lon {:.6}",
            target.sector,
            target.agent_slot,
            target.position.latitude_deg,
            target.position.longitude_deg
        );
    }

    let cancel = mission.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, landing the swarm");
            cancel.cancel();
        }
    });

    let report = mission.handle.await??;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.cancelled {
        bail!("mission was cancelled");
    }
    Ok(())
}
