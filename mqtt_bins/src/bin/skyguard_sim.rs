use std::time::{Duration, Instant};

use anyhow::Context;
use log::{info, warn};
use paho_mqtt::Message;
use skyguard_mqtt::broker_uri;
use skyguard_sim::{SimConfig, SimFleet};
use skyguard_structs::wire::{self, CommandAck, CommandMsg};

fn handle_command(
    mqtt_cli: &paho_mqtt::Client,
    fleet: &mut SimFleet,
    msg: &Message,
) -> anyhow::Result<()> {
    let Some(agent) = wire::agent_of_command_topic(msg.topic()) else {
        warn!("ignoring message on {}", msg.topic());
        return Ok(());
    };
    let cmd = match serde_json::from_slice::<CommandMsg>(msg.payload()) {
        Ok(cmd) => cmd,
        Err(e) => {
            warn!("received malformed command for agent {}: {}", agent, e);
            return Ok(());
        }
    };

    let result = fleet.command(agent, cmd.command);
    match &result {
        Ok(()) => info!("agent {}: {:?}", agent, cmd.command),
        Err(reason) => warn!("agent {}: rejected {:?}: {}", agent, cmd.command, reason),
    }
    let ack = CommandAck {
        seq: cmd.seq,
        result,
    };
    mqtt_cli.publish(Message::new(
        wire::ack_topic(agent),
        serde_json::to_string(&ack)?,
        1,
    ))?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init(); // RUST_LOG=info for command traces.

    let config: SimConfig = match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("reading sim config {}", path))?;
            serde_json::from_str(&json).with_context(|| format!("parsing sim config {}", path))?
        }
        None => SimConfig::default(),
    };
    let mut fleet = SimFleet::new(&config);

    let mqtt_opts = paho_mqtt::CreateOptionsBuilder::new()
        .server_uri(broker_uri())
        .client_id("skyguard-sim")
        .finalize();
    let mqtt_cli = paho_mqtt::Client::new(mqtt_opts)?;
    let conn_opts = paho_mqtt::ConnectOptionsBuilder::new()
        .keep_alive_interval(Duration::from_secs(20))
        .finalize();
    mqtt_cli.connect(conn_opts)?;
    mqtt_cli.subscribe(&wire::all_commands_filter(), 1)?;
    let mqtt_rx = mqtt_cli.start_consuming();

    let mut last_updated = Instant::now();
    let update_frequency = Duration::from_millis(50);

    info!(
        "skyguard_sim main loop starting with {} vehicles",
        fleet.vehicles.len()
    );
    loop {
        fleet.simulate(last_updated.elapsed().as_secs_f64());
        last_updated = Instant::now();
        for (agent, report) in fleet.reports() {
            mqtt_cli.publish(Message::new(
                wire::telemetry_topic(agent),
                serde_json::to_string(&report)?,
                0,
            ))?;
        }

        loop {
            let timeout = update_frequency.saturating_sub(last_updated.elapsed());
            match mqtt_rx.recv_timeout(timeout) {
                Ok(Some(msg)) => handle_command(&mqtt_cli, &mut fleet, &msg)?,
                Ok(None) => anyhow::bail!("connection to broker lost"),
                Err(e) if e.is_timeout() => break,
                Err(_) => anyhow::bail!("mqtt disconnected"),
            }
        }
    }
}
