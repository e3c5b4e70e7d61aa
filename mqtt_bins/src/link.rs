use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};
use paho_mqtt::{AsyncClient, ConnectOptionsBuilder, CreateOptionsBuilder, Message};
use skyguard_structs::{
    link::{Command, FlightLink, LinkError, Telemetry, TelemetryFeed},
    wire::{self, CommandAck, CommandMsg, VehicleReport},
    AgentId,
};
use tokio::sync::oneshot;

pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

type Pending = Mutex<HashMap<u64, oneshot::Sender<Result<(), String>>>>;

fn lock(pending: &Pending) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Result<(), String>>>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

/// Dispatches incoming MQTT messages of one agent to its telemetry feed and
/// to the command waiting for an acknowledgment.
struct Router {
    agent: AgentId,
    telemetry_topic: String,
    ack_topic: String,
    feed: TelemetryFeed,
    pending: Arc<Pending>,
}

impl Router {
    fn route(&self, topic: &str, payload: &[u8]) {
        if topic == self.telemetry_topic {
            match serde_json::from_slice::<VehicleReport>(payload) {
                Ok(report) => self.feed.publish(&report),
                Err(e) => warn!("[drone {}] malformed telemetry: {}", self.agent, e),
            }
        } else if topic == self.ack_topic {
            match serde_json::from_slice::<CommandAck>(payload) {
                Ok(ack) => match lock(&self.pending).remove(&ack.seq) {
                    Some(waiter) => {
                        let _ = waiter.send(ack.result);
                    }
                    None => debug!("[drone {}] late ack {}", self.agent, ack.seq),
                },
                Err(e) => warn!("[drone {}] malformed ack: {}", self.agent, e),
            }
        } else {
            warn!("[drone {}] unexpected topic {}", self.agent, topic);
        }
    }

    fn connection_lost(&self) {
        warn!("[drone {}] connection to broker lost", self.agent);
        self.feed.heartbeat_lost();
        // Dropping the waiters fails their commands as disconnected.
        lock(&self.pending).clear();
    }
}

/// Flight link speaking the JSON wire protocol over an MQTT broker. Telemetry
/// arrives on `/skyguard/<id>/telemetry`; each command is published on
/// `/skyguard/<id>/command` and resolved by the matching sequence number on
/// `/skyguard/<id>/ack`.
pub struct MqttLink {
    agent: AgentId,
    broker: String,
    ack_timeout: Duration,
    client: Option<AsyncClient>,
    pending: Arc<Pending>,
    next_seq: u64,
}

impl MqttLink {
    pub fn new(agent: AgentId, broker: impl Into<String>) -> Self {
        Self {
            agent,
            broker: broker.into(),
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            client: None,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_seq: 0,
        }
    }

    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    async fn send(&mut self, command: Command) -> Result<(), LinkError> {
        let client = match &self.client {
            Some(client) if client.is_connected() => client,
            _ => return Err(LinkError::Disconnected),
        };
        self.next_seq += 1;
        let seq = self.next_seq;
        let payload = serde_json::to_string(&CommandMsg { seq, command })
            .map_err(|e| LinkError::Transport(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(seq, tx);
        debug!("[drone {}] -> {:?} (seq {})", self.agent, command, seq);
        let published = client
            .publish(Message::new(wire::command_topic(self.agent), payload, 1))
            .await;
        if let Err(e) = published {
            lock(&self.pending).remove(&seq);
            return Err(LinkError::Transport(e.to_string()));
        }

        match tokio::time::timeout(self.ack_timeout, rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(LinkError::ActionRejected(reason)),
            Ok(Err(_)) => Err(LinkError::Disconnected),
            Err(_) => {
                lock(&self.pending).remove(&seq);
                Err(LinkError::Transport(format!(
                    "no ack for {:?} within {:.1} s",
                    command,
                    self.ack_timeout.as_secs_f64()
                )))
            }
        }
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            if client.is_connected() {
                let _ = client.disconnect(None);
            }
        }
    }
}

impl FlightLink for MqttLink {
    async fn connect(&mut self) -> Result<Telemetry, LinkError> {
        let transport = |e: paho_mqtt::Error| LinkError::Transport(e.to_string());

        let create_opts = CreateOptionsBuilder::new()
            .server_uri(&self.broker)
            .client_id(format!("skyguard-agent-{}", self.agent))
            .finalize();
        let client = AsyncClient::new(create_opts).map_err(transport)?;

        // Nothing is known until the first report arrives.
        let silent = VehicleReport {
            heartbeat: false,
            health: Default::default(),
            position: Default::default(),
            in_air: false,
            armed: false,
        };
        let (feed, telemetry) = TelemetryFeed::open(&silent);
        let router = Arc::new(Router {
            agent: self.agent,
            telemetry_topic: wire::telemetry_topic(self.agent),
            ack_topic: wire::ack_topic(self.agent),
            feed,
            pending: self.pending.clone(),
        });

        let on_lost = router.clone();
        client.set_connection_lost_callback(move |_| on_lost.connection_lost());
        let on_message = router.clone();
        client.set_message_callback(move |_, msg| {
            if let Some(msg) = msg {
                on_message.route(msg.topic(), msg.payload());
            }
        });

        let conn_opts = ConnectOptionsBuilder::new()
            .keep_alive_interval(Duration::from_secs(20))
            .clean_session(true)
            .finalize();
        client.connect(conn_opts).await.map_err(transport)?;
        client
            .subscribe(router.telemetry_topic.as_str(), 1)
            .await
            .map_err(transport)?;
        client
            .subscribe(router.ack_topic.as_str(), 1)
            .await
            .map_err(transport)?;
        info!("[drone {}] subscribed on {}", self.agent, self.broker);

        self.client = Some(client);
        Ok(telemetry)
    }

    async fn arm(&mut self) -> Result<(), LinkError> {
        self.send(Command::Arm).await
    }

    async fn disarm(&mut self) -> Result<(), LinkError> {
        self.send(Command::Disarm).await
    }

    async fn takeoff(&mut self, altitude_m: f64) -> Result<(), LinkError> {
        self.send(Command::Takeoff { altitude_m }).await
    }

    async fn land(&mut self) -> Result<(), LinkError> {
        self.send(Command::Land).await
    }

    async fn goto(
        &mut self,
        latitude_deg: f64,
        longitude_deg: f64,
        altitude_m: f64,
        yaw_deg: f64,
    ) -> Result<(), LinkError> {
        self.send(Command::Goto {
            latitude_deg,
            longitude_deg,
            altitude_m,
            yaw_deg,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyguard_structs::link::{Health, PositionSample};

    fn router(agent: AgentId) -> (Router, Telemetry) {
        let (feed, telemetry) = TelemetryFeed::open(&VehicleReport {
            heartbeat: false,
            health: Health::default(),
            position: PositionSample::default(),
            in_air: false,
            armed: false,
        });
        let router = Router {
            agent,
            telemetry_topic: wire::telemetry_topic(agent),
            ack_topic: wire::ack_topic(agent),
            feed,
            pending: Arc::new(Mutex::new(HashMap::new())),
        };
        (router, telemetry)
    }

    #[test]
    fn telemetry_reaches_the_streams() {
        let (router, telemetry) = router(2);
        let report = VehicleReport {
            heartbeat: true,
            health: Health {
                global_position_ok: true,
                home_position_ok: true,
                armable: true,
            },
            position: PositionSample {
                latitude_deg: 26.3,
                longitude_deg: 50.1,
                absolute_altitude_m: 12.0,
                relative_altitude_m: 12.0,
            },
            in_air: true,
            armed: true,
        };
        router.route(
            &wire::telemetry_topic(2),
            serde_json::to_string(&report).unwrap().as_bytes(),
        );
        assert!(*telemetry.heartbeat.borrow());
        assert!(*telemetry.in_air.borrow());
        assert_eq!(*telemetry.position.borrow(), report.position);

        // Other agents and garbage are ignored.
        router.route(&wire::telemetry_topic(3), b"{}");
        router.route(&wire::telemetry_topic(2), b"not json");
        assert!(*telemetry.heartbeat.borrow());
    }

    #[test]
    fn ack_resolves_the_matching_command() {
        let (router, _telemetry) = router(1);
        let (tx_a, mut rx_a) = oneshot::channel();
        let (tx_b, mut rx_b) = oneshot::channel();
        lock(&router.pending).insert(4, tx_a);
        lock(&router.pending).insert(5, tx_b);

        let ack = CommandAck {
            seq: 5,
            result: Err("vehicle not armable".to_string()),
        };
        router.route(
            &wire::ack_topic(1),
            serde_json::to_string(&ack).unwrap().as_bytes(),
        );
        assert_eq!(rx_b.try_recv(), Ok(Err("vehicle not armable".to_string())));
        assert!(rx_a.try_recv().is_err());
        assert_eq!(lock(&router.pending).len(), 1);
    }

    #[test]
    fn lost_connection_silences_heartbeat_and_drops_waiters() {
        let (router, telemetry) = router(1);
        router.feed.publish(&VehicleReport {
            heartbeat: true,
            health: Health::default(),
            position: PositionSample::default(),
            in_air: false,
            armed: false,
        });
        let (tx, mut rx) = oneshot::channel();
        lock(&router.pending).insert(1, tx);

        router.connection_lost();
        assert!(!*telemetry.heartbeat.borrow());
        assert_eq!(rx.try_recv(), Err(oneshot::error::TryRecvError::Closed));
    }
}
