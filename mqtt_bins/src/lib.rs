pub mod link;

pub use link::MqttLink;

pub const DEFAULT_BROKER: &str = "mqtt://localhost:1883";

/// Broker URI from `SKYGUARD_MQTT`, falling back to a local broker.
pub fn broker_uri() -> String {
    std::env::var("SKYGUARD_MQTT").unwrap_or_else(|_| DEFAULT_BROKER.to_string())
}
