use anyhow::{bail, Context, Result};
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Outgoing, QoS};
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use vestwoods_lib::telemetry::Telemetry;

use crate::config::Config;

pub const DEFAULT_DISCOVERY_MARKER: &str = ".discovery_published";
const DISCOVERY_PREFIX: &str = "homeassistant";
const MANUFACTURER: &str = "Vestwoods";
const MODEL: &str = "100Ah LiFePO4 BMS";
const ONLINE: &str = "online";
const OFFLINE: &str = "offline";
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// One message for the broker, always sent with QoS 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

impl MqttMessage {
    fn retained(topic: String, payload: String) -> Self {
        Self {
            topic,
            payload,
            retain: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn state(&self, field: &str) -> String {
        format!("{}/{field}", self.prefix)
    }

    pub fn availability(&self) -> String {
        self.state("availability")
    }

    pub fn discovery(&self, field: &str) -> String {
        format!("{DISCOVERY_PREFIX}/sensor/{}_{field}/config", self.prefix)
    }
}

/// Home Assistant rendering hints of a sensor.
#[derive(Debug, Clone, Copy)]
struct Kind {
    unit: Option<&'static str>,
    device_class: Option<&'static str>,
    measurement: bool,
}

const fn kind(unit: &'static str, device_class: &'static str) -> Kind {
    Kind {
        unit: Some(unit),
        device_class: Some(device_class),
        measurement: true,
    }
}

const VOLTAGE: Kind = kind("V", "voltage");
const MILLIVOLT: Kind = kind("mV", "voltage");
const CURRENT: Kind = kind("A", "current");
const BATTERY: Kind = kind("%", "battery");
const TEMPERATURE: Kind = kind("°C", "temperature");
const CHARGE: Kind = Kind {
    unit: Some("Ah"),
    device_class: None,
    measurement: true,
};
const COUNT: Kind = Kind {
    unit: None,
    device_class: None,
    measurement: true,
};
const TEXT: Kind = Kind {
    unit: None,
    device_class: None,
    measurement: false,
};

#[derive(Debug, Clone)]
struct Sensor {
    field: String,
    name: String,
    kind: Kind,
    value: String,
}

fn sensor(field: impl Into<String>, name: impl Into<String>, kind: Kind, value: String) -> Sensor {
    Sensor {
        field: field.into(),
        name: name.into(),
        kind,
        value,
    }
}

fn sensors(t: &Telemetry) -> Vec<Sensor> {
    let mut sensors = vec![
        sensor("pack_voltage", "Pack voltage", VOLTAGE, format!("{:.2}", t.pack_voltage)),
        sensor("pack_current", "Pack current", CURRENT, format!("{:.2}", t.pack_current)),
        sensor("soc_percent", "State of charge", BATTERY, format!("{:.2}", t.soc_percent)),
        sensor("soh_percent", "State of health", BATTERY, format!("{:.2}", t.soh_percent)),
        sensor(
            "remaining_capacity_ah",
            "Remaining capacity",
            CHARGE,
            format!("{:.2}", t.remaining_capacity_ah),
        ),
        sensor(
            "full_capacity_ah",
            "Full capacity",
            CHARGE,
            format!("{:.2}", t.full_capacity_ah),
        ),
        sensor(
            "nominal_capacity_ah",
            "Nominal capacity",
            CHARGE,
            format!("{:.2}", t.nominal_capacity_ah),
        ),
        sensor("cycle_count", "Cycle count", COUNT, t.cycle_count.to_string()),
        sensor("cell_count", "Cell count", COUNT, t.cell_count.to_string()),
        sensor("cell_min_mv", "Cell minimum", MILLIVOLT, t.cell_min_mv.to_string()),
        sensor("cell_max_mv", "Cell maximum", MILLIVOLT, t.cell_max_mv.to_string()),
        sensor("cell_avg_mv", "Cell average", MILLIVOLT, t.cell_avg_mv.to_string()),
        sensor("cell_delta_mv", "Cell delta", MILLIVOLT, t.cell_delta_mv.to_string()),
        sensor("max_cell_index", "Highest cell", TEXT, t.max_cell_index.to_string()),
        sensor("min_cell_index", "Lowest cell", TEXT, t.min_cell_index.to_string()),
    ];
    for (index, mv) in t.cell_voltages.iter().enumerate() {
        let number = index + 1;
        sensors.push(sensor(
            format!("cell_{number}_mv"),
            format!("Cell {number}"),
            MILLIVOLT,
            mv.to_string(),
        ));
    }
    for (index, celsius) in t.temperatures.iter().enumerate() {
        let number = index + 1;
        sensors.push(sensor(
            format!("temperature_{number}"),
            format!("Temperature {number}"),
            TEMPERATURE,
            celsius.to_string(),
        ));
    }
    let flags: Vec<&str> = t.status_flags.iter().map(|flag| flag.name()).collect();
    sensors.extend([
        sensor(
            "environment_temperature",
            "Environment temperature",
            TEMPERATURE,
            t.environment_temperature.to_string(),
        ),
        sensor(
            "pcb_temperature",
            "PCB temperature",
            TEMPERATURE,
            t.pcb_temperature.to_string(),
        ),
        sensor(
            "max_temperature",
            "Highest temperature",
            TEMPERATURE,
            t.max_temperature.to_string(),
        ),
        sensor(
            "max_temperature_index",
            "Highest temperature sensor",
            TEXT,
            t.max_temperature_index.to_string(),
        ),
        sensor(
            "min_temperature",
            "Lowest temperature",
            TEMPERATURE,
            t.min_temperature.to_string(),
        ),
        sensor(
            "min_temperature_index",
            "Lowest temperature sensor",
            TEXT,
            t.min_temperature_index.to_string(),
        ),
        sensor("status_flags", "Status flags", TEXT, flags.join(",")),
        sensor("raw_flags", "Raw flags", TEXT, format!("{:014x}", t.raw_flags)),
        sensor("suspect", "Suspect reading", TEXT, t.suspect.to_string()),
        sensor("raw_frame", "Raw frame", TEXT, hex::encode(&t.raw_frame)),
    ]);
    sensors
}

/// Lowercase hex digits of a MAC address, usable in ids and topics.
pub fn mac_slug(address: &str) -> String {
    address
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn discovery_payload(sensor: &Sensor, topics: &Topics, device_id: &str) -> serde_json::Value {
    let mut config = json!({
        "name": sensor.name,
        "unique_id": format!("{device_id}_{}", sensor.field),
        "state_topic": topics.state(&sensor.field),
        "availability_topic": topics.availability(),
        "device": {
            "identifiers": [device_id],
            "name": format!("Vestwoods BMS {device_id}"),
            "manufacturer": MANUFACTURER,
            "model": MODEL,
        },
    });
    if let Some(unit) = sensor.kind.unit {
        config["unit_of_measurement"] = json!(unit);
    }
    if let Some(device_class) = sensor.kind.device_class {
        config["device_class"] = json!(device_class);
    }
    if sensor.kind.measurement {
        config["state_class"] = json!("measurement");
    }
    config
}

/// Number of sensors a record produces, i.e. state messages per publication.
pub fn sensor_count(telemetry: &Telemetry) -> usize {
    sensors(telemetry).len()
}

/// Translate a record into retained messages: discovery configs first (if
/// requested), then availability, then one state message per sensor.
pub fn build_messages(
    telemetry: &Telemetry,
    topics: &Topics,
    device_id: &str,
    include_discovery: bool,
) -> Vec<MqttMessage> {
    let sensors = sensors(telemetry);
    let mut messages = Vec::with_capacity(sensors.len() * 2 + 1);
    if include_discovery {
        messages.extend(sensors.iter().map(|sensor| {
            MqttMessage::retained(
                topics.discovery(&sensor.field),
                discovery_payload(sensor, topics, device_id).to_string(),
            )
        }));
    }
    messages.push(MqttMessage::retained(topics.availability(), ONLINE.into()));
    messages.extend(
        sensors
            .into_iter()
            .map(|sensor| MqttMessage::retained(topics.state(&sensor.field), sensor.value)),
    );
    messages
}

/// Remembers on disk which discovery configuration the broker already holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryMarker {
    fingerprint: String,
}

impl DiscoveryMarker {
    pub fn new(topics: &Topics, device_id: &str, sensor_count: usize) -> Self {
        Self {
            fingerprint: format!("{}:{device_id}:{sensor_count}", topics.prefix()),
        }
    }

    pub fn is_published(&self, path: &Path) -> bool {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim() == self.fingerprint,
            Err(_) => false,
        }
    }

    pub fn store(&self, path: &Path) -> Result<()> {
        std::fs::write(path, format!("{}\n", self.fingerprint))
            .with_context(|| format!("Cannot write discovery marker {path:?}"))
    }
}

fn generate_random_string(len: usize) -> String {
    use rand::distributions::Alphanumeric;
    use rand::Rng;

    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn default_client_id() -> String {
    format!("vestwoods-bms-{}", generate_random_string(8))
}

/// Publishes one batch of messages per connection.
pub struct MqttPublisher {
    options: MqttOptions,
    host: String,
}

impl MqttPublisher {
    pub fn new(config: &Config) -> Self {
        let client_id = default_client_id();
        let mut options = MqttOptions::new(&client_id, &config.mqtt_host, config.mqtt_port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_last_will(LastWill::new(
            Topics::new(&config.prefix).availability(),
            OFFLINE,
            QoS::AtMostOnce,
            true,
        ));
        if let Some(user) = &config.mqtt_user {
            options.set_credentials(user, config.mqtt_pass.as_deref().unwrap_or_default());
        }
        log::debug!(
            "MQTT broker {}:{} with client_id: {client_id}",
            config.mqtt_host,
            config.mqtt_port
        );
        Self {
            options,
            host: format!("{}:{}", config.mqtt_host, config.mqtt_port),
        }
    }

    /// Connect, send every message and disconnect cleanly.
    pub async fn publish(&self, messages: &[MqttMessage]) -> Result<()> {
        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), messages.len() + 1);
        for message in messages {
            log::debug!(
                "Publishing to MQTT: Topic='{}', Payload='{}'",
                message.topic,
                message.payload
            );
            client
                .try_publish(
                    &message.topic,
                    QoS::AtMostOnce,
                    message.retain,
                    message.payload.as_bytes(),
                )
                .with_context(|| format!("Failed to queue message for topic {}", message.topic))?;
        }
        client
            .try_disconnect()
            .context("Failed to queue MQTT disconnect")?;

        let drive = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => return Ok(()),
                    Ok(event) => log::trace!("MQTT event: {event:?}"),
                    Err(err) => {
                        return Err(anyhow::Error::new(err)
                            .context(format!("MQTT connection to {} failed", self.host)))
                    }
                }
            }
        };
        match tokio::time::timeout(PUBLISH_TIMEOUT, drive).await {
            Ok(result) => result?,
            Err(_) => bail!("MQTT publication to {} timed out", self.host),
        }
        log::info!("Published {} messages to {}", messages.len(), self.host);
        Ok(())
    }
}
