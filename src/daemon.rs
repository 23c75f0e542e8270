use log::{error, info, warn};
use serde_json::json;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;
use vestwoods_lib::ble;
use vestwoods_lib::protocol;
use vestwoods_lib::telemetry::Telemetry;

use crate::config::Config;
use crate::mqtt::{self, DiscoveryMarker, MqttPublisher, Topics};

/// Why a poll cycle failed.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("BLE poll failed")]
    Ble(#[from] ble::Error),
    #[error("cannot decode status response")]
    Decode(#[from] vestwoods_lib::Error),
    #[error("MQTT publication failed")]
    Mqtt(#[source] anyhow::Error),
    #[error("configuration error")]
    Config(#[source] anyhow::Error),
}

impl CycleError {
    pub fn exit_code(&self) -> u8 {
        match self {
            CycleError::Ble(ble::Error::Frame(_)) => 2,
            CycleError::Ble(_) => 1,
            CycleError::Decode(_) => 2,
            CycleError::Mqtt(_) => 3,
            CycleError::Config(_) => 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Options {
    pub timeout: Duration,
    pub console: bool,
    pub json: bool,
    pub discovery_marker: PathBuf,
}

/// Id of the BMS in topics and discovery configs.
///
/// Some platforms hide the peripheral address, then the configured MAC is used.
fn device_id(address: &str, configured: &str) -> String {
    let slug = mqtt::mac_slug(address);
    if slug.is_empty() || slug.chars().all(|c| c == '0') {
        mqtt::mac_slug(configured)
    } else {
        slug
    }
}

fn render_console(t: &Telemetry, timestamp: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "--- Data at {timestamp} ---");
    let _ = writeln!(
        out,
        "Pack: {:.2} V, {:.2} A, SOC {:.2} %, SOH {:.2} %",
        t.pack_voltage, t.pack_current, t.soc_percent, t.soh_percent
    );
    let _ = writeln!(
        out,
        "Capacity: {:.2} / {:.2} Ah (nominal {:.2} Ah), cycles {}",
        t.remaining_capacity_ah, t.full_capacity_ah, t.nominal_capacity_ah, t.cycle_count
    );
    let _ = writeln!(
        out,
        "Cells ({}): {:?} mV, min {} max {} avg {} delta {}",
        t.cell_count,
        t.cell_voltages,
        t.cell_min_mv,
        t.cell_max_mv,
        t.cell_avg_mv,
        t.cell_delta_mv
    );
    let _ = writeln!(
        out,
        "Extremes: cell #{} high, cell #{} low, sensor #{} {} °C high, sensor #{} {} °C low",
        t.max_cell_index,
        t.min_cell_index,
        t.max_temperature_index,
        t.max_temperature,
        t.min_temperature_index,
        t.min_temperature
    );
    if t.cell_balancing.iter().any(|b| *b) {
        let _ = writeln!(out, "Balancing: {:?}", t.cell_balancing);
    }
    let _ = writeln!(
        out,
        "Temperatures: {:?} °C, environment {} °C, PCB {} °C",
        t.temperatures, t.environment_temperature, t.pcb_temperature
    );
    let flags: Vec<String> = t.status_flags.iter().map(ToString::to_string).collect();
    let _ = writeln!(out, "Flags: {}", flags.join(", "));
    if t.unknown_flags() != 0 {
        let _ = writeln!(out, "Unknown flags: {:#016x}", t.unknown_flags());
    }
    for violation in &t.range_violations {
        let _ = writeln!(out, "Suspect: {violation}");
    }
    out.push_str("--------------------------");
    out
}

/// Owns the configuration and the per-process discovery state.
pub struct Daemon {
    config: Config,
    options: Options,
    discovery_sent: bool,
}

impl Daemon {
    pub fn new(config: Config, options: Options) -> Self {
        Self {
            config,
            options,
            discovery_sent: false,
        }
    }

    fn console_output(&self) -> bool {
        self.options.console || self.options.json || !self.config.mqtt_enabled
    }

    /// Poll the BMS once and deliver the record.
    pub async fn run_cycle(&mut self) -> Result<(), CycleError> {
        let settings = self.config.link_settings();
        info!("Polling BMS {}", settings.target);
        let polled = ble::poll(
            &settings,
            &protocol::encode_status_request(),
            self.options.timeout,
        )
        .await?;
        let telemetry = Telemetry::from_frame(&polled.frame)?;
        if telemetry.suspect {
            warn!(
                "Reading marked suspect ({} values out of range)",
                telemetry.range_violations.len()
            );
        }

        if self.console_output() {
            self.print(&telemetry);
            return Ok(());
        }
        self.publish(&polled.address, &telemetry)
            .await
            .map_err(CycleError::Mqtt)
    }

    fn print(&self, telemetry: &Telemetry) {
        let timestamp = chrono::Local::now().to_rfc3339();
        if !self.options.json {
            println!("{}", render_console(telemetry, &timestamp));
            return;
        }
        let document = json!({ "timestamp": timestamp, "telemetry": telemetry });
        match serde_json::to_string_pretty(&document) {
            Ok(json) => println!("{json}"),
            Err(e) => error!("Failed to serialize telemetry to JSON: {e}"),
        }
    }

    async fn publish(&mut self, address: &str, telemetry: &Telemetry) -> anyhow::Result<()> {
        let topics = Topics::new(&self.config.prefix);
        let device_id = device_id(address, &self.config.mac);
        let marker = DiscoveryMarker::new(&topics, &device_id, mqtt::sensor_count(telemetry));
        let include_discovery =
            !self.discovery_sent && !marker.is_published(&self.options.discovery_marker);

        let messages = mqtt::build_messages(telemetry, &topics, &device_id, include_discovery);
        MqttPublisher::new(&self.config).publish(&messages).await?;

        if include_discovery {
            info!("Published Home Assistant discovery for {device_id}");
            if let Err(e) = marker.store(&self.options.discovery_marker) {
                warn!("{e:#}");
            }
        }
        self.discovery_sent = true;
        Ok(())
    }

    /// Run one cycle, or with `repeat` keep polling every `poll_interval_sec`.
    pub async fn run(mut self, repeat: bool) -> Result<(), CycleError> {
        if !repeat {
            return self.run_cycle().await;
        }
        let interval = Duration::from_secs(self.config.poll_interval_sec);
        info!("Starting daemon mode: interval={interval:?}");
        loop {
            if let Err(err) = self.run_cycle().await {
                let code = err.exit_code();
                error!("Poll cycle failed (code {code}): {:#}", anyhow::Error::new(err));
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS_FRAME_HEX: &str = include_str!("../tests/fixtures/status_16s.hex");

    fn telemetry() -> Telemetry {
        let raw = hex::decode(STATUS_FRAME_HEX.trim()).unwrap();
        Telemetry::from_frame(&protocol::decode(&raw).unwrap()).unwrap()
    }

    #[test]
    fn should_map_errors_to_exit_codes() {
        assert_eq!(CycleError::Ble(ble::Error::Timeout(Duration::from_secs(20))).exit_code(), 1);
        assert_eq!(CycleError::Ble(ble::Error::NotFound("VW".into())).exit_code(), 1);
        assert_eq!(
            CycleError::Ble(ble::Error::Frame(vestwoods_lib::Error::Checksum {
                calculated: 1,
                received: 2
            }))
            .exit_code(),
            2
        );
        assert_eq!(CycleError::Decode(vestwoods_lib::Error::EmptyCellArray).exit_code(), 2);
        assert_eq!(CycleError::Mqtt(anyhow::anyhow!("refused")).exit_code(), 3);
        assert_eq!(CycleError::Config(anyhow::anyhow!("no mac")).exit_code(), 4);
    }

    #[test]
    fn should_keep_error_chain() {
        let err = anyhow::Error::new(CycleError::Ble(ble::Error::Timeout(Duration::from_secs(
            20,
        ))));
        assert_eq!(format!("{err:#}"), "BLE poll failed: no complete frame within 20s");
    }

    #[test]
    fn should_prefer_peripheral_address_for_device_id() {
        assert_eq!(
            device_id("AA:BB:CC:DD:EE:FF", "11:22:33:44:55:66"),
            "aabbccddeeff"
        );
        assert_eq!(
            device_id("00:00:00:00:00:00", "11:22:33:44:55:66"),
            "112233445566"
        );
    }

    #[test]
    fn should_render_console_summary() {
        let text = render_console(&telemetry(), "2024-01-01T00:00:00+00:00");

        assert!(text.starts_with("--- Data at 2024-01-01T00:00:00+00:00 ---"));
        assert!(text.contains("Pack: 53.20 V, -3.50 A, SOC 87.00 %"));
        assert!(text.contains("Cells (16):"));
        assert!(text.contains("Extremes: cell #7 high, cell #9 low, sensor #2 26 °C high"));
        assert!(text.contains("Flags: Discharging"));
        assert!(!text.contains("Suspect"));
    }

    #[test]
    fn should_fall_back_to_console_without_mqtt() {
        let daemon = Daemon::new(
            Config {
                mqtt_enabled: false,
                ..Default::default()
            },
            Options {
                timeout: Duration::from_secs(1),
                console: false,
                json: false,
                discovery_marker: PathBuf::from(mqtt::DEFAULT_DISCOVERY_MARKER),
            },
        );
        assert!(daemon.console_output());
    }
}
