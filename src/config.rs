use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io::{BufRead, Write};
use std::path::Path;
use uuid::Uuid;
use vestwoods_lib::ble::{self, DiscoveredPeripheral, GattUuids, LinkSettings};

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
const ENV_PREFIX: &str = "BMS_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Substring of the BLE adapter info, first adapter if unset.
    pub adapter: Option<String>,
    /// MAC address or advertised name of the BMS.
    pub mac: String,
    pub service_uuid: Uuid,
    pub write_uuid: Uuid,
    pub notify_uuid: Uuid,
    pub mqtt_enabled: bool,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: Option<String>,
    pub mqtt_pass: Option<String>,
    pub prefix: String,
    pub poll_interval_sec: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            adapter: None,
            mac: String::new(),
            service_uuid: ble::DEFAULT_SERVICE_UUID,
            write_uuid: ble::DEFAULT_WRITE_UUID,
            notify_uuid: ble::DEFAULT_NOTIFY_UUID,
            mqtt_enabled: true,
            mqtt_host: String::new(),
            mqtt_port: Self::DEFAULT_MQTT_PORT,
            mqtt_user: None,
            mqtt_pass: None,
            prefix: Self::DEFAULT_PREFIX.into(),
            poll_interval_sec: Self::DEFAULT_POLL_INTERVAL_SEC,
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

impl Config {
    pub const DEFAULT_MQTT_PORT: u16 = 1883;
    pub const DEFAULT_PREFIX: &'static str = "vestwoods_bms";
    pub const DEFAULT_POLL_INTERVAL_SEC: u64 = 60;

    pub fn read(path: &Path) -> Result<Self> {
        log::debug!("Loading config file from {path:?}");
        let file = std::fs::File::open(path)
            .with_context(|| format!("Cannot open config file {path:?}"))?;
        let config: Self = serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("Cannot read config from file: {path:?}"))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Cannot serialize config")?;
        std::fs::write(path, json + "\n")
            .with_context(|| format!("Cannot write config file {path:?}"))?;
        log::info!("Saved config to {path:?}");
        Ok(())
    }

    /// Override fields from `BMS_<KEY>` variables looked up through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |key: &str| {
            let name = format!("{ENV_PREFIX}{}", key.to_uppercase());
            lookup(&name).map(|value| (name, value))
        };
        let uuid = |name: &str, value: &str| {
            Uuid::parse_str(value.trim()).with_context(|| format!("Invalid UUID in {name}"))
        };

        if let Some((_, value)) = var("adapter") {
            self.adapter = non_empty(value);
        }
        if let Some((_, value)) = var("mac") {
            self.mac = value.trim().to_string();
        }
        if let Some((name, value)) = var("service_uuid") {
            self.service_uuid = uuid(&name, &value)?;
        }
        if let Some((name, value)) = var("write_uuid") {
            self.write_uuid = uuid(&name, &value)?;
        }
        if let Some((name, value)) = var("notify_uuid") {
            self.notify_uuid = uuid(&name, &value)?;
        }
        if let Some((name, value)) = var("mqtt_enabled") {
            self.mqtt_enabled = match value.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => bail!("Invalid boolean in {name}: '{other}'"),
            };
        }
        if let Some((_, value)) = var("mqtt_host") {
            self.mqtt_host = value.trim().to_string();
        }
        if let Some((name, value)) = var("mqtt_port") {
            self.mqtt_port = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid port in {name}"))?;
        }
        if let Some((_, value)) = var("mqtt_user") {
            self.mqtt_user = non_empty(value);
        }
        if let Some((_, value)) = var("mqtt_pass") {
            self.mqtt_pass = (!value.is_empty()).then_some(value);
        }
        if let Some((_, value)) = var("prefix") {
            self.prefix = value.trim().to_string();
        }
        if let Some((name, value)) = var("poll_interval_sec") {
            self.poll_interval_sec = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid interval in {name}"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.mac.trim().is_empty(), "No BMS MAC address configured");
        ensure!(
            !self.mqtt_enabled || !self.mqtt_host.trim().is_empty(),
            "MQTT is enabled but no broker host is configured"
        );
        ensure!(self.mqtt_port != 0, "MQTT port must not be 0");
        ensure!(!self.prefix.is_empty(), "Topic prefix must not be empty");
        ensure!(
            !self.prefix.contains(['/', '#', '+']),
            "Topic prefix '{}' must not contain '/', '#' or '+'",
            self.prefix
        );
        ensure!(
            self.poll_interval_sec >= 1,
            "Poll interval must be at least 1 second"
        );
        Ok(())
    }

    fn redacted(&self) -> Self {
        Self {
            mqtt_pass: self.mqtt_pass.as_ref().map(|_| "***".into()),
            ..self.clone()
        }
    }

    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            adapter: self.adapter.clone(),
            target: self.mac.clone(),
            uuids: GattUuids {
                service: self.service_uuid,
                write: self.write_uuid,
                notify: self.notify_uuid,
            },
        }
    }
}

/// Line based questions on a terminal.
pub struct Prompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Prompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn ask(&mut self, question: &str) -> Result<String> {
        write!(self.output, "{question}")?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            bail!("Input closed while waiting for an answer");
        }
        Ok(line.trim().to_string())
    }

    pub fn confirm(&mut self, question: &str, default: bool) -> Result<bool> {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        loop {
            match self.ask(&format!("{question} {hint}: "))?.to_lowercase().as_str() {
                "" => return Ok(default),
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => writeln!(self.output, "Please answer 'y' or 'n'.")?,
            }
        }
    }

    /// Ask for an index into a list of `count` entries.
    pub fn choose(&mut self, question: &str, count: usize) -> Result<usize> {
        loop {
            let answer = self.ask(question)?;
            match answer.parse::<usize>() {
                Ok(index) if index < count => return Ok(index),
                _ => writeln!(self.output, "Enter a number between 0 and {}.", count - 1)?,
            }
        }
    }

    pub fn say(&mut self, line: &str) -> Result<()> {
        writeln!(self.output, "{line}")?;
        Ok(())
    }
}

fn describe(device: &DiscoveredPeripheral) -> String {
    let name = device.name.as_deref().unwrap_or("<unnamed>");
    match device.rssi {
        Some(rssi) => format!("{name} ({}) RSSI {rssi} dBm", device.address),
        None => format!("{name} ({})", device.address),
    }
}

async fn select_device<R, W, F, Fut>(prompt: &mut Prompt<R, W>, scan: F) -> Result<Option<String>>
where
    R: BufRead,
    W: Write,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<DiscoveredPeripheral>>>,
{
    prompt.say("Scanning for BLE devices...")?;
    let devices = match scan().await {
        Ok(devices) => devices,
        Err(err) => {
            log::warn!("BLE scan failed: {err:#}");
            prompt.say("Scan failed.")?;
            return Ok(None);
        }
    };
    if devices.is_empty() {
        prompt.say("No devices found.")?;
        return Ok(None);
    }
    for (index, device) in devices.iter().enumerate() {
        prompt.say(&format!("[{index}] {}", describe(device)))?;
    }
    let index = prompt.choose("Select device index: ", devices.len())?;
    Ok(Some(devices[index].address.clone()))
}

async fn ask_device<R, W, F, Fut>(prompt: &mut Prompt<R, W>, scan: F) -> Result<String>
where
    R: BufRead,
    W: Write,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<DiscoveredPeripheral>>>,
{
    if prompt.confirm("No device MAC in config. Scan for BLE device?", true)? {
        if let Some(address) = select_device(prompt, scan).await? {
            return Ok(address);
        }
    }
    loop {
        let mac = prompt.ask("Enter device MAC address (e.g. AA:BB:CC:DD:EE:FF): ")?;
        if !mac.is_empty() {
            return Ok(mac);
        }
        prompt.say("A MAC address or advertised name is required.")?;
    }
}

/// Ask for the BMS and broker settings of a fresh installation.
///
/// `scan` is only called if the user asks for a scan.
pub async fn first_run<R, W, F, Fut>(prompt: &mut Prompt<R, W>, scan: F) -> Result<Config>
where
    R: BufRead,
    W: Write,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<DiscoveredPeripheral>>>,
{
    let mut config = Config {
        mac: ask_device(prompt, scan).await?,
        ..Default::default()
    };

    config.mqtt_enabled = prompt.confirm("Enable MQTT?", false)?;
    if config.mqtt_enabled {
        prompt.say("Configure MQTT broker settings:")?;
        config.mqtt_host = prompt.ask("  Broker address (IP/hostname): ")?;
        let port = prompt.ask(&format!("  Port [{}]: ", Config::DEFAULT_MQTT_PORT))?;
        if !port.is_empty() {
            config.mqtt_port = port
                .parse()
                .with_context(|| format!("Invalid port '{port}'"))?;
        }
        config.mqtt_user = non_empty(prompt.ask("  Username (leave blank if none): ")?);
        if config.mqtt_user.is_some() {
            config.mqtt_pass = non_empty(prompt.ask("  Password (leave blank if none): ")?);
        }
    }
    Ok(config)
}

/// Fill in what a stored config lacks: everything without a file, only the
/// device when the file has no MAC.
pub async fn complete<R, W, F, Fut>(
    stored: Option<Config>,
    prompt: &mut Prompt<R, W>,
    scan: F,
) -> Result<Config>
where
    R: BufRead,
    W: Write,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<DiscoveredPeripheral>>>,
{
    match stored {
        None => first_run(prompt, scan).await,
        Some(mut config) => {
            config.mac = ask_device(prompt, scan).await?;
            Ok(config)
        }
    }
}

/// Whether neither the file nor `BMS_MAC` names the BMS.
fn needs_device(stored: Option<&Config>, env_mac: Option<&str>) -> bool {
    let in_file = stored.is_some_and(|config| !config.mac.trim().is_empty());
    let in_env = env_mac.is_some_and(|mac| !mac.trim().is_empty());
    !in_file && !in_env
}

/// Read the config file, asking on a terminal for whatever is missing, then
/// apply the environment and validate.
///
/// Only a config with a device MAC is ever written back.
pub async fn load(path: &Path, scan_time: std::time::Duration) -> Result<Config> {
    use std::io::IsTerminal;

    let stored = if path.exists() {
        Some(Config::read(path)?)
    } else {
        None
    };
    let env_mac = std::env::var(format!("{ENV_PREFIX}MAC")).ok();

    let mut config = if !needs_device(stored.as_ref(), env_mac.as_deref()) {
        stored.unwrap_or_default()
    } else if std::io::stdin().is_terminal() {
        let adapter = std::env::var(format!("{ENV_PREFIX}ADAPTER")).ok();
        let stdin = std::io::stdin();
        let mut prompt = Prompt::new(stdin.lock(), std::io::stdout());
        let config = complete(stored, &mut prompt, || async move {
            let adapter = ble::adapter(adapter.as_deref()).await?;
            Ok::<_, anyhow::Error>(ble::scan(&adapter, scan_time).await?)
        })
        .await?;
        config.save(path)?;
        config
    } else {
        log::warn!("No BMS MAC in {path:?} or {ENV_PREFIX}MAC and no terminal to ask");
        stored.unwrap_or_default()
    };

    config.apply_env(|name| std::env::var(name).ok())?;
    config.validate()?;
    log::debug!("Config: {:?}", config.redacted());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Cursor;

    fn valid() -> Config {
        Config {
            mac: "AA:BB:CC:DD:EE:FF".into(),
            mqtt_host: "broker.local".into(),
            ..Default::default()
        }
    }

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    async fn no_scan() -> Result<Vec<DiscoveredPeripheral>> {
        panic!("scan must not run")
    }

    async fn nothing_found() -> Result<Vec<DiscoveredPeripheral>> {
        Ok(Vec::new())
    }

    async fn two_devices() -> Result<Vec<DiscoveredPeripheral>> {
        Ok(vec![
            DiscoveredPeripheral {
                name: None,
                address: "11:11:11:11:11:11".into(),
                rssi: Some(-80),
            },
            DiscoveredPeripheral {
                name: Some("VW-100".into()),
                address: "22:22:22:22:22:22".into(),
                rssi: None,
            },
        ])
    }

    #[test]
    fn should_use_uart_defaults() {
        let config = Config::default();
        assert_eq!(
            config.notify_uuid.to_string(),
            "6e400003-b5a3-f393-e0a9-e50e24dcca9e"
        );
        assert_eq!(config.mqtt_port, 1883);
        assert_eq!(config.prefix, "vestwoods_bms");
        assert_eq!(config.poll_interval_sec, 60);
        assert!(config.mqtt_enabled);
    }

    #[test]
    fn should_save_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = Config {
            mqtt_user: Some("bms".into()),
            mqtt_pass: Some("secret".into()),
            ..valid()
        };

        config.save(&path).unwrap();

        assert_eq!(Config::read(&path).unwrap(), config);
    }

    #[test]
    fn should_fill_missing_keys_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"mac": "AA:BB:CC:DD:EE:FF", "mqtt_host": "10.0.0.2"}"#)
            .unwrap();

        let config = Config::read(&path).unwrap();

        assert_eq!(config.mac, "AA:BB:CC:DD:EE:FF");
        assert_eq!(config.mqtt_host, "10.0.0.2");
        assert_eq!(config.write_uuid, ble::DEFAULT_WRITE_UUID);
        assert_eq!(config.prefix, Config::DEFAULT_PREFIX);
    }

    #[test]
    fn should_reject_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(Config::read(&path).is_err());
    }

    #[test]
    fn should_prefer_environment_over_file() {
        let mut config = valid();
        config
            .apply_env(env(&[
                ("BMS_MAC", "11:22:33:44:55:66"),
                ("BMS_MQTT_PORT", "8883"),
                ("BMS_MQTT_ENABLED", "false"),
                ("BMS_PREFIX", "garage_bms"),
                ("BMS_ADAPTER", "hci1"),
            ]))
            .unwrap();

        assert_eq!(config.mac, "11:22:33:44:55:66");
        assert_eq!(config.mqtt_port, 8883);
        assert!(!config.mqtt_enabled);
        assert_eq!(config.prefix, "garage_bms");
        assert_eq!(config.adapter.as_deref(), Some("hci1"));
        assert_eq!(config.mqtt_host, "broker.local");
    }

    #[test]
    fn should_reject_invalid_environment_values() {
        let mut config = valid();
        let err = config
            .apply_env(env(&[("BMS_MQTT_PORT", "not-a-port")]))
            .unwrap_err();
        assert!(format!("{err:#}").contains("BMS_MQTT_PORT"));

        assert!(config
            .apply_env(env(&[("BMS_NOTIFY_UUID", "6e400003")]))
            .is_err());
    }

    #[test]
    fn should_validate_required_fields() {
        assert!(valid().validate().is_ok());
        assert!(Config {
            mac: String::new(),
            ..valid()
        }
        .validate()
        .is_err());
        assert!(Config {
            mqtt_host: String::new(),
            ..valid()
        }
        .validate()
        .is_err());
        assert!(Config {
            mqtt_host: String::new(),
            mqtt_enabled: false,
            ..valid()
        }
        .validate()
        .is_ok());
        assert!(Config {
            prefix: "home/bms".into(),
            ..valid()
        }
        .validate()
        .is_err());
        assert!(Config {
            poll_interval_sec: 0,
            ..valid()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn should_map_uuids_into_link_settings() {
        let settings = valid().link_settings();
        assert_eq!(settings.target, "AA:BB:CC:DD:EE:FF");
        assert_eq!(settings.uuids, GattUuids::default());
        assert_eq!(settings.adapter, None);
    }

    #[tokio::test]
    async fn should_ask_for_manual_mac_and_mqtt_settings() {
        let answers = "n\nAA:BB:CC:DD:EE:FF\ny\n192.168.1.10\n\nbms\nsecret\n";
        let mut output = Vec::new();
        let mut prompt = Prompt::new(Cursor::new(answers), &mut output);

        let config = first_run(&mut prompt, no_scan).await.unwrap();

        assert_eq!(config.mac, "AA:BB:CC:DD:EE:FF");
        assert!(config.mqtt_enabled);
        assert_eq!(config.mqtt_host, "192.168.1.10");
        assert_eq!(config.mqtt_port, 1883);
        assert_eq!(config.mqtt_user.as_deref(), Some("bms"));
        assert_eq!(config.mqtt_pass.as_deref(), Some("secret"));
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn should_select_scanned_device() {
        let answers = "\n5\n1\nn\n";
        let mut output = Vec::new();
        let mut prompt = Prompt::new(Cursor::new(answers), &mut output);

        let config = first_run(&mut prompt, two_devices).await.unwrap();

        assert_eq!(config.mac, "22:22:22:22:22:22");
        assert!(!config.mqtt_enabled);
        let output = String::from_utf8(output).unwrap();
        assert!(output.contains("[1] VW-100 (22:22:22:22:22:22)"));
        assert!(output.contains("Enter a number between 0 and 1."));
    }

    #[tokio::test]
    async fn should_fall_back_to_manual_entry_when_scan_finds_nothing() {
        let answers = "y\nVW-100\nn\n";
        let mut output = Vec::new();
        let mut prompt = Prompt::new(Cursor::new(answers), &mut output);

        let config = first_run(&mut prompt, nothing_found).await.unwrap();

        assert_eq!(config.mac, "VW-100");
    }

    #[tokio::test]
    async fn should_fail_when_input_ends() {
        let mut output = Vec::new();
        let mut prompt = Prompt::new(Cursor::new("n\n"), &mut output);

        assert!(first_run(&mut prompt, no_scan).await.is_err());
    }

    #[tokio::test]
    async fn should_ask_again_for_blank_mac() {
        let answers = "n\n\nAA:BB:CC:DD:EE:FF\nn\n";
        let mut output = Vec::new();
        let mut prompt = Prompt::new(Cursor::new(answers), &mut output);

        let config = first_run(&mut prompt, no_scan).await.unwrap();

        assert_eq!(config.mac, "AA:BB:CC:DD:EE:FF");
        let output = String::from_utf8(output).unwrap();
        assert!(output.contains("A MAC address or advertised name is required."));
    }

    #[tokio::test]
    async fn should_only_ask_for_device_when_stored_config_lacks_mac() {
        let stored = Config {
            mac: String::new(),
            mqtt_port: 8883,
            ..valid()
        };
        let mut output = Vec::new();
        let mut prompt = Prompt::new(Cursor::new("y\n0\n"), &mut output);

        let config = complete(Some(stored), &mut prompt, two_devices)
            .await
            .unwrap();

        assert_eq!(config.mac, "11:11:11:11:11:11");
        assert_eq!(config.mqtt_host, "broker.local");
        assert_eq!(config.mqtt_port, 8883);
        assert!(!String::from_utf8(output).unwrap().contains("Enable MQTT?"));
    }

    #[tokio::test]
    async fn should_run_full_first_run_without_stored_config() {
        let mut output = Vec::new();
        let mut prompt = Prompt::new(Cursor::new("n\nVW-100\nn\n"), &mut output);

        let config = complete(None, &mut prompt, no_scan).await.unwrap();

        assert_eq!(config.mac, "VW-100");
        assert!(!config.mqtt_enabled);
    }

    #[test]
    fn should_need_device_until_file_or_environment_names_one() {
        let empty = Config::default();

        assert!(needs_device(None, None));
        assert!(needs_device(Some(&empty), None));
        assert!(needs_device(Some(&empty), Some("  ")));
        assert!(!needs_device(Some(&empty), Some("VW-100")));
        assert!(!needs_device(None, Some("AA:BB:CC:DD:EE:FF")));
        assert!(!needs_device(Some(&valid()), None));
    }
}
