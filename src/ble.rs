//! Provides an asynchronous BLE transport for a Vestwoods BMS using `btleplug`.
//!
//! The BMS exposes a UART-like GATT service: requests are written to one
//! characteristic and responses arrive as notifications on another, split
//! into MTU-sized fragments. [`exchange`] feeds every fragment into
//! [`protocol::decode`] until a complete frame appears or the deadline passes.
//! The transport knows nothing about payload semantics.
//!
//! # Example
//!
//! ```no_run
//! use vestwoods_lib::{ble, protocol, telemetry::Telemetry};
//! use std::time::Duration;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = ble::LinkSettings::new("AA:BB:CC:DD:EE:FF");
//!     let polled = ble::poll(&settings, &protocol::encode_status_request(), Duration::from_secs(20)).await?;
//!     let telemetry = Telemetry::from_frame(&polled.frame)?;
//!     println!("SOC: {}%", telemetry.soc_percent);
//!     Ok(())
//! }
//! ```

use crate::protocol::{self, Frame};
use btleplug::api::{
    Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::Instant;
use tokio_stream::{Stream, StreamExt as _};
use uuid::Uuid;

pub const DEFAULT_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e40_0000_b5a3_f393_e0a9_e50e_24dc_ca9e);
pub const DEFAULT_WRITE_UUID: Uuid = Uuid::from_u128(0x6e40_0002_b5a3_f393_e0a9_e50e_24dc_ca9e);
pub const DEFAULT_NOTIFY_UUID: Uuid = Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e_24dc_ca9e);

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);
const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors of the BLE transport.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no BLE adapter available")]
    NoAdapter,
    #[error("BMS '{0}' not found")]
    NotFound(String),
    #[error("cannot connect to BMS")]
    Connect(#[source] btleplug::Error),
    #[error("GATT service {0} not found")]
    ServiceNotFound(Uuid),
    #[error("no {kind} characteristic in service {service}")]
    CharacteristicNotFound { kind: &'static str, service: Uuid },
    #[error("BLE I/O error")]
    Io(#[from] btleplug::Error),
    #[error("notification stream ended before a complete frame arrived")]
    StreamClosed,
    #[error("no complete frame within {0:?}")]
    Timeout(Duration),
    #[error("invalid response frame")]
    Frame(#[from] crate::Error),
}

/// A specialized `Result` type for the BLE transport.
pub type Result<T> = std::result::Result<T, Error>;

/// Notification payloads of the response characteristic, in delivery order.
pub type Notifications = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// GATT UUIDs of the BMS UART service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattUuids {
    pub service: Uuid,
    pub write: Uuid,
    pub notify: Uuid,
}

impl Default for GattUuids {
    fn default() -> Self {
        Self {
            service: DEFAULT_SERVICE_UUID,
            write: DEFAULT_WRITE_UUID,
            notify: DEFAULT_NOTIFY_UUID,
        }
    }
}

/// The GATT operations one request/response exchange needs.
#[allow(async_fn_in_trait)]
pub trait GattLink {
    async fn connect(&mut self) -> Result<()>;
    /// Resolve the service and both characteristics.
    async fn discover(&mut self) -> Result<()>;
    async fn subscribe(&mut self) -> Result<Notifications>;
    async fn write_request(&mut self, request: &[u8]) -> Result<()>;
    async fn unsubscribe(&mut self) -> Result<()>;
    async fn disconnect(&mut self) -> Result<()>;
}

async fn exchange_inner<L: GattLink>(link: &mut L, request: &[u8]) -> Result<Frame> {
    link.connect().await?;
    link.discover().await?;
    let mut notifications = link.subscribe().await?;

    log::trace!("write bytes: {request:02X?}");
    link.write_request(request).await?;

    let mut rx_buffer = Vec::new();
    while let Some(fragment) = notifications.next().await {
        log::trace!("notification: {}", hex::encode(&fragment));
        rx_buffer.extend_from_slice(&fragment);
        match protocol::decode(&rx_buffer) {
            Ok(frame) => {
                log::debug!("received frame: {}", hex::encode(&frame.raw));
                return Ok(frame);
            }
            Err(crate::Error::Incomplete) => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Err(Error::StreamClosed)
}

async fn release<L: GattLink>(link: &mut L) {
    match tokio::time::timeout(RELEASE_TIMEOUT, link.unsubscribe()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => log::warn!("Failed to unsubscribe: {err}"),
        Err(_) => log::warn!("Unsubscribe timed out"),
    }
    match tokio::time::timeout(RELEASE_TIMEOUT, link.disconnect()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => log::warn!("Failed to disconnect: {err}"),
        Err(_) => log::warn!("Disconnect timed out"),
    }
}

/// Send `request` and wait for the first complete response frame.
///
/// The whole exchange, connection included, is bounded by `deadline`.
/// Unsubscribe and disconnect run on every exit path.
pub async fn exchange<L: GattLink>(
    link: &mut L,
    request: &[u8],
    deadline: Duration,
) -> Result<Frame> {
    let outcome = match tokio::time::timeout(deadline, exchange_inner(link, request)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            log::warn!("No complete frame within {deadline:?}");
            Err(Error::Timeout(deadline))
        }
    };
    release(link).await;
    outcome
}

/// Pick the configured characteristic, else the first one of `service`
/// offering one of the `fallback` properties.
fn select_characteristic(
    characteristics: &BTreeSet<Characteristic>,
    service: Uuid,
    preferred: Uuid,
    fallback: CharPropFlags,
) -> Option<Characteristic> {
    characteristics
        .iter()
        .find(|c| c.uuid == preferred)
        .or_else(|| {
            characteristics
                .iter()
                .find(|c| c.service_uuid == service && c.properties.intersects(fallback))
        })
        .cloned()
}

/// [`GattLink`] over a `btleplug` peripheral.
pub struct PeripheralLink {
    peripheral: Peripheral,
    uuids: GattUuids,
    write: Option<Characteristic>,
    notify: Option<Characteristic>,
    subscribed: bool,
}

impl PeripheralLink {
    pub fn new(peripheral: Peripheral, uuids: GattUuids) -> Self {
        Self {
            peripheral,
            uuids,
            write: None,
            notify: None,
            subscribed: false,
        }
    }

    fn missing(&self, kind: &'static str) -> Error {
        Error::CharacteristicNotFound {
            kind,
            service: self.uuids.service,
        }
    }
}

impl GattLink for PeripheralLink {
    async fn connect(&mut self) -> Result<()> {
        log::debug!("Connecting to {}", self.peripheral.address());
        self.peripheral.connect().await.map_err(Error::Connect)
    }

    async fn discover(&mut self) -> Result<()> {
        self.peripheral.discover_services().await?;
        let service = self.uuids.service;
        if !self.peripheral.services().iter().any(|s| s.uuid == service) {
            return Err(Error::ServiceNotFound(service));
        }

        let characteristics = self.peripheral.characteristics();
        let write = select_characteristic(
            &characteristics,
            service,
            self.uuids.write,
            CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE,
        )
        .ok_or_else(|| self.missing("write"))?;
        let notify = select_characteristic(
            &characteristics,
            service,
            self.uuids.notify,
            CharPropFlags::NOTIFY,
        )
        .ok_or_else(|| self.missing("notify"))?;

        log::debug!("TX: {}, RX: {}", write.uuid, notify.uuid);
        self.write = Some(write);
        self.notify = Some(notify);
        Ok(())
    }

    async fn subscribe(&mut self) -> Result<Notifications> {
        let notify = self.notify.clone().ok_or_else(|| self.missing("notify"))?;
        let stream = self.peripheral.notifications().await?;
        self.peripheral.subscribe(&notify).await?;
        self.subscribed = true;

        let uuid = notify.uuid;
        Ok(Box::pin(stream.filter_map(move |notification| {
            (notification.uuid == uuid).then_some(notification.value)
        })))
    }

    async fn write_request(&mut self, request: &[u8]) -> Result<()> {
        let write = self.write.as_ref().ok_or_else(|| self.missing("write"))?;
        let write_type = if write
            .properties
            .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE)
        {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };
        self.peripheral.write(write, request, write_type).await?;
        Ok(())
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        if !self.subscribed {
            return Ok(());
        }
        self.subscribed = false;
        if let Some(notify) = &self.notify {
            self.peripheral.unsubscribe(notify).await?;
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

/// Where to find the BMS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    /// Substring of the adapter info (e.g. `hci0`); first adapter if `None`.
    pub adapter: Option<String>,
    /// MAC address or advertised local name.
    pub target: String,
    pub uuids: GattUuids,
}

impl LinkSettings {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            adapter: None,
            target: target.into(),
            uuids: GattUuids::default(),
        }
    }
}

/// A BLE peripheral seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeripheral {
    pub name: Option<String>,
    pub address: String,
    pub rssi: Option<i16>,
}

/// Open the adapter whose info string contains `identifier`, or the first one.
pub async fn adapter(identifier: Option<&str>) -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    let Some(identifier) = identifier else {
        return adapters.into_iter().next().ok_or(Error::NoAdapter);
    };
    for adapter in adapters {
        let info = adapter.adapter_info().await?;
        log::trace!("Found adapter {info}");
        if info.contains(identifier) {
            return Ok(adapter);
        }
    }
    Err(Error::NoAdapter)
}

/// Whether a peripheral with `address` and `name` is the configured target.
pub fn matches_target(target: &str, address: &str, name: Option<&str>) -> bool {
    address.eq_ignore_ascii_case(target) || name.is_some_and(|name| name == target)
}

async fn matching_peripheral(adapter: &Adapter, target: &str) -> Result<Option<Peripheral>> {
    for peripheral in adapter.peripherals().await? {
        let address = peripheral.address().to_string();
        let name = peripheral
            .properties()
            .await?
            .and_then(|props| props.local_name);
        if matches_target(target, &address, name.as_deref()) {
            log::debug!("Found BMS {address} ({name:?})");
            return Ok(Some(peripheral));
        }
    }
    Ok(None)
}

/// Starting and stopping discovery on an adapter.
#[allow(async_fn_in_trait)]
pub trait ScanControl {
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
}

impl ScanControl for Adapter {
    async fn start(&self) -> Result<()> {
        self.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stop_scan().await?;
        Ok(())
    }
}

/// Run `work` while the adapter scans. The scan is stopped on every exit
/// path of `work`, so `work` must carry its own deadline.
async fn with_scan<S, T>(scanner: &S, work: impl Future<Output = Result<T>>) -> Result<T>
where
    S: ScanControl,
{
    scanner.start().await?;
    let outcome = work.await;
    match tokio::time::timeout(RELEASE_TIMEOUT, scanner.stop()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => log::warn!("Failed to stop scan: {err}"),
        Err(_) => log::warn!("Stopping the scan timed out"),
    }
    outcome
}

/// Scan until a peripheral matching `target` shows up or `timeout` passes.
pub async fn find_peripheral(
    adapter: &Adapter,
    target: &str,
    timeout: Duration,
) -> Result<Peripheral> {
    let search = async {
        loop {
            if let Some(peripheral) = matching_peripheral(adapter, target).await? {
                return Ok::<_, Error>(peripheral);
            }
            tokio::time::sleep(SCAN_POLL_INTERVAL).await;
        }
    };
    with_scan(adapter, async {
        tokio::time::timeout(timeout, search)
            .await
            .map_err(|_| Error::NotFound(target.to_string()))?
    })
    .await
}

/// List the peripherals advertising within `duration`.
pub async fn scan(adapter: &Adapter, duration: Duration) -> Result<Vec<DiscoveredPeripheral>> {
    with_scan(adapter, async {
        tokio::time::sleep(duration).await;

        let mut devices = Vec::new();
        for peripheral in adapter.peripherals().await? {
            let props = peripheral.properties().await?;
            devices.push(DiscoveredPeripheral {
                name: props.as_ref().and_then(|props| props.local_name.clone()),
                address: peripheral.address().to_string(),
                rssi: props.and_then(|props| props.rssi),
            });
        }
        Ok(devices)
    })
    .await
}

/// The outcome of one poll.
#[derive(Debug, Clone)]
pub struct Polled {
    /// Address reported by the platform for the peripheral.
    pub address: String,
    pub frame: Frame,
}

/// Find the BMS, send `request` and return the first complete response.
///
/// Discovery, connection and the exchange share one `deadline`.
pub async fn poll(settings: &LinkSettings, request: &[u8], deadline: Duration) -> Result<Polled> {
    let started = Instant::now();
    let adapter = tokio::time::timeout(deadline, adapter(settings.adapter.as_deref()))
        .await
        .map_err(|_| Error::NotFound(settings.target.clone()))??;
    let remaining = deadline.saturating_sub(started.elapsed());
    let peripheral = find_peripheral(&adapter, &settings.target, remaining).await?;

    let address = peripheral.address().to_string();
    let remaining = deadline.saturating_sub(started.elapsed());
    let mut link = PeripheralLink::new(peripheral, settings.uuids);
    let frame = exchange(&mut link, request, remaining).await?;
    Ok(Polled { address, frame })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS_FRAME_HEX: &str = include_str!("../tests/fixtures/status_16s.hex");

    fn status_frame() -> Vec<u8> {
        hex::decode(STATUS_FRAME_HEX.trim()).unwrap()
    }

    #[derive(Default)]
    struct ScriptedLink {
        fragments: Vec<Vec<u8>>,
        never_finish: bool,
        fail_connect: bool,
        written: Vec<u8>,
        calls: Vec<&'static str>,
    }

    impl ScriptedLink {
        fn delivering(fragments: Vec<Vec<u8>>) -> Self {
            Self {
                fragments,
                ..Default::default()
            }
        }
    }

    impl GattLink for ScriptedLink {
        async fn connect(&mut self) -> Result<()> {
            self.calls.push("connect");
            if self.fail_connect {
                return Err(Error::Connect(btleplug::Error::DeviceNotFound));
            }
            Ok(())
        }

        async fn discover(&mut self) -> Result<()> {
            self.calls.push("discover");
            Ok(())
        }

        async fn subscribe(&mut self) -> Result<Notifications> {
            self.calls.push("subscribe");
            let fragments = tokio_stream::iter(std::mem::take(&mut self.fragments));
            if self.never_finish {
                Ok(Box::pin(fragments.chain(tokio_stream::pending())))
            } else {
                Ok(Box::pin(fragments))
            }
        }

        async fn write_request(&mut self, request: &[u8]) -> Result<()> {
            self.calls.push("write");
            self.written = request.to_vec();
            Ok(())
        }

        async fn unsubscribe(&mut self) -> Result<()> {
            self.calls.push("unsubscribe");
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.calls.push("disconnect");
            Ok(())
        }
    }

    #[tokio::test]
    async fn should_reassemble_fragmented_frame() {
        let frame = status_frame();
        let fragments: Vec<Vec<u8>> = frame.chunks(20).map(<[u8]>::to_vec).collect();
        let mut link = ScriptedLink::delivering(fragments);

        let received = exchange(
            &mut link,
            &protocol::encode_status_request(),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert_eq!(received.raw, frame);
        assert_eq!(link.written, protocol::encode_status_request());
        assert_eq!(
            link.calls,
            vec!["connect", "discover", "subscribe", "write", "unsubscribe", "disconnect"]
        );
    }

    #[tokio::test]
    async fn should_time_out_and_release_when_end_marker_never_arrives() {
        let frame = status_frame();
        let fragments: Vec<Vec<u8>> = frame[..frame.len() - 1]
            .chunks(20)
            .map(<[u8]>::to_vec)
            .collect();
        let mut link = ScriptedLink {
            never_finish: true,
            ..ScriptedLink::delivering(fragments)
        };

        let deadline = Duration::from_millis(50);
        let err = exchange(&mut link, &protocol::encode_status_request(), deadline)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout(d) if d == deadline));
        assert!(link.calls.ends_with(&["unsubscribe", "disconnect"]));
    }

    #[tokio::test]
    async fn should_release_after_connect_failure() {
        let mut link = ScriptedLink {
            fail_connect: true,
            ..Default::default()
        };

        let err = exchange(&mut link, &[], Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Connect(_)));
        assert_eq!(link.calls, vec!["connect", "unsubscribe", "disconnect"]);
    }

    #[tokio::test]
    async fn should_complete_with_checksum_error() {
        let mut frame = status_frame();
        let penultimate = frame.len() - 2;
        frame[penultimate] ^= 0xff;
        let mut link = ScriptedLink::delivering(vec![frame]);

        let err = exchange(&mut link, &[], Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Frame(crate::Error::Checksum { .. })));
        assert!(link.calls.ends_with(&["unsubscribe", "disconnect"]));
    }

    #[tokio::test]
    async fn should_report_closed_notification_stream() {
        let frame = status_frame();
        let mut link = ScriptedLink::delivering(vec![frame[..40].to_vec()]);

        let err = exchange(&mut link, &[], Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::StreamClosed));
    }

    #[derive(Default)]
    struct RecordingScanner {
        fail_start: bool,
        fail_stop: bool,
        calls: std::cell::RefCell<Vec<&'static str>>,
    }

    impl ScanControl for RecordingScanner {
        async fn start(&self) -> Result<()> {
            self.calls.borrow_mut().push("start");
            if self.fail_start {
                return Err(Error::NoAdapter);
            }
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            self.calls.borrow_mut().push("stop");
            if self.fail_stop {
                return Err(Error::Io(btleplug::Error::NotConnected));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn should_stop_scan_when_search_times_out() {
        let scanner = RecordingScanner::default();

        let err = with_scan(&scanner, async {
            tokio::time::timeout(
                Duration::from_millis(20),
                std::future::pending::<Result<()>>(),
            )
            .await
            .map_err(|_| Error::NotFound("VW-100".into()))?
        })
        .await
        .unwrap_err();

        assert!(matches!(err, Error::NotFound(target) if target == "VW-100"));
        assert_eq!(*scanner.calls.borrow(), vec!["start", "stop"]);
    }

    #[tokio::test]
    async fn should_stop_scan_after_failed_listing() {
        let scanner = RecordingScanner::default();

        let err = with_scan(&scanner, async {
            Err::<Vec<DiscoveredPeripheral>, _>(Error::Io(btleplug::Error::DeviceNotFound))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Io(_)));
        assert_eq!(*scanner.calls.borrow(), vec!["start", "stop"]);
    }

    #[tokio::test]
    async fn should_keep_result_when_stop_fails() {
        let scanner = RecordingScanner {
            fail_stop: true,
            ..Default::default()
        };

        let found = with_scan(&scanner, async { Ok(3) }).await.unwrap();

        assert_eq!(found, 3);
        assert_eq!(*scanner.calls.borrow(), vec!["start", "stop"]);
    }

    #[tokio::test]
    async fn should_skip_work_when_scan_cannot_start() {
        let scanner = RecordingScanner {
            fail_start: true,
            ..Default::default()
        };

        let ran = std::cell::Cell::new(false);

        let err = with_scan(&scanner, async {
            ran.set(true);
            Ok(())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, Error::NoAdapter));
        assert!(!ran.get());
        assert_eq!(*scanner.calls.borrow(), vec!["start"]);
    }

    fn characteristic(uuid: u128, service: Uuid, properties: CharPropFlags) -> Characteristic {
        Characteristic {
            uuid: Uuid::from_u128(uuid),
            service_uuid: service,
            properties,
            descriptors: BTreeSet::new(),
        }
    }

    const OTHER_SERVICE: Uuid = Uuid::from_u128(0x180f);

    #[test]
    fn should_prefer_configured_characteristic() {
        let uuids = GattUuids::default();
        let characteristics = BTreeSet::from([
            characteristic(0xaaaa, uuids.service, CharPropFlags::NOTIFY),
            characteristic(
                uuids.notify.as_u128(),
                uuids.service,
                CharPropFlags::NOTIFY,
            ),
        ]);

        let selected = select_characteristic(
            &characteristics,
            uuids.service,
            uuids.notify,
            CharPropFlags::NOTIFY,
        )
        .unwrap();

        assert_eq!(selected.uuid, uuids.notify);
    }

    #[test]
    fn should_fall_back_to_characteristic_with_matching_properties() {
        let uuids = GattUuids::default();
        let characteristics = BTreeSet::from([
            characteristic(0xfff1, uuids.service, CharPropFlags::READ),
            characteristic(0xfff2, uuids.service, CharPropFlags::WRITE_WITHOUT_RESPONSE),
            characteristic(0xfff3, uuids.service, CharPropFlags::NOTIFY),
        ]);
        let write_flags = CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE;

        let write =
            select_characteristic(&characteristics, uuids.service, uuids.write, write_flags)
                .unwrap();
        let notify = select_characteristic(
            &characteristics,
            uuids.service,
            uuids.notify,
            CharPropFlags::NOTIFY,
        )
        .unwrap();

        assert_eq!(write.uuid, Uuid::from_u128(0xfff2));
        assert_eq!(notify.uuid, Uuid::from_u128(0xfff3));
    }

    #[test]
    fn should_ignore_characteristics_of_other_services() {
        let uuids = GattUuids::default();
        let characteristics = BTreeSet::from([
            characteristic(0x2a19, OTHER_SERVICE, CharPropFlags::NOTIFY),
            characteristic(0xfff1, uuids.service, CharPropFlags::READ),
        ]);

        let selected = select_characteristic(
            &characteristics,
            uuids.service,
            uuids.notify,
            CharPropFlags::NOTIFY,
        );

        assert!(selected.is_none());
    }

    #[test]
    fn should_match_target_by_address_ignoring_case() {
        assert!(matches_target("aa:bb:cc:dd:ee:ff", "AA:BB:CC:DD:EE:FF", None));
        assert!(!matches_target("AA:BB:CC:DD:EE:00", "AA:BB:CC:DD:EE:FF", None));
    }

    #[test]
    fn should_match_target_by_name() {
        assert!(matches_target("VW-100", "00:00:00:00:00:00", Some("VW-100")));
        assert!(!matches_target("VW-100", "00:00:00:00:00:00", Some("VW-200")));
    }

    #[test]
    fn should_default_to_uart_service_uuids() {
        let uuids = GattUuids::default();
        assert_eq!(
            uuids.service.to_string(),
            "6e400000-b5a3-f393-e0a9-e50e24dcca9e"
        );
        assert_eq!(uuids.write.to_string(), "6e400002-b5a3-f393-e0a9-e50e24dcca9e");
        assert_eq!(
            uuids.notify.to_string(),
            "6e400003-b5a3-f393-e0a9-e50e24dcca9e"
        );
    }
}
