use core::convert::TryInto;
use std::{
    cell::RefCell,
    net::Ipv4Addr,
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use chrono::{Datelike, NaiveDateTime, Utc};
use chrono_tz::Tz;
use embedded_hal_bus::i2c::RefCellDevice;
use embedded_svc::{
    http::{client::Client as HttpClient, Headers, Method, Status},
    io::{Read, Write},
    mqtt::client::QoS,
    wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::Ets,
    gpio::PinDriver,
    i2c::{config::Config as I2cConfig, I2cDriver},
    prelude::*,
    spi::{
        config::{Config as SpiConfig, DriverConfig as SpiDriverConfig, MODE_0},
        SpiDeviceDriver,
    },
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::prelude::Peripherals,
    http::{
        client::{Configuration as HttpClientConfiguration, EspHttpConnection},
        server::{Configuration as HttpConfiguration, EspHttpServer},
    },
    ipv4::{Configuration as IpConfiguration, Mask, RouterConfiguration, Subnet},
    log::EspLogger,
    mqtt::client::{EspMqttClient, EventPayload, MqttClientConfiguration},
    netif::{EspNetif, NetifConfiguration},
    nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault},
    ota::EspOta,
    sntp::{EspSntp, SntpConf, SyncStatus},
    wifi::{config::ScanConfig, EspWifi},
};
use log::{error, info, warn};
use mipidsi::{
    interface::SpiInterface,
    models::ILI9342CRgb565,
    options::{ColorInversion, ColorOrder},
    Builder,
};
use serde::Serialize;
use sha2::{Digest, Sha256};

use co2_common::{
    access_point_name,
    credentials::{AuthMode, Bssid, Candidate, ScanResult},
    error::{DeviceError, PortalError, StoreError, SyncError},
    firmware::{check_complete, firmware_url, parse_manifest, version_url, FirmwareSource},
    link::{BrokerClient, PortalEvent, ProvisioningResult, Provisioner, ScanPoll, WifiRadio},
    storage::{self, KeyValueStore, StoreKey},
    sync::Clock,
    Board, BrokerConfig, Device, WifiStatus,
};

use crate::{
    core2::{Axp192, Ft6336},
    form::{PortalSubmission, ProvisionResponse, CAPTIVE_PATHS, MAX_FORM_BODY, PORTAL_HTML},
    scd30::Scd30,
};

const NVS_NAMESPACE: &str = "co2";
const NVS_VALUE_SIZE: usize = 4096;

const WATCHDOG_TIMEOUT_SEC: u32 = 90;
const OTA_CHUNK_SIZE: usize = 4096;
const MANIFEST_MAX_SIZE: usize = 1024;
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const MQTT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const MQTT_KEEP_ALIVE: Duration = Duration::from_secs(15);
const NTP_TIMEOUT: Duration = Duration::from_secs(10);
const EARLIEST_VALID_YEAR: i32 = 2021;

const PORTAL_GATEWAY: Ipv4Addr = Ipv4Addr::new(192, 168, 100, 1);
const PORTAL_CHANNEL: u8 = 1;
const PORTAL_MAX_CLIENTS: u16 = 4;

const SCREEN_WIDTH: u16 = 320;
const SCREEN_HEIGHT: u16 = 240;

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let mut store = NvsStore::new(nvs_partition.clone())?;

    let runtime = storage::load_runtime(&mut store).unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err}");
        Default::default()
    });
    let timezone: Tz = runtime.timezone.parse().unwrap_or_else(|_| {
        warn!("unknown time zone `{}`, using UTC", runtime.timezone);
        Tz::UTC
    });

    let Peripherals {
        modem,
        pins,
        i2c0,
        i2c1,
        spi2,
        ..
    } = Peripherals::take()?;

    // AXP192 and the touch panel share the internal bus.
    let internal = I2cDriver::new(
        i2c1,
        pins.gpio21,
        pins.gpio22,
        &I2cConfig::new().baudrate(400.kHz().into()),
    )
    .context("failed to init internal I2C")?;
    let internal: &'static RefCell<I2cDriver<'static>> = Box::leak(Box::new(RefCell::new(internal)));

    let mut pmu = Axp192::new(RefCellDevice::new(internal));
    pmu.init()
        .map_err(|err| anyhow!("AXP192 init failed: {err:?}"))?;
    pmu.reset_lcd(&mut Ets)
        .map_err(|err| anyhow!("LCD reset failed: {err:?}"))?;
    let mut touch = Ft6336::new(RefCellDevice::new(internal));

    let scd30_bus = I2cDriver::new(
        i2c0,
        pins.gpio32,
        pins.gpio33,
        &I2cConfig::new().baudrate(100.kHz().into()),
    )
    .context("failed to init sensor I2C")?;

    let spi = SpiDeviceDriver::new_single(
        spi2,
        pins.gpio18,
        pins.gpio23,
        Some(pins.gpio38),
        Some(pins.gpio5),
        &SpiDriverConfig::new(),
        &SpiConfig::new().baudrate(40.MHz().into()).data_mode(MODE_0),
    )
    .context("failed to init LCD SPI")?;
    let lcd_dc = PinDriver::output(pins.gpio15)?;
    let mut spi_buffer = [0u8; 512];
    let display = Builder::new(ILI9342CRgb565, SpiInterface::new(spi, lcd_dc, &mut spi_buffer))
        .display_size(SCREEN_WIDTH, SCREEN_HEIGHT)
        .color_order(ColorOrder::Bgr)
        .invert_colors(ColorInversion::Inverted)
        .init(&mut Ets)
        .map_err(|err| anyhow!("failed to init ILI9342C display: {err:?}"))?;

    let mut esp_wifi = EspWifi::new(modem, sys_loop, Some(nvs_partition))?;
    esp_wifi
        .swap_netif_ap(EspNetif::new_with_conf(&portal_netif_config()?)?)
        .context("failed to apply portal netif configuration")?;
    let wifi = Rc::new(RefCell::new(SharedWifi {
        wifi: esp_wifi,
        client: ClientConfiguration::default(),
        access_point: None,
    }));
    {
        let mut shared = wifi.borrow_mut();
        shared.apply().context("failed to configure wifi")?;
        shared.wifi.start().context("failed to start wifi")?;
    }
    disable_wifi_power_save();

    if let Ok(mut ota) = EspOta::new() {
        if let Err(err) = ota.mark_running_slot_valid() {
            warn!("failed to mark running OTA slot valid: {err:?}");
        }
    }

    let ntp_server: &'static str = Box::leak(runtime.ntp_server.clone().into_boxed_str());
    let board = Board {
        sensor: Box::new(Scd30::new(scd30_bus, Ets)),
        power: Box::new(pmu),
        clock: Box::new(EspClock {
            timezone,
            server: ntp_server,
            sntp: None,
        }),
        radio: Box::new(EspRadio {
            shared: wifi.clone(),
            scanning: false,
            was_connected: false,
        }),
        broker: Box::new(EspBroker::default()),
        portal: Box::new(EspPortal {
            shared: wifi,
            server: None,
            submitted: Arc::new(Mutex::new(None)),
        }),
        store: Box::new(store),
        firmware: Box::new(EspFirmware {
            server: runtime.firmware_server.clone(),
        }),
        datalog: None,
    };

    let seed = u64::from(unsafe { esp_idf_svc::sys::esp_random() });
    let mut device = match Device::boot(board, display, runtime, access_point_name(chip_id()), seed) {
        Ok(device) => device,
        Err(DeviceError::Sensor(err)) => {
            error!("{err}. Please check wiring. Freezing.");
            loop {
                thread::sleep(Duration::from_secs(60));
            }
        }
        Err(err) => return Err(err.into()),
    };

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    add_current_task_to_watchdog()?;

    let frame = Duration::from_millis(device.frame_duration_ms());
    let started = Instant::now();
    info!("sensor running, firmware {}", co2_common::FIRMWARE_VERSION);

    loop {
        let tick_started = Instant::now();
        feed_watchdog();

        let inputs: Vec<_> = match touch.poll() {
            Ok(event) => event.into_iter().collect(),
            Err(err) => {
                warn!("touch read failed: {err:?}");
                Vec::new()
            }
        };

        let report = device.tick(started.elapsed().as_millis() as u64, &inputs);
        if report.restart_requested {
            info!("firmware updated, restarting");
            thread::sleep(Duration::from_millis(100));
            unsafe { esp_idf_svc::sys::esp_restart() };
        }

        if let Some(rest) = frame.checked_sub(tick_started.elapsed()) {
            thread::sleep(rest);
        }
    }
}

fn portal_netif_config() -> anyhow::Result<NetifConfiguration> {
    let mut conf = NetifConfiguration::wifi_default_router();
    conf.key = "WIFI_AP_PORTAL"
        .try_into()
        .map_err(|_| anyhow!("netif key too long"))?;
    conf.ip_configuration = Some(IpConfiguration::Router(RouterConfiguration {
        subnet: Subnet {
            gateway: PORTAL_GATEWAY,
            mask: Mask(24),
        },
        dhcp_enabled: true,
        dns: Some(PORTAL_GATEWAY),
        secondary_dns: None,
    }));
    Ok(conf)
}

/// Lower half of the factory MAC.
fn chip_id() -> u32 {
    let mut mac = [0u8; 6];
    let rc = unsafe { esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr()) };
    if rc != esp_idf_svc::sys::ESP_OK {
        warn!("failed to read factory MAC: esp_err_t={rc}");
    }
    u32::from_le_bytes([mac[0], mac[1], mac[2], mac[3]])
}

/// One NVS string per store key.
struct NvsStore {
    nvs: EspNvs<NvsDefault>,
}

impl NvsStore {
    fn new(partition: EspDefaultNvsPartition) -> anyhow::Result<Self> {
        Ok(Self {
            nvs: EspNvs::new(partition, NVS_NAMESPACE, true)?,
        })
    }
}

fn nvs_key(key: StoreKey) -> &'static str {
    match key {
        StoreKey::State => "state",
        StoreKey::Broker => "mqtt",
        StoreKey::Credentials => "wifi",
        StoreKey::Runtime => "runtime",
    }
}

fn nvs_error(key: StoreKey, err: esp_idf_svc::sys::EspError) -> StoreError {
    StoreError::Io {
        key: key.name(),
        message: format!("{err:?}"),
    }
}

impl KeyValueStore for NvsStore {
    fn read(&mut self, key: StoreKey) -> Result<Option<String>, StoreError> {
        let mut buffer = vec![0_u8; NVS_VALUE_SIZE];
        self.nvs
            .get_str(nvs_key(key), &mut buffer)
            .map(|value| value.map(str::to_string))
            .map_err(|err| nvs_error(key, err))
    }

    fn write(&mut self, key: StoreKey, value: &str) -> Result<(), StoreError> {
        self.nvs
            .set_str(nvs_key(key), value)
            .map_err(|err| nvs_error(key, err))
    }

    fn remove(&mut self, key: StoreKey) -> Result<(), StoreError> {
        self.nvs
            .remove(nvs_key(key))
            .map(|_| ())
            .map_err(|err| nvs_error(key, err))
    }
}

/// Driver plus the two halves of its configuration. The portal adds the access point,
/// the station side keeps working underneath it.
struct SharedWifi {
    wifi: EspWifi<'static>,
    client: ClientConfiguration,
    access_point: Option<AccessPointConfiguration>,
}

impl SharedWifi {
    fn apply(&mut self) -> Result<(), esp_idf_svc::sys::EspError> {
        let configuration = match &self.access_point {
            Some(access_point) => Configuration::Mixed(self.client.clone(), access_point.clone()),
            None => Configuration::Client(self.client.clone()),
        };
        self.wifi.set_configuration(&configuration)
    }

    fn station_up(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false) && self.wifi.is_up().unwrap_or(false)
    }
}

struct EspRadio {
    shared: Rc<RefCell<SharedWifi>>,
    scanning: bool,
    was_connected: bool,
}

impl WifiRadio for EspRadio {
    fn status(&mut self) -> WifiStatus {
        if self.shared.borrow().station_up() {
            self.was_connected = true;
            WifiStatus::Connected
        } else if self.was_connected {
            WifiStatus::ConnectionLost
        } else {
            WifiStatus::Disconnected
        }
    }

    fn start_scan(&mut self) {
        match self
            .shared
            .borrow_mut()
            .wifi
            .start_scan(&ScanConfig::default(), false)
        {
            Ok(()) => self.scanning = true,
            Err(err) => warn!("wifi scan failed to start: {err:?}"),
        }
    }

    fn poll_scan(&mut self) -> ScanPoll {
        let mut shared = self.shared.borrow_mut();
        if self.scanning && !shared.wifi.is_scan_done().unwrap_or(true) {
            return ScanPoll::Running;
        }
        self.scanning = false;

        let results = shared.wifi.get_scan_result().unwrap_or_else(|err| {
            warn!("wifi scan results unavailable: {err:?}");
            Vec::new()
        });
        ScanPoll::Complete(
            results
                .into_iter()
                .map(|info| ScanResult {
                    ssid: info.ssid.as_str().to_string(),
                    bssid: Bssid(info.bssid),
                    rssi: i32::from(info.signal_strength),
                    channel: info.channel,
                    auth: match info.auth_method {
                        None | Some(AuthMethod::None) => AuthMode::Open,
                        Some(_) => AuthMode::Secured,
                    },
                })
                .collect(),
        )
    }

    fn begin_connect(&mut self, candidate: &Candidate) {
        let (Ok(ssid), Ok(password)) = (
            candidate.ssid.as_str().try_into(),
            candidate.passphrase.as_str().try_into(),
        ) else {
            warn!("credentials for `{}` do not fit the driver", candidate.ssid);
            return;
        };

        let mut shared = self.shared.borrow_mut();
        shared.client = ClientConfiguration {
            ssid,
            password,
            bssid: Some(candidate.bssid.0),
            channel: Some(candidate.channel),
            auth_method: if candidate.passphrase.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPAWPA2Personal
            },
            ..Default::default()
        };
        self.was_connected = false;

        if let Err(err) = shared.apply() {
            warn!("wifi station config rejected: {err:?}");
            return;
        }
        if let Err(err) = shared.wifi.connect() {
            warn!("wifi connect to `{}` failed: {err:?}", candidate.ssid);
        }
    }

    fn disconnect(&mut self, erase: bool) {
        let mut shared = self.shared.borrow_mut();
        if let Err(err) = shared.wifi.disconnect() {
            warn!("wifi disconnect failed: {err:?}");
        }
        self.was_connected = false;
        if erase {
            shared.client = ClientConfiguration::default();
            if let Err(err) = shared.apply() {
                warn!("failed to erase station config: {err:?}");
            }
        }
    }

    fn connected_ssid(&self) -> Option<String> {
        let shared = self.shared.borrow();
        shared
            .station_up()
            .then(|| shared.client.ssid.as_str().to_string())
    }

    fn local_ip(&self) -> Option<Ipv4Addr> {
        self.shared
            .borrow()
            .wifi
            .sta_netif()
            .get_ip_info()
            .ok()
            .map(|info| info.ip)
            .filter(|ip| !ip.is_unspecified())
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

/// Soft access point with the setup page. Submissions land in `submitted` until polled.
struct EspPortal {
    shared: Rc<RefCell<SharedWifi>>,
    server: Option<EspHttpServer<'static>>,
    submitted: Arc<Mutex<Option<ProvisioningResult>>>,
}

impl EspPortal {
    fn open_access_point(&mut self, ap_ssid: &str, password: &str) -> anyhow::Result<()> {
        let access_point = AccessPointConfiguration {
            ssid: ap_ssid
                .try_into()
                .map_err(|_| anyhow!("portal SSID too long"))?,
            password: password
                .try_into()
                .map_err(|_| anyhow!("portal password too long"))?,
            auth_method: AuthMethod::WPA2Personal,
            channel: PORTAL_CHANNEL,
            max_connections: PORTAL_MAX_CLIENTS,
            ..Default::default()
        };

        let mut shared = self.shared.borrow_mut();
        shared.access_point = Some(access_point);
        shared.apply()?;
        Ok(())
    }
}

impl Provisioner for EspPortal {
    fn start(&mut self, ap_ssid: &str, password: &str) -> Result<(), PortalError> {
        self.stop();
        self.open_access_point(ap_ssid, password)
            .and_then(|()| create_portal_server(ap_ssid, self.submitted.clone()))
            .map(|server| {
                self.server = Some(server);
                info!("config portal `{ap_ssid}` open on http://{PORTAL_GATEWAY}");
            })
            .map_err(|err| PortalError::Start(format!("{err:#}")))
    }

    fn poll(&mut self) -> Option<PortalEvent> {
        self.submitted
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .map(PortalEvent::Completed)
    }

    fn stop(&mut self) {
        let had_server = self.server.take().is_some();
        let mut shared = self.shared.borrow_mut();
        if shared.access_point.take().is_some() {
            if let Err(err) = shared.apply() {
                warn!("failed to close portal access point: {err:?}");
            }
        }
        if had_server {
            info!("config portal closed");
        }
    }
}

fn create_portal_server(
    ap_ssid: &str,
    submitted: Arc<Mutex<Option<ProvisioningResult>>>,
) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 16 * 1024,
        ..Default::default()
    };
    let mut server = EspHttpServer::new(&conf)?;
    let page: Arc<str> = Arc::from(PORTAL_HTML.replace("SMOCA CO2 Sensor</h1>", &format!("{ap_ssid}</h1>")));

    for path in CAPTIVE_PATHS {
        let page = page.clone();
        server.fn_handler::<anyhow::Error, _>(path, Method::Get, move |req| {
            req.into_response(200, Some("OK"), &[("Content-Type", "text/html; charset=utf-8")])?
                .write_all(page.as_bytes())?;
            Ok(())
        })?;
    }

    server.fn_handler::<anyhow::Error, _>("/api/provision", Method::Post, move |mut req| {
        let body = read_request_body(&mut req)?;
        let submission: PortalSubmission = match serde_json::from_slice(&body) {
            Ok(submission) => submission,
            Err(_) => return write_error(req, 400, "invalid provisioning payload"),
        };
        if let Err(message) = submission.validate() {
            return write_error(req, 400, message);
        }

        let result = submission.into_result();
        let networks = result.networks.len();
        match submitted.lock() {
            Ok(mut slot) => *slot = Some(result),
            Err(_) => return write_error(req, 503, "config portal is closing"),
        }

        info!("config portal received {networks} network(s)");
        write_json(
            req,
            &ProvisionResponse {
                accepted: true,
                networks,
            },
        )
    })?;

    Ok(server)
}

fn read_request_body(
    req: &mut esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
) -> anyhow::Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_FORM_BODY {
        return Err(anyhow!("request body too large"));
    }

    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)?;
    }
    Ok(body)
}

fn write_json<T: Serialize>(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    payload: &T,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_error(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    status_code: u16,
    message: &str,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(&ErrorBody { error: message })?;
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

/// MQTT session with its connection pumped on a dedicated thread.
#[derive(Default)]
struct EspBroker {
    config: BrokerConfig,
    client: Option<EspMqttClient<'static>>,
    connected: Arc<AtomicBool>,
}

impl BrokerClient for EspBroker {
    fn configure(&mut self, config: &BrokerConfig) {
        self.config = config.clone();
    }

    fn connect(&mut self, client_id: &str, credentials: Option<(&str, &str)>) -> bool {
        self.disconnect();
        let Some(port) = self.config.port_number() else {
            return false;
        };

        let url = format!("mqtt://{}:{port}", self.config.server);
        let conf = MqttClientConfiguration {
            client_id: Some(client_id),
            username: credentials.map(|(user, _)| user),
            password: credentials.map(|(_, pass)| pass),
            keep_alive_interval: Some(MQTT_KEEP_ALIVE),
            ..Default::default()
        };
        let (client, mut conn) = match EspMqttClient::new(&url, &conf) {
            Ok(pair) => pair,
            Err(err) => {
                warn!("mqtt client for {url} failed: {err:?}");
                return false;
            }
        };

        let connected = self.connected.clone();
        let spawned = thread::Builder::new()
            .name("mqtt-poll".to_string())
            .stack_size(8192)
            .spawn(move || {
                while let Ok(event) = conn.next() {
                    match event.payload() {
                        EventPayload::Connected(_) => {
                            info!("mqtt connected");
                            connected.store(true, Ordering::Release);
                        }
                        EventPayload::Disconnected => connected.store(false, Ordering::Release),
                        EventPayload::Error(err) => warn!("mqtt error: {err:?}"),
                        _ => {}
                    }
                }
                connected.store(false, Ordering::Release);
            });
        if let Err(err) = spawned {
            warn!("failed to spawn mqtt thread: {err}");
            return false;
        }
        self.client = Some(client);

        let deadline = Instant::now() + MQTT_CONNECT_TIMEOUT;
        while !self.is_connected() {
            if Instant::now() >= deadline {
                return false;
            }
            feed_watchdog();
            thread::sleep(Duration::from_millis(50));
        }
        true
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn disconnect(&mut self) {
        // Dropping the client ends the poll thread.
        self.client = None;
        self.connected.store(false, Ordering::Release);
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> bool {
        if !self.is_connected() {
            return false;
        }
        let Some(client) = self.client.as_mut() else {
            return false;
        };
        match client.enqueue(topic, QoS::AtLeastOnce, retain, payload) {
            Ok(_) => true,
            Err(err) => {
                warn!("mqtt publish to {topic} failed: {err:?}");
                false
            }
        }
    }

    fn poll(&mut self) -> bool {
        self.is_connected()
    }
}

struct EspClock {
    timezone: Tz,
    server: &'static str,
    sntp: Option<EspSntp<'static>>,
}

impl Clock for EspClock {
    fn now_local(&mut self) -> Option<NaiveDateTime> {
        let now = Utc::now();
        (now.year() >= EARLIEST_VALID_YEAR).then(|| now.with_timezone(&self.timezone).naive_local())
    }

    fn sync_network_time(&mut self) -> Result<(), SyncError> {
        // A fresh client starts a fresh sync.
        self.sntp = None;
        let mut conf = SntpConf::default();
        conf.servers[0] = self.server;
        let sntp = EspSntp::new(&conf).map_err(|err| SyncError::Ntp(format!("{err:?}")))?;

        let deadline = Instant::now() + NTP_TIMEOUT;
        while sntp.get_sync_status() != SyncStatus::Completed {
            if Instant::now() >= deadline {
                return Err(SyncError::Ntp(format!("no answer from {}", self.server)));
            }
            feed_watchdog();
            thread::sleep(Duration::from_millis(100));
        }
        self.sntp = Some(sntp);
        info!("time synced from {}", self.server);
        Ok(())
    }
}

struct EspFirmware {
    server: String,
}

fn http_client() -> Result<HttpClient<EspHttpConnection>, SyncError> {
    let conf = HttpClientConfiguration {
        timeout: Some(HTTP_TIMEOUT),
        ..Default::default()
    };
    EspHttpConnection::new(&conf)
        .map(HttpClient::wrap)
        .map_err(|err| SyncError::Http(format!("{err:?}")))
}

fn hex(digest: &[u8]) -> String {
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use core::fmt::Write as _;
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

impl FirmwareSource for EspFirmware {
    fn fetch_remote_version(&mut self) -> Result<String, SyncError> {
        let url = version_url(&self.server);
        let mut client = http_client()?;
        let request = client
            .request(Method::Get, &url, &[])
            .map_err(|err| SyncError::Http(format!("{err:?}")))?;
        let mut response = request
            .submit()
            .map_err(|err| SyncError::Http(format!("{err:?}")))?;
        let status = response.status();
        if !(200..300).contains(&status) {
            return Err(SyncError::Http(format!("{url} answered HTTP {status}")));
        }

        let mut body = Vec::new();
        let mut chunk = [0_u8; 256];
        loop {
            let read = response
                .read(&mut chunk)
                .map_err(|err| SyncError::Http(format!("{err:?}")))?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
            if body.len() > MANIFEST_MAX_SIZE {
                return Err(SyncError::MalformedManifest("manifest too large".to_string()));
            }
        }
        Ok(parse_manifest(&body)?.version)
    }

    fn install_latest(&mut self) -> Result<u64, SyncError> {
        let url = firmware_url(&self.server);
        let mut client = http_client()?;
        let request = client
            .request(Method::Get, &url, &[])
            .map_err(|err| SyncError::Http(format!("{err:?}")))?;
        let mut response = request
            .submit()
            .map_err(|err| SyncError::Http(format!("{err:?}")))?;
        let status = response.status();
        if !(200..300).contains(&status) {
            return Err(SyncError::Http(format!("firmware download failed with HTTP {status}")));
        }

        let declared = response
            .header("content-length")
            .or_else(|| response.header("Content-Length"))
            .and_then(|value| value.parse::<u64>().ok());

        let flash = |err: esp_idf_svc::sys::EspError| SyncError::Flash(format!("{err:?}"));
        let mut ota = EspOta::new().map_err(flash)?;
        let mut update = ota.initiate_update().map_err(flash)?;

        let mut hasher = Sha256::new();
        let mut written = 0_u64;
        let mut chunk = [0_u8; OTA_CHUNK_SIZE];

        loop {
            feed_watchdog();
            let read = match response.read(&mut chunk) {
                Ok(read) => read,
                Err(err) => {
                    let _ = update.abort();
                    return Err(SyncError::Http(format!("{err:?}")));
                }
            };
            if read == 0 {
                break;
            }
            if let Err(err) = update.write_all(&chunk[..read]) {
                let _ = update.abort();
                return Err(SyncError::Flash(format!("{err:?}")));
            }
            hasher.update(&chunk[..read]);
            written = written.saturating_add(read as u64);
        }

        if let Err(err) = check_complete(written, declared) {
            let _ = update.abort();
            return Err(err);
        }
        update.complete().map_err(flash)?;
        info!("flashed {written} bytes from {url}, sha256 {}", hex(&hasher.finalize()));
        Ok(written)
    }
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn disable_wifi_power_save() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_set_ps(0) };
    if rc == esp_idf_svc::sys::ESP_OK {
        info!("wifi power save disabled");
    } else {
        warn!("failed to disable wifi power save: esp_err_t={rc}");
    }
}
