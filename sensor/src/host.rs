use std::{
    convert::Infallible,
    fs::{self, OpenOptions},
    io::{ErrorKind, Read, Write as _},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use anyhow::Context;
use chrono::{NaiveDateTime, Utc};
use chrono_tz::Tz;
use embedded_graphics::{
    pixelcolor::{Rgb565, Rgb888},
    prelude::*,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use sha2::{Digest, Sha256};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    runtime::Handle,
    sync::mpsc,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, error, info, warn};

use co2_common::{
    access_point_name,
    battery::PowerSample,
    credentials::{AuthMode, Bssid, ScanResult},
    datalog::{DataLog, DATALOG_FILE},
    error::{ConfigError, DataLogError, DeviceError, StoreError, SyncError},
    firmware::{check_complete, firmware_url, parse_manifest, version_url, FirmwareSource},
    link::BrokerClient,
    sim::{SimPower, SimRadio, SimSensor},
    storage::{self, KeyValueStore, StoreKey},
    sync::Clock,
    Board, BrokerConfig, Device, InputEvent,
};

use crate::portal::HttpPortal;

const DEFAULT_DATA_DIR: &str = "./.co2-sensor";
const DEFAULT_PORTAL_PORT: u16 = 8080;
const DEFAULT_SIM_NETWORKS: &str = "co2-lab:-55";
const FIRMWARE_FILE: &str = "firmware.bin";
const SCREENSHOT_FILE: &str = "screen.ppm";

const MQTT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const MQTT_KEEP_ALIVE: Duration = Duration::from_secs(15);
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const AIR_DRIFT_INTERVAL_MS: u64 = 2_000;
const DOWNLOAD_CHUNK_SIZE: usize = 4096;

const SCREEN_WIDTH: u32 = 320;
const SCREEN_HEIGHT: u32 = 240;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let data_dir = std::env::var("CO2_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR));
    fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

    let mut store = FileStore::new(data_dir.clone());
    let runtime = storage::load_runtime(&mut store).context("failed to load runtime config")?;
    let timezone: Tz = runtime
        .timezone
        .parse()
        .map_err(|_| ConfigError::UnknownTimezone(runtime.timezone.clone()))?;
    BrokerOverrides::from_env()
        .seed(&mut store)
        .context("failed to apply MQTT_* overrides")?;

    let radio = SimRadio::default();
    radio.set_auto_associate(true);
    radio.set_scan_results(parse_networks(
        &std::env::var("CO2_SIM_NETWORKS").unwrap_or_else(|_| DEFAULT_SIM_NETWORKS.to_string()),
    ));

    let sensor = SimSensor::default();
    let mut drift = AirDrift::default();
    drift.apply(&sensor);

    let power = SimPower::default();
    power.set_sample(PowerSample {
        charged: 0,
        discharged: 0,
        voltage: 4.2,
        current: 0.0,
        in_ac: true,
    });

    let portal_port = std::env::var("CO2_PORTAL_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORTAL_PORT);

    let board = Board {
        sensor: Box::new(sensor.clone()),
        power: Box::new(power),
        clock: Box::new(SystemClock { timezone }),
        radio: Box::new(radio),
        broker: Box::new(MqttBroker::default()),
        portal: Box::new(HttpPortal::new(portal_port)),
        store: Box::new(store),
        firmware: Box::new(HttpFirmware {
            server: runtime.firmware_server.clone(),
            download_path: data_dir.join(FIRMWARE_FILE),
        }),
        datalog: Some(Box::new(FileLog {
            path: data_dir.join(DATALOG_FILE.trim_start_matches('/')),
        })),
    };

    let chip_id = std::env::var("CO2_CHIP_ID")
        .ok()
        .and_then(|value| parse_chip_id(&value))
        .unwrap_or_else(|| derived_chip_id(&data_dir));
    let seed: u64 = rand::rng().random();

    let mut device = match Device::boot(
        board,
        Framebuffer::default(),
        runtime,
        access_point_name(chip_id),
        seed,
    ) {
        Ok(device) => device,
        Err(DeviceError::Sensor(err)) => {
            error!("{err}. Please check wiring. Freezing.");
            return std::future::pending().await;
        }
        Err(err) => return Err(err.into()),
    };

    let (console_tx, mut console) = mpsc::unbounded_channel();
    spawn_console_reader(console_tx);

    let frame = Duration::from_millis(device.frame_duration_ms());
    let mut interval = tokio::time::interval(frame);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut rng = StdRng::seed_from_u64(seed);
    let started = Instant::now();
    let mut next_drift_ms = AIR_DRIFT_INTERVAL_MS;

    info!("sensor running, data in {}", data_dir.display());

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
        }

        let mut inputs = Vec::new();
        while let Ok(command) = console.try_recv() {
            match command {
                ConsoleCommand::Input(event) => inputs.push(event),
                ConsoleCommand::Snapshot => {
                    let path = data_dir.join(SCREENSHOT_FILE);
                    match fs::write(&path, device.display().ppm()) {
                        Ok(()) => info!("screen saved to {}", path.display()),
                        Err(err) => warn!("failed to save screen: {err}"),
                    }
                }
                ConsoleCommand::Quit => return Ok(()),
            }
        }

        let now_ms = started.elapsed().as_millis() as u64;
        if now_ms >= next_drift_ms {
            drift.step(&mut rng);
            drift.apply(&sensor);
            next_drift_ms = now_ms + AIR_DRIFT_INTERVAL_MS;
        }

        let tick_started = Instant::now();
        let report = device.tick(now_ms, &inputs);
        let elapsed = tick_started.elapsed();

        if report.restart_requested {
            info!(
                "firmware image staged at {}, exiting for restart",
                data_dir.join(FIRMWARE_FILE).display()
            );
            return Ok(());
        }
        if elapsed > frame {
            warn!(
                "tick took {}ms, over the {}ms frame",
                elapsed.as_millis(),
                frame.as_millis()
            );
        }
        if !report.render.is_idle() {
            debug!("frame redrawn: {:?}", report.render);
        }
    }
}

/// One file per store key under the data dir.
struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path(&self, key: StoreKey) -> PathBuf {
        self.dir.join(key.name().trim_start_matches('/'))
    }
}

fn io_error(key: StoreKey, err: std::io::Error) -> StoreError {
    StoreError::Io {
        key: key.name(),
        message: err.to_string(),
    }
}

impl KeyValueStore for FileStore {
    fn read(&mut self, key: StoreKey) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(key, err)),
        }
    }

    fn write(&mut self, key: StoreKey, value: &str) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|err| io_error(key, err))?;
        fs::write(self.path(key), value).map_err(|err| io_error(key, err))
    }

    fn remove(&mut self, key: StoreKey) -> Result<(), StoreError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(key, err)),
        }
    }
}

/// Broker settings taken from `MQTT_HOST`, `MQTT_PORT`, `MQTT_USER` and `MQTT_PASS`.
#[derive(Debug, Default)]
struct BrokerOverrides {
    host: Option<String>,
    port: Option<String>,
    user: Option<String>,
    pass: Option<String>,
}

impl BrokerOverrides {
    fn from_env() -> Self {
        Self {
            host: std::env::var("MQTT_HOST").ok(),
            port: std::env::var("MQTT_PORT").ok(),
            user: std::env::var("MQTT_USER").ok(),
            pass: std::env::var("MQTT_PASS").ok(),
        }
    }

    fn apply(&self, broker: &mut BrokerConfig) {
        if let Some(host) = &self.host {
            broker.server = host.clone();
        }
        if let Some(port) = &self.port {
            broker.port = port.clone();
        }
        if let Some(user) = &self.user {
            broker.user = user.clone();
        }
        if let Some(pass) = &self.pass {
            broker.password = pass.clone();
        }
        broker.sanitize();
    }

    /// Folds the overrides into the stored broker record so the device boots with them.
    fn seed(&self, store: &mut dyn KeyValueStore) -> Result<(), StoreError> {
        let stored = storage::load_broker(store)?;
        let mut broker = stored.clone();
        self.apply(&mut broker);
        if broker != stored {
            storage::save_broker(store, &broker)?;
        }
        Ok(())
    }
}

/// rumqttc session whose event loop runs as a tokio task.
#[derive(Default)]
struct MqttBroker {
    config: BrokerConfig,
    connected: Arc<AtomicBool>,
    client: Option<AsyncClient>,
    event_loop: Option<JoinHandle<()>>,
}

impl BrokerClient for MqttBroker {
    fn configure(&mut self, config: &BrokerConfig) {
        self.config = config.clone();
    }

    fn connect(&mut self, client_id: &str, credentials: Option<(&str, &str)>) -> bool {
        self.disconnect();
        let Some(port) = self.config.port_number() else {
            return false;
        };

        let mut options = MqttOptions::new(client_id, self.config.server.clone(), port);
        options.set_keep_alive(MQTT_KEEP_ALIVE);
        if let Some((user, pass)) = credentials {
            options.set_credentials(user, pass);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 32);
        let connected = self.connected.clone();
        self.event_loop = Some(tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        info!("mqtt connected");
                        connected.store(true, Ordering::Release);
                    }
                    Ok(Event::Incoming(Incoming::Disconnect)) => {
                        connected.store(false, Ordering::Release);
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!("mqtt poll error: {err}");
                        connected.store(false, Ordering::Release);
                        break;
                    }
                }
            }
        }));
        self.client = Some(client);

        let connected = self.connected.clone();
        tokio::task::block_in_place(|| {
            Handle::current().block_on(async {
                tokio::time::timeout(MQTT_CONNECT_TIMEOUT, async {
                    while !connected.load(Ordering::Acquire) {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    }
                })
                .await
                .is_ok()
            })
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            let _ = client.try_disconnect();
        }
        if let Some(task) = self.event_loop.take() {
            task.abort();
        }
        self.connected.store(false, Ordering::Release);
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> bool {
        if !self.is_connected() {
            return false;
        }
        let Some(client) = self.client.as_ref() else {
            return false;
        };
        match client.try_publish(topic, QoS::AtLeastOnce, retain, payload.to_vec()) {
            Ok(()) => true,
            Err(err) => {
                warn!("mqtt publish to {topic} failed: {err}");
                false
            }
        }
    }

    fn poll(&mut self) -> bool {
        self.is_connected()
    }
}

/// The host OS keeps its own clock in sync.
struct SystemClock {
    timezone: Tz,
}

impl Clock for SystemClock {
    fn now_local(&mut self) -> Option<NaiveDateTime> {
        Some(Utc::now().with_timezone(&self.timezone).naive_local())
    }

    fn sync_network_time(&mut self) -> Result<(), SyncError> {
        debug!("host clock is managed by the operating system");
        Ok(())
    }
}

/// Firmware server client. The "flash" is a file next to the other data.
struct HttpFirmware {
    server: String,
    download_path: PathBuf,
}

fn http_client() -> Result<reqwest::blocking::Client, SyncError> {
    reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|err| SyncError::Http(err.to_string()))
}

fn http_error(err: reqwest::Error) -> SyncError {
    SyncError::Http(err.to_string())
}

fn hex(digest: &[u8]) -> String {
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

impl HttpFirmware {
    fn download(&self) -> Result<u64, SyncError> {
        let url = firmware_url(&self.server);
        let mut response = http_client()?
            .get(&url)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(http_error)?;
        let declared = response.content_length();

        let mut file = fs::File::create(&self.download_path)
            .map_err(|err| SyncError::Flash(err.to_string()))?;
        let mut hasher = Sha256::new();
        let mut written = 0u64;
        let mut chunk = [0u8; DOWNLOAD_CHUNK_SIZE];

        loop {
            let read = response
                .read(&mut chunk)
                .map_err(|err| SyncError::Http(err.to_string()))?;
            if read == 0 {
                break;
            }
            file.write_all(&chunk[..read])
                .map_err(|err| SyncError::Flash(err.to_string()))?;
            hasher.update(&chunk[..read]);
            written += read as u64;
        }

        let written = check_complete(written, declared)?;
        info!(
            "downloaded {written} bytes from {url}, sha256 {}",
            hex(&hasher.finalize())
        );
        Ok(written)
    }
}

impl FirmwareSource for HttpFirmware {
    fn fetch_remote_version(&mut self) -> Result<String, SyncError> {
        let url = version_url(&self.server);
        let body = tokio::task::block_in_place(|| {
            http_client()?
                .get(&url)
                .send()
                .and_then(|response| response.error_for_status())
                .and_then(|response| response.bytes())
                .map_err(http_error)
        })?;
        Ok(parse_manifest(&body)?.version)
    }

    fn install_latest(&mut self) -> Result<u64, SyncError> {
        tokio::task::block_in_place(|| self.download())
    }
}

/// CSV log under the data dir, standing in for the SD card.
struct FileLog {
    path: PathBuf,
}

impl DataLog for FileLog {
    fn is_present(&self) -> bool {
        self.path.parent().is_some_and(Path::is_dir)
    }

    fn start(&mut self, header: &str) -> Result<(), DataLogError> {
        if self.path.exists() {
            return Ok(());
        }
        fs::write(&self.path, header).map_err(|err| DataLogError::Write(err.to_string()))
    }

    fn append(&mut self, line: &str) -> Result<(), DataLogError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|_| DataLogError::Unavailable)?;
        file.write_all(line.as_bytes())
            .map_err(|err| DataLogError::Write(err.to_string()))
    }
}

/// Headless 320x240 panel.
struct Framebuffer {
    pixels: Vec<Rgb565>,
}

impl Default for Framebuffer {
    fn default() -> Self {
        Self {
            pixels: vec![Rgb565::BLACK; (SCREEN_WIDTH * SCREEN_HEIGHT) as usize],
        }
    }
}

impl Framebuffer {
    /// Binary PPM of the current frame.
    fn ppm(&self) -> Vec<u8> {
        let mut out = format!("P6\n{SCREEN_WIDTH} {SCREEN_HEIGHT}\n255\n").into_bytes();
        for pixel in &self.pixels {
            let rgb = Rgb888::from(*pixel);
            out.extend_from_slice(&[rgb.r(), rgb.g(), rgb.b()]);
        }
        out
    }
}

impl OriginDimensions for Framebuffer {
    fn size(&self) -> Size {
        Size::new(SCREEN_WIDTH, SCREEN_HEIGHT)
    }
}

impl DrawTarget for Framebuffer {
    type Color = Rgb565;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            let (Ok(x), Ok(y)) = (u32::try_from(point.x), u32::try_from(point.y)) else {
                continue;
            };
            if x < SCREEN_WIDTH && y < SCREEN_HEIGHT {
                self.pixels[(y * SCREEN_WIDTH + x) as usize] = color;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsoleCommand {
    Input(InputEvent),
    Snapshot,
    Quit,
}

/// `a`, `b`, `c` press the hardware buttons, `t <x> <y>` touches the screen.
fn parse_command(line: &str) -> Option<ConsoleCommand> {
    let mut words = line.split_whitespace();
    let command = match words.next()?.to_ascii_lowercase().as_str() {
        "a" => ConsoleCommand::Input(InputEvent::ButtonA),
        "b" => ConsoleCommand::Input(InputEvent::ButtonB),
        "c" => ConsoleCommand::Input(InputEvent::ButtonC),
        "t" | "touch" => {
            let x = words.next()?.parse().ok()?;
            let y = words.next()?.parse().ok()?;
            ConsoleCommand::Input(InputEvent::Touch(Point::new(x, y)))
        }
        "shot" => ConsoleCommand::Snapshot,
        "q" | "quit" => ConsoleCommand::Quit,
        _ => return None,
    };
    Some(command)
}

fn spawn_console_reader(commands: mpsc::UnboundedSender<ConsoleCommand>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parse_command(&line) {
                    Some(command) => {
                        if commands.send(command).is_err() {
                            break;
                        }
                    }
                    None => warn!("unknown console command `{}`", line.trim()),
                },
                Ok(None) => break,
                Err(err) => {
                    warn!("console read failed: {err}");
                    break;
                }
            }
        }
    });
}

/// `ssid:rssi` pairs, comma separated, as the simulated air around the host.
fn parse_networks(list: &str) -> Vec<ScanResult> {
    list.split(',')
        .filter_map(|entry| {
            let (ssid, rssi) = entry.trim().rsplit_once(':')?;
            let ssid = ssid.trim();
            if ssid.is_empty() {
                return None;
            }
            Some((ssid.to_string(), rssi.trim().parse::<i32>().ok()?))
        })
        .enumerate()
        .map(|(index, (ssid, rssi))| ScanResult {
            ssid,
            bssid: Bssid([0x02, 0x00, 0x00, 0x00, 0x00, index as u8 + 1]),
            rssi,
            channel: 6,
            auth: AuthMode::Secured,
        })
        .collect()
}

fn parse_chip_id(value: &str) -> Option<u32> {
    let value = value.trim();
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u32::from_str_radix(digits, 16).ok()
}

/// Stable per data dir, like a MAC-derived id on real hardware.
fn derived_chip_id(data_dir: &Path) -> u32 {
    let digest = Sha256::digest(data_dir.to_string_lossy().as_bytes());
    u32::from_be_bytes([0, digest[0], digest[1], digest[2]])
}

/// Random walk for the simulated air sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
struct AirDrift {
    co2_ppm: f32,
    temperature_c: f32,
    humidity_pct: f32,
}

impl Default for AirDrift {
    fn default() -> Self {
        Self {
            co2_ppm: 650.0,
            temperature_c: 22.0,
            humidity_pct: 45.0,
        }
    }
}

impl AirDrift {
    fn step<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.co2_ppm = (self.co2_ppm + rng.random_range(-25.0..=25.0)).clamp(400.0, 2500.0);
        self.temperature_c = (self.temperature_c + rng.random_range(-0.1..=0.1)).clamp(18.0, 28.0);
        self.humidity_pct = (self.humidity_pct + rng.random_range(-0.5..=0.5)).clamp(30.0, 60.0);
    }

    fn apply(&self, sensor: &SimSensor) {
        sensor.set_sample(self.co2_ppm, self.temperature_c, self.humidity_pct);
    }
}
