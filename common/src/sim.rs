//! In-memory stand-ins for the board collaborators.
//!
//! Each simulator is a cheap handle: clones share the same inner state, so a test (or
//! the host binary) can keep one clone to steer the device while the `Device` owns
//! another.

use std::{cell::RefCell, collections::HashMap, convert::Infallible, net::Ipv4Addr, rc::Rc};

use chrono::{Duration, NaiveDateTime};
use embedded_graphics::{
    pixelcolor::Rgb565,
    prelude::*,
    primitives::Rectangle,
};

use crate::{
    air::{AirSample, AirSensor},
    battery::{PowerMonitor, PowerSample},
    config::BrokerConfig,
    credentials::{Candidate, ScanResult},
    datalog::DataLog,
    error::{DataLogError, PortalError, SensorError, StoreError, SyncError},
    firmware::FirmwareSource,
    link::{BrokerClient, PortalEvent, ProvisioningResult, Provisioner, ScanPoll, WifiRadio},
    storage::{KeyValueStore, StoreKey},
    sync::Clock,
    types::WifiStatus,
};

#[derive(Debug, Default)]
struct StoreInner {
    entries: HashMap<StoreKey, String>,
    writes: usize,
    fail_writes: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore(Rc<RefCell<StoreInner>>);

impl MemoryStore {
    pub fn writes(&self) -> usize {
        self.0.borrow().writes
    }

    pub fn fail_writes(&self, fail: bool) {
        self.0.borrow_mut().fail_writes = fail;
    }

    pub fn get(&self, key: StoreKey) -> Option<String> {
        self.0.borrow().entries.get(&key).cloned()
    }
}

impl KeyValueStore for MemoryStore {
    fn read(&mut self, key: StoreKey) -> Result<Option<String>, StoreError> {
        Ok(self.get(key))
    }

    fn write(&mut self, key: StoreKey, value: &str) -> Result<(), StoreError> {
        let mut inner = self.0.borrow_mut();
        if inner.fail_writes {
            return Err(StoreError::Io {
                key: key.name(),
                message: "flash is read-only".to_string(),
            });
        }
        inner.writes += 1;
        inner.entries.insert(key, value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: StoreKey) -> Result<(), StoreError> {
        self.0.borrow_mut().entries.remove(&key);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RadioInner {
    scan_results: Vec<ScanResult>,
    associated: Option<String>,
    lost: bool,
    auto_associate: bool,
    connects: Vec<Candidate>,
    scans_started: usize,
    disconnects: usize,
    erased: bool,
}

/// Station radio whose air is a fixed list of access points.
#[derive(Debug, Clone, Default)]
pub struct SimRadio(Rc<RefCell<RadioInner>>);

impl SimRadio {
    pub fn set_scan_results(&self, results: Vec<ScanResult>) {
        self.0.borrow_mut().scan_results = results;
    }

    /// Makes `begin_connect` join any access point present in the scan results.
    pub fn set_auto_associate(&self, enabled: bool) {
        self.0.borrow_mut().auto_associate = enabled;
    }

    pub fn associate(&self, ssid: &str) {
        let mut inner = self.0.borrow_mut();
        inner.associated = Some(ssid.to_string());
        inner.lost = false;
    }

    pub fn drop_association(&self) {
        let mut inner = self.0.borrow_mut();
        if inner.associated.take().is_some() {
            inner.lost = true;
        }
    }

    pub fn last_connect(&self) -> Option<Candidate> {
        self.0.borrow().connects.last().cloned()
    }

    pub fn scans_started(&self) -> usize {
        self.0.borrow().scans_started
    }

    pub fn disconnects(&self) -> usize {
        self.0.borrow().disconnects
    }

    pub fn erased(&self) -> bool {
        self.0.borrow().erased
    }
}

impl WifiRadio for SimRadio {
    fn status(&mut self) -> WifiStatus {
        let inner = self.0.borrow();
        if inner.associated.is_some() {
            WifiStatus::Connected
        } else if inner.lost {
            WifiStatus::ConnectionLost
        } else {
            WifiStatus::Disconnected
        }
    }

    fn start_scan(&mut self) {
        self.0.borrow_mut().scans_started += 1;
    }

    fn poll_scan(&mut self) -> ScanPoll {
        ScanPoll::Complete(self.0.borrow().scan_results.clone())
    }

    fn begin_connect(&mut self, candidate: &Candidate) {
        let mut inner = self.0.borrow_mut();
        inner.connects.push(candidate.clone());
        let reachable = inner
            .scan_results
            .iter()
            .any(|result| result.bssid == candidate.bssid);
        if inner.auto_associate && reachable {
            inner.associated = Some(candidate.ssid.clone());
            inner.lost = false;
        }
    }

    fn disconnect(&mut self, erase: bool) {
        let mut inner = self.0.borrow_mut();
        inner.associated = None;
        inner.lost = false;
        inner.disconnects += 1;
        inner.erased |= erase;
    }

    fn connected_ssid(&self) -> Option<String> {
        self.0.borrow().associated.clone()
    }

    fn local_ip(&self) -> Option<Ipv4Addr> {
        self.0
            .borrow()
            .associated
            .as_ref()
            .map(|_| Ipv4Addr::new(192, 168, 2, 42))
    }
}

#[derive(Debug, Default)]
struct BrokerInner {
    config: Option<BrokerConfig>,
    connected: bool,
    refuse: bool,
    connect_attempts: usize,
    published: Vec<(String, String, bool)>,
}

#[derive(Debug, Clone, Default)]
pub struct SimBroker(Rc<RefCell<BrokerInner>>);

impl SimBroker {
    pub fn set_connected(&self, connected: bool) {
        self.0.borrow_mut().connected = connected;
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.0.borrow_mut().refuse = refuse;
    }

    pub fn connect_attempts(&self) -> usize {
        self.0.borrow().connect_attempts
    }

    pub fn configured(&self) -> Option<BrokerConfig> {
        self.0.borrow().config.clone()
    }

    /// Every publish so far as `(topic, payload, retained)`.
    pub fn published(&self) -> Vec<(String, String, bool)> {
        self.0.borrow().published.clone()
    }
}

impl BrokerClient for SimBroker {
    fn configure(&mut self, config: &BrokerConfig) {
        self.0.borrow_mut().config = Some(config.clone());
    }

    fn connect(&mut self, _client_id: &str, _credentials: Option<(&str, &str)>) -> bool {
        let mut inner = self.0.borrow_mut();
        inner.connect_attempts += 1;
        inner.connected = !inner.refuse;
        inner.connected
    }

    fn is_connected(&self) -> bool {
        self.0.borrow().connected
    }

    fn disconnect(&mut self) {
        self.0.borrow_mut().connected = false;
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> bool {
        let mut inner = self.0.borrow_mut();
        if !inner.connected {
            return false;
        }
        inner.published.push((
            topic.to_string(),
            String::from_utf8_lossy(payload).into_owned(),
            retain,
        ));
        true
    }

    fn poll(&mut self) -> bool {
        self.0.borrow().connected
    }
}

#[derive(Debug, Default)]
struct PortalInner {
    pending: Option<PortalEvent>,
    fail_starts: bool,
    running: bool,
    starts: usize,
    stops: usize,
    last_start: Option<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct SimPortal(Rc<RefCell<PortalInner>>);

impl SimPortal {
    /// Queues a submitted form, delivered on the next poll of a running portal.
    pub fn complete(&self, result: ProvisioningResult) {
        self.0.borrow_mut().pending = Some(PortalEvent::Completed(result));
    }

    pub fn fail_starts(&self, fail: bool) {
        self.0.borrow_mut().fail_starts = fail;
    }

    pub fn is_running(&self) -> bool {
        self.0.borrow().running
    }

    /// Start attempts, including the ones that failed.
    pub fn starts(&self) -> usize {
        self.0.borrow().starts
    }

    pub fn stops(&self) -> usize {
        self.0.borrow().stops
    }

    pub fn last_start(&self) -> Option<(String, String)> {
        self.0.borrow().last_start.clone()
    }
}

impl Provisioner for SimPortal {
    fn start(&mut self, ap_ssid: &str, password: &str) -> Result<(), PortalError> {
        let mut inner = self.0.borrow_mut();
        inner.starts += 1;
        if inner.fail_starts {
            return Err(PortalError::Start("access point did not come up".to_string()));
        }
        inner.running = true;
        inner.last_start = Some((ap_ssid.to_string(), password.to_string()));
        Ok(())
    }

    fn poll(&mut self) -> Option<PortalEvent> {
        let mut inner = self.0.borrow_mut();
        if inner.running {
            inner.pending.take()
        } else {
            None
        }
    }

    fn stop(&mut self) {
        let mut inner = self.0.borrow_mut();
        inner.running = false;
        inner.stops += 1;
    }
}

#[derive(Debug)]
struct SensorInner {
    detected: bool,
    sample: Option<AirSample>,
    auto_calibration: bool,
    temperature_offset_c: f32,
    altitude_m: u16,
    recalibrations: Vec<i32>,
}

/// Air sensor that reports the same sample every time it is read.
#[derive(Debug, Clone)]
pub struct SimSensor(Rc<RefCell<SensorInner>>);

impl Default for SimSensor {
    fn default() -> Self {
        Self(Rc::new(RefCell::new(SensorInner {
            detected: true,
            sample: None,
            auto_calibration: false,
            temperature_offset_c: 0.0,
            altitude_m: 0,
            recalibrations: Vec::new(),
        })))
    }
}

impl SimSensor {
    pub fn missing() -> Self {
        let sensor = Self::default();
        sensor.0.borrow_mut().detected = false;
        sensor
    }

    pub fn set_sample(&self, co2_ppm: f32, temperature_c: f32, humidity_pct: f32) {
        self.0.borrow_mut().sample = Some(AirSample {
            co2_ppm,
            temperature_c,
            humidity_pct,
        });
    }

    pub fn auto_calibration(&self) -> bool {
        self.0.borrow().auto_calibration
    }

    pub fn recalibrations(&self) -> Vec<i32> {
        self.0.borrow().recalibrations.clone()
    }

    pub fn temperature_offset_c(&self) -> f32 {
        self.0.borrow().temperature_offset_c
    }

    pub fn altitude_m(&self) -> u16 {
        self.0.borrow().altitude_m
    }
}

impl AirSensor for SimSensor {
    fn begin(&mut self, auto_calibration: bool) -> Result<(), SensorError> {
        let mut inner = self.0.borrow_mut();
        if !inner.detected {
            return Err(SensorError::NotDetected);
        }
        inner.auto_calibration = auto_calibration;
        Ok(())
    }

    fn read(&mut self) -> Result<Option<AirSample>, SensorError> {
        Ok(self.0.borrow().sample)
    }

    fn set_auto_calibration(&mut self, enabled: bool) -> Result<(), SensorError> {
        self.0.borrow_mut().auto_calibration = enabled;
        Ok(())
    }

    fn force_recalibration(&mut self, ppm: i32) -> Result<(), SensorError> {
        self.0.borrow_mut().recalibrations.push(ppm);
        Ok(())
    }

    fn temperature_offset(&mut self) -> Result<f32, SensorError> {
        Ok(self.0.borrow().temperature_offset_c)
    }

    fn set_temperature_offset(&mut self, offset_c: f32) -> Result<(), SensorError> {
        self.0.borrow_mut().temperature_offset_c = offset_c;
        Ok(())
    }

    fn set_altitude_compensation(&mut self, meters: u16) -> Result<(), SensorError> {
        self.0.borrow_mut().altitude_m = meters;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct PowerInner {
    sample: PowerSample,
    resets: usize,
    charge_led: Option<bool>,
    display_power: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct SimPower(Rc<RefCell<PowerInner>>);

impl SimPower {
    pub fn set_sample(&self, sample: PowerSample) {
        self.0.borrow_mut().sample = sample;
    }

    pub fn resets(&self) -> usize {
        self.0.borrow().resets
    }

    pub fn charge_led(&self) -> Option<bool> {
        self.0.borrow().charge_led
    }

    pub fn display_power(&self) -> Option<bool> {
        self.0.borrow().display_power
    }
}

impl PowerMonitor for SimPower {
    fn sample(&mut self) -> PowerSample {
        self.0.borrow().sample
    }

    fn reset_coulomb_counter(&mut self) {
        let mut inner = self.0.borrow_mut();
        inner.resets += 1;
        inner.sample.charged = 0;
        inner.sample.discharged = 0;
    }

    fn set_charge_led(&mut self, on: bool) {
        self.0.borrow_mut().charge_led = Some(on);
    }

    fn set_display_power(&mut self, on: bool) {
        self.0.borrow_mut().display_power = Some(on);
    }
}

#[derive(Debug)]
struct ClockInner {
    now: Option<NaiveDateTime>,
    fail_syncs: bool,
    syncs: usize,
}

#[derive(Debug, Clone)]
pub struct SimClock(Rc<RefCell<ClockInner>>);

impl SimClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self(Rc::new(RefCell::new(ClockInner {
            now: Some(now),
            fail_syncs: false,
            syncs: 0,
        })))
    }

    pub fn advance(&self, by: Duration) {
        let mut inner = self.0.borrow_mut();
        inner.now = inner.now.map(|now| now + by);
    }

    pub fn fail_syncs(&self, fail: bool) {
        self.0.borrow_mut().fail_syncs = fail;
    }

    pub fn syncs(&self) -> usize {
        self.0.borrow().syncs
    }
}

impl Clock for SimClock {
    fn now_local(&mut self) -> Option<NaiveDateTime> {
        self.0.borrow().now
    }

    fn sync_network_time(&mut self) -> Result<(), SyncError> {
        let mut inner = self.0.borrow_mut();
        if inner.fail_syncs {
            return Err(SyncError::Ntp("no answer from time server".to_string()));
        }
        inner.syncs += 1;
        Ok(())
    }
}

#[derive(Debug)]
struct FirmwareInner {
    remote_version: String,
    fail_requests: bool,
    installs: usize,
}

#[derive(Debug, Clone)]
pub struct SimFirmware(Rc<RefCell<FirmwareInner>>);

impl SimFirmware {
    pub fn new(remote_version: &str) -> Self {
        Self(Rc::new(RefCell::new(FirmwareInner {
            remote_version: remote_version.to_string(),
            fail_requests: false,
            installs: 0,
        })))
    }

    pub fn fail_requests(&self, fail: bool) {
        self.0.borrow_mut().fail_requests = fail;
    }

    pub fn installs(&self) -> usize {
        self.0.borrow().installs
    }
}

impl FirmwareSource for SimFirmware {
    fn fetch_remote_version(&mut self) -> Result<String, SyncError> {
        let inner = self.0.borrow();
        if inner.fail_requests {
            return Err(SyncError::Http("connection refused".to_string()));
        }
        Ok(inner.remote_version.clone())
    }

    fn install_latest(&mut self) -> Result<u64, SyncError> {
        let mut inner = self.0.borrow_mut();
        if inner.fail_requests {
            return Err(SyncError::Http("connection refused".to_string()));
        }
        inner.installs += 1;
        Ok(1024)
    }
}

#[derive(Debug, Default)]
struct LogInner {
    absent: bool,
    lines: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryLog(Rc<RefCell<LogInner>>);

impl MemoryLog {
    pub fn absent() -> Self {
        let log = Self::default();
        log.0.borrow_mut().absent = true;
        log
    }

    pub fn lines(&self) -> Vec<String> {
        self.0.borrow().lines.clone()
    }
}

impl DataLog for MemoryLog {
    fn is_present(&self) -> bool {
        !self.0.borrow().absent
    }

    fn start(&mut self, header: &str) -> Result<(), DataLogError> {
        let mut inner = self.0.borrow_mut();
        if inner.absent {
            return Err(DataLogError::Unavailable);
        }
        if inner.lines.is_empty() {
            inner.lines.push(header.to_string());
        }
        Ok(())
    }

    fn append(&mut self, line: &str) -> Result<(), DataLogError> {
        let mut inner = self.0.borrow_mut();
        if inner.absent {
            return Err(DataLogError::Unavailable);
        }
        inner.lines.push(line.to_string());
        Ok(())
    }
}

/// 320x240 target that only counts the draw operations it receives.
#[derive(Debug, Clone, Default)]
pub struct CountingDisplay {
    draw_calls: usize,
}

impl CountingDisplay {
    pub fn draw_calls(&self) -> usize {
        self.draw_calls
    }
}

impl OriginDimensions for CountingDisplay {
    fn size(&self) -> Size {
        Size::new(320, 240)
    }
}

impl DrawTarget for CountingDisplay {
    type Color = Rgb565;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, _pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        self.draw_calls += 1;
        Ok(())
    }

    fn fill_solid(&mut self, _area: &Rectangle, _color: Self::Color) -> Result<(), Self::Error> {
        self.draw_calls += 1;
        Ok(())
    }
}
