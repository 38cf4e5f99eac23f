use serde::{Deserialize, Serialize};

use crate::state::DeviceState;

pub const NUM_WIFI_CREDENTIALS: usize = 2;
pub const MAX_SSID_LEN: usize = 32;
pub const MAX_PASSPHRASE_LEN: usize = 64;
pub const PORTAL_PASSWORD_LEN: usize = 8;
pub const MAX_PORTAL_PASSWORD_LEN: usize = 16;
pub const VERSION_NUMBER_LEN: usize = 8;

pub const MQTT_SERVER_LEN: usize = 64;
pub const MQTT_PORT_LEN: usize = 8;
pub const MQTT_DEVICE_LEN: usize = 24;
pub const MQTT_TOPIC_LEN: usize = 64;
pub const MQTT_USER_LEN: usize = 24;
pub const MQTT_KEY_LEN: usize = 32;

pub const DEFAULT_BATTERY_CAPACITY_MAH: f32 = 700.0;
pub const MIN_CALIBRATION_PPM: i32 = 400;
pub const MAX_CALIBRATION_PPM: i32 = 2000;
pub const CALIBRATION_PPM_STEP: i32 = 10;
pub const MIN_CALIBRATION_TEMP_C: f32 = 10.0;
pub const MAX_CALIBRATION_TEMP_C: f32 = 40.0;
pub const CALIBRATION_TEMP_STEP_C: f32 = 0.5;

/// Truncates `value` to at most `max` bytes without splitting a character.
pub fn bounded(value: &str, max: usize) -> String {
    if value.len() <= max {
        return value.to_string();
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkTimings {
    pub scan_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub broker_retry_ms: u64,
    pub publish_interval_ms: u64,
    pub portal_timeout_ms: u64,
}

impl Default for LinkTimings {
    fn default() -> Self {
        Self {
            scan_interval_ms: 5_000,
            connect_timeout_ms: 5_000,
            broker_retry_ms: 2_000,
            publish_interval_ms: 60_000,
            portal_timeout_ms: 120_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub timings: LinkTimings,
    pub target_fps: u32,
    pub graph_window: usize,
    pub time_sync_hour: u32,
    pub timezone: String,
    pub firmware_server: String,
    pub ntp_server: String,
    pub discovery: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            timings: LinkTimings::default(),
            target_fps: 20,
            graph_window: 240,
            time_sync_hour: 2,
            timezone: "Europe/Zurich".to_string(),
            firmware_server: "co2-sensor-firmware.smoca.ch".to_string(),
            ntp_server: "pool.ntp.org".to_string(),
            discovery: true,
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.target_fps = self.target_fps.clamp(1, 60);
        self.graph_window = self.graph_window.clamp(40, 320);
        self.time_sync_hour = self.time_sync_hour.min(23);
        self.timings.scan_interval_ms = self.timings.scan_interval_ms.max(500);
        self.timings.connect_timeout_ms = self.timings.connect_timeout_ms.max(500);
        self.timings.broker_retry_ms = self.timings.broker_retry_ms.max(500);
        self.timings.publish_interval_ms = self.timings.publish_interval_ms.max(1_000);
        self.timings.portal_timeout_ms = self.timings.portal_timeout_ms.max(10_000);
    }

    pub fn frame_duration_ms(&self) -> u64 {
        1_000 / u64::from(self.target_fps.max(1))
    }
}

/// Broker connection settings as collected by the portal and stored in `/mqtt.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    #[serde(rename = "MQTT_SERVER_Label")]
    pub server: String,
    #[serde(rename = "MQTT_SERVERPORT_Label")]
    pub port: String,
    #[serde(rename = "MQTT_TOPIC_Label")]
    pub topic: String,
    #[serde(rename = "MQTT_DEVICENAME_Label")]
    pub device: String,
    #[serde(rename = "MQTT_USERNAME_Label")]
    pub user: String,
    #[serde(rename = "MQTT_KEY_Label")]
    pub password: String,
}

impl BrokerConfig {
    pub fn sanitize(&mut self) {
        self.server = bounded(self.server.trim(), MQTT_SERVER_LEN);
        self.port = bounded(self.port.trim(), MQTT_PORT_LEN);
        self.topic = bounded(&self.topic, MQTT_TOPIC_LEN);
        self.device = bounded(&self.device, MQTT_DEVICE_LEN);
        self.user = bounded(&self.user, MQTT_USER_LEN);
        self.password = bounded(&self.password, MQTT_KEY_LEN);
    }

    pub fn port_number(&self) -> Option<u16> {
        self.port.parse::<u16>().ok().filter(|port| *port != 0)
    }

    /// Both host and a usable port are present.
    pub fn is_configured(&self) -> bool {
        !self.server.is_empty() && self.port_number().is_some()
    }

    pub fn client_id<'a>(&'a self, fallback: &'a str) -> &'a str {
        if self.device.is_empty() {
            fallback
        } else {
            &self.device
        }
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.user.is_empty() || self.password.is_empty() {
            None
        } else {
            Some((self.user.as_str(), self.password.as_str()))
        }
    }
}

/// Durable subset of [`DeviceState`] kept in the `/state` record.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedState {
    pub battery_capacity_mah: f32,
    pub auto_calibration: bool,
    pub calibration_ppm: i32,
    pub wifi_activated: bool,
    pub portal_password: String,
    pub newest_version: String,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            battery_capacity_mah: DEFAULT_BATTERY_CAPACITY_MAH,
            auto_calibration: false,
            calibration_ppm: MIN_CALIBRATION_PPM,
            wifi_activated: false,
            portal_password: String::new(),
            newest_version: String::new(),
        }
    }
}

impl PersistedState {
    pub fn from_state(state: &DeviceState) -> Self {
        Self {
            battery_capacity_mah: state.battery.capacity_mah,
            auto_calibration: state.calibration.auto_on,
            calibration_ppm: state.calibration.ppm_target,
            wifi_activated: state.wifi.activated,
            portal_password: state.portal_password.clone(),
            newest_version: state.firmware.newest_version.clone(),
        }
    }

    pub fn apply_to(&self, state: &mut DeviceState) {
        state.battery.capacity_mah = self.battery_capacity_mah;
        state.calibration.auto_on = self.auto_calibration;
        state.calibration.ppm_target = self.calibration_ppm;
        state.wifi.activated = self.wifi_activated;
        state.portal_password = self.portal_password.clone();
        state.firmware.newest_version = self.newest_version.clone();
    }

    /// One field per line, in the order the record is read back.
    pub fn to_record(&self) -> String {
        format!(
            "{:.2}\n{}\n{}\n{}\n{}\n{}\n",
            self.battery_capacity_mah,
            flag(self.auto_calibration),
            self.calibration_ppm,
            flag(self.wifi_activated),
            self.portal_password,
            self.newest_version,
        )
    }

    pub fn parse_record(record: &str) -> Self {
        let mut lines = record.split('\n').map(|line| line.trim_end_matches('\r'));
        let mut parsed = Self::default();

        if let Some(capacity) = lines.next().filter(|line| !line.is_empty()) {
            parsed.battery_capacity_mah = capacity.trim().parse::<f32>().unwrap_or(0.0);
        }
        if parsed.battery_capacity_mah == 0.0 || !parsed.battery_capacity_mah.is_finite() {
            parsed.battery_capacity_mah = DEFAULT_BATTERY_CAPACITY_MAH;
        }

        parsed.auto_calibration = lines.next() == Some("1");
        parsed.calibration_ppm = lines
            .next()
            .and_then(|line| line.trim().parse::<i32>().ok())
            .unwrap_or(0)
            .max(MIN_CALIBRATION_PPM);
        parsed.wifi_activated = lines.next() == Some("1");
        parsed.portal_password = bounded(lines.next().unwrap_or_default(), MAX_PORTAL_PASSWORD_LEN);
        parsed.newest_version = bounded(lines.next().unwrap_or_default(), VERSION_NUMBER_LEN);
        parsed
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}
