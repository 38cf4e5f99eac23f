use std::net::Ipv4Addr;

use chrono::{NaiveDate, NaiveDateTime, Timelike};

use crate::{
    config::{BrokerConfig, DEFAULT_BATTERY_CAPACITY_MAH, MIN_CALIBRATION_PPM},
    types::{GraphMode, LinkState, MenuMode, Notices, WifiStatus},
};

#[derive(Debug, Clone, PartialEq)]
pub struct BatteryState {
    pub percent: i32,
    pub mah: f32,
    pub voltage: f32,
    pub current: f32,
    pub capacity_mah: f32,
    pub in_ac: bool,
}

impl Default for BatteryState {
    fn default() -> Self {
        Self {
            percent: 0,
            mah: 0.0,
            voltage: 0.0,
            current: 0.0,
            capacity_mah: DEFAULT_BATTERY_CAPACITY_MAH,
            in_ac: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationState {
    pub auto_on: bool,
    pub ppm_target: i32,
    pub temperature_target_c: f32,
}

impl Default for CalibrationState {
    fn default() -> Self {
        Self {
            auto_on: false,
            ppm_target: MIN_CALIBRATION_PPM,
            temperature_target_c: 22.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WifiState {
    pub activated: bool,
    pub config_running: bool,
    pub requesting_reset: bool,
    pub status: WifiStatus,
    pub link_state: LinkState,
    pub ssid: String,
    pub local_ip: Option<Ipv4Addr>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FirmwareState {
    pub newest_version: String,
    pub is_requesting_update: bool,
}

/// Everything one tick reads and writes. Cloned at tick start to form the snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    pub co2_ppm: i32,
    pub temperature_decideg: i32,
    pub humidity_decipct: i32,
    pub battery: BatteryState,

    pub current_time: NaiveDateTime,
    pub next_time_sync: NaiveDateTime,
    pub is_sync_needed: bool,
    pub force_sync: bool,

    pub menu_mode: MenuMode,
    pub graph_mode: GraphMode,
    pub graph_index: usize,
    pub display_sleep: bool,

    pub calibration: CalibrationState,
    pub wifi: WifiState,
    pub portal_password: String,
    pub broker: BrokerConfig,
    pub is_mqtt_connected: bool,
    pub firmware: FirmwareState,
    pub notices: Notices,
}

impl DeviceState {
    pub fn new(sync_hour: u32, sync_minute: u32) -> Self {
        Self {
            co2_ppm: 0,
            temperature_decideg: 0,
            humidity_decipct: 0,
            battery: BatteryState::default(),
            current_time: NaiveDateTime::default(),
            next_time_sync: initial_sync_deadline(sync_hour, sync_minute),
            is_sync_needed: false,
            force_sync: false,
            menu_mode: MenuMode::Graphs,
            graph_mode: GraphMode::Co2,
            graph_index: 0,
            display_sleep: false,
            calibration: CalibrationState::default(),
            wifi: WifiState::default(),
            portal_password: String::new(),
            broker: BrokerConfig::default(),
            is_mqtt_connected: false,
            firmware: FirmwareState::default(),
            notices: Notices::default(),
        }
    }

    pub fn temperature_c(&self) -> f32 {
        self.temperature_decideg as f32 / 10.0
    }

    pub fn humidity_pct(&self) -> f32 {
        self.humidity_decipct as f32 / 10.0
    }

    pub fn minute_changed(&self, old: &Self) -> bool {
        self.current_time.minute() != old.current_time.minute()
    }
}

/// A deadline in the distant past, so the first minute change asks for a sync.
fn initial_sync_deadline(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1900, 1, 1)
        .and_then(|date| date.and_hms_opt(hour.min(23), minute.min(59), 0))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_is_due_for_a_sync() {
        let state = DeviceState::new(2, 17);

        assert_eq!(
            state.next_time_sync,
            NaiveDate::from_ymd_opt(1900, 1, 1)
                .unwrap()
                .and_hms_opt(2, 17, 0)
                .unwrap()
        );
        assert_eq!(state.calibration.ppm_target, 400);
        assert_eq!(state.wifi.status, WifiStatus::Disconnected);
        assert_eq!(state.wifi.link_state, LinkState::LinkDown);
    }

    #[test]
    fn readings_scale_from_tenths() {
        let mut state = DeviceState::new(2, 0);
        state.temperature_decideg = 234;
        state.humidity_decipct = 456;

        assert!((state.temperature_c() - 23.4).abs() < 1e-4);
        assert!((state.humidity_pct() - 45.6).abs() < 1e-4);
    }
}
