use chrono::Timelike;
use embedded_graphics::{
    prelude::{Point, Size},
    primitives::Rectangle,
};

use crate::{
    state::DeviceState,
    types::{CalibrationNotice, GraphMode, MenuMode, TimeSyncNotice, UpdateNotice, WifiNotice, WifiStatus},
};

pub const HEADER: Rectangle = Rectangle::new(Point::new(0, 0), Size::new(320, 26));
pub const VALUES: Rectangle = Rectangle::new(Point::new(0, 26), Size::new(320, 117));
pub const GRAPH: Rectangle = Rectangle::new(Point::new(0, 144), Size::new(320, 97));
pub const BODY: Rectangle = Rectangle::new(Point::new(0, 26), Size::new(320, 214));

pub const PLOT_HEIGHT: i32 = 96;

pub(crate) fn header_key(state: &DeviceState) -> (u32, i32, bool, bool) {
    (
        state.current_time.second(),
        state.battery.percent,
        state.battery.in_ac,
        state.display_sleep,
    )
}

pub(crate) fn values_key(state: &DeviceState) -> (i32, i32, i32, bool, MenuMode) {
    (
        state.co2_ppm,
        state.humidity_decipct,
        state.temperature_decideg,
        state.display_sleep,
        state.menu_mode,
    )
}

pub(crate) fn graph_key(state: &DeviceState) -> (GraphMode, usize, bool, MenuMode) {
    (
        state.graph_mode,
        state.graph_index,
        state.display_sleep,
        state.menu_mode,
    )
}

/// Fields whose change repaints the settings body of the current mode.
#[derive(Debug, PartialEq)]
pub(crate) enum BodyKey<'a> {
    Graphs,
    CalibrationPpm {
        sleep: bool,
        target: i32,
        auto_on: bool,
        notice: Option<CalibrationNotice>,
    },
    CalibrationTemperature {
        sleep: bool,
        target: f32,
        auto_on: bool,
        notice: Option<CalibrationNotice>,
    },
    Confirm {
        sleep: bool,
        mode: MenuMode,
    },
    Wifi {
        sleep: bool,
        activated: bool,
        requesting_reset: bool,
        status: WifiStatus,
        notice: Option<WifiNotice>,
    },
    Mqtt {
        sleep: bool,
        connected: bool,
        server: &'a str,
        port: &'a str,
        device: &'a str,
    },
    Time {
        sleep: bool,
        status: WifiStatus,
        notice: Option<TimeSyncNotice>,
        force_sync: bool,
    },
    Update {
        sleep: bool,
        status: WifiStatus,
        newest: &'a str,
        notice: Option<UpdateNotice>,
    },
}

impl<'a> BodyKey<'a> {
    pub(crate) fn of(state: &'a DeviceState) -> Self {
        let sleep = state.display_sleep;
        match state.menu_mode {
            MenuMode::Graphs => Self::Graphs,
            MenuMode::CalibrationPpm => Self::CalibrationPpm {
                sleep,
                target: state.calibration.ppm_target,
                auto_on: state.calibration.auto_on,
                notice: state.notices.calibration,
            },
            MenuMode::CalibrationTemperature => Self::CalibrationTemperature {
                sleep,
                target: state.calibration.temperature_target_c,
                auto_on: state.calibration.auto_on,
                notice: state.notices.calibration,
            },
            mode @ (MenuMode::CalibrationPpmConfirm | MenuMode::CalibrationTemperatureConfirm) => {
                Self::Confirm { sleep, mode }
            }
            MenuMode::Wifi => Self::Wifi {
                sleep,
                activated: state.wifi.activated,
                requesting_reset: state.wifi.requesting_reset,
                status: state.wifi.status,
                notice: state.notices.wifi,
            },
            MenuMode::Mqtt => Self::Mqtt {
                sleep,
                connected: state.is_mqtt_connected,
                server: &state.broker.server,
                port: &state.broker.port,
                device: &state.broker.device,
            },
            MenuMode::Time => Self::Time {
                sleep,
                status: state.wifi.status,
                notice: state.notices.time,
                force_sync: state.force_sync,
            },
            MenuMode::Update => Self::Update {
                sleep,
                status: state.wifi.status,
                newest: &state.firmware.newest_version,
                notice: state.notices.update,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_key_ignores_fields_of_other_screens() {
        let mut old = DeviceState::new(2, 0);
        old.menu_mode = MenuMode::Mqtt;
        let mut state = old.clone();
        state.calibration.ppm_target = 900;
        state.co2_ppm = 1200;

        assert_eq!(BodyKey::of(&old), BodyKey::of(&state));

        state.broker.port = "1883".to_string();
        assert_ne!(BodyKey::of(&old), BodyKey::of(&state));
    }

    #[test]
    fn header_follows_seconds_and_power() {
        let old = DeviceState::new(2, 0);
        let mut state = old.clone();
        state.co2_ppm = 700;
        assert_eq!(header_key(&old), header_key(&state));

        state.battery.in_ac = true;
        assert_ne!(header_key(&old), header_key(&state));
    }
}
