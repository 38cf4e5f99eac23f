use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MenuMode {
    #[default]
    Graphs,
    CalibrationPpm,
    CalibrationPpmConfirm,
    CalibrationTemperature,
    CalibrationTemperatureConfirm,
    Wifi,
    Mqtt,
    Time,
    Update,
}

impl MenuMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Graphs => "GRAPHS",
            Self::CalibrationPpm => "CALIBRATION_PPM",
            Self::CalibrationPpmConfirm => "CALIBRATION_PPM_CONFIRM",
            Self::CalibrationTemperature => "CALIBRATION_TEMPERATURE",
            Self::CalibrationTemperatureConfirm => "CALIBRATION_TEMPERATURE_CONFIRM",
            Self::Wifi => "WIFI",
            Self::Mqtt => "MQTT",
            Self::Time => "TIME",
            Self::Update => "UPDATE",
        }
    }

    /// Menu reached by the "next" hardware button.
    pub fn next(self) -> Self {
        match self {
            Self::Graphs => Self::CalibrationPpm,
            Self::CalibrationPpm => Self::CalibrationTemperature,
            Self::CalibrationTemperature => Self::Wifi,
            Self::Wifi => Self::Mqtt,
            Self::Mqtt => Self::Time,
            Self::Time => Self::Update,
            Self::Update => Self::Graphs,
            Self::CalibrationPpmConfirm | Self::CalibrationTemperatureConfirm => Self::Graphs,
        }
    }

    pub fn is_calibration(self) -> bool {
        matches!(
            self,
            Self::CalibrationPpm
                | Self::CalibrationPpmConfirm
                | Self::CalibrationTemperature
                | Self::CalibrationTemperatureConfirm
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GraphMode {
    #[default]
    Co2,
    Temperature,
    Humidity,
    BatteryMah,
}

impl GraphMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Co2 => "CO2",
            Self::Temperature => "TEMPERATURE",
            Self::Humidity => "HUMIDITY",
            Self::BatteryMah => "BATTERY_MAH",
        }
    }
}

/// Station status as reported by the radio driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WifiStatus {
    Idle,
    NoSsidAvailable,
    ScanCompleted,
    Connected,
    ConnectFailed,
    ConnectionLost,
    #[default]
    Disconnected,
}

impl WifiStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::NoSsidAvailable => "NO_SSID_AVAILABLE",
            Self::ScanCompleted => "SCAN_COMPLETED",
            Self::Connected => "CONNECTED",
            Self::ConnectFailed => "CONNECT_FAILED",
            Self::ConnectionLost => "CONNECTION_LOST",
            Self::Disconnected => "DISCONNECTED",
        }
    }

    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkState {
    #[default]
    LinkDown,
    Scanning,
    Connecting,
    StationUpBrokerDown,
    StationUpBrokerStarting,
    StationUpBrokerUp,
}

impl LinkState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LinkDown => "LINK_DOWN",
            Self::Scanning => "SCANNING",
            Self::Connecting => "CONNECTING",
            Self::StationUpBrokerDown => "STATION_UP_BROKER_DOWN",
            Self::StationUpBrokerStarting => "STATION_UP_BROKER_STARTING",
            Self::StationUpBrokerUp => "STATION_UP_BROKER_UP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationNotice {
    Applied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiNotice {
    PortalCredentials,
    Connected,
    Failed,
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSyncNotice {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateNotice {
    Failed,
}

/// Last outcome per subsystem, shown once on the matching settings screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Notices {
    pub calibration: Option<CalibrationNotice>,
    pub wifi: Option<WifiNotice>,
    pub time: Option<TimeSyncNotice>,
    pub update: Option<UpdateNotice>,
}

impl Notices {
    /// Drops the outcomes that belong to screens other than `mode`.
    pub fn retain_for(&mut self, mode: MenuMode) {
        if !mode.is_calibration() {
            self.calibration = None;
        }
        if mode != MenuMode::Time {
            self.time = None;
        }
        if mode != MenuMode::Update {
            self.update = None;
        }
    }
}
