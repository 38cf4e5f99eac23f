use serde::Serialize;

use crate::topics::{
    metric_topic, TOPIC_CO2, TOPIC_DISCOVERY_CONFIG, TOPIC_DISCOVERY_PREFIX, TOPIC_HUMIDITY,
    TOPIC_TEMPERATURE,
};

pub const DEVICE_MODEL: &str = "Smoca CO2 Sensor";
pub const DEVICE_MANUFACTURER: &str = "Smoca AG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Co2,
    Humidity,
    Temperature,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Co2, Metric::Humidity, Metric::Temperature];

    pub fn key(self) -> &'static str {
        match self {
            Self::Co2 => "co2",
            Self::Humidity => "humidity",
            Self::Temperature => "temperature",
        }
    }

    fn title(self) -> &'static str {
        match self {
            Self::Co2 => "CO2",
            Self::Humidity => "Humidity",
            Self::Temperature => "Temperature",
        }
    }

    fn topic_suffix(self) -> &'static str {
        match self {
            Self::Co2 => TOPIC_CO2,
            Self::Humidity => TOPIC_HUMIDITY,
            Self::Temperature => TOPIC_TEMPERATURE,
        }
    }

    fn unit(self) -> &'static str {
        match self {
            Self::Co2 => "ppm",
            Self::Humidity => "%",
            Self::Temperature => "°C",
        }
    }

    fn device_class(self) -> &'static str {
        match self {
            Self::Co2 => "carbon_dioxide",
            Self::Humidity => "humidity",
            Self::Temperature => "temperature",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    pub identifiers: Vec<String>,
    pub name: String,
    pub model: &'static str,
    pub manufacturer: &'static str,
}

/// Retained config message that lets a home automation hub pick up one metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryDescriptor {
    #[serde(skip)]
    pub config_topic: String,
    pub unique_id: String,
    pub name: String,
    pub state_topic: String,
    pub unit_of_measurement: &'static str,
    pub value_template: &'static str,
    pub device_class: &'static str,
    pub device: DeviceDescriptor,
}

impl DiscoveryDescriptor {
    pub fn payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Topic-safe identifier derived from the broker client id.
pub fn object_id(client_id: &str) -> String {
    client_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

pub fn descriptors(client_id: &str, topic: &str) -> Vec<DiscoveryDescriptor> {
    let device_id = object_id(client_id);
    let device = DeviceDescriptor {
        identifiers: vec![device_id.clone()],
        name: client_id.to_string(),
        model: DEVICE_MODEL,
        manufacturer: DEVICE_MANUFACTURER,
    };

    Metric::ALL
        .iter()
        .map(|metric| DiscoveryDescriptor {
            config_topic: format!(
                "{TOPIC_DISCOVERY_PREFIX}{device_id}/{}{TOPIC_DISCOVERY_CONFIG}",
                metric.key()
            ),
            unique_id: format!("{device_id}_{}", metric.key()),
            name: format!("{device_id} {}", metric.title()),
            state_topic: metric_topic(topic, metric.topic_suffix()),
            unit_of_measurement: metric.unit(),
            value_template: "{{ value }}",
            device_class: metric.device_class(),
            device: device.clone(),
        })
        .collect()
}
