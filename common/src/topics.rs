pub const TOPIC_CO2: &str = "/co2";
pub const TOPIC_HUMIDITY: &str = "/humidity";
pub const TOPIC_TEMPERATURE: &str = "/temperature";

pub const TOPIC_DISCOVERY_PREFIX: &str = "homeassistant/sensor/";
pub const TOPIC_DISCOVERY_CONFIG: &str = "/config";

pub fn metric_topic(prefix: &str, suffix: &str) -> String {
    format!("{prefix}{suffix}")
}
