use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage i/o failed for `{key}`: {message}")]
    Io { key: &'static str, message: String },
    #[error("stored `{key}` is malformed: {source}")]
    Malformed {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode `{key}`: {source}")]
    Encode {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("station is not connected")]
    NotConnected,
    #[error("http request failed: {0}")]
    Http(String),
    #[error("version manifest is malformed: {0}")]
    MalformedManifest(String),
    #[error("firmware image incomplete: wrote {written} of {expected} bytes")]
    SizeMismatch { written: u64, expected: u64 },
    #[error("firmware image has no declared length")]
    MissingLength,
    #[error("flashing failed: {0}")]
    Flash(String),
    #[error("network time unavailable: {0}")]
    Ntp(String),
}

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("air sensor not detected")]
    NotDetected,
    #[error("air sensor bus error: {0}")]
    Bus(String),
}

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("captive portal failed to start: {0}")]
    Start(String),
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Sensor(#[from] SensorError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("display error: {0}")]
    Display(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown time zone `{0}`")]
    UnknownTimezone(String),
    #[error("invalid runtime config: {0}")]
    Invalid(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DataLogError {
    #[error("data log unavailable")]
    Unavailable,
    #[error("data log write failed: {0}")]
    Write(String),
}
