use log::info;
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    config::{BrokerConfig, PersistedState, RuntimeConfig},
    credentials::WifiCredentialSet,
    error::StoreError,
    state::DeviceState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    State,
    Broker,
    Credentials,
    Runtime,
}

impl StoreKey {
    pub fn name(self) -> &'static str {
        match self {
            Self::State => "/state",
            Self::Broker => "/mqtt.json",
            Self::Credentials => "/wifi_config",
            Self::Runtime => "/runtime.json",
        }
    }
}

/// Durable key-value storage. `read` yields `None` for a key that was never written.
pub trait KeyValueStore {
    fn read(&mut self, key: StoreKey) -> Result<Option<String>, StoreError>;
    fn write(&mut self, key: StoreKey, value: &str) -> Result<(), StoreError>;
    fn remove(&mut self, key: StoreKey) -> Result<(), StoreError>;
}

pub fn load_persisted(store: &mut dyn KeyValueStore) -> Result<Option<PersistedState>, StoreError> {
    Ok(store
        .read(StoreKey::State)?
        .map(|record| PersistedState::parse_record(&record)))
}

pub fn save_persisted(
    store: &mut dyn KeyValueStore,
    persisted: &PersistedState,
) -> Result<(), StoreError> {
    store.write(StoreKey::State, &persisted.to_record())
}

/// Writes `/state` only when one of its fields moved since the previous tick.
pub fn save_state_if_changed(
    store: &mut dyn KeyValueStore,
    old: &DeviceState,
    state: &DeviceState,
) -> Result<bool, StoreError> {
    let previous = PersistedState::from_state(old);
    let current = PersistedState::from_state(state);
    if previous == current {
        return Ok(false);
    }

    save_persisted(store, &current)?;
    info!("state record saved");
    Ok(true)
}

fn load_json<T>(store: &mut dyn KeyValueStore, key: StoreKey) -> Result<Option<T>, StoreError>
where
    T: DeserializeOwned,
{
    match store.read(key)? {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Malformed {
                key: key.name(),
                source,
            }),
        _ => Ok(None),
    }
}

fn save_json<T>(store: &mut dyn KeyValueStore, key: StoreKey, value: &T) -> Result<(), StoreError>
where
    T: Serialize,
{
    let payload = serde_json::to_string_pretty(value).map_err(|source| StoreError::Encode {
        key: key.name(),
        source,
    })?;
    store.write(key, &payload)
}

pub fn load_broker(store: &mut dyn KeyValueStore) -> Result<BrokerConfig, StoreError> {
    let mut broker = load_json::<BrokerConfig>(store, StoreKey::Broker)?.unwrap_or_default();
    broker.sanitize();
    Ok(broker)
}

pub fn save_broker(store: &mut dyn KeyValueStore, broker: &BrokerConfig) -> Result<(), StoreError> {
    save_json(store, StoreKey::Broker, broker)?;
    info!("broker config saved");
    Ok(())
}

pub fn load_credentials(store: &mut dyn KeyValueStore) -> Result<WifiCredentialSet, StoreError> {
    let mut credentials =
        load_json::<WifiCredentialSet>(store, StoreKey::Credentials)?.unwrap_or_default();
    credentials.sanitize();
    Ok(credentials)
}

pub fn save_credentials(
    store: &mut dyn KeyValueStore,
    credentials: &WifiCredentialSet,
) -> Result<(), StoreError> {
    save_json(store, StoreKey::Credentials, credentials)?;
    info!("wifi credentials saved");
    Ok(())
}

pub fn clear_credentials(store: &mut dyn KeyValueStore) -> Result<(), StoreError> {
    store.remove(StoreKey::Credentials)
}

pub fn load_runtime(store: &mut dyn KeyValueStore) -> Result<RuntimeConfig, StoreError> {
    let mut runtime = load_json::<RuntimeConfig>(store, StoreKey::Runtime)?.unwrap_or_default();
    runtime.sanitize();
    Ok(runtime)
}
