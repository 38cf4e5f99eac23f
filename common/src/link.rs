use std::{collections::HashSet, net::Ipv4Addr};

use log::{info, warn};

use crate::{
    config::{BrokerConfig, LinkTimings},
    credentials::{select_best, Bssid, Candidate, ScanResult, WifiCredential, WifiCredentialSet},
    discovery,
    error::PortalError,
    state::DeviceState,
    storage::{self, KeyValueStore},
    topics::{metric_topic, TOPIC_CO2, TOPIC_HUMIDITY, TOPIC_TEMPERATURE},
    types::{LinkState, WifiNotice, WifiStatus},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanPoll {
    Running,
    Complete(Vec<ScanResult>),
}

/// Station side of the WiFi radio. Every call returns without waiting for the air.
pub trait WifiRadio {
    fn status(&mut self) -> WifiStatus;
    fn start_scan(&mut self);
    fn poll_scan(&mut self) -> ScanPoll;
    fn begin_connect(&mut self, candidate: &Candidate);
    /// Drops the association; `erase` also forgets what the driver remembered.
    fn disconnect(&mut self, erase: bool);
    fn connected_ssid(&self) -> Option<String>;
    fn local_ip(&self) -> Option<Ipv4Addr>;
}

pub trait BrokerClient {
    fn configure(&mut self, config: &BrokerConfig);
    /// Opens a session and reports whether the broker accepted it.
    fn connect(&mut self, client_id: &str, credentials: Option<(&str, &str)>) -> bool;
    fn is_connected(&self) -> bool;
    fn disconnect(&mut self);
    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> bool;
    /// Services keepalive and returns whether the session is still up.
    fn poll(&mut self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningResult {
    pub networks: Vec<WifiCredential>,
    pub broker: BrokerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortalEvent {
    Completed(ProvisioningResult),
    TimedOut,
}

/// Captive configuration portal served from the device's own access point.
pub trait Provisioner {
    fn start(&mut self, ap_ssid: &str, password: &str) -> Result<(), PortalError>;
    fn poll(&mut self) -> Option<PortalEvent>;
    fn stop(&mut self);
}

pub struct LinkPorts<'a> {
    pub radio: &'a mut dyn WifiRadio,
    pub broker: &'a mut dyn BrokerClient,
    pub portal: &'a mut dyn Provisioner,
    pub store: &'a mut dyn KeyValueStore,
}

/// Owns WiFi acquisition, credential selection and broker staging, one step per tick.
pub struct NetworkLinkManager {
    timings: LinkTimings,
    discovery: bool,
    ap_ssid: String,
    credentials: WifiCredentialSet,

    tried: HashSet<Bssid>,
    scan: Option<Vec<ScanResult>>,

    next_scan_ms: u64,
    connect_deadline_ms: u64,
    next_broker_attempt_ms: u64,
    next_publish_ms: Option<u64>,
    next_portal_attempt_ms: u64,
    portal_deadline_ms: Option<u64>,
}

impl NetworkLinkManager {
    pub fn new(
        timings: LinkTimings,
        discovery: bool,
        ap_ssid: String,
        credentials: WifiCredentialSet,
    ) -> Self {
        Self {
            timings,
            discovery,
            ap_ssid,
            credentials,
            tried: HashSet::new(),
            scan: None,
            next_scan_ms: 0,
            connect_deadline_ms: 0,
            next_broker_attempt_ms: 0,
            next_publish_ms: None,
            next_portal_attempt_ms: 0,
            portal_deadline_ms: None,
        }
    }

    pub fn credentials(&self) -> &WifiCredentialSet {
        &self.credentials
    }

    pub fn ap_ssid(&self) -> &str {
        &self.ap_ssid
    }

    pub fn tick(
        &mut self,
        now_ms: u64,
        old: &DeviceState,
        state: &mut DeviceState,
        ports: &mut LinkPorts<'_>,
    ) {
        self.handle_provisioning(now_ms, state, ports);

        if !state.wifi.config_running {
            self.step(now_ms, state, ports);
        }

        if old.wifi.link_state != state.wifi.link_state {
            info!(
                "link state {} -> {}",
                old.wifi.link_state.as_str(),
                state.wifi.link_state.as_str()
            );
        }
    }

    fn handle_provisioning(
        &mut self,
        now_ms: u64,
        state: &mut DeviceState,
        ports: &mut LinkPorts<'_>,
    ) {
        let activated = state.wifi.activated;
        let idle = !state.wifi.config_running;

        if activated && idle && state.wifi.requesting_reset {
            info!("wifi reset requested, clearing credentials");
            self.credentials.clear();
            if let Err(err) = storage::clear_credentials(ports.store) {
                warn!("failed to remove stored wifi credentials: {err}");
            }
            ports.radio.disconnect(true);
            self.tried.clear();
            self.scan = None;
            state.wifi.requesting_reset = false;
            state.wifi.link_state = LinkState::LinkDown;
            self.start_portal(now_ms, state, ports);
        } else if activated
            && idle
            && !state.wifi.status.is_connected()
            && self.credentials.is_empty()
            && now_ms >= self.next_portal_attempt_ms
        {
            info!("no wifi credentials stored, starting config portal");
            self.start_portal(now_ms, state, ports);
        }

        if !state.wifi.config_running {
            return;
        }

        let event = match ports.portal.poll() {
            Some(event) => Some(event),
            None if self
                .portal_deadline_ms
                .is_some_and(|deadline| now_ms >= deadline) =>
            {
                Some(PortalEvent::TimedOut)
            }
            None => None,
        };

        match event {
            Some(PortalEvent::Completed(result)) => {
                self.complete_provisioning(result, state, ports);
            }
            Some(PortalEvent::TimedOut) => {
                info!("config portal timed out");
                self.close_portal(state, ports);
            }
            None => {}
        }
    }

    fn start_portal(&mut self, now_ms: u64, state: &mut DeviceState, ports: &mut LinkPorts<'_>) {
        match ports.portal.start(&self.ap_ssid, &state.portal_password) {
            Ok(()) => {
                info!("config portal open on `{}`", self.ap_ssid);
                state.wifi.config_running = true;
                self.portal_deadline_ms = Some(now_ms + self.timings.portal_timeout_ms);
            }
            Err(err) => {
                warn!("{err}");
                self.next_portal_attempt_ms = now_ms + self.timings.scan_interval_ms;
            }
        }
    }

    fn close_portal(&mut self, state: &mut DeviceState, ports: &mut LinkPorts<'_>) {
        ports.portal.stop();
        state.wifi.config_running = false;
        self.portal_deadline_ms = None;
    }

    fn complete_provisioning(
        &mut self,
        result: ProvisioningResult,
        state: &mut DeviceState,
        ports: &mut LinkPorts<'_>,
    ) {
        info!(
            "config portal delivered {} network(s)",
            result.networks.len()
        );

        self.credentials.merge_provisioned(&result.networks);
        if let Err(err) = storage::save_credentials(ports.store, &self.credentials) {
            warn!("failed to persist wifi credentials: {err}");
        }

        let mut broker = result.broker;
        broker.sanitize();
        if let Err(err) = storage::save_broker(ports.store, &broker) {
            warn!("failed to persist broker config: {err}");
        }
        ports.broker.configure(&broker);
        state.broker = broker;

        self.tried.clear();
        self.scan = None;
        self.close_portal(state, ports);
    }

    fn step(&mut self, now_ms: u64, state: &mut DeviceState, ports: &mut LinkPorts<'_>) {
        let activated = state.wifi.activated;
        let link_up = state.wifi.status.is_connected();

        if !activated && state.wifi.link_state != LinkState::LinkDown {
            self.scan = None;
            self.next_scan_ms = now_ms + self.timings.scan_interval_ms;
            state.wifi.link_state = LinkState::LinkDown;
            return;
        }

        match state.wifi.link_state {
            LinkState::LinkDown => {
                if !activated {
                    if link_up {
                        ports.radio.disconnect(false);
                    }
                    if ports.broker.is_connected() {
                        ports.broker.disconnect();
                    }
                    return;
                }

                if link_up && ports.broker.is_connected() {
                    state.wifi.link_state = LinkState::StationUpBrokerUp;
                } else if link_up {
                    self.next_broker_attempt_ms = now_ms + self.timings.broker_retry_ms;
                    state.wifi.link_state = LinkState::StationUpBrokerDown;
                } else if now_ms >= self.next_scan_ms && !self.credentials.is_empty() {
                    self.tried.clear();
                    self.scan = None;
                    ports.radio.start_scan();
                    state.wifi.link_state = LinkState::Scanning;
                }
            }

            LinkState::Scanning => self.step_scanning(now_ms, state, ports),

            LinkState::Connecting => {
                if link_up {
                    self.scan = None;
                    state.wifi.link_state = if ports.broker.is_connected() {
                        LinkState::StationUpBrokerUp
                    } else {
                        LinkState::StationUpBrokerDown
                    };
                } else if now_ms >= self.connect_deadline_ms {
                    info!("station connect timed out");
                    state.wifi.link_state = LinkState::Scanning;
                }
            }

            LinkState::StationUpBrokerDown => {
                if !link_up {
                    self.next_scan_ms = now_ms + self.timings.scan_interval_ms;
                    state.wifi.link_state = LinkState::LinkDown;
                    return;
                }

                if !state.broker.is_configured() || now_ms < self.next_broker_attempt_ms {
                    return;
                }

                ports.broker.configure(&state.broker);
                let client_id = state.broker.client_id(&self.ap_ssid);
                if ports.broker.connect(client_id, state.broker.credentials()) {
                    info!("broker session opened as `{client_id}`");
                } else {
                    warn!(
                        "broker connect to {}:{} failed",
                        state.broker.server, state.broker.port
                    );
                }
                state.wifi.link_state = LinkState::StationUpBrokerStarting;
            }

            LinkState::StationUpBrokerStarting => {
                if !link_up {
                    ports.radio.disconnect(false);
                    state.wifi.link_state = LinkState::LinkDown;
                } else if ports.broker.is_connected() {
                    self.next_publish_ms = None;
                    if self.discovery {
                        self.announce(state, ports.broker);
                    }
                    state.wifi.link_state = LinkState::StationUpBrokerUp;
                } else {
                    self.next_broker_attempt_ms = now_ms + self.timings.broker_retry_ms;
                    state.wifi.link_state = LinkState::StationUpBrokerDown;
                }
            }

            LinkState::StationUpBrokerUp => {
                if !link_up {
                    ports.radio.disconnect(false);
                    ports.broker.disconnect();
                    state.wifi.link_state = LinkState::LinkDown;
                } else if !ports.broker.is_connected() {
                    warn!("broker session lost");
                    ports.broker.disconnect();
                    self.next_broker_attempt_ms = now_ms + self.timings.broker_retry_ms;
                    state.wifi.link_state = LinkState::StationUpBrokerDown;
                } else if self.next_publish_ms.map_or(true, |next| now_ms >= next) {
                    publish_metrics(state, ports.broker);
                    self.next_publish_ms = Some(now_ms + self.timings.publish_interval_ms);
                }
            }
        }
    }

    fn step_scanning(&mut self, now_ms: u64, state: &mut DeviceState, ports: &mut LinkPorts<'_>) {
        if self.scan.is_none() {
            match ports.radio.poll_scan() {
                ScanPoll::Running => return,
                ScanPoll::Complete(results) => self.scan = Some(results),
            }
        }

        let results = self.scan.as_deref().unwrap_or_default();
        if results.is_empty() {
            info!("scan found no networks");
            self.scan = None;
            self.next_scan_ms = now_ms + self.timings.scan_interval_ms;
            state.wifi.link_state = LinkState::LinkDown;
            return;
        }

        match select_best(results, &self.credentials, &self.tried) {
            Some(candidate) => {
                info!(
                    "connecting to `{}` via {} ({} dBm, channel {})",
                    candidate.ssid, candidate.bssid, candidate.rssi, candidate.channel
                );
                ports.radio.begin_connect(&candidate);
                self.tried.insert(candidate.bssid);
                self.next_broker_attempt_ms = now_ms + self.timings.broker_retry_ms;
                self.connect_deadline_ms = now_ms + self.timings.connect_timeout_ms;
                state.wifi.link_state = LinkState::Connecting;
            }
            None => {
                info!("no known network left to try");
                self.tried.clear();
                self.scan = None;
                self.next_scan_ms = now_ms + self.timings.scan_interval_ms;
                state.wifi.link_state = LinkState::LinkDown;
            }
        }
    }

    fn announce(&self, state: &DeviceState, broker: &mut dyn BrokerClient) {
        if state.broker.topic.is_empty() {
            return;
        }

        let client_id = state.broker.client_id(&self.ap_ssid);
        for descriptor in discovery::descriptors(client_id, &state.broker.topic) {
            match descriptor.payload() {
                Ok(payload) => {
                    if !broker.publish(&descriptor.config_topic, payload.as_bytes(), true) {
                        warn!("discovery publish to {} failed", descriptor.config_topic);
                    }
                }
                Err(err) => warn!("failed to encode discovery payload: {err}"),
            }
        }
    }
}

fn publish_metrics(state: &DeviceState, broker: &mut dyn BrokerClient) {
    let topic = &state.broker.topic;
    if topic.is_empty() {
        return;
    }

    let metrics = [
        (TOPIC_CO2, state.co2_ppm.to_string()),
        (TOPIC_HUMIDITY, format!("{:.1}", state.humidity_pct())),
        (TOPIC_TEMPERATURE, format!("{:.1}", state.temperature_c())),
    ];

    for (suffix, payload) in metrics {
        let full_topic = metric_topic(topic, suffix);
        if broker.publish(&full_topic, payload.as_bytes(), false) {
            info!("published {payload} to {full_topic}");
        } else {
            warn!("publish to {full_topic} failed");
        }
    }
}

/// Derives the WiFi screen notice from the portal flag and status transitions.
pub fn update_wifi_notice(old: &DeviceState, state: &mut DeviceState) {
    if state.wifi.config_running {
        state.notices.wifi = Some(WifiNotice::PortalCredentials);
    } else if state.wifi.status != old.wifi.status {
        state.notices.wifi = match state.wifi.status {
            WifiStatus::Connected => Some(WifiNotice::Connected),
            WifiStatus::ConnectFailed => Some(WifiNotice::Failed),
            WifiStatus::ConnectionLost => Some(WifiNotice::Lost),
            _ => None,
        };
    }

    if !state.wifi.activated {
        state.notices.wifi = None;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        credentials::AuthMode,
        sim::{MemoryStore, SimBroker, SimPortal, SimRadio},
    };

    struct Rig {
        radio: SimRadio,
        broker: SimBroker,
        portal: SimPortal,
        store: MemoryStore,
        manager: NetworkLinkManager,
        state: DeviceState,
    }

    impl Rig {
        fn new(credentials: WifiCredentialSet) -> Self {
            let mut state = DeviceState::new(2, 0);
            state.wifi.activated = true;
            state.portal_password = "Ab3dEf9h".to_string();
            state.broker = BrokerConfig {
                server: "10.0.0.2".to_string(),
                port: "1883".to_string(),
                topic: "office".to_string(),
                ..BrokerConfig::default()
            };
            Self {
                radio: SimRadio::default(),
                broker: SimBroker::default(),
                portal: SimPortal::default(),
                store: MemoryStore::default(),
                manager: NetworkLinkManager::new(
                    LinkTimings::default(),
                    false,
                    "SMOCA CO2-ABC123".to_string(),
                    credentials,
                ),
                state,
            }
        }

        fn tick(&mut self, now_ms: u64) {
            let old = self.state.clone();
            self.state.wifi.status = self.radio.status();
            let mut ports = LinkPorts {
                radio: &mut self.radio,
                broker: &mut self.broker,
                portal: &mut self.portal,
                store: &mut self.store,
            };
            self.manager.tick(now_ms, &old, &mut self.state, &mut ports);
        }

        fn link(&self) -> LinkState {
            self.state.wifi.link_state
        }
    }

    fn office() -> WifiCredentialSet {
        WifiCredentialSet {
            router: Some(WifiCredential::new("office", "hunter22")),
            stored: Vec::new(),
        }
    }

    fn ap(last_octet: u8, rssi: i32) -> ScanResult {
        ScanResult {
            ssid: "office".to_string(),
            bssid: Bssid([0x24, 0x0a, 0xc4, 0x00, 0x00, last_octet]),
            rssi,
            channel: 6,
            auth: AuthMode::Secured,
        }
    }

    #[test]
    fn deactivation_forces_link_down_from_every_state() {
        for start in [
            LinkState::Scanning,
            LinkState::Connecting,
            LinkState::StationUpBrokerDown,
            LinkState::StationUpBrokerStarting,
            LinkState::StationUpBrokerUp,
        ] {
            let mut rig = Rig::new(office());
            rig.state.wifi.link_state = start;
            rig.state.wifi.activated = false;

            rig.tick(10_000);

            assert_eq!(rig.link(), LinkState::LinkDown, "from {}", start.as_str());
        }
    }

    #[test]
    fn deactivated_link_down_tears_down_station_and_broker() {
        let mut rig = Rig::new(office());
        rig.radio.associate("office");
        rig.broker.set_connected(true);
        rig.state.wifi.activated = false;

        rig.tick(10_000);

        assert_eq!(rig.radio.disconnects(), 1);
        assert!(!rig.broker.is_connected());
    }

    #[test]
    fn scan_picks_strongest_and_connect_timeout_tries_the_next() {
        let mut rig = Rig::new(office());
        rig.radio.set_scan_results(vec![ap(1, -70), ap(2, -45)]);

        rig.tick(0);
        assert_eq!(rig.link(), LinkState::Scanning);

        rig.tick(50);
        assert_eq!(rig.link(), LinkState::Connecting);
        assert_eq!(rig.radio.last_connect().unwrap().bssid, ap(2, -45).bssid);

        rig.tick(5_050);
        assert_eq!(rig.link(), LinkState::Scanning);

        rig.tick(5_100);
        assert_eq!(rig.link(), LinkState::Connecting);
        assert_eq!(rig.radio.last_connect().unwrap().bssid, ap(1, -70).bssid);
        assert_eq!(rig.radio.scans_started(), 1);
    }

    #[test]
    fn exhausted_candidates_fall_back_to_link_down() {
        let mut rig = Rig::new(office());
        rig.radio.set_scan_results(vec![ap(1, -70)]);

        rig.tick(0);
        rig.tick(50);
        rig.tick(5_050);
        assert_eq!(rig.link(), LinkState::Scanning);

        rig.tick(5_100);
        assert_eq!(rig.link(), LinkState::LinkDown);

        rig.tick(9_000);
        assert_eq!(rig.link(), LinkState::LinkDown);

        rig.tick(10_100);
        assert_eq!(rig.link(), LinkState::Scanning);
        assert_eq!(rig.radio.scans_started(), 2);
    }

    #[test]
    fn empty_scan_waits_for_the_next_interval() {
        let mut rig = Rig::new(office());

        rig.tick(0);
        rig.tick(50);

        assert_eq!(rig.link(), LinkState::LinkDown);
        rig.tick(1_000);
        assert_eq!(rig.link(), LinkState::LinkDown);
    }

    #[test]
    fn reaches_broker_up_and_publishes_once_per_interval() {
        let mut rig = Rig::new(office());
        rig.radio.set_scan_results(vec![ap(1, -60)]);
        rig.state.co2_ppm = 812;
        rig.state.humidity_decipct = 456;
        rig.state.temperature_decideg = 231;

        rig.tick(0);
        rig.tick(50);
        rig.radio.associate("office");
        rig.tick(100);
        assert_eq!(rig.link(), LinkState::StationUpBrokerDown);

        rig.tick(2_050);
        assert_eq!(rig.link(), LinkState::StationUpBrokerStarting);
        rig.tick(2_100);
        assert_eq!(rig.link(), LinkState::StationUpBrokerUp);

        rig.tick(2_150);
        assert_eq!(
            rig.broker.published(),
            vec![
                ("office/co2".to_string(), "812".to_string(), false),
                ("office/humidity".to_string(), "45.6".to_string(), false),
                ("office/temperature".to_string(), "23.1".to_string(), false),
            ]
        );

        rig.tick(30_000);
        rig.tick(62_100);
        assert_eq!(rig.broker.published().len(), 3);
        rig.tick(62_150);
        assert_eq!(rig.broker.published().len(), 6);
    }

    #[test]
    fn unconfigured_broker_stays_down_without_attempts() {
        let mut rig = Rig::new(office());
        rig.state.broker.port = String::new();
        rig.radio.associate("office");

        for now in (0..20_000).step_by(50) {
            rig.tick(now);
        }

        assert_eq!(rig.link(), LinkState::StationUpBrokerDown);
        assert_eq!(rig.broker.connect_attempts(), 0);
    }

    #[test]
    fn refused_broker_retries_after_the_retry_interval() {
        let mut rig = Rig::new(office());
        rig.radio.associate("office");
        rig.broker.refuse_connections(true);

        rig.tick(0);
        rig.tick(2_000);
        assert_eq!(rig.link(), LinkState::StationUpBrokerStarting);
        rig.tick(2_050);
        assert_eq!(rig.link(), LinkState::StationUpBrokerDown);
        rig.tick(3_000);
        assert_eq!(rig.broker.connect_attempts(), 1);
        rig.tick(4_050);
        assert_eq!(rig.broker.connect_attempts(), 2);
    }

    #[test]
    fn lost_link_while_broker_up_drops_both() {
        let mut rig = Rig::new(office());
        rig.radio.associate("office");
        rig.broker.set_connected(true);

        rig.tick(0);
        assert_eq!(rig.link(), LinkState::StationUpBrokerUp);

        rig.radio.drop_association();
        rig.tick(50);

        assert_eq!(rig.link(), LinkState::LinkDown);
        assert!(!rig.broker.is_connected());
    }

    #[test]
    fn discovery_is_announced_on_session_start() {
        let mut rig = Rig::new(office());
        rig.manager.discovery = true;
        rig.radio.associate("office");

        rig.tick(0);
        rig.tick(2_000);
        rig.tick(2_050);

        let retained: Vec<String> = rig
            .broker
            .published()
            .into_iter()
            .filter(|(_, _, retain)| *retain)
            .map(|(topic, _, _)| topic)
            .collect();
        assert_eq!(
            retained,
            vec![
                "homeassistant/sensor/smoca_co2-abc123/co2/config",
                "homeassistant/sensor/smoca_co2-abc123/humidity/config",
                "homeassistant/sensor/smoca_co2-abc123/temperature/config",
            ]
        );
    }

    #[test]
    fn missing_credentials_open_the_portal_instead_of_scanning() {
        let mut rig = Rig::new(WifiCredentialSet::default());

        for now in (0..1_000).step_by(50) {
            rig.tick(now);
            assert_ne!(rig.link(), LinkState::Scanning);
        }

        assert!(rig.state.wifi.config_running);
        assert_eq!(rig.portal.starts(), 1);
        assert_eq!(
            rig.portal.last_start(),
            Some(("SMOCA CO2-ABC123".to_string(), "Ab3dEf9h".to_string()))
        );
        assert_eq!(rig.radio.scans_started(), 0);
    }

    #[test]
    fn portal_completion_persists_and_resumes_the_link() {
        let mut rig = Rig::new(WifiCredentialSet::default());
        rig.radio.set_scan_results(vec![ap(1, -60)]);
        rig.tick(0);

        rig.portal.complete(ProvisioningResult {
            networks: vec![WifiCredential::new("office", "hunter22")],
            broker: BrokerConfig {
                server: "broker.local".to_string(),
                port: "1884".to_string(),
                topic: "lab".to_string(),
                ..BrokerConfig::default()
            },
        });
        rig.tick(50);

        assert!(!rig.state.wifi.config_running);
        assert_eq!(rig.state.broker.server, "broker.local");
        assert_eq!(rig.portal.stops(), 1);
        assert_eq!(
            storage::load_credentials(&mut rig.store).unwrap().router,
            Some(WifiCredential::new("office", "hunter22"))
        );
        assert_eq!(storage::load_broker(&mut rig.store).unwrap().port, "1884");
        assert_eq!(rig.link(), LinkState::Scanning);

        rig.tick(100);
        assert_eq!(rig.link(), LinkState::Connecting);
    }

    #[test]
    fn portal_timeout_reopens_while_credentials_are_missing() {
        let mut rig = Rig::new(WifiCredentialSet::default());

        rig.tick(0);
        assert!(rig.state.wifi.config_running);

        rig.tick(120_000);
        assert!(!rig.state.wifi.config_running);
        assert_eq!(rig.portal.stops(), 1);

        rig.tick(120_050);
        assert!(rig.state.wifi.config_running);
        assert_eq!(rig.portal.starts(), 2);
    }

    #[test]
    fn failed_portal_start_retries_after_scan_interval() {
        let mut rig = Rig::new(WifiCredentialSet::default());
        rig.portal.fail_starts(true);

        rig.tick(0);
        rig.tick(1_000);
        assert_eq!(rig.portal.starts(), 1);

        rig.portal.fail_starts(false);
        rig.tick(5_000);
        assert_eq!(rig.portal.starts(), 2);
        assert!(rig.state.wifi.config_running);
    }

    #[test]
    fn reset_clears_credentials_mid_connection() {
        let mut rig = Rig::new(office());
        storage::save_credentials(&mut rig.store, &office()).unwrap();
        rig.radio.set_scan_results(vec![ap(1, -60)]);
        rig.tick(0);
        rig.tick(50);
        assert_eq!(rig.link(), LinkState::Connecting);

        rig.state.wifi.requesting_reset = true;
        rig.tick(100);

        assert!(!rig.state.wifi.requesting_reset);
        assert!(rig.state.wifi.config_running);
        assert_eq!(rig.link(), LinkState::LinkDown);
        assert!(rig.manager.credentials().is_empty());
        assert!(rig.radio.erased());
        assert!(storage::load_credentials(&mut rig.store).unwrap().is_empty());
    }

    #[test]
    fn wifi_notice_follows_status_changes() {
        let old = {
            let mut state = DeviceState::new(2, 0);
            state.wifi.activated = true;
            state
        };

        let mut state = old.clone();
        state.wifi.status = WifiStatus::Connected;
        update_wifi_notice(&old, &mut state);
        assert_eq!(state.notices.wifi, Some(WifiNotice::Connected));

        let steady = state.clone();
        update_wifi_notice(&steady, &mut state);
        assert_eq!(state.notices.wifi, Some(WifiNotice::Connected));

        state.wifi.status = WifiStatus::ConnectionLost;
        update_wifi_notice(&steady, &mut state);
        assert_eq!(state.notices.wifi, Some(WifiNotice::Lost));

        state.wifi.config_running = true;
        update_wifi_notice(&state.clone(), &mut state);
        assert_eq!(state.notices.wifi, Some(WifiNotice::PortalCredentials));

        state.wifi.activated = false;
        update_wifi_notice(&state.clone(), &mut state);
        assert_eq!(state.notices.wifi, None);
    }
}
