use std::{collections::HashSet, fmt};

use serde::{Deserialize, Serialize};

use crate::config::{bounded, MAX_PASSPHRASE_LEN, MAX_SSID_LEN, NUM_WIFI_CREDENTIALS};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiCredential {
    pub ssid: String,
    #[serde(default)]
    pub passphrase: String,
}

impl WifiCredential {
    pub fn new(ssid: &str, passphrase: &str) -> Self {
        Self {
            ssid: bounded(ssid, MAX_SSID_LEN),
            passphrase: bounded(passphrase, MAX_PASSPHRASE_LEN),
        }
    }
}

/// Router credential learned by the portal plus the stored extra networks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiCredentialSet {
    #[serde(default)]
    pub router: Option<WifiCredential>,
    #[serde(default)]
    pub stored: Vec<WifiCredential>,
}

impl WifiCredentialSet {
    pub fn is_empty(&self) -> bool {
        self.router
            .as_ref()
            .map(|credential| credential.ssid.is_empty())
            .unwrap_or(true)
            && self.stored_in_order().next().is_none()
    }

    /// Stored entries up to the first blank SSID.
    pub fn stored_in_order(&self) -> impl Iterator<Item = &WifiCredential> {
        self.stored
            .iter()
            .take(NUM_WIFI_CREDENTIALS)
            .take_while(|credential| !credential.ssid.is_empty())
    }

    pub fn clear(&mut self) {
        self.router = None;
        self.stored.clear();
    }

    pub fn sanitize(&mut self) {
        if let Some(router) = self.router.as_mut() {
            *router = WifiCredential::new(&router.ssid, &router.passphrase);
        }
        self.stored.truncate(NUM_WIFI_CREDENTIALS);
        for credential in &mut self.stored {
            *credential = WifiCredential::new(&credential.ssid, &credential.passphrase);
        }
    }

    /// Router credential becomes the first network; the full extra set replaces `stored`.
    pub fn merge_provisioned(&mut self, networks: &[WifiCredential]) {
        let Some(first) = networks.first() else {
            return;
        };
        self.router = Some(WifiCredential::new(&first.ssid, &first.passphrase));

        let complete = networks.len() >= NUM_WIFI_CREDENTIALS
            && networks
                .iter()
                .take(NUM_WIFI_CREDENTIALS)
                .all(|credential| !credential.ssid.is_empty());
        if complete {
            self.stored = networks
                .iter()
                .take(NUM_WIFI_CREDENTIALS)
                .map(|credential| WifiCredential::new(&credential.ssid, &credential.passphrase))
                .collect();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bssid(pub [u8; 6]);

impl fmt::Display for Bssid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Open,
    Secured,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub ssid: String,
    pub bssid: Bssid,
    pub rssi: i32,
    pub channel: u8,
    pub auth: AuthMode,
}

/// Access point chosen for the next station connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub ssid: String,
    pub passphrase: String,
    pub bssid: Bssid,
    pub channel: u8,
    pub rssi: i32,
}

fn usable(result: &ScanResult, credential: &WifiCredential) -> bool {
    result.auth == AuthMode::Open || !credential.passphrase.is_empty()
}

/// Strongest untried access point that a known credential can join.
///
/// Results are walked in scan order, stored credentials before the router one, and a
/// candidate only replaces the current best on a strictly higher RSSI, so ties keep
/// whichever was seen first.
pub fn select_best(
    results: &[ScanResult],
    credentials: &WifiCredentialSet,
    tried: &HashSet<Bssid>,
) -> Option<Candidate> {
    let mut best: Option<Candidate> = None;

    for result in results {
        if tried.contains(&result.bssid) {
            continue;
        }

        let known = credentials
            .stored_in_order()
            .chain(credentials.router.iter().filter(|router| !router.ssid.is_empty()));

        for credential in known {
            if credential.ssid != result.ssid || !usable(result, credential) {
                continue;
            }
            let stronger = best
                .as_ref()
                .map(|current| result.rssi > current.rssi)
                .unwrap_or(true);
            if stronger {
                best = Some(Candidate {
                    ssid: credential.ssid.clone(),
                    passphrase: credential.passphrase.clone(),
                    bssid: result.bssid,
                    channel: result.channel,
                    rssi: result.rssi,
                });
            }
        }
    }

    best
}
