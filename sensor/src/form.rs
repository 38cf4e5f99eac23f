use serde::{Deserialize, Serialize};

use co2_common::{
    config::{MAX_PASSPHRASE_LEN, MAX_SSID_LEN},
    link::ProvisioningResult,
    BrokerConfig, WifiCredential,
};

pub const MAX_FORM_BODY: usize = 4096;

/// Paths operating systems probe to detect a captive network.
pub const CAPTIVE_PATHS: [&str; 7] = [
    "/",
    "/generate_204",
    "/gen_204",
    "/hotspot-detect.html",
    "/connecttest.txt",
    "/ncsi.txt",
    "/fwlink",
];

pub const PORTAL_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>SMOCA CO2 Setup</title>
  <style>
    body{font-family:system-ui,sans-serif;margin:0;padding:16px;background:#0f1115;color:#e6e6e6}
    h1{font-size:20px;margin:0 0 12px}
    h2{font-size:15px;margin:18px 0 6px;color:#8ab4f8}
    label{display:block;font-size:13px;margin:8px 0 2px}
    input{width:100%;box-sizing:border-box;padding:8px;border-radius:6px;border:1px solid #333;background:#181b21;color:#e6e6e6}
    button{margin-top:16px;width:100%;padding:10px;border:0;border-radius:6px;background:#1e88e5;color:#fff;font-size:15px}
    .ok{color:#66bb6a}.err{color:#ef5350}
  </style>
</head>
<body>
  <h1>SMOCA CO2 Sensor</h1>
  <h2>WiFi</h2>
  <label>SSID</label><input id="wifiSsid" maxlength="32" />
  <label>Password</label><input id="wifiPass" type="password" maxlength="63" />
  <h2>Second network (optional)</h2>
  <label>SSID</label><input id="extraSsid" maxlength="32" />
  <label>Password</label><input id="extraPass" type="password" maxlength="63" />
  <h2>MQTT</h2>
  <label>Server</label><input id="mqttServer" maxlength="64" />
  <label>Port</label><input id="mqttPort" maxlength="8" value="1883" />
  <label>Topic</label><input id="mqttTopic" maxlength="64" />
  <label>Device name</label><input id="mqttDevice" maxlength="24" />
  <label>Username</label><input id="mqttUser" maxlength="24" />
  <label>Key</label><input id="mqttKey" type="password" maxlength="32" />
  <button id="save">Save</button>
  <p id="status"></p>
  <script>
    const q=(id)=>document.getElementById(id);
    q('save').addEventListener('click', async ()=>{
      const extra=q('extraSsid').value.trim();
      const body={
        wifiSsid:q('wifiSsid').value.trim(),
        wifiPass:q('wifiPass').value,
        extraNetworks: extra ? [{ssid:extra,password:q('extraPass').value}] : [],
        mqttServer:q('mqttServer').value.trim(),
        mqttPort:q('mqttPort').value.trim(),
        mqttTopic:q('mqttTopic').value.trim(),
        mqttDevice:q('mqttDevice').value.trim(),
        mqttUser:q('mqttUser').value,
        mqttKey:q('mqttKey').value
      };
      try{
        const res=await fetch('/api/provision',{method:'POST',headers:{'Content-Type':'application/json'},body:JSON.stringify(body)});
        const data=await res.json();
        if(!res.ok){throw new Error(data.error||'Save failed');}
        q('status').className='ok'; q('status').textContent='Saved. The sensor is joining your network.';
      }catch(err){q('status').className='err'; q('status').textContent=err.message;}
    });
  </script>
</body>
</html>
"#;

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkEntry {
    pub ssid: String,
    #[serde(default)]
    pub password: String,
}

/// Body posted by the setup page to `/api/provision`.
#[derive(Debug, Clone, Deserialize)]
pub struct PortalSubmission {
    #[serde(rename = "wifiSsid")]
    pub wifi_ssid: String,
    #[serde(rename = "wifiPass", default)]
    pub wifi_pass: String,
    #[serde(rename = "extraNetworks", default)]
    pub extra_networks: Vec<NetworkEntry>,
    #[serde(rename = "mqttServer", default)]
    pub mqtt_server: String,
    #[serde(rename = "mqttPort", default)]
    pub mqtt_port: String,
    #[serde(rename = "mqttTopic", default)]
    pub mqtt_topic: String,
    #[serde(rename = "mqttDevice", default)]
    pub mqtt_device: String,
    #[serde(rename = "mqttUser", default)]
    pub mqtt_user: String,
    #[serde(rename = "mqttKey", default)]
    pub mqtt_key: String,
}

#[derive(Debug, Serialize)]
pub struct ProvisionResponse {
    pub accepted: bool,
    pub networks: usize,
}

fn validate_network(ssid: &str, password: &str) -> Result<(), &'static str> {
    if ssid.trim().is_empty() {
        return Err("wifi ssid is required");
    }
    if ssid.len() > MAX_SSID_LEN {
        return Err("wifi ssid is too long");
    }
    if !password.is_empty() && !(8..MAX_PASSPHRASE_LEN).contains(&password.len()) {
        return Err("wifi password must be 8 to 63 characters");
    }
    Ok(())
}

impl PortalSubmission {
    pub fn validate(&self) -> Result<(), &'static str> {
        validate_network(&self.wifi_ssid, &self.wifi_pass)?;
        for entry in &self.extra_networks {
            validate_network(&entry.ssid, &entry.password)?;
        }

        let port = self.mqtt_port.trim();
        if !port.is_empty() && !matches!(port.parse::<u16>(), Ok(value) if value > 0) {
            return Err("mqtt port must be between 1 and 65535");
        }
        Ok(())
    }

    /// Router network first, then the optional extras in the order they were entered.
    pub fn into_result(self) -> ProvisioningResult {
        let mut networks = vec![WifiCredential::new(self.wifi_ssid.trim(), &self.wifi_pass)];
        networks.extend(
            self.extra_networks
                .iter()
                .map(|entry| WifiCredential::new(entry.ssid.trim(), &entry.password)),
        );

        let mut broker = BrokerConfig {
            server: self.mqtt_server,
            port: self.mqtt_port,
            topic: self.mqtt_topic,
            device: self.mqtt_device,
            user: self.mqtt_user,
            password: self.mqtt_key,
        };
        broker.sanitize();

        ProvisioningResult { networks, broker }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn submission(json: &str) -> PortalSubmission {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn minimal_submission_yields_router_network() {
        let result = submission(r#"{"wifiSsid":" office ","wifiPass":"hunter22"}"#).into_result();

        assert_eq!(result.networks, vec![WifiCredential::new("office", "hunter22")]);
        assert_eq!(result.broker, BrokerConfig::default());
    }

    #[test]
    fn extras_follow_the_router_network() {
        let result = submission(
            r#"{
                "wifiSsid":"office","wifiPass":"hunter22",
                "extraNetworks":[{"ssid":"lab","password":"pw-lab-01"}],
                "mqttServer":" broker.local ","mqttPort":"1884","mqttTopic":"lab/co2"
            }"#,
        )
        .into_result();

        assert_eq!(
            result.networks,
            vec![
                WifiCredential::new("office", "hunter22"),
                WifiCredential::new("lab", "pw-lab-01"),
            ]
        );
        assert_eq!(result.broker.server, "broker.local");
        assert_eq!(result.broker.port_number(), Some(1884));
        assert_eq!(result.broker.topic, "lab/co2");
    }

    #[test]
    fn rejects_bad_fields() {
        assert_eq!(
            submission(r#"{"wifiSsid":"  "}"#).validate(),
            Err("wifi ssid is required")
        );
        assert_eq!(
            submission(r#"{"wifiSsid":"office","wifiPass":"short"}"#).validate(),
            Err("wifi password must be 8 to 63 characters")
        );
        assert_eq!(
            submission(r#"{"wifiSsid":"office","mqttPort":"0"}"#).validate(),
            Err("mqtt port must be between 1 and 65535")
        );
        assert_eq!(
            submission(r#"{"wifiSsid":"cafe","wifiPass":""}"#).validate(),
            Ok(())
        );
    }
}
