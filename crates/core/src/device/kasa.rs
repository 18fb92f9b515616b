//! TP-Link Kasa bulbs and plugs over the local protocol.

use super::codec;
use super::{
    Capabilities, Device, DeviceConnector, DeviceHandle, DeviceKind, DeviceRecord, DeviceState,
};
use crate::color::Hsv;
use crate::error::DeviceError;
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, info, warn};

pub const DEFAULT_PORT: u16 = 9999;

const SYSTEM: &str = "system";
const LIGHT_SERVICE: &str = "smartlife.iot.smartbulb.lightingservice";
const DIMMER_SERVICE: &str = "smartlife.iot.dimmer";
const SYSINFO_QUERY: &[u8] = br#"{"system":{"get_sysinfo":{}}}"#;

/// Network settings for talking to Kasa devices.
#[derive(Debug, Clone)]
pub struct KasaSettings {
    pub port: u16,
    /// Limit for one request/response exchange with a device.
    pub timeout: Duration,
    /// How long discovery listens for replies.
    pub discovery_timeout: Duration,
    /// Where discovery probes are sent.
    pub broadcast: SocketAddr,
}

impl Default for KasaSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            timeout: Duration::from_secs(5),
            discovery_timeout: Duration::from_secs(3),
            broadcast: SocketAddr::from(([255, 255, 255, 255], DEFAULT_PORT)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct LightState {
    #[serde(default)]
    on_off: u8,
    brightness: Option<u8>,
    hue: Option<u16>,
    saturation: Option<u8>,
    dft_on_state: Option<Box<LightState>>,
}

#[derive(Debug, Clone, Deserialize)]
struct SysInfo {
    #[serde(default)]
    alias: String,
    #[serde(default)]
    model: String,
    mic_type: Option<String>,
    #[serde(rename = "type")]
    device_type: Option<String>,
    relay_state: Option<u8>,
    brightness: Option<u8>,
    is_dimmable: Option<u8>,
    is_color: Option<u8>,
    light_state: Option<LightState>,
}

impl SysInfo {
    fn kind(&self) -> DeviceKind {
        let type_name = self
            .mic_type
            .as_deref()
            .or(self.device_type.as_deref())
            .unwrap_or_default();
        if type_name.to_uppercase().contains("SMARTBULB") {
            DeviceKind::Bulb
        } else {
            DeviceKind::Other
        }
    }

    fn state(&self, kind: DeviceKind) -> DeviceState {
        match kind {
            DeviceKind::Bulb => {
                let capabilities = Capabilities {
                    dimmable: self.is_dimmable == Some(1),
                    color: self.is_color == Some(1),
                };
                let light = self.light_state.as_ref();
                let is_on = light.map(|l| l.on_off == 1).unwrap_or(false);
                // An off bulb reports its last color under `dft_on_state`.
                let levels = light.and_then(|l| {
                    if l.on_off == 1 {
                        Some(l)
                    } else {
                        l.dft_on_state.as_deref()
                    }
                });
                let brightness = levels
                    .and_then(|l| l.brightness)
                    .filter(|_| capabilities.dimmable);
                let color = levels
                    .and_then(|l| {
                        Some(Hsv::new(
                            l.hue?,
                            l.saturation?,
                            l.brightness.unwrap_or(100),
                        ))
                    })
                    .filter(|_| capabilities.color);
                DeviceState {
                    alias: self.alias.clone(),
                    is_on,
                    capabilities,
                    brightness,
                    color,
                }
            }
            DeviceKind::Other => DeviceState {
                alias: self.alias.clone(),
                is_on: self.relay_state == Some(1),
                capabilities: Capabilities {
                    dimmable: self.brightness.is_some(),
                    color: false,
                },
                brightness: self.brightness,
                color: None,
            },
        }
    }
}

fn protocol_error(ip: &str, reason: impl Into<String>) -> DeviceError {
    DeviceError::Protocol {
        ip: ip.to_string(),
        reason: reason.into(),
    }
}

/// Extracts `response[module][method]` and checks its `err_code`.
fn unwrap_response(
    ip: &str,
    reply: &[u8],
    module: &str,
    method: &str,
) -> Result<Value, DeviceError> {
    let value: Value = serde_json::from_slice(reply)
        .map_err(|e| protocol_error(ip, format!("invalid JSON: {}", e)))?;
    let result = value
        .get(module)
        .and_then(|m| m.get(method))
        .cloned()
        .ok_or_else(|| protocol_error(ip, format!("missing {}.{} in reply", module, method)))?;
    match result.get("err_code").and_then(Value::as_i64) {
        Some(0) | None => Ok(result),
        Some(code) => {
            let msg = result
                .get("err_msg")
                .and_then(Value::as_str)
                .unwrap_or("no message");
            Err(protocol_error(ip, format!("err_code {}: {}", code, msg)))
        }
    }
}

/// A live handle to one Kasa device.
#[derive(Debug)]
pub struct KasaDevice {
    record: Mutex<DeviceRecord>,
    port: u16,
    timeout: Duration,
}

impl KasaDevice {
    pub fn new(record: DeviceRecord, settings: &KasaSettings) -> Self {
        Self {
            record: Mutex::new(record),
            port: settings.port,
            timeout: settings.timeout,
        }
    }

    fn ip(&self) -> String {
        self.record.lock().ip.clone()
    }

    fn kind(&self) -> DeviceKind {
        self.record.lock().kind
    }

    async fn request(
        &self,
        module: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, DeviceError> {
        let ip = self.ip();
        let mut inner = Map::new();
        inner.insert(method.to_string(), params);
        let mut outer = Map::new();
        outer.insert(module.to_string(), Value::Object(inner));
        let payload = serde_json::to_vec(&Value::Object(outer))
            .map_err(|e| protocol_error(&ip, e.to_string()))?;

        let exchange = async {
            let mut stream = TcpStream::connect((ip.as_str(), self.port)).await?;
            codec::write_frame(&mut stream, &payload).await?;
            codec::read_frame(&mut stream).await
        };
        let reply = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| DeviceError::Timeout {
                ip: ip.clone(),
                timeout: self.timeout,
            })?
            .map_err(|source| DeviceError::Io {
                ip: ip.clone(),
                source,
            })?;

        unwrap_response(&ip, &reply, module, method)
    }

    async fn transition(&self, state: Value) -> Result<(), DeviceError> {
        self.request(LIGHT_SERVICE, "transition_light_state", state)
            .await
            .map(|_| ())
    }

    async fn set_relay(&self, on: bool) -> Result<(), DeviceError> {
        self.request(SYSTEM, "set_relay_state", json!({ "state": u8::from(on) }))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl Device for KasaDevice {
    fn record(&self) -> DeviceRecord {
        self.record.lock().clone()
    }

    async fn refresh(&self) -> Result<DeviceState, DeviceError> {
        let ip = self.ip();
        let value = self.request(SYSTEM, "get_sysinfo", json!({})).await?;
        let info: SysInfo = serde_json::from_value(value)
            .map_err(|e| protocol_error(&ip, format!("bad sysinfo: {}", e)))?;
        let state = info.state(self.kind());

        let mut record = self.record.lock();
        record.alias = info.alias;
        if !info.model.is_empty() {
            record.model = info.model;
        }
        Ok(state)
    }

    async fn turn_on(&self) -> Result<(), DeviceError> {
        match self.kind() {
            DeviceKind::Bulb => {
                self.transition(json!({ "on_off": 1, "transition_period": 0 }))
                    .await
            }
            DeviceKind::Other => self.set_relay(true).await,
        }
    }

    async fn turn_off(&self) -> Result<(), DeviceError> {
        match self.kind() {
            DeviceKind::Bulb => {
                self.transition(json!({ "on_off": 0, "transition_period": 0 }))
                    .await
            }
            DeviceKind::Other => self.set_relay(false).await,
        }
    }

    async fn set_brightness(&self, level: u8) -> Result<(), DeviceError> {
        let level = level.clamp(1, 100);
        match self.kind() {
            DeviceKind::Bulb => self.transition(json!({ "brightness": level })).await,
            DeviceKind::Other => self
                .request(DIMMER_SERVICE, "set_brightness", json!({ "brightness": level }))
                .await
                .map(|_| ()),
        }
    }

    async fn set_hsv(&self, color: Hsv) -> Result<(), DeviceError> {
        match self.kind() {
            DeviceKind::Bulb => {
                self.transition(json!({
                    "hue": color.hue,
                    "saturation": color.saturation,
                    "brightness": color.value,
                    "color_temp": 0,
                }))
                .await
            }
            DeviceKind::Other => Err(DeviceError::Unsupported {
                ip: self.ip(),
                capability: "color",
            }),
        }
    }
}

/// Broadcasts a sysinfo probe and collects every device that answers within
/// the discovery window.
pub async fn discover(settings: &KasaSettings) -> Result<Vec<KasaDevice>, DeviceError> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))
        .await
        .map_err(|e| DeviceError::Discovery(format!("bind failed: {}", e)))?;
    socket
        .set_broadcast(true)
        .map_err(|e| DeviceError::Discovery(format!("broadcast not permitted: {}", e)))?;
    socket
        .send_to(&codec::encrypt(SYSINFO_QUERY), settings.broadcast)
        .await
        .map_err(|e| DeviceError::Discovery(format!("probe failed: {}", e)))?;
    debug!(target = %settings.broadcast, "Sent discovery probe");

    let deadline = tokio::time::Instant::now() + settings.discovery_timeout;
    let mut found: IndexMap<String, KasaDevice> = IndexMap::new();
    let mut buf = vec![0u8; codec::MAX_FRAME_LEN];

    loop {
        let received = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await;
        let (len, addr) = match received {
            Err(_) => break,
            Ok(Err(e)) => {
                warn!(error = %e, "Discovery receive failed");
                continue;
            }
            Ok(Ok(received)) => received,
        };
        let ip = addr.ip().to_string();
        let reply = codec::decrypt(&buf[..len]);
        let info = unwrap_response(&ip, &reply, SYSTEM, "get_sysinfo").and_then(|value| {
            serde_json::from_value::<SysInfo>(value)
                .map_err(|e| protocol_error(&ip, format!("bad sysinfo: {}", e)))
        });
        match info {
            Ok(info) => {
                let record = DeviceRecord {
                    ip: ip.clone(),
                    kind: info.kind(),
                    alias: info.alias,
                    model: info.model,
                };
                debug!(ip = %ip, alias = %record.alias, "Discovered device");
                found.insert(ip, KasaDevice::new(record, settings));
            }
            Err(e) => debug!(error = %e, "Ignoring discovery reply"),
        }
    }

    info!(count = found.len(), "Discovery finished");
    Ok(found.into_values().collect())
}

/// The `DeviceConnector` for Kasa devices.
///
/// Discovery broadcasts on the local network; cached descriptors are
/// reopened by querying the device directly.
pub struct KasaConnector {
    settings: KasaSettings,
}

impl KasaConnector {
    /// Creates a connector.
    ///
    /// # Arguments
    ///
    /// * `settings` - Port, timeouts and broadcast address used for every
    ///   device this connector opens.
    pub fn new(settings: KasaSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl DeviceConnector for KasaConnector {
    async fn discover(&self) -> Result<Vec<DeviceHandle>, DeviceError> {
        let devices = discover(&self.settings).await?;
        Ok(devices
            .into_iter()
            .map(|d| Arc::new(d) as DeviceHandle)
            .collect())
    }

    async fn connect(&self, record: &DeviceRecord) -> Result<DeviceHandle, DeviceError> {
        let device = KasaDevice::new(record.clone(), &self.settings);
        device.refresh().await?;
        Ok(Arc::new(device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn bulb_sysinfo(on: bool) -> Value {
        json!({
            "system": {
                "get_sysinfo": {
                    "alias": "Living Room Lamp",
                    "model": "KL130(US)",
                    "mic_type": "IOT.SMARTBULB",
                    "is_dimmable": 1,
                    "is_color": 1,
                    "light_state": if on {
                        json!({"on_off": 1, "brightness": 80, "hue": 240, "saturation": 100})
                    } else {
                        json!({
                            "on_off": 0,
                            "dft_on_state": {"brightness": 30, "hue": 120, "saturation": 50}
                        })
                    },
                    "err_code": 0
                }
            }
        })
    }

    /// Serves canned replies and records every request it receives.
    async fn fake_device(
        reply: impl Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    ) -> (KasaSettings, Arc<Mutex<Vec<Value>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let Ok(payload) = codec::read_frame(&mut stream).await else {
                    continue;
                };
                let request: Value = serde_json::from_slice(&payload).unwrap();
                seen.lock().push(request.clone());
                match reply(&request) {
                    Some(response) => {
                        let bytes = serde_json::to_vec(&response).unwrap();
                        let _ = codec::write_frame(&mut stream, &bytes).await;
                    }
                    // Hold the connection open without answering.
                    None => tokio::time::sleep(Duration::from_secs(5)).await,
                }
            }
        });
        let settings = KasaSettings {
            port,
            timeout: Duration::from_millis(300),
            ..KasaSettings::default()
        };
        (settings, requests)
    }

    fn local_record(kind: DeviceKind) -> DeviceRecord {
        DeviceRecord {
            ip: "127.0.0.1".into(),
            alias: "Unknown".into(),
            model: "Unknown".into(),
            kind,
        }
    }

    #[tokio::test]
    async fn test_refresh_bulb_on() {
        let (settings, _) = fake_device(|_| Some(bulb_sysinfo(true))).await;
        let device = KasaDevice::new(local_record(DeviceKind::Bulb), &settings);

        let state = device.refresh().await.unwrap();
        assert!(state.is_on);
        assert_eq!(state.brightness, Some(80));
        assert_eq!(state.color, Some(Hsv::new(240, 100, 80)));
        assert!(state.capabilities.color && state.capabilities.dimmable);
        assert_eq!(device.record().alias, "Living Room Lamp");
        assert_eq!(device.record().model, "KL130(US)");
    }

    #[tokio::test]
    async fn test_refresh_bulb_off_uses_default_state() {
        let (settings, _) = fake_device(|_| Some(bulb_sysinfo(false))).await;
        let device = KasaDevice::new(local_record(DeviceKind::Bulb), &settings);

        let state = device.refresh().await.unwrap();
        assert!(!state.is_on);
        assert_eq!(state.brightness, Some(30));
        assert_eq!(state.color, Some(Hsv::new(120, 50, 30)));
    }

    #[tokio::test]
    async fn test_bulb_commands_use_lighting_service() {
        let (settings, requests) = fake_device(|req| {
            let method = req[LIGHT_SERVICE].as_object()?.keys().next()?.clone();
            Some(json!({ LIGHT_SERVICE: { method: { "err_code": 0 } } }))
        })
        .await;
        let device = KasaDevice::new(local_record(DeviceKind::Bulb), &settings);

        device.set_hsv(Hsv::new(280, 90, 55)).await.unwrap();
        device.set_brightness(40).await.unwrap();
        device.turn_on().await.unwrap();

        let requests = requests.lock().clone();
        let states: Vec<_> = requests
            .iter()
            .map(|r| r[LIGHT_SERVICE]["transition_light_state"].clone())
            .collect();
        assert_eq!(states[0]["hue"], 280);
        assert_eq!(states[0]["saturation"], 90);
        assert_eq!(states[0]["color_temp"], 0);
        assert_eq!(states[1]["brightness"], 40);
        assert_eq!(states[2]["on_off"], 1);
    }

    #[tokio::test]
    async fn test_plug_uses_relay() {
        let (settings, requests) = fake_device(|_| {
            Some(json!({ "system": { "set_relay_state": { "err_code": 0 } } }))
        })
        .await;
        let device = KasaDevice::new(local_record(DeviceKind::Other), &settings);

        device.turn_off().await.unwrap();
        assert_eq!(requests.lock()[0]["system"]["set_relay_state"]["state"], 0);
        assert!(matches!(
            device.set_hsv(Hsv::new(0, 0, 0)).await,
            Err(DeviceError::Unsupported { .. })
        ));
    }

    #[tokio::test]
    async fn test_error_code_is_protocol_error() {
        let (settings, _) = fake_device(|_| {
            Some(json!({
                "system": {
                    "set_relay_state": { "err_code": -2, "err_msg": "member not support" }
                }
            }))
        })
        .await;
        let device = KasaDevice::new(local_record(DeviceKind::Other), &settings);

        match device.turn_on().await {
            Err(DeviceError::Protocol { reason, .. }) => assert!(reason.contains("-2")),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_silent_device_times_out() {
        let (settings, _) = fake_device(|_| None).await;
        let device = KasaDevice::new(local_record(DeviceKind::Bulb), &settings);
        assert!(matches!(
            device.refresh().await,
            Err(DeviceError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_verifies_device() {
        let (settings, _) = fake_device(|_| Some(bulb_sysinfo(true))).await;
        let connector = KasaConnector::new(settings);
        let handle = connector
            .connect(&local_record(DeviceKind::Bulb))
            .await
            .unwrap();
        assert_eq!(handle.record().alias, "Living Room Lamp");
    }

    #[tokio::test]
    async fn test_discovery_collects_replies() {
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let responder_addr = responder.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            let (len, from) = responder.recv_from(&mut buf).await.unwrap();
            assert_eq!(codec::decrypt(&buf[..len]), SYSINFO_QUERY);
            // A junk datagram first; it must be ignored.
            responder.send_to(b"garbage", from).await.unwrap();
            let reply = serde_json::to_vec(&bulb_sysinfo(true)).unwrap();
            responder
                .send_to(&codec::encrypt(&reply), from)
                .await
                .unwrap();
        });

        let settings = KasaSettings {
            broadcast: responder_addr,
            discovery_timeout: Duration::from_millis(300),
            ..KasaSettings::default()
        };
        let devices = discover(&settings).await.unwrap();
        assert_eq!(devices.len(), 1);
        let record = devices[0].record();
        assert_eq!(record.ip, "127.0.0.1");
        assert_eq!(record.kind, DeviceKind::Bulb);
        assert_eq!(record.alias, "Living Room Lamp");
    }
}
