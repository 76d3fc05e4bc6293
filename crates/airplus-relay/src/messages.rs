//! Command envelopes and inbound message decoding.

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Port carrying device status properties.
pub const PORT_STATUS: &str = "Status";
/// Port accepting property writes.
pub const PORT_CONTROL: &str = "Control";
/// Port reporting device configuration (including the model id).
pub const PORT_CONFIG: &str = "Config";
/// Port reporting filter counters.
pub const PORT_FILTER_READ: &str = "filtRd";

/// Topic the device listens on for commands.
pub fn control_topic(device_id: &str) -> String {
    format!("da_ctrl/{device_id}/to_ncp")
}

/// Topic the device publishes status on.
pub fn status_topic(device_id: &str) -> String {
    format!("da_ctrl/{device_id}/from_ncp")
}

/// Shadow-document update topic (power control).
pub fn shadow_update_topic(device_id: &str) -> String {
    format!("$aws/things/{device_id}/shadow/update")
}

/// Shadow-document get topic.
pub fn shadow_get_topic(device_id: &str) -> String {
    format!("$aws/things/{device_id}/shadow/get")
}

#[derive(Debug, Clone, Serialize)]
struct CommandData {
    #[serde(rename = "portName")]
    port_name: String,
    properties: Map<String, Value>,
}

/// Outbound command envelope.
#[derive(Debug, Clone, Serialize)]
pub struct CommandEnvelope {
    cid: String,
    time: String,
    #[serde(rename = "type")]
    kind: String,
    cn: String,
    ct: String,
    data: CommandData,
}

impl CommandEnvelope {
    fn new(command_name: &str, port_name: &str, properties: Map<String, Value>) -> Self {
        Self {
            cid: correlation_id(),
            time: timestamp_utc(),
            kind: "command".to_string(),
            cn: command_name.to_string(),
            ct: "mobile".to_string(),
            data: CommandData {
                port_name: port_name.to_string(),
                properties,
            },
        }
    }

    /// Write properties to a port.
    pub fn set_port(port_name: &str, properties: Map<String, Value>) -> Self {
        Self::new("setPort", port_name, properties)
    }

    /// Request the status of one port.
    pub fn get_port(port_name: &str) -> Self {
        Self::new("getPort", port_name, Map::new())
    }

    /// Request the status of every port.
    pub fn get_all_ports() -> Self {
        Self::new("getAllPorts", "", Map::new())
    }

    /// Serialize to compact JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    #[cfg(test)]
    fn cid(&self) -> &str {
        &self.cid
    }

    #[cfg(test)]
    fn time(&self) -> &str {
        &self.time
    }
}

/// Random 8-character lowercase hex correlation id.
fn correlation_id() -> String {
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
        .collect()
}

/// Current UTC time at second precision, 'Z'-suffixed.
fn timestamp_utc() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Inbound broker message.
///
/// `data` is either an object carrying `portName` and `properties`, or (for
/// `getAllPorts` responses) an array of port descriptors.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub cn: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl InboundMessage {
    /// Parse an inbound JSON payload.
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Port name, when `data` is an object carrying one.
    pub fn port_name(&self) -> Option<&str> {
        self.data.get("portName").and_then(Value::as_str)
    }

    /// Property map, when `data` is an object carrying one.
    pub fn properties(&self) -> Option<&Map<String, Value>> {
        self.data.get("properties").and_then(Value::as_object)
    }

    /// Port names from a list-style (`getAllPorts`) response.
    pub fn port_list(&self) -> Option<Vec<&str>> {
        self.data.as_array().map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("portName").and_then(Value::as_str))
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics() {
        assert_eq!(control_topic("da-abc"), "da_ctrl/da-abc/to_ncp");
        assert_eq!(status_topic("da-abc"), "da_ctrl/da-abc/from_ncp");
        assert_eq!(shadow_update_topic("da-abc"), "$aws/things/da-abc/shadow/update");
        assert_eq!(shadow_get_topic("da-abc"), "$aws/things/da-abc/shadow/get");
    }

    #[test]
    fn test_correlation_id_shape() {
        for _ in 0..32 {
            let cid = correlation_id();
            assert_eq!(cid.len(), 8);
            assert!(cid.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn test_timestamp_shape() {
        let time = timestamp_utc();
        assert_eq!(time.len(), 20);
        assert!(time.ends_with('Z'));
        // Second precision only.
        assert!(!time.contains('.'));
    }

    #[test]
    fn test_set_port_envelope() {
        let mut properties = Map::new();
        properties.insert("D0310D".to_string(), Value::from(8));
        let envelope = CommandEnvelope::set_port(PORT_CONTROL, properties);
        let json = envelope.to_json().unwrap();

        assert!(json.contains("\"type\":\"command\""));
        assert!(json.contains("\"cn\":\"setPort\""));
        assert!(json.contains("\"ct\":\"mobile\""));
        assert!(json.contains("\"portName\":\"Control\""));
        assert!(json.contains("\"D0310D\":8"));
        assert_eq!(envelope.cid().len(), 8);
        assert!(envelope.time().ends_with('Z'));
        // Compact serialization, no pretty-printing.
        assert!(!json.contains(' '));
    }

    #[test]
    fn test_get_port_envelope() {
        let envelope = CommandEnvelope::get_port(PORT_STATUS);
        let json = envelope.to_json().unwrap();
        assert!(json.contains("\"cn\":\"getPort\""));
        assert!(json.contains("\"portName\":\"Status\""));
        assert!(json.contains("\"properties\":{}"));
    }

    #[test]
    fn test_get_all_ports_envelope() {
        let envelope = CommandEnvelope::get_all_ports();
        let json = envelope.to_json().unwrap();
        assert!(json.contains("\"cn\":\"getAllPorts\""));
        assert!(json.contains("\"portName\":\"\""));
    }

    #[test]
    fn test_inbound_object_message() {
        let payload = br#"{"cn":"getPort","data":{"portName":"Status","properties":{"D0310D":8}}}"#;
        let message = InboundMessage::parse(payload).unwrap();
        assert_eq!(message.cn.as_deref(), Some("getPort"));
        assert_eq!(message.port_name(), Some("Status"));
        assert_eq!(message.properties().unwrap()["D0310D"], 8);
        assert!(message.port_list().is_none());
    }

    #[test]
    fn test_inbound_list_message() {
        let payload =
            br#"{"cn":"getAllPorts","data":[{"portName":"Status"},{"portName":"Config"}]}"#;
        let message = InboundMessage::parse(payload).unwrap();
        assert_eq!(message.port_list(), Some(vec!["Status", "Config"]));
        assert!(message.port_name().is_none());
    }

    #[test]
    fn test_inbound_missing_fields() {
        let message = InboundMessage::parse(br#"{}"#).unwrap();
        assert!(message.cn.is_none());
        assert!(message.port_name().is_none());
        assert!(message.properties().is_none());
    }

    #[test]
    fn test_inbound_malformed() {
        assert!(InboundMessage::parse(b"not json").is_err());
    }
}
