//! Vendor REST API client.
//!
//! Thin bearer-authenticated GETs for device listing, broker signature
//! retrieval, and user lookup.

use crate::{AuthError, AuthResult};
use airplus_core::HTTP_USER_AGENT;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

/// User record from `GET /user/self`.
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub id: Option<String>,
}

/// Vendor REST API client.
#[derive(Clone)]
pub struct VendorClient {
    http: reqwest::Client,
    base_url: String,
}

impl VendorClient {
    /// Create a client for the given API base URL (e.g.
    /// `https://prod.eu-da.iot.versuni.com/api`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn fetch_json(&self, path: &str, access_token: &str) -> AuthResult<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Fetching vendor API");

        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("Bearer {}", access_token.trim()))
            .header("Accept", "application/json")
            .header("User-Agent", HTTP_USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Api(format!("HTTP {status}: {body}")));
        }

        Ok(response.json().await?)
    }

    /// List all devices associated with the account.
    pub async fn list_devices(&self, access_token: &str) -> AuthResult<Vec<Device>> {
        let data = self.fetch_json("/da/user/self/device", access_token).await?;
        let devices = extract_device_list(&data);
        debug!(count = devices.len(), "Found devices");
        Ok(devices.into_iter().map(Device::new).collect())
    }

    /// Fetch the signed broker-authorization blob.
    pub async fn fetch_signature(&self, access_token: &str) -> AuthResult<String> {
        let data = self
            .fetch_json("/da/user/self/signature", access_token)
            .await?;
        data.get("signature")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or(AuthError::MissingField("signature"))
    }

    /// Fetch the account's user record.
    pub async fn get_user(&self, access_token: &str) -> AuthResult<UserInfo> {
        let data = self.fetch_json("/da/user/self", access_token).await?;
        Ok(serde_json::from_value(data)?)
    }
}

/// Pull the device array out of a device-list response.
///
/// Accepts a `devices` key, any other array whose members carry a `uuid`, or
/// a bare top-level array.
fn extract_device_list(data: &Value) -> Vec<Value> {
    match data {
        Value::Array(items) => items.clone(),
        Value::Object(map) => {
            if let Some(Value::Array(items)) = map.get("devices") {
                return items.clone();
            }
            for value in map.values() {
                if let Value::Array(items) = value {
                    if items
                        .iter()
                        .any(|item| item.get("uuid").is_some_and(|id| !id.is_null()))
                    {
                        return items.clone();
                    }
                }
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}

/// A device record with tolerant field extraction.
#[derive(Debug, Clone)]
pub struct Device {
    data: Value,
}

impl Device {
    pub fn new(data: Value) -> Self {
        Self { data }
    }

    fn string_field(&self, keys: &[&str]) -> Option<String> {
        keys.iter()
            .find_map(|key| self.data.get(key).and_then(Value::as_str))
            .map(String::from)
    }

    /// Device UUID, falling back through the known field spellings.
    pub fn uuid(&self) -> String {
        self.string_field(&["uuid", "id"])
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Display name.
    pub fn name(&self) -> String {
        self.string_field(&["name", "deviceName", "friendlyName"])
            .unwrap_or_else(|| {
                let uuid = self.uuid();
                format!("Air+ {}", &uuid[..uuid.len().min(8)])
            })
    }

    /// Device type.
    pub fn device_type(&self) -> String {
        self.string_field(&["type", "deviceType"])
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Raw device record.
    pub fn data(&self) -> &Value {
        &self.data
    }
}

/// Build the composite broker client id from user id and device uuid.
///
/// Canonical form is `{user_uuid}_{device_uuid}` (73 chars). A bare 32-hex
/// user id is reformatted into dashed UUID form first. Anything else falls
/// back to `client-{device_uuid}`.
pub fn build_client_id(user_id: &str, device_uuid: &str) -> String {
    let device_uuid = device_uuid.strip_prefix("da-").unwrap_or(device_uuid);
    let user_id = user_id.trim();

    let uuid_re = Regex::new(
        r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$",
    )
    .expect("static regex");

    if uuid_re.is_match(user_id) && uuid_re.is_match(device_uuid) {
        let composite = format!("{user_id}_{device_uuid}");
        if composite.len() != 73 {
            warn!(
                len = composite.len(),
                composite = %composite,
                "Composite client id length unexpected (expected 73)"
            );
        }
        return composite;
    }

    let hex32_re = Regex::new(r"(?i)^[0-9a-f]{32}$").expect("static regex");
    if hex32_re.is_match(user_id) && uuid_re.is_match(device_uuid) {
        let formatted = format!(
            "{}-{}-{}-{}-{}",
            &user_id[0..8],
            &user_id[8..12],
            &user_id[12..16],
            &user_id[16..20],
            &user_id[20..32]
        );
        let composite = format!("{formatted}_{device_uuid}");
        info!(composite = %composite, "Reconstructed composite client id from 32-hex user id");
        return composite;
    }

    format!("client-{device_uuid}")
}
