//! Credential state and token response parsing.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Deserializer};
use tracing::debug;

/// Raw token endpoint response.
///
/// The provider has been observed returning both snake_case and camelCase
/// field names; both are accepted. Expiry arrives either as `exp` (absolute
/// epoch seconds) or `expires_in` (a duration); `exp` wins when both are
/// present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenResponse {
    #[serde(default, alias = "accessToken")]
    pub access_token: Option<String>,
    #[serde(default, alias = "refreshToken")]
    pub refresh_token: Option<String>,
    #[serde(default, deserialize_with = "de_opt_i64")]
    pub exp: Option<i64>,
    #[serde(default, deserialize_with = "de_opt_i64")]
    pub expires_in: Option<i64>,
}

/// Accept an integer either as a JSON number or a numeric string.
fn de_opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(i64),
        String(String),
    }

    let value: Option<NumberOrString> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(NumberOrString::Number(n)) => Some(n),
        Some(NumberOrString::String(s)) => s.trim().parse().ok(),
        None => None,
    })
}

/// Compute the absolute expiry for a token response.
///
/// `exp` is consulted first, then `expires_in` relative to `now`. Returns
/// `None` when the response carries neither.
pub fn resolve_expiry(response: &TokenResponse, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if let Some(exp) = response.exp {
        return Utc.timestamp_opt(exp, 0).single();
    }
    response.expires_in.map(|secs| now + Duration::seconds(secs))
}

/// The current credential set.
///
/// `access_token` and `signature` belong to the same refresh generation and
/// must always be handed out together.
#[derive(Debug, Clone, Default)]
pub struct CredentialSet {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub signature: Option<String>,
    pub user_id: Option<String>,
}

/// Snapshot passed to the refresh notification callback, suitable for
/// persisting by the host framework.
#[derive(Debug, Clone)]
pub struct CredentialUpdate {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Absolute expiry in epoch seconds, when known.
    pub expires_at: Option<i64>,
    pub client_id: Option<String>,
}

/// Best-effort extraction of the `sub` claim from a JWT access token.
pub fn user_id_from_token(token: &str) -> Option<String> {
    let claims = decode_claims(token)?;
    claims.get("sub").and_then(|v| v.as_str()).map(String::from)
}

/// Best-effort extraction of the `exp` claim from a JWT access token.
pub fn expiration_from_token(token: &str) -> Option<i64> {
    let claims = decode_claims(token)?;
    claims.get("exp").and_then(|v| v.as_i64())
}

fn decode_claims(token: &str) -> Option<serde_json::Value> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    match serde_json::from_slice(&decoded) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(error = %err, "Failed to decode token claims");
            None
        }
    }
}
