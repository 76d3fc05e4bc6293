//! PKCE authorization-code flow against the vendor's OIDC provider.

use crate::{AuthError, AuthResult, TokenResponse};
use airplus_core::{OidcConfig, HTTP_USER_AGENT};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// How long a pending flow's code verifier is kept before it is discarded.
const FLOW_TTL: Duration = Duration::from_secs(15 * 60);

/// Upper bound on concurrently pending flows.
const MAX_PENDING_FLOWS: usize = 16;

struct PendingFlow {
    code_verifier: String,
    created_at: Instant,
}

/// Short-lived per-flow state, keyed by flow id.
///
/// A verifier is stored when the authorization URL is generated and consumed
/// exactly once by the matching token exchange. Entries expire after
/// [`FLOW_TTL`] so abandoned flows do not accumulate.
#[derive(Default)]
struct FlowStore {
    flows: HashMap<String, PendingFlow>,
}

impl FlowStore {
    fn insert(&mut self, flow_id: &str, code_verifier: String) {
        self.prune();
        if self.flows.len() >= MAX_PENDING_FLOWS {
            if let Some(oldest) = self
                .flows
                .iter()
                .min_by_key(|(_, flow)| flow.created_at)
                .map(|(id, _)| id.clone())
            {
                self.flows.remove(&oldest);
            }
        }
        self.flows.insert(
            flow_id.to_string(),
            PendingFlow {
                code_verifier,
                created_at: Instant::now(),
            },
        );
    }

    fn take(&mut self, flow_id: &str) -> Option<String> {
        self.prune();
        self.flows.remove(flow_id).map(|flow| flow.code_verifier)
    }

    fn prune(&mut self) {
        self.flows
            .retain(|_, flow| flow.created_at.elapsed() < FLOW_TTL);
    }
}

/// Stateless protocol calls for the PKCE authorization-code flow, plus the
/// bounded per-flow verifier store.
pub struct OAuthClient {
    http: reqwest::Client,
    config: OidcConfig,
    client_id: String,
    flows: Mutex<FlowStore>,
}

impl OAuthClient {
    /// Create a new OAuth client for the given OIDC endpoints and client id.
    pub fn new(config: OidcConfig, client_id: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            client_id: client_id.into(),
            flows: Mutex::new(FlowStore::default()),
        }
    }

    /// Generate a fully parameterized authorization URL for a flow.
    ///
    /// Produces a fresh code verifier, stores it under `flow_id`, and derives
    /// the S256 code challenge.
    pub fn generate_authorize_url(&self, flow_id: &str) -> String {
        let code_verifier = random_urlsafe(32);
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()));
        let nonce = random_urlsafe(16);

        self.flows
            .lock()
            .expect("flow store lock poisoned")
            .insert(flow_id, code_verifier);

        let params: [(&str, &str); 10] = [
            ("client_id", &self.client_id),
            ("code_challenge", &challenge),
            ("code_challenge_method", "S256"),
            ("response_type", "code"),
            ("response_mode", "query"),
            ("redirect_uri", &self.config.redirect_uri),
            ("ui_locales", "en-US"),
            ("state", flow_id),
            ("nonce", &nonce),
            ("scope", &self.config.scopes),
        ];

        let query = params
            .iter()
            .map(|(key, value)| format!("{}={}", key, percent_encode(value)))
            .collect::<Vec<_>>()
            .join("&");

        format!("{}?{}", self.config.authorize_url(), query)
    }

    /// Exchange an authorization code for tokens.
    ///
    /// `raw_code` may be the bare code, a full redirect URL, or a query
    /// fragment; the code is extracted and decoded before the exchange. The
    /// stored verifier for `flow_id` is consumed by this call.
    pub async fn request_token(&self, raw_code: &str, flow_id: &str) -> AuthResult<TokenResponse> {
        let code_verifier = self
            .flows
            .lock()
            .expect("flow store lock poisoned")
            .take(flow_id)
            .ok_or_else(|| AuthError::FlowNotFound(flow_id.to_string()))?;

        let code = sanitize_code(raw_code)?;
        debug!(flow_id = %flow_id, "Exchanging authorization code");

        let form = [
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.client_id.as_str()),
            ("code_verifier", code_verifier.as_str()),
        ];

        self.post_token(&form).await
    }

    /// Exchange a refresh token for a new token pair.
    pub async fn refresh_token(&self, refresh_token: &str) -> AuthResult<TokenResponse> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
        ];

        self.post_token(&form).await
    }

    async fn post_token(&self, form: &[(&str, &str)]) -> AuthResult<TokenResponse> {
        let response = self
            .http
            .post(self.config.token_url())
            .header("User-Agent", HTTP_USER_AGENT)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenExchange {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

/// Extract the bare authorization code from user-supplied input.
///
/// Accepted forms:
/// - the raw code itself (`st2.xxxxx.sc3`)
/// - a full redirect URL (`com.philips.air://loginredirect?code=...&state=...`)
/// - a query fragment containing `code=...`
pub fn sanitize_code(raw: &str) -> AuthResult<String> {
    let mut code = raw.trim().trim_matches('"').trim_matches('\'').to_string();

    let pattern = Regex::new(r"(?:^|[?&])code=([^&\s]+)").expect("static regex");
    if let Some(captures) = pattern.captures(&code) {
        code = percent_decode(&captures[1]);
    } else {
        if let Some(rest) = code.strip_prefix("code=") {
            code = rest.to_string();
        }
        if let Some(idx) = code.find('&') {
            code.truncate(idx);
        }
    }

    let code = code.trim().to_string();
    if code.is_empty() {
        return Err(AuthError::EmptyCode);
    }
    Ok(code)
}

/// Random URL-safe token from `len` bytes of entropy.
fn random_urlsafe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Percent-encode everything outside the unreserved set, including spaces.
fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Decode percent-escapes; malformed escapes pass through untouched.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let Some(hex) = input.get(i + 1..i + 3) {
                if let Ok(byte) = u8::from_str_radix(hex, 16) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OAuthClient {
        OAuthClient::new(OidcConfig::default(), "test-client")
    }

    #[test]
    fn test_sanitize_bare_code() {
        assert_eq!(sanitize_code("st2.abc123.sc3").unwrap(), "st2.abc123.sc3");
    }

    #[test]
    fn test_sanitize_full_redirect_url() {
        let raw = "com.philips.air://loginredirect?code=st2.abc123.sc3&state=xyz";
        assert_eq!(sanitize_code(raw).unwrap(), "st2.abc123.sc3");
    }

    #[test]
    fn test_sanitize_query_fragment() {
        assert_eq!(
            sanitize_code("code=st2.abc123.sc3&state=xyz").unwrap(),
            "st2.abc123.sc3"
        );
    }

    #[test]
    fn test_sanitize_percent_encoded() {
        let raw = "?code=st2.abc%2F123.sc3&state=xyz";
        assert_eq!(sanitize_code(raw).unwrap(), "st2.abc/123.sc3");
    }

    #[test]
    fn test_sanitize_quoted_input() {
        assert_eq!(sanitize_code("\"st2.abc.sc3\"").unwrap(), "st2.abc.sc3");
    }

    #[test]
    fn test_sanitize_empty_fails() {
        assert!(matches!(sanitize_code("   "), Err(AuthError::EmptyCode)));
        assert!(matches!(sanitize_code("code="), Err(AuthError::EmptyCode)));
    }

    #[test]
    fn test_all_forms_agree() {
        let forms = [
            "st2.abc123.sc3",
            "com.philips.air://loginredirect?code=st2.abc123.sc3&state=xyz",
            "code=st2.abc123.sc3&state=xyz",
        ];
        for form in forms {
            assert_eq!(sanitize_code(form).unwrap(), "st2.abc123.sc3");
        }
    }

    #[test]
    fn test_authorize_url_parameters() {
        let client = client();
        let url = client.generate_authorize_url("flow-1");

        assert!(url.starts_with(&client.config.authorize_url()));
        assert!(url.contains("client_id=test-client"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("state=flow-1"));
        assert!(url.contains("redirect_uri=com.philips.air%3A%2F%2Floginredirect"));
        // Spaces in the scope list are percent-encoded, never '+'.
        assert!(url.contains("scope=openid%20email"));
    }

    #[test]
    fn test_challenge_derivation() {
        // RFC 7636 appendix B vector.
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[tokio::test]
    async fn test_unknown_flow_fails() {
        let client = client();
        let result = client.request_token("code=abc", "missing-flow").await;
        assert!(matches!(result, Err(AuthError::FlowNotFound(_))));
    }

    #[tokio::test]
    async fn test_verifier_consumed_once() {
        let client = client();
        client.generate_authorize_url("flow-1");
        // Empty code consumes the verifier before failing on the code itself.
        let first = client.request_token("", "flow-1").await;
        assert!(matches!(first, Err(AuthError::EmptyCode)));
        let second = client.request_token("code=abc", "flow-1").await;
        assert!(matches!(second, Err(AuthError::FlowNotFound(_))));
    }

    #[test]
    fn test_flow_store_bounded() {
        let mut store = FlowStore::default();
        for i in 0..(MAX_PENDING_FLOWS + 4) {
            store.insert(&format!("flow-{i}"), format!("verifier-{i}"));
        }
        assert!(store.flows.len() <= MAX_PENDING_FLOWS);
        // The most recent flow always survives eviction.
        assert!(store.take(&format!("flow-{}", MAX_PENDING_FLOWS + 3)).is_some());
    }

    #[test]
    fn test_percent_encode_space_and_slash() {
        assert_eq!(percent_encode("a b/c"), "a%20b%2Fc");
    }

    #[test]
    fn test_percent_decode_roundtrip() {
        assert_eq!(percent_decode("st2.abc%2F123"), "st2.abc/123");
        assert_eq!(percent_decode("plain"), "plain");
        assert_eq!(percent_decode("bad%zzescape"), "bad%zzescape");
    }
}
