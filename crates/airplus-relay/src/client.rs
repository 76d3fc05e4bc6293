//! Broker session: one authenticated MQTT-over-WebSocket connection.
//!
//! The session owns the physical connection lifecycle: handshake with the
//! custom-authorizer headers, CONNACK confirmation, the status-topic
//! subscription, keepalive pings, and teardown. Disconnect causes feed the
//! reconnection backoff, and credentials can be rotated without the consumer
//! observing a connection loss.

use crate::backoff::{
    BackoffPolicy, DISCONNECT_CAUSE_NORMAL, DISCONNECT_CAUSE_NOT_AUTHORIZED,
    DISCONNECT_CAUSE_TRANSPORT, MAX_RECONNECT_ATTEMPTS,
};
use crate::messages::{
    control_topic, shadow_get_topic, shadow_update_topic, status_topic, CommandEnvelope,
    InboundMessage,
};
use crate::packet::Packet;
use crate::{RelayError, RelayResult};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// How long a rotated session waits for the old socket to tear down before
/// presenting the same client id to the broker again.
const SOCKET_TEARDOWN_WAIT: Duration = Duration::from_secs(1);

/// Broker connection configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Broker host.
    pub host: String,
    /// Broker TLS port.
    pub port: u16,
    /// WebSocket path on the broker host.
    pub path: String,
    /// MQTT keepalive interval in seconds.
    pub keepalive_secs: u16,
    /// How long a connect attempt may take before it is abandoned.
    pub connect_timeout: Duration,
    /// Name of the broker-side custom authorizer validating the signature.
    pub custom_authorizer_name: String,
    /// Reconnect backoff policy.
    pub backoff: BackoffPolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "ats.prod.eu-da.iot.versuni.com".to_string(),
            port: 443,
            path: "/mqtt".to_string(),
            keepalive_secs: 4,
            connect_timeout: Duration::from_secs(15),
            custom_authorizer_name: "CustomAuthorizer".to_string(),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl BrokerConfig {
    /// WebSocket URL of the broker.
    pub fn url(&self) -> String {
        format!("wss://{}:{}{}", self.host, self.port, self.path)
    }
}

/// Credential material for the broker handshake.
///
/// `access_token` and `signature` come from the same refresh generation and
/// are always swapped together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerCredentials {
    pub access_token: String,
    pub signature: String,
    pub client_id: String,
}

/// Connection state of the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Events delivered to the coordinator's run loop.
#[derive(Debug)]
pub enum SessionEvent {
    /// Session connected and subscribed to the status topic.
    Connected,
    /// Session lost; `cause` drives the reconnect backoff.
    Disconnected { cause: u8 },
    /// Decoded inbound status message.
    Message(InboundMessage),
}

#[derive(Debug)]
struct LastDisconnect {
    cause: u8,
    at: Instant,
}

/// Internal session state. Guarded by a plain mutex because the reader task
/// and callers on other tasks both touch the flags.
#[derive(Debug, Default)]
struct SessionState {
    connection: ConnectionState,
    connecting: bool,
    refreshing: bool,
    closing: bool,
    attempts: u32,
    last_disconnect: Option<LastDisconnect>,
}

/// One long-lived authenticated streaming connection to the message broker.
pub struct BrokerSession {
    config: BrokerConfig,
    device_id: String,
    credentials: Mutex<BrokerCredentials>,
    state: Arc<StdMutex<SessionState>>,
    sender: Arc<Mutex<Option<mpsc::Sender<Message>>>>,
    event_tx: mpsc::Sender<SessionEvent>,
}

impl BrokerSession {
    /// Create a session for one device, returning the event receiver the
    /// coordinator consumes.
    ///
    /// The device id is normalized to its `da-` prefixed form before topics
    /// are derived from it.
    pub fn new(
        config: BrokerConfig,
        device_id: &str,
        credentials: BrokerCredentials,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let device_id = if device_id.starts_with("da-") {
            device_id.to_string()
        } else {
            format!("da-{device_id}")
        };

        let session = Self {
            config,
            device_id,
            credentials: Mutex::new(credentials),
            state: Arc::new(StdMutex::new(SessionState::default())),
            sender: Arc::new(Mutex::new(None)),
            event_tx,
        };
        (session, event_rx)
    }

    /// Normalized device id.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.lock_state().connection
    }

    /// True when the transport is connected.
    pub fn is_connected(&self) -> bool {
        self.lock_state().connection == ConnectionState::Connected
    }

    /// True when the session should be presented as available.
    ///
    /// Reports true during credential rotation so the entity layer does not
    /// flicker to unavailable mid-swap.
    pub fn is_available(&self) -> bool {
        let state = self.lock_state();
        state.connection == ConnectionState::Connected || state.refreshing
    }

    /// Connect to the broker and subscribe to the device's status topic.
    ///
    /// Only one attempt may be in flight; concurrent callers get `Ok(false)`
    /// immediately. An attempt observes the backoff owed from the previous
    /// disconnect and then blocks up to the connect timeout.
    pub async fn connect(&self) -> RelayResult<bool> {
        {
            let mut state = self.lock_state();
            if state.connecting {
                debug!("Connect already in progress");
                return Ok(false);
            }
            if state.connection == ConnectionState::Connected {
                return Ok(true);
            }
            state.connecting = true;
            state.closing = false;
            state.connection = ConnectionState::Connecting;
        }

        let result = self.do_connect().await;

        {
            let mut state = self.lock_state();
            state.connecting = false;
            if result.is_err() {
                state.connection = ConnectionState::Disconnected;
            }
        }

        result.map(|()| true)
    }

    async fn do_connect(&self) -> RelayResult<()> {
        self.wait_for_backoff().await;

        let credentials = self.credentials.lock().await.clone();
        let request = build_handshake_request(&self.config, &credentials)?;

        info!(
            url = %self.config.url(),
            client_id = %credentials.client_id,
            "Connecting to broker"
        );

        let started = Instant::now();
        let handshake = self.open_session(request, &credentials.client_id);
        let opened = match tokio::time::timeout(self.config.connect_timeout, handshake).await {
            Ok(Ok(opened)) => opened,
            Ok(Err(err)) => {
                if let RelayError::ConnectionRefused(return_code) = &err {
                    self.record_disconnect(connack_disconnect_cause(*return_code));
                }
                error!(error = %err, "Broker connect failed");
                return Err(err);
            }
            // Dropping the handshake future tears the transport down.
            Err(_) => {
                error!(
                    elapsed_secs = started.elapsed().as_secs(),
                    "Broker connect timed out"
                );
                return Err(RelayError::Timeout);
            }
        };

        self.start_io(opened).await;
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Broker connected"
        );

        let _ = self.event_tx.send(SessionEvent::Connected).await;
        Ok(())
    }

    /// Open the WebSocket, complete the MQTT handshake, and subscribe.
    async fn open_session(
        &self,
        request: Request,
        client_id: &str,
    ) -> RelayResult<(WsSink, WsSource, Vec<u8>)> {
        let connector = tls_connector()?;
        let (ws, _) = connect_async_tls_with_config(request, None, false, Some(connector)).await?;
        let (mut write, mut read) = ws.split();

        let connect = Packet::Connect {
            client_id: client_id.to_string(),
            keep_alive: self.config.keepalive_secs,
        };
        write.send(Message::Binary(connect.encode())).await?;

        // The broker may batch CONNACK with early publishes in one frame.
        let mut buffer: Vec<u8> = Vec::new();
        loop {
            if let Some((packet, used)) = Packet::decode(&buffer)? {
                buffer.drain(..used);
                match packet {
                    Packet::ConnAck { return_code: 0, .. } => break,
                    Packet::ConnAck { return_code, .. } => {
                        return Err(RelayError::ConnectionRefused(return_code));
                    }
                    other => debug!(packet = ?other, "Ignoring pre-CONNACK packet"),
                }
                continue;
            }

            match read.next().await {
                Some(Ok(Message::Binary(data))) => buffer.extend_from_slice(&data),
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err.into()),
                None => {
                    return Err(RelayError::WebSocket(
                        tokio_tungstenite::tungstenite::Error::ConnectionClosed,
                    ))
                }
            }
        }

        // Best-effort QoS-0 subscription; a SUBACK will arrive on the reader.
        let subscribe = Packet::Subscribe {
            packet_id: 1,
            topic: status_topic(&self.device_id),
        };
        write.send(Message::Binary(subscribe.encode())).await?;
        debug!(topic = %status_topic(&self.device_id), "Subscribed to status topic");

        Ok((write, read, buffer))
    }

    /// Spawn the writer, keepalive, and reader tasks for an open connection.
    async fn start_io(&self, (mut write, read, residue): (WsSink, WsSource, Vec<u8>)) {
        let (msg_tx, mut msg_rx) = mpsc::channel::<Message>(64);
        *self.sender.lock().await = Some(msg_tx.clone());

        let writer = tokio::spawn(async move {
            while let Some(message) = msg_rx.recv().await {
                let is_close = matches!(message, Message::Close(_));
                if write.send(message).await.is_err() || is_close {
                    break;
                }
            }
        });

        let keepalive_tx = msg_tx.clone();
        let keepalive_interval = Duration::from_secs(u64::from(self.config.keepalive_secs));
        let keepalive = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(keepalive_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if keepalive_tx
                    .send(Message::Binary(Packet::PingReq.encode()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        {
            let mut state = self.lock_state();
            state.connection = ConnectionState::Connected;
            state.attempts = 0;
            state.last_disconnect = None;
        }

        let state = Arc::clone(&self.state);
        let sender_slot = Arc::clone(&self.sender);
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let mut cause = run_reader(read, residue, msg_tx, &event_tx).await;
            writer.abort();
            keepalive.abort();

            let refreshing = {
                let mut state = state.lock().expect("session state lock poisoned");
                if state.closing {
                    cause = DISCONNECT_CAUSE_NORMAL;
                }
                state.closing = false;
                state.connection = ConnectionState::Disconnected;
                if cause != DISCONNECT_CAUSE_NORMAL {
                    state.attempts = (state.attempts + 1).min(MAX_RECONNECT_ATTEMPTS);
                    state.last_disconnect = Some(LastDisconnect {
                        cause,
                        at: Instant::now(),
                    });
                    warn!(cause, attempts = state.attempts, "Broker connection lost");
                }
                state.refreshing
            };
            *sender_slot.lock().await = None;

            // Suppressed during credential rotation so the consumer never
            // observes the planned disconnect.
            if !refreshing {
                let _ = event_tx.send(SessionEvent::Disconnected { cause }).await;
            }
        });
    }

    /// Sleep out whatever backoff the previous disconnect still owes.
    async fn wait_for_backoff(&self) {
        let (attempts, cause, elapsed) = {
            let state = self.lock_state();
            match &state.last_disconnect {
                Some(last) => (state.attempts, last.cause, Some(last.at.elapsed())),
                None => (state.attempts, DISCONNECT_CAUSE_NORMAL, None),
            }
        };

        let wait = self.config.backoff.wait_before_connect(attempts, cause, elapsed);
        if !wait.is_zero() {
            warn!(
                wait_secs = wait.as_secs(),
                cause, attempts, "Throttling reconnect"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Disconnect cleanly. A clean disconnect owes no backoff.
    pub async fn disconnect(&self) {
        {
            let mut state = self.lock_state();
            state.closing = true;
            state.connection = ConnectionState::Disconnected;
        }

        if let Some(sender) = self.sender.lock().await.take() {
            let _ = sender.send(Message::Binary(Packet::Disconnect.encode())).await;
            let _ = sender.send(Message::Close(None)).await;
            debug!("Broker session disconnected");
        }
    }

    /// Swap in rotated credentials and reconnect with them.
    ///
    /// Deferred (returns false, credentials untouched) while a connect is in
    /// flight. Otherwise the refreshing flag suppresses the disconnect
    /// notification while the session bounces, and is cleared whatever the
    /// reconnect outcome.
    pub async fn update_credentials(&self, credentials: BrokerCredentials) -> bool {
        {
            let state = self.lock_state();
            if state.connecting {
                debug!("Connect in progress; deferring credential update");
                return false;
            }
        }

        self.lock_state().refreshing = true;
        *self.credentials.lock().await = credentials;

        self.disconnect().await;
        tokio::time::sleep(SOCKET_TEARDOWN_WAIT).await;

        let reconnected = match self.connect().await {
            Ok(connected) => connected,
            Err(err) => {
                error!(error = %err, "Reconnect with rotated credentials failed");
                false
            }
        };

        self.lock_state().refreshing = false;
        reconnected
    }

    /// Publish a command envelope to the device's control topic.
    pub async fn send_command(&self, envelope: &CommandEnvelope) -> bool {
        match envelope.to_json() {
            Ok(json) => {
                self.publish(&control_topic(&self.device_id), json.into_bytes())
                    .await
            }
            Err(err) => {
                error!(error = %err, "Failed to encode command envelope");
                false
            }
        }
    }

    /// Request the status of one port.
    pub async fn request_port_status(&self, port_name: &str) -> bool {
        self.send_command(&CommandEnvelope::get_port(port_name)).await
    }

    /// Request the status of every port.
    pub async fn request_all_ports(&self) -> bool {
        self.send_command(&CommandEnvelope::get_all_ports()).await
    }

    /// Request the device's shadow document.
    pub async fn request_shadow_get(&self) -> bool {
        self.publish(&shadow_get_topic(&self.device_id), b"{}".to_vec())
            .await
    }

    /// Set the power state through the shadow-document topic.
    pub async fn set_power(&self, power_on: bool) -> bool {
        let payload = format!(r#"{{"state":{{"desired":{{"powerOn":{power_on}}}}}}}"#);
        self.publish(&shadow_update_topic(&self.device_id), payload.into_bytes())
            .await
    }

    /// Publish a payload at QoS 0. Fails fast when not connected; unsent
    /// commands are never queued.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> bool {
        if !self.is_connected() {
            error!(topic = %topic, "Cannot publish: not connected to broker");
            return false;
        }

        let sender = self.sender.lock().await;
        let Some(sender) = sender.as_ref() else {
            error!(topic = %topic, "Cannot publish: no writer");
            return false;
        };

        let packet = Packet::Publish {
            topic: topic.to_string(),
            payload,
        };
        match sender.send(Message::Binary(packet.encode())).await {
            Ok(()) => {
                debug!(topic = %topic, "Published");
                true
            }
            Err(err) => {
                error!(topic = %topic, error = %err, "Failed to publish");
                false
            }
        }
    }

    fn record_disconnect(&self, cause: u8) {
        let mut state = self.lock_state();
        state.connection = ConnectionState::Disconnected;
        state.attempts = (state.attempts + 1).min(MAX_RECONNECT_ATTEMPTS);
        state.last_disconnect = Some(LastDisconnect {
            cause,
            at: Instant::now(),
        });
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().expect("session state lock poisoned")
    }

    #[cfg(test)]
    fn force_connecting(&self, connecting: bool) {
        self.lock_state().connecting = connecting;
    }

    #[cfg(test)]
    async fn credentials_snapshot(&self) -> BrokerCredentials {
        self.credentials.lock().await.clone()
    }
}

/// Drain inbound frames until the connection ends, returning the disconnect
/// cause. Malformed payloads are logged and dropped; they never end the
/// session.
async fn run_reader(
    mut read: WsSource,
    mut buffer: Vec<u8>,
    reply: mpsc::Sender<Message>,
    event_tx: &mpsc::Sender<SessionEvent>,
) -> u8 {
    loop {
        loop {
            match Packet::decode(&buffer) {
                Ok(Some((packet, used))) => {
                    buffer.drain(..used);
                    match packet {
                        Packet::Publish { topic, payload } => {
                            match InboundMessage::parse(&payload) {
                                Ok(message) => {
                                    debug!(topic = %topic, "Broker message");
                                    if event_tx.send(SessionEvent::Message(message)).await.is_err() {
                                        return DISCONNECT_CAUSE_NORMAL;
                                    }
                                }
                                Err(err) => {
                                    warn!(topic = %topic, error = %err, "Dropping malformed broker payload");
                                }
                            }
                        }
                        Packet::PingResp => debug!("Keepalive acknowledged"),
                        Packet::PingReq => {
                            let _ = reply.send(Message::Binary(Packet::PingResp.encode())).await;
                        }
                        Packet::SubAck { return_code, .. } => {
                            debug!(return_code, "Subscription acknowledged");
                        }
                        Packet::Disconnect => return DISCONNECT_CAUSE_TRANSPORT,
                        other => debug!(packet = ?other, "Ignoring broker packet"),
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "Undecodable broker data; dropping buffer");
                    buffer.clear();
                    break;
                }
            }
        }

        match read.next().await {
            Some(Ok(Message::Binary(data))) => buffer.extend_from_slice(&data),
            Some(Ok(Message::Ping(data))) => {
                let _ = reply.send(Message::Pong(data)).await;
            }
            Some(Ok(Message::Close(frame))) => {
                debug!(frame = ?frame, "Broker closed the connection");
                return DISCONNECT_CAUSE_TRANSPORT;
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                error!(error = %err, "Broker transport error");
                return DISCONNECT_CAUSE_TRANSPORT;
            }
            None => return DISCONNECT_CAUSE_TRANSPORT,
        }
    }
}

/// Handshake request with the custom-authorizer headers.
fn build_handshake_request(
    config: &BrokerConfig,
    credentials: &BrokerCredentials,
) -> RelayResult<Request> {
    let mut request = config.url().into_client_request()?;
    let headers = request.headers_mut();

    headers.insert(
        "x-amz-customauthorizer-name",
        HeaderValue::from_str(&config.custom_authorizer_name)
            .map_err(|_| RelayError::Header("x-amz-customauthorizer-name"))?,
    );
    headers.insert(
        "x-amz-customauthorizer-signature",
        HeaderValue::from_str(&credentials.signature)
            .map_err(|_| RelayError::Header("x-amz-customauthorizer-signature"))?,
    );
    headers.insert("tenant", HeaderValue::from_static("da"));
    headers.insert("content-type", HeaderValue::from_static("application/json"));
    headers.insert(
        "token-header",
        HeaderValue::from_str(&format!("Bearer {}", credentials.access_token.trim()))
            .map_err(|_| RelayError::Header("token-header"))?,
    );
    headers.insert("sec-websocket-protocol", HeaderValue::from_static("mqtt"));

    Ok(request)
}

/// TLS 1.2 connector with the webpki root set. The broker negotiates TLS 1.2
/// only.
fn tls_connector() -> RelayResult<Connector> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let tls = rustls::ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS12])
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(Connector::Rustls(Arc::new(tls)))
}

/// Disconnect cause for a refused CONNACK. Return code 5 is the broker's
/// "not authorized"; everything else counts as a transport failure.
fn connack_disconnect_cause(return_code: u8) -> u8 {
    if return_code == 5 {
        DISCONNECT_CAUSE_NOT_AUTHORIZED
    } else {
        DISCONNECT_CAUSE_TRANSPORT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> BrokerCredentials {
        BrokerCredentials {
            access_token: "token".to_string(),
            signature: "signature".to_string(),
            client_id: "client-1".to_string(),
        }
    }

    fn session() -> (BrokerSession, mpsc::Receiver<SessionEvent>) {
        BrokerSession::new(BrokerConfig::default(), "abc123", credentials())
    }

    #[test]
    fn test_device_id_normalization() {
        let (session, _rx) = session();
        assert_eq!(session.device_id(), "da-abc123");

        let (session, _rx) = BrokerSession::new(BrokerConfig::default(), "da-abc123", credentials());
        assert_eq!(session.device_id(), "da-abc123");
    }

    #[test]
    fn test_initial_state() {
        let (session, _rx) = session();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!session.is_connected());
        assert!(!session.is_available());
    }

    #[tokio::test]
    async fn test_publish_fails_when_disconnected() {
        let (session, _rx) = session();
        assert!(!session.request_port_status("Status").await);
        assert!(!session.request_all_ports().await);
        assert!(!session.request_shadow_get().await);
        assert!(!session.set_power(true).await);
    }

    #[tokio::test]
    async fn test_update_credentials_deferred_while_connecting() {
        let (session, _rx) = session();
        session.force_connecting(true);

        let rotated = BrokerCredentials {
            access_token: "new-token".to_string(),
            signature: "new-signature".to_string(),
            client_id: "client-1".to_string(),
        };
        assert!(!session.update_credentials(rotated).await);

        // Deferred updates leave the stored credentials untouched.
        assert_eq!(session.credentials_snapshot().await, credentials());
        assert!(!session.lock_state().refreshing);
    }

    #[tokio::test]
    async fn test_concurrent_connect_rejected() {
        let (session, _rx) = session();
        session.force_connecting(true);
        assert!(matches!(session.connect().await, Ok(false)));
    }

    #[test]
    fn test_available_during_refresh() {
        let (session, _rx) = session();
        session.lock_state().refreshing = true;
        assert!(session.is_available());
        assert!(!session.is_connected());
    }

    #[test]
    fn test_handshake_headers() {
        let request = build_handshake_request(&BrokerConfig::default(), &credentials()).unwrap();
        let headers = request.headers();

        assert_eq!(
            request.uri().to_string(),
            "wss://ats.prod.eu-da.iot.versuni.com:443/mqtt"
        );
        assert_eq!(headers["x-amz-customauthorizer-name"], "CustomAuthorizer");
        assert_eq!(headers["x-amz-customauthorizer-signature"], "signature");
        assert_eq!(headers["tenant"], "da");
        assert_eq!(headers["content-type"], "application/json");
        assert_eq!(headers["token-header"], "Bearer token");
        assert_eq!(headers["sec-websocket-protocol"], "mqtt");
    }

    #[test]
    fn test_token_whitespace_trimmed_in_header() {
        let creds = BrokerCredentials {
            access_token: "  token \n".to_string(),
            signature: "signature".to_string(),
            client_id: "client-1".to_string(),
        };
        let request = build_handshake_request(&BrokerConfig::default(), &creds).unwrap();
        assert_eq!(request.headers()["token-header"], "Bearer token");
    }

    #[test]
    fn test_connack_cause_mapping() {
        assert_eq!(connack_disconnect_cause(5), DISCONNECT_CAUSE_NOT_AUTHORIZED);
        assert_eq!(connack_disconnect_cause(3), DISCONNECT_CAUSE_TRANSPORT);
        assert_eq!(connack_disconnect_cause(4), DISCONNECT_CAUSE_TRANSPORT);
    }

    #[test]
    fn test_record_disconnect_caps_attempts() {
        let (session, _rx) = session();
        for _ in 0..40 {
            session.record_disconnect(DISCONNECT_CAUSE_TRANSPORT);
        }
        let state = session.lock_state();
        assert_eq!(state.attempts, MAX_RECONNECT_ATTEMPTS);
        assert_eq!(
            state.last_disconnect.as_ref().unwrap().cause,
            DISCONNECT_CAUSE_TRANSPORT
        );
    }

    #[tokio::test]
    async fn test_disconnect_without_connection() {
        let (session, _rx) = session();
        session.disconnect().await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }
}
