//! The device coordinator and its run loop.

use crate::snapshot::{percentage_to_speed, DeviceSnapshot};
use crate::{CoordError, CoordResult};
use airplus_auth::{build_client_id, AuthError, AuthManager};
use airplus_core::models::{PROP_FAN_SPEED, PROP_MODE};
use airplus_core::{BridgeConfig, ModelCatalog, ModelProfile};
use airplus_relay::{
    BrokerConfig, BrokerCredentials, BrokerSession, CommandEnvelope, SessionEvent, PORT_CONFIG,
    PORT_CONTROL, PORT_FILTER_READ, PORT_STATUS,
};
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, error, info, warn};

/// Model assumed until the device reports its own through the Config port.
const DEFAULT_MODEL: &str = "AC0650/10";

/// Delay before the automatic reconnect after an unexpected disconnect.
const RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Minimum spacing between full multi-port status sweeps.
const FULL_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Pause between the individual requests of a full sweep.
const SWEEP_REQUEST_GAP: Duration = Duration::from_millis(100);

/// Orchestrates one device: polling cadence, message routing, credential
/// rotation, and the property command API.
///
/// The run loop is the sole mutator of the snapshot and the active model
/// profile; everything arriving from the session's worker tasks is marshaled
/// through the event channel first.
pub struct DeviceCoordinator {
    config: BridgeConfig,
    auth: Mutex<AuthManager>,
    session: Arc<BrokerSession>,
    catalog: ModelCatalog,
    profile: StdRwLock<ModelProfile>,
    device_uuid: String,
    device_name: String,
    broker_client_id: String,
    snapshot: StdRwLock<DeviceSnapshot>,
    last_full_request: StdMutex<Option<Instant>>,
    events: Mutex<Option<mpsc::Receiver<SessionEvent>>>,
    reauth_required: AtomicBool,
    shutdown: Notify,
}

impl DeviceCoordinator {
    /// Set up the coordinator for one device: initialize authentication,
    /// build the broker session, connect, and request the initial status.
    pub async fn setup(
        config: BridgeConfig,
        mut auth: AuthManager,
        device_uuid: &str,
        device_name: &str,
    ) -> CoordResult<Arc<Self>> {
        if !auth.initialize().await {
            return Err(CoordError::AuthFailed);
        }

        let credentials = auth.credentials();
        let broker_client_id = build_client_id(
            credentials.user_id.as_deref().unwrap_or(""),
            device_uuid,
        );
        let broker_credentials = BrokerCredentials {
            access_token: credentials.access_token.clone().unwrap_or_default(),
            signature: credentials.signature.clone().unwrap_or_default(),
            client_id: broker_client_id.clone(),
        };

        let broker_config = BrokerConfig {
            host: config.broker_host.clone(),
            port: config.broker_port,
            path: config.broker_path.clone(),
            keepalive_secs: config.keepalive_secs,
            ..BrokerConfig::default()
        };
        let (session, events) = BrokerSession::new(broker_config, device_uuid, broker_credentials);

        let coordinator = Self::assemble(
            config,
            auth,
            Arc::new(session),
            events,
            device_uuid,
            device_name,
            broker_client_id,
        );

        if let Err(err) = coordinator.session.connect().await {
            return Err(CoordError::ConnectFailed(err.to_string()));
        }
        coordinator.request_status_sweep().await;

        Ok(coordinator)
    }

    fn assemble(
        config: BridgeConfig,
        auth: AuthManager,
        session: Arc<BrokerSession>,
        events: mpsc::Receiver<SessionEvent>,
        device_uuid: &str,
        device_name: &str,
        broker_client_id: String,
    ) -> Arc<Self> {
        let catalog = ModelCatalog::builtin();
        let profile = catalog.resolve(DEFAULT_MODEL);

        Arc::new(Self {
            config,
            auth: Mutex::new(auth),
            session,
            catalog,
            profile: StdRwLock::new(profile),
            device_uuid: device_uuid.to_string(),
            device_name: device_name.to_string(),
            broker_client_id,
            snapshot: StdRwLock::new(DeviceSnapshot::default()),
            last_full_request: StdMutex::new(None),
            events: Mutex::new(Some(events)),
            reauth_required: AtomicBool::new(false),
            shutdown: Notify::new(),
        })
    }

    /// Device UUID this coordinator manages.
    pub fn device_uuid(&self) -> &str {
        &self.device_uuid
    }

    /// Display name of the device.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Whether the refresh token was revoked and a full re-authentication
    /// flow is required.
    pub fn needs_reauth(&self) -> bool {
        self.reauth_required.load(Ordering::Relaxed)
    }

    /// Current state snapshot.
    pub fn snapshot(&self) -> DeviceSnapshot {
        self.lock_snapshot_read().clone()
    }

    /// The active model profile.
    pub fn active_profile(&self) -> ModelProfile {
        self.profile
            .read()
            .expect("profile lock poisoned")
            .clone()
    }

    /// Selectable preset names for the active model.
    pub fn preset_modes(&self) -> Vec<String> {
        self.active_profile()
            .preset_modes()
            .into_iter()
            .map(String::from)
            .collect()
    }

    /// Whether the device should be presented as available.
    pub fn is_available(&self) -> bool {
        self.session.is_available()
    }

    /// Run the event loop until shutdown. Consumes the session's event
    /// receiver; calling this twice panics.
    pub async fn run(self: Arc<Self>) {
        let mut events = self
            .events
            .lock()
            .await
            .take()
            .expect("coordinator run loop already started");

        let mut poll = tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs));
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        poll.tick().await;

        info!(device = %self.device_name, "Coordinator running");
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            warn!(device = %self.device_name, "Session event channel closed");
                            break;
                        }
                    }
                }
                _ = poll.tick() => self.poll_cycle().await,
                _ = self.shutdown.notified() => {
                    info!(device = %self.device_name, "Coordinator shutting down");
                    self.session.disconnect().await;
                    break;
                }
            }
        }
    }

    /// Ask the run loop to disconnect and stop.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    async fn handle_event(self: &Arc<Self>, event: SessionEvent) {
        match event {
            SessionEvent::Connected => {
                info!(device = %self.device_name, "Connected to device");
                self.set_connected(true);
                self.request_status_sweep().await;
            }
            SessionEvent::Disconnected { cause } => {
                warn!(device = %self.device_name, cause, "Disconnected from device");
                self.set_connected(false);
                self.schedule_reconnect();
            }
            SessionEvent::Message(message) => {
                self.route_message(&message);
            }
        }
    }

    /// Delayed reconnect after an unexpected disconnect. A no-op when a
    /// connection has been reestablished by other means in the meantime.
    fn schedule_reconnect(self: &Arc<Self>) {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(RECONNECT_DELAY).await;
            if coordinator.session.is_connected() {
                return;
            }
            info!(device = %coordinator.device_name, "Attempting reconnect");
            match coordinator.session.connect().await {
                Ok(true) => info!(device = %coordinator.device_name, "Reconnected"),
                Ok(false) => debug!("Reconnect already in progress"),
                Err(err) => error!(error = %err, "Reconnect failed"),
            }
        });
    }

    /// Route one inbound message into the snapshot.
    fn route_message(&self, message: &airplus_relay::InboundMessage) {
        if let Some(ports) = message.port_list() {
            debug!(ports = ?ports, "Port inventory");
            return;
        }

        let Some(properties) = message.properties() else {
            debug!(cn = ?message.cn, "Ignoring message without properties");
            return;
        };

        self.lock_snapshot_write().last_update = Some(Utc::now());

        match message.port_name() {
            // Some firmwares omit the port name on status pushes.
            Some(PORT_STATUS) | None => self.apply_status(properties),
            Some(PORT_CONFIG) => self.apply_config(properties),
            Some(PORT_FILTER_READ) => self.apply_filter(properties),
            Some(other) => debug!(port = other, "Ignoring unhandled port"),
        }
    }

    fn apply_status(&self, properties: &Map<String, Value>) {
        let profile = self.active_profile();
        {
            let mut snapshot = self.lock_snapshot_write();
            for (key, value) in properties {
                snapshot.state.insert(key.clone(), value.clone());
            }
        }

        let snapshot = self.lock_snapshot_read();
        if let Some(speed) = snapshot.fan_speed(&profile) {
            debug!(speed, "Fan speed updated");
        }
        if let Some(mode) = snapshot.mode_name(&profile) {
            debug!(mode, "Mode updated");
        }
    }

    /// A Config-port message carrying `ctn` switches the active model
    /// profile.
    fn apply_config(&self, properties: &Map<String, Value>) {
        if let Some(model) = properties.get("ctn").and_then(Value::as_str) {
            info!(model, "Device model reported");
            let resolved = self.catalog.resolve(model);
            *self.profile.write().expect("profile lock poisoned") = resolved;
        }
    }

    fn apply_filter(&self, properties: &Map<String, Value>) {
        let mut snapshot = self.lock_snapshot_write();
        for (key, value) in properties {
            snapshot.filter.insert(key.clone(), value.clone());
        }
    }

    async fn poll_cycle(self: &Arc<Self>) {
        self.ensure_fresh_credentials().await;

        if !self.session.is_connected() {
            debug!(device = %self.device_name, "Skipping poll: not connected");
            return;
        }
        self.request_status_sweep().await;
    }

    /// Refresh the access token ahead of expiry and rotate the broker
    /// credentials when it changed.
    async fn ensure_fresh_credentials(self: &Arc<Self>) {
        let mut auth = self.auth.lock().await;
        let before = auth.credentials().access_token.clone();

        match auth.ensure_access_token().await {
            Ok(true) => {
                let credentials = auth.credentials();
                if credentials.access_token == before {
                    return;
                }
                info!("Access token rotated, updating broker credentials");
                let rotated = BrokerCredentials {
                    access_token: credentials.access_token.clone().unwrap_or_default(),
                    signature: credentials.signature.clone().unwrap_or_default(),
                    client_id: self.broker_client_id.clone(),
                };
                drop(auth);
                if !self.session.update_credentials(rotated).await {
                    warn!("Credential rotation deferred, retrying next cycle");
                }
            }
            Ok(false) => warn!("No usable access token this cycle"),
            Err(AuthError::AuthenticationExpired) => {
                error!("Refresh token revoked, full re-authentication required");
                self.reauth_required.store(true, Ordering::Relaxed);
            }
            Err(err) => warn!(error = %err, "Token refresh failed"),
        }
    }

    /// Request device status. Full multi-port sweeps are throttled to once
    /// per five minutes; lightweight status-only requests fill the gaps.
    async fn request_status_sweep(&self) {
        if !self.session.is_connected() {
            return;
        }

        if self.take_full_sweep_slot() {
            self.session.request_port_status(PORT_STATUS).await;
            tokio::time::sleep(SWEEP_REQUEST_GAP).await;
            self.session.request_port_status(PORT_CONFIG).await;
            tokio::time::sleep(SWEEP_REQUEST_GAP).await;
            self.session.request_port_status(PORT_FILTER_READ).await;
            tokio::time::sleep(SWEEP_REQUEST_GAP).await;
            self.session.request_shadow_get().await;
        } else {
            self.session.request_port_status(PORT_STATUS).await;
        }
    }

    fn take_full_sweep_slot(&self) -> bool {
        let mut last = self
            .last_full_request
            .lock()
            .expect("sweep throttle lock poisoned");
        match *last {
            Some(at) if at.elapsed() < FULL_SWEEP_INTERVAL => false,
            _ => {
                *last = Some(Instant::now());
                true
            }
        }
    }

    /// Set the raw fan speed. A follow-up status request surfaces the
    /// device's authoritative response.
    pub async fn set_fan_speed(&self, speed: i64) -> bool {
        if !self.session.is_connected() {
            return false;
        }
        let Some(raw_key) = self.raw_key(PROP_FAN_SPEED) else {
            error!("No raw key for fan_speed on this model");
            return false;
        };

        debug!(speed, key = %raw_key, "Setting fan speed");
        let mut properties = Map::new();
        properties.insert(raw_key, Value::from(speed));
        self.send_and_confirm(CommandEnvelope::set_port(PORT_CONTROL, properties))
            .await
    }

    /// Set the fan speed from a 1-100 percentage; 0 turns the device off.
    pub async fn set_percentage(&self, percentage: u8) -> bool {
        if percentage == 0 {
            return self.set_power(false).await;
        }
        let speeds = self.active_profile().speeds().to_vec();
        let Some(speed) = percentage_to_speed(&speeds, percentage) else {
            error!(percentage, "No speeds defined for this model");
            return false;
        };
        self.set_fan_speed(speed).await
    }

    /// Set the device mode by preset name.
    pub async fn set_mode(&self, mode: &str) -> bool {
        if !self.session.is_connected() {
            return false;
        }
        let profile = self.active_profile();
        let Some(value) = profile.mode_value(mode) else {
            error!(mode, "Unknown mode");
            return false;
        };
        let Some(raw_key) = profile.raw_key(PROP_MODE).map(String::from) else {
            error!("No raw key for mode on this model");
            return false;
        };

        debug!(mode, value, "Setting mode");
        let mut properties = Map::new();
        properties.insert(raw_key, Value::from(value));
        self.send_and_confirm(CommandEnvelope::set_port(PORT_CONTROL, properties))
            .await
    }

    /// Set the power state through the shadow document.
    pub async fn set_power(&self, power_on: bool) -> bool {
        if !self.session.is_connected() {
            return false;
        }

        debug!(power_on, "Setting power");
        let sent = self.session.set_power(power_on).await;
        if sent {
            self.session.request_port_status(PORT_STATUS).await;
        }
        sent
    }

    async fn send_and_confirm(&self, envelope: CommandEnvelope) -> bool {
        let sent = self.session.send_command(&envelope).await;
        if sent {
            self.session.request_port_status(PORT_STATUS).await;
        }
        sent
    }

    fn raw_key(&self, property: &str) -> Option<String> {
        self.profile
            .read()
            .expect("profile lock poisoned")
            .raw_key(property)
            .map(String::from)
    }

    fn set_connected(&self, connected: bool) {
        self.lock_snapshot_write().connected = connected;
    }

    fn lock_snapshot_read(&self) -> std::sync::RwLockReadGuard<'_, DeviceSnapshot> {
        self.snapshot.read().expect("snapshot lock poisoned")
    }

    fn lock_snapshot_write(&self) -> std::sync::RwLockWriteGuard<'_, DeviceSnapshot> {
        self.snapshot.write().expect("snapshot lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airplus_core::OidcConfig;
    use airplus_relay::InboundMessage;
    use serde_json::json;

    fn coordinator() -> Arc<DeviceCoordinator> {
        let config = BridgeConfig::default();
        let auth = AuthManager::new(
            OidcConfig::default(),
            config.api_base_url(),
            Some("client-id".to_string()),
        );
        let credentials = BrokerCredentials {
            access_token: "token".to_string(),
            signature: "signature".to_string(),
            client_id: "client-dev".to_string(),
        };
        let (session, events) = BrokerSession::new(BrokerConfig::default(), "dev-1", credentials);
        DeviceCoordinator::assemble(
            config,
            auth,
            Arc::new(session),
            events,
            "dev-1",
            "Living room",
            "client-dev".to_string(),
        )
    }

    fn message(payload: &str) -> InboundMessage {
        InboundMessage::parse(payload.as_bytes()).unwrap()
    }

    #[test]
    fn test_initial_state() {
        let coordinator = coordinator();
        assert_eq!(coordinator.device_uuid(), "dev-1");
        assert_eq!(coordinator.device_name(), "Living room");
        assert!(!coordinator.is_available());
        assert!(!coordinator.needs_reauth());
        assert!(coordinator.snapshot().state.is_empty());
        assert_eq!(coordinator.active_profile().name, "AC0650/10");
    }

    #[test]
    fn test_status_message_updates_snapshot() {
        let coordinator = coordinator();
        coordinator.route_message(&message(
            r#"{"cn":"getPort","data":{"portName":"Status","properties":{"D0310D":8,"D0310C":0}}}"#,
        ));

        let snapshot = coordinator.snapshot();
        let profile = coordinator.active_profile();
        assert_eq!(snapshot.fan_speed(&profile), Some(8));
        assert_eq!(snapshot.preset_mode(&profile), Some("auto"));
        assert!(snapshot.last_update.is_some());
    }

    #[test]
    fn test_status_without_port_name() {
        let coordinator = coordinator();
        coordinator.route_message(&message(
            r#"{"cn":"getPort","data":{"properties":{"D0310D":4}}}"#,
        ));
        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot.fan_speed(&coordinator.active_profile()), Some(4));
    }

    #[test]
    fn test_config_message_switches_profile() {
        let coordinator = coordinator();
        coordinator.route_message(&message(
            r#"{"cn":"getPort","data":{"portName":"Config","properties":{"ctn":"AC3220/10"}}}"#,
        ));
        assert_eq!(coordinator.active_profile().name, "AC3220/10");
        assert_eq!(coordinator.active_profile().speeds(), &[2, 6, 10, 14, 18]);
    }

    #[test]
    fn test_filter_message_updates_filter_info() {
        let coordinator = coordinator();
        coordinator.route_message(&message(
            r#"{"cn":"getPort","data":{"portName":"filtRd","properties":{"D05408":200,"D0540C":150}}}"#,
        ));
        let info = coordinator
            .snapshot()
            .filter_info(&coordinator.active_profile());
        assert_eq!(info.clean_percentage, Some(75.0));
    }

    #[test]
    fn test_port_list_message_ignored() {
        let coordinator = coordinator();
        coordinator.route_message(&message(
            r#"{"cn":"getAllPorts","data":[{"portName":"Status"},{"portName":"Config"}]}"#,
        ));
        assert!(coordinator.snapshot().state.is_empty());
    }

    #[test]
    fn test_full_sweep_throttled() {
        let coordinator = coordinator();
        assert!(coordinator.take_full_sweep_slot());
        assert!(!coordinator.take_full_sweep_slot());
        assert!(!coordinator.take_full_sweep_slot());
    }

    #[tokio::test]
    async fn test_commands_fail_when_disconnected() {
        let coordinator = coordinator();
        assert!(!coordinator.set_fan_speed(8).await);
        assert!(!coordinator.set_mode("sleep").await);
        assert!(!coordinator.set_power(true).await);
        assert!(!coordinator.set_percentage(50).await);
    }

    #[test]
    fn test_preset_modes() {
        let coordinator = coordinator();
        assert_eq!(coordinator.preset_modes(), vec!["auto", "sleep", "turbo"]);
    }
}
