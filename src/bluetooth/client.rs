//! Heart-rate strap connection state machine

use super::heart_rate::parse_heart_rate;
use crate::error::BleError;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub const MAX_CONNECTION_ATTEMPTS: u32 = 3;
/// Minimum pause between connection attempts
pub const CONNECTION_DELAY: Duration = Duration::from_millis(3000);
/// Connected without a notification for this long counts as a failure
pub const HEARTRATE_TIMEOUT: Duration = Duration::from_millis(30000);
/// Time spent in `Disconnected` before scanning again
pub const RECONNECT_DELAY: Duration = Duration::from_millis(1000);
/// Stored until the first notification; never reported as a heart rate
const NO_HEART_RATE: u8 = u8::MAX;

/// Something the transport observed
#[derive(Debug, Clone, PartialEq)]
pub enum BleEvent {
    /// Advertisement seen while scanning
    Discovered {
        address: String,
        name: Option<String>,
    },
    /// Link to the peripheral dropped
    Disconnected(String),
    /// Heart Rate Measurement payload
    Notification(Vec<u8>),
}

/// The radio operations the client needs; events arrive on a channel
#[async_trait]
pub trait BleTransport: Send {
    async fn start_scan(&mut self) -> Result<(), BleError>;
    async fn stop_scan(&mut self) -> Result<(), BleError>;
    fn is_scanning(&self) -> bool;
    async fn connect(&mut self, address: &str) -> Result<(), BleError>;
    /// Returns false when the Heart Rate service is missing
    async fn discover_services(&mut self) -> Result<bool, BleError>;
    /// Returns false when no notify-capable measurement characteristic exists
    async fn subscribe_heart_rate(&mut self) -> Result<bool, BleError>;
    async fn disconnect(&mut self) -> Result<(), BleError>;
}

/// Matches scan results against the configured strap address, falling back
/// to the advertised name
#[derive(Debug, Clone)]
pub struct ScanCallbacks {
    target: String,
    name: Option<String>,
}

impl ScanCallbacks {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_ascii_lowercase(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        let name = name.trim();
        self.name = (!name.is_empty()).then(|| name.to_string());
        self
    }

    pub fn on_result(&self, address: &str, name: Option<&str>) -> bool {
        if address.eq_ignore_ascii_case(&self.target) {
            return true;
        }
        match (&self.name, name) {
            (Some(wanted), Some(seen)) => seen.trim().eq_ignore_ascii_case(wanted),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Scanning,
    Connecting,
    DiscoveringServices,
    Subscribing,
    Connected,
    Disconnected,
}

impl ClientState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientState::Scanning => "scanning",
            ClientState::Connecting => "connecting",
            ClientState::DiscoveringServices => "discovering services",
            ClientState::Subscribing => "subscribing",
            ClientState::Connected => "connected",
            ClientState::Disconnected => "disconnected",
        }
    }

    /// How long an operation in this state may take
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            ClientState::Connecting => Some(Duration::from_secs(10)),
            ClientState::DiscoveringServices => Some(Duration::from_secs(5)),
            ClientState::Subscribing => Some(Duration::from_secs(3)),
            ClientState::Scanning | ClientState::Connected => None,
            ClientState::Disconnected => Some(Duration::from_secs(8)),
        }
    }

    fn has_link(&self) -> bool {
        matches!(
            self,
            ClientState::Connecting
                | ClientState::DiscoveringServices
                | ClientState::Subscribing
                | ClientState::Connected
        )
    }
}

/// Run one transport operation bounded by the state's timeout
async fn bounded<R>(
    state: ClientState,
    op: impl Future<Output = Result<R, BleError>>,
) -> Result<R, String> {
    let limit = state.timeout().unwrap_or(Duration::from_secs(8));
    match tokio::time::timeout(limit, op).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("timed out while {}", state.as_str())),
    }
}

pub struct BluetoothClient<T: BleTransport> {
    transport: T,
    events: mpsc::Receiver<BleEvent>,
    scan: ScanCallbacks,
    state: ClientState,
    state_since: Instant,
    target: Option<String>,
    do_connect: bool,
    attempts: u32,
    last_attempt: Option<Instant>,
    last_notification: Instant,
    heart_rate: Option<u8>,
}

impl<T: BleTransport> BluetoothClient<T> {
    pub fn new(transport: T, events: mpsc::Receiver<BleEvent>, strap_address: &str) -> Self {
        let now = Instant::now();
        Self {
            transport,
            events,
            scan: ScanCallbacks::new(strap_address),
            state: ClientState::Scanning,
            state_since: now,
            target: None,
            do_connect: false,
            attempts: 0,
            last_attempt: None,
            last_notification: now,
            heart_rate: None,
        }
    }

    /// Also accept a strap advertising `name` under another address
    pub fn with_strap_name(mut self, name: &str) -> Self {
        self.scan = self.scan.with_name(name);
        self
    }

    pub async fn begin(&mut self) -> Result<(), BleError> {
        tracing::info!("Scanning for heart-rate strap...");
        self.set_state(ClientState::Scanning);
        self.transport.start_scan().await
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ClientState::Connected
    }

    /// Last heart rate in bpm, 0 without a usable reading
    pub fn heart_rate(&self) -> u8 {
        match self.heart_rate {
            Some(NO_HEART_RATE) | None => 0,
            Some(bpm) => bpm,
        }
    }

    pub fn has_heart_rate(&self) -> bool {
        self.heart_rate.is_some_and(|bpm| bpm != NO_HEART_RATE)
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// One pass of the state machine
    pub async fn tick(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event).await;
        }

        let now = Instant::now();

        if self.state == ClientState::Connected
            && now.duration_since(self.last_notification) > HEARTRATE_TIMEOUT
        {
            self.handle_failure("no heart-rate notification received").await;
            return;
        }

        match self.state {
            ClientState::Scanning => {
                if !self.transport.is_scanning() {
                    tracing::debug!("Scan stopped, restarting");
                    if let Err(e) = self.transport.start_scan().await {
                        tracing::warn!("Failed to restart scan: {}", e);
                    }
                }

                let delay_passed = self
                    .last_attempt
                    .map_or(true, |last| now.duration_since(last) >= CONNECTION_DELAY);
                if self.target.is_some() && self.do_connect && delay_passed {
                    self.connect_to_server().await;
                }
            }
            ClientState::Disconnected => {
                if self.target.is_some()
                    && now.duration_since(self.state_since) >= RECONNECT_DELAY
                {
                    tracing::info!("Rescanning for strap");
                    self.set_state(ClientState::Scanning);
                    if let Err(e) = self.transport.start_scan().await {
                        tracing::warn!("Failed to restart scan: {}", e);
                    }
                    self.do_connect = true;
                }
            }
            _ => {}
        }
    }

    async fn handle_event(&mut self, event: BleEvent) {
        match event {
            BleEvent::Discovered { address, name } => {
                self.on_result(&address, name.as_deref()).await
            }
            BleEvent::Disconnected(reason) => {
                if self.state.has_link() {
                    self.on_disconnect(&reason).await;
                }
            }
            BleEvent::Notification(payload) => self.on_heart_rate_notify(&payload),
        }
    }

    async fn on_result(&mut self, address: &str, name: Option<&str>) {
        if self.state != ClientState::Scanning || !self.scan.on_result(address, name) {
            return;
        }
        if self.target.is_none() {
            tracing::info!("Target strap found: {}", address);
        }
        self.target = Some(address.to_string());
        self.do_connect = true;
        if let Err(e) = self.transport.stop_scan().await {
            tracing::debug!("Failed to stop scan: {}", e);
        }
    }

    fn on_heart_rate_notify(&mut self, payload: &[u8]) {
        if !self.state.has_link() {
            return;
        }
        match parse_heart_rate(payload) {
            Some(bpm) => {
                self.heart_rate = Some(u8::try_from(bpm).unwrap_or(u8::MAX));
                self.last_notification = Instant::now();
            }
            None => tracing::debug!("Ignoring malformed heart-rate payload {:02x?}", payload),
        }
    }

    pub async fn on_disconnect(&mut self, reason: &str) {
        tracing::warn!("Strap disconnected (reason={})", reason);
        self.attempts = 0;
        self.cleanup().await;
        self.set_state(ClientState::Disconnected);
        self.last_attempt = Some(Instant::now());
        self.do_connect = self.target.is_some();
    }

    async fn connect_to_server(&mut self) {
        self.attempts += 1;
        self.last_attempt = Some(Instant::now());

        if self.attempts > MAX_CONNECTION_ATTEMPTS {
            self.handle_failure("too many connection attempts").await;
            return;
        }
        let Some(address) = self.target.clone() else {
            return;
        };

        tracing::info!(
            "Connecting to {} (attempt {}/{})",
            address,
            self.attempts,
            MAX_CONNECTION_ATTEMPTS
        );
        self.cleanup().await;
        if self.transport.is_scanning() {
            if let Err(e) = self.transport.stop_scan().await {
                tracing::debug!("Failed to stop scan: {}", e);
            }
        }
        self.set_state(ClientState::Connecting);
        if let Err(reason) = bounded(self.state, self.transport.connect(&address)).await {
            self.handle_failure(&format!("connection failed: {}", reason)).await;
            return;
        }

        self.set_state(ClientState::DiscoveringServices);
        match bounded(self.state, self.transport.discover_services()).await {
            Ok(true) => {}
            Ok(false) => {
                self.handle_failure("heart-rate service not found").await;
                return;
            }
            Err(reason) => {
                self.handle_failure(&format!("service discovery failed: {}", reason))
                    .await;
                return;
            }
        }

        self.set_state(ClientState::Subscribing);
        match bounded(self.state, self.transport.subscribe_heart_rate()).await {
            Ok(true) => {}
            Ok(false) => {
                self.handle_failure("heart-rate characteristic cannot notify").await;
                return;
            }
            Err(reason) => {
                self.handle_failure(&format!("subscribe failed: {}", reason)).await;
                return;
            }
        }

        self.set_state(ClientState::Connected);
        self.attempts = 0;
        self.do_connect = false;
        self.last_notification = Instant::now();
        tracing::info!("Connected & subscribed to heart rate");
    }

    async fn handle_failure(&mut self, reason: &str) {
        tracing::warn!("Strap connection failure: {}", reason);
        self.cleanup().await;
        self.do_connect = false;

        if self.attempts >= MAX_CONNECTION_ATTEMPTS {
            tracing::warn!("Giving up on {:?}, scanning again", self.target);
            self.attempts = 0;
            self.target = None;
            self.set_state(ClientState::Scanning);
            if let Err(e) = self.transport.start_scan().await {
                tracing::warn!("Failed to restart scan: {}", e);
            }
        } else {
            self.set_state(ClientState::Disconnected);
            self.last_attempt = Some(Instant::now());
        }
    }

    async fn cleanup(&mut self) {
        if self.state.has_link() {
            if let Err(e) = self.transport.disconnect().await {
                tracing::debug!("Disconnect during cleanup failed: {}", e);
            }
        }
    }

    fn set_state(&mut self, state: ClientState) {
        if self.state != state {
            tracing::debug!("BLE state {} -> {}", self.state.as_str(), state.as_str());
        }
        self.state = state;
        self.state_since = Instant::now();
    }

    #[cfg(test)]
    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }

    #[cfg(test)]
    pub(crate) fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
