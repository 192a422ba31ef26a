//! Connection manager keeping one uplink alive

use super::{lock_modem, SharedModem, WifiLink};
use crate::shared::format_remaining;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// WiFi failures tolerated before falling back to LTE
pub const MIN_WIFI_ATTEMPTS: u32 = 3;
/// Minimum time between LTE connection attempts
pub const LTE_RETRY_COOLDOWN: Duration = Duration::from_secs(60);
/// How long to wait for the shared modem
pub const MODEM_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Network credentials
#[derive(Debug, Clone)]
pub struct Credentials {
    pub ssid: String,
    pub password: String,
    pub apn: String,
}

pub struct Network {
    wifi: Box<dyn WifiLink>,
    modem: Option<SharedModem>,
    credentials: Credentials,
    status: watch::Sender<bool>,
    lte_connected: bool,
    modem_enabled: bool,
    wifi_attempts: u32,
    last_lte_attempt: Option<Instant>,
    last_wifi_state: bool,
}

impl Network {
    pub fn new(
        wifi: Box<dyn WifiLink>,
        modem: Option<SharedModem>,
        credentials: Credentials,
        status: watch::Sender<bool>,
    ) -> Self {
        Self {
            wifi,
            modem,
            credentials,
            status,
            lte_connected: false,
            modem_enabled: false,
            wifi_attempts: 0,
            last_lte_attempt: None,
            last_wifi_state: false,
        }
    }

    pub fn begin(&self) {
        tracing::info!(
            "Network initialized (WiFi ready, LTE modem {})",
            if self.modem.is_some() { "on demand" } else { "not available" }
        );
    }

    pub async fn connect_wifi(&mut self) -> bool {
        let Credentials { ssid, password, .. } = &self.credentials;
        tracing::info!("Connecting to WiFi {:?}...", ssid);
        self.wifi.connect(ssid, password).await
    }

    pub async fn disconnect_wifi(&mut self) {
        self.wifi.disconnect().await;
    }

    pub async fn is_wifi_connected(&mut self) -> bool {
        self.wifi.is_connected().await
    }

    pub async fn enable_modem(&mut self) -> bool {
        let Some(modem) = &self.modem else {
            return false;
        };
        if self.modem_enabled {
            return true;
        }
        let result = match lock_modem(modem, MODEM_LOCK_TIMEOUT).await {
            Ok(mut m) => m.enable().await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                self.modem_enabled = true;
                true
            }
            Err(e) => {
                tracing::warn!("Failed to enable modem: {}", e);
                false
            }
        }
    }

    pub async fn disable_modem(&mut self) -> bool {
        let Some(modem) = &self.modem else {
            return true;
        };
        if !self.modem_enabled {
            return true;
        }
        let result = match lock_modem(modem, MODEM_LOCK_TIMEOUT).await {
            Ok(mut m) => m.disable().await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                tracing::info!("Modem disabled");
                self.modem_enabled = false;
                self.lte_connected = false;
                true
            }
            Err(e) => {
                tracing::warn!("Failed to disable modem: {}", e);
                false
            }
        }
    }

    pub async fn connect_lte(&mut self) -> bool {
        let Some(modem) = self.modem.clone() else {
            tracing::debug!("No modem configured, LTE unavailable");
            return false;
        };
        if !self.enable_modem().await {
            return false;
        }

        let result = match lock_modem(&modem, MODEM_LOCK_TIMEOUT).await {
            Ok(mut m) => m.connect(&self.credentials.apn).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                self.lte_connected = true;
                true
            }
            Err(e) => {
                // the modem powers itself down on a failed attach
                tracing::warn!("LTE connection failed: {}", e);
                self.modem_enabled = false;
                self.lte_connected = false;
                false
            }
        }
    }

    pub async fn disconnect_lte(&mut self) {
        if let Some(modem) = &self.modem {
            match lock_modem(modem, MODEM_LOCK_TIMEOUT).await {
                Ok(mut m) => {
                    if let Err(e) = m.disconnect().await {
                        tracing::warn!("LTE disconnect failed: {}", e);
                    }
                }
                Err(e) => tracing::warn!("LTE disconnect skipped: {}", e),
            }
        }
        self.lte_connected = false;
    }

    pub async fn is_lte_connected(&mut self) -> bool {
        let Some(modem) = &self.modem else {
            return false;
        };
        if !self.modem_enabled {
            self.lte_connected = false;
            return false;
        }
        self.lte_connected = match lock_modem(modem, MODEM_LOCK_TIMEOUT).await {
            Ok(mut m) => m.is_data_connected().await,
            // keep the last known state while the GPS holds the modem
            Err(_) => self.lte_connected,
        };
        self.lte_connected
    }

    pub async fn is_connected(&mut self) -> bool {
        self.is_wifi_connected().await || self.is_lte_connected().await
    }

    /// Connection state published by the last supervision pass
    pub fn status(&self) -> bool {
        *self.status.borrow()
    }

    pub fn wifi_attempts(&self) -> u32 {
        self.wifi_attempts
    }

    async fn drop_lte(&mut self) {
        if self.lte_connected {
            tracing::info!("WiFi connected, disabling LTE modem to save power");
            self.disconnect_lte().await;
            self.disable_modem().await;
            self.lte_connected = false;
        }
    }

    /// One supervision pass; publishes the resulting connection state
    pub async fn maintain_connection(&mut self) {
        let wifi_up = self.is_wifi_connected().await;
        if wifi_up && !self.last_wifi_state {
            tracing::info!("WiFi connection restored");
        }
        self.last_wifi_state = wifi_up;

        if wifi_up {
            self.wifi_attempts = 0;
            self.drop_lte().await;
        } else {
            tracing::info!("WiFi not connected, scanning for networks...");
            let ssid = self.credentials.ssid.clone();
            if self.wifi.scan(&ssid).await {
                tracing::info!("Target WiFi network found, attempting connection...");
                if self.connect_wifi().await {
                    self.wifi_attempts = 0;
                    self.drop_lte().await;
                } else {
                    self.wifi_attempts += 1;
                    tracing::warn!(
                        "WiFi connection failed, attempt {} of {}",
                        self.wifi_attempts,
                        MIN_WIFI_ATTEMPTS
                    );
                }
            } else {
                self.wifi_attempts += 1;
                tracing::info!(
                    "WiFi network not found, scan attempt {} of {}",
                    self.wifi_attempts,
                    MIN_WIFI_ATTEMPTS
                );
            }

            if self.wifi_attempts >= MIN_WIFI_ATTEMPTS {
                self.fall_back_to_lte().await;
            } else if self.wifi_attempts > 0 {
                tracing::info!("Waiting for more WiFi attempts before trying LTE...");
            }
        }

        let connected = self.is_connected().await;
        self.status.send_if_modified(|current| {
            let changed = *current != connected;
            *current = connected;
            changed
        });
    }

    async fn fall_back_to_lte(&mut self) {
        if self.modem.is_none() || self.is_lte_connected().await {
            return;
        }

        let now = Instant::now();
        match self.last_lte_attempt {
            Some(last) if now.duration_since(last) < LTE_RETRY_COOLDOWN => {
                let remaining = LTE_RETRY_COOLDOWN - now.duration_since(last);
                tracing::info!("LTE cooldown active, {} remaining", format_remaining(remaining));
            }
            _ => {
                tracing::info!("Minimum WiFi attempts reached, trying LTE as fallback...");
                self.last_lte_attempt = Some(now);
                if !self.connect_lte().await {
                    tracing::warn!("LTE connection failed, will retry after cooldown period");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::share;
    use crate::network::sim::{SimModem, SimWifi};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn credentials() -> Credentials {
        Credentials {
            ssid: "sentinel".into(),
            password: "secret".into(),
            apn: "internet".into(),
        }
    }

    fn network(wifi: SimWifi, modem: Arc<Mutex<SimModem>>) -> (Network, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        let shared: SharedModem = modem;
        (Network::new(Box::new(wifi), Some(shared), credentials(), tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_wifi_preferred() {
        let modem = Arc::new(Mutex::new(SimModem::new()));
        let (mut net, status) = network(SimWifi::new(true), modem.clone());

        net.maintain_connection().await;
        assert!(*status.borrow());
        assert_eq!(net.wifi_attempts(), 0);
        assert_eq!(modem.lock().await.connects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lte_after_min_wifi_attempts() {
        let modem = Arc::new(Mutex::new(SimModem::new()));
        let (mut net, status) = network(SimWifi::new(false), modem.clone());

        for _ in 0..MIN_WIFI_ATTEMPTS - 1 {
            net.maintain_connection().await;
            assert!(!*status.borrow());
        }
        assert_eq!(modem.lock().await.connects(), 0);

        net.maintain_connection().await;
        assert!(*status.borrow());
        assert!(net.is_lte_connected().await);
        assert_eq!(modem.lock().await.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lte_cooldown() {
        let modem = Arc::new(Mutex::new(SimModem::failing()));
        let (mut net, status) = network(SimWifi::new(false), modem.clone());

        for _ in 0..MIN_WIFI_ATTEMPTS + 2 {
            net.maintain_connection().await;
        }
        assert!(!*status.borrow());
        assert_eq!(modem.lock().await.connects(), 1);

        tokio::time::advance(LTE_RETRY_COOLDOWN).await;
        net.maintain_connection().await;
        assert_eq!(modem.lock().await.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wifi_return_powers_down_modem() {
        let modem = Arc::new(Mutex::new(SimModem::new()));
        let wifi = SimWifi::new(false);
        let in_range = wifi.in_range();
        let (mut net, status) = network(wifi, modem.clone());

        for _ in 0..MIN_WIFI_ATTEMPTS {
            net.maintain_connection().await;
        }
        assert!(modem.lock().await.is_enabled());

        in_range.store(true, Ordering::Relaxed);
        net.maintain_connection().await;
        assert!(*status.borrow());
        assert!(!modem.lock().await.is_enabled());
        assert!(!net.is_lte_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_modem_stays_offline() {
        let (tx, status) = watch::channel(true);
        let mut net = Network::new(Box::new(SimWifi::new(false)), None, credentials(), tx);
        for _ in 0..MIN_WIFI_ATTEMPTS + 1 {
            net.maintain_connection().await;
        }
        assert!(!*status.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_modem_keeps_last_state() {
        let modem = share(SimModem::new());
        let (tx, _status) = watch::channel(false);
        let mut net = Network::new(
            Box::new(SimWifi::new(false)),
            Some(modem.clone()),
            credentials(),
            tx,
        );
        assert!(net.connect_lte().await);

        let _held = modem.lock().await;
        assert!(net.is_lte_connected().await);
    }
}
