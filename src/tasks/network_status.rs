//! Uplink supervision

use super::sleep_or_shutdown;
use crate::network::Network;
use std::time::Duration;
use tokio::sync::watch;

pub async fn run(mut network: Network, period: Duration, mut shutdown: watch::Receiver<bool>) {
    network.begin();
    loop {
        network.maintain_connection().await;
        if network.status() {
            tracing::info!("Connected to internet");
        } else {
            tracing::warn!("Not connected, retrying...");
        }

        if !sleep_or_shutdown(&mut shutdown, period).await {
            break;
        }
    }

    network.disconnect_lte().await;
    network.disable_modem().await;
    network.disconnect_wifi().await;
    tracing::info!("Network task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::manager::{Credentials, MIN_WIFI_ATTEMPTS};
    use crate::network::share;
    use crate::network::sim::{SimModem, SimWifi};
    use crate::network::WifiLink;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_publishes_lte_fallback() {
        let (status_tx, mut status) = watch::channel(false);
        let network = Network::new(
            Box::new(SimWifi::new(false)),
            Some(share(SimModem::new())),
            Credentials {
                ssid: "lab".into(),
                password: "pw".into(),
                apn: "internet".into(),
            },
            status_tx,
        );
        let (stop, shutdown) = watch::channel(false);
        let period = Duration::from_secs(10);
        let task = tokio::spawn(run(network, period, shutdown));

        tokio::time::sleep(period * (MIN_WIFI_ATTEMPTS - 2)).await;
        assert!(!*status.borrow_and_update());

        tokio::time::sleep(period * 2).await;
        assert!(*status.borrow_and_update());

        stop.send(true).unwrap();
        task.await.unwrap();
    }

    /// Link that is always up and records being torn down
    struct TrackedWifi {
        down: Arc<AtomicBool>,
    }

    #[async_trait]
    impl WifiLink for TrackedWifi {
        async fn scan(&mut self, _ssid: &str) -> bool {
            true
        }

        async fn connect(&mut self, _ssid: &str, _password: &str) -> bool {
            true
        }

        async fn is_connected(&mut self) -> bool {
            !self.down.load(Ordering::Relaxed)
        }

        async fn disconnect(&mut self) {
            self.down.store(true, Ordering::Relaxed);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drops_wifi() {
        let down = Arc::new(AtomicBool::new(false));
        let (status_tx, status) = watch::channel(false);
        let network = Network::new(
            Box::new(TrackedWifi { down: down.clone() }),
            None,
            Credentials {
                ssid: "lab".into(),
                password: "pw".into(),
                apn: "internet".into(),
            },
            status_tx,
        );
        let (stop, shutdown) = watch::channel(false);
        let task = tokio::spawn(run(network, Duration::from_secs(10), shutdown));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(*status.borrow());
        assert!(!down.load(Ordering::Relaxed));

        stop.send(true).unwrap();
        task.await.unwrap();
        assert!(down.load(Ordering::Relaxed));
    }
}
