//! Heart-rate strap supervision and reporting

use super::{send_if_online, sleep_or_shutdown};
use crate::bluetooth::{BleTransport, BluetoothClient};
use crate::data::SensorMessage;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct BluetoothSettings {
    /// How often the client state machine runs
    pub tick: Duration,
    /// How often the heart rate is considered for reporting
    pub report: Duration,
}

pub async fn run<T: BleTransport + 'static>(
    mut client: BluetoothClient<T>,
    settings: BluetoothSettings,
    data: mpsc::Sender<SensorMessage>,
    network: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = client.begin().await {
        tracing::error!("Failed to start scanning: {}", e);
    }

    let mut last_report: Option<Instant> = None;
    let mut reported: Option<u8> = None;
    loop {
        client.tick().await;

        if last_report.map_or(true, |at| at.elapsed() >= settings.report) {
            last_report = Some(Instant::now());
            if client.has_heart_rate() && reported != Some(client.heart_rate()) {
                let heart_rate = client.heart_rate();
                tracing::info!("HR: {}", heart_rate);
                let mut msg = SensorMessage::new();
                msg.set_heart_rate(heart_rate);
                send_if_online(&data, &network, msg, "bluetooth").await;
                reported = Some(heart_rate);
            } else {
                tracing::debug!("Strap {}", client.state().as_str());
            }
        }

        if !sleep_or_shutdown(&mut shutdown, settings.tick).await {
            break;
        }
    }
    tracing::info!("Bluetooth task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::emulator::EmulatedTransport;

    #[tokio::test(start_paused = true)]
    async fn test_reports_emulated_heart_rate() {
        let address = "a0:9e:1a:ec:35:1e";
        let (transport, events) = EmulatedTransport::with_interval(address, Duration::from_secs(1));
        let client = BluetoothClient::new(transport, events, address);
        let (tx, mut rx) = mpsc::channel(10);
        let (_net_tx, network) = watch::channel(true);
        let (stop, shutdown) = watch::channel(false);

        let settings = BluetoothSettings {
            tick: Duration::from_secs(1),
            report: Duration::from_secs(10),
        };
        let task = tokio::spawn(run(client, settings, tx, network, shutdown));
        tokio::time::sleep(Duration::from_secs(25)).await;
        stop.send(true).unwrap();
        task.await.unwrap();

        let first = rx.try_recv().unwrap();
        assert!(first.valid.heart_rate);
        assert!((60..=100).contains(&first.data.heart_rate));
    }
}
