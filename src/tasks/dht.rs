//! Temperature/humidity reporting

use super::{send_if_online, sleep_or_shutdown};
use crate::data::SensorMessage;
use crate::sensors::dht::{DhtDecision, DhtFilter};
use crate::sensors::SensorDht;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, Copy)]
pub struct DhtSettings {
    pub period: Duration,
    pub temp_threshold: f32,
    pub hum_threshold: f32,
}

pub async fn run(
    mut sensor: SensorDht,
    settings: DhtSettings,
    data: mpsc::Sender<SensorMessage>,
    network: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = sensor.begin().await {
        tracing::error!("Failed to initialize DHT sensor: {}", e);
        return;
    }
    tracing::info!("DHT sensor started");

    let mut filter = DhtFilter::new(settings.temp_threshold, settings.hum_threshold);
    loop {
        sensor.update().await;
        let (temperature, humidity) = (sensor.temperature(), sensor.humidity());

        match filter.offer(temperature, humidity) {
            DhtDecision::Send {
                first,
                delta_temp,
                delta_hum,
            } => {
                if first {
                    tracing::info!(
                        "Sending first reading: T={:.2}°C, H={:.2}%",
                        temperature,
                        humidity
                    );
                } else {
                    tracing::info!(
                        "Sending: T={:.2}°C (Δ{:.2}), H={:.2}% (Δ{:.2})",
                        temperature,
                        delta_temp,
                        humidity,
                        delta_hum
                    );
                }
                let mut msg = SensorMessage::new();
                msg.set_temperature(temperature).set_humidity(humidity);
                send_if_online(&data, &network, msg, "dht").await;
            }
            DhtDecision::Unchanged => {
                tracing::debug!("T: {:.2}°C, H: {:.2}% (unchanged)", temperature, humidity);
            }
            DhtDecision::SkipGlitch => {
                tracing::info!("Skipping isolated 0.0°C reading");
            }
            DhtDecision::Invalid => {
                tracing::warn!("Invalid sensor reading, skipping...");
            }
        }

        if !sleep_or_shutdown(&mut shutdown, settings.period).await {
            break;
        }
    }
    tracing::info!("DHT task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SensorError;
    use crate::sensors::sim::ScriptedDht;

    const SETTINGS: DhtSettings = DhtSettings {
        period: Duration::from_secs(60),
        temp_threshold: 0.1,
        hum_threshold: 1.0,
    };

    #[tokio::test(start_paused = true)]
    async fn test_reports_changes_only() {
        let source = ScriptedDht::new(vec![
            Ok((21.0, 40.0)),
            Ok((21.05, 40.5)),
            Err(SensorError::Unavailable("checksum".into())),
            Ok((0.0, 40.0)),
            Ok((22.0, 40.0)),
        ]);
        let (tx, mut rx) = mpsc::channel(10);
        let (_net_tx, network) = watch::channel(true);
        let (stop, shutdown) = watch::channel(false);

        let task = tokio::spawn(run(
            SensorDht::new(Box::new(source)),
            SETTINGS,
            tx,
            network,
            shutdown,
        ));
        tokio::time::sleep(Duration::from_secs(5 * 60 - 30)).await;
        stop.send(true).unwrap();
        task.await.unwrap();

        let temps: Vec<f32> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|m| {
                assert!(m.valid.humidity);
                m.data.temperature
            })
            .collect();
        assert_eq!(temps, [21.0, 22.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_readings_are_not_queued() {
        let source = ScriptedDht::new(vec![Ok((21.0, 40.0))]);
        let (tx, mut rx) = mpsc::channel(10);
        let (_net_tx, network) = watch::channel(false);
        let (stop, shutdown) = watch::channel(false);

        let task = tokio::spawn(run(
            SensorDht::new(Box::new(source)),
            SETTINGS,
            tx,
            network,
            shutdown,
        ));
        tokio::time::sleep(Duration::from_secs(1)).await;
        stop.send(true).unwrap();
        task.await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
