//! Hub battery reporting

use super::{send_reading, sleep_or_shutdown};
use crate::data::SensorMessage;
use crate::sensors::{BatterySource, BatteryStatus};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub async fn run(
    mut source: Box<dyn BatterySource>,
    period: Duration,
    data: mpsc::Sender<SensorMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        match source.sample().await {
            Ok(sample) => {
                match sample.voltage {
                    Some(volts) => tracing::info!(
                        "Voltage: {:.0} mV, Percent: {} %",
                        volts * 1000.0,
                        sample.percent
                    ),
                    None => tracing::info!("Percent: {} %", sample.percent),
                }
                match sample.status {
                    BatteryStatus::Critical => tracing::error!(
                        "Battery critical ({} %), entering power save",
                        sample.percent
                    ),
                    BatteryStatus::Low => tracing::warn!("Battery low ({} %)", sample.percent),
                    BatteryStatus::Normal => {}
                }

                let mut msg = SensorMessage::new();
                msg.set_device_battery(sample.percent);
                send_reading(&data, msg, "battery").await;
            }
            Err(e) => tracing::warn!("Battery read failed: {}", e),
        }

        if !sleep_or_shutdown(&mut shutdown, period).await {
            break;
        }
    }
    tracing::info!("Battery task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::sim::ScriptedAnalog;
    use crate::sensors::BatteryMonitor;

    #[tokio::test(start_paused = true)]
    async fn test_reports_percent_every_period() {
        // 1900 mV behind a 2:1 divider is a 3.8 V cell
        let monitor = BatteryMonitor::new(Box::new(ScriptedAnalog::constant(1900.0)), 4.2, 3.3, 2.0);
        let (tx, mut rx) = mpsc::channel(10);
        let (stop, shutdown) = watch::channel(false);

        let task = tokio::spawn(run(Box::new(monitor), Duration::from_secs(2), tx, shutdown));
        tokio::time::sleep(Duration::from_secs(5)).await;
        stop.send(true).unwrap();
        task.await.unwrap();

        let levels: Vec<u8> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|m| m.data.device_battery)
            .collect();
        assert_eq!(levels, [56, 56, 56]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reads_send_nothing() {
        let monitor = BatteryMonitor::new(Box::new(ScriptedAnalog::new(Vec::new())), 4.2, 3.3, 2.0);
        let (tx, mut rx) = mpsc::channel(10);
        let (stop, shutdown) = watch::channel(false);

        let task = tokio::spawn(run(Box::new(monitor), Duration::from_secs(2), tx, shutdown));
        tokio::time::sleep(Duration::from_secs(3)).await;
        stop.send(true).unwrap();
        task.await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
