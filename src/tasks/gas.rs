//! Gas concentration reporting

use super::{send_reading, sleep_or_shutdown};
use crate::data::SensorMessage;
use crate::sensors::Mq2Sensor;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub async fn run(
    mut sensor: Mq2Sensor,
    period: Duration,
    delta_threshold: f32,
    data: mpsc::Sender<SensorMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = sensor.begin().await {
        tracing::error!("Failed to initialize MQ-2 sensor: {}", e);
        return;
    }
    tracing::info!("Calibrating MQ-2 in clean air...");
    if let Err(e) = sensor.calibrate().await {
        tracing::error!("MQ-2 calibration failed: {}", e);
        return;
    }

    let mut last: Option<f32> = None;
    loop {
        sensor.update().await;
        match sensor.value() {
            Some(ppm) if last.map_or(true, |prev| (ppm - prev).abs() > delta_threshold) => {
                tracing::info!("Gas concentration: {} ppm", ppm);
                let mut msg = SensorMessage::new();
                msg.set_gas_level(ppm);
                send_reading(&data, msg, "gas").await;
                last = Some(ppm);
            }
            Some(ppm) => tracing::debug!("Gas concentration: {} ppm (unchanged)", ppm),
            None => tracing::debug!("Gas reading out of range ({} ppm)", sensor.ppm()),
        }

        if !sleep_or_shutdown(&mut shutdown, period).await {
            break;
        }
    }
    tracing::info!("Gas task stopped");
}
