//! Motion sampling with periodic reports

use super::{send_reading, sleep_or_shutdown};
use crate::data::SensorMessage;
use crate::sensors::SensorAccelerometer;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

pub async fn run(
    mut sensor: SensorAccelerometer,
    sample: Duration,
    report: Duration,
    data: mpsc::Sender<SensorMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = sensor.begin().await {
        tracing::error!("Failed to initialize accelerometer: {}", e);
        return;
    }

    let mut last_report = Instant::now();
    loop {
        if let Err(e) = sensor.update().await {
            tracing::debug!("Accelerometer read failed: {}", e);
        }

        if last_report.elapsed() >= report {
            last_report = Instant::now();
            let fall = sensor.fall_detected();
            tracing::debug!(
                "X: {:.3}, Y: {:.3}, Z: {:.3}, steps: {}",
                sensor.x(),
                sensor.y(),
                sensor.z(),
                sensor.steps()
            );

            let mut msg = SensorMessage::new();
            msg.set_accel_x(sensor.x())
                .set_accel_y(sensor.y())
                .set_accel_z(sensor.z())
                .set_accel_total(sensor.total())
                .set_steps(sensor.steps())
                .set_fall_detected(fall);
            // keep the fall latched until it made it into the queue
            if send_reading(&data, msg, "accelerometer").await && fall {
                sensor.clear_fall();
            }
        }

        if !sleep_or_shutdown(&mut shutdown, sample).await {
            break;
        }
    }
    tracing::info!("Accelerometer task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::accelerometer::MotionParams;
    use crate::sensors::sim::ScriptedAccel;

    #[tokio::test(start_paused = true)]
    async fn test_fall_reported_once() {
        let params = MotionParams {
            offsets: [0.0; 3],
            ..MotionParams::default()
        };
        // impact, then lying on the side
        let source = ScriptedAccel::new(vec![[0.0, 0.0, 2.5], [1.0, 0.0, 0.1]]);
        let sensor = SensorAccelerometer::new(Box::new(source), params);
        let (tx, mut rx) = mpsc::channel(10);
        let (stop, shutdown) = watch::channel(false);

        let task = tokio::spawn(run(
            sensor,
            Duration::from_millis(50),
            Duration::from_secs(1),
            tx,
            shutdown,
        ));
        tokio::time::sleep(Duration::from_millis(2200)).await;
        stop.send(true).unwrap();
        task.await.unwrap();

        let reports: Vec<SensorMessage> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(reports.len(), 2);
        assert!(reports[0].data.fall_detected);
        assert!(!reports[1].data.fall_detected);
        assert!(reports[1].valid.fall_detected);
        assert!((reports[1].data.accel_x - 1.0).abs() < 1e-6);
        assert!(reports[1].valid.steps);
    }
}
