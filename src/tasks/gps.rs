//! Position reporting from the modem's GNSS

use super::{send_reading, sleep_or_shutdown};
use crate::data::SensorMessage;
use crate::error::ModemError;
use crate::network::Gps;
use crate::shared::format_remaining;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// How long the first fix may take before periodic reads start anyway
pub const FIRST_FIX_TIMEOUT: Duration = Duration::from_secs(60);

pub async fn run(
    mut gps: Gps,
    period: Duration,
    data: mpsc::Sender<SensorMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    gps.begin();
    if let Err(e) = gps.enable().await {
        tracing::error!("Failed to enable GPS: {}", e);
        return;
    }

    let first_fix = tokio::select! {
        found = gps.wait_for_fix(FIRST_FIX_TIMEOUT) => Some(found),
        _ = shutdown.wait_for(|stop| *stop) => None,
    };
    if let Some(found) = first_fix {
        if !found {
            tracing::warn!("No fix within {:?}, reading periodically", FIRST_FIX_TIMEOUT);
        }
        report_positions(&mut gps, period, &data, &mut shutdown).await;
    }

    if let Err(e) = gps.disable().await {
        tracing::debug!("GPS not disabled on shutdown: {}", e);
    }
    tracing::info!("GPS task stopped");
}

async fn report_positions(
    gps: &mut Gps,
    period: Duration,
    data: &mpsc::Sender<SensorMessage>,
    shutdown: &mut watch::Receiver<bool>,
) {
    loop {
        match gps.location().await {
            Ok(location) if location.valid => {
                tracing::info!(
                    "Location: Lat: {:.6}, Lon: {:.6}, Speed: {:.2} m/s, Altitude: {:.2} m, Satellites: {}",
                    location.latitude,
                    location.longitude,
                    location.speed,
                    location.altitude,
                    location.satellites
                );
                let mut msg = SensorMessage::new();
                msg.set_latitude(location.latitude)
                    .set_longitude(location.longitude)
                    .set_gps_speed(location.speed)
                    .set_gps_altitude(location.altitude)
                    .set_gps_accuracy(location.accuracy)
                    .set_gps_satellites(location.satellites);
                send_reading(data, msg, "gps").await;
            }
            Ok(_) => match gps.last_location() {
                Some(last) => tracing::info!(
                    "GPS fix lost, last fix {} ago",
                    format_remaining(last.timestamp.elapsed())
                ),
                None => tracing::info!("No GPS fix yet"),
            },
            Err(ModemError::Busy) => tracing::warn!("Modem busy, skipping GPS read"),
            Err(e) => tracing::warn!("Failed to get GPS location: {}", e),
        }

        if !sleep_or_shutdown(shutdown, period).await {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::modem::tests::fake_modem;
    use crate::network::share;
    use crate::network::sim::SimModem;

    #[tokio::test(start_paused = true)]
    async fn test_reports_all_position_fields() {
        let (tx, mut rx) = mpsc::channel(10);
        let (stop, shutdown) = watch::channel(false);

        let gps = Gps::new(share(SimModem::new()));
        let task = tokio::spawn(run(gps, Duration::from_secs(30), tx, shutdown));
        tokio::time::sleep(Duration::from_secs(40)).await;
        stop.send(true).unwrap();
        task.await.unwrap();

        let reports: Vec<SensorMessage> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(reports.len(), 2);
        let valid = reports[0].valid;
        assert_eq!(valid.count(), 6);
        assert!(valid.latitude && valid.longitude && valid.gps_satellites);
        assert!((reports[0].data.longitude - 18.07).abs() < 0.01);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_waiting_for_first_fix() {
        let modem = fake_modem(|cmd| match cmd {
            "AT+CGNSSPWR?" => vec!["+CGNSSPWR: 1", "OK"],
            "AT+CGNSSINFO" => vec!["+CGNSSINFO: ,,,,,,,,,,,,,,,", "OK"],
            _ => vec!["OK"],
        });
        let (tx, mut rx) = mpsc::channel(10);
        let (stop, shutdown) = watch::channel(false);

        let task = tokio::spawn(run(Gps::new(share(modem)), Duration::from_secs(30), tx, shutdown));
        tokio::time::sleep(Duration::from_secs(10)).await;
        stop.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(rx.try_recv().is_err());
    }
}
