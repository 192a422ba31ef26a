//! GNSS positioning through the shared modem

use super::{lock_modem, SharedModem};
use crate::error::ModemError;
use std::time::Duration;
use tokio::time::Instant;

/// How long the GPS waits for the modem before skipping a read
pub const GPS_LOCK_TIMEOUT: Duration = Duration::from_secs(1);
const GPS_ENABLE_SETTLE: Duration = Duration::from_secs(2);
const FIX_POLL_INTERVAL: Duration = Duration::from_secs(2);
const FIX_PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsLocation {
    pub latitude: f32,
    pub longitude: f32,
    /// Meters per second
    pub speed: f32,
    pub altitude: f32,
    pub accuracy: f32,
    pub satellites: u32,
    pub valid: bool,
    pub timestamp: Instant,
}

pub struct Gps {
    modem: SharedModem,
    last: Option<GpsLocation>,
}

impl Gps {
    pub fn new(modem: SharedModem) -> Self {
        Self { modem, last: None }
    }

    pub fn begin(&self) {
        tracing::info!("GPS initialized");
    }

    pub async fn enable(&mut self) -> Result<(), ModemError> {
        let mut modem = lock_modem(&self.modem, GPS_LOCK_TIMEOUT).await?;
        if modem.is_gnss_enabled().await {
            tracing::info!("GPS is already enabled");
            return Ok(());
        }

        tracing::info!("Enabling GPS...");
        modem.enable_gnss().await?;
        tokio::time::sleep(GPS_ENABLE_SETTLE).await;

        if modem.is_gnss_enabled().await {
            tracing::info!("GPS enable confirmed");
            Ok(())
        } else {
            Err(ModemError::Command {
                command: "AT+CGNSSPWR=1".to_string(),
                response: "GNSS not powered after enable".to_string(),
            })
        }
    }

    pub async fn disable(&mut self) -> Result<(), ModemError> {
        let mut modem = lock_modem(&self.modem, GPS_LOCK_TIMEOUT).await?;
        modem.disable_gnss().await?;
        tracing::info!("GPS disabled");
        Ok(())
    }

    pub async fn is_enabled(&self) -> bool {
        match lock_modem(&self.modem, GPS_LOCK_TIMEOUT).await {
            Ok(mut modem) => modem.is_gnss_enabled().await,
            Err(_) => false,
        }
    }

    /// Read the current position; `valid` tells whether it is a real fix
    pub async fn location(&mut self) -> Result<GpsLocation, ModemError> {
        let fix = {
            let mut modem = lock_modem(&self.modem, GPS_LOCK_TIMEOUT).await?;
            if !modem.is_gnss_enabled().await {
                return Err(ModemError::Command {
                    command: "AT+CGNSSPWR?".to_string(),
                    response: "GNSS not enabled".to_string(),
                });
            }
            modem.gnss_info().await?
        };

        let location = match fix {
            Some(fix) => GpsLocation {
                latitude: fix.latitude,
                longitude: fix.longitude,
                speed: fix.speed,
                altitude: fix.altitude,
                accuracy: fix.accuracy,
                satellites: fix.satellites,
                valid: fix.latitude != 0.0 && fix.longitude != 0.0 && fix.mode > 0,
                timestamp: Instant::now(),
            },
            None => GpsLocation {
                latitude: 0.0,
                longitude: 0.0,
                speed: 0.0,
                altitude: 0.0,
                accuracy: 0.0,
                satellites: 0,
                valid: false,
                timestamp: Instant::now(),
            },
        };

        if location.valid {
            tracing::debug!(
                "Valid fix: {:.6}, {:.6} (sats: {})",
                location.latitude,
                location.longitude,
                location.satellites
            );
            self.last = Some(location);
        } else {
            tracing::debug!("No fix yet (sats: {})", location.satellites);
        }
        Ok(location)
    }

    /// Last valid fix, if any
    pub fn last_location(&self) -> Option<GpsLocation> {
        self.last
    }

    pub async fn wait_for_fix(&mut self, timeout: Duration) -> bool {
        tracing::info!("Waiting for GPS fix...");
        let start = Instant::now();
        let mut next_progress = FIX_PROGRESS_INTERVAL;

        while start.elapsed() < timeout {
            if let Ok(location) = self.location().await {
                if location.valid {
                    tracing::info!("GPS fix obtained in {:?}", start.elapsed());
                    return true;
                }
            }
            if start.elapsed() >= next_progress {
                tracing::info!("Still waiting for fix... {:?}/{:?}", start.elapsed(), timeout);
                next_progress += FIX_PROGRESS_INTERVAL;
            }
            tokio::time::sleep(FIX_POLL_INTERVAL).await;
        }

        tracing::warn!("Timeout waiting for GPS fix");
        false
    }
}
